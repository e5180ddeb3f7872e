//! Artifact storage boundary.
//!
//! Test artifacts (screenshots, logs, videos) are uploaded to a blob store
//! and only their URLs travel in status reports. The uploader itself is an
//! external collaborator behind [`ArtifactStore`]; this module owns the
//! credential handoff: the reporting service returns storage credentials
//! with a successful run adoption, and environment variables override them.
//! When no credentials are available the coordinator still functions;
//! artifact URLs simply stay empty.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Blob-store credentials for artifact uploads.
///
/// Deserialized from the `artifacts` object of a run response, whose keys
/// arrive upper-cased from the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactCredentials {
    #[serde(default, alias = "REGION")]
    pub region: Option<String>,
    #[serde(default, alias = "ACCESS_KEY_ID")]
    pub access_key_id: Option<String>,
    #[serde(default, alias = "SECRET_ACCESS_KEY")]
    pub secret_access_key: Option<String>,
    #[serde(default, alias = "ENDPOINT")]
    pub endpoint: Option<String>,
    #[serde(default, alias = "BUCKET")]
    pub bucket: Option<String>,
    /// Key prefix for this run's uploads, typically the run id.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Whether objects are uploaded privately (presigned access).
    #[serde(default, alias = "presign")]
    pub private: bool,
}

impl ArtifactCredentials {
    /// Applies environment overrides on top of service-supplied values and
    /// scopes the key prefix to the given run.
    ///
    /// Environment wins over the response, matching the precedence the
    /// reporting service documents: `RUNLINK_S3_REGION`,
    /// `RUNLINK_S3_ACCESS_KEY_ID`, `RUNLINK_S3_SECRET_ACCESS_KEY`,
    /// `RUNLINK_S3_ENDPOINT`, `RUNLINK_S3_BUCKET`, `RUNLINK_S3_BUCKET_PATH`
    /// and `RUNLINK_PRIVATE_ARTIFACTS`.
    pub fn resolved(mut self, run_id: &str) -> Self {
        let env = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        self.region = env("RUNLINK_S3_REGION").or(self.region);
        self.access_key_id = env("RUNLINK_S3_ACCESS_KEY_ID").or(self.access_key_id);
        self.secret_access_key = env("RUNLINK_S3_SECRET_ACCESS_KEY").or(self.secret_access_key);
        self.endpoint = env("RUNLINK_S3_ENDPOINT").or(self.endpoint).map(strip_scheme);
        self.bucket = env("RUNLINK_S3_BUCKET").or(self.bucket);
        self.private = self.private || env("RUNLINK_PRIVATE_ARTIFACTS").is_some();

        self.prefix = Some(match env("RUNLINK_S3_BUCKET_PATH") {
            Some(path) => format!("{}/{}", path.trim_end_matches('/'), run_id),
            None => run_id.to_string(),
        });
        self
    }

    /// True when enough is present to attempt uploads.
    pub fn is_complete(&self) -> bool {
        self.access_key_id.is_some()
            && self.secret_access_key.is_some()
            && self.endpoint.is_some()
            && self.bucket.is_some()
    }

    /// The full object key for an artifact name under this run's prefix.
    pub fn object_key(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{name}"),
            None => name.to_string(),
        }
    }
}

fn strip_scheme(endpoint: String) -> String {
    endpoint
        .strip_prefix("https://")
        .or_else(|| endpoint.strip_prefix("http://"))
        .map(str::to_string)
        .unwrap_or(endpoint)
}

/// Uploads artifacts and returns their public URLs.
///
/// Implementations log their own failures and return `None` instead of
/// erroring. A lost artifact never affects the test session.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Uploads a file from disk under the given key; returns its URL.
    async fn upload_file(&self, path: &std::path::Path, key: &str) -> Option<String>;

    /// Uploads an in-memory byte buffer under the given key.
    async fn upload_bytes(&self, bytes: &[u8], key: &str) -> Option<String>;
}

/// A store that uploads nothing, used when no credentials were granted.
pub struct NullStore;

#[async_trait]
impl ArtifactStore for NullStore {
    async fn upload_file(&self, path: &std::path::Path, _key: &str) -> Option<String> {
        debug!("Skipping artifact upload of {} (no store)", path.display());
        None
    }

    async fn upload_bytes(&self, _bytes: &[u8], _key: &str) -> Option<String> {
        None
    }
}
