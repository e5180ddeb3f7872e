//! Test identity and title resolution.
//!
//! The remote service matches local tests to its own records by *title*, so
//! every test gets a small family of deterministic titles derived from its
//! raw framework name:
//!
//! | Title | Purpose | Example |
//! |-------|---------|---------|
//! | `title` | Human display name | `User login` |
//! | `sync_title` | Pushed when syncing definitions; parameter *names* as placeholders | `Add ${a} ${b} @T1234` |
//! | `resync_title` | `sync_title` with the identity tag stripped, for re-matching | `Add ${a} ${b}` |
//! | `exec_title` | Reported per invocation; placeholders substituted with values | `Add 2 3 @T1234` |
//!
//! The sync title stays parameter-**name** based so the remote side
//! recognizes "the same test" across different parameter values. Both sync
//! and resync titles are stable across repeated collection of unchanged
//! source: they are the join key against the remote test list.
//!
//! # Example
//!
//! ```
//! use runlink::identity::TestIdentity;
//!
//! let mut identity = TestIdentity::new("test_add[2-3]").with_tag("@T1234");
//! identity.add_parametrize_args("a,b");
//!
//! assert_eq!(identity.title(), "Add");
//! assert_eq!(identity.sync_title(), "Add ${a} ${b} @T1234");
//! assert_eq!(identity.resync_title(), "Add ${a} ${b}");
//! ```

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;

/// Marker prefix of an identity tag embedded in test source once a test has
/// been synchronized with the remote service, e.g. `@T8b62a77c`.
pub const TAG_PREFIX: &str = "@T";

/// A concrete parameter value attached to one test invocation.
///
/// Values arrive from the host framework in whatever shape its
/// parameterization produced; the conversion to a reportable string must
/// never fail, because a reporting failure must never fail the test run.
/// Modeling the value as a closed enum makes [`ParamValue::to_safe_string`]
/// total by construction.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Raw byte sequences decode as lossy UTF-8.
    Bytes(Vec<u8>),
    /// A callable passed as a parameter; carries its name if it has one.
    Function(Option<String>),
    /// Anything else, degraded to a best-effort string form by the adapter.
    Other(String),
}

impl ParamValue {
    /// Converts the value to a reportable string. Total: no input can make
    /// this fail.
    ///
    /// # Example
    ///
    /// ```
    /// use runlink::identity::ParamValue;
    ///
    /// assert_eq!(ParamValue::Int(2).to_safe_string(), "2");
    /// assert_eq!(ParamValue::Function(None).to_safe_string(), "anonymous_function");
    /// assert_eq!(ParamValue::Bytes(b"abc".to_vec()).to_safe_string(), "abc");
    /// ```
    pub fn to_safe_string(&self) -> String {
        match self {
            ParamValue::Null => "null".to_string(),
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Float(f) => f.to_string(),
            ParamValue::Str(s) => s.clone(),
            ParamValue::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            ParamValue::Function(name) => name
                .clone()
                .unwrap_or_else(|| "anonymous_function".to_string()),
            ParamValue::Other(repr) => repr.clone(),
        }
    }
}

impl From<&Value> for ParamValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => ParamValue::Null,
            Value::Bool(b) => ParamValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ParamValue::Int(i)
                } else {
                    ParamValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => ParamValue::Str(s.clone()),
            other => ParamValue::Other(other.to_string()),
        }
    }
}

/// Converts a parameter map to safe string form, e.g. for the `example`
/// field of a status report.
pub fn safe_params(params: &BTreeMap<String, ParamValue>) -> BTreeMap<String, String> {
    params
        .iter()
        .map(|(key, value)| (key.clone(), value.to_safe_string()))
        .collect()
}

/// Strips the bracketed parameter suffix from a raw test name.
///
/// `test_add[2-3]` → `test_add`; names without brackets pass through.
pub fn base_title(raw_name: &str) -> &str {
    match raw_name.find('[') {
        Some(at) => &raw_name[..at],
        None => raw_name,
    }
}

/// Humanizes a framework test name into a remote-facing title.
///
/// Lower-cases, turns underscores into spaces, removes the first occurrence
/// of the literal word `test`, trims, and upper-cases the first letter.
/// Pure and deterministic; used for both display and remote title
/// generation.
///
/// # Example
///
/// ```
/// use runlink::identity::humanize;
///
/// assert_eq!(humanize("test_user_login"), "User login");
/// assert_eq!(humanize("TEST_CHECKOUT"), "Checkout");
/// ```
pub fn humanize(name: &str) -> String {
    let lowered = name.to_lowercase().replace('_', " ");
    let cleaned = match lowered.find("test") {
        Some(at) => format!("{}{}", &lowered[..at], &lowered[at + 4..]),
        None => lowered,
    };
    let trimmed = cleaned.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Identity of one discovered test.
///
/// Built once per test at collection time by the host-framework adapter and
/// immutable afterward. The adapter feeds in the raw name, any identity tag
/// already present in source, the argument strings of parametrize-style
/// markers, and the keys of the resolved concrete parameter mapping (which
/// covers fixture-level parameterization not visible via explicit markers).
#[derive(Debug, Clone)]
pub struct TestIdentity {
    raw_name: String,
    remote_tag: Option<String>,
    param_names: Vec<String>,
}

impl TestIdentity {
    /// Creates an identity from the name as the host framework reports it
    /// (may include a bracketed parameter suffix).
    pub fn new(raw_name: impl Into<String>) -> Self {
        Self {
            raw_name: raw_name.into(),
            remote_tag: None,
            param_names: Vec::new(),
        }
    }

    /// Sets the identity tag already embedded in source, e.g. `@T1234`.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.remote_tag = Some(tag.into());
        self
    }

    /// Registers the argument string of one parametrize-style marker.
    ///
    /// A single argument string containing a comma is ambiguous between one
    /// parameter with a comma in its name and several parameters; it always
    /// splits on comma.
    pub fn add_parametrize_args(&mut self, arg_string: &str) {
        for name in arg_string.split(',') {
            self.push_param(name.trim());
        }
    }

    /// Registers the keys of the resolved concrete parameter mapping for
    /// this invocation.
    pub fn add_call_param_names<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            self.push_param(key.as_ref().trim());
        }
    }

    // Duplicates collapse; first-seen order is kept for a stable display
    // order across repeated collection.
    fn push_param(&mut self, name: &str) {
        if name.is_empty() {
            return;
        }
        if !self.param_names.iter().any(|existing| existing == name) {
            self.param_names.push(name.to_string());
        }
    }

    pub fn raw_name(&self) -> &str {
        &self.raw_name
    }

    /// The raw name with any bracketed parameter suffix stripped.
    pub fn base_title(&self) -> &str {
        base_title(&self.raw_name)
    }

    /// Humanized display title.
    pub fn title(&self) -> String {
        humanize(self.base_title())
    }

    /// Ordered, deduplicated parameter names contributing to this test's
    /// parameterization.
    pub fn parameter_names(&self) -> &[String] {
        &self.param_names
    }

    /// The embedded identity tag, if the test was previously synchronized.
    pub fn tag(&self) -> Option<&str> {
        self.remote_tag.as_deref()
    }

    /// The tag without its `@T` prefix, the form the remote service expects
    /// in status reports.
    pub fn tag_code(&self) -> Option<&str> {
        self.remote_tag
            .as_deref()
            .map(|tag| tag.strip_prefix(TAG_PREFIX).unwrap_or(tag))
    }

    /// Title used when pushing test definitions to the remote service.
    ///
    /// Parameter-*name* based: `${name}` placeholders in first-seen order,
    /// then the identity tag if present.
    pub fn sync_title(&self) -> String {
        let mut title = self.title();
        for name in &self.param_names {
            title.push_str(&format!(" ${{{name}}}"));
        }
        if let Some(tag) = &self.remote_tag {
            title.push(' ');
            title.push_str(tag);
        }
        title.trim().to_string()
    }

    /// Sync title with the identity tag suffix removed, used to re-match
    /// local tests after the remote service assigns tags.
    pub fn resync_title(&self) -> String {
        let title = self.sync_title();
        match title.find(TAG_PREFIX) {
            Some(at) if at > 0 => title[..at].trim().to_string(),
            _ => title,
        }
    }

    /// Title reported for one concrete invocation: each `${name}`
    /// placeholder substituted with the actual parameter value.
    ///
    /// Substituted values are converted via [`ParamValue::to_safe_string`]
    /// and any run of whitespace or `.` in the value collapses to a single
    /// `_`. A placeholder missing from the concrete mapping substitutes the
    /// empty string rather than failing, because a cosmetic reporting issue must
    /// never block test execution. Without resolved parameters or a
    /// concrete mapping, this is the humanized title with the tag.
    pub fn exec_title(&self, params: Option<&BTreeMap<String, ParamValue>>) -> String {
        let Some(params) = params else {
            return self.untemplated_title();
        };
        if self.param_names.is_empty() {
            return self.untemplated_title();
        }

        let placeholder = Regex::new(r"\$\{(.*?)\}").unwrap();
        let sync_title = self.sync_title();
        let substituted = placeholder.replace_all(&sync_title, |caps: &regex::Captures| {
            let value = params
                .get(&caps[1])
                .map(ParamValue::to_safe_string)
                .unwrap_or_default();
            sanitize_value(&value)
        });
        substituted.into_owned()
    }

    fn untemplated_title(&self) -> String {
        match &self.remote_tag {
            Some(tag) => format!("{} {}", self.title(), tag),
            None => self.title(),
        }
    }
}

// Runs of whitespace and dots break title parsing on the remote side.
fn sanitize_value(value: &str) -> String {
    let illegal = Regex::new(r"[\s.]+").unwrap();
    illegal.replace_all(value, "_").into_owned()
}
