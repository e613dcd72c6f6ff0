//! Embedded runtime backends.
//!
//! The bridge talks to the scripting runtime only through the [`ScriptRuntime`]
//! trait, which exposes the handful of object operations needed to load a script
//! and read device metadata: item and attribute lookup, attribute assignment,
//! mapping/sequence traversal and scalar extraction.
//!
//! ```text
//! ScriptRuntime trait
//!     ├── RhaiRuntime   (embedded, always available)
//!     └── PythonRuntime (CPython via PyO3, feature `python`)
//! ```
//!
//! Implementations translate every runtime failure into a [`BridgeError`] before
//! returning. Callers hold the [`ExecutionLock`](crate::lock::ExecutionLock)
//! around every call; backends do not lock on their own.

use std::fmt::Debug;
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, BridgeResult};

pub mod rhai_runtime;
pub use rhai_runtime::{RhaiObject, RhaiRuntime};

#[cfg(feature = "python")]
pub mod python_runtime;
#[cfg(feature = "python")]
pub use python_runtime::{PyHandle, PythonRuntime};

/// Backend used by the process-global context.
#[cfg(not(feature = "python"))]
pub type DefaultRuntime = RhaiRuntime;
/// Backend used by the process-global context.
#[cfg(feature = "python")]
pub type DefaultRuntime = PythonRuntime;

/// Plain value read out of a runtime object.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// The runtime's "absent" sentinel (`None` in Python, `()` in Rhai).
    None,
    /// Boolean.
    Bool(bool),
    /// Integer that fits in 64 bits.
    Int(i64),
    /// Floating point number, or an integer too large for `Int`.
    Float(f64),
    /// Text.
    Str(String),
    /// Anything that is not one of the above, described by its type name.
    Other(String),
}

impl Scalar {
    /// Human readable name of the value's shape, for error messages.
    pub fn kind(&self) -> &str {
        match self {
            Scalar::None => "none",
            Scalar::Bool(_) => "bool",
            Scalar::Int(_) => "int",
            Scalar::Float(_) => "float",
            Scalar::Str(_) => "string",
            Scalar::Other(name) => name,
        }
    }

    /// Whether this is the absent sentinel.
    pub fn is_none(&self) -> bool {
        matches!(self, Scalar::None)
    }

    /// String contents, or a metadata error naming `what`.
    pub fn into_string(self, what: &str) -> BridgeResult<String> {
        match self {
            Scalar::Str(s) => Ok(s),
            other => Err(BridgeError::metadata(format!(
                "{what} must be a string, found {}",
                other.kind()
            ))),
        }
    }

    /// Boolean value, or a metadata error naming `what`.
    pub fn into_bool(self, what: &str) -> BridgeResult<bool> {
        match self {
            Scalar::Bool(b) => Ok(b),
            other => Err(BridgeError::metadata(format!(
                "{what} must be a bool, found {}",
                other.kind()
            ))),
        }
    }

    /// Numeric value (ints widen to float), or a metadata error naming `what`.
    pub fn into_f64(self, what: &str) -> BridgeResult<f64> {
        match self {
            Scalar::Int(i) => Ok(i as f64),
            Scalar::Float(f) => Ok(f),
            other => Err(BridgeError::metadata(format!(
                "{what} must be a number, found {}",
                other.kind()
            ))),
        }
    }
}

/// Combined text executed for one script: generated prelude followed by the
/// user's code.
#[derive(Debug, Clone)]
pub struct ScriptSource {
    /// Text to execute.
    pub code: String,
    /// Script file the user code came from.
    pub origin: PathBuf,
    /// Number of lines in front of the user code, used to map error
    /// positions back onto the user's file.
    pub prelude_lines: usize,
}

impl ScriptSource {
    /// Join `prelude` and `user_code`, recording where the user code starts.
    pub fn new(prelude: &str, user_code: &str, origin: impl Into<PathBuf>) -> Self {
        let mut code = String::with_capacity(prelude.len() + user_code.len() + 1);
        code.push_str(prelude);
        if !prelude.is_empty() && !prelude.ends_with('\n') {
            code.push('\n');
        }
        let prelude_lines = code.lines().count();
        code.push_str(user_code);
        Self {
            code,
            origin: origin.into(),
            prelude_lines,
        }
    }

    /// Map a 1-based line in `code` onto the user's file.
    pub fn user_line(&self, line: usize) -> Option<usize> {
        line.checked_sub(self.prelude_lines).filter(|l| *l > 0)
    }
}

/// Operations the bridge needs from an embedded scripting runtime.
///
/// `Object` is an owned reference to a runtime value. Cloning it creates a new
/// reference to the same value, never a copy, so that writes through one handle
/// are visible through every other.
pub trait ScriptRuntime: Send + Sync + 'static {
    /// Owned reference to a runtime value.
    type Object: Clone + Debug + Send + Sync + 'static;

    /// Name of the backend, for logging.
    fn backend_name(&self) -> &'static str;

    /// Location used when the host does not configure one.
    fn default_location(&self) -> Option<PathBuf>;

    /// Start the runtime from `location`.
    ///
    /// Called at most once successfully per process; the lifecycle manager
    /// guarantees that.
    fn start(&self, location: &Path) -> BridgeResult<()>;

    /// Text prepended to every user script, before the bootstrap preamble,
    /// binding `SCRIPT_PATH` to the script's location.
    fn declare_script_path(&self, script_path: &Path) -> String;

    /// Base definitions (device constructors, property helpers, units) that
    /// are executed ahead of every user script.
    fn bootstrap(&self) -> &'static str;

    /// Execute `source` in a fresh, isolated namespace and return that namespace
    /// as a mapping object.
    fn execute(&self, source: &ScriptSource) -> BridgeResult<Self::Object>;

    /// Look up `key` in a mapping. `Ok(None)` when the key is absent.
    fn get_item(&self, mapping: &Self::Object, key: &str) -> BridgeResult<Option<Self::Object>>;

    /// Read attribute `name` of an object. `Ok(None)` when it has none.
    fn get_attr(&self, object: &Self::Object, name: &str) -> BridgeResult<Option<Self::Object>>;

    /// Set attribute `name` of an object to a string.
    fn set_attr_str(&self, object: &Self::Object, name: &str, value: &str) -> BridgeResult<()>;

    /// Key/value pairs of a mapping, in the runtime's iteration order.
    fn mapping_items(&self, mapping: &Self::Object)
        -> BridgeResult<Vec<(Self::Object, Self::Object)>>;

    /// Elements of a sequence (list, tuple, array), in order.
    fn sequence_items(&self, sequence: &Self::Object) -> BridgeResult<Vec<Self::Object>>;

    /// Plain value of an object.
    fn scalar(&self, object: &Self::Object) -> BridgeResult<Scalar>;

    /// Release a set of handles. The caller holds the execution lock, since
    /// dropping the last reference may run finalizers inside the runtime.
    fn release(&self, objects: Vec<Self::Object>) {
        drop(objects);
    }
}

/// Quote `text` as a double-quoted string literal valid in both Rhai and Python.
pub(crate) fn quote_literal(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_literal_escapes() {
        assert_eq!(quote_literal(r"C:\scripts\a.py"), r#""C:\\scripts\\a.py""#);
        assert_eq!(quote_literal("say \"hi\""), r#""say \"hi\"""#);
    }

    #[test]
    fn test_script_source_line_mapping() {
        let source = ScriptSource::new("a\nb", "c\nd\n", "s.rhai");
        assert_eq!(source.code, "a\nb\nc\nd\n");
        assert_eq!(source.prelude_lines, 2);
        assert_eq!(source.user_line(3), Some(1));
        assert_eq!(source.user_line(2), None);
    }

    #[test]
    fn test_scalar_numeric_widening() {
        assert_eq!(Scalar::Int(3).into_f64("min").unwrap(), 3.0);
        assert!(matches!(
            Scalar::Str("x".into()).into_f64("min"),
            Err(BridgeError::MalformedMetadata(_))
        ));
    }

    #[test]
    fn test_scalar_error_names_field() {
        let err = Scalar::Int(1).into_string("device type").unwrap_err();
        assert!(err.to_string().contains("device type must be a string, found int"));
    }
}
