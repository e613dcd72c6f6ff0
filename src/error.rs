//! Error types for the script device bridge.
//!
//! This module defines `BridgeError`, the single error type surfaced to the host
//! framework. Every failure detected while talking to the embedded runtime is
//! converted into one of these variants at the point of detection, so no raw
//! runtime error ever reaches the host untranslated.
//!
//! ## Error Kinds
//!
//! - **`RuntimeNotFound`**: the embedded runtime could not be started from the
//!   configured (or discovered) location.
//! - **`ConflictingEnvironment`**: a runtime is already running from a different
//!   location. The runtime cannot be restarted in-process, so this is fatal for
//!   the request; the remedy is restarting the host with a corrected configuration.
//! - **`RuntimeException`**: a script raised an error. Carries the runtime's own
//!   error text, including traceback or source position where available.
//! - **`MalformedId`**: a composite device id could not be decoded.
//! - **`MalformedMetadata`**: the script namespace or a device object does not
//!   have the shape the bridge expects.
//!
//! Absence of a device during registry lookup is *not* an error; lookups return
//! `Ok(None)` so that callers can defer cross-device references.
//!
//! Each variant maps onto a stable numeric code through [`BridgeError::code`],
//! which is what the host's error-reporting channel consumes.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias for results using the bridge error type.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// First error code reserved for the bridge. Host codes below this are generic.
pub const ERR_BASE: i32 = 101;
/// The runtime could not be started.
pub const ERR_RUNTIME_NOT_FOUND: i32 = ERR_BASE;
/// A script raised an exception.
pub const ERR_RUNTIME_EXCEPTION: i32 = ERR_BASE + 1;
/// A different runtime environment is already running.
pub const ERR_CONFLICTING_ENVIRONMENT: i32 = ERR_BASE + 2;
/// The script or a device object is missing required metadata.
pub const ERR_MALFORMED_METADATA: i32 = ERR_BASE + 3;
/// A composite device id could not be decoded.
pub const ERR_MALFORMED_ID: i32 = ERR_BASE + 4;
/// The script file does not exist.
pub const ERR_SCRIPT_NOT_FOUND: i32 = ERR_BASE + 5;
/// A device id does not resolve to a loaded device.
pub const ERR_DEVICE_NOT_FOUND: i32 = ERR_BASE + 6;
/// A pre-initialization setting was changed after initialization.
pub const ERR_CONFIGURATION_LOCKED: i32 = ERR_BASE + 7;

/// Errors reported to the host.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// The runtime could not be started.
    #[error("Could not start the script runtime from '{}', perhaps an incorrect path was specified?", path.display())]
    RuntimeNotFound {
        /// Location the start was attempted from.
        path: PathBuf,
        /// What the runtime reported.
        reason: String,
    },

    /// A runtime is already running from another location.
    #[error(
        "A script runtime from '{}' is already running, '{}' was requested. \
         The runtime cannot be restarted in-process; restart the host with a \
         corrected runtime path, or leave the path blank.",
        running.display(),
        requested.display()
    )]
    ConflictingEnvironment {
        /// Location of the running runtime.
        running: PathBuf,
        /// Location that was asked for.
        requested: PathBuf,
    },

    /// A script raised an error; the text carries its position.
    #[error("Script error: {0}")]
    RuntimeException(String),

    /// Text that is not of the form `Type[Name@Hub]`.
    #[error("Malformed device id '{0}', expected Type[Name@Hub]")]
    MalformedId(String),

    /// A namespace or device object has the wrong shape.
    #[error("Malformed device metadata: {0}")]
    MalformedMetadata(String),

    /// No script file at the configured path.
    #[error("Script file not found: {}", .0.display())]
    ScriptNotFound(PathBuf),

    /// The id names no device of a loaded script.
    #[error("Device '{0}' is not provided by any loaded script")]
    DeviceNotFound(String),

    /// A setting was changed after initialization.
    #[error("Setting '{0}' cannot be changed after initialization")]
    ConfigurationLocked(&'static str),
}

impl BridgeError {
    /// Host error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            BridgeError::RuntimeNotFound { .. } => ERR_RUNTIME_NOT_FOUND,
            BridgeError::ConflictingEnvironment { .. } => ERR_CONFLICTING_ENVIRONMENT,
            BridgeError::RuntimeException(_) => ERR_RUNTIME_EXCEPTION,
            BridgeError::MalformedId(_) => ERR_MALFORMED_ID,
            BridgeError::MalformedMetadata(_) => ERR_MALFORMED_METADATA,
            BridgeError::ScriptNotFound(_) => ERR_SCRIPT_NOT_FOUND,
            BridgeError::DeviceNotFound(_) => ERR_DEVICE_NOT_FOUND,
            BridgeError::ConfigurationLocked(_) => ERR_CONFIGURATION_LOCKED,
        }
    }

    /// Shorthand for a metadata error.
    pub(crate) fn metadata(message: impl Into<String>) -> Self {
        BridgeError::MalformedMetadata(message.into())
    }
}
