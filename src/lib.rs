//! Scripted devices for a strongly typed hardware-control host.
//!
//! Device behavior lives in scripts run by an embedded runtime; this crate
//! presents the scripted objects to the host as typed devices with typed,
//! bounded properties.
//!
//! ```text
//! ScriptHub::initialize
//!     ├── lifecycle: start the one process-wide runtime
//!     ├── loader:    run the script, harvest `devices`, mint Type[Name@Hub] ids
//!     └── registry:  index the hub by id
//! ScriptDevice::initialize
//!     ├── registry:   resolve the composite id
//!     └── reflection: typed property descriptors
//! ```
//!
//! Every step that touches the runtime holds the context's reentrant
//! [`ExecutionLock`](lock::ExecutionLock).
//!
//! The Rhai backend is always available. Enable the `python` feature to run
//! device scripts with an embedded CPython interpreter instead; the process-wide
//! [`context::global`] context then uses Python.

pub mod adapter;
pub mod config;
pub mod context;
pub mod error;
pub mod hub;
pub mod id;
pub mod lifecycle;
pub mod loader;
pub mod lock;
pub mod logging;
pub mod reflection;
pub mod registry;
pub mod runtime;

pub use adapter::{ScriptDevice, ScriptHub};
pub use config::BridgeConfig;
pub use context::BridgeContext;
pub use error::{BridgeError, BridgeResult};
pub use id::DeviceId;
pub use reflection::{HostPropertyType, PropertyDescriptor, PropertyKind};
pub use runtime::{DefaultRuntime, ScriptRuntime};
