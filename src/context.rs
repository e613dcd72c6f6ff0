//! The process-wide bridge context.
//!
//! The embedded runtime can exist only once per process and cannot be restarted,
//! so everything tied to it lives in one explicit object: the runtime itself, the
//! execution lock, the interpreter state, the hub registry and the quantity units
//! harvested from scripts. Components receive the context as a parameter; tests
//! build their own context over a fresh runtime instead of touching [`global`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::BridgeResult;
use crate::hub::Hub;
use crate::lifecycle::{InterpreterLifecycle, InterpreterState};
use crate::lock::{ExecutionGuard, ExecutionLock};
use crate::registry::DeviceRegistry;
use crate::runtime::{DefaultRuntime, ScriptRuntime};

/// Scale references for quantity-typed properties.
#[derive(Debug, Clone)]
pub struct QuantityUnits<O> {
    /// Unit for time properties (milliseconds).
    pub ms: O,
    /// Unit for length properties (micrometers).
    pub um: O,
}

/// Runtime, lock and shared state for one embedded runtime.
pub struct BridgeContext<R: ScriptRuntime> {
    runtime: R,
    lock: ExecutionLock,
    interpreter: InterpreterLifecycle,
    registry: DeviceRegistry<R::Object>,
    units: RwLock<Option<QuantityUnits<R::Object>>>,
}

impl<R: ScriptRuntime> BridgeContext<R> {
    /// Create a context around a runtime that has not been started yet.
    pub fn new(runtime: R) -> Self {
        Self {
            runtime,
            lock: ExecutionLock::new(),
            interpreter: InterpreterLifecycle::new(),
            registry: DeviceRegistry::new(),
            units: RwLock::new(None),
        }
    }

    /// The embedded runtime.
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// The execution-context lock.
    pub fn lock(&self) -> &ExecutionLock {
        &self.lock
    }

    /// Take the execution context for the current scope.
    pub fn acquire(&self) -> ExecutionGuard<'_> {
        self.lock.acquire()
    }

    /// Hub registry.
    pub fn registry(&self) -> &DeviceRegistry<R::Object> {
        &self.registry
    }

    /// Start the runtime if needed; see [`InterpreterLifecycle::ensure_started`].
    pub fn initialize_interpreter(&self, requested: Option<&Path>) -> BridgeResult<PathBuf> {
        self.interpreter
            .ensure_started(&self.runtime, &self.lock, requested)
    }

    /// Snapshot of the interpreter state.
    pub fn interpreter_state(&self) -> InterpreterState {
        self.interpreter.state()
    }

    /// Quantity units from the most recently loaded script.
    pub fn units(&self) -> Option<QuantityUnits<R::Object>> {
        self.units.read().clone()
    }

    pub(crate) fn set_units(&self, units: QuantityUnits<R::Object>) {
        *self.units.write() = Some(units);
    }

    /// Release `hub`'s devices and drop its registry entry.
    ///
    /// The entry for the hub's id is removed even if it was overwritten by a
    /// later hub with the same id.
    pub fn unregister_hub(&self, hub: &Hub<R::Object>) {
        let _guard = self.acquire();
        let devices = hub.take_devices();
        debug!(hub = hub.id(), released = devices.len(), "Releasing hub devices");
        self.runtime.release(devices);
        self.registry.remove(hub.id());
    }

    /// Unregister the hub currently registered as `hub_id`. Returns whether one
    /// was found.
    pub fn unregister(&self, hub_id: &str) -> bool {
        let _guard = self.acquire();
        match self.registry.hub(hub_id) {
            Some(hub) => {
                self.unregister_hub(&hub);
                true
            }
            None => {
                self.registry.remove(hub_id);
                false
            }
        }
    }

    /// Release handles that were handed out to a device adapter.
    pub fn release(&self, objects: Vec<R::Object>) {
        let _guard = self.acquire();
        self.runtime.release(objects);
    }
}

static GLOBAL: Lazy<Arc<BridgeContext<DefaultRuntime>>> =
    Lazy::new(|| Arc::new(BridgeContext::new(DefaultRuntime::default())));

/// The process-wide context over the default runtime backend.
///
/// Created on first use and never torn down.
pub fn global() -> Arc<BridgeContext<DefaultRuntime>> {
    GLOBAL.clone()
}
