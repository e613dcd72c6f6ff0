//! Interpreter lifecycle.
//!
//! ```text
//! Uninitialized --start ok-----> Running   (terminal for the process)
//! Uninitialized --start failed--> Failed   (another attempt is allowed)
//! Failed        --start ok-----> Running
//! Running       --other path---> Running   (ConflictingEnvironment, no change)
//! ```
//!
//! The runtime is never stopped: finalizing and re-initializing it is not
//! supported by some native extensions. Switching to another runtime location
//! therefore requires restarting the host process.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::lock::ExecutionLock;
use crate::runtime::ScriptRuntime;

/// Phase of the process-wide interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpreterPhase {
    /// No start has been attempted.
    Uninitialized,
    /// Started; the location is fixed for the process lifetime.
    Running,
    /// The last start attempt failed. A later request may try again.
    Failed,
}

/// Snapshot of the interpreter state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterState {
    /// Current phase.
    pub phase: InterpreterPhase,
    /// Location the runtime was started from, once running.
    pub location: Option<PathBuf>,
}

/// Once-only start-up of the embedded runtime.
#[derive(Debug)]
pub struct InterpreterLifecycle {
    state: Mutex<InterpreterState>,
}

impl Default for InterpreterLifecycle {
    fn default() -> Self {
        Self {
            state: Mutex::new(InterpreterState {
                phase: InterpreterPhase::Uninitialized,
                location: None,
            }),
        }
    }
}

impl InterpreterLifecycle {
    /// Lifecycle in the `Uninitialized` phase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> InterpreterState {
        self.state.lock().clone()
    }

    /// Make sure the runtime is running.
    ///
    /// `requested` is the host-configured location; `None` or an empty path
    /// means "use the running one, or discover a default". Returns the location
    /// the runtime runs from.
    ///
    /// # Errors
    ///
    /// - `RuntimeNotFound` if the runtime cannot be started (state becomes
    ///   `Failed`, a later call may retry).
    /// - `ConflictingEnvironment` if the runtime already runs from a different
    ///   location than `requested`. The state is left unchanged.
    pub fn ensure_started<R: ScriptRuntime>(
        &self,
        runtime: &R,
        lock: &ExecutionLock,
        requested: Option<&Path>,
    ) -> BridgeResult<PathBuf> {
        let requested = requested.filter(|path| !path.as_os_str().is_empty());

        // execution lock before state, the same order as every other caller
        let _guard = lock.acquire();
        let mut state = self.state.lock();

        if state.phase == InterpreterPhase::Running {
            let running = state.location.clone().unwrap_or_default();
            return match requested {
                Some(path) if path != running => {
                    warn!(
                        running = %running.display(),
                        requested = %path.display(),
                        "Refusing to switch script runtime environment"
                    );
                    Err(BridgeError::ConflictingEnvironment {
                        running,
                        requested: path.to_path_buf(),
                    })
                }
                _ => Ok(running),
            };
        }

        let location = match requested {
            Some(path) => path.to_path_buf(),
            None => match runtime.default_location() {
                Some(path) => path,
                None => {
                    state.phase = InterpreterPhase::Failed;
                    return Err(BridgeError::RuntimeNotFound {
                        path: PathBuf::new(),
                        reason: "no default location found, configure one explicitly".to_string(),
                    });
                }
            },
        };

        match runtime.start(&location) {
            Ok(()) => {
                info!(
                    backend = runtime.backend_name(),
                    location = %location.display(),
                    "Script runtime started"
                );
                state.phase = InterpreterPhase::Running;
                state.location = Some(location.clone());
                Ok(location)
            }
            Err(err) => {
                error!(
                    backend = runtime.backend_name(),
                    location = %location.display(),
                    error = %err,
                    "Script runtime failed to start"
                );
                state.phase = InterpreterPhase::Failed;
                Err(err)
            }
        }
    }
}
