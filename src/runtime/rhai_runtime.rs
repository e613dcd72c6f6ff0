//! Rhai implementation of [`ScriptRuntime`].
//!
//! Device scripts are plain Rhai. Devices are object maps built with the helpers
//! from the bootstrap preamble (`camera()`, `time_property(...)`, ...), and the
//! script publishes them through a top-level `devices` map.
//!
//! Every value handed out is a *shared* `Dynamic`, so clones of a [`RhaiObject`]
//! refer to the same map and writes such as the `_MM_id` back-reference are seen
//! by every holder. Nested values read through [`ScriptRuntime::get_attr`] are
//! detached copies.
//!
//! The "runtime path" of this backend is the directory used to resolve `import`
//! statements. It must exist when the runtime is started.

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use rhai::module_resolvers::FileModuleResolver;
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map, Scope};
use tracing::{debug, info};

use super::{quote_literal, Scalar, ScriptRuntime, ScriptSource};
use crate::error::{BridgeError, BridgeResult};

const BOOTSTRAP: &str = include_str!("../bootstrap/bootstrap.rhai");

/// Shared reference to a Rhai value.
#[derive(Debug, Clone)]
pub struct RhaiObject(Dynamic);

impl RhaiObject {
    /// Wrap a value, converting it to a shared value if it is not one already.
    pub fn new(value: Dynamic) -> Self {
        if value.is_shared() {
            Self(value)
        } else {
            Self(value.into_shared())
        }
    }

    /// Snapshot of the underlying value.
    pub fn value(&self) -> Dynamic {
        self.0.flatten_clone()
    }

    fn type_name(&self) -> String {
        self.value().type_name().to_string()
    }
}

/// Embedded Rhai engine, created on [`ScriptRuntime::start`].
pub struct RhaiRuntime {
    engine: OnceCell<Engine>,
    max_operations: Option<u64>,
}

impl RhaiRuntime {
    /// Create a runtime without an operation limit.
    pub fn new() -> Self {
        Self {
            engine: OnceCell::new(),
            max_operations: None,
        }
    }

    /// Create a runtime that aborts scripts after `max_operations` operations.
    pub fn with_limit(max_operations: u64) -> Self {
        Self {
            engine: OnceCell::new(),
            max_operations: Some(max_operations),
        }
    }

    fn engine(&self) -> BridgeResult<&Engine> {
        self.engine
            .get()
            .ok_or_else(|| BridgeError::RuntimeNotFound {
                path: PathBuf::new(),
                reason: "the Rhai runtime has not been started".to_string(),
            })
    }

    fn build_engine(&self, module_dir: &Path) -> Engine {
        let mut engine = Engine::new();
        engine.set_module_resolver(FileModuleResolver::new_with_path(module_dir));

        engine.on_print(|text| info!(target: "scriptdev::script", "{}", text));
        engine.on_debug(|text, source, position| {
            debug!(target: "scriptdev::script", ?source, %position, "{}", text)
        });

        if let Some(max) = self.max_operations {
            engine.on_progress(move |count| {
                if count > max {
                    Some(format!("Safety limit exceeded: maximum {} operations", max).into())
                } else {
                    None
                }
            });
        }
        engine
    }

    fn map_error(source: &ScriptSource, mut err: Box<EvalAltResult>) -> BridgeError {
        let position = err.take_position();
        let origin = source.origin.display();
        let message = match position.line().and_then(|line| source.user_line(line)) {
            Some(line) => format!("{}:{}: {}", origin, line, err),
            None => format!("{}: {}", origin, err),
        };
        BridgeError::RuntimeException(message)
    }
}

impl Default for RhaiRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptRuntime for RhaiRuntime {
    type Object = RhaiObject;

    fn backend_name(&self) -> &'static str {
        "rhai"
    }

    fn default_location(&self) -> Option<PathBuf> {
        std::env::current_dir().ok()
    }

    fn start(&self, location: &Path) -> BridgeResult<()> {
        if !location.is_dir() {
            return Err(BridgeError::RuntimeNotFound {
                path: location.to_path_buf(),
                reason: "module directory does not exist".to_string(),
            });
        }
        if self.engine.set(self.build_engine(location)).is_err() {
            debug!("Rhai engine already started");
        }
        Ok(())
    }

    fn declare_script_path(&self, script_path: &Path) -> String {
        format!(
            "const SCRIPT_PATH = {};\n",
            quote_literal(&script_path.to_string_lossy())
        )
    }

    fn bootstrap(&self) -> &'static str {
        BOOTSTRAP
    }

    fn execute(&self, source: &ScriptSource) -> BridgeResult<RhaiObject> {
        let engine = self.engine()?;
        let mut scope = Scope::new();
        engine
            .run_with_scope(&mut scope, &source.code)
            .map_err(|err| Self::map_error(source, err))?;

        // later declarations shadow earlier ones with the same name
        let mut namespace = Map::new();
        for (name, _is_constant, value) in scope.iter_raw() {
            namespace.insert(name.into(), value.clone());
        }
        Ok(RhaiObject::new(Dynamic::from_map(namespace)))
    }

    fn get_item(&self, mapping: &RhaiObject, key: &str) -> BridgeResult<Option<RhaiObject>> {
        match mapping.0.read_lock::<Map>() {
            Some(map) => Ok(map.get(key).cloned().map(RhaiObject::new)),
            None => Err(BridgeError::metadata(format!(
                "expected an object map when looking up '{}', found {}",
                key,
                mapping.type_name()
            ))),
        }
    }

    fn get_attr(&self, object: &RhaiObject, name: &str) -> BridgeResult<Option<RhaiObject>> {
        // non-map values simply have no attributes
        Ok(object
            .0
            .read_lock::<Map>()
            .and_then(|map| map.get(name).cloned())
            .map(RhaiObject::new))
    }

    fn set_attr_str(&self, object: &RhaiObject, name: &str, value: &str) -> BridgeResult<()> {
        // a clone of a shared value points at the same storage
        let mut shared = object.0.clone();
        let written = match shared.write_lock::<Map>() {
            Some(mut map) => {
                map.insert(name.into(), Dynamic::from(value.to_string()));
                true
            }
            None => false,
        };
        if written {
            Ok(())
        } else {
            Err(BridgeError::metadata(format!(
                "cannot set '{}' on a value of type {}",
                name,
                object.type_name()
            )))
        }
    }

    fn mapping_items(&self, mapping: &RhaiObject) -> BridgeResult<Vec<(RhaiObject, RhaiObject)>> {
        match mapping.0.read_lock::<Map>() {
            Some(map) => Ok(map
                .iter()
                .map(|(key, value)| {
                    (
                        RhaiObject::new(Dynamic::from(key.to_string())),
                        RhaiObject::new(value.clone()),
                    )
                })
                .collect()),
            None => Err(BridgeError::metadata(format!(
                "expected an object map, found {}",
                mapping.type_name()
            ))),
        }
    }

    fn sequence_items(&self, sequence: &RhaiObject) -> BridgeResult<Vec<RhaiObject>> {
        match sequence.0.read_lock::<Array>() {
            Some(items) => Ok(items.iter().cloned().map(RhaiObject::new).collect()),
            None => Err(BridgeError::metadata(format!(
                "expected an array, found {}",
                sequence.type_name()
            ))),
        }
    }

    fn scalar(&self, object: &RhaiObject) -> BridgeResult<Scalar> {
        let value = object.value();
        if value.is_unit() {
            return Ok(Scalar::None);
        }
        if let Ok(b) = value.as_bool() {
            return Ok(Scalar::Bool(b));
        }
        if let Ok(i) = value.as_int() {
            return Ok(Scalar::Int(i));
        }
        if let Ok(f) = value.as_float() {
            return Ok(Scalar::Float(f));
        }
        if value.is_string() {
            let type_name = value.type_name().to_string();
            return value.into_string().map(Scalar::Str).map_err(|_| {
                BridgeError::metadata(format!("unreadable string value of type {}", type_name))
            });
        }
        Ok(Scalar::Other(value.type_name().to_string()))
    }
}
