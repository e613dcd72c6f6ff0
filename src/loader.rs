//! Script loading and device harvesting.
//!
//! A device script is executed once, in a fresh namespace, behind a generated
//! prelude:
//!
//! ```text
//! SCRIPT_PATH declaration   (backend specific)
//! bootstrap preamble        (device constructors, property helpers, units)
//! user script
//! ```
//!
//! Afterwards the namespace must contain
//! - `devices`: mapping of device name to device object,
//! - `unit_ms`, `unit_um`: the quantity units used by time and length properties.
//!
//! Each device object must carry `_MM_dtype` (its host device type). The loader
//! writes the composite id back onto the object as `_MM_id`.

use std::io::ErrorKind;
use std::sync::Arc;

use tracing::{debug, info};

use crate::context::{BridgeContext, QuantityUnits};
use crate::error::{BridgeError, BridgeResult};
use crate::hub::{DeviceHandle, Hub};
use crate::id::DeviceId;
use crate::lifecycle::InterpreterPhase;
use crate::runtime::{ScriptRuntime, ScriptSource};

/// Attribute holding a device object's host device type.
pub const DEVICE_TYPE_ATTR: &str = "_MM_dtype";
/// Attribute the loader writes each device's composite id to.
pub const DEVICE_ID_ATTR: &str = "_MM_id";
/// Namespace entry listing the script's devices.
pub const DEVICES_KEY: &str = "devices";

/// Devices and units read out of an executed script namespace.
#[derive(Debug)]
pub struct Harvest<O> {
    /// Device objects with their composite ids, in mapping order.
    pub devices: Vec<DeviceHandle<O>>,
    /// Units defined by the script's namespace.
    pub units: QuantityUnits<O>,
}

/// Execute `hub`'s script and register its devices.
///
/// Loading a hub that is already initialized does nothing; a script runs at
/// most once per hub. On success the hub is initialized, registered in the
/// context's registry and the context's quantity units are replaced by the ones
/// this script defined.
///
/// # Errors
///
/// - `RuntimeNotFound` if the interpreter has not been started.
/// - `ScriptNotFound` if the script file does not exist.
/// - `RuntimeException` if the script fails.
/// - `MalformedMetadata` if the namespace or a device object has the wrong shape.
pub fn load<R: ScriptRuntime>(
    ctx: &BridgeContext<R>,
    hub: &Arc<Hub<R::Object>>,
) -> BridgeResult<()> {
    let _guard = ctx.acquire();
    if hub.is_initialized() {
        debug!(hub = hub.id(), "Hub already loaded");
        return Ok(());
    }

    let state = ctx.interpreter_state();
    if state.phase != InterpreterPhase::Running {
        return Err(BridgeError::RuntimeNotFound {
            path: state.location.unwrap_or_default(),
            reason: format!(
                "cannot load {}: the script runtime is not running",
                hub.script_path().display()
            ),
        });
    }

    let path = hub.script_path();
    let user_code = std::fs::read_to_string(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => BridgeError::ScriptNotFound(path.to_path_buf()),
        _ => BridgeError::RuntimeException(format!("{}: {}", path.display(), err)),
    })?;

    let runtime = ctx.runtime();
    let mut prelude = runtime.declare_script_path(path);
    prelude.push_str(runtime.bootstrap());
    let source = ScriptSource::new(&prelude, &user_code, path);

    debug!(hub = hub.id(), script = %path.display(), "Executing device script");
    let namespace = runtime.execute(&source)?;
    let harvest = harvest(ctx, &namespace, hub.id())?;

    let count = harvest.devices.len();
    ctx.set_units(harvest.units);
    hub.install(harvest.devices);
    ctx.registry().register(hub);
    info!(hub = hub.id(), devices = count, "Loaded device script");
    Ok(())
}

/// Read devices and quantity units out of an executed namespace.
///
/// Every device object gets its composite id (built with `hub_id`) written
/// back as `_MM_id`.
pub fn harvest<R: ScriptRuntime>(
    ctx: &BridgeContext<R>,
    namespace: &R::Object,
    hub_id: &str,
) -> BridgeResult<Harvest<R::Object>> {
    let _guard = ctx.acquire();
    let runtime = ctx.runtime();

    let devices = runtime
        .get_item(namespace, DEVICES_KEY)?
        .ok_or_else(|| BridgeError::metadata("script does not define `devices`"))?;

    let mut handles = Vec::new();
    for (key, object) in runtime.mapping_items(&devices)? {
        let name = runtime.scalar(&key)?.into_string("device name")?;
        if name.contains('@') {
            return Err(BridgeError::metadata(format!(
                "device name '{}' cannot contain '@'",
                name
            )));
        }

        let device_type = runtime
            .get_attr(&object, DEVICE_TYPE_ATTR)?
            .ok_or_else(|| {
                BridgeError::metadata(format!("device '{}' has no {}", name, DEVICE_TYPE_ATTR))
            })?;
        let device_type = runtime
            .scalar(&device_type)?
            .into_string(&format!("{} of device '{}'", DEVICE_TYPE_ATTR, name))?;
        if device_type.contains('[') {
            return Err(BridgeError::metadata(format!(
                "device type '{}' cannot contain '['",
                device_type
            )));
        }

        let id = DeviceId::new(device_type, hub_id, name);
        runtime.set_attr_str(&object, DEVICE_ID_ATTR, &id.encode())?;
        debug!(device = %id, "Harvested device");
        handles.push(DeviceHandle::new(id, object));
    }

    let unit = |key: &str| -> BridgeResult<R::Object> {
        runtime
            .get_item(namespace, key)?
            .ok_or_else(|| BridgeError::metadata(format!("script namespace has no `{}`", key)))
    };
    let units = QuantityUnits {
        ms: unit("unit_ms")?,
        um: unit("unit_um")?,
    };

    Ok(Harvest {
        devices: handles,
        units,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{RhaiRuntime, Scalar};
    use std::path::Path;
    use tempfile::TempDir;

    fn context(dir: &Path) -> BridgeContext<RhaiRuntime> {
        let ctx = BridgeContext::new(RhaiRuntime::new());
        ctx.initialize_interpreter(Some(dir)).unwrap();
        ctx
    }

    fn write(dir: &TempDir, name: &str, code: &str) -> Arc<Hub<crate::runtime::RhaiObject>> {
        let path = dir.path().join(name);
        std::fs::write(&path, code).unwrap();
        Arc::new(Hub::new(path))
    }

    #[test]
    fn test_load_harvests_devices() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let hub = write(
            &dir,
            "myscript.py",
            "let devices = #{ cam1: camera(), z: stage() };",
        );

        load(&ctx, &hub).unwrap();
        assert!(hub.is_initialized());
        let handle = ctx
            .registry()
            .lookup("Camera[cam1@myscript.py]")
            .unwrap()
            .unwrap();
        let written = ctx
            .runtime()
            .get_attr(handle.object(), DEVICE_ID_ATTR)
            .unwrap()
            .unwrap();
        assert_eq!(
            ctx.runtime().scalar(&written).unwrap(),
            Scalar::Str("Camera[cam1@myscript.py]".into())
        );
        assert!(ctx.registry().lookup("Stage[z@myscript.py]").unwrap().is_some());
        assert!(ctx.units().is_some());
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_load_logs_device_count() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let hub = write(&dir, "logged.rhai", "let devices = #{ a: generic(), b: slm() };");
        load(&ctx, &hub).unwrap();
        assert!(logs_contain("Loaded device script"));
        assert!(logs_contain("SLM[b@logged.rhai]"));
    }

    #[test]
    fn test_script_path_is_declared() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let hub = write(
            &dir,
            "named.rhai",
            "let dev = generic(); dev[\"origin\"] = SCRIPT_PATH; let devices = #{ dev: dev };",
        );
        load(&ctx, &hub).unwrap();

        let handle = hub.device("Device[dev@named.rhai]").unwrap();
        let origin = ctx.runtime().get_attr(handle.object(), "origin").unwrap().unwrap();
        assert_eq!(
            ctx.runtime().scalar(&origin).unwrap(),
            Scalar::Str(hub.script_path().to_string_lossy().into_owned())
        );
    }

    #[test]
    fn test_load_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let hub = write(&dir, "once.rhai", "let devices = #{ a: generic() };");
        load(&ctx, &hub).unwrap();

        // a second run would fail, so success shows the script did not execute again
        std::fs::write(hub.script_path(), "throw \"executed twice\";").unwrap();
        load(&ctx, &hub).unwrap();
        assert_eq!(hub.device_count(), 1);
    }

    #[test]
    fn test_missing_script() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let hub = Arc::new(Hub::new(dir.path().join("absent.rhai")));
        assert!(matches!(
            load(&ctx, &hub),
            Err(BridgeError::ScriptNotFound(_))
        ));
        assert!(!hub.is_initialized());
    }

    #[test]
    fn test_script_error_is_translated() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let hub = write(&dir, "bad.rhai", "let x = 1;\nlet y = x / 0;\n");
        match load(&ctx, &hub) {
            Err(BridgeError::RuntimeException(message)) => {
                assert!(message.contains("bad.rhai:2:"), "{message}")
            }
            other => panic!("expected RuntimeException, got {other:?}"),
        }
        assert!(ctx.registry().hub("bad.rhai").is_none());
    }

    #[test]
    fn test_load_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = BridgeContext::new(RhaiRuntime::new());
        let hub = write(&dir, "early.rhai", "let devices = #{ a: generic() };");
        assert!(matches!(
            load(&ctx, &hub),
            Err(BridgeError::RuntimeNotFound { .. })
        ));
        assert!(!hub.is_initialized());
        assert!(ctx.registry().hub("early.rhai").is_none());

        // a failed start is no better
        assert!(ctx
            .initialize_interpreter(Some(dir.path().join("missing").as_path()))
            .is_err());
        assert!(matches!(
            load(&ctx, &hub),
            Err(BridgeError::RuntimeNotFound { .. })
        ));

        ctx.initialize_interpreter(Some(dir.path())).unwrap();
        load(&ctx, &hub).unwrap();
        assert!(hub.is_initialized());
    }

    #[test]
    fn test_missing_devices_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let hub = write(&dir, "empty.rhai", "let x = 1;");
        assert!(matches!(
            load(&ctx, &hub),
            Err(BridgeError::MalformedMetadata(_))
        ));
    }

    #[test]
    fn test_device_without_type_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let hub = write(&dir, "untyped.rhai", "let devices = #{ x: #{ a: 1 } };");
        let err = load(&ctx, &hub).unwrap_err();
        assert!(err.to_string().contains("_MM_dtype"), "{err}");
    }

    #[test]
    fn test_devices_must_be_a_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let hub = write(&dir, "list.rhai", "let devices = [camera()];");
        assert!(matches!(
            load(&ctx, &hub),
            Err(BridgeError::MalformedMetadata(_))
        ));
    }

    #[test]
    fn test_missing_units_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        // no bootstrap prelude, so the units are never defined
        let bare = ctx
            .runtime()
            .execute(&ScriptSource::new("", "let devices = #{};", "bare.rhai"))
            .unwrap();
        let err = harvest(&ctx, &bare, "bare.rhai").unwrap_err();
        assert!(err.to_string().contains("unit_ms"), "{err}");
    }
}
