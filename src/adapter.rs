//! Host-facing device adapters.
//!
//! [`ScriptHub`] is what the host instantiates for a device script: it carries
//! the two pre-initialization settings, starts the runtime, loads the script
//! and reports the devices the script provides. Each reported device is bound
//! through a [`ScriptDevice`], which resolves its composite id and describes its
//! properties.
//!
//! ```no_run
//! use scriptdev::adapter::ScriptHub;
//! use scriptdev::context;
//!
//! # fn main() -> scriptdev::BridgeResult<()> {
//! let mut hub = ScriptHub::new(context::global());
//! hub.set_script_path("demos/microscope.rhai")?;
//! hub.initialize()?;
//! for mut device in hub.detect_installed_devices()? {
//!     device.initialize()?;
//!     for property in device.properties() {
//!         println!("{} {}", device.id(), property.name);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::BridgeConfig;
use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};
use crate::hub::{DeviceHandle, Hub};
use crate::id::DeviceId;
use crate::loader;
use crate::reflection::{self, PropertyDescriptor, PropertyKind};
use crate::runtime::ScriptRuntime;

/// Host adapter for one device script.
pub struct ScriptHub<R: ScriptRuntime> {
    ctx: Arc<BridgeContext<R>>,
    script_path: Option<PathBuf>,
    runtime_path: Option<PathBuf>,
    hub: Option<Arc<Hub<R::Object>>>,
}

impl<R: ScriptRuntime> ScriptHub<R> {
    /// Create an unconfigured hub adapter.
    pub fn new(ctx: Arc<BridgeContext<R>>) -> Self {
        Self {
            ctx,
            script_path: None,
            runtime_path: None,
            hub: None,
        }
    }

    /// Create a hub adapter with the paths from `config`.
    pub fn from_config(ctx: Arc<BridgeContext<R>>, config: &BridgeConfig) -> Self {
        Self {
            ctx,
            script_path: config.script_path.clone(),
            runtime_path: config.runtime_path.clone(),
            hub: None,
        }
    }

    /// Path of the device script.
    pub fn script_path(&self) -> Option<&Path> {
        self.script_path.as_deref()
    }

    /// Runtime location. After initialization this is the location the runtime
    /// actually runs from.
    pub fn runtime_path(&self) -> Option<&Path> {
        self.runtime_path.as_deref()
    }

    /// Set the device script. Only allowed before initialization.
    pub fn set_script_path(&mut self, path: impl Into<PathBuf>) -> BridgeResult<()> {
        self.ensure_unlocked("script path")?;
        self.script_path = Some(path.into());
        Ok(())
    }

    /// Set the runtime location. Only allowed before initialization; an empty
    /// path selects the running or default runtime.
    pub fn set_runtime_path(&mut self, path: impl Into<PathBuf>) -> BridgeResult<()> {
        self.ensure_unlocked("runtime path")?;
        let path = path.into();
        self.runtime_path = (!path.as_os_str().is_empty()).then_some(path);
        Ok(())
    }

    fn ensure_unlocked(&self, setting: &'static str) -> BridgeResult<()> {
        if self.is_initialized() {
            Err(BridgeError::ConfigurationLocked(setting))
        } else {
            Ok(())
        }
    }

    /// Whether the script has been loaded.
    pub fn is_initialized(&self) -> bool {
        self.hub.is_some()
    }

    /// Hub id (script file name), once initialized.
    pub fn id(&self) -> Option<&str> {
        self.hub.as_deref().map(Hub::id)
    }

    /// Start the runtime and load the script. Does nothing when already
    /// initialized.
    pub fn initialize(&mut self) -> BridgeResult<()> {
        if self.hub.is_some() {
            return Ok(());
        }
        let script_path = self
            .script_path
            .clone()
            .ok_or_else(|| BridgeError::ScriptNotFound(PathBuf::new()))?;

        let location = self
            .ctx
            .initialize_interpreter(self.runtime_path.as_deref())?;
        self.runtime_path = Some(location);

        let hub = Arc::new(Hub::new(script_path));
        loader::load(&self.ctx, &hub)?;
        info!(
            hub = hub.id(),
            devices = hub.device_count(),
            "Script hub initialized"
        );
        self.hub = Some(hub);
        Ok(())
    }

    /// Release the script's devices and unregister the hub.
    pub fn shutdown(&mut self) {
        if let Some(hub) = self.hub.take() {
            self.ctx.unregister_hub(&hub);
            info!(hub = hub.id(), "Script hub shut down");
        }
    }

    /// One unbound device adapter for every device the script provides.
    pub fn detect_installed_devices(&self) -> BridgeResult<Vec<ScriptDevice<R>>> {
        let hub = self.hub.as_ref().ok_or_else(|| {
            BridgeError::DeviceNotFound("no devices before the hub is initialized".to_string())
        })?;
        Ok(hub
            .device_ids()
            .into_iter()
            .map(|id| ScriptDevice::from_id(self.ctx.clone(), id))
            .collect())
    }
}

impl<R: ScriptRuntime> Drop for ScriptHub<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Host adapter for one scripted device.
pub struct ScriptDevice<R: ScriptRuntime> {
    ctx: Arc<BridgeContext<R>>,
    id: DeviceId,
    handle: Option<DeviceHandle<R::Object>>,
    properties: Vec<PropertyDescriptor<R::Object>>,
}

impl<R: ScriptRuntime> ScriptDevice<R> {
    /// Device adapter for the composite id `id`.
    pub fn new(ctx: Arc<BridgeContext<R>>, id: &str) -> BridgeResult<Self> {
        Ok(Self::from_id(ctx, DeviceId::decode(id)?))
    }

    fn from_id(ctx: Arc<BridgeContext<R>>, id: DeviceId) -> Self {
        Self {
            ctx,
            id,
            handle: None,
            properties: Vec::new(),
        }
    }

    /// Composite id of the device.
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Whether the device is bound to its scripted object.
    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    /// Bind to the scripted object and describe its properties.
    ///
    /// # Errors
    ///
    /// `DeviceNotFound` if no loaded script provides the device.
    pub fn initialize(&mut self) -> BridgeResult<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        let encoded = self.id.encode();
        let handle = self
            .ctx
            .registry()
            .lookup(&encoded)?
            .ok_or(BridgeError::DeviceNotFound(encoded))?;
        self.properties = reflection::enumerate_properties(&self.ctx, &handle)?;
        debug!(
            device = %self.id,
            properties = self.properties.len(),
            "Bound scripted device"
        );
        self.handle = Some(handle);
        Ok(())
    }

    /// Property descriptors, empty until initialized.
    pub fn properties(&self) -> &[PropertyDescriptor<R::Object>] {
        &self.properties
    }

    /// The scripted object, once initialized.
    pub fn object(&self) -> Option<&R::Object> {
        self.handle.as_ref().map(DeviceHandle::object)
    }

    /// Drop every runtime reference held by this adapter.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let mut objects = vec![handle.into_object()];
        for property in self.properties.drain(..) {
            match property.kind {
                PropertyKind::Time { unit } | PropertyKind::Length { unit } => objects.push(unit),
                PropertyKind::Enum { values, .. } => objects.extend(values),
                _ => {}
            }
        }
        self.ctx.release(objects);
    }
}

impl<R: ScriptRuntime> Drop for ScriptDevice<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
