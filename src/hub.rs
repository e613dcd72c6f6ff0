//! Hubs: one loaded script and the devices it exposes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::id::DeviceId;

/// Reference to one scripted device object.
///
/// The copy stored in a [`Hub`] is the owning one; copies handed out by lookups
/// are borrowed references that must not outlive the hub's registration.
#[derive(Debug, Clone)]
pub struct DeviceHandle<O> {
    id: DeviceId,
    object: O,
}

impl<O> DeviceHandle<O> {
    pub(crate) fn new(id: DeviceId, object: O) -> Self {
        Self { id, object }
    }

    /// Composite id of the device.
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// The scripted object.
    pub fn object(&self) -> &O {
        &self.object
    }

    pub(crate) fn into_object(self) -> O {
        self.object
    }
}

#[derive(Debug)]
struct HubState<O> {
    initialized: bool,
    devices: BTreeMap<String, DeviceHandle<O>>,
}

/// One device script.
///
/// The hub id is the script's file name, so two scripts with the same file
/// name in different directories share an id.
#[derive(Debug)]
pub struct Hub<O> {
    id: String,
    script_path: PathBuf,
    state: Mutex<HubState<O>>,
}

impl<O: Clone> Hub<O> {
    /// Create an empty, uninitialized hub for `script_path`.
    pub fn new(script_path: impl Into<PathBuf>) -> Self {
        let script_path = script_path.into();
        let id = hub_id_for(&script_path);
        Self {
            id,
            script_path,
            state: Mutex::new(HubState {
                initialized: false,
                devices: BTreeMap::new(),
            }),
        }
    }

    /// Hub id (script file name).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Path of the script file.
    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    /// Whether the script has been executed and its devices harvested.
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Device registered under the encoded composite id `id`.
    pub fn device(&self, id: &str) -> Option<DeviceHandle<O>> {
        self.state.lock().devices.get(id).cloned()
    }

    /// Ids of all devices, ordered by their text form.
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.state
            .lock()
            .devices
            .values()
            .map(|handle| handle.id().clone())
            .collect()
    }

    /// Number of devices owned by the hub.
    pub fn device_count(&self) -> usize {
        self.state.lock().devices.len()
    }

    /// Store harvested devices and mark the hub initialized.
    pub(crate) fn install(&self, devices: Vec<DeviceHandle<O>>) {
        let mut state = self.state.lock();
        state.devices = devices
            .into_iter()
            .map(|handle| (handle.id().encode(), handle))
            .collect();
        state.initialized = true;
    }

    /// Remove every device handle and mark the hub uninitialized.
    pub(crate) fn take_devices(&self) -> Vec<O> {
        let mut state = self.state.lock();
        state.initialized = false;
        std::mem::take(&mut state.devices)
            .into_values()
            .map(DeviceHandle::into_object)
            .collect()
    }
}

fn hub_id_for(script_path: &Path) -> String {
    script_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| script_path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_id_is_file_name() {
        let hub: Hub<u32> = Hub::new("/lab/scripts/microscope.py");
        assert_eq!(hub.id(), "microscope.py");
        assert!(!hub.is_initialized());
    }

    #[test]
    fn test_install_and_take() {
        let hub: Hub<u32> = Hub::new("setup.rhai");
        hub.install(vec![
            DeviceHandle::new(DeviceId::new("Stage", "setup.rhai", "z"), 2),
            DeviceHandle::new(DeviceId::new("Camera", "setup.rhai", "cam"), 1),
        ]);
        assert!(hub.is_initialized());
        assert_eq!(hub.device("Camera[cam@setup.rhai]").map(|h| *h.object()), Some(1));
        assert_eq!(
            hub.device_ids()
                .iter()
                .map(DeviceId::encode)
                .collect::<Vec<_>>(),
            vec!["Camera[cam@setup.rhai]", "Stage[z@setup.rhai]"]
        );

        let mut released = hub.take_devices();
        released.sort();
        assert_eq!(released, vec![1, 2]);
        assert!(!hub.is_initialized());
        assert_eq!(hub.device_count(), 0);
    }
}
