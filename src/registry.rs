//! Process-wide directory of loaded hubs.
//!
//! The registry maps hub ids to hubs without owning them: it stores `Weak`
//! references, and the host-side [`ScriptHub`](crate::adapter::ScriptHub) keeps
//! the only strong one. A hub that has been dropped simply stops resolving.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::BridgeResult;
use crate::hub::{DeviceHandle, Hub};
use crate::id::DeviceId;

/// Hub id → hub association.
#[derive(Debug)]
pub struct DeviceRegistry<O> {
    hubs: RwLock<HashMap<String, Weak<Hub<O>>>>,
}

impl<O> Default for DeviceRegistry<O> {
    fn default() -> Self {
        Self {
            hubs: RwLock::new(HashMap::new()),
        }
    }
}

impl<O: Clone> DeviceRegistry<O> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hub` under its id, replacing any hub with the same id.
    pub fn register(&self, hub: &Arc<Hub<O>>) {
        let previous = self
            .hubs
            .write()
            .insert(hub.id().to_string(), Arc::downgrade(hub));
        match previous.and_then(|weak| weak.upgrade()) {
            Some(other) if !Arc::ptr_eq(&other, hub) => warn!(
                hub = hub.id(),
                replaced = %other.script_path().display(),
                "Two scripts share a hub id; the last one registered wins"
            ),
            _ => debug!(hub = hub.id(), "Registered hub"),
        }
    }

    /// Resolve a composite device id.
    ///
    /// Returns `Ok(None)` when the hub is not registered or does not provide the
    /// device; only an undecodable id is an error.
    pub fn lookup(&self, id: &str) -> BridgeResult<Option<DeviceHandle<O>>> {
        let decoded = DeviceId::decode(id)?;
        Ok(self
            .hub(decoded.hub_id())
            .and_then(|hub| hub.device(&decoded.encode())))
    }

    /// Registered hub with id `hub_id`, if it is still alive.
    pub fn hub(&self, hub_id: &str) -> Option<Arc<Hub<O>>> {
        self.hubs.read().get(hub_id).and_then(Weak::upgrade)
    }

    /// Remove the entry for `hub_id`, returning the hub it pointed to.
    pub fn remove(&self, hub_id: &str) -> Option<Arc<Hub<O>>> {
        self.hubs
            .write()
            .remove(hub_id)
            .and_then(|weak| weak.upgrade())
    }

    /// Ids of all live hubs, sorted.
    pub fn hub_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .hubs
            .read()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    fn hub_with(path: &str, devices: &[(&str, &str, u32)]) -> Arc<Hub<u32>> {
        let hub = Arc::new(Hub::new(path));
        let handles = devices
            .iter()
            .map(|(kind, name, value)| DeviceHandle::new(DeviceId::new(*kind, hub.id(), *name), *value))
            .collect();
        hub.install(handles);
        hub
    }

    #[test]
    fn test_lookup_resolves_device() {
        let registry = DeviceRegistry::new();
        let hub = hub_with("myscript.py", &[("Camera", "cam1", 7)]);
        registry.register(&hub);

        let handle = registry.lookup("Camera[cam1@myscript.py]").unwrap().unwrap();
        assert_eq!(*handle.object(), 7);
        assert_eq!(handle.id().name(), "cam1");
    }

    #[test]
    fn test_absence_is_not_an_error() {
        let registry = DeviceRegistry::new();
        let hub = hub_with("a.py", &[("Camera", "cam1", 1)]);
        registry.register(&hub);

        assert!(registry.lookup("Camera[cam1@b.py]").unwrap().is_none());
        assert!(registry.lookup("Camera[cam2@a.py]").unwrap().is_none());
        // type is part of the id
        assert!(registry.lookup("Stage[cam1@a.py]").unwrap().is_none());
    }

    #[test]
    fn test_malformed_id_is_an_error() {
        let registry: DeviceRegistry<u32> = DeviceRegistry::new();
        assert!(matches!(
            registry.lookup("cam1"),
            Err(BridgeError::MalformedId(_))
        ));
    }

    #[test]
    fn test_dropped_hub_stops_resolving() {
        let registry = DeviceRegistry::new();
        let hub = hub_with("a.py", &[("Camera", "cam1", 1)]);
        registry.register(&hub);
        drop(hub);
        assert!(registry.lookup("Camera[cam1@a.py]").unwrap().is_none());
        assert!(registry.hub_ids().is_empty());
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = DeviceRegistry::new();
        let first = hub_with("/one/setup.py", &[("Camera", "cam", 1)]);
        let second = hub_with("/two/setup.py", &[("Camera", "cam", 2)]);
        registry.register(&first);
        registry.register(&second);

        let handle = registry.lookup("Camera[cam@setup.py]").unwrap().unwrap();
        assert_eq!(*handle.object(), 2);
        assert_eq!(registry.hub_ids(), vec!["setup.py".to_string()]);
    }

    #[test]
    fn test_remove() {
        let registry = DeviceRegistry::new();
        let hub = hub_with("a.py", &[]);
        registry.register(&hub);
        assert!(registry.remove("a.py").is_some());
        assert!(registry.remove("a.py").is_none());
        assert!(registry.hub("a.py").is_none());
    }
}
