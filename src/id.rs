//! Composite device identities.
//!
//! A device id has the form `Type[Name@Hub]` where:
//! - `Type` is the device type declared by the script object (`Camera`, `Stage`, ...),
//! - `Name` is the key of the object in the script's `devices` mapping,
//! - `Hub` is the file name of the script that created it, e.g. `microscope.rhai`.
//!
//! The text form is the only identity shared between the host and the bridge.

use std::fmt;
use std::str::FromStr;

use crate::error::{BridgeError, BridgeResult};

/// Decoded form of a composite device id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId {
    device_type: String,
    hub_id: String,
    name: String,
}

impl DeviceId {
    /// Build an id from its parts. No validation is performed; parts that
    /// contain `[`, `@` or `]` do not survive a round trip through the text form.
    pub fn new(
        device_type: impl Into<String>,
        hub_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            device_type: device_type.into(),
            hub_id: hub_id.into(),
            name: name.into(),
        }
    }

    /// Decode `Type[Name@Hub]`.
    ///
    /// The first `[` and the first `@` after it delimit the parts, and the id
    /// must end with `]`.
    pub fn decode(id: &str) -> BridgeResult<Self> {
        let malformed = || BridgeError::MalformedId(id.to_string());
        let open = id.find('[').ok_or_else(malformed)?;
        let at = id[open + 1..]
            .find('@')
            .map(|offset| open + 1 + offset)
            .ok_or_else(malformed)?;
        let hub = id[at + 1..].strip_suffix(']').ok_or_else(malformed)?;

        Ok(Self {
            device_type: id[..open].to_string(),
            name: id[open + 1..at].to_string(),
            hub_id: hub.to_string(),
        })
    }

    /// Encode to `Type[Name@Hub]`.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Device type declared by the script object.
    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// Id of the hub (script) that owns the device.
    pub fn hub_id(&self) -> &str {
        &self.hub_id
    }

    /// Key of the device in the script's `devices` mapping.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}@{}]", self.device_type, self.name, self.hub_id)
    }
}

impl FromStr for DeviceId {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let id = DeviceId::new("Camera", "myscript.py", "cam1");
        assert_eq!(id.encode(), "Camera[cam1@myscript.py]");
    }

    #[test]
    fn test_decode_parts() {
        let id = DeviceId::decode("Stage[xy stage@lab setup.rhai]").unwrap();
        assert_eq!(id.device_type(), "Stage");
        assert_eq!(id.name(), "xy stage");
        assert_eq!(id.hub_id(), "lab setup.rhai");
    }

    #[test]
    fn test_round_trip_with_empty_parts() {
        for (t, h, n) in [("", "", ""), ("Device", "", "x"), ("", "hub.py", "")] {
            let id = DeviceId::new(t, h, n);
            assert_eq!(DeviceId::decode(&id.encode()).unwrap(), id);
        }
    }

    #[test]
    fn test_same_name_different_hubs() {
        let a = DeviceId::new("Camera", "left.py", "cam");
        let b = DeviceId::new("Camera", "right.py", "cam");
        assert_ne!(a.encode(), b.encode());
    }

    #[test]
    fn test_hub_may_contain_at_sign() {
        // only the first '@' after '[' separates name from hub
        let id = DeviceId::decode("Device[dev@user@host.py]").unwrap();
        assert_eq!(id.name(), "dev");
        assert_eq!(id.hub_id(), "user@host.py");
    }

    #[test]
    fn test_decode_rejects_malformed() {
        for bad in ["Camera", "Camera[cam1]", "Camera@hub[cam1", "Camera[cam1@hub", ""] {
            match DeviceId::decode(bad) {
                Err(BridgeError::MalformedId(text)) => assert_eq!(text, bad),
                other => panic!("expected MalformedId for {bad:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_from_str() {
        let id: DeviceId = "Device[slm@slm.py]".parse().unwrap();
        assert_eq!(id.name(), "slm");
    }
}
