//! Data types for Marstek responses

use serde::Serialize;
use serde_json::Value;

/// One polling cycle's worth of device data.
///
/// Each field holds the `result` object of its command, or `None` if that
/// command failed. Serializes to exactly the keys `device`, `battery`, `es_mode`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    /// `Marstek.GetDevice`
    pub device: Option<Value>,
    /// `Bat.GetStatus`
    pub battery: Option<Value>,
    /// `ES.GetMode`
    pub es_mode: Option<Value>,
}

impl Snapshot {
    /// True when every command of the cycle failed
    pub fn is_empty(&self) -> bool {
        self.device.is_none() && self.battery.is_none() && self.es_mode.is_none()
    }

    /// Number of commands that returned data
    pub fn successful(&self) -> usize {
        [&self.device, &self.battery, &self.es_mode]
            .iter()
            .filter(|v| v.is_some())
            .count()
    }

    pub fn device_field(&self, key: &str) -> Option<&Value> {
        field(&self.device, key)
    }

    pub fn battery_field(&self, key: &str) -> Option<&Value> {
        field(&self.battery, key)
    }

    pub fn es_mode_field(&self, key: &str) -> Option<&Value> {
        field(&self.es_mode, key)
    }
}

fn field<'a>(section: &'a Option<Value>, key: &str) -> Option<&'a Value> {
    section
        .as_ref()
        .and_then(Value::as_object)
        .and_then(|map| map.get(key))
        .filter(|v| !v.is_null())
}

/// Identity reported by `Marstek.GetDevice` at registration time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    /// Display name (device model string)
    pub title: String,
    /// Bluetooth MAC, stable across IP changes
    pub serial: String,
    pub model: String,
}

impl DeviceIdentity {
    pub fn from_device_info(info: &Value) -> Self {
        let model = info
            .get("device")
            .and_then(Value::as_str)
            .unwrap_or("Marstek Device")
            .to_string();
        let serial = info
            .get("ble_mac")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        Self {
            title: model.clone(),
            serial,
            model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_snapshot_serializes_three_nulls() {
        let snapshot = Snapshot::default();
        assert!(snapshot.is_empty());
        assert_eq!(
            serde_json::to_value(&snapshot).unwrap(),
            json!({ "device": null, "battery": null, "es_mode": null })
        );
    }

    #[test]
    fn test_field_access_skips_non_objects() {
        let snapshot = Snapshot {
            device: Some(json!({ "ver": 155 })),
            battery: Some(json!("raw")),
            es_mode: None,
        };
        assert_eq!(snapshot.device_field("ver"), Some(&json!(155)));
        assert_eq!(snapshot.battery_field("soc"), None);
        assert_eq!(snapshot.es_mode_field("mode"), None);
        assert_eq!(snapshot.successful(), 2);
    }

    #[test]
    fn test_identity_defaults() {
        let id = DeviceIdentity::from_device_info(&json!({}));
        assert_eq!(id.title, "Marstek Device");
        assert_eq!(id.serial, "unknown");

        let id = DeviceIdentity::from_device_info(
            &json!({ "device": "VenusE 3.0", "ble_mac": "009b08a5aa39" }),
        );
        assert_eq!(id.model, "VenusE 3.0");
        assert_eq!(id.serial, "009b08a5aa39");
    }
}
