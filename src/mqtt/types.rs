use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::marstek::{DeviceIdentity, EsMode, Snapshot};

fn as_number(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64)
}

fn as_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn as_flag(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        _ => None,
    }
}

/// Splits a signed grid flow into battery charge/discharge power.
///
/// Returns `(abs(value), 0)` if negative, `(0, value)` if positive.
/// Negative `ongrid_power` means power flows into the battery.
fn split_grid_power(value: f64) -> (f64, f64) {
    if value < 0.0 {
        (value.abs(), 0.0)
    } else {
        (0.0, value)
    }
}

/// Presentation values derived from one snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct SensorState {
    pub time: DateTime<Utc>,
    pub battery_soc: Option<f64>,
    pub battery_temperature: Option<f64>, // °C
    pub battery_capacity: Option<f64>,    // Wh
    pub battery_rated_capacity: Option<f64>, // Wh
    pub battery_charging_allowed: Option<bool>,
    pub battery_discharging_allowed: Option<bool>,
    pub es_mode: Option<String>,
    pub grid_power: Option<f64>, // W (positive = from grid)
    pub battery_charging_power: Option<f64>,
    pub battery_discharging_power: Option<f64>,
    pub offgrid_power: Option<f64>,
    pub phase_a_power: Option<f64>,
    pub phase_b_power: Option<f64>,
    pub phase_c_power: Option<f64>,
    pub total_power: Option<f64>,
    pub firmware_version: Option<String>,
    pub wifi_ssid: Option<String>,
}

impl SensorState {
    pub fn from_snapshot(snapshot: &Snapshot, time: DateTime<Utc>) -> Self {
        // bat_temp is reported in tenths of °C, bat_capacity in tens of Wh
        let battery_temperature =
            as_number(snapshot.battery_field("bat_temp")).map(|t| t / 10.0);
        let battery_capacity =
            as_number(snapshot.battery_field("bat_capacity")).map(|c| c * 10.0);

        let (battery_charging_power, battery_discharging_power) = match snapshot.es_mode {
            Some(Value::Object(_)) => {
                let ongrid = as_number(snapshot.es_mode_field("ongrid_power")).unwrap_or(0.0);
                let (charge, discharge) = split_grid_power(ongrid);
                (Some(charge), Some(discharge))
            }
            _ => (None, None),
        };

        Self {
            time,
            battery_soc: as_number(snapshot.battery_field("soc")),
            battery_temperature,
            battery_capacity,
            battery_rated_capacity: as_number(snapshot.battery_field("rated_capacity")),
            battery_charging_allowed: as_flag(snapshot.battery_field("charg_flag")),
            battery_discharging_allowed: as_flag(snapshot.battery_field("dischrg_flag")),
            es_mode: as_text(snapshot.es_mode_field("mode")),
            grid_power: as_number(snapshot.es_mode_field("ongrid_power")),
            battery_charging_power,
            battery_discharging_power,
            offgrid_power: as_number(snapshot.es_mode_field("offgrid_power")),
            phase_a_power: as_number(snapshot.es_mode_field("a_power")),
            phase_b_power: as_number(snapshot.es_mode_field("b_power")),
            phase_c_power: as_number(snapshot.es_mode_field("c_power")),
            total_power: as_number(snapshot.es_mode_field("total_power")),
            firmware_version: as_text(snapshot.device_field("ver")),
            wifi_ssid: as_text(snapshot.device_field("wifi_name")),
        }
    }
}

/// Static device description published once as JSON
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub manufacturer: &'static str,
    pub model: String,
    pub ble_mac: String,
    pub host: String,
    pub firmware: Option<String>,
    pub wifi_name: Option<String>,
    pub wifi_mac: Option<String>,
    pub ip: Option<String>,
    pub modes: Vec<&'static str>,
}

impl DeviceInfo {
    pub fn new(identity: &DeviceIdentity, host: &str, snapshot: Option<&Snapshot>) -> Self {
        let field = |key: &str| snapshot.and_then(|s| as_text(s.device_field(key)));
        Self {
            manufacturer: "Marstek",
            model: identity.model.clone(),
            ble_mac: identity.serial.clone(),
            host: host.to_string(),
            firmware: field("ver"),
            wifi_name: field("wifi_name"),
            wifi_mac: field("wifi_mac"),
            ip: field("ip"),
            modes: EsMode::ALL.iter().map(EsMode::as_str).collect(),
        }
    }
}
