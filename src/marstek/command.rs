//! Marstek UDP command catalogue
//!
//! Method names, default parameters and the request/`ES.SetMode` body builders.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::errors::MarstekError;

/// Request id sent with every command. The firmware does not correlate
/// responses, so this never increments.
pub const REQUEST_ID: u8 = 1;

/// Default UDP port of the device API
pub const DEFAULT_PORT: u16 = 30000;

/// Receive buffer for one response datagram
pub const RECV_BUFFER_SIZE: usize = 4096;

/// Fixed set of commands understood by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GetDevice,
    WifiStatus,
    BleStatus,
    BatStatus,
    PvStatus,
    EsStatus,
    EsGetMode,
    EsSetMode,
}

impl Command {
    /// Wire method name
    pub fn method(&self) -> &'static str {
        match self {
            Command::GetDevice => "Marstek.GetDevice",
            Command::WifiStatus => "Wifi.GetStatus",
            Command::BleStatus => "BLE.GetStatus",
            Command::BatStatus => "Bat.GetStatus",
            Command::PvStatus => "PV.GetStatus",
            Command::EsStatus => "ES.GetStatus",
            Command::EsGetMode => "ES.GetMode",
            Command::EsSetMode => "ES.SetMode",
        }
    }

    /// Parameters sent when the caller supplies none.
    ///
    /// `None` means the device default (`{"ble_mac": "0"}`) applies.
    pub fn default_params(&self) -> Option<Value> {
        match self {
            Command::BatStatus | Command::PvStatus | Command::EsStatus | Command::EsGetMode => {
                Some(json!({ "id": 0 }))
            }
            Command::GetDevice
            | Command::WifiStatus
            | Command::BleStatus
            | Command::EsSetMode => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())
    }
}

#[derive(Serialize)]
struct Request<'a> {
    id: u8,
    method: &'a str,
    params: Value,
}

fn device_default_params() -> Value {
    json!({ "ble_mac": "0" })
}

fn is_empty_params(params: &Value) -> bool {
    match params {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Serialize one request datagram as compact JSON.
///
/// Missing or empty params are replaced with `{"ble_mac": "0"}`.
pub fn encode_request(method: &str, params: Option<Value>) -> Result<Vec<u8>, MarstekError> {
    let params = match params {
        Some(p) if !is_empty_params(&p) => p,
        _ => device_default_params(),
    };
    let request = Request {
        id: REQUEST_ID,
        method,
        params,
    };
    Ok(serde_json::to_vec(&request)?)
}

/// Energy storage operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EsMode {
    Auto,
    Ai,
    Manual,
    Passive,
}

impl EsMode {
    pub const ALL: [EsMode; 4] = [EsMode::Auto, EsMode::Ai, EsMode::Manual, EsMode::Passive];

    pub fn as_str(&self) -> &'static str {
        match self {
            EsMode::Auto => "Auto",
            EsMode::Ai => "AI",
            EsMode::Manual => "Manual",
            EsMode::Passive => "Passive",
        }
    }

    /// Key of the sub-configuration object for this mode
    pub fn cfg_key(&self) -> &'static str {
        match self {
            EsMode::Auto => "auto_cfg",
            EsMode::Ai => "ai_cfg",
            EsMode::Manual => "manual_cfg",
            EsMode::Passive => "passive_cfg",
        }
    }

    /// Sub-configuration used when the caller does not override it
    pub fn default_cfg(&self) -> Value {
        let cfg = match self {
            EsMode::Auto | EsMode::Ai => serde_json::to_value(EnableCfg::default()),
            EsMode::Manual => serde_json::to_value(ManualCfg::default()),
            EsMode::Passive => serde_json::to_value(PassiveCfg::default()),
        };
        // Plain structs of integers and strings always serialize.
        cfg.unwrap_or(Value::Null)
    }
}

impl fmt::Display for EsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EsMode {
    type Err = MarstekError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EsMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| MarstekError::UnknownMode(s.to_string()))
    }
}

/// `auto_cfg` / `ai_cfg`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnableCfg {
    pub enable: u8,
}

impl Default for EnableCfg {
    fn default() -> Self {
        Self { enable: 1 }
    }
}

/// `manual_cfg`: one schedule window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualCfg {
    pub time_num: u8,
    pub start_time: String,
    pub end_time: String,
    /// Weekday bitmask, bit 0 = Monday; 127 = every day
    pub week_set: u8,
    /// Percent
    pub power: i32,
    pub enable: u8,
}

impl Default for ManualCfg {
    fn default() -> Self {
        Self {
            time_num: 1,
            start_time: "08:30".to_string(),
            end_time: "20:30".to_string(),
            week_set: 127,
            power: 100,
            enable: 1,
        }
    }
}

/// `passive_cfg`: power setpoint with countdown
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassiveCfg {
    pub power: i32,
    /// Seconds
    pub cd_time: u32,
}

impl Default for PassiveCfg {
    fn default() -> Self {
        Self {
            power: 100,
            cd_time: 300,
        }
    }
}

/// Build the `ES.SetMode` params for `mode`.
///
/// Only the sub-configuration belonging to `mode` is taken from `overrides`;
/// any other `*_cfg` keys there are ignored.
pub fn es_mode_params(mode: EsMode, overrides: Option<&Map<String, Value>>) -> Value {
    let cfg = overrides
        .and_then(|o| o.get(mode.cfg_key()))
        .cloned()
        .unwrap_or_else(|| mode.default_cfg());

    let mut config = Map::new();
    config.insert("mode".to_string(), Value::from(mode.as_str()));
    config.insert(mode.cfg_key().to_string(), cfg);

    json!({ "id": 1, "config": config })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_encode_request_is_compact_with_literal_id() {
        let bytes = encode_request("Marstek.GetDevice", None).unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"id":1,"method":"Marstek.GetDevice","params":{"ble_mac":"0"}}"#
        );
    }

    #[test]
    fn test_encode_request_empty_params_use_default() {
        let bytes = encode_request("Wifi.GetStatus", Some(json!({}))).unwrap();
        assert_eq!(decode(&bytes)["params"], json!({ "ble_mac": "0" }));
    }

    #[test]
    fn test_encode_request_keeps_given_params() {
        let bytes = encode_request("Bat.GetStatus", Some(json!({ "id": 0 }))).unwrap();
        let value = decode(&bytes);
        assert_eq!(value["id"], 1);
        assert_eq!(value["params"], json!({ "id": 0 }));
    }

    #[test]
    fn test_status_family_defaults() {
        assert_eq!(Command::BatStatus.default_params(), Some(json!({ "id": 0 })));
        assert_eq!(Command::PvStatus.default_params(), Some(json!({ "id": 0 })));
        assert_eq!(Command::EsStatus.default_params(), Some(json!({ "id": 0 })));
        assert_eq!(Command::EsGetMode.default_params(), Some(json!({ "id": 0 })));
        assert_eq!(Command::GetDevice.default_params(), None);
    }

    #[test]
    fn test_method_names() {
        let commands = [
            Command::GetDevice,
            Command::WifiStatus,
            Command::BleStatus,
            Command::BatStatus,
            Command::PvStatus,
            Command::EsStatus,
            Command::EsGetMode,
            Command::EsSetMode,
        ];
        let methods: Vec<&str> = commands.iter().map(|c| c.method()).collect();
        assert_eq!(
            methods,
            vec![
                "Marstek.GetDevice",
                "Wifi.GetStatus",
                "BLE.GetStatus",
                "Bat.GetStatus",
                "PV.GetStatus",
                "ES.GetStatus",
                "ES.GetMode",
                "ES.SetMode",
            ]
        );
    }

    #[test]
    fn test_es_mode_parsing() {
        assert_eq!("AI".parse::<EsMode>().unwrap(), EsMode::Ai);
        assert_eq!("Passive".parse::<EsMode>().unwrap(), EsMode::Passive);
        assert!("ai".parse::<EsMode>().is_err());
        assert!("Eco".parse::<EsMode>().is_err());
    }

    #[test]
    fn test_manual_defaults() {
        let params = es_mode_params(EsMode::Manual, None);
        assert_eq!(
            params,
            json!({
                "id": 1,
                "config": {
                    "mode": "Manual",
                    "manual_cfg": {
                        "time_num": 1,
                        "start_time": "08:30",
                        "end_time": "20:30",
                        "week_set": 127,
                        "power": 100,
                        "enable": 1
                    }
                }
            })
        );
    }

    #[test]
    fn test_auto_and_ai_defaults() {
        assert_eq!(
            es_mode_params(EsMode::Auto, None)["config"]["auto_cfg"],
            json!({ "enable": 1 })
        );
        assert_eq!(
            es_mode_params(EsMode::Ai, None)["config"]["ai_cfg"],
            json!({ "enable": 1 })
        );
    }

    #[test]
    fn test_passive_override_replaces_default() {
        let overrides = json!({ "passive_cfg": { "power": 50, "cd_time": 60 } });
        let params = es_mode_params(EsMode::Passive, overrides.as_object());
        assert_eq!(
            params["config"],
            json!({ "mode": "Passive", "passive_cfg": { "power": 50, "cd_time": 60 } })
        );
    }

    #[test]
    fn test_foreign_override_is_ignored() {
        let overrides = json!({ "manual_cfg": { "power": 10 } });
        let params = es_mode_params(EsMode::Auto, overrides.as_object());
        let config = params["config"].as_object().unwrap();
        assert_eq!(config.len(), 2);
        assert_eq!(config["auto_cfg"], json!({ "enable": 1 }));
    }
}
