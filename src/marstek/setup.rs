//! One-shot device registration check

use std::time::Duration;

use tracing::info;

use super::client::MarstekClient;
use super::types::DeviceIdentity;
use crate::errors::SetupError;

/// Connect, read the device info, and disconnect again.
///
/// The local bind port is the device port, matching how the bridge binds
/// during normal polling.
pub fn validate_device(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<DeviceIdentity, SetupError> {
    let mut client = MarstekClient::new(host, port, port)
        .and_then(|c| c.with_timeout(timeout))
        .map_err(|e| SetupError::CannotConnect(e.to_string()))?;

    let result = identify(&mut client);
    client.disconnect();
    result
}

fn identify(client: &mut MarstekClient) -> Result<DeviceIdentity, SetupError> {
    if !client.connect() {
        return Err(SetupError::CannotConnect(format!(
            "no response from {}:{}",
            client.host(),
            client.port()
        )));
    }

    let info = client.get_device_info().ok_or_else(|| {
        SetupError::InvalidDevice(
            "device connected but did not return valid information".to_string(),
        )
    })?;

    let identity = DeviceIdentity::from_device_info(&info);
    info!(
        "Validated device '{}' (ble_mac {})",
        identity.title, identity.serial
    );
    Ok(identity)
}
