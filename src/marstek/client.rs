//! Marstek UDP client
//!
//! One socket, one request in flight, one JSON datagram back per request.
//! Transport and protocol failures are logged and returned as `None` (or
//! `false` for `set_es_mode`); they never propagate to the caller.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use super::command::{encode_request, es_mode_params, Command, EsMode, RECV_BUFFER_SIZE};
use super::types::Snapshot;
use crate::errors::MarstekError;

/// Per-request response deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Marstek device client
pub struct MarstekClient {
    host: String,
    port: u16,
    local_port: u16,
    timeout: Duration,
    socket: Option<UdpSocket>,
    /// Last request timed out, so its reply may still arrive
    late_reply_possible: bool,
}

/// Decode UTF-8, dropping invalid byte sequences instead of failing
fn decode_utf8_dropping_invalid(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}

/// Pick the payload out of a parsed response.
///
/// `result` wins, `error` becomes `MarstekError::Device`, and anything else is
/// passed through unchanged.
fn unwrap_response(mut response: Value) -> Result<Value, MarstekError> {
    if let Some(map) = response.as_object_mut() {
        if let Some(result) = map.remove("result") {
            return Ok(result);
        }
        if let Some(err) = map.remove("error") {
            return Err(MarstekError::Device(err));
        }
    }
    warn!("  ⚠ Unexpected response format: {}", response);
    Ok(response)
}

impl MarstekClient {
    /// Create a client for `host:port`, binding `local_port` on connect.
    ///
    /// No socket is opened until [`connect`](Self::connect) or the first command.
    pub fn new(host: impl Into<String>, port: u16, local_port: u16) -> Result<Self, MarstekError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(MarstekError::InvalidConfig(
                "device host must not be empty".to_string(),
            ));
        }
        if port == 0 {
            return Err(MarstekError::InvalidConfig(
                "device port must not be 0".to_string(),
            ));
        }

        Ok(Self {
            host,
            port,
            local_port,
            timeout: DEFAULT_TIMEOUT,
            socket: None,
            late_reply_possible: false,
        })
    }

    /// Override the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, MarstekError> {
        if timeout.is_zero() {
            return Err(MarstekError::InvalidConfig(
                "timeout must be greater than zero".to_string(),
            ));
        }
        self.timeout = timeout;
        Ok(self)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// Local address of the open socket, if any
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn resolve(&self) -> Result<SocketAddr, MarstekError> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| MarstekError::Resolve {
                host: self.host.clone(),
                port: self.port,
            })?
            .collect();

        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| MarstekError::Resolve {
                host: self.host.clone(),
                port: self.port,
            })
    }

    fn open_socket(&self) -> Result<UdpSocket, MarstekError> {
        let remote = self.resolve()?;
        let any: IpAddr = if remote.is_ipv4() {
            Ipv4Addr::UNSPECIFIED.into()
        } else {
            Ipv6Addr::UNSPECIFIED.into()
        };

        let socket = match UdpSocket::bind((any, self.local_port)) {
            Ok(socket) => socket,
            Err(e) => {
                warn!(
                    "Could not bind to local port {}, using ephemeral port: {}",
                    self.local_port, e
                );
                UdpSocket::bind((any, 0)).map_err(MarstekError::Socket)?
            }
        };

        socket
            .set_read_timeout(Some(self.timeout))
            .map_err(MarstekError::Socket)?;
        // Connected so that ICMP port-unreachable surfaces on recv and
        // datagrams from other peers are filtered out.
        socket.connect(remote).map_err(MarstekError::Socket)?;

        debug!(
            "UDP socket bound to {:?}, device at {}",
            socket.local_addr().ok(),
            remote
        );
        Ok(socket)
    }

    /// Open the socket (if not already open) and query the device with
    /// `Marstek.GetDevice`.
    ///
    /// Returns `true` only when the query produced a result. A failed query
    /// keeps the bound socket so a later command can retry on it.
    pub fn connect(&mut self) -> bool {
        if self.socket.is_none() {
            match self.open_socket() {
                Ok(socket) => self.socket = Some(socket),
                Err(e) => {
                    error!(
                        "Failed to create UDP socket for {}:{}: {}",
                        self.host, self.port, e
                    );
                    return false;
                }
            }
        }

        if self.get_device_info().is_some() {
            info!("✓ Connected to Marstek device at {}:{}", self.host, self.port);
            true
        } else {
            error!(
                "Device at {}:{} did not respond to test command",
                self.host, self.port
            );
            false
        }
    }

    /// Close the socket. Safe to call repeatedly or before any connect.
    pub fn disconnect(&mut self) {
        self.late_reply_possible = false;
        if let Some(socket) = self.socket.take() {
            drop(socket);
            debug!("UDP socket closed");
        }
    }

    fn classify(&self, method: &str, e: io::Error) -> MarstekError {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => MarstekError::Timeout {
                method: method.to_string(),
                host: self.host.clone(),
                port: self.port,
                timeout: self.timeout,
            },
            io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => {
                MarstekError::PortClosed {
                    host: self.host.clone(),
                    port: self.port,
                }
            }
            _ => MarstekError::Io(e),
        }
    }

    /// Throw away datagrams queued before the next request goes out.
    ///
    /// Replies carry no correlation beyond the constant id, so anything read
    /// here belongs to an earlier, already abandoned request. With `grace` the
    /// socket keeps listening until nothing arrives for that long; otherwise
    /// only what is already queued is dropped.
    fn discard_stale_replies(&self, socket: &UdpSocket, grace: Option<Duration>) -> io::Result<()> {
        match grace {
            Some(grace) => socket.set_read_timeout(Some(grace))?,
            None => socket.set_nonblocking(true)?,
        }

        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        let drained = loop {
            match socket.recv(&mut buffer) {
                Ok(len) => debug!(
                    "  Discarding stale reply ({} bytes): {}",
                    len,
                    decode_utf8_dropping_invalid(&buffer[..len])
                ),
                Err(e) => match e.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => break Ok(()),
                    // ICMP error left over from an earlier send
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => {}
                    _ => break Err(e),
                },
            }
        };

        socket.set_nonblocking(false)?;
        socket.set_read_timeout(Some(self.timeout))?;
        drained
    }

    fn round_trip(
        &self,
        method: &str,
        params: Option<Value>,
        grace: Option<Duration>,
    ) -> Result<Value, MarstekError> {
        let socket = self.socket.as_ref().ok_or(MarstekError::NotConnected)?;
        let message = encode_request(method, params)?;

        self.discard_stale_replies(socket, grace)?;

        info!("→ Sending UDP command: {}", method);
        debug!("  Request payload: {}", String::from_utf8_lossy(&message));

        socket
            .send(&message)
            .map_err(|e| self.classify(method, e))?;

        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        let len = socket
            .recv(&mut buffer)
            .map_err(|e| self.classify(method, e))?;

        let text = decode_utf8_dropping_invalid(&buffer[..len]);
        debug!("  ✓ Received {} bytes: {}", len, text);

        let response: Value = serde_json::from_str(&text)?;
        info!("← Received response for '{}'", method);
        unwrap_response(response)
    }

    fn log_failure(&self, method: &str, err: &MarstekError) {
        match err {
            MarstekError::Timeout { timeout, .. } => {
                error!(
                    "  ✗ Timeout waiting for '{}' response (waited {:?})",
                    method, timeout
                );
                error!(
                    "  → Check the device address {}:{} and that it is powered on",
                    self.host, self.port
                );
            }
            MarstekError::PortClosed { .. } => {
                error!(
                    "  ✗ '{}': {} sent port unreachable",
                    method, self.host
                );
                error!("  → Check if port {} is the configured API port", self.port);
            }
            MarstekError::Device(payload) => {
                error!("  ✗ Device returned error for '{}': {}", method, payload);
            }
            MarstekError::Decode(e) => {
                error!(
                    "  ✗ Failed to parse '{}' response from {}:{}: {}",
                    method, self.host, self.port, e
                );
            }
            other => {
                error!(
                    "  ✗ Error sending command '{}' to {}:{}: {}",
                    method, self.host, self.port, other
                );
            }
        }
    }

    /// Send one command and wait for its reply.
    ///
    /// Opens the socket implicitly when needed. Returns the `result` object, the
    /// raw response when it carries neither `result` nor `error`, or `None` on
    /// any failure.
    pub fn send_command(&mut self, method: &str, params: Option<Value>) -> Option<Value> {
        if self.socket.is_none() {
            debug!("No active socket, attempting to connect...");
            if !self.connect() {
                error!("Cannot send command '{}': connection failed", method);
                return None;
            }
        }

        let grace = self.late_reply_possible.then_some(self.timeout);
        let outcome = self.round_trip(method, params, grace);
        self.late_reply_possible = matches!(outcome, Err(MarstekError::Timeout { .. }));

        match outcome {
            Ok(Value::Null) => None,
            Ok(value) => Some(value),
            Err(e) => {
                self.log_failure(method, &e);
                None
            }
        }
    }

    fn execute(&mut self, command: Command) -> Option<Value> {
        self.send_command(command.method(), command.default_params())
    }

    pub fn get_device_info(&mut self) -> Option<Value> {
        self.execute(Command::GetDevice)
    }

    pub fn get_wifi_status(&mut self) -> Option<Value> {
        self.execute(Command::WifiStatus)
    }

    pub fn get_ble_status(&mut self) -> Option<Value> {
        self.execute(Command::BleStatus)
    }

    pub fn get_battery_status(&mut self) -> Option<Value> {
        self.execute(Command::BatStatus)
    }

    pub fn get_pv_status(&mut self) -> Option<Value> {
        self.execute(Command::PvStatus)
    }

    pub fn get_es_status(&mut self) -> Option<Value> {
        self.execute(Command::EsStatus)
    }

    pub fn get_es_mode(&mut self) -> Option<Value> {
        self.execute(Command::EsGetMode)
    }

    /// Switch the energy storage mode.
    ///
    /// `config` may carry a `<mode>_cfg` object replacing the default for the
    /// selected mode. Unknown modes are logged and rejected without sending.
    /// Succeeds only if the device answers `set_result: true`.
    pub fn set_es_mode(&mut self, mode: &str, config: Option<&Map<String, Value>>) -> bool {
        let mode: EsMode = match mode.parse() {
            Ok(mode) => mode,
            Err(e) => {
                error!("{}", e);
                return false;
            }
        };

        let params = es_mode_params(mode, config);
        let result = self.send_command(Command::EsSetMode.method(), Some(params));

        let accepted = matches!(
            result.as_ref().and_then(|r| r.get("set_result")),
            Some(Value::Bool(true))
        );
        if accepted {
            info!("ES mode set to {}", mode);
        } else {
            warn!("Device did not accept ES mode {}: {:?}", mode, result);
        }
        accepted
    }

    /// Fetch device info, battery status and ES mode in sequence.
    ///
    /// Always returns a snapshot; failed commands leave their field `None`.
    pub fn get_all_data(&mut self) -> Snapshot {
        debug!("Fetching all data from device...");

        let snapshot = Snapshot {
            device: self.get_device_info(),
            battery: self.get_battery_status(),
            es_mode: self.get_es_mode(),
        };

        debug!(
            "Data fetch complete. Successful: {}/3",
            snapshot.successful()
        );
        snapshot
    }
}

impl Drop for MarstekClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_drops_invalid_sequences() {
        let bytes = b"{\"a\":\xff\xfe1}";
        assert_eq!(decode_utf8_dropping_invalid(bytes), "{\"a\":1}");
    }

    #[test]
    fn test_unwrap_result() {
        let value = unwrap_response(json!({ "id": 1, "result": { "soc": 80 } })).unwrap();
        assert_eq!(value, json!({ "soc": 80 }));
    }

    #[test]
    fn test_unwrap_error() {
        let err = unwrap_response(json!({ "id": 1, "error": { "code": -32601 } })).unwrap_err();
        assert!(matches!(err, MarstekError::Device(_)));
    }

    #[test]
    fn test_unwrap_passthrough() {
        let raw = json!({ "id": 1, "src": "VenusE" });
        assert_eq!(unwrap_response(raw.clone()).unwrap(), raw);
        assert_eq!(unwrap_response(json!([1, 2])).unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_constructor_rejects_bad_config() {
        assert!(MarstekClient::new("", 30000, 30000).is_err());
        assert!(MarstekClient::new("10.0.0.2", 0, 30000).is_err());
        assert!(MarstekClient::new("10.0.0.2", 30000, 30000)
            .unwrap()
            .with_timeout(Duration::ZERO)
            .is_err());
    }

    #[test]
    fn test_disconnect_without_connect() {
        let mut client = MarstekClient::new("127.0.0.1", 30000, 0).unwrap();
        assert_eq!(client.timeout(), DEFAULT_TIMEOUT);
        client.disconnect();
        client.disconnect();
        assert!(!client.is_connected());
        assert_eq!(client.local_addr(), None);
    }
}
