//! Command codes and payload types for the WiFi control protocol.
//!
//! Message types follow the peripheral firmware's numbering: every request
//! has an even code and its response is `code + 1`. A generic failure
//! response (`MSG_RESP_FAILURE`) answers any request the peripheral could not
//! serve, so the controller's active command always completes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Message type of the generic failure response.
pub const MSG_RESP_FAILURE: u8 = 0xFF;

/// Status string reported by handlers that completed their action.
pub const STATUS_SUCCESS: &str = "success";

/// Status string reported when the station gave up connecting.
pub const STATUS_CONNECT_FAILED: &str = "connect failed";

/// Request message types understood by the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CommandCode {
    GetMacAddress = 0,
    GetWifiMode = 2,
    SetWifiMode = 4,
    GetApConfig = 6,
    SetApConfig = 8,
    GetSoftApConfig = 10,
    SetSoftApConfig = 12,
    DisconnectAp = 14,
}

impl CommandCode {
    pub const ALL: [CommandCode; 8] = [
        CommandCode::GetMacAddress,
        CommandCode::GetWifiMode,
        CommandCode::SetWifiMode,
        CommandCode::GetApConfig,
        CommandCode::SetApConfig,
        CommandCode::GetSoftApConfig,
        CommandCode::SetSoftApConfig,
        CommandCode::DisconnectAp,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.as_u8() == value)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Message type of the response that answers this command.
    pub fn response_type(self) -> u8 {
        self.as_u8() + 1
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetMacAddress => "get_mac_address",
            Self::GetWifiMode => "get_wifi_mode",
            Self::SetWifiMode => "set_wifi_mode",
            Self::GetApConfig => "get_ap_config",
            Self::SetApConfig => "set_ap_config",
            Self::GetSoftApConfig => "get_softap_config",
            Self::SetSoftApConfig => "set_softap_config",
            Self::DisconnectAp => "disconnect_ap",
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which of the peripheral's network interfaces a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WifiInterface {
    Station = 1,
    SoftAp = 2,
}

impl WifiInterface {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Station),
            2 => Some(Self::SoftAp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WifiMode {
    #[default]
    Null = 0,
    Station = 1,
    SoftAp = 2,
    StationSoftAp = 3,
}

impl WifiMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Null),
            1 => Some(Self::Station),
            2 => Some(Self::SoftAp),
            3 => Some(Self::StationSoftAp),
            _ => None,
        }
    }
}

/// Soft-AP authentication mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AuthMode {
    #[default]
    Open = 0,
    Wep = 1,
    WpaPsk = 2,
    Wpa2Psk = 3,
    WpaWpa2Psk = 4,
}

impl AuthMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Open),
            1 => Some(Self::Wep),
            2 => Some(Self::WpaPsk),
            3 => Some(Self::Wpa2Psk),
            4 => Some(Self::WpaWpa2Psk),
            _ => None,
        }
    }
}

/// Why the peripheral answered with a failure response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum FailureStatus {
    /// No handler registered for the request's message type.
    UnknownCommand = 1,
    /// Handler precondition violated (e.g. disconnect while not connected).
    InvalidState = 2,
    InvalidArgument = 3,
    /// Request body could not be decoded.
    Malformed = 4,
    /// The WiFi subsystem rejected the operation.
    Driver = 5,
    Internal = 6,
}

impl FailureStatus {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::UnknownCommand),
            2 => Some(Self::InvalidState),
            3 => Some(Self::InvalidArgument),
            4 => Some(Self::Malformed),
            5 => Some(Self::Driver),
            6 => Some(Self::Internal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownCommand => "unknown_command",
            Self::InvalidState => "invalid_state",
            Self::InvalidArgument => "invalid_argument",
            Self::Malformed => "malformed",
            Self::Driver => "driver",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 48-bit hardware address, displayed as lowercase colon-separated hex.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid MAC address '{0}'")]
pub struct ParseMacError(String);

impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| ParseMacError(s.to_string()))?;
            if part.len() != 2 {
                return Err(ParseMacError(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| ParseMacError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParseMacError(s.to_string()));
        }
        Ok(Self(octets))
    }
}

/// Credentials for joining an upstream access point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationConfig {
    pub ssid: String,
    pub password: String,
}

impl StationConfig {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }
}

/// Access point the station is associated with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApInfo {
    pub ssid: String,
    pub bssid: MacAddress,
    pub rssi: i8,
    pub channel: u8,
}

/// Configuration of the peripheral's own access point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftApConfig {
    pub ssid: String,
    pub password: String,
    pub channel: u8,
    pub auth: AuthMode,
    pub max_connections: u8,
    pub ssid_hidden: bool,
}

impl Default for SoftApConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            channel: 1,
            auth: AuthMode::Open,
            max_connections: 4,
            ssid_hidden: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_codes_are_even_and_answered_by_next_type() {
        for code in CommandCode::ALL {
            assert_eq!(code.as_u8() % 2, 0, "{code}");
            assert_eq!(code.response_type(), code.as_u8() + 1);
            assert_eq!(CommandCode::from_u8(code.as_u8()), Some(code));
        }
        assert_eq!(CommandCode::from_u8(1), None);
        assert_eq!(CommandCode::from_u8(MSG_RESP_FAILURE), None);
    }

    #[test]
    fn mac_address_displays_lowercase_hex() {
        let mac = MacAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:ff");
        assert_eq!("aa:bb:cc:dd:ee:ff".parse::<MacAddress>(), Ok(mac));
    }

    #[test]
    fn mac_address_rejects_bad_input() {
        assert!("aa:bb:cc:dd:ee".parse::<MacAddress>().is_err());
        assert!("aa:bb:cc:dd:ee:ff:00".parse::<MacAddress>().is_err());
        assert!("aa:bb:cc:dd:ee:zz".parse::<MacAddress>().is_err());
        assert!("aabb:cc:dd:ee:ff".parse::<MacAddress>().is_err());
    }

    #[test]
    fn enum_values_roundtrip() {
        for mode in [
            WifiMode::Null,
            WifiMode::Station,
            WifiMode::SoftAp,
            WifiMode::StationSoftAp,
        ] {
            assert_eq!(WifiMode::from_u8(mode as u8), Some(mode));
        }
        assert_eq!(WifiMode::from_u8(4), None);
        assert_eq!(WifiInterface::from_u8(0), None);
        assert_eq!(AuthMode::from_u8(9), None);
        assert_eq!(FailureStatus::from_u8(0), None);
    }

    #[test]
    fn command_code_serializes() {
        insta::assert_json_snapshot!(CommandCode::SetApConfig, @r#""set_ap_config""#);
    }

    #[test]
    fn softap_config_serializes() {
        let config = SoftApConfig {
            ssid: "hostlink".to_string(),
            password: "swordfish".to_string(),
            channel: 6,
            auth: AuthMode::Wpa2Psk,
            max_connections: 2,
            ssid_hidden: false,
        };
        insta::assert_json_snapshot!(config, @r#"
        {
          "ssid": "hostlink",
          "password": "swordfish",
          "channel": 6,
          "auth": "wpa2_psk",
          "max_connections": 2,
          "ssid_hidden": false
        }
        "#);
    }
}
