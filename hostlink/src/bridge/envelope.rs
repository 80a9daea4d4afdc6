//! Tagged envelope encoding for requests, responses and events.
//!
//! ```text
//! byte 0      msg_type   discriminant, selects exactly one variant
//! bytes 1-2   length     body length (u16 little-endian)
//! bytes 3..   body       variant fields in declaration order
//! ```
//!
//! Strings are a `u8` length followed by UTF-8 bytes, MAC addresses are six
//! raw octets, booleans are one byte (0 or 1). Decoding rejects an envelope
//! whose declared length differs from the bytes present, an unknown
//! discriminant, and trailing bytes after the last field.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use super::protocol::{
    ApInfo, AuthMode, CommandCode, FailureStatus, MSG_RESP_FAILURE, MacAddress, SoftApConfig,
    StationConfig, WifiInterface, WifiMode,
};

pub const ENVELOPE_HEADER_LEN: usize = 3;
pub const MAX_STRING_LEN: usize = u8::MAX as usize;

const EVENT_STATION_CONNECTED: u8 = 0x40;
const EVENT_STATION_DISCONNECTED: u8 = 0x41;
const EVENT_SOFTAP_STATION_JOINED: u8 = 0x42;
const EVENT_SOFTAP_STATION_LEFT: u8 = 0x43;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("declared body length {declared} does not match {actual} bytes present")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("unknown message type {0:#04x}")]
    UnknownMessageType(u8),
    #[error("invalid value {value} for field '{field}'")]
    InvalidField { field: &'static str, value: u8 },
    #[error("field '{0}' is not valid UTF-8")]
    InvalidUtf8(&'static str),
    #[error("field '{field}' is {len} bytes, limit is {MAX_STRING_LEN}")]
    StringTooLong { field: &'static str, len: usize },
    #[error("body of {0} bytes exceeds envelope limit")]
    BodyTooLarge(usize),
    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),
}

/// Message type of an encoded envelope without decoding it.
pub fn peek_msg_type(src: &[u8]) -> Option<u8> {
    src.first().copied()
}

/// Whether an encoded response answers a request with the given code.
///
/// Either the response type is `code + 1`, or it is a failure response naming
/// `code` as the failed request.
pub fn answers_command(response: &[u8], code: u8) -> bool {
    match peek_msg_type(response) {
        Some(MSG_RESP_FAILURE) => response.get(ENVELOPE_HEADER_LEN) == Some(&code),
        Some(msg_type) => code.checked_add(1) == Some(msg_type),
        None => false,
    }
}

/// Request from the controller, one variant per command family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestEnvelope {
    GetMacAddress { interface: WifiInterface },
    GetWifiMode,
    SetWifiMode { mode: WifiMode },
    GetApConfig,
    SetApConfig(StationConfig),
    GetSoftApConfig,
    SetSoftApConfig(SoftApConfig),
    DisconnectAp,
}

impl RequestEnvelope {
    pub fn code(&self) -> CommandCode {
        match self {
            Self::GetMacAddress { .. } => CommandCode::GetMacAddress,
            Self::GetWifiMode => CommandCode::GetWifiMode,
            Self::SetWifiMode { .. } => CommandCode::SetWifiMode,
            Self::GetApConfig => CommandCode::GetApConfig,
            Self::SetApConfig(_) => CommandCode::SetApConfig,
            Self::GetSoftApConfig => CommandCode::GetSoftApConfig,
            Self::SetSoftApConfig(_) => CommandCode::SetSoftApConfig,
            Self::DisconnectAp => CommandCode::DisconnectAp,
        }
    }

    pub fn encode(&self) -> Result<Bytes, EnvelopeError> {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    pub fn encode_into(&self, dst: &mut BytesMut) -> Result<(), EnvelopeError> {
        write_envelope(dst, self.code().as_u8(), |body| {
            match self {
                Self::GetMacAddress { interface } => body.put_u8(*interface as u8),
                Self::SetWifiMode { mode } => body.put_u8(*mode as u8),
                Self::SetApConfig(config) => {
                    put_str(body, "ssid", &config.ssid)?;
                    put_str(body, "password", &config.password)?;
                }
                Self::SetSoftApConfig(config) => put_softap_config(body, config)?,
                Self::GetWifiMode
                | Self::GetApConfig
                | Self::GetSoftApConfig
                | Self::DisconnectAp => {}
            }
            Ok(())
        })
    }

    pub fn decode(src: &[u8]) -> Result<Self, EnvelopeError> {
        let (msg_type, mut body) = split_envelope(src)?;
        let code =
            CommandCode::from_u8(msg_type).ok_or(EnvelopeError::UnknownMessageType(msg_type))?;

        let request = match code {
            CommandCode::GetMacAddress => {
                let value = body.u8("interface")?;
                let interface = WifiInterface::from_u8(value).ok_or(EnvelopeError::InvalidField {
                    field: "interface",
                    value,
                })?;
                Self::GetMacAddress { interface }
            }
            CommandCode::GetWifiMode => Self::GetWifiMode,
            CommandCode::SetWifiMode => Self::SetWifiMode {
                mode: body.wifi_mode()?,
            },
            CommandCode::GetApConfig => Self::GetApConfig,
            CommandCode::SetApConfig => Self::SetApConfig(StationConfig {
                ssid: body.string("ssid")?,
                password: body.string("password")?,
            }),
            CommandCode::GetSoftApConfig => Self::GetSoftApConfig,
            CommandCode::SetSoftApConfig => Self::SetSoftApConfig(body.softap_config()?),
            CommandCode::DisconnectAp => Self::DisconnectAp,
        };

        body.finish()?;
        Ok(request)
    }
}

/// Response from the peripheral. Every variant answers exactly one command
/// family; `Failure` answers any of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseEnvelope {
    /// Formatted as colon-separated hex.
    GetMacAddress { mac: String },
    GetWifiMode { mode: WifiMode },
    /// Mode read back after applying the change.
    SetWifiMode { mode: WifiMode },
    GetApConfig { info: ApInfo, status: String },
    SetApConfig { status: String },
    GetSoftApConfig(SoftApConfig),
    SetSoftApConfig { status: String },
    DisconnectAp { status: String },
    Failure {
        request: u8,
        status: FailureStatus,
        message: String,
    },
}

impl ResponseEnvelope {
    /// Build a failure response, truncating the message to the wire limit.
    pub fn failure(request: u8, status: FailureStatus, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.len() > MAX_STRING_LEN {
            let mut end = MAX_STRING_LEN;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }
        Self::Failure {
            request,
            status,
            message,
        }
    }

    pub fn msg_type(&self) -> u8 {
        match self {
            Self::GetMacAddress { .. } => CommandCode::GetMacAddress.response_type(),
            Self::GetWifiMode { .. } => CommandCode::GetWifiMode.response_type(),
            Self::SetWifiMode { .. } => CommandCode::SetWifiMode.response_type(),
            Self::GetApConfig { .. } => CommandCode::GetApConfig.response_type(),
            Self::SetApConfig { .. } => CommandCode::SetApConfig.response_type(),
            Self::GetSoftApConfig(_) => CommandCode::GetSoftApConfig.response_type(),
            Self::SetSoftApConfig { .. } => CommandCode::SetSoftApConfig.response_type(),
            Self::DisconnectAp { .. } => CommandCode::DisconnectAp.response_type(),
            Self::Failure { .. } => MSG_RESP_FAILURE,
        }
    }

    /// The request code this response answers.
    pub fn answers(&self) -> u8 {
        match self {
            Self::Failure { request, .. } => *request,
            other => other.msg_type() - 1,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    pub fn encode(&self) -> Result<Bytes, EnvelopeError> {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    pub fn encode_into(&self, dst: &mut BytesMut) -> Result<(), EnvelopeError> {
        write_envelope(dst, self.msg_type(), |body| {
            match self {
                Self::GetMacAddress { mac } => put_str(body, "mac", mac)?,
                Self::GetWifiMode { mode } | Self::SetWifiMode { mode } => body.put_u8(*mode as u8),
                Self::GetApConfig { info, status } => {
                    put_str(body, "ssid", &info.ssid)?;
                    body.put_slice(&info.bssid.octets());
                    body.put_i8(info.rssi);
                    body.put_u8(info.channel);
                    put_str(body, "status", status)?;
                }
                Self::SetApConfig { status }
                | Self::SetSoftApConfig { status }
                | Self::DisconnectAp { status } => put_str(body, "status", status)?,
                Self::GetSoftApConfig(config) => put_softap_config(body, config)?,
                Self::Failure {
                    request,
                    status,
                    message,
                } => {
                    body.put_u8(*request);
                    body.put_u8(*status as u8);
                    put_str(body, "message", message)?;
                }
            }
            Ok(())
        })
    }

    pub fn decode(src: &[u8]) -> Result<Self, EnvelopeError> {
        let (msg_type, mut body) = split_envelope(src)?;

        let response = if msg_type == MSG_RESP_FAILURE {
            let request = body.u8("request")?;
            let value = body.u8("status")?;
            let status = FailureStatus::from_u8(value).ok_or(EnvelopeError::InvalidField {
                field: "status",
                value,
            })?;
            Self::Failure {
                request,
                status,
                message: body.string("message")?,
            }
        } else {
            let code = msg_type
                .checked_sub(1)
                .and_then(CommandCode::from_u8)
                .ok_or(EnvelopeError::UnknownMessageType(msg_type))?;

            match code {
                CommandCode::GetMacAddress => Self::GetMacAddress {
                    mac: body.string("mac")?,
                },
                CommandCode::GetWifiMode => Self::GetWifiMode {
                    mode: body.wifi_mode()?,
                },
                CommandCode::SetWifiMode => Self::SetWifiMode {
                    mode: body.wifi_mode()?,
                },
                CommandCode::GetApConfig => Self::GetApConfig {
                    info: ApInfo {
                        ssid: body.string("ssid")?,
                        bssid: body.mac("bssid")?,
                        rssi: body.i8("rssi")?,
                        channel: body.u8("channel")?,
                    },
                    status: body.string("status")?,
                },
                CommandCode::SetApConfig => Self::SetApConfig {
                    status: body.string("status")?,
                },
                CommandCode::GetSoftApConfig => Self::GetSoftApConfig(body.softap_config()?),
                CommandCode::SetSoftApConfig => Self::SetSoftApConfig {
                    status: body.string("status")?,
                },
                CommandCode::DisconnectAp => Self::DisconnectAp {
                    status: body.string("status")?,
                },
            }
        };

        body.finish()?;
        Ok(response)
    }
}

/// Unsolicited notification from the peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Station associated and obtained an address.
    StationConnected { ssid: String, channel: u8 },
    StationDisconnected { reason: u8 },
    SoftApStationJoined { mac: MacAddress, aid: u8 },
    SoftApStationLeft { mac: MacAddress, aid: u8 },
}

impl Event {
    pub fn msg_type(&self) -> u8 {
        match self {
            Self::StationConnected { .. } => EVENT_STATION_CONNECTED,
            Self::StationDisconnected { .. } => EVENT_STATION_DISCONNECTED,
            Self::SoftApStationJoined { .. } => EVENT_SOFTAP_STATION_JOINED,
            Self::SoftApStationLeft { .. } => EVENT_SOFTAP_STATION_LEFT,
        }
    }

    pub fn encode(&self) -> Result<Bytes, EnvelopeError> {
        let mut buf = BytesMut::new();
        write_envelope(&mut buf, self.msg_type(), |body| {
            match self {
                Self::StationConnected { ssid, channel } => {
                    put_str(body, "ssid", ssid)?;
                    body.put_u8(*channel);
                }
                Self::StationDisconnected { reason } => body.put_u8(*reason),
                Self::SoftApStationJoined { mac, aid } | Self::SoftApStationLeft { mac, aid } => {
                    body.put_slice(&mac.octets());
                    body.put_u8(*aid);
                }
            }
            Ok(())
        })?;
        Ok(buf.freeze())
    }

    pub fn decode(src: &[u8]) -> Result<Self, EnvelopeError> {
        let (msg_type, mut body) = split_envelope(src)?;

        let event = match msg_type {
            EVENT_STATION_CONNECTED => Self::StationConnected {
                ssid: body.string("ssid")?,
                channel: body.u8("channel")?,
            },
            EVENT_STATION_DISCONNECTED => Self::StationDisconnected {
                reason: body.u8("reason")?,
            },
            EVENT_SOFTAP_STATION_JOINED => Self::SoftApStationJoined {
                mac: body.mac("mac")?,
                aid: body.u8("aid")?,
            },
            EVENT_SOFTAP_STATION_LEFT => Self::SoftApStationLeft {
                mac: body.mac("mac")?,
                aid: body.u8("aid")?,
            },
            other => return Err(EnvelopeError::UnknownMessageType(other)),
        };

        body.finish()?;
        Ok(event)
    }
}

fn write_envelope<F>(dst: &mut BytesMut, msg_type: u8, write_body: F) -> Result<(), EnvelopeError>
where
    F: FnOnce(&mut BytesMut) -> Result<(), EnvelopeError>,
{
    let start = dst.len();
    dst.put_u8(msg_type);
    dst.put_u16_le(0);

    let body_start = dst.len();
    if let Err(e) = write_body(dst) {
        dst.truncate(start);
        return Err(e);
    }

    let body_len = dst.len() - body_start;
    if body_len > u16::MAX as usize {
        dst.truncate(start);
        return Err(EnvelopeError::BodyTooLarge(body_len));
    }

    dst[start + 1..body_start].copy_from_slice(&(body_len as u16).to_le_bytes());
    Ok(())
}

fn put_str(dst: &mut BytesMut, field: &'static str, value: &str) -> Result<(), EnvelopeError> {
    if value.len() > MAX_STRING_LEN {
        return Err(EnvelopeError::StringTooLong {
            field,
            len: value.len(),
        });
    }
    dst.put_u8(value.len() as u8);
    dst.put_slice(value.as_bytes());
    Ok(())
}

fn put_softap_config(dst: &mut BytesMut, config: &SoftApConfig) -> Result<(), EnvelopeError> {
    put_str(dst, "ssid", &config.ssid)?;
    put_str(dst, "password", &config.password)?;
    dst.put_u8(config.channel);
    dst.put_u8(config.auth as u8);
    dst.put_u8(config.max_connections);
    dst.put_u8(u8::from(config.ssid_hidden));
    Ok(())
}

fn split_envelope(src: &[u8]) -> Result<(u8, BodyReader<'_>), EnvelopeError> {
    if src.len() < ENVELOPE_HEADER_LEN {
        return Err(EnvelopeError::Truncated {
            needed: ENVELOPE_HEADER_LEN,
            available: src.len(),
        });
    }

    let declared = u16::from_le_bytes([src[1], src[2]]) as usize;
    let body = &src[ENVELOPE_HEADER_LEN..];
    if body.len() != declared {
        return Err(EnvelopeError::LengthMismatch {
            declared,
            actual: body.len(),
        });
    }

    Ok((src[0], BodyReader { buf: body }))
}

/// Cursor over an envelope body with bounds-checked reads.
struct BodyReader<'a> {
    buf: &'a [u8],
}

impl<'a> BodyReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], EnvelopeError> {
        if self.buf.len() < n {
            return Err(EnvelopeError::Truncated {
                needed: n,
                available: self.buf.len(),
            });
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn u8(&mut self, _field: &'static str) -> Result<u8, EnvelopeError> {
        Ok(self.take(1)?[0])
    }

    fn i8(&mut self, field: &'static str) -> Result<i8, EnvelopeError> {
        Ok(self.u8(field)? as i8)
    }

    fn bool(&mut self, field: &'static str) -> Result<bool, EnvelopeError> {
        match self.u8(field)? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(EnvelopeError::InvalidField { field, value }),
        }
    }

    fn string(&mut self, field: &'static str) -> Result<String, EnvelopeError> {
        let len = self.u8(field)? as usize;
        let raw = self.take(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| EnvelopeError::InvalidUtf8(field))
    }

    fn mac(&mut self, _field: &'static str) -> Result<MacAddress, EnvelopeError> {
        let raw = self.take(6)?;
        let mut octets = [0u8; 6];
        octets.copy_from_slice(raw);
        Ok(MacAddress::new(octets))
    }

    fn wifi_mode(&mut self) -> Result<WifiMode, EnvelopeError> {
        let value = self.u8("mode")?;
        WifiMode::from_u8(value).ok_or(EnvelopeError::InvalidField {
            field: "mode",
            value,
        })
    }

    fn softap_config(&mut self) -> Result<SoftApConfig, EnvelopeError> {
        let ssid = self.string("ssid")?;
        let password = self.string("password")?;
        let channel = self.u8("channel")?;
        let value = self.u8("auth")?;
        let auth = AuthMode::from_u8(value).ok_or(EnvelopeError::InvalidField {
            field: "auth",
            value,
        })?;
        Ok(SoftApConfig {
            ssid,
            password,
            channel,
            auth,
            max_connections: self.u8("max_connections")?,
            ssid_hidden: self.bool("ssid_hidden")?,
        })
    }

    fn finish(self) -> Result<(), EnvelopeError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(EnvelopeError::TrailingBytes(self.buf.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_responses() -> Vec<ResponseEnvelope> {
        vec![
            ResponseEnvelope::GetMacAddress {
                mac: "aa:bb:cc:dd:ee:ff".to_string(),
            },
            ResponseEnvelope::GetWifiMode {
                mode: WifiMode::StationSoftAp,
            },
            ResponseEnvelope::SetWifiMode {
                mode: WifiMode::Station,
            },
            ResponseEnvelope::GetApConfig {
                info: ApInfo {
                    ssid: "lab".to_string(),
                    bssid: MacAddress::new([0x10, 0x20, 0x30, 0x40, 0x50, 0x60]),
                    rssi: -42,
                    channel: 11,
                },
                status: "success".to_string(),
            },
            ResponseEnvelope::SetApConfig {
                status: "connect failed".to_string(),
            },
            ResponseEnvelope::GetSoftApConfig(SoftApConfig {
                ssid: "hostlink".to_string(),
                password: "swordfish".to_string(),
                channel: 6,
                auth: AuthMode::WpaWpa2Psk,
                max_connections: 3,
                ssid_hidden: true,
            }),
            ResponseEnvelope::SetSoftApConfig {
                status: "success".to_string(),
            },
            ResponseEnvelope::DisconnectAp {
                status: "success".to_string(),
            },
            ResponseEnvelope::failure(14, FailureStatus::InvalidState, "station not connected"),
        ]
    }

    #[test]
    fn every_response_variant_survives_the_wire() {
        for response in sample_responses() {
            let bytes = response.encode().unwrap();
            let decoded = ResponseEnvelope::decode(&bytes).unwrap();
            assert_eq!(decoded, response);
            assert_eq!(decoded.encode().unwrap(), bytes);
        }
    }

    #[test]
    fn every_request_variant_survives_the_wire() {
        let requests = vec![
            RequestEnvelope::GetMacAddress {
                interface: WifiInterface::SoftAp,
            },
            RequestEnvelope::GetWifiMode,
            RequestEnvelope::SetWifiMode {
                mode: WifiMode::SoftAp,
            },
            RequestEnvelope::GetApConfig,
            RequestEnvelope::SetApConfig(StationConfig::new("lab", "hunter2")),
            RequestEnvelope::GetSoftApConfig,
            RequestEnvelope::SetSoftApConfig(SoftApConfig::default()),
            RequestEnvelope::DisconnectAp,
        ];
        for request in requests {
            let bytes = request.encode().unwrap();
            assert_eq!(peek_msg_type(&bytes), Some(request.code().as_u8()));
            assert_eq!(RequestEnvelope::decode(&bytes).unwrap(), request);
        }
    }

    #[test]
    fn envelope_layout() {
        let bytes = RequestEnvelope::GetMacAddress {
            interface: WifiInterface::Station,
        }
        .encode()
        .unwrap();
        assert_eq!(&bytes[..], &[0x00, 0x01, 0x00, 0x01]);

        let bytes = RequestEnvelope::DisconnectAp.encode().unwrap();
        assert_eq!(&bytes[..], &[0x0e, 0x00, 0x00]);
    }

    #[test]
    fn unknown_discriminant_is_rejected() {
        assert_eq!(
            ResponseEnvelope::decode(&[0x20, 0x00, 0x00]),
            Err(EnvelopeError::UnknownMessageType(0x20))
        );
        // A request type is not a response type.
        assert_eq!(
            ResponseEnvelope::decode(&[0x00, 0x00, 0x00]),
            Err(EnvelopeError::UnknownMessageType(0x00))
        );
        assert_eq!(
            RequestEnvelope::decode(&[0x01, 0x00, 0x00]),
            Err(EnvelopeError::UnknownMessageType(0x01))
        );
        assert_eq!(
            Event::decode(&[0x44, 0x00, 0x00]),
            Err(EnvelopeError::UnknownMessageType(0x44))
        );
    }

    #[test]
    fn declared_length_must_match() {
        let mut bytes = ResponseEnvelope::DisconnectAp {
            status: "success".to_string(),
        }
        .encode()
        .unwrap()
        .to_vec();

        bytes.push(0);
        assert_eq!(
            ResponseEnvelope::decode(&bytes),
            Err(EnvelopeError::LengthMismatch {
                declared: 8,
                actual: 9
            })
        );

        bytes.truncate(5);
        assert!(matches!(
            ResponseEnvelope::decode(&bytes),
            Err(EnvelopeError::LengthMismatch { .. })
        ));

        assert!(matches!(
            ResponseEnvelope::decode(&[0x0f]),
            Err(EnvelopeError::Truncated { .. })
        ));
    }

    #[test]
    fn trailing_body_bytes_are_rejected() {
        // GetWifiMode response with a mode byte plus one extra.
        assert_eq!(
            ResponseEnvelope::decode(&[0x03, 0x02, 0x00, 0x01, 0x00]),
            Err(EnvelopeError::TrailingBytes(1))
        );
    }

    #[test]
    fn invalid_field_values_are_rejected() {
        assert_eq!(
            RequestEnvelope::decode(&[0x00, 0x01, 0x00, 0x09]),
            Err(EnvelopeError::InvalidField {
                field: "interface",
                value: 9
            })
        );
        assert_eq!(
            RequestEnvelope::decode(&[0x04, 0x01, 0x00, 0x07]),
            Err(EnvelopeError::InvalidField {
                field: "mode",
                value: 7
            })
        );
    }

    #[test]
    fn oversized_strings_are_refused() {
        let request = RequestEnvelope::SetApConfig(StationConfig::new("x".repeat(300), ""));
        assert_eq!(
            request.encode(),
            Err(EnvelopeError::StringTooLong {
                field: "ssid",
                len: 300
            })
        );
    }

    #[test]
    fn failure_message_is_truncated_on_char_boundary() {
        let response = ResponseEnvelope::failure(0, FailureStatus::Internal, "é".repeat(200));
        let ResponseEnvelope::Failure { message, .. } = &response else {
            panic!("wrong variant");
        };
        assert!(message.len() <= MAX_STRING_LEN);
        assert!(response.encode().is_ok());
    }

    #[test]
    fn answers_command_matches_response_types() {
        let mac = ResponseEnvelope::GetMacAddress {
            mac: "aa:bb:cc:dd:ee:ff".to_string(),
        }
        .encode()
        .unwrap();
        assert!(answers_command(&mac, CommandCode::GetMacAddress.as_u8()));
        assert!(!answers_command(&mac, CommandCode::GetWifiMode.as_u8()));

        let failure = ResponseEnvelope::failure(0x30, FailureStatus::UnknownCommand, "")
            .encode()
            .unwrap();
        assert!(answers_command(&failure, 0x30));
        assert!(!answers_command(&failure, 0x00));
        assert!(!answers_command(&[], 0x00));
    }

    #[test]
    fn events_survive_the_wire() {
        let events = vec![
            Event::StationConnected {
                ssid: "lab".to_string(),
                channel: 6,
            },
            Event::StationDisconnected { reason: 201 },
            Event::SoftApStationJoined {
                mac: MacAddress::new([1, 2, 3, 4, 5, 6]),
                aid: 1,
            },
            Event::SoftApStationLeft {
                mac: MacAddress::new([1, 2, 3, 4, 5, 6]),
                aid: 1,
            },
        ];
        for event in events {
            let bytes = event.encode().unwrap();
            assert_eq!(Event::decode(&bytes).unwrap(), event);
        }
    }

    #[test]
    fn failure_response_serializes() {
        let response =
            ResponseEnvelope::failure(14, FailureStatus::InvalidState, "station not connected");
        insta::assert_json_snapshot!(response, @r#"
        {
          "type": "failure",
          "request": 14,
          "status": "invalid_state",
          "message": "station not connected"
        }
        "#);
    }
}
