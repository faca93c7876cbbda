//! Semtech UDP packet-forwarder wire framing (§4.3, §6).
//!
//! Manual byte-level `to_bytes`/`from_bytes` framing, following the same
//! hand-rolled style the teacher uses for its own binary wire formats
//! (BLE fragment headers, the WiFi config blob) rather than reaching for a
//! serialization crate for an 8-or-12-byte fixed header.

use std::fmt;

/// Protocol version this gateway speaks.
pub const PROTOCOL_VERSION: u8 = 2;

/// Default UDP port for the packet-forwarder protocol.
pub const DEFAULT_PORT: u16 = 1700;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    PushData = 0x00,
    PushAck = 0x01,
    PullData = 0x02,
    PullResp = 0x03,
    PullAck = 0x04,
    TxAck = 0x05,
}

impl PacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::PushData),
            0x01 => Some(Self::PushAck),
            0x02 => Some(Self::PullData),
            0x03 => Some(Self::PullResp),
            0x04 => Some(Self::PullAck),
            0x05 => Some(Self::TxAck),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum FrameError {
    TooShort,
    UnsupportedVersion(u8),
    UnknownPacketType(u8),
    InvalidUtf8,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "datagram too short for a packet-forwarder header"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported protocol version {v}"),
            Self::UnknownPacketType(t) => write!(f, "unknown packet type 0x{t:02x}"),
            Self::InvalidUtf8 => write!(f, "payload is not valid UTF-8"),
        }
    }
}

impl std::error::Error for FrameError {}

/// A decoded packet-forwarder datagram, header fields plus whatever body
/// bytes follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub token: u16,
    pub packet_type: PacketType,
    pub gateway_eui: Option<[u8; 8]>,
    pub body: Vec<u8>,
}

impl Frame {
    /// Frames carrying an 8-byte gateway EUI after the header (§4.3 table).
    fn carries_eui(packet_type: PacketType) -> bool {
        matches!(
            packet_type,
            PacketType::PushData | PacketType::PullData | PacketType::TxAck
        )
    }

    pub fn new(token: u16, packet_type: PacketType, gateway_eui: Option<[u8; 8]>, body: Vec<u8>) -> Self {
        Self {
            token,
            packet_type,
            gateway_eui,
            body,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 8 + self.body.len());
        out.push(PROTOCOL_VERSION);
        out.push((self.token >> 8) as u8);
        out.push((self.token & 0xFF) as u8);
        out.push(self.packet_type as u8);
        if let Some(eui) = self.gateway_eui {
            out.extend_from_slice(&eui);
        }
        out.extend_from_slice(&self.body);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < 4 {
            return Err(FrameError::TooShort);
        }
        let version = bytes[0];
        if version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }
        let token = ((bytes[1] as u16) << 8) | bytes[2] as u16;
        let packet_type =
            PacketType::from_byte(bytes[3]).ok_or(FrameError::UnknownPacketType(bytes[3]))?;

        let mut offset = 4;
        let gateway_eui = if Self::carries_eui(packet_type) {
            if bytes.len() < offset + 8 {
                return Err(FrameError::TooShort);
            }
            let mut eui = [0u8; 8];
            eui.copy_from_slice(&bytes[offset..offset + 8]);
            offset += 8;
            Some(eui)
        } else {
            None
        };

        Ok(Self {
            token,
            packet_type,
            gateway_eui,
            body: bytes[offset..].to_vec(),
        })
    }

    pub fn body_str(&self) -> Result<&str, FrameError> {
        std::str::from_utf8(&self.body).map_err(|_| FrameError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_data_roundtrip_with_eui() {
        let eui = [0x11, 0x22, 0x33, 0xFF, 0xFE, 0x44, 0x55, 0x66];
        let frame = Frame::new(
            0xABCD,
            PacketType::PushData,
            Some(eui),
            br#"{"rxpk":[]}"#.to_vec(),
        );
        let bytes = frame.to_bytes();
        assert_eq!(bytes[0], PROTOCOL_VERSION);
        assert_eq!(bytes[1], 0xAB);
        assert_eq!(bytes[2], 0xCD);
        assert_eq!(bytes[3], PacketType::PushData as u8);

        let decoded = Frame::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn push_ack_roundtrip_without_eui_or_body() {
        let frame = Frame::new(0x0001, PacketType::PushAck, None, Vec::new());
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), 4);
        assert_eq!(Frame::from_bytes(&bytes).unwrap(), frame);
    }

    #[test]
    fn pull_resp_has_no_eui_but_has_json_body() {
        let frame = Frame::new(0x1234, PacketType::PullResp, None, br#"{"txpk":{}}"#.to_vec());
        let bytes = frame.to_bytes();
        let decoded = Frame::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.gateway_eui, None);
        assert_eq!(decoded.body_str().unwrap(), r#"{"txpk":{}}"#);
    }

    #[test]
    fn rejects_unsupported_version() {
        let bytes = [1, 0, 0, PacketType::PullAck as u8];
        assert!(matches!(
            Frame::from_bytes(&bytes),
            Err(FrameError::UnsupportedVersion(1))
        ));
    }

    #[test]
    fn rejects_truncated_eui() {
        let bytes = [PROTOCOL_VERSION, 0, 0, PacketType::PushData as u8, 1, 2, 3];
        assert!(matches!(Frame::from_bytes(&bytes), Err(FrameError::TooShort)));
    }
}
