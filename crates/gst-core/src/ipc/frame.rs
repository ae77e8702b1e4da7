//! Wire framing for the translation channel.
//!
//! Every message is a 12-byte little-endian header `{type, request_id,
//! data_length}` followed by the payload. Text payloads are UTF-16LE code
//! units with no terminator.

use std::io::{self, Read, Write};

use strum::Display;

use crate::error::{Error, Result};

pub const HEADER_LEN: usize = 12;

/// Upper bound on a single payload; anything larger is a protocol error, not
/// a string anyone translates.
pub const MAX_PAYLOAD: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MessageType {
    // Client -> server
    TranslateRequest,
    CacheSync,
    LogMessage,
    StatsUpdate,
    // Server -> client
    TranslateResponse,
    ConfigUpdate,
    Shutdown,
}

impl MessageType {
    pub fn as_u32(self) -> u32 {
        match self {
            MessageType::TranslateRequest => 1,
            MessageType::CacheSync => 2,
            MessageType::LogMessage => 3,
            MessageType::StatsUpdate => 4,
            MessageType::TranslateResponse => 101,
            MessageType::ConfigUpdate => 102,
            MessageType::Shutdown => 103,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(MessageType::TranslateRequest),
            2 => Some(MessageType::CacheSync),
            3 => Some(MessageType::LogMessage),
            4 => Some(MessageType::StatsUpdate),
            101 => Some(MessageType::TranslateResponse),
            102 => Some(MessageType::ConfigUpdate),
            103 => Some(MessageType::Shutdown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: MessageType,
    pub request_id: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(message_type: MessageType, request_id: u32, payload: Vec<u8>) -> Self {
        Self {
            message_type,
            request_id,
            payload,
        }
    }

    /// Frame carrying a UTF-16LE text payload.
    pub fn text(message_type: MessageType, request_id: u32, text: &str) -> Self {
        let payload = text
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect();
        Self::new(message_type, request_id, payload)
    }

    /// STATS_UPDATE frame: three little-endian u64 counters.
    pub fn stats(requests: u64, cache_hits: u64, errors: u64) -> Self {
        let mut payload = Vec::with_capacity(24);
        payload.extend_from_slice(&requests.to_le_bytes());
        payload.extend_from_slice(&cache_hits.to_le_bytes());
        payload.extend_from_slice(&errors.to_le_bytes());
        Self::new(MessageType::StatsUpdate, 0, payload)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.payload.len());
        bytes.extend_from_slice(&self.message_type.as_u32().to_le_bytes());
        bytes.extend_from_slice(&self.request_id.to_le_bytes());
        bytes.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Write the whole frame in a single buffer so message-boundary channels
    /// see one message.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.encode())?;
        writer.flush()
    }

    /// Read one frame. An EOF before the header surfaces as an io error the
    /// caller treats as disconnect.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Frame> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header)?;

        let raw_type = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let request_id = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let data_length = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;

        let message_type = MessageType::from_u32(raw_type)
            .ok_or_else(|| Error::IpcProtocol(format!("unknown message type {}", raw_type)))?;
        if data_length > MAX_PAYLOAD {
            return Err(Error::IpcProtocol(format!(
                "payload of {} bytes exceeds limit",
                data_length
            )));
        }

        let mut payload = vec![0u8; data_length];
        reader.read_exact(&mut payload)?;

        Ok(Frame {
            message_type,
            request_id,
            payload,
        })
    }

    /// Decode the payload as UTF-16LE text.
    pub fn payload_text(&self) -> Result<String> {
        if self.payload.len() % 2 != 0 {
            return Err(Error::IpcProtocol(format!(
                "odd text payload length {}",
                self.payload.len()
            )));
        }
        let units: Vec<u16> = self
            .payload
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }

    /// Decode a STATS_UPDATE payload.
    pub fn payload_stats(&self) -> Result<(u64, u64, u64)> {
        if self.payload.len() != 24 {
            return Err(Error::IpcProtocol(format!(
                "stats payload is {} bytes, expected 24",
                self.payload.len()
            )));
        }
        let mut parts = self.payload.chunks_exact(8).map(|chunk| {
            u64::from_le_bytes([
                chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
            ])
        });
        Ok((
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_values() {
        assert_eq!(MessageType::TranslateRequest.as_u32(), 1);
        assert_eq!(MessageType::CacheSync.as_u32(), 2);
        assert_eq!(MessageType::LogMessage.as_u32(), 3);
        assert_eq!(MessageType::StatsUpdate.as_u32(), 4);
        assert_eq!(MessageType::TranslateResponse.as_u32(), 101);
        assert_eq!(MessageType::ConfigUpdate.as_u32(), 102);
        assert_eq!(MessageType::Shutdown.as_u32(), 103);
        assert_eq!(MessageType::from_u32(42), None);
    }

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame::text(MessageType::TranslateRequest, 7, "Start Game");
        let bytes = frame.encode();
        assert_eq!(bytes.len(), HEADER_LEN + "Start Game".len() * 2);

        let decoded = Frame::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.payload_text().unwrap(), "Start Game");
    }

    #[test]
    fn test_header_layout_is_little_endian() {
        let frame = Frame::text(MessageType::TranslateResponse, 0x0102_0304, "A");
        let bytes = frame.encode();
        assert_eq!(&bytes[0..4], &[101, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[8..12], &[2, 0, 0, 0]);
        assert_eq!(&bytes[12..14], &[b'A', 0]);
    }

    #[test]
    fn test_unknown_type_is_protocol_error() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&99u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());

        assert!(matches!(
            Frame::read_from(&mut bytes.as_slice()),
            Err(Error::IpcProtocol(_))
        ));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&(MAX_PAYLOAD as u32 + 1).to_le_bytes());

        assert!(matches!(
            Frame::read_from(&mut bytes.as_slice()),
            Err(Error::IpcProtocol(_))
        ));
    }

    #[test]
    fn test_stats_roundtrip() {
        let frame = Frame::stats(120, 90, 3);
        assert_eq!(frame.payload_stats().unwrap(), (120, 90, 3));
    }

    #[test]
    fn test_truncated_frame_is_io_error() {
        let frame = Frame::text(MessageType::TranslateRequest, 1, "Hello");
        let bytes = frame.encode();
        let mut truncated = &bytes[..bytes.len() - 2];
        assert!(matches!(Frame::read_from(&mut truncated), Err(Error::Io(_))));
    }
}
