//! The 16-byte HiSLIP message header (§4.6).

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

const PROLOGUE: [u8; 2] = *b"HS";
pub const HEADER_LEN: usize = 16;

/// HiSLIP message type codes used by this transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Initialize = 0,
    InitializeResponse = 1,
    FatalError = 2,
    Error = 3,
    Data = 6,
    DataEnd = 7,
    DeviceClearComplete = 8,
    DeviceClearAcknowledge = 9,
    AsyncInitialize = 17,
    AsyncInitializeResponse = 18,
    AsyncDeviceClear = 19,
    AsyncStatusQuery = 21,
    AsyncStatusResponse = 22,
    AsyncDeviceClearAcknowledge = 23,
}

impl MessageType {
    /// Decode a raw message-type byte, if it is one this transport speaks.
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(Self::Initialize),
            1 => Ok(Self::InitializeResponse),
            2 => Ok(Self::FatalError),
            3 => Ok(Self::Error),
            6 => Ok(Self::Data),
            7 => Ok(Self::DataEnd),
            8 => Ok(Self::DeviceClearComplete),
            9 => Ok(Self::DeviceClearAcknowledge),
            17 => Ok(Self::AsyncInitialize),
            18 => Ok(Self::AsyncInitializeResponse),
            19 => Ok(Self::AsyncDeviceClear),
            21 => Ok(Self::AsyncStatusQuery),
            22 => Ok(Self::AsyncStatusResponse),
            23 => Ok(Self::AsyncDeviceClearAcknowledge),
            other => Err(Error::Protocol(format!(
                "unrecognized HiSLIP message type {other}"
            ))),
        }
    }
}

/// A decoded or to-be-encoded HiSLIP header.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub message_type: MessageType,
    pub control_code: u8,
    pub parameter: u32,
    pub payload_len: u64,
}

impl Header {
    /// Encode this header as the 16-byte wire form.
    #[must_use]
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..2].copy_from_slice(&PROLOGUE);
        buf[2] = self.message_type as u8;
        buf[3] = self.control_code;
        BigEndian::write_u32(&mut buf[4..8], self.parameter);
        BigEndian::write_u64(&mut buf[8..16], self.payload_len);
        buf
    }

    /// Decode the 16-byte wire form, rejecting a bad prologue.
    pub fn from_bytes(buf: &[u8; HEADER_LEN]) -> Result<Self> {
        if buf[0..2] != PROLOGUE {
            return Err(Error::Protocol("HiSLIP header missing \"HS\" prologue".to_string()));
        }
        Ok(Self {
            message_type: MessageType::from_byte(buf[2])?,
            control_code: buf[3],
            parameter: BigEndian::read_u32(&buf[4..8]),
            payload_len: BigEndian::read_u64(&buf[8..16]),
        })
    }
}

#[cfg(test)]
mod unit {
    use super::*;

    #[test]
    fn round_trip() {
        let h = Header {
            message_type: MessageType::Data,
            control_code: 0,
            parameter: 42,
            payload_len: 7,
        };
        let bytes = h.to_bytes();
        let decoded = Header::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.message_type, MessageType::Data);
        assert_eq!(decoded.parameter, 42);
        assert_eq!(decoded.payload_len, 7);
    }

    #[test]
    fn rejects_bad_prologue() {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0] = b'X';
        bytes[1] = b'X';
        assert!(Header::from_bytes(&bytes).is_err());
    }
}
