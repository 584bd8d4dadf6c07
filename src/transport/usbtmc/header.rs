//! The 12-byte USBTMC bulk-transfer header (§4.7).

use crate::error::{Error, Result};

pub const HEADER_LEN: usize = 12;

pub const DEV_DEP_MSG_OUT: u8 = 1;
pub const REQUEST_DEV_DEP_MSG_IN: u8 = 2;
pub const DEV_DEP_MSG_IN: u8 = 2;

/// Transfer-attributes bit 0: end-of-message on `OUT`, "last transfer of
/// this request" on `IN`.
pub const ATTR_EOM: u8 = 0x01;
/// Transfer-attributes bit 1: term-char enabled, `REQUEST_DEV_DEP_MSG_IN`
/// only.
pub const ATTR_TERM_CHAR_ENABLED: u8 = 0x02;

/// A 12-byte USBTMC bulk header.
#[derive(Debug, Clone, Copy)]
pub struct BulkHeader {
    pub msg_id: u8,
    pub tag: u8,
    pub transfer_size: u32,
    pub attributes: u8,
    pub term_char: u8,
}

impl BulkHeader {
    /// Build a header, deriving the tag's bitwise complement automatically.
    #[must_use]
    pub const fn new(msg_id: u8, tag: u8, transfer_size: u32, attributes: u8, term_char: u8) -> Self {
        Self {
            msg_id,
            tag,
            transfer_size,
            attributes,
            term_char,
        }
    }

    /// Encode the 12-byte little-endian header.
    #[must_use]
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.msg_id;
        buf[1] = self.tag;
        buf[2] = !self.tag;
        buf[3] = 0;
        buf[4..8].copy_from_slice(&self.transfer_size.to_le_bytes());
        buf[8] = self.attributes;
        buf[9] = self.term_char;
        buf[10] = 0;
        buf[11] = 0;
        buf
    }

    /// Decode a 12-byte header, validating the tag/complement pair.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::Protocol("USBTMC bulk header truncated".to_string()));
        }
        let tag = buf[1];
        let complement = buf[2];
        if complement != !tag {
            return Err(Error::Protocol(format!(
                "USBTMC tag complement mismatch: tag={tag}, complement={complement}"
            )));
        }
        Ok(Self {
            msg_id: buf[0],
            tag,
            transfer_size: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            attributes: buf[8],
            term_char: buf[9],
        })
    }
}

/// Pad `data` with zero bytes up to the next 4-byte boundary, as required
/// after the 12-byte header in a bulk-OUT transfer.
pub fn pad_to_four_bytes(data: &mut Vec<u8>) {
    let pad = (4 - (data.len() % 4)) % 4;
    data.extend(std::iter::repeat(0u8).take(pad));
}

#[cfg(test)]
mod unit {
    use super::*;

    #[test]
    fn tag_and_complement_are_consistent() {
        let header = BulkHeader::new(DEV_DEP_MSG_OUT, 5, 10, ATTR_EOM, 0);
        let bytes = header.to_bytes();
        assert_eq!(bytes[1], 5);
        assert_eq!(bytes[2], !5u8);
        let decoded = BulkHeader::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.tag, 5);
    }

    #[test]
    fn corrupted_complement_is_rejected() {
        let header = BulkHeader::new(DEV_DEP_MSG_OUT, 5, 10, ATTR_EOM, 0);
        let mut bytes = header.to_bytes();
        bytes[2] = 0xFF;
        assert!(BulkHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn padding_rounds_up_to_four_bytes() {
        let mut data = vec![1u8, 2, 3];
        pad_to_four_bytes(&mut data);
        assert_eq!(data.len(), 4);

        let mut data = vec![1u8, 2, 3, 4];
        pad_to_four_bytes(&mut data);
        assert_eq!(data.len(), 4);
    }
}
