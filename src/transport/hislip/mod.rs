//! HiSLIP transport (§4.6): a dual-TCP-channel framed protocol.

pub mod frame;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use frame::{Header, MessageType, HEADER_LEN};

use crate::error::{Error, Result};
use crate::resource::TcpipFields;

use super::{TerminatorStatus, Transport};

const HISLIP_MAJOR: u8 = 1;
const HISLIP_MINOR: u8 = 0;
/// Arbitrary client vendor id used in the `Initialize` parameter field.
const VENDOR_ID: u16 = 0x4441;
/// Fixed at the session buffer size; see the Open Question in §9 about
/// negotiating against peers that advertise a smaller maximum.
const MAX_MESSAGE_SIZE: usize = 65536;
const DEFAULT_IO_TIMEOUT_MS: u64 = 2000;
const CLEAR_TIMEOUT_MS: u64 = 5000;

fn send_message(
    stream: &mut TcpStream,
    message_type: MessageType,
    control_code: u8,
    parameter: u32,
    payload: &[u8],
) -> Result<()> {
    let header = Header {
        message_type,
        control_code,
        parameter,
        payload_len: payload.len() as u64,
    };
    stream.write_all(&header.to_bytes())?;
    stream.write_all(payload)?;
    Ok(())
}

fn recv_message(stream: &mut TcpStream) -> Result<(Header, Vec<u8>)> {
    let mut raw = [0u8; HEADER_LEN];
    stream.read_exact(&mut raw)?;
    let header = Header::from_bytes(&raw)?;
    let mut payload = vec![0u8; header.payload_len as usize];
    stream.read_exact(&mut payload)?;
    Ok((header, payload))
}

/// HiSLIP transport state: the two channels, the session id the server
/// assigned, and the client-maintained message id.
pub struct HiSlipTransport {
    fields: TcpipFields,
    sync: Option<TcpStream>,
    asyn: Option<TcpStream>,
    session_id: u16,
    message_id: u32,
}

impl HiSlipTransport {
    /// Build a transport for `fields`; no network I/O occurs until
    /// [`Transport::open`].
    #[must_use]
    pub const fn new(fields: TcpipFields) -> Self {
        Self {
            fields,
            sync: None,
            asyn: None,
            session_id: 0,
            message_id: 0,
        }
    }

    fn sync_mut(&mut self) -> Result<&mut TcpStream> {
        self.sync
            .as_mut()
            .ok_or_else(|| Error::ConnectionLost("HiSLIP sync channel is not open".to_string()))
    }

    fn asyn_mut(&mut self) -> Result<&mut TcpStream> {
        self.asyn
            .as_mut()
            .ok_or_else(|| Error::ConnectionLost("HiSLIP async channel is not open".to_string()))
    }
}

impl Transport for HiSlipTransport {
    fn open(&mut self, open_timeout_ms: u64) -> Result<()> {
        let timeout = Duration::from_millis(open_timeout_ms.max(1));

        let mut sync = TcpStream::connect((self.fields.host.as_str(), self.fields.port))?;
        sync.set_nodelay(true)?;
        sync.set_read_timeout(Some(timeout))?;
        sync.set_write_timeout(Some(timeout))?;

        let parameter =
            (u32::from(HISLIP_MAJOR) << 24) | (u32::from(HISLIP_MINOR) << 16) | u32::from(VENDOR_ID);
        send_message(
            &mut sync,
            MessageType::Initialize,
            0,
            parameter,
            self.fields.device_name.as_bytes(),
        )?;
        let (header, _payload) = recv_message(&mut sync)?;
        if header.message_type != MessageType::InitializeResponse {
            return Err(Error::Protocol(
                "expected HiSLIP InitializeResponse".to_string(),
            ));
        }
        self.session_id = (header.parameter & 0xFFFF) as u16;

        let mut asyn = TcpStream::connect((self.fields.host.as_str(), self.fields.port))?;
        asyn.set_nodelay(true)?;
        asyn.set_read_timeout(Some(timeout))?;
        asyn.set_write_timeout(Some(timeout))?;

        send_message(
            &mut asyn,
            MessageType::AsyncInitialize,
            0,
            u32::from(self.session_id),
            &[],
        )?;
        let (header, _payload) = recv_message(&mut asyn)?;
        if header.message_type != MessageType::AsyncInitializeResponse {
            return Err(Error::Protocol(
                "expected HiSLIP AsyncInitializeResponse".to_string(),
            ));
        }

        self.sync = Some(sync);
        self.asyn = Some(asyn);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.sync = None;
        self.asyn = None;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.message_id = self.message_id.wrapping_add(2);
        let message_id = self.message_id;
        let sync = self.sync_mut()?;

        if data.is_empty() {
            send_message(sync, MessageType::DataEnd, 0, message_id, &[])?;
            return Ok(0);
        }

        let mut offset = 0usize;
        while offset < data.len() {
            let end = (offset + MAX_MESSAGE_SIZE).min(data.len());
            let chunk = &data[offset..end];
            let is_last = end == data.len();
            let message_type = if is_last {
                MessageType::DataEnd
            } else {
                MessageType::Data
            };
            send_message(sync, message_type, 0, message_id, chunk)?;
            offset = end;
        }
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<(usize, TerminatorStatus)> {
        let sync = self.sync_mut()?;
        sync.set_read_timeout(Some(Duration::from_millis(timeout_ms.max(1))))?;

        let mut total = 0usize;
        loop {
            let (header, payload) = recv_message(sync)?;
            match header.message_type {
                MessageType::Data | MessageType::DataEnd => {
                    let remaining = buf.len() - total;
                    let take = payload.len().min(remaining);
                    buf[total..total + take].copy_from_slice(&payload[..take]);
                    total = total.saturating_add(take);
                    let truncated = payload.len() > take;
                    let is_end = header.message_type == MessageType::DataEnd;
                    if truncated {
                        return Ok((total, TerminatorStatus::MaxCount));
                    }
                    if is_end {
                        return Ok((total, TerminatorStatus::TermChar));
                    }
                }
                MessageType::FatalError | MessageType::Error => {
                    return Err(Error::Protocol(
                        "HiSLIP peer reported a fatal/non-fatal protocol error".to_string(),
                    ));
                }
                _ => {
                    // Ignore unexpected message types (e.g. service request).
                }
            }
        }
    }

    fn read_status(&mut self) -> Result<u8> {
        let message_id = self.message_id;
        let asyn = self.asyn_mut()?;
        asyn.set_read_timeout(Some(Duration::from_millis(DEFAULT_IO_TIMEOUT_MS)))?;

        send_message(asyn, MessageType::AsyncStatusQuery, 0, message_id, &[])?;
        let (header, _payload) = recv_message(asyn)?;
        if header.message_type != MessageType::AsyncStatusResponse {
            return Err(Error::Protocol(
                "expected HiSLIP AsyncStatusResponse".to_string(),
            ));
        }
        Ok(header.control_code)
    }

    fn clear(&mut self) -> Result<()> {
        {
            let asyn = self.asyn_mut()?;
            asyn.set_read_timeout(Some(Duration::from_millis(CLEAR_TIMEOUT_MS)))?;
            send_message(asyn, MessageType::AsyncDeviceClear, 0, 0, &[])?;
            let (header, _payload) = recv_message(asyn)?;
            if header.message_type != MessageType::AsyncDeviceClearAcknowledge {
                return Err(Error::Protocol(
                    "expected HiSLIP AsyncDeviceClearAcknowledge".to_string(),
                ));
            }
        }

        let feature_flags = {
            let sync = self.sync_mut()?;
            sync.set_read_timeout(Some(Duration::from_millis(CLEAR_TIMEOUT_MS)))?;
            let (header, _payload) = recv_message(sync)?;
            if header.message_type != MessageType::DeviceClearComplete {
                return Err(Error::Protocol(
                    "expected HiSLIP DeviceClearComplete".to_string(),
                ));
            }
            header.control_code
        };

        let sync = self.sync_mut()?;
        send_message(
            sync,
            MessageType::DeviceClearAcknowledge,
            feature_flags,
            0,
            &[],
        )?;
        self.message_id = 0;
        Ok(())
    }
}

#[cfg(test)]
mod unit {
    use super::*;

    #[test]
    fn message_id_increments_by_two() {
        let mut id = 0u32;
        id = id.wrapping_add(2);
        assert_eq!(id, 2);
        id = id.wrapping_add(2);
        assert_eq!(id, 4);
    }

    #[test]
    fn initialize_parameter_packs_version_and_vendor() {
        let parameter =
            (u32::from(HISLIP_MAJOR) << 24) | (u32::from(HISLIP_MINOR) << 16) | u32::from(VENDOR_ID);
        assert_eq!((parameter >> 24) & 0xFF, u32::from(HISLIP_MAJOR));
        assert_eq!(parameter & 0xFFFF, u32::from(VENDOR_ID));
    }
}
