//! VXI-11 transport (§4.5): ONC RPC over TCP, bootstrapped through the
//! portmapper, XDR-encoded, with TCP record-marking framing.

pub mod sunrpc;

use std::io::Cursor;
use std::time::Duration;

use sunrpc::{xdr, RpcClient};

use crate::error::{Error, Result};
use crate::resource::TcpipFields;

use super::{TerminatorStatus, Transport};

/// VXI-11 Core program number, `0x0607AF`.
pub const CORE_PROGRAM: u32 = 395_183;
/// VXI-11 Core program version.
pub const CORE_VERSION: u32 = 1;

const PORTMAP_PROGRAM: u32 = 100_000;
const PORTMAP_VERSION: u32 = 2;
const PORTMAP_GETPORT: u32 = 3;
const IPPROTO_TCP: u32 = 6;

const PROC_CREATE_LINK: u32 = 10;
const PROC_DEVICE_WRITE: u32 = 11;
const PROC_DEVICE_READ: u32 = 12;
const PROC_DEVICE_READSTB: u32 = 13;
const PROC_DEVICE_CLEAR: u32 = 15;
const PROC_DESTROY_LINK: u32 = 23;

const FLAG_END: u32 = 0x08;

const REASON_REQCNT: u32 = 1;
const REASON_CHR: u32 = 2;
const REASON_END: u32 = 4;

const DEFAULT_IO_TIMEOUT_MS: u64 = 2000;
const DEFAULT_MAX_RECV_SIZE: u32 = 65536;

/// VXI-11's own closed error-code set (`device_errno` in the RFC), mapped
/// onto the crate-wide [`Error`] taxonomy by [`map_device_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceErrorCode {
    None,
    Syntax,
    DeviceNotAccessible,
    InvalidLinkIdentifier,
    ParameterError,
    ChannelNotEstablished,
    OperationNotSupported,
    OutOfResources,
    DeviceLockedByAnotherLink,
    NoLockHeldByThisLink,
    IoTimeout,
    IoError,
    InvalidAddress,
    Abort,
    ChannelAlreadyEstablished,
    Unknown(u32),
}

impl From<u32> for DeviceErrorCode {
    fn from(v: u32) -> Self {
        match v {
            0 => Self::None,
            1 => Self::Syntax,
            3 => Self::DeviceNotAccessible,
            4 => Self::InvalidLinkIdentifier,
            5 => Self::ParameterError,
            6 => Self::ChannelNotEstablished,
            8 => Self::OperationNotSupported,
            9 => Self::OutOfResources,
            11 => Self::DeviceLockedByAnotherLink,
            12 => Self::NoLockHeldByThisLink,
            15 => Self::IoTimeout,
            17 => Self::IoError,
            21 => Self::InvalidAddress,
            23 => Self::Abort,
            29 => Self::ChannelAlreadyEstablished,
            other => Self::Unknown(other),
        }
    }
}

fn map_device_error(code: u32) -> Result<()> {
    match DeviceErrorCode::from(code) {
        DeviceErrorCode::None => Ok(()),
        DeviceErrorCode::IoTimeout => Err(Error::Timeout(Duration::from_millis(
            DEFAULT_IO_TIMEOUT_MS,
        ))),
        DeviceErrorCode::DeviceLockedByAnotherLink => {
            Err(Error::ResourceLocked("device link is locked".to_string()))
        }
        DeviceErrorCode::InvalidLinkIdentifier | DeviceErrorCode::ChannelNotEstablished => {
            Err(Error::ConnectionLost("VXI-11 link is not established".to_string()))
        }
        DeviceErrorCode::OperationNotSupported => {
            Err(Error::NotSupported("operation not supported by device".to_string()))
        }
        other => Err(Error::Protocol(format!("VXI-11 device error: {other:?}"))),
    }
}

/// Is `reason & (END|REQCNT|CHR)` set, per §4.5's `read` loop-termination
/// rule?
const fn reason_terminates(reason: u32) -> bool {
    reason & (REASON_END | REASON_REQCNT | REASON_CHR) != 0
}

/// VXI-11 transport state.
pub struct Vxi11Transport {
    fields: TcpipFields,
    link: Option<RpcClient>,
    link_id: u32,
    max_recv_size: u32,
}

impl Vxi11Transport {
    /// Build a transport for `fields`; no network I/O occurs until
    /// [`Transport::open`].
    #[must_use]
    pub const fn new(fields: TcpipFields) -> Self {
        Self {
            fields,
            link: None,
            link_id: 0,
            max_recv_size: DEFAULT_MAX_RECV_SIZE,
        }
    }

    fn link_mut(&mut self) -> Result<&mut RpcClient> {
        self.link
            .as_mut()
            .ok_or_else(|| Error::ConnectionLost("VXI-11 link is not open".to_string()))
    }

    fn portmapper_getport(&self, timeout: Duration) -> Result<u16> {
        let mut client = RpcClient::connect(
            &self.fields.host,
            111,
            PORTMAP_PROGRAM,
            PORTMAP_VERSION,
        )?;
        let mut args = Vec::new();
        xdr::write_u32(&mut args, CORE_PROGRAM);
        xdr::write_u32(&mut args, CORE_VERSION);
        xdr::write_u32(&mut args, IPPROTO_TCP);
        xdr::write_u32(&mut args, 0);
        let reply = client.call(PORTMAP_GETPORT, &args, timeout)?;
        let mut cur = Cursor::new(reply.as_slice());
        let port = xdr::read_u32(&mut cur)?;
        if port == 0 {
            return Err(Error::ResourceNotFound(format!(
                "portmapper has no mapping for VXI-11 core program on {}",
                self.fields.host
            )));
        }
        u16::try_from(port)
            .map_err(|_| Error::Protocol(format!("portmapper returned an out-of-range port {port}")))
    }
}

impl Transport for Vxi11Transport {
    fn open(&mut self, open_timeout_ms: u64) -> Result<()> {
        let timeout = Duration::from_millis(open_timeout_ms.max(1));
        let port = self.portmapper_getport(timeout)?;

        let mut link = RpcClient::connect(&self.fields.host, port, CORE_PROGRAM, CORE_VERSION)?;

        let mut args = Vec::new();
        xdr::write_i32(&mut args, 0); // clientId
        xdr::write_u32(&mut args, 0); // lockDevice = false
        xdr::write_u32(&mut args, 0); // lockTimeout
        xdr::write_string(&mut args, &self.fields.device_name);

        let reply = link.call(PROC_CREATE_LINK, &args, timeout)?;
        let mut cur = Cursor::new(reply.as_slice());
        let error = xdr::read_u32(&mut cur)?;
        map_device_error(error)?;
        let link_id = xdr::read_u32(&mut cur)?;
        let _abort_port = xdr::read_u32(&mut cur)?;
        let max_recv_size = xdr::read_u32(&mut cur)?;

        self.link_id = link_id;
        self.max_recv_size = if max_recv_size == 0 {
            DEFAULT_MAX_RECV_SIZE
        } else {
            max_recv_size
        };
        self.link = Some(link);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut link) = self.link.take() {
            let mut args = Vec::new();
            xdr::write_u32(&mut args, self.link_id);
            // Best-effort: §4.2 close never fails in a way the caller must
            // recover from.
            let _ = link.call(
                PROC_DESTROY_LINK,
                &args,
                Duration::from_millis(DEFAULT_IO_TIMEOUT_MS),
            );
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let max_chunk = self.max_recv_size as usize;
        let link_id = self.link_id;
        let link = self.link_mut()?;
        let timeout = Duration::from_millis(DEFAULT_IO_TIMEOUT_MS);

        let mut total_written = 0usize;
        let mut offset = 0usize;
        while offset < data.len() {
            let end = (offset + max_chunk).min(data.len());
            let chunk = &data[offset..end];
            let is_last = end == data.len();

            let mut args = Vec::new();
            xdr::write_u32(&mut args, link_id);
            xdr::write_u32(&mut args, DEFAULT_IO_TIMEOUT_MS as u32); // ioTimeout
            xdr::write_u32(&mut args, 0); // lockTimeout
            xdr::write_u32(&mut args, if is_last { FLAG_END } else { 0 });
            xdr::write_opaque(&mut args, chunk);

            let reply = link.call(PROC_DEVICE_WRITE, &args, timeout)?;
            let mut cur = Cursor::new(reply.as_slice());
            let error = xdr::read_u32(&mut cur)?;
            map_device_error(error)?;
            let size_written = xdr::read_u32(&mut cur)? as usize;

            total_written = total_written.saturating_add(size_written);
            offset = offset.saturating_add(size_written);
            if size_written == 0 {
                break;
            }
        }
        Ok(total_written)
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<(usize, TerminatorStatus)> {
        let max_recv_size = self.max_recv_size as usize;
        let link_id = self.link_id;
        let link = self.link_mut()?;
        let timeout = Duration::from_millis(timeout_ms.max(1));

        let mut total = 0usize;
        let mut status = TerminatorStatus::MaxCount;
        while total < buf.len() {
            let remaining = buf.len() - total;
            let request_size = remaining.min(max_recv_size);

            let mut args = Vec::new();
            xdr::write_u32(&mut args, link_id);
            xdr::write_u32(&mut args, u32::try_from(request_size).unwrap_or(u32::MAX));
            xdr::write_u32(&mut args, timeout_ms as u32); // ioTimeout
            xdr::write_u32(&mut args, 0); // lockTimeout
            xdr::write_u32(&mut args, 0); // flags
            xdr::write_u32(&mut args, 0); // termChar

            let reply = link.call(PROC_DEVICE_READ, &args, timeout)?;
            let mut cur = Cursor::new(reply.as_slice());
            let error = xdr::read_u32(&mut cur)?;
            map_device_error(error)?;
            let reason = xdr::read_u32(&mut cur)?;
            let data = xdr::read_opaque(&mut cur)?;

            let take = data.len().min(remaining);
            buf[total..total + take].copy_from_slice(&data[..take]);
            total = total.saturating_add(take);

            let done = reason_terminates(reason) || data.len() < request_size;
            if reason & (REASON_END | REASON_CHR) != 0 {
                status = TerminatorStatus::TermChar;
            }
            if done {
                break;
            }
        }
        Ok((total, status))
    }

    fn read_status(&mut self) -> Result<u8> {
        let link_id = self.link_id;
        let link = self.link_mut()?;
        let timeout = Duration::from_millis(DEFAULT_IO_TIMEOUT_MS);

        let mut args = Vec::new();
        xdr::write_u32(&mut args, link_id);
        xdr::write_u32(&mut args, 0); // flags
        xdr::write_u32(&mut args, 0); // lockTimeout
        xdr::write_u32(&mut args, DEFAULT_IO_TIMEOUT_MS as u32); // ioTimeout

        let reply = link.call(PROC_DEVICE_READSTB, &args, timeout)?;
        let mut cur = Cursor::new(reply.as_slice());
        let error = xdr::read_u32(&mut cur)?;
        map_device_error(error)?;
        let stb = xdr::read_u32(&mut cur)?;
        Ok((stb & 0xFF) as u8)
    }

    fn clear(&mut self) -> Result<()> {
        let link_id = self.link_id;
        let link = self.link_mut()?;
        let timeout = Duration::from_millis(DEFAULT_IO_TIMEOUT_MS);

        let mut args = Vec::new();
        xdr::write_u32(&mut args, link_id);
        xdr::write_u32(&mut args, 0); // flags
        xdr::write_u32(&mut args, 0); // lockTimeout
        xdr::write_u32(&mut args, DEFAULT_IO_TIMEOUT_MS as u32); // ioTimeout

        let reply = link.call(PROC_DEVICE_CLEAR, &args, timeout)?;
        let mut cur = Cursor::new(reply.as_slice());
        let error = xdr::read_u32(&mut cur)?;
        map_device_error(error)
    }
}

#[cfg(test)]
mod unit {
    use super::*;

    #[test]
    fn reason_bits_match_spec() {
        assert!(reason_terminates(REASON_END));
        assert!(reason_terminates(REASON_CHR));
        assert!(reason_terminates(REASON_REQCNT));
        assert!(!reason_terminates(0));
    }

    #[test]
    fn device_error_none_is_ok() {
        assert!(map_device_error(0).is_ok());
    }

    #[test]
    fn device_error_timeout_maps_to_timeout_kind() {
        let err = map_device_error(15).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Timeout);
    }

    #[test]
    fn device_error_locked_maps_to_resource_locked() {
        let err = map_device_error(11).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ResourceLocked);
    }
}
