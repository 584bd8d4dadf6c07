//! Raw socket transport (§4.3): a bare TCP byte stream with newline
//! termination, used for `TCPIP::host::port::SOCKET` resources.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::trace;

use crate::error::{Error, Result};
use crate::resource::TcpipFields;

use super::{TerminatorStatus, Transport};

/// A raw TCP socket transport.
pub struct RawSocketTransport {
    fields: TcpipFields,
    stream: Option<TcpStream>,
}

impl RawSocketTransport {
    /// Build a transport for `fields`; the connection is not opened until
    /// [`Transport::open`] is called.
    #[must_use]
    pub const fn new(fields: TcpipFields) -> Self {
        Self {
            fields,
            stream: None,
        }
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| Error::ConnectionLost("socket is not open".to_string()))
    }
}

impl Transport for RawSocketTransport {
    fn open(&mut self, open_timeout_ms: u64) -> Result<()> {
        let addr = (self.fields.host.as_str(), self.fields.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::ResourceNotFound(self.fields.host.clone()))?;
        let stream = TcpStream::connect_timeout(
            &addr,
            Duration::from_millis(open_timeout_ms.max(1)),
        )?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.stream = None;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        trace!(bytes = data.len(), "writing to raw socket transport");
        let stream = self.stream_mut()?;
        stream.write_all(data)?;
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<(usize, TerminatorStatus)> {
        let stream = self.stream_mut()?;
        stream.set_read_timeout(Some(Duration::from_millis(timeout_ms.max(1))))?;
        let mut total = 0usize;
        while total < buf.len() {
            let n = stream.read(&mut buf[total..])?;
            if n == 0 {
                return Err(Error::ConnectionLost("peer closed connection".to_string()));
            }
            total = total.saturating_add(n);
            if buf[total.saturating_sub(1)] == b'\n' {
                return Ok((total, TerminatorStatus::TermChar));
            }
        }
        Ok((total, TerminatorStatus::MaxCount))
    }

    fn read_status(&mut self) -> Result<u8> {
        self.write(b"*STB?\n")?;
        let mut buf = [0u8; 32];
        let (n, _) = self.read(&mut buf, 5000)?;
        let text = String::from_utf8_lossy(&buf[..n]);
        text.trim()
            .parse::<u8>()
            .map_err(|_| Error::Protocol(format!("unparseable status byte: {text:?}")))
    }

    fn clear(&mut self) -> Result<()> {
        self.write(b"*CLS\n")?;
        Ok(())
    }
}
