//! A minimal ONC RPC (RFC 5531) client over TCP: XDR primitives, TCP record
//! marking, and the call/reply envelope VXI-11 rides on.
//!
//! Grounded on this codebase's existing from-scratch VXI-11 RPC codec, with
//! one correction: opaque/string XDR padding must round up to the next
//! 4-byte boundary (`(4 - len % 4) % 4` trailing zero bytes), not merely
//! append `len % 4` bytes as a naive implementation might.

use std::io::{Cursor, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

const RPC_VERSION: u32 = 2;
const CALL: u32 = 0;
const REPLY: u32 = 1;
const MSG_ACCEPTED: u32 = 0;
const MSG_DENIED: u32 = 1;
const ACCEPT_SUCCESS: u32 = 0;

/// XDR primitive encoders/decoders.
pub mod xdr {
    use std::io::{Cursor, Read};

    use byteorder::{BigEndian, ReadBytesExt};

    use crate::error::{Error, Result};

    /// Append a big-endian `u32`.
    pub fn write_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Append a big-endian `i32`.
    pub fn write_i32(buf: &mut Vec<u8>, v: i32) {
        buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Append a length-prefixed, 4-byte-padded opaque byte array.
    pub fn write_opaque(buf: &mut Vec<u8>, data: &[u8]) {
        write_u32(buf, u32::try_from(data.len()).unwrap_or(u32::MAX));
        buf.extend_from_slice(data);
        let pad = (4 - (data.len() % 4)) % 4;
        buf.extend(std::iter::repeat(0u8).take(pad));
    }

    /// Append a string, encoded identically to opaque data.
    pub fn write_string(buf: &mut Vec<u8>, s: &str) {
        write_opaque(buf, s.as_bytes());
    }

    /// Read a big-endian `u32`.
    pub fn read_u32(cur: &mut Cursor<&[u8]>) -> Result<u32> {
        cur.read_u32::<BigEndian>().map_err(Error::from)
    }

    /// Read a big-endian `i32`.
    pub fn read_i32(cur: &mut Cursor<&[u8]>) -> Result<i32> {
        cur.read_i32::<BigEndian>().map_err(Error::from)
    }

    /// Read a length-prefixed, 4-byte-padded opaque byte array.
    pub fn read_opaque(cur: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
        let len = read_u32(cur)? as usize;
        let mut data = vec![0u8; len];
        cur.read_exact(&mut data)?;
        let pad = (4 - (len % 4)) % 4;
        let mut discard = vec![0u8; pad];
        cur.read_exact(&mut discard)?;
        Ok(data)
    }
}

/// Read one TCP-record-marking record (one or more fragments) and return
/// the concatenated payload.
pub fn recv_record(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut message = Vec::new();
    loop {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header)?;
        let header = u32::from_be_bytes(header);
        let last = header & 0x8000_0000 != 0;
        let len = (header & 0x7FFF_FFFF) as usize;
        let mut fragment = vec![0u8; len];
        stream.read_exact(&mut fragment)?;
        message.extend_from_slice(&fragment);
        if last {
            break;
        }
    }
    Ok(message)
}

/// Send `payload` as a single last-fragment record.
pub fn send_record(stream: &mut TcpStream, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        Error::Protocol("RPC message too large to fragment as a single record".to_string())
    })?;
    let header = len | 0x8000_0000;
    stream.write_all(&header.to_be_bytes())?;
    stream.write_all(payload)?;
    Ok(())
}

/// A bare ONC RPC client bound to one `(program, version)` pair over one
/// TCP connection.
pub struct RpcClient {
    stream: TcpStream,
    program: u32,
    version: u32,
    xid: u32,
}

impl RpcClient {
    /// Connect to `(host, port)` and seed the xid from the current time,
    /// per the "non-trivial source" guidance of §4.5.
    pub fn connect(host: &str, port: u16, program: u32, version: u32) -> Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_nodelay(true)?;
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        Ok(Self {
            stream,
            program,
            version,
            xid: seed,
        })
    }

    /// Access the underlying stream, e.g. to apply a read timeout for a
    /// particular call.
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Issue `procedure` with pre-encoded XDR `args` and return the
    /// pre-encoded XDR reply data (the bytes following a validated
    /// `ACCEPT_SUCCESS` reply header).
    pub fn call(&mut self, procedure: u32, args: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        self.xid = self.xid.wrapping_add(1);
        let xid = self.xid;

        let mut body = Vec::with_capacity(40 + args.len());
        xdr::write_u32(&mut body, xid);
        xdr::write_u32(&mut body, CALL);
        xdr::write_u32(&mut body, RPC_VERSION);
        xdr::write_u32(&mut body, self.program);
        xdr::write_u32(&mut body, self.version);
        xdr::write_u32(&mut body, procedure);
        // AUTH_NULL credentials and verifier: flavor = 0, length = 0.
        xdr::write_u32(&mut body, 0);
        xdr::write_u32(&mut body, 0);
        xdr::write_u32(&mut body, 0);
        xdr::write_u32(&mut body, 0);
        body.extend_from_slice(args);

        self.stream.set_write_timeout(Some(timeout))?;
        send_record(&mut self.stream, &body)?;

        self.stream.set_read_timeout(Some(timeout))?;
        let reply = recv_record(&mut self.stream)?;
        let mut cur = Cursor::new(reply.as_slice());

        let reply_xid = xdr::read_u32(&mut cur)?;
        if reply_xid != xid {
            return Err(Error::Protocol(format!(
                "RPC xid mismatch: expected {xid}, got {reply_xid}"
            )));
        }
        let msg_type = xdr::read_u32(&mut cur)?;
        if msg_type != REPLY {
            return Err(Error::Protocol(format!(
                "expected RPC REPLY, got message type {msg_type}"
            )));
        }
        let reply_stat = xdr::read_u32(&mut cur)?;
        if reply_stat == MSG_DENIED {
            let rejected_stat = xdr::read_u32(&mut cur)?;
            return Err(Error::Protocol(format!(
                "RPC call rejected (reject_stat={rejected_stat})"
            )));
        }
        if reply_stat != MSG_ACCEPTED {
            return Err(Error::Protocol(format!(
                "unknown RPC reply_stat {reply_stat}"
            )));
        }

        // Verifier: flavor + opaque body, always AUTH_NULL in this client.
        let _verf_flavor = xdr::read_u32(&mut cur)?;
        let _verf = xdr::read_opaque(&mut cur)?;

        let accept_stat = xdr::read_u32(&mut cur)?;
        if accept_stat != ACCEPT_SUCCESS {
            return Err(Error::Protocol(format!(
                "RPC call not accepted (accept_stat={accept_stat})"
            )));
        }

        let start = usize::try_from(cur.position()).unwrap_or(reply.len());
        Ok(reply[start..].to_vec())
    }
}

#[cfg(test)]
mod unit {
    use super::*;

    #[test]
    fn opaque_padding_rounds_up_to_four_bytes() {
        let mut buf = Vec::new();
        xdr::write_opaque(&mut buf, b"abc");
        // 4-byte length + 3 data bytes + 1 pad byte = 8.
        assert_eq!(buf.len(), 8);
        assert_eq!(&buf[4..7], b"abc");
        assert_eq!(buf[7], 0);
    }

    #[test]
    fn opaque_no_padding_needed_on_exact_multiple() {
        let mut buf = Vec::new();
        xdr::write_opaque(&mut buf, b"abcd");
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn opaque_round_trip() {
        let mut buf = Vec::new();
        xdr::write_opaque(&mut buf, b"hello!");
        let mut cur = Cursor::new(buf.as_slice());
        let decoded = xdr::read_opaque(&mut cur).unwrap();
        assert_eq!(decoded, b"hello!");
    }

    #[test]
    fn call_header_layout_is_forty_bytes_with_auth_null() {
        let mut body = Vec::new();
        xdr::write_u32(&mut body, 7); // xid
        xdr::write_u32(&mut body, CALL);
        xdr::write_u32(&mut body, RPC_VERSION);
        xdr::write_u32(&mut body, 0x0006_07AF);
        xdr::write_u32(&mut body, 1);
        xdr::write_u32(&mut body, 10);
        xdr::write_u32(&mut body, 0);
        xdr::write_u32(&mut body, 0);
        xdr::write_u32(&mut body, 0);
        xdr::write_u32(&mut body, 0);
        assert_eq!(body.len(), 40);
        assert_eq!(&body[0..4], &7u32.to_be_bytes());
        assert_eq!(&body[16..20], &0x0006_07AFu32.to_be_bytes());
    }
}
