#![allow(clippy::pedantic)]
//! Integration test: drive a [`Vxi11Transport`] through its real
//! `Transport` methods (`open`/`write`/`read`/`close`) against a mock
//! portmapper plus a mock VXI-11 CORE server implementing
//! `CREATE_LINK`/`DEVICE_WRITE`/`DEVICE_READ`/`DESTROY_LINK`, exercising the
//! chunking, END-flag, and `reason`-bit read-termination logic in
//! `src/transport/vxi11/mod.rs` end to end.

use std::io::Cursor;
use std::net::{TcpListener, TcpStream};
use std::thread;

use visa_core::resource::TcpipFields;
use visa_core::transport::vxi11::sunrpc::{self, xdr};
use visa_core::transport::vxi11::Vxi11Transport;
use visa_core::transport::{TerminatorStatus, Transport};

const PORTMAP_GETPORT: u32 = 3;
const PROC_CREATE_LINK: u32 = 10;
const PROC_DEVICE_WRITE: u32 = 11;
const PROC_DEVICE_READ: u32 = 12;
const PROC_DESTROY_LINK: u32 = 23;

/// Decode one incoming RPC call, returning `(xid, procedure, args_bytes)`.
fn read_call(stream: &mut TcpStream) -> (u32, u32, Vec<u8>) {
    let record = sunrpc::recv_record(stream).unwrap();
    let mut cur = Cursor::new(record.as_slice());
    let xid = xdr::read_u32(&mut cur).unwrap();
    let _call = xdr::read_u32(&mut cur).unwrap();
    let _rpcvers = xdr::read_u32(&mut cur).unwrap();
    let _program = xdr::read_u32(&mut cur).unwrap();
    let _version = xdr::read_u32(&mut cur).unwrap();
    let procedure = xdr::read_u32(&mut cur).unwrap();
    let _cred_flavor = xdr::read_u32(&mut cur).unwrap();
    let _cred_len = xdr::read_u32(&mut cur).unwrap();
    let _verf_flavor = xdr::read_u32(&mut cur).unwrap();
    let _verf_len = xdr::read_u32(&mut cur).unwrap();
    let start = usize::try_from(cur.position()).unwrap();
    (xid, procedure, record[start..].to_vec())
}

fn write_reply(stream: &mut TcpStream, xid: u32, body: &[u8]) {
    let mut reply = Vec::new();
    xdr::write_u32(&mut reply, xid);
    xdr::write_u32(&mut reply, 1); // REPLY
    xdr::write_u32(&mut reply, 0); // MSG_ACCEPTED
    xdr::write_u32(&mut reply, 0); // verifier flavor = AUTH_NULL
    xdr::write_opaque(&mut reply, &[]); // verifier body
    xdr::write_u32(&mut reply, 0); // ACCEPT_SUCCESS
    reply.extend_from_slice(body);
    sunrpc::send_record(stream, &reply).unwrap();
}

#[test]
fn vxi11_transport_round_trip_through_mock_server() {
    let core_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let core_port = core_listener.local_addr().unwrap().port();

    // Vxi11Transport::open always bootstraps through the portmapper on
    // 127.0.0.1:111, so the mock portmapper must bind that well-known port.
    let portmap_listener = TcpListener::bind("127.0.0.1:111").unwrap();

    let portmap_server = thread::spawn(move || {
        let (mut stream, _) = portmap_listener.accept().unwrap();
        let (xid, procedure, _args) = read_call(&mut stream);
        assert_eq!(procedure, PORTMAP_GETPORT);
        let mut body = Vec::new();
        xdr::write_u32(&mut body, u32::from(core_port));
        write_reply(&mut stream, xid, &body);
    });

    let core_server = thread::spawn(move || {
        let (mut stream, _) = core_listener.accept().unwrap();

        let (xid, procedure, _args) = read_call(&mut stream);
        assert_eq!(procedure, PROC_CREATE_LINK);
        let mut body = Vec::new();
        xdr::write_u32(&mut body, 0); // error
        xdr::write_u32(&mut body, 7); // link id
        xdr::write_u32(&mut body, 0); // abort port
        xdr::write_u32(&mut body, 1024); // maxRecvSize
        write_reply(&mut stream, xid, &body);

        let (xid, procedure, args) = read_call(&mut stream);
        assert_eq!(procedure, PROC_DEVICE_WRITE);
        let mut cur = Cursor::new(args.as_slice());
        let link_id = xdr::read_u32(&mut cur).unwrap();
        assert_eq!(link_id, 7);
        let _io_timeout = xdr::read_u32(&mut cur).unwrap();
        let _lock_timeout = xdr::read_u32(&mut cur).unwrap();
        let flags = xdr::read_u32(&mut cur).unwrap();
        assert_eq!(flags, 0x08, "END must be set on the only (last) chunk");
        let data = xdr::read_opaque(&mut cur).unwrap();
        assert_eq!(data, b"*IDN?\n");
        let mut body = Vec::new();
        xdr::write_u32(&mut body, 0); // error
        xdr::write_u32(&mut body, u32::try_from(data.len()).unwrap()); // size_written
        write_reply(&mut stream, xid, &body);

        let (xid, procedure, _args) = read_call(&mut stream);
        assert_eq!(procedure, PROC_DEVICE_READ);
        let mut body = Vec::new();
        xdr::write_u32(&mut body, 0); // error
        xdr::write_u32(&mut body, 4); // reason = END
        xdr::write_opaque(&mut body, b"ACME,MODEL,1,1.0\n");
        write_reply(&mut stream, xid, &body);

        let (xid, procedure, _args) = read_call(&mut stream);
        assert_eq!(procedure, PROC_DESTROY_LINK);
        write_reply(&mut stream, xid, &[]);
    });

    let fields = TcpipFields {
        host: "127.0.0.1".to_string(),
        port: 0,
        device_name: "inst0".to_string(),
        is_socket: false,
        is_hislip: false,
    };
    let mut transport = Vxi11Transport::new(fields);

    transport.open(2000).unwrap();

    let written = transport.write(b"*IDN?\n").unwrap();
    assert_eq!(written, 6);

    let mut buf = [0u8; 64];
    let (n, status) = transport.read(&mut buf, 2000).unwrap();
    assert_eq!(&buf[..n], b"ACME,MODEL,1,1.0\n");
    assert_eq!(status, TerminatorStatus::TermChar);

    transport.close().unwrap();

    portmap_server.join().unwrap();
    core_server.join().unwrap();
}
