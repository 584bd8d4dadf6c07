#![allow(clippy::pedantic)]
//! Integration test: a mock dual-channel HiSLIP server and the full
//! `Initialize`/`AsyncInitialize` handshake — exactly four messages across
//! two channels, in order.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use visa_core::resource::TcpipFields;
use visa_core::transport::hislip::HiSlipTransport;
use visa_core::transport::Transport;

fn read_header(stream: &mut TcpStream) -> ([u8; 16], Vec<u8>) {
    let mut header = [0u8; 16];
    stream.read_exact(&mut header).unwrap();
    let payload_len = u64::from_be_bytes(header[8..16].try_into().unwrap());
    let mut payload = vec![0u8; usize::try_from(payload_len).unwrap()];
    stream.read_exact(&mut payload).unwrap();
    (header, payload)
}

fn send_header(stream: &mut TcpStream, message_type: u8, control_code: u8, parameter: u32, payload: &[u8]) {
    let mut message = Vec::with_capacity(16 + payload.len());
    message.extend_from_slice(b"HS");
    message.push(message_type);
    message.push(control_code);
    message.extend_from_slice(&parameter.to_be_bytes());
    message.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    message.extend_from_slice(payload);
    stream.write_all(&message).unwrap();
}

#[test]
fn hislip_handshake_is_four_messages_across_two_channels() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    const SESSION_ID: u32 = 0x4442;

    let server = thread::spawn(move || {
        let (mut sync, _) = listener.accept().unwrap();
        let (header, payload) = read_header(&mut sync);
        assert_eq!(header[2], 0, "first message on the sync channel must be Initialize");
        assert_eq!(&payload, b"hislip0");
        send_header(&mut sync, 1, 0, SESSION_ID, &[]); // InitializeResponse

        let (mut asyn, _) = listener.accept().unwrap();
        let (header, _payload) = read_header(&mut asyn);
        assert_eq!(header[2], 17, "first message on the async channel must be AsyncInitialize");
        let parameter = u32::from_be_bytes(header[4..8].try_into().unwrap());
        assert_eq!(parameter & 0xFFFF, SESSION_ID, "AsyncInitialize must echo the session id");
        send_header(&mut asyn, 18, 0, 0, &[]); // AsyncInitializeResponse
    });

    let fields = TcpipFields {
        host: "127.0.0.1".to_string(),
        port,
        device_name: "hislip0".to_string(),
        is_socket: false,
        is_hislip: true,
    };
    let mut transport = HiSlipTransport::new(fields);
    transport.open(2000).unwrap();
    transport.close().unwrap();

    server.join().unwrap();
}
