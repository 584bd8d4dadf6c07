#![allow(clippy::pedantic)]
//! Integration test: a corrupted tag/complement pair in a USBTMC bulk
//! header is rejected as a protocol error (mapped to `ErrorKind::Io`)
//! rather than silently accepted, matching what `UsbtmcTransport::read`
//! relies on to detect a stale or mismatched reply.

use visa_core::transport::usbtmc::header::{BulkHeader, DEV_DEP_MSG_IN, DEV_DEP_MSG_OUT};
use visa_core::ErrorKind;

#[test]
fn corrupted_tag_complement_is_rejected_as_a_protocol_error() {
    let header = BulkHeader::new(DEV_DEP_MSG_IN, 5, 64, 0x01, 0);
    let mut bytes = header.to_bytes();

    // Simulate wire corruption: the complement byte no longer matches the
    // tag the device claims to be replying to.
    bytes[2] = 0x00;

    let err = BulkHeader::from_bytes(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn mismatched_tag_is_indistinguishable_from_a_stale_reply() {
    // A header that is internally consistent (tag/complement agree) but
    // carries a tag the caller never sent still decodes successfully —
    // the transport, not the header codec, is responsible for comparing
    // the decoded tag against the one it wrote.
    let sent_tag = 9u8;
    let header = BulkHeader::new(DEV_DEP_MSG_OUT, sent_tag.wrapping_add(1), 12, 0x01, 0);
    let bytes = header.to_bytes();
    let decoded = BulkHeader::from_bytes(&bytes).unwrap();
    assert_ne!(decoded.tag, sent_tag);
}

#[test]
fn valid_tag_complement_round_trips() {
    let header = BulkHeader::new(DEV_DEP_MSG_IN, 9, 12, 0x01, 0);
    let bytes = header.to_bytes();
    let decoded = BulkHeader::from_bytes(&bytes).unwrap();
    assert_eq!(decoded.tag, 9);
    assert_eq!(decoded.transfer_size, 12);
}
