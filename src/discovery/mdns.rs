//! mDNS-based LAN instrument discovery (§4.8): PTR queries for
//! `_lxi._tcp.local` and `_hislip._tcp.local`, with a hand-rolled,
//! compression-aware DNS message parser.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

const MDNS_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
const MDNS_PORT: u16 = 5353;
/// How long to keep listening for replies after sending the queries.
const QUERY_WINDOW: Duration = Duration::from_millis(2500);
/// Refuse to follow more than this many compression pointers per name;
/// guards against a malicious or corrupt packet looping forever.
const MAX_POINTER_JUMPS: usize = 16;

const DNS_TYPE_A: u16 = 1;
const DNS_TYPE_PTR: u16 = 12;
const DNS_TYPE_SRV: u16 = 33;
const DNS_CLASS_IN: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceKind {
    Lxi,
    HiSlip,
}

impl ServiceKind {
    const fn service_name(self) -> &'static str {
        match self {
            Self::Lxi => "_lxi._tcp.local",
            Self::HiSlip => "_hislip._tcp.local",
        }
    }
}

/// Encode `name` as a sequence of length-prefixed labels terminated by a
/// zero byte; mDNS queries never use compression on the way out.
fn encode_name(name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for label in name.split('.') {
        if label.is_empty() {
            continue;
        }
        out.push(u8::try_from(label.len()).unwrap_or(63).min(63));
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out
}

fn build_query(service: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(32);
    packet.extend_from_slice(&0u16.to_be_bytes()); // ID
    packet.extend_from_slice(&0u16.to_be_bytes()); // flags: standard query
    packet.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT
    packet.extend(encode_name(service));
    packet.extend_from_slice(&DNS_TYPE_PTR.to_be_bytes());
    packet.extend_from_slice(&DNS_CLASS_IN.to_be_bytes());
    packet
}

/// Read a (possibly compressed) domain name starting at `pos`, returning
/// the decoded name and the offset just past its on-the-wire encoding
/// (i.e. not following any pointer it contained).
fn read_name(buf: &[u8], start: usize) -> Result<(String, usize)> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = start;
    let mut return_pos: Option<usize> = None;
    let mut jumps = 0usize;

    loop {
        let len = *buf
            .get(pos)
            .ok_or_else(|| Error::Protocol("mDNS name ran past end of packet".to_string()))?;

        if len == 0 {
            pos += 1;
            if return_pos.is_none() {
                return_pos = Some(pos);
            }
            break;
        }

        if len & 0xC0 == 0xC0 {
            let lo = *buf
                .get(pos + 1)
                .ok_or_else(|| Error::Protocol("truncated mDNS compression pointer".to_string()))?;
            if return_pos.is_none() {
                return_pos = Some(pos + 2);
            }
            jumps += 1;
            if jumps > MAX_POINTER_JUMPS {
                return Err(Error::Protocol(
                    "mDNS name exceeded the compression pointer jump limit".to_string(),
                ));
            }
            pos = ((usize::from(len) & 0x3F) << 8) | usize::from(lo);
            continue;
        }

        let label_start = pos + 1;
        let label_end = label_start + usize::from(len);
        let label = buf
            .get(label_start..label_end)
            .ok_or_else(|| Error::Protocol("mDNS label ran past end of packet".to_string()))?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        pos = label_end;
    }

    Ok((labels.join("."), return_pos.unwrap_or(pos)))
}

#[derive(Default)]
struct Resolved {
    host: Option<String>,
    port: Option<u16>,
}

/// Parse one mDNS response, merging PTR/SRV/A records into `instances`
/// (keyed by service-instance name) and `hosts` (keyed by hostname).
fn parse_response(
    buf: &[u8],
    wanted: &[(ServiceKind, &str)],
    instances: &mut HashMap<String, (ServiceKind, Resolved)>,
    hosts: &mut HashMap<String, Ipv4Addr>,
) -> Result<()> {
    if buf.len() < 12 {
        return Err(Error::Protocol("mDNS response shorter than a header".to_string()));
    }
    let qdcount = u16::from_be_bytes([buf[4], buf[5]]);
    let ancount = u16::from_be_bytes([buf[6], buf[7]]);
    let nscount = u16::from_be_bytes([buf[8], buf[9]]);
    let arcount = u16::from_be_bytes([buf[10], buf[11]]);

    let mut pos = 12usize;
    for _ in 0..qdcount {
        let (_name, next) = read_name(buf, pos)?;
        pos = next + 4; // QTYPE + QCLASS
    }

    let total_records = usize::from(ancount) + usize::from(nscount) + usize::from(arcount);
    for _ in 0..total_records {
        let (name, next) = read_name(buf, pos)?;
        pos = next;
        let rr_header = buf
            .get(pos..pos + 10)
            .ok_or_else(|| Error::Protocol("truncated mDNS resource record header".to_string()))?;
        let rtype = u16::from_be_bytes([rr_header[0], rr_header[1]]);
        let rdlength = u16::from_be_bytes([rr_header[8], rr_header[9]]) as usize;
        let rdata_start = pos + 10;
        let rdata_end = rdata_start + rdlength;
        let rdata = buf
            .get(rdata_start..rdata_end)
            .ok_or_else(|| Error::Protocol("truncated mDNS resource record data".to_string()))?;

        match rtype {
            DNS_TYPE_PTR => {
                if let Some((kind, _)) = wanted.iter().find(|(_, svc)| svc.eq_ignore_ascii_case(&name)) {
                    let (instance, _) = read_name(buf, rdata_start)?;
                    instances.entry(instance).or_insert_with(|| (*kind, Resolved::default()));
                }
            }
            DNS_TYPE_SRV => {
                if rdata.len() >= 6 {
                    let port = u16::from_be_bytes([rdata[4], rdata[5]]);
                    let (target, _) = read_name(buf, rdata_start + 6)?;
                    if let Some((_, resolved)) = instances.get_mut(&name) {
                        resolved.host = Some(target);
                        resolved.port = Some(port);
                    }
                }
            }
            DNS_TYPE_A => {
                if rdata.len() == 4 {
                    hosts.insert(name, Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]));
                }
            }
            _ => {}
        }

        pos = rdata_end;
    }

    Ok(())
}

/// Run one mDNS discovery pass, returning resource strings for every
/// instrument resolved within the query window.
#[must_use]
pub fn discover() -> Vec<String> {
    match discover_inner() {
        Ok(resources) => resources,
        Err(e) => {
            warn!(error = %e, "mDNS discovery failed, returning no results");
            Vec::new()
        }
    }
}

fn discover_inner() -> Result<Vec<String>> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, MDNS_PORT))?;
    socket.join_multicast_v4(&MDNS_ADDR, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_multicast_loop_v4(false)?;
    socket.set_multicast_ttl_v4(255)?;
    socket.set_read_timeout(Some(Duration::from_millis(200)))?;

    let wanted = [
        (ServiceKind::Lxi, ServiceKind::Lxi.service_name()),
        (ServiceKind::HiSlip, ServiceKind::HiSlip.service_name()),
    ];
    let dest = SocketAddrV4::new(MDNS_ADDR, MDNS_PORT);
    for (_, service) in &wanted {
        let query = build_query(service);
        socket.send_to(&query, dest)?;
    }

    let mut instances: HashMap<String, (ServiceKind, Resolved)> = HashMap::new();
    let mut hosts: HashMap<String, Ipv4Addr> = HashMap::new();

    let deadline = Instant::now() + QUERY_WINDOW;
    let mut buf = [0u8; 4096];
    while Instant::now() < deadline {
        match socket.recv_from(&mut buf) {
            Ok((n, _from)) => {
                if let Err(e) = parse_response(&buf[..n], &wanted, &mut instances, &mut hosts) {
                    trace!(error = %e, "discarding unparseable mDNS response");
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let mut out = Vec::new();
    for (kind, resolved) in instances.values() {
        let Some(host) = resolved.host.as_deref() else {
            continue;
        };
        let Some(ip) = hosts.get(host) else {
            continue;
        };
        match kind {
            ServiceKind::HiSlip => out.push(format!("TCPIP0::{ip}::hislip0::INSTR")),
            ServiceKind::Lxi => {
                out.push(format!("TCPIP0::{ip}::inst0::INSTR"));
                if let Some(port) = resolved.port {
                    out.push(format!("TCPIP0::{ip}::{port}::SOCKET"));
                }
            }
        }
    }
    debug!(count = out.len(), "mDNS discovery complete");
    Ok(out)
}

#[cfg(test)]
mod unit {
    use super::*;

    #[test]
    fn name_round_trips_without_compression() {
        let encoded = encode_name("_lxi._tcp.local");
        let mut packet = vec![0u8; 12];
        packet.extend(&encoded);
        let (decoded, next) = read_name(&packet, 12).unwrap();
        assert_eq!(decoded, "_lxi._tcp.local");
        assert_eq!(next, packet.len());
    }

    #[test]
    fn name_follows_a_single_compression_pointer() {
        let mut packet = vec![0u8; 12];
        packet.extend(encode_name("local"));
        let target_offset = 12u16;
        packet.push(0xC0);
        packet.push(target_offset as u8);
        let (decoded, _) = read_name(&packet, packet.len() - 2).unwrap();
        assert_eq!(decoded, "local");
    }

    #[test]
    fn name_rejects_a_pointer_loop() {
        // Offset 12 points right back at itself: an infinite loop if
        // unbounded.
        let mut packet = vec![0u8; 12];
        packet.push(0xC0);
        packet.push(12);
        assert!(read_name(&packet, 12).is_err());
    }
}
