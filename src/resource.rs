//! The resource-string parser: turns a VISA-style resource string such as
//! `"TCPIP0::192.168.1.50::hislip0::INSTR"` into a typed [`ResourceDescriptor`].
//!
//! Parsing is case-insensitive on keywords (`TCPIP`, `USB`, `ASRL`, `GPIB`,
//! `INSTR`, `SOCKET`, `hislip`) and tolerant of a board index concatenated
//! onto the interface keyword (`TCPIP2`). Payload fields (host, serial,
//! device name) keep whatever case the caller supplied.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// The kind-specific fields of a parsed TCPIP resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpipFields {
    /// Hostname or IP address, unparsed.
    pub host: String,
    /// Port in use. `0` means "use the protocol default" (111 for VXI-11,
    /// 4880 for HiSLIP, 5025 for a raw socket).
    pub port: u16,
    /// VXI-11/HiSLIP device name, e.g. `"inst0"` or `"hislip0"`. Unused when
    /// `is_socket` is set.
    pub device_name: String,
    /// `true` for a `...::SOCKET` resource.
    pub is_socket: bool,
    /// `true` for a `...::hislipN` resource.
    pub is_hislip: bool,
}

/// The kind-specific fields of a parsed USB resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbFields {
    /// USB vendor id.
    pub vendor_id: u16,
    /// USB product id.
    pub product_id: u16,
    /// Serial number string; empty means "any".
    pub serial: String,
    /// USBTMC interface number, if the resource string specified one.
    pub interface_number: Option<u16>,
}

/// The kind-specific field of a parsed ASRL (serial) resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsrlFields {
    /// Serial port number, taken from the board index.
    pub port: u16,
}

/// The kind-specific fields of a parsed GPIB resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpibFields {
    /// Primary GPIB address.
    pub primary: i32,
    /// Secondary GPIB address, or `-1` if none was given.
    pub secondary: i32,
}

/// The interface-specific part of a [`ResourceDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    /// `TCPIP` — LAN instrument: VXI-11, HiSLIP, or a raw socket.
    Tcpip(TcpipFields),
    /// `USB` — USBTMC instrument.
    Usb(UsbFields),
    /// `ASRL` — serial-port instrument.
    Asrl(AsrlFields),
    /// `GPIB` — IEEE-488 instrument via a controller.
    Gpib(GpibFields),
}

/// A fully parsed resource string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    /// Board/interface index, e.g. the `0` in `TCPIP0`.
    pub board: u16,
    /// The interface-specific fields.
    pub kind: ResourceKind,
    /// The original string this descriptor was parsed from.
    pub raw: String,
}

const DEFAULT_VXI11_PORT: u16 = 111;
const DEFAULT_HISLIP_PORT: u16 = 4880;
const DEFAULT_SOCKET_PORT: u16 = 5025;
const DEFAULT_DEVICE_NAME: &str = "inst0";

fn eq_ci(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn starts_with_ci(a: &str, prefix: &str) -> bool {
    a.len() >= prefix.len() && a[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Split a leading token like `"TCPIP0"` into `("TCPIP", 0)`.
fn split_keyword_board(token: &str) -> Result<(String, u16), Error> {
    let digit_start = token
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(token.len());
    let (keyword, board_str) = token.split_at(digit_start);
    if keyword.is_empty() {
        return Err(Error::InvalidResourceName(token.to_string()));
    }
    let board = if board_str.is_empty() {
        0
    } else {
        board_str
            .parse::<u16>()
            .map_err(|_| Error::InvalidResourceName(token.to_string()))?
    };
    Ok((keyword.to_string(), board))
}

/// Parse `0x`-prefixed hex or plain decimal, matching the USB `vid`/`pid`
/// grammar.
fn parse_numeric_field(token: &str) -> Result<u16, Error> {
    if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        u16::from_str_radix(hex, 16).map_err(|_| Error::InvalidResourceName(token.to_string()))
    } else {
        token
            .parse::<u16>()
            .map_err(|_| Error::InvalidResourceName(token.to_string()))
    }
}

fn parse_tcpip(host: &str, suffix: &[&str]) -> Result<TcpipFields, Error> {
    match suffix {
        [] => Ok(TcpipFields {
            host: host.to_string(),
            port: DEFAULT_VXI11_PORT,
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            is_socket: false,
            is_hislip: false,
        }),
        [tok] if eq_ci(tok, "INSTR") => Ok(TcpipFields {
            host: host.to_string(),
            port: DEFAULT_VXI11_PORT,
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            is_socket: false,
            is_hislip: false,
        }),
        [tok] if eq_ci(tok, "SOCKET") => Ok(TcpipFields {
            host: host.to_string(),
            port: DEFAULT_SOCKET_PORT,
            device_name: String::new(),
            is_socket: true,
            is_hislip: false,
        }),
        [tok] if starts_with_ci(tok, "hislip") => Ok(TcpipFields {
            host: host.to_string(),
            port: DEFAULT_HISLIP_PORT,
            device_name: (*tok).to_string(),
            is_socket: false,
            is_hislip: true,
        }),
        [tok] => Ok(TcpipFields {
            host: host.to_string(),
            port: DEFAULT_VXI11_PORT,
            device_name: (*tok).to_string(),
            is_socket: false,
            is_hislip: false,
        }),
        [a, b] if eq_ci(b, "INSTR") => {
            if starts_with_ci(a, "hislip") {
                Ok(TcpipFields {
                    host: host.to_string(),
                    port: DEFAULT_HISLIP_PORT,
                    device_name: (*a).to_string(),
                    is_socket: false,
                    is_hislip: true,
                })
            } else {
                Ok(TcpipFields {
                    host: host.to_string(),
                    port: DEFAULT_VXI11_PORT,
                    device_name: (*a).to_string(),
                    is_socket: false,
                    is_hislip: false,
                })
            }
        }
        [a, b] if eq_ci(b, "SOCKET") => {
            let port = a
                .parse::<u16>()
                .map_err(|_| Error::InvalidResourceName((*a).to_string()))?;
            Ok(TcpipFields {
                host: host.to_string(),
                port,
                device_name: String::new(),
                is_socket: true,
                is_hislip: false,
            })
        }
        other => Err(Error::InvalidResourceName(other.join("::"))),
    }
}

fn parse_usb(tokens: &[&str]) -> Result<UsbFields, Error> {
    let (fields, last) = match tokens {
        [vid, pid, serial, last] => ((*vid, *pid, *serial, None), *last),
        [vid, pid, serial, intf, last] => {
            let intf = intf
                .parse::<u16>()
                .map_err(|_| Error::InvalidResourceName((*intf).to_string()))?;
            ((*vid, *pid, *serial, Some(intf)), *last)
        }
        other => return Err(Error::InvalidResourceName(other.join("::"))),
    };
    if !eq_ci(last, "INSTR") {
        return Err(Error::InvalidResourceName(last.to_string()));
    }
    let (vid, pid, serial, interface_number) = fields;
    Ok(UsbFields {
        vendor_id: parse_numeric_field(vid)?,
        product_id: parse_numeric_field(pid)?,
        serial: serial.to_string(),
        interface_number,
    })
}

fn parse_gpib(tokens: &[&str]) -> Result<GpibFields, Error> {
    match tokens {
        [primary, last] if eq_ci(last, "INSTR") => Ok(GpibFields {
            primary: primary
                .parse::<i32>()
                .map_err(|_| Error::InvalidResourceName((*primary).to_string()))?,
            secondary: -1,
        }),
        [primary, secondary, last] if eq_ci(last, "INSTR") => Ok(GpibFields {
            primary: primary
                .parse::<i32>()
                .map_err(|_| Error::InvalidResourceName((*primary).to_string()))?,
            secondary: secondary
                .parse::<i32>()
                .map_err(|_| Error::InvalidResourceName((*secondary).to_string()))?,
        }),
        other => Err(Error::InvalidResourceName(other.join("::"))),
    }
}

impl FromStr for ResourceDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.to_string();
        let tokens: Vec<&str> = s.split("::").collect();
        let Some((first, rest)) = tokens.split_first() else {
            return Err(Error::InvalidResourceName(raw));
        };
        let (keyword, board) = split_keyword_board(first)?;

        let kind = if eq_ci(&keyword, "TCPIP") {
            let Some((host, suffix)) = rest.split_first() else {
                return Err(Error::InvalidResourceName(raw));
            };
            ResourceKind::Tcpip(parse_tcpip(host, suffix)?)
        } else if eq_ci(&keyword, "USB") {
            ResourceKind::Usb(parse_usb(rest)?)
        } else if eq_ci(&keyword, "ASRL") {
            match rest {
                [last] if eq_ci(last, "INSTR") => ResourceKind::Asrl(AsrlFields { port: board }),
                other => return Err(Error::InvalidResourceName(other.join("::"))),
            }
        } else if eq_ci(&keyword, "GPIB") {
            ResourceKind::Gpib(parse_gpib(rest)?)
        } else {
            return Err(Error::InvalidResourceName(raw));
        };

        Ok(Self { board, kind, raw })
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ResourceKind::Tcpip(t) if t.is_socket => {
                write!(f, "TCPIP{}::{}::{}::SOCKET", self.board, t.host, t.port)
            }
            ResourceKind::Tcpip(t) => {
                write!(f, "TCPIP{}::{}::{}::INSTR", self.board, t.host, t.device_name)
            }
            ResourceKind::Usb(u) => {
                write!(
                    f,
                    "USB{}::0x{:04X}::0x{:04X}::{}",
                    self.board, u.vendor_id, u.product_id, u.serial
                )?;
                if let Some(intf) = u.interface_number {
                    write!(f, "::{intf}")?;
                }
                write!(f, "::INSTR")
            }
            ResourceKind::Asrl(_) => write!(f, "ASRL{}::INSTR", self.board),
            ResourceKind::Gpib(g) if g.secondary >= 0 => {
                write!(f, "GPIB{}::{}::{}::INSTR", self.board, g.primary, g.secondary)
            }
            ResourceKind::Gpib(g) => write!(f, "GPIB{}::{}::INSTR", self.board, g.primary),
        }
    }
}

#[cfg(test)]
mod unit {
    use super::*;

    #[test]
    fn tcpip_socket() {
        let d: ResourceDescriptor = "TCPIP::192.168.1.50::5025::SOCKET".parse().unwrap();
        let ResourceKind::Tcpip(t) = &d.kind else {
            panic!("expected Tcpip");
        };
        assert_eq!(d.board, 0);
        assert_eq!(t.host, "192.168.1.50");
        assert_eq!(t.port, 5025);
        assert!(t.is_socket);
    }

    #[test]
    fn hislip_default() {
        let d: ResourceDescriptor = "TCPIP::192.168.1.50::hislip0".parse().unwrap();
        let ResourceKind::Tcpip(t) = &d.kind else {
            panic!("expected Tcpip");
        };
        assert!(t.is_hislip);
        assert_eq!(t.port, 4880);
        assert_eq!(t.device_name, "hislip0");
    }

    #[test]
    fn vxi11_default() {
        let d: ResourceDescriptor = "TCPIP::192.168.1.50::INSTR".parse().unwrap();
        let ResourceKind::Tcpip(t) = &d.kind else {
            panic!("expected Tcpip");
        };
        assert_eq!(t.device_name, "inst0");
        assert_eq!(t.port, 111);
        assert!(!t.is_socket);
        assert!(!t.is_hislip);
    }

    #[test]
    fn usb_parse() {
        let d: ResourceDescriptor = "USB::0x1234::0x5678::MY_SERIAL::INSTR".parse().unwrap();
        let ResourceKind::Usb(u) = &d.kind else {
            panic!("expected Usb");
        };
        assert_eq!(u.vendor_id, 0x1234);
        assert_eq!(u.product_id, 0x5678);
        assert_eq!(u.serial, "MY_SERIAL");
        assert_eq!(u.interface_number, None);
    }

    #[test]
    fn gpib_secondary() {
        let d: ResourceDescriptor = "GPIB::1::2::INSTR".parse().unwrap();
        let ResourceKind::Gpib(g) = &d.kind else {
            panic!("expected Gpib");
        };
        assert_eq!((g.primary, g.secondary), (1, 2));

        let d: ResourceDescriptor = "GPIB0::22::INSTR".parse().unwrap();
        let ResourceKind::Gpib(g) = &d.kind else {
            panic!("expected Gpib");
        };
        assert_eq!((g.primary, g.secondary), (22, -1));
    }

    #[test]
    fn invalid_resource_name() {
        assert!("FOOBAR::something".parse::<ResourceDescriptor>().is_err());
    }

    #[test]
    fn case_insensitive_keywords() {
        let a: ResourceDescriptor = "tcpip0::192.168.1.50::hislip0".parse().unwrap();
        let b: ResourceDescriptor = "TCPIP0::192.168.1.50::HISLIP0".parse().unwrap();
        assert_eq!(a.kind, b.kind);
        assert_eq!(a.board, b.board);
    }

    #[test]
    fn round_trip_vxi11() {
        let d: ResourceDescriptor = "TCPIP0::192.168.0.1::inst0::INSTR".parse().unwrap();
        let reparsed: ResourceDescriptor = d.to_string().parse().unwrap();
        assert_eq!(d.kind, reparsed.kind);
        assert_eq!(d.board, reparsed.board);
    }

    #[test]
    fn round_trip_socket() {
        let d: ResourceDescriptor = "TCPIP0::192.168.0.1::123::SOCKET".parse().unwrap();
        let reparsed: ResourceDescriptor = d.to_string().parse().unwrap();
        assert_eq!(d.kind, reparsed.kind);
    }

    #[test]
    fn round_trip_usb() {
        let d: ResourceDescriptor = "USB0::0x1234::0x5678::SN1::1::INSTR".parse().unwrap();
        let reparsed: ResourceDescriptor = d.to_string().parse().unwrap();
        assert_eq!(d.kind, reparsed.kind);
    }

    #[test]
    fn round_trip_gpib() {
        let d: ResourceDescriptor = "GPIB0::22::INSTR".parse().unwrap();
        let reparsed: ResourceDescriptor = d.to_string().parse().unwrap();
        assert_eq!(d.kind, reparsed.kind);
    }
}
