//! Serial port enumeration for the discovery engine (§4.8), built on
//! `serialport`'s own cross-platform registry/`/dev` scan.

use tracing::{trace, warn};

/// Enumerate attached serial ports, emitting both the platform device path
/// and, where a trailing port number can be recovered from it, an
/// `ASRLn::INSTR` resource string.
#[must_use]
pub fn discover() -> Vec<String> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            warn!(error = %e, "serial discovery failed to enumerate ports");
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    for port in ports {
        out.push(port.port_name.clone());
        if let Some(index) = trailing_index(&port.port_name) {
            out.push(format!("ASRL{index}::INSTR"));
        }
    }
    trace!(count = out.len(), "serial discovery complete");
    out
}

/// Pull the trailing decimal digits off a device name (`/dev/ttyUSB2` -> 2,
/// `COM3` -> 3); returns `None` when the name has no trailing digits.
fn trailing_index(name: &str) -> Option<u16> {
    let reversed: String = name.chars().rev().take_while(char::is_ascii_digit).collect();
    if reversed.is_empty() {
        return None;
    }
    reversed.chars().rev().collect::<String>().parse().ok()
}

#[cfg(test)]
mod unit {
    use super::*;

    #[test]
    fn trailing_index_extracts_digits() {
        assert_eq!(trailing_index("/dev/ttyUSB2"), Some(2));
        assert_eq!(trailing_index("COM10"), Some(10));
        assert_eq!(trailing_index("/dev/ttyUSB"), None);
    }
}
