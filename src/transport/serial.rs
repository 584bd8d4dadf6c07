//! Serial transport (§4.4): an RS-232 byte stream with newline termination,
//! built on `serialport`.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use tracing::trace;

use crate::error::{Error, Result};
use crate::resource::AsrlFields;
use crate::session::{self, SessionAttributes};

use super::{TerminatorStatus, Transport};

const fn to_data_bits(bits: session::DataBits) -> serialport::DataBits {
    match bits {
        session::DataBits::Five => serialport::DataBits::Five,
        session::DataBits::Six => serialport::DataBits::Six,
        session::DataBits::Seven => serialport::DataBits::Seven,
        session::DataBits::Eight => serialport::DataBits::Eight,
    }
}

const fn to_stop_bits(bits: session::StopBits) -> serialport::StopBits {
    match bits {
        session::StopBits::One => serialport::StopBits::One,
        session::StopBits::Two => serialport::StopBits::Two,
    }
}

const fn to_parity(parity: session::Parity) -> serialport::Parity {
    match parity {
        session::Parity::None => serialport::Parity::None,
        session::Parity::Odd => serialport::Parity::Odd,
        session::Parity::Even => serialport::Parity::Even,
    }
}

/// Derive the platform device name for an `ASRLn` board index (§4.4).
#[must_use]
#[cfg(target_os = "linux")]
fn device_name(port: u16) -> String {
    format!("/dev/ttyS{}", port.saturating_sub(1))
}

#[must_use]
#[cfg(target_os = "windows")]
fn device_name(port: u16) -> String {
    if port > 9 {
        format!("\\\\.\\COM{port}")
    } else {
        format!("COM{port}")
    }
}

#[must_use]
#[cfg(not(any(target_os = "linux", target_os = "windows")))]
fn device_name(port: u16) -> String {
    format!("/dev/cu.usbserial{port}")
}

/// A serial-port transport.
pub struct SerialTransport {
    fields: AsrlFields,
    port: Option<Box<dyn SerialPort>>,
    baud_rate: u32,
    data_bits: serialport::DataBits,
    stop_bits: serialport::StopBits,
    parity: serialport::Parity,
}

impl SerialTransport {
    /// Build a transport for `fields`, seeding its line parameters from
    /// `attributes` (§4.4: baud/data-bits/stop-bits/parity are "all
    /// overridable via attributes"). The port is not opened until
    /// [`Transport::open`].
    #[must_use]
    pub fn new(fields: AsrlFields, attributes: SessionAttributes) -> Self {
        Self {
            fields,
            port: None,
            baud_rate: attributes.baud_rate,
            data_bits: to_data_bits(attributes.data_bits),
            stop_bits: to_stop_bits(attributes.stop_bits),
            parity: to_parity(attributes.parity),
        }
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| Error::ConnectionLost("serial port is not open".to_string()))
    }
}

impl Transport for SerialTransport {
    fn open(&mut self, open_timeout_ms: u64) -> Result<()> {
        let name = device_name(self.fields.port);
        let port = serialport::new(&name, self.baud_rate)
            .data_bits(self.data_bits)
            .stop_bits(self.stop_bits)
            .parity(self.parity)
            .timeout(Duration::from_millis(open_timeout_ms.max(1)))
            .open()
            .map_err(|e| Error::ResourceNotFound(format!("{name}: {e}")))?;
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.port = None;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        trace!(bytes = data.len(), "writing to serial transport");
        let port = self.port_mut()?;
        port.write_all(data)?;
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<(usize, TerminatorStatus)> {
        let port = self.port_mut()?;
        port.set_timeout(Duration::from_millis(timeout_ms.max(1)))
            .map_err(|e| Error::Protocol(e.to_string()))?;

        let mut total = 0usize;
        while total < buf.len() {
            let n = port.read(&mut buf[total..])?;
            if n == 0 {
                return Err(Error::ConnectionLost("serial port closed".to_string()));
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
        let port = self.port_mut()?;
        port.clear(serialport::ClearBuffer::All)
            .map_err(|e| Error::Protocol(e.to_string()))?;
        Ok(())
    }

    fn reconfigure(&mut self, attributes: &SessionAttributes) -> Result<()> {
        self.baud_rate = attributes.baud_rate;
        self.data_bits = to_data_bits(attributes.data_bits);
        self.stop_bits = to_stop_bits(attributes.stop_bits);
        self.parity = to_parity(attributes.parity);

        if let Some(port) = self.port.as_mut() {
            port.set_baud_rate(self.baud_rate)
                .map_err(|e| Error::Protocol(e.to_string()))?;
            port.set_data_bits(self.data_bits)
                .map_err(|e| Error::Protocol(e.to_string()))?;
            port.set_stop_bits(self.stop_bits)
                .map_err(|e| Error::Protocol(e.to_string()))?;
            port.set_parity(self.parity)
                .map_err(|e| Error::Protocol(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod unit {
    use super::*;

    #[test]
    #[cfg(target_os = "linux")]
    fn linux_device_name_is_board_index_minus_one() {
        assert_eq!(device_name(1), "/dev/ttyS0");
        assert_eq!(device_name(3), "/dev/ttyS2");
    }

    #[test]
    #[cfg(target_os = "windows")]
    fn windows_device_name_uses_long_path_prefix_above_nine() {
        assert_eq!(device_name(4), "COM4");
        assert_eq!(device_name(9), "COM9");
        assert_eq!(device_name(10), "\\\\.\\COM10");
    }
}
