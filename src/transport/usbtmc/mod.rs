//! USBTMC/USB488 transport (§4.7): bulk-endpoint framed protocol with a
//! class-specific control-transfer side band, built directly on `rusb`.

pub mod header;

use std::time::{Duration, Instant};

use rusb::{Context, Device, DeviceHandle, Direction, TransferType, UsbContext};

use header::{pad_to_four_bytes, BulkHeader, ATTR_EOM, DEV_DEP_MSG_IN, DEV_DEP_MSG_OUT, HEADER_LEN, REQUEST_DEV_DEP_MSG_IN};

use crate::error::{Error, Result};
use crate::resource::UsbFields;

use super::{TerminatorStatus, Transport};

const USBTMC_CLASS: u8 = 0xFE;
const USBTMC_SUBCLASS: u8 = 0x03;

const REQ_GET_CAPABILITIES: u8 = 7;
const REQ_READ_STATUS_BYTE: u8 = 128;
const REQ_INITIATE_CLEAR: u8 = 5;
const REQ_CHECK_CLEAR_STATUS: u8 = 6;

const CLEAR_STATUS_SUCCESS: u8 = 0;
const CLEAR_STATUS_PENDING: u8 = 1;

const DEFAULT_IO_TIMEOUT_MS: u64 = 2000;
const CLEAR_TIMEOUT_MS: u64 = 5000;

/// Locate the bulk-IN and bulk-OUT endpoints and alt-setting of the
/// USBTMC interface on `device`, per §4.7's enumeration rule.
fn find_usbtmc_interface(
    device: &Device<Context>,
    wanted_interface: Option<u16>,
) -> Result<(u8, u8, u8, u8)> {
    let descriptor = device
        .device_descriptor()
        .map_err(|e| Error::ResourceNotFound(e.to_string()))?;

    for config_index in 0..descriptor.num_configurations() {
        let Ok(config) = device.config_descriptor(config_index) else {
            continue;
        };
        for interface in config.interfaces() {
            for alt in interface.descriptors() {
                if alt.class_code() != USBTMC_CLASS || alt.sub_class_code() != USBTMC_SUBCLASS {
                    continue;
                }
                if let Some(want) = wanted_interface {
                    if u16::from(alt.interface_number()) != want {
                        continue;
                    }
                }
                let mut out_ep = None;
                let mut in_ep = None;
                for ep in alt.endpoint_descriptors() {
                    if ep.transfer_type() != TransferType::Bulk {
                        continue;
                    }
                    match ep.direction() {
                        Direction::Out if out_ep.is_none() => out_ep = Some(ep.address()),
                        Direction::In if in_ep.is_none() => in_ep = Some(ep.address()),
                        _ => {}
                    }
                }
                if let (Some(out_ep), Some(in_ep)) = (out_ep, in_ep) {
                    return Ok((alt.interface_number(), alt.setting_number(), out_ep, in_ep));
                }
            }
        }
    }
    Err(Error::ResourceNotFound(
        "no USBTMC bulk interface found on matched device".to_string(),
    ))
}

/// USBTMC transport state.
pub struct UsbtmcTransport {
    fields: UsbFields,
    handle: Option<DeviceHandle<Context>>,
    interface_number: u8,
    out_ep: u8,
    in_ep: u8,
    tag: u8,
    usb488_status_byte_supported: bool,
}

impl UsbtmcTransport {
    /// Build a transport for `fields`; no USB I/O occurs until
    /// [`Transport::open`].
    #[must_use]
    pub const fn new(fields: UsbFields) -> Self {
        Self {
            fields,
            handle: None,
            interface_number: 0,
            out_ep: 0,
            in_ep: 0,
            tag: 0,
            usb488_status_byte_supported: false,
        }
    }

    fn next_tag(&mut self) -> u8 {
        self.tag = if self.tag == 255 { 1 } else { self.tag + 1 };
        self.tag
    }

    fn handle_mut(&mut self) -> Result<&mut DeviceHandle<Context>> {
        self.handle
            .as_mut()
            .ok_or_else(|| Error::ConnectionLost("USB device is not open".to_string()))
    }

    fn find_device(&self, context: &Context) -> Result<Device<Context>> {
        for device in context
            .devices()
            .map_err(|e| Error::Io { source: std::io::Error::other(e.to_string()) })?
            .iter()
        {
            let Ok(descriptor) = device.device_descriptor() else {
                continue;
            };
            if descriptor.vendor_id() != self.fields.vendor_id
                || descriptor.product_id() != self.fields.product_id
            {
                continue;
            }
            if !self.fields.serial.is_empty() {
                let Ok(handle) = device.open() else {
                    continue;
                };
                let matches = handle
                    .read_serial_number_string_ascii(&descriptor, Duration::from_millis(500))
                    .map(|serial| serial == self.fields.serial)
                    .unwrap_or(false);
                if !matches {
                    continue;
                }
            }
            return Ok(device);
        }
        Err(Error::ResourceNotFound(format!(
            "no USB device matching vid=0x{:04X} pid=0x{:04X}",
            self.fields.vendor_id, self.fields.product_id
        )))
    }
}

impl Transport for UsbtmcTransport {
    fn open(&mut self, _open_timeout_ms: u64) -> Result<()> {
        let context = Context::new().map_err(|e| Error::NotSupported(e.to_string()))?;
        let device = self.find_device(&context)?;
        let (interface_number, _alt_setting, out_ep, in_ep) =
            find_usbtmc_interface(&device, self.fields.interface_number)?;

        let mut handle = device
            .open()
            .map_err(|e| Error::ResourceLocked(e.to_string()))?;

        if handle.kernel_driver_active(interface_number).unwrap_or(false) {
            let _ = handle.detach_kernel_driver(interface_number);
        }
        handle
            .claim_interface(interface_number)
            .map_err(|e| Error::ResourceLocked(e.to_string()))?;

        self.interface_number = interface_number;
        self.out_ep = out_ep;
        self.in_ep = in_ep;

        // Best-effort capability probe; failure leaves capability bits
        // cleared and the open still succeeds, per §7's recovery rule.
        let mut caps = [0u8; 24];
        let request_type = rusb::request_type(
            rusb::Direction::In,
            rusb::RequestType::Class,
            rusb::Recipient::Interface,
        );
        if handle
            .read_control(
                request_type,
                REQ_GET_CAPABILITIES,
                0,
                u16::from(interface_number),
                &mut caps,
                Duration::from_millis(500),
            )
            .is_ok()
        {
            self.usb488_status_byte_supported = caps.get(5).is_some_and(|b| b & 0x04 != 0);
        }

        self.handle = Some(handle);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            let _ = handle.release_interface(self.interface_number);
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let tag = self.next_tag();
        let out_ep = self.out_ep;
        let handle = self.handle_mut()?;

        let mut packet = BulkHeader::new(
            DEV_DEP_MSG_OUT,
            tag,
            u32::try_from(data.len()).unwrap_or(u32::MAX),
            ATTR_EOM,
            0,
        )
        .to_bytes()
        .to_vec();
        packet.extend_from_slice(data);
        pad_to_four_bytes(&mut packet);

        let written = handle
            .write_bulk(out_ep, &packet, Duration::from_millis(DEFAULT_IO_TIMEOUT_MS))
            .map_err(|e| Error::Protocol(e.to_string()))?;
        Ok(written.saturating_sub(HEADER_LEN).min(data.len()))
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<(usize, TerminatorStatus)> {
        let tag = self.next_tag();
        let out_ep = self.out_ep;
        let in_ep = self.in_ep;
        let timeout = Duration::from_millis(timeout_ms.max(1));
        let handle = self.handle_mut()?;

        let request = BulkHeader::new(
            REQUEST_DEV_DEP_MSG_IN,
            tag,
            u32::try_from(buf.len()).unwrap_or(u32::MAX),
            0,
            0,
        )
        .to_bytes();
        handle
            .write_bulk(out_ep, &request, timeout)
            .map_err(|e| Error::Protocol(e.to_string()))?;

        let mut packet = vec![0u8; HEADER_LEN + buf.len()];
        let n = handle
            .read_bulk(in_ep, &mut packet, timeout)
            .map_err(|e| Error::Protocol(e.to_string()))?;
        if n < HEADER_LEN {
            return Err(Error::Protocol("USBTMC bulk-IN reply truncated".to_string()));
        }
        let header = BulkHeader::from_bytes(&packet[..HEADER_LEN])?;
        if header.msg_id != DEV_DEP_MSG_IN || header.tag != tag {
            return Err(Error::Protocol(format!(
                "USBTMC reply tag mismatch: expected {tag}, got {}",
                header.tag
            )));
        }
        let payload_len = (header.transfer_size as usize)
            .min(n - HEADER_LEN)
            .min(buf.len());
        buf[..payload_len].copy_from_slice(&packet[HEADER_LEN..HEADER_LEN + payload_len]);

        let eom = header.attributes & ATTR_EOM != 0;
        let status = if eom {
            TerminatorStatus::TermChar
        } else {
            TerminatorStatus::MaxCount
        };
        Ok((payload_len, status))
    }

    fn read_status(&mut self) -> Result<u8> {
        if !self.usb488_status_byte_supported {
            return Err(Error::NotSupported(
                "device did not advertise USB488 status-byte support in GET_CAPABILITIES"
                    .to_string(),
            ));
        }

        let tag = self.next_tag();
        let interface_number = self.interface_number;
        let handle = self.handle_mut()?;

        let request_type = rusb::request_type(
            rusb::Direction::In,
            rusb::RequestType::Class,
            rusb::Recipient::Interface,
        );
        let mut resp = [0u8; 3];
        let n = handle
            .read_control(
                request_type,
                REQ_READ_STATUS_BYTE,
                u16::from(tag),
                u16::from(interface_number),
                &mut resp,
                Duration::from_millis(DEFAULT_IO_TIMEOUT_MS),
            )
            .map_err(|e| Error::Protocol(e.to_string()))?;

        match n {
            3 => {
                if resp[0] != 0 {
                    return Err(Error::Protocol(format!(
                        "USBTMC READ_STATUS_BYTE failed with status {}",
                        resp[0]
                    )));
                }
                Ok(resp[2])
            }
            2 => {
                if resp[0] != 0 {
                    return Err(Error::Protocol(format!(
                        "USBTMC READ_STATUS_BYTE failed with status {}",
                        resp[0]
                    )));
                }
                Ok(resp[1])
            }
            other => Err(Error::Protocol(format!(
                "unexpected READ_STATUS_BYTE response length {other}"
            ))),
        }
    }

    fn clear(&mut self) -> Result<()> {
        let interface_number = self.interface_number;
        let in_ep = self.in_ep;
        let handle = self.handle_mut()?;

        let out_request_type = rusb::request_type(
            rusb::Direction::Out,
            rusb::RequestType::Class,
            rusb::Recipient::Interface,
        );
        handle
            .write_control(
                out_request_type,
                REQ_INITIATE_CLEAR,
                0,
                u16::from(interface_number),
                &[],
                Duration::from_millis(DEFAULT_IO_TIMEOUT_MS),
            )
            .map_err(|e| Error::Protocol(e.to_string()))?;

        let in_request_type = rusb::request_type(
            rusb::Direction::In,
            rusb::RequestType::Class,
            rusb::Recipient::Interface,
        );
        let deadline = Instant::now() + Duration::from_millis(CLEAR_TIMEOUT_MS);
        loop {
            let mut resp = [0u8; 2];
            handle
                .read_control(
                    in_request_type,
                    REQ_CHECK_CLEAR_STATUS,
                    0,
                    u16::from(interface_number),
                    &mut resp,
                    Duration::from_millis(500),
                )
                .map_err(|e| Error::Protocol(e.to_string()))?;
            match resp[0] {
                CLEAR_STATUS_SUCCESS => break,
                CLEAR_STATUS_PENDING => {
                    if Instant::now() >= deadline {
                        return Err(Error::Timeout(Duration::from_millis(CLEAR_TIMEOUT_MS)));
                    }
                    if resp[1] & 0x01 != 0 {
                        let mut drain = [0u8; 64];
                        let _ = handle.read_bulk(in_ep, &mut drain, Duration::from_millis(100));
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "USBTMC CHECK_CLEAR_STATUS returned {other}"
                    )))
                }
            }
        }

        let mut drain = [0u8; 64];
        let _ = handle.read_bulk(in_ep, &mut drain, Duration::from_millis(50));
        Ok(())
    }
}
