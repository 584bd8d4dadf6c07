//! USBTMC device enumeration for the discovery engine (§4.8).

use std::time::Duration;

use rusb::{Context, UsbContext};
use tracing::{trace, warn};

const USBTMC_CLASS: u8 = 0xFE;
const USBTMC_SUBCLASS: u8 = 0x03;

/// Enumerate every USBTMC-class device currently attached, as resource
/// strings of the form `USB0::0xVID::0xPID::SERIAL::intf::INSTR`.
#[must_use]
pub fn discover() -> Vec<String> {
    let context = match Context::new() {
        Ok(context) => context,
        Err(e) => {
            warn!(error = %e, "USB discovery unavailable: failed to open a libusb context");
            return Vec::new();
        }
    };

    let devices = match context.devices() {
        Ok(devices) => devices,
        Err(e) => {
            warn!(error = %e, "USB discovery failed to enumerate devices");
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    for device in devices.iter() {
        let Ok(descriptor) = device.device_descriptor() else {
            continue;
        };

        let Ok(config) = device.active_config_descriptor() else {
            continue;
        };
        let Some(interface_number) = config.interfaces().find_map(|interface| {
            interface
                .descriptors()
                .find(|alt| alt.class_code() == USBTMC_CLASS && alt.sub_class_code() == USBTMC_SUBCLASS)
                .map(|alt| alt.interface_number())
        }) else {
            continue;
        };

        let serial = device
            .open()
            .ok()
            .and_then(|handle| {
                handle
                    .read_serial_number_string_ascii(&descriptor, Duration::from_millis(300))
                    .ok()
            })
            .unwrap_or_default();

        out.push(format!(
            "USB0::0x{:04X}::0x{:04X}::{serial}::{interface_number}::INSTR",
            descriptor.vendor_id(),
            descriptor.product_id()
        ));
    }
    trace!(count = out.len(), "USB discovery complete");
    out
}
