//! The transport contract (§4.2) and the factory that selects an
//! implementation from a parsed [`ResourceDescriptor`] (§4.9).

pub mod gpib;
pub mod hislip;
pub mod raw;
pub mod vxi11;

#[cfg(feature = "serial")]
pub mod serial;

#[cfg(feature = "usb")]
pub mod usbtmc;

use crate::error::{Error, Result};
use crate::resource::{ResourceDescriptor, ResourceKind};
use crate::session::SessionAttributes;

/// How a `read` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminatorStatus {
    /// The read filled the caller's buffer without hitting a terminator.
    MaxCount,
    /// The device signalled end-of-message, or a termination character was
    /// seen.
    TermChar,
}

/// The six operations every instrument transport implements.
///
/// All operations are synchronous: they block the calling thread until they
/// complete, time out, or the peer disconnects.
pub trait Transport: Send {
    /// Acquire the underlying connection and perform any protocol
    /// handshake.
    fn open(&mut self, open_timeout_ms: u64) -> Result<()>;

    /// Best-effort graceful teardown. Always releases OS resources.
    fn close(&mut self) -> Result<()>;

    /// Deliver `data` to the device with end-of-message semantics for this
    /// protocol. Returns the number of bytes the device accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Read up to `buf.len()` bytes into `buf`, governed by `timeout_ms`.
    fn read(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<(usize, TerminatorStatus)>;

    /// Protocol-specific serial-poll equivalent.
    fn read_status(&mut self) -> Result<u8>;

    /// Device-clear: reset the device's I/O buffers.
    fn clear(&mut self) -> Result<()>;

    /// Apply updated session attributes to an already-open transport, where
    /// meaningful (e.g. serial line parameters). The default implementation
    /// is a no-op; only `transport::serial::SerialTransport` overrides it.
    fn reconfigure(&mut self, _attributes: &SessionAttributes) -> Result<()> {
        Ok(())
    }
}

/// Select and construct the transport implementation for `descriptor`,
/// table-driven on `(interface_kind, is_hislip, is_socket)` per §4.9.
/// `attributes` seeds the transport's initial tunables (only the serial
/// transport consults it; every other kind ignores it).
pub fn create(
    descriptor: &ResourceDescriptor,
    attributes: &SessionAttributes,
) -> Result<Box<dyn Transport>> {
    match &descriptor.kind {
        ResourceKind::Tcpip(t) if t.is_hislip => {
            Ok(Box::new(hislip::HiSlipTransport::new(t.clone())))
        }
        ResourceKind::Tcpip(t) if t.is_socket => {
            Ok(Box::new(raw::RawSocketTransport::new(t.clone())))
        }
        ResourceKind::Tcpip(t) => Ok(Box::new(vxi11::Vxi11Transport::new(t.clone()))),
        ResourceKind::Usb(_u) => {
            #[cfg(feature = "usb")]
            {
                Ok(Box::new(usbtmc::UsbtmcTransport::new(_u.clone())))
            }
            #[cfg(not(feature = "usb"))]
            {
                Err(Error::NotSupported(
                    "USB transport not compiled in (feature \"usb\" disabled)".to_string(),
                ))
            }
        }
        ResourceKind::Asrl(_a) => {
            #[cfg(feature = "serial")]
            {
                Ok(Box::new(serial::SerialTransport::new(*_a, *attributes)))
            }
            #[cfg(not(feature = "serial"))]
            {
                let _ = attributes;
                Err(Error::NotSupported(
                    "serial transport not compiled in (feature \"serial\" disabled)".to_string(),
                ))
            }
        }
        ResourceKind::Gpib(g) => Ok(Box::new(gpib::GpibTransport::new(*g))),
    }
}
