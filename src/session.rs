//! Session records (§3): the state held between a successful `open` and the
//! matching `close`, plus the per-session attributes callers can get/set.

use crate::resource::ResourceDescriptor;
use crate::transport::Transport;

/// Default I/O timeout, in milliseconds, for a newly-opened session.
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;
/// Default termination character (ASCII line feed).
pub const DEFAULT_TERM_CHAR: u8 = 0x0A;
/// Default serial baud rate (§4.4).
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Serial data-bit width. Kept independent of the `serialport` crate's own
/// enum so this module (and `SessionAttributes`) compiles with the `serial`
/// feature disabled; `transport::serial` converts to/from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

/// Serial stop-bit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

/// Serial parity mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// The attribute set every session carries, independent of its transport.
#[derive(Debug, Clone, Copy)]
pub struct SessionAttributes {
    /// I/O timeout in milliseconds, used by `read` and by protocol-internal
    /// calls that don't take an explicit timeout.
    pub timeout_ms: u64,
    /// Character that ends a read when `term_char_enable` is set.
    pub term_char: u8,
    /// Whether `term_char` terminates a read.
    pub term_char_enable: bool,
    /// Whether `write` asserts END-of-message on its final chunk.
    pub send_end_enable: bool,
    /// Serial baud rate (§4.4: "all overridable via attributes"). Ignored
    /// by every transport but `transport::serial::SerialTransport`.
    pub baud_rate: u32,
    /// Serial data-bit width.
    pub data_bits: DataBits,
    /// Serial stop-bit count.
    pub stop_bits: StopBits,
    /// Serial parity mode.
    pub parity: Parity,
}

impl Default for SessionAttributes {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            term_char: DEFAULT_TERM_CHAR,
            term_char_enable: false,
            send_end_enable: true,
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

/// A single session-table entry.
///
/// The Resource Manager session is represented the same way as an
/// instrument session, with `transport` left `None` and `is_resource_manager`
/// set; this keeps one handle space and one table for both (§3).
pub struct Session {
    pub(crate) handle: u32,
    pub(crate) is_resource_manager: bool,
    pub(crate) descriptor: Option<ResourceDescriptor>,
    pub(crate) transport: Option<Box<dyn Transport>>,
    pub attributes: SessionAttributes,
}

impl Session {
    pub(crate) fn resource_manager(handle: u32) -> Self {
        Self {
            handle,
            is_resource_manager: true,
            descriptor: None,
            transport: None,
            attributes: SessionAttributes::default(),
        }
    }

    pub(crate) fn instrument(
        handle: u32,
        descriptor: ResourceDescriptor,
        transport: Box<dyn Transport>,
        attributes: SessionAttributes,
    ) -> Self {
        Self {
            handle,
            is_resource_manager: false,
            descriptor: Some(descriptor),
            transport: Some(transport),
            attributes,
        }
    }

    /// This session's handle.
    #[must_use]
    pub const fn handle(&self) -> u32 {
        self.handle
    }

    /// Whether this is the Resource Manager session (owns no transport).
    #[must_use]
    pub const fn is_resource_manager(&self) -> bool {
        self.is_resource_manager
    }

    /// The descriptor this session was opened against, if any.
    #[must_use]
    pub const fn descriptor(&self) -> Option<&ResourceDescriptor> {
        self.descriptor.as_ref()
    }

    pub(crate) fn transport_mut(&mut self) -> Option<&mut Box<dyn Transport>> {
        self.transport.as_mut()
    }
}
