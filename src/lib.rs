//! A vendor-neutral core I/O engine for VISA-style instrument communication.
//!
//! This crate implements the wire-level and session-management machinery a
//! VISA shared library needs — resource-string parsing, the VXI-11, HiSLIP,
//! USBTMC, raw-socket, and serial transports, LAN/USB/serial discovery, and
//! the process-wide session registry — without depending on an installed
//! VISA runtime. It does not define a C ABI; that is a thin shim layered on
//! top of [`registry`].

pub mod discovery;
pub mod error;
pub mod registry;
pub mod resource;
pub mod session;
pub mod transport;

pub use error::{Error, ErrorKind, Result};
pub use resource::ResourceDescriptor;
pub use session::{Session, SessionAttributes};
pub use transport::{TerminatorStatus, Transport};
