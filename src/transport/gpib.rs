//! GPIB transport (§4.2, §9): a thin dispatch over an externally-loaded
//! IEEE-488 controller library. This core does not implement a controller
//! driver; every operation deterministically returns `not_supported`
//! ("Optional native bindings", §9) so callers can detect the missing
//! capability rather than fail in a protocol-specific way.

use crate::error::{Error, Result};
use crate::resource::GpibFields;

use super::{TerminatorStatus, Transport};

/// A GPIB transport placeholder. Always returns [`Error::NotSupported`]
/// until a controller-library binding is linked in above this crate.
pub struct GpibTransport {
    fields: GpibFields,
}

impl GpibTransport {
    /// Build a transport for `fields`.
    #[must_use]
    pub const fn new(fields: GpibFields) -> Self {
        Self { fields }
    }

    fn unsupported(&self) -> Error {
        Error::NotSupported(format!(
            "GPIB primary={} secondary={} requires an externally-loaded controller library",
            self.fields.primary, self.fields.secondary
        ))
    }
}

impl Transport for GpibTransport {
    fn open(&mut self, _open_timeout_ms: u64) -> Result<()> {
        Err(self.unsupported())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, _data: &[u8]) -> Result<usize> {
        Err(self.unsupported())
    }

    fn read(&mut self, _buf: &mut [u8], _timeout_ms: u64) -> Result<(usize, TerminatorStatus)> {
        Err(self.unsupported())
    }

    fn read_status(&mut self) -> Result<u8> {
        Err(self.unsupported())
    }

    fn clear(&mut self) -> Result<()> {
        Err(self.unsupported())
    }
}
