//! Process-wide session and find-list state (§3, §4.9, §5): a
//! lazily-initialized singleton guarded by a single mutex. Table bookkeeping
//! happens under the lock; transport I/O never does — each call checks its
//! transport out of the table, runs the blocking operation unlocked, then
//! checks it back in.

use std::str::FromStr;
use std::sync::{Mutex, OnceLock};

use tracing::{instrument, warn};

use crate::discovery;
use crate::error::{Error, Result};
use crate::resource::ResourceDescriptor;
use crate::session::{Session, SessionAttributes};
use crate::transport::{self, TerminatorStatus, Transport};

/// Session table capacity (§3: "capacity >= 256").
pub const SESSION_TABLE_CAPACITY: usize = 256;
/// Find-list capacity (§4.8: capped at 128 entries).
pub const FIND_LIST_CAPACITY: usize = 128;

struct FindList {
    handle: u32,
    entries: Vec<String>,
    cursor: usize,
}

impl FindList {
    const fn count(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Default)]
struct Tables {
    sessions: Vec<Session>,
    find_lists: Vec<FindList>,
    next_handle: u32,
}

impl Tables {
    fn allocate_handle(&mut self) -> u32 {
        if self.next_handle == 0 {
            self.next_handle = 1;
        }
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        handle
    }

    fn session_mut(&mut self, handle: u32) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.handle() == handle)
    }

    fn find_list_mut(&mut self, handle: u32) -> Option<&mut FindList> {
        self.find_lists.iter_mut().find(|f| f.handle == handle)
    }
}

static REGISTRY: OnceLock<Mutex<Tables>> = OnceLock::new();

fn tables() -> &'static Mutex<Tables> {
    REGISTRY.get_or_init(|| Mutex::new(Tables::default()))
}

/// Create the Resource Manager session, lazily initializing process-wide
/// state on first call.
#[instrument]
pub fn open_default_resource_manager() -> Result<u32> {
    let mut guard = tables().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if guard.sessions.len() >= SESSION_TABLE_CAPACITY {
        return Err(Error::TableExhausted("session table is full".to_string()));
    }
    let handle = guard.allocate_handle();
    guard.sessions.push(Session::resource_manager(handle));
    Ok(handle)
}

/// Parse `resource_string`, build and open its transport, and register a
/// new instrument session under the caller's Resource Manager.
///
/// Transport construction and the blocking `open` call both happen before
/// the table lock is taken, per §5.
#[instrument(skip(rm_handle))]
pub fn open(rm_handle: u32, resource_string: &str, open_timeout_ms: u64) -> Result<u32> {
    {
        let mut guard = tables().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let rm = guard
            .session_mut(rm_handle)
            .ok_or(Error::InvalidObject(rm_handle))?;
        if !rm.is_resource_manager() {
            return Err(Error::InvalidObject(rm_handle));
        }
    }

    let descriptor = ResourceDescriptor::from_str(resource_string)?;
    let attributes = SessionAttributes::default();
    let mut transport = transport::create(&descriptor, &attributes)?;
    transport.open(open_timeout_ms)?;

    let mut guard = tables().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if guard.sessions.len() >= SESSION_TABLE_CAPACITY {
        return Err(Error::TableExhausted("session table is full".to_string()));
    }
    let handle = guard.allocate_handle();
    guard
        .sessions
        .push(Session::instrument(handle, descriptor, transport, attributes));
    Ok(handle)
}

/// Remove `handle` from the session table (if it names a session) or the
/// find-list table (if it names a find list), best-effort closing any
/// transport. After this call, any further operation on `handle` fails
/// `invalid_object`, per the ownership invariant in §8.
#[instrument]
pub fn close(handle: u32) -> Result<()> {
    let mut guard = tables().lock().unwrap_or_else(std::sync::PoisonError::into_inner);

    if let Some(index) = guard.sessions.iter().position(|s| s.handle() == handle) {
        let mut session = guard.sessions.remove(index);
        drop(guard);
        if let Some(transport) = session.transport_mut() {
            if let Err(e) = transport.close() {
                warn!(handle, error = %e, "transport close failed; session is freed anyway");
            }
        }
        return Ok(());
    }

    if let Some(index) = guard.find_lists.iter().position(|f| f.handle == handle) {
        guard.find_lists.remove(index);
        return Ok(());
    }

    Err(Error::InvalidObject(handle))
}

/// Check `handle`'s transport out of the table, run `f` on it unlocked, and
/// check it back in (or drop it, if the session was closed meanwhile).
fn with_transport<R>(handle: u32, f: impl FnOnce(&mut dyn Transport) -> Result<R>) -> Result<R> {
    let mut transport = {
        let mut guard = tables().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let session = guard.session_mut(handle).ok_or(Error::InvalidObject(handle))?;
        session
            .transport
            .take()
            .ok_or_else(|| Error::ConnectionLost("session has no open transport".to_string()))?
    };

    let result = f(transport.as_mut());

    let mut guard = tables().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(session) = guard.session_mut(handle) {
        session.transport = Some(transport);
    }
    result
}

/// Write `data` on `handle`'s transport.
pub fn write(handle: u32, data: &[u8]) -> Result<usize> {
    with_transport(handle, |t| t.write(data))
}

/// Read into `buf` on `handle`'s transport, governed by the session's
/// `timeout_ms` attribute unless `timeout_ms` is overridden by the caller.
pub fn read(handle: u32, buf: &mut [u8], timeout_ms: u64) -> Result<(usize, TerminatorStatus)> {
    with_transport(handle, |t| t.read(buf, timeout_ms))
}

/// Protocol-specific serial-poll equivalent on `handle`'s transport.
pub fn read_status(handle: u32) -> Result<u8> {
    with_transport(handle, Transport::read_status)
}

/// Device-clear on `handle`'s transport.
pub fn clear(handle: u32) -> Result<()> {
    with_transport(handle, Transport::clear)
}

/// Read a copy of `handle`'s session attributes.
pub fn attributes(handle: u32) -> Result<SessionAttributes> {
    let mut guard = tables().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    guard
        .session_mut(handle)
        .map(|s| s.attributes)
        .ok_or(Error::InvalidObject(handle))
}

/// Overwrite `handle`'s session attributes, reconfiguring its transport
/// in place where that's meaningful (serial line parameters).
pub fn set_attributes(handle: u32, attributes: SessionAttributes) -> Result<()> {
    let mut guard = tables().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let session = guard.session_mut(handle).ok_or(Error::InvalidObject(handle))?;
    session.attributes = attributes;
    if let Some(transport) = session.transport_mut() {
        transport.reconfigure(&attributes)?;
    }
    Ok(())
}

/// Run discovery filtered by `pattern`, register the results as a new find
/// list, and return its handle plus the number of matches.
#[instrument]
pub fn find_resources(pattern: &str) -> Result<(u32, usize)> {
    let entries = discovery::find_resources(pattern, FIND_LIST_CAPACITY);
    if entries.is_empty() {
        return Err(Error::ResourceNotFound(pattern.to_string()));
    }

    let mut guard = tables().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if guard.find_lists.len() >= FIND_LIST_CAPACITY {
        return Err(Error::TableExhausted("find-list table is full".to_string()));
    }
    let handle = guard.allocate_handle();
    let count = entries.len();
    guard.find_lists.push(FindList {
        handle,
        entries,
        cursor: 0,
    });
    Ok((handle, count))
}

/// Return the next unread entry from find list `handle`, or `None` once
/// exhausted.
pub fn find_next(handle: u32) -> Result<Option<String>> {
    let mut guard = tables().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let list = guard.find_list_mut(handle).ok_or(Error::InvalidObject(handle))?;
    let entry = list.entries.get(list.cursor).cloned();
    if entry.is_some() {
        list.cursor += 1;
    }
    Ok(entry)
}

/// The number of entries in find list `handle`.
pub fn find_list_count(handle: u32) -> Result<usize> {
    let mut guard = tables().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    guard
        .find_list_mut(handle)
        .map(FindList::count)
        .ok_or(Error::InvalidObject(handle))
}

/// Test-only: reset all process-wide state so tests don't see each other's
/// sessions. Not part of the public API.
#[cfg(test)]
fn reset() {
    let mut guard = tables().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    *guard = Tables::default();
}

#[cfg(test)]
mod unit {
    use super::*;
    use std::sync::Mutex as StdMutex;

    // Serializes tests against the process-wide singleton.
    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    #[test]
    fn handles_are_unique_and_not_reused() {
        let _guard = TEST_LOCK.lock().unwrap();
        reset();
        let rm1 = open_default_resource_manager().unwrap();
        let rm2 = open_default_resource_manager().unwrap();
        assert_ne!(rm1, rm2);
        close(rm1).unwrap();
        let rm3 = open_default_resource_manager().unwrap();
        assert_ne!(rm3, rm1);
        assert_ne!(rm3, rm2);
    }

    #[test]
    fn close_then_operate_is_invalid_object() {
        let _guard = TEST_LOCK.lock().unwrap();
        reset();
        let rm = open_default_resource_manager().unwrap();
        close(rm).unwrap();
        assert!(matches!(
            attributes(rm),
            Err(Error::InvalidObject(h)) if h == rm
        ));
    }

    #[test]
    fn unknown_handle_is_invalid_object() {
        let _guard = TEST_LOCK.lock().unwrap();
        reset();
        assert!(matches!(close(999_999), Err(Error::InvalidObject(_))));
    }
}
