//! Process identity and liveness
//!
//! Ownership of a trap context is recorded as a `ProcessIdentity`: the
//! numeric process id plus a `ProcessHandle` token that distinguishes one
//! incarnation of that id from the next. Liveness is decided only by
//! re-resolving the id through a `ProcessTable` and comparing handles.
//!
//! A recycled id whose new process happens to resolve to an equal handle
//! is indistinguishable from the old one. How likely that is depends on
//! the table implementation (the OS table uses the process start time).

use core::fmt;

use crate::error::TrapResult;

/// Maximum stored process name length (matches the kernel's comm field)
pub const PROC_NAME_LEN: usize = 16;

/// Token identifying one incarnation of a process id
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct ProcessHandle(u64);

impl ProcessHandle {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        ProcessHandle(raw)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Identity of a process captured at some point in time
#[derive(Clone)]
pub struct ProcessIdentity {
    pid: u32,
    tid: u32,
    handle: ProcessHandle,
    name: String,
}

impl ProcessIdentity {
    /// Build an identity from raw parts; `name` is truncated
    pub fn new(pid: u32, tid: u32, handle: ProcessHandle, name: &str) -> Self {
        let mut end = name.len().min(PROC_NAME_LEN - 1);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            pid,
            tid,
            handle,
            name: name[..end].to_string(),
        }
    }

    /// Capture the calling process
    pub fn capture(table: &dyn ProcessTable) -> Self {
        table.current()
    }

    /// Re-resolve the id and compare handles
    pub fn is_live(&self, table: &dyn ProcessTable) -> bool {
        self.pid != 0 && table.resolve(self.pid) == Some(self.handle)
    }

    /// Process (thread group) id
    #[inline]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Id of the thread that was current at capture
    #[inline]
    pub fn tid(&self) -> u32 {
        self.tid
    }

    #[inline]
    pub fn handle(&self) -> ProcessHandle {
        self.handle
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Two identities are the same process when id and handle agree; the
/// capturing thread does not matter.
impl PartialEq for ProcessIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.pid == other.pid && self.handle == other.handle
    }
}

impl Eq for ProcessIdentity {}

impl fmt::Debug for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessIdentity")
            .field("pid", &self.pid)
            .field("tid", &self.tid)
            .field("handle", &self.handle.0)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pid={}", self.name, self.pid)
    }
}

/// Source of process identities
///
/// Implementations must be safe to call from any thread.
pub trait ProcessTable: Send + Sync {
    /// Identity of the calling process
    fn current(&self) -> ProcessIdentity;

    /// Resolve a process id to the handle of its current incarnation
    ///
    /// Returns `None` if no process has that id.
    fn resolve(&self, pid: u32) -> Option<ProcessHandle>;

    /// Deliver an asynchronous wake signal to `target`
    ///
    /// Best effort; callers log failures and carry on.
    fn send_wake(&self, target: &ProcessIdentity) -> TrapResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_truncated() {
        let id = ProcessIdentity::new(1, 1, ProcessHandle::new(7), "a-very-long-monitor-process");
        assert_eq!(id.name().len(), PROC_NAME_LEN - 1);
        assert_eq!(id.name(), "a-very-long-mon");
    }

    #[test]
    fn test_identity_eq_ignores_thread() {
        let a = ProcessIdentity::new(10, 10, ProcessHandle::new(5), "mon");
        let b = ProcessIdentity::new(10, 11, ProcessHandle::new(5), "mon");
        let reused = ProcessIdentity::new(10, 10, ProcessHandle::new(6), "mon");
        assert_eq!(a, b);
        assert_ne!(a, reused);
    }
}
