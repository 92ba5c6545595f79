//! Simulated process table
//!
//! Lets one OS process play several monitor processes. Each thread acts as
//! the process it last `enter`ed (the table's init process by default).
//! Processes can be killed and their pids reused, and every wake signal is
//! recorded instead of delivered.

use std::cell::Cell;
use std::collections::HashMap;

use hangtrap_core::error::{TrapError, TrapResult};
use hangtrap_core::process::{ProcessHandle, ProcessIdentity, ProcessTable};
use parking_lot::Mutex;

/// Pid of the process every thread starts out as
pub const INIT_PID: u32 = 1;

const FIRST_PID: u32 = 100;

thread_local! {
    static CURRENT_PID: Cell<u32> = const { Cell::new(INIT_PID) };
}

struct SimProcess {
    handle: ProcessHandle,
    name: String,
}

struct Inner {
    next_pid: u32,
    next_handle: u64,
    procs: HashMap<u32, SimProcess>,
    wakes: Vec<u32>,
}

impl Inner {
    fn insert(&mut self, pid: u32, name: &str) -> ProcessHandle {
        let handle = ProcessHandle::new(self.next_handle);
        self.next_handle += 1;
        self.procs.insert(
            pid,
            SimProcess {
                handle,
                name: name.to_string(),
            },
        );
        handle
    }
}

/// In-memory process table
pub struct SimProcessTable {
    inner: Mutex<Inner>,
}

impl SimProcessTable {
    /// Create a table holding only the init process
    pub fn new() -> Self {
        let mut inner = Inner {
            next_pid: FIRST_PID,
            next_handle: 1,
            procs: HashMap::new(),
            wakes: Vec::new(),
        };
        inner.insert(INIT_PID, "init");
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Start a new process and return its pid
    pub fn spawn(&self, name: &str) -> u32 {
        let mut inner = self.inner.lock();
        let pid = inner.next_pid;
        inner.next_pid += 1;
        inner.insert(pid, name);
        pid
    }

    /// Make the calling thread act as `pid`
    pub fn enter(&self, pid: u32) {
        CURRENT_PID.with(|cur| cur.set(pid));
    }

    /// Terminate `pid`; returns false if it was not running
    pub fn kill(&self, pid: u32) -> bool {
        self.inner.lock().procs.remove(&pid).is_some()
    }

    /// Start a new process that reuses `pid`
    pub fn respawn(&self, pid: u32, name: &str) {
        self.inner.lock().insert(pid, name);
    }

    /// Pids that were sent a wake signal, in order
    pub fn wakes(&self) -> Vec<u32> {
        self.inner.lock().wakes.clone()
    }

    /// Number of wake signals sent to `pid`
    pub fn wake_count(&self, pid: u32) -> usize {
        self.inner.lock().wakes.iter().filter(|&&p| p == pid).count()
    }
}

impl Default for SimProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimProcessTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SimProcessTable")
            .field("processes", &inner.procs.len())
            .field("wakes", &inner.wakes.len())
            .finish()
    }
}

impl ProcessTable for SimProcessTable {
    fn current(&self) -> ProcessIdentity {
        let pid = CURRENT_PID.with(Cell::get);
        let inner = self.inner.lock();
        match inner.procs.get(&pid) {
            Some(proc) => ProcessIdentity::new(pid, pid, proc.handle, &proc.name),
            // A dead process calling in never resolves live
            None => ProcessIdentity::new(pid, pid, ProcessHandle::new(0), ""),
        }
    }

    fn resolve(&self, pid: u32) -> Option<ProcessHandle> {
        self.inner.lock().procs.get(&pid).map(|p| p.handle)
    }

    fn send_wake(&self, target: &ProcessIdentity) -> TrapResult<()> {
        let mut inner = self.inner.lock();
        match inner.procs.get(&target.pid()) {
            Some(proc) if proc.handle == target.handle() => {
                inner.wakes.push(target.pid());
                Ok(())
            }
            _ => Err(TrapError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_default_is_init() {
        let table = SimProcessTable::new();
        let me = ProcessIdentity::capture(&table);
        assert_eq!(me.pid(), INIT_PID);
        assert_eq!(me.name(), "init");
        assert!(me.is_live(&table));
    }

    #[test]
    fn test_enter_is_per_thread() {
        let table = std::sync::Arc::new(SimProcessTable::new());
        let mon = table.spawn("monitor");
        table.enter(mon);
        assert_eq!(table.current().pid(), mon);

        let t2 = std::sync::Arc::clone(&table);
        let other = thread::spawn(move || t2.current().pid()).join().unwrap();
        assert_eq!(other, INIT_PID);
    }

    #[test]
    fn test_kill_and_reuse() {
        let table = SimProcessTable::new();
        let pid = table.spawn("monitor");
        table.enter(pid);
        let old = table.current();

        assert!(table.kill(pid));
        assert!(!old.is_live(&table));
        assert!(!table.current().is_live(&table));

        table.respawn(pid, "monitor");
        let new = table.current();
        assert!(new.is_live(&table));
        assert!(!old.is_live(&table));
        assert_ne!(old, new);
    }

    #[test]
    fn test_wakes_recorded() {
        let table = SimProcessTable::new();
        let pid = table.spawn("monitor");
        table.enter(pid);
        let id = table.current();

        table.send_wake(&id).unwrap();
        assert_eq!(table.wake_count(pid), 1);

        table.kill(pid);
        assert_eq!(table.send_wake(&id), Err(TrapError::NotFound));
        assert_eq!(table.wakes(), vec![pid]);
    }
}
