//! procfs-backed process table
//!
//! The handle of a process is its start time in clock ticks since boot
//! (field 22 of `/proc/<pid>/stat`). A pid reused by a later process gets
//! a later start time, so the stored handle stops matching.

use std::fs;

use hangtrap_core::error::TrapResult;
use hangtrap_core::process::{ProcessHandle, ProcessIdentity, ProcessTable};
use nix::unistd::gettid;

use super::unix::send_sigio;

/// Index of `starttime` among the fields after the `comm` field
const STARTTIME_FIELD: usize = 19;

/// Process table reading `/proc`
#[derive(Debug, Default)]
pub struct ProcfsTable;

impl ProcfsTable {
    pub fn new() -> Self {
        ProcfsTable
    }
}

/// Parse `starttime` out of a `/proc/<pid>/stat` line
///
/// `comm` may itself contain spaces and parentheses, so fields are counted
/// from the last `)`.
fn parse_start_time(stat: &str) -> Option<u64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(STARTTIME_FIELD)?.parse().ok()
}

fn start_time(pid: u32) -> Option<u64> {
    let stat = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    parse_start_time(&stat)
}

impl ProcessTable for ProcfsTable {
    fn current(&self) -> ProcessIdentity {
        let pid = std::process::id();
        let tid = gettid().as_raw() as u32;
        let handle = start_time(pid).unwrap_or_default();
        let name = fs::read_to_string("/proc/self/comm").unwrap_or_default();
        ProcessIdentity::new(pid, tid, ProcessHandle::new(handle), name.trim_end())
    }

    fn resolve(&self, pid: u32) -> Option<ProcessHandle> {
        if pid == 0 {
            return None;
        }
        start_time(pid).map(ProcessHandle::new)
    }

    fn send_wake(&self, target: &ProcessIdentity) -> TrapResult<()> {
        send_sigio(target.pid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_time() {
        let stat = "4242 (my (odd) mon) S 1 4242 4242 0 -1 4194560 100 0 0 0 \
                    1 2 0 0 20 0 1 0 987654 1000000 200";
        assert_eq!(parse_start_time(stat), Some(987654));
        assert_eq!(parse_start_time("garbage"), None);
    }

    #[test]
    fn test_self_start_time_stable() {
        let pid = std::process::id();
        let a = start_time(pid);
        assert!(a.is_some());
        assert_eq!(a, start_time(pid));
    }
}
