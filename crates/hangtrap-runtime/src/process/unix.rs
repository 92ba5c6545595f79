//! Unix process probes shared by the OS tables
//!
//! Off Linux there is no portable way to read a process start time, so
//! the fallback table uses the pid itself as the handle and cannot tell a
//! recycled pid from its previous owner.

use hangtrap_core::error::{TrapError, TrapResult};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Send SIGIO to a process
pub(crate) fn send_sigio(pid: u32) -> TrapResult<()> {
    let pid = i32::try_from(pid).map_err(|_| TrapError::InvalidArgument)?;
    kill(Pid::from_raw(pid), Signal::SIGIO).map_err(|errno| match errno {
        Errno::ESRCH => TrapError::NotFound,
        Errno::EPERM => TrapError::PermissionDenied,
        _ => TrapError::Io,
    })
}

/// Whether any process has this pid
#[cfg(any(not(target_os = "linux"), test))]
pub(crate) fn pid_exists(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // EPERM still means the process exists
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(errno) => errno == Errno::EPERM,
    }
}

#[cfg(not(target_os = "linux"))]
pub use fallback::KillProbeTable;

#[cfg(not(target_os = "linux"))]
mod fallback {
    use super::{pid_exists, send_sigio};
    use hangtrap_core::error::TrapResult;
    use hangtrap_core::process::{ProcessHandle, ProcessIdentity, ProcessTable};

    /// Process table probing liveness with `kill(pid, 0)`
    #[derive(Debug, Default)]
    pub struct KillProbeTable;

    impl KillProbeTable {
        pub fn new() -> Self {
            KillProbeTable
        }
    }

    impl ProcessTable for KillProbeTable {
        fn current(&self) -> ProcessIdentity {
            let pid = std::process::id();
            let name = std::env::current_exe()
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .unwrap_or_default();
            ProcessIdentity::new(pid, pid, ProcessHandle::new(pid as u64), &name)
        }

        fn resolve(&self, pid: u32) -> Option<ProcessHandle> {
            pid_exists(pid).then(|| ProcessHandle::new(pid as u64))
        }

        fn send_wake(&self, target: &ProcessIdentity) -> TrapResult<()> {
            send_sigio(target.pid())
        }
    }
}
