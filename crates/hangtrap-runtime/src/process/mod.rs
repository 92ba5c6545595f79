//! Process tables
//!
//! Provides the `ProcessTable` used to capture monitor identities, check
//! their liveness and deliver the untrap-timeout wake signal.
//!
//! - `OsProcessTable`: the host's processes. On Linux the handle is the
//!   process start time from procfs, so a recycled pid resolves to a
//!   different handle.
//! - `sim::SimProcessTable`: in-memory processes for tests and demos.

pub mod sim;

pub use hangtrap_core::process::{ProcessHandle, ProcessIdentity, ProcessTable};
pub use sim::SimProcessTable;

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod unix;
        mod linux;
        pub use linux::ProcfsTable as OsProcessTable;
    } else if #[cfg(unix)] {
        mod unix;
        pub use unix::KillProbeTable as OsProcessTable;
    }
}
