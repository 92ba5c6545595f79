//! # hangtrap-core
//!
//! Core types and traits for the GPU hang-trap protocol.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Trap contexts, the control channel and the OS process table live in
//! `hangtrap-runtime`.
//!
//! ## Modules
//!
//! - `id` - Bdf, device handle and VF index types
//! - `state` - Trap status and event kind enums
//! - `completion` - Re-armable wait/signal primitive and interrupt token
//! - `cookie` - Correlation cookie generator
//! - `process` - Process identity and the `ProcessTable` trait
//! - `backend` - The `DeviceBackend` trait and an in-memory backend
//! - `error` - Error types and errno mapping
//! - `env` - Environment variable utilities

pub mod id;
pub mod state;
pub mod completion;
pub mod cookie;
pub mod process;
pub mod backend;
pub mod error;
pub mod env;

// Re-exports for convenience
pub use id::{Bdf, DeviceHandle, VfIndex};
pub use state::{TrapEventKind, TrapStatus};
pub use completion::{Completion, Interrupt, WaitOutcome};
pub use cookie::{CookieGenerator, NO_COOKIE};
pub use process::{ProcessHandle, ProcessIdentity, ProcessTable, PROC_NAME_LEN};
pub use backend::{DeviceBackend, MesDebugInfo, StaticBackend};
pub use error::{check_return_code, TrapError, TrapResult};
pub use env::{env_get, env_get_list, env_get_opt};

/// Protocol constants
pub mod constants {
    /// Default hang-dump completion timeout in milliseconds
    pub const DEFAULT_HANGDUMP_TIMEOUT_MS: u64 = 10_000;

    /// Default cap on a single diagnosis snapshot (12 MiB)
    pub const DEFAULT_MAX_DIAG_DATA_SIZE: usize = 12 * 1024 * 1024;

    /// Maximum number of GPUs with individually configured timeouts
    pub const MAX_GPUS: usize = 32;

    /// Default number of frame-buffer bad-page records served per read
    pub const DEFAULT_FFBM_MAX_RECORDS: usize = 512;

    /// Size of one frame-buffer bad-page record in bytes
    pub const FFBM_RECORD_SIZE: usize = 128;
}
