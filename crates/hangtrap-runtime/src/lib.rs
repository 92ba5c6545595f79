//! # hangtrap-runtime
//!
//! Hang-trap protocol between a GPU hypervisor core and a monitoring
//! process.
//!
//! This crate provides:
//! - Per-device trap contexts and their state machine
//! - The monitor-side control channel (StartTrap, NotifyDumpDone,
//!   GetDiagnosticData, StopTrap and the auxiliary debug reads)
//! - Hypervisor-side hooks (hang detected, manual dump, data ready)
//! - Process tables: the host's processes (SIGIO wake) and a simulated one
//! - The raw request dispatcher (`repr(C)` argument blocks)

pub mod config;
pub mod process;
pub mod diag;
pub mod context;
pub mod registry;
pub mod control;
pub mod hooks;
pub mod channel;
#[cfg(unix)]
pub mod abi;

// Re-exports
pub use config::{ConfigError, TrapConfig};
pub use control::DebugControl;
pub use channel::ControlChannel;
pub use context::{TrapContext, TrapOutcome};
pub use registry::{TrapContextId, TrapContextRegistry};
pub use hooks::{DeviceRef, Handshake, SkipReason};
pub use diag::{DiagData, DiagDataStore};
pub use process::SimProcessTable;
#[cfg(unix)]
pub use process::OsProcessTable;
