//! Library defaults for `TrapConfig`
//!
//! Every value here can be overridden from the environment; see
//! `TrapConfig::from_env`.

use hangtrap_core::constants;

/// Untrap (hang-dump completion) timeout in milliseconds
pub const HANGDUMP_TIMEOUT_MS: u64 = constants::DEFAULT_HANGDUMP_TIMEOUT_MS;

/// Upper bound on a single diagnosis snapshot copy
pub const MAX_DIAG_DATA_SIZE: usize = constants::DEFAULT_MAX_DIAG_DATA_SIZE;

/// Frame-buffer bad-page records served per read
pub const FFBM_MAX_RECORDS: usize = constants::DEFAULT_FFBM_MAX_RECORDS;

/// Size of one frame-buffer bad-page record
pub const FFBM_RECORD_SIZE: usize = constants::FFBM_RECORD_SIZE;

/// GPUs that can carry an individual timeout
pub const MAX_GPUS: usize = constants::MAX_GPUS;
