//! Hang-trap configuration
//!
//! Provides library defaults with runtime environment overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use hangtrap_runtime::config::TrapConfig;
//!
//! // Defaults with env overrides
//! let config = TrapConfig::from_env();
//!
//! // Or customize programmatically
//! let config = TrapConfig::new()
//!     .hangdump_timeout(Duration::from_secs(3))
//!     .max_diag_data_size(1 << 20);
//! ```

pub mod defaults;

use std::time::Duration;

use hangtrap_core::env::{env_get, env_get_list};
use thiserror::Error;

/// Single timeout or comma list indexed by GPU
const ENV_HANGDUMP_TIMEOUT: &str = "HANGTRAP_HANGDUMP_TIMEOUT_MS";
const ENV_MAX_DIAG_DATA_SIZE: &str = "HANGTRAP_MAX_DIAG_DATA_SIZE";
const ENV_FFBM_MAX_RECORDS: &str = "HANGTRAP_FFBM_MAX_RECORDS";

/// Trap configuration with builder pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrapConfig {
    /// Timeout for GPUs without an entry in `per_gpu_timeouts`
    pub hangdump_timeout: Duration,
    /// Individual timeouts indexed by GPU index
    pub per_gpu_timeouts: Vec<Duration>,
    /// Cap on any single diagnosis snapshot
    pub max_diag_data_size: usize,
    /// Frame-buffer bad-page records served per read
    pub ffbm_max_records: usize,
    /// Bytes per frame-buffer bad-page record
    pub ffbm_record_size: usize,
}

impl Default for TrapConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl TrapConfig {
    /// Create config from library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `HANGTRAP_HANGDUMP_TIMEOUT_MS` - one value for every GPU, or a
    ///   comma list `T0,T1,...` indexed by GPU
    /// - `HANGTRAP_MAX_DIAG_DATA_SIZE` - snapshot size cap in bytes
    /// - `HANGTRAP_FFBM_MAX_RECORDS` - bad-page records per read
    ///
    /// A malformed timeout list is ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::new();
        match env_get_list::<u64>(ENV_HANGDUMP_TIMEOUT) {
            Some(Ok(list)) => config = config.hangdump_timeouts_ms(&list),
            Some(Err(item)) => {
                tracing::warn!(
                    key = ENV_HANGDUMP_TIMEOUT,
                    item = %item,
                    "ignoring malformed hang-dump timeout"
                );
            }
            None => {}
        }
        config.max_diag_data_size = env_get(ENV_MAX_DIAG_DATA_SIZE, defaults::MAX_DIAG_DATA_SIZE);
        config.ffbm_max_records = env_get(ENV_FFBM_MAX_RECORDS, defaults::FFBM_MAX_RECORDS);
        config
    }

    /// Create config with explicit defaults (no env override).
    pub fn new() -> Self {
        Self {
            hangdump_timeout: Duration::from_millis(defaults::HANGDUMP_TIMEOUT_MS),
            per_gpu_timeouts: Vec::new(),
            max_diag_data_size: defaults::MAX_DIAG_DATA_SIZE,
            ffbm_max_records: defaults::FFBM_MAX_RECORDS,
            ffbm_record_size: defaults::FFBM_RECORD_SIZE,
        }
    }

    // Builder methods

    /// Timeout for every GPU; drops individual timeouts
    pub fn hangdump_timeout(mut self, d: Duration) -> Self {
        self.hangdump_timeout = d;
        self.per_gpu_timeouts.clear();
        self
    }

    /// Apply a timeout list in milliseconds
    ///
    /// A single value applies to every GPU; a longer list is indexed by GPU
    /// and GPUs past its end keep the default.
    pub fn hangdump_timeouts_ms(self, list: &[u64]) -> Self {
        match list {
            [] => self,
            [single] => self.hangdump_timeout(Duration::from_millis(*single)),
            many => {
                let mut config = self;
                config.per_gpu_timeouts = many.iter().map(|&ms| Duration::from_millis(ms)).collect();
                config
            }
        }
    }

    pub fn max_diag_data_size(mut self, size: usize) -> Self {
        self.max_diag_data_size = size;
        self
    }

    pub fn ffbm_max_records(mut self, n: usize) -> Self {
        self.ffbm_max_records = n;
        self
    }

    /// Untrap timeout for the GPU at `gpu_index`
    pub fn untrap_timeout_for(&self, gpu_index: usize) -> Duration {
        self.per_gpu_timeouts
            .get(gpu_index)
            .copied()
            .unwrap_or(self.hangdump_timeout)
    }

    /// Byte budget of one frame-buffer bad-page read
    pub fn ffbm_buffer_size(&self) -> usize {
        self.ffbm_max_records.saturating_mul(self.ffbm_record_size)
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.per_gpu_timeouts.len() > defaults::MAX_GPUS {
            return Err(ConfigError::InvalidValue("at most 32 per-GPU timeouts"));
        }
        if self.max_diag_data_size == 0 {
            return Err(ConfigError::InvalidValue("max_diag_data_size must be > 0"));
        }
        if self.max_diag_data_size > u32::MAX as usize {
            return Err(ConfigError::InvalidValue("max_diag_data_size must fit in u32"));
        }
        if self.ffbm_record_size == 0 {
            return Err(ConfigError::InvalidValue("ffbm_record_size must be > 0"));
        }
        Ok(())
    }

    /// Log the effective configuration
    pub fn log(&self) {
        tracing::info!(
            hangdump_timeout = ?self.hangdump_timeout,
            per_gpu_timeouts = ?self.per_gpu_timeouts,
            max_diag_data_size = self.max_diag_data_size,
            ffbm_max_records = self.ffbm_max_records,
            ffbm_record_size = self.ffbm_record_size,
            "hang-trap configuration"
        );
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrapConfig::new();
        assert_eq!(config.untrap_timeout_for(0), Duration::from_millis(10_000));
        assert_eq!(config.max_diag_data_size, 12 * 1024 * 1024);
        assert_eq!(config.ffbm_buffer_size(), 512 * 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_single_timeout_applies_everywhere() {
        let config = TrapConfig::new().hangdump_timeouts_ms(&[250]);
        assert_eq!(config.untrap_timeout_for(0), Duration::from_millis(250));
        assert_eq!(config.untrap_timeout_for(7), Duration::from_millis(250));
    }

    #[test]
    fn test_per_gpu_timeouts() {
        let config = TrapConfig::new().hangdump_timeouts_ms(&[100, 0, 300]);
        assert_eq!(config.untrap_timeout_for(0), Duration::from_millis(100));
        assert_eq!(config.untrap_timeout_for(1), Duration::ZERO);
        assert_eq!(config.untrap_timeout_for(2), Duration::from_millis(300));
        assert_eq!(config.untrap_timeout_for(3), Duration::from_millis(10_000));
    }

    #[test]
    fn test_validation() {
        let config = TrapConfig::new().max_diag_data_size(0);
        assert!(config.validate().is_err());

        let too_many = vec![1u64; 33];
        let config = TrapConfig::new().hangdump_timeouts_ms(&too_many);
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidValue("at most 32 per-GPU timeouts"))
        );
    }

    #[test]
    fn test_from_env() {
        std::env::set_var(ENV_HANGDUMP_TIMEOUT, "50,60");
        std::env::set_var(ENV_MAX_DIAG_DATA_SIZE, "4096");
        let config = TrapConfig::from_env();
        std::env::remove_var(ENV_HANGDUMP_TIMEOUT);
        std::env::remove_var(ENV_MAX_DIAG_DATA_SIZE);

        assert_eq!(config.untrap_timeout_for(1), Duration::from_millis(60));
        assert_eq!(config.max_diag_data_size, 4096);
    }
}
