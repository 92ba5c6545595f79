//! Environment variable utilities
//!
//! # Usage
//!
//! ```ignore
//! use hangtrap_core::env::{env_get, env_get_list};
//!
//! let max: usize = env_get("HANGTRAP_MAX_DIAG_DATA_SIZE", 12 << 20);
//! let per_gpu: Vec<u64> = env_get_list("HANGTRAP_HANGDUMP_TIMEOUT_MS").unwrap_or_default();
//! ```

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default
///
/// Unset and unparsable values both fall back to `default`.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as optional value
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Get a comma-separated environment variable as a list
///
/// Returns `None` when unset. `Some(Err(item))` names the first element
/// that failed to parse; empty elements are skipped.
pub fn env_get_list<T>(key: &str) -> Option<Result<Vec<T>, String>>
where
    T: FromStr,
{
    let raw = std::env::var(key).ok()?;
    Some(parse_list(&raw))
}

/// Parse a comma-separated list
pub fn parse_list<T>(raw: &str) -> Result<Vec<T>, String>
where
    T: FromStr,
{
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| item.parse().map_err(|_| item.to_string()))
        .collect()
}
