//! Correlation cookies
//!
//! A cookie ties a trap event to the diagnosis data fetched for it. It is
//! the CRC-32 of a monotonic microsecond timestamp, salted with a sequence
//! number so two events in the same microsecond still differ. Cookies are
//! correlation tokens only; they are not secret.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// Cookie value meaning "no event"
pub const NO_COOKIE: u32 = 0;

type Clock = Box<dyn Fn() -> u64 + Send + Sync>;

/// Derives cookies from a monotonic clock
pub struct CookieGenerator {
    clock: Clock,
    seq: AtomicU64,
}

impl CookieGenerator {
    /// Generator driven by the process-wide monotonic clock
    pub fn new() -> Self {
        Self::with_clock(monotonic_us)
    }

    /// Generator driven by a custom microsecond clock
    pub fn with_clock<F>(clock: F) -> Self
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        Self {
            clock: Box::new(clock),
            seq: AtomicU64::new(0),
        }
    }

    /// Produce the next cookie; never returns `NO_COOKIE`
    pub fn next(&self) -> u32 {
        let stamp = (self.clock)();
        let mut seq = self.seq.fetch_add(1, Ordering::Relaxed);
        loop {
            let cookie = hash(stamp, seq);
            if cookie != NO_COOKIE {
                return cookie;
            }
            seq = self.seq.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for CookieGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CookieGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieGenerator")
            .field("issued", &self.seq.load(Ordering::Relaxed))
            .finish()
    }
}

fn hash(stamp: u64, seq: u64) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&stamp.to_le_bytes());
    if seq != 0 {
        hasher.update(&seq.to_le_bytes());
    }
    hasher.finalize()
}

/// Microseconds since the first call in this process
pub fn monotonic_us() -> u64 {
    static BASE: OnceLock<Instant> = OnceLock::new();
    let base = *BASE.get_or_init(Instant::now);
    base.elapsed().as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_cookie_is_crc_of_timestamp() {
        let gen = CookieGenerator::with_clock(|| 1_000_000);
        assert_eq!(gen.next(), crc32fast::hash(&1_000_000u64.to_le_bytes()));
    }

    #[test]
    fn test_same_timestamp_differs() {
        let gen = CookieGenerator::with_clock(|| 42);
        let a = gen.next();
        let b = gen.next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_never_zero() {
        let gen = CookieGenerator::new();
        for _ in 0..1000 {
            assert_ne!(gen.next(), NO_COOKIE);
        }
    }

    #[test]
    fn test_monotonic_clock() {
        let a = monotonic_us();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(monotonic_us() > a);
    }
}
