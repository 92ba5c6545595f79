//! Re-armable single-shot wait/signal primitive
//!
//! A `Completion` carries a count of pending signals:
//!
//! - `signal()` adds one pending signal and wakes one waiter
//! - `signal_all()` latches the completion open and wakes every waiter
//! - `rearm()` drops all pending signals
//! - a successful wait consumes one pending signal (a latched completion
//!   is never consumed)
//!
//! Waits can be bounded by a timeout and aborted through an `Interrupt`
//! token. Waiters must re-read whatever state they care about after
//! returning; the signal carries no payload.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Latched value set by `signal_all`
const LATCHED: u32 = u32::MAX;

struct Shared {
    /// Pending signal count, or LATCHED
    done: Mutex<u32>,
    cond: Condvar,
}

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A signal was consumed
    Signaled,
    /// The deadline passed with nothing pending
    TimedOut,
    /// The caller's interrupt token was raised
    Interrupted,
}

/// Single-shot, re-armable wait/signal primitive
pub struct Completion {
    shared: Arc<Shared>,
}

impl Completion {
    /// Create an unsignaled completion
    pub fn new() -> Self {
        Self::with_count(0)
    }

    /// Create a completion holding one pending signal
    ///
    /// The first wait returns immediately.
    pub fn signaled() -> Self {
        Self::with_count(1)
    }

    fn with_count(done: u32) -> Self {
        Self {
            shared: Arc::new(Shared {
                done: Mutex::new(done),
                cond: Condvar::new(),
            }),
        }
    }

    /// Add one pending signal and wake one waiter
    pub fn signal(&self) {
        {
            let mut done = self.shared.done.lock();
            if *done != LATCHED {
                *done = (*done + 1).min(LATCHED - 1);
            }
        }
        self.shared.cond.notify_one();
    }

    /// Latch open and wake every waiter
    pub fn signal_all(&self) {
        *self.shared.done.lock() = LATCHED;
        self.shared.cond.notify_all();
    }

    /// Drop any pending signals; the next wait blocks
    pub fn rearm(&self) {
        *self.shared.done.lock() = 0;
    }

    /// Whether a wait would return immediately
    pub fn is_done(&self) -> bool {
        *self.shared.done.lock() != 0
    }

    /// Wait without bound or interruption
    pub fn wait(&self) {
        let mut done = self.shared.done.lock();
        while *done == 0 {
            self.shared.cond.wait(&mut done);
        }
        consume(&mut done);
    }

    /// Wait until signaled or `timeout` elapses
    ///
    /// The deadline is fixed at entry; spurious wakeups do not extend it.
    pub fn wait_timeout(&self, timeout: Duration) -> WaitOutcome {
        self.wait_interruptible(&Interrupt::none(), Some(timeout))
    }

    /// Wait until signaled, timed out, or `intr` is raised
    pub fn wait_interruptible(&self, intr: &Interrupt, timeout: Option<Duration>) -> WaitOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        let _registration = intr.register(&self.shared);

        let mut done = self.shared.done.lock();
        loop {
            if *done != 0 {
                consume(&mut done);
                return WaitOutcome::Signaled;
            }
            if intr.is_raised() {
                return WaitOutcome::Interrupted;
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return WaitOutcome::TimedOut;
                    }
                    self.shared.cond.wait_until(&mut done, deadline);
                }
                None => self.shared.cond.wait(&mut done),
            }
        }
    }
}

#[inline]
fn consume(done: &mut u32) {
    if *done != LATCHED {
        *done -= 1;
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let done = *self.shared.done.lock();
        f.debug_struct("Completion")
            .field("latched", &(done == LATCHED))
            .field("pending", &if done == LATCHED { 0 } else { done })
            .finish()
    }
}

/// Token that aborts interruptible waits
///
/// Raising the token wakes every wait currently registered with it, and
/// any wait started while it is raised returns `Interrupted` at once.
/// The token stays raised until `clear()`. Clones share state.
#[derive(Clone)]
pub struct Interrupt {
    inner: Option<Arc<InterruptInner>>,
}

struct InterruptInner {
    raised: AtomicBool,
    waiters: Mutex<Vec<Arc<Shared>>>,
}

impl Interrupt {
    /// Create a fresh, lowered token
    pub fn new() -> Self {
        Self {
            inner: Some(Arc::new(InterruptInner {
                raised: AtomicBool::new(false),
                waiters: Mutex::new(Vec::new()),
            })),
        }
    }

    /// Token that can never be raised
    pub const fn none() -> Self {
        Self { inner: None }
    }

    /// Raise the token and wake registered waiters
    pub fn raise(&self) {
        let Some(inner) = &self.inner else { return };
        inner.raised.store(true, Ordering::SeqCst);

        let waiters = inner.waiters.lock().clone();
        for shared in waiters {
            // Taking the lock orders the notify after the waiter's check.
            drop(shared.done.lock());
            shared.cond.notify_all();
        }
    }

    /// Lower the token
    pub fn clear(&self) {
        if let Some(inner) = &self.inner {
            inner.raised.store(false, Ordering::SeqCst);
        }
    }

    #[inline]
    pub fn is_raised(&self) -> bool {
        match &self.inner {
            Some(inner) => inner.raised.load(Ordering::SeqCst),
            None => false,
        }
    }

    fn register(&self, shared: &Arc<Shared>) -> Registration<'_> {
        if let Some(inner) = &self.inner {
            inner.waiters.lock().push(Arc::clone(shared));
        }
        Registration {
            intr: self,
            shared: Arc::clone(shared),
        }
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interrupt")
            .field("raised", &self.is_raised())
            .finish()
    }
}

struct Registration<'a> {
    intr: &'a Interrupt,
    shared: Arc<Shared>,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if let Some(inner) = &self.intr.inner {
            let mut waiters = inner.waiters.lock();
            if let Some(pos) = waiters.iter().position(|w| Arc::ptr_eq(w, &self.shared)) {
                waiters.swap_remove(pos);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_signaled_does_not_block() {
        let c = Completion::signaled();
        assert!(c.is_done());
        assert_eq!(c.wait_timeout(Duration::from_millis(1)), WaitOutcome::Signaled);
        // Consumed
        assert!(!c.is_done());
    }

    #[test]
    fn test_wait_timeout_expires() {
        let c = Completion::new();
        let start = Instant::now();
        assert_eq!(c.wait_timeout(Duration::from_millis(30)), WaitOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_signal_wakes_waiter() {
        let c = Arc::new(Completion::new());
        let c2 = Arc::clone(&c);
        let handle = thread::spawn(move || c2.wait_timeout(Duration::from_secs(10)));

        thread::sleep(Duration::from_millis(20));
        c.signal();
        assert_eq!(handle.join().unwrap(), WaitOutcome::Signaled);
    }

    #[test]
    fn test_signal_all_latches() {
        let c = Completion::new();
        c.signal_all();
        for _ in 0..3 {
            assert_eq!(c.wait_timeout(Duration::from_millis(1)), WaitOutcome::Signaled);
        }
        c.rearm();
        assert!(!c.is_done());
    }

    #[test]
    fn test_rearm_drops_pending() {
        let c = Completion::new();
        c.signal();
        c.signal();
        c.rearm();
        assert_eq!(c.wait_timeout(Duration::from_millis(5)), WaitOutcome::TimedOut);
    }

    #[test]
    fn test_interrupt_aborts_wait() {
        let c = Arc::new(Completion::new());
        let intr = Interrupt::new();
        let (c2, intr2) = (Arc::clone(&c), intr.clone());
        let handle = thread::spawn(move || c2.wait_interruptible(&intr2, None));

        thread::sleep(Duration::from_millis(20));
        intr.raise();
        assert_eq!(handle.join().unwrap(), WaitOutcome::Interrupted);
        // Nothing consumed, nothing left registered
        assert!(!c.is_done());
        assert!(intr.inner.as_ref().unwrap().waiters.lock().is_empty());
    }

    #[test]
    fn test_raised_interrupt_returns_immediately() {
        let c = Completion::new();
        let intr = Interrupt::new();
        intr.raise();
        assert_eq!(c.wait_interruptible(&intr, None), WaitOutcome::Interrupted);

        intr.clear();
        c.signal();
        assert_eq!(c.wait_interruptible(&intr, None), WaitOutcome::Signaled);
    }

    #[test]
    fn test_pending_signal_beats_interrupt() {
        let c = Completion::signaled();
        let intr = Interrupt::new();
        intr.raise();
        assert_eq!(c.wait_interruptible(&intr, None), WaitOutcome::Signaled);
    }
}
