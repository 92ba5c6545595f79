//! Monitor control channel
//!
//! A `ControlChannel` is one open session of a monitoring process. It is
//! not tied to a device when opened; it binds to a trap context the first
//! time its caller captures ownership of that context. Closing (or
//! dropping) a bound channel returns every bound context to DISABLED and
//! clears its owner, whoever the current owner is.
//!
//! All operations take `&self`, so one thread can sit in `start_trap` while
//! another issues `stop_trap` on the same channel. The channel's interrupt
//! token aborts any blocking call with `Interrupted`.
//!
//! # Example
//!
//! ```rust,ignore
//! let channel = control.open_channel();
//! loop {
//!     let outcome = channel.start_trap(pf_bdf)?;
//!     if outcome.event == TrapEventKind::Exit {
//!         break;
//!     }
//!     dump_device(outcome.bdf);
//!     channel.notify_dump_done(pf_bdf)?;
//!     let data = channel.get_diagnostic_data(pf_bdf, 4 << 20)?;
//! }
//! ```

use std::sync::Arc;

use hangtrap_core::backend::MesDebugInfo;
use hangtrap_core::completion::Interrupt;
use hangtrap_core::error::TrapResult;
use hangtrap_core::id::Bdf;
use hangtrap_core::process::ProcessIdentity;
use parking_lot::Mutex;

use crate::context::{TrapContext, TrapOutcome};
use crate::control::DebugControl;
use crate::diag::DiagData;

/// One monitor session
pub struct ControlChannel {
    control: DebugControl,
    bound: Mutex<Vec<Arc<TrapContext>>>,
    intr: Interrupt,
}

impl ControlChannel {
    pub(crate) fn new(control: DebugControl) -> Self {
        Self {
            control,
            bound: Mutex::new(Vec::new()),
            intr: Interrupt::new(),
        }
    }

    fn caller(&self) -> ProcessIdentity {
        self.control.processes().current()
    }

    fn bind(&self, ctx: &Arc<TrapContext>) {
        let mut bound = self.bound.lock();
        if !bound.iter().any(|b| Arc::ptr_eq(b, ctx)) {
            bound.push(Arc::clone(ctx));
        }
    }

    /// Wait for the next hang or manual dump on the GPU at `bdf`
    ///
    /// Fails with `Busy` without blocking if another live process owns the
    /// device. A `stop_trap` on the device returns an `Exit` outcome.
    pub fn start_trap(&self, bdf: Bdf) -> TrapResult<TrapOutcome> {
        let ctx = self.control.context_for_bdf(bdf)?;
        let caller = self.caller();
        let procs = self.control.processes();

        if ctx.claim(&caller, procs)? {
            self.bind(&ctx);
            tracing::info!(bdf = %bdf, "successfully trapped by {}", caller);
        }
        ctx.wait_for_trap(&caller, procs, &self.intr)
    }

    /// Report that the monitor has finished dumping the hung device
    pub fn notify_dump_done(&self, bdf: Bdf) -> TrapResult<()> {
        let ctx = self.control.context_for_bdf(bdf)?;
        ctx.notify_dump_done(&self.caller(), self.control.processes())?;
        tracing::info!(bdf = %bdf, "monitor finished dumping");
        Ok(())
    }

    /// Read up to `requested` bytes of diagnosis data
    pub fn get_diagnostic_data(&self, bdf: Bdf, requested: usize) -> TrapResult<DiagData> {
        let ctx = self.control.context_for_bdf(bdf)?;
        ctx.read_diag_data(
            &self.caller(),
            self.control.processes(),
            self.control.backend(),
            requested,
            &self.intr,
        )
    }

    /// End the trap session on the GPU at `bdf`
    pub fn stop_trap(&self, bdf: Bdf) -> TrapResult<()> {
        let ctx = self.control.context_for_bdf(bdf)?;
        ctx.stop_trap(&self.caller(), self.control.processes(), &self.intr)
    }

    /// Frame-buffer bad-page records for the bus of `bdf`
    pub fn get_ffbm_data(&self, bdf: Bdf) -> Vec<u8> {
        self.control.get_ffbm_data(bdf)
    }

    /// Firmware debug area of the function at `bdf`
    pub fn get_mes_debug_info(&self, bdf: Bdf) -> TrapResult<MesDebugInfo> {
        self.control.get_mes_debug_info(bdf)
    }

    /// Abort blocking calls on this channel
    ///
    /// Sticky until `clear_interrupt`.
    pub fn interrupt(&self) {
        self.intr.raise();
    }

    pub fn clear_interrupt(&self) {
        self.intr.clear();
    }

    /// Handle that interrupts this channel from elsewhere
    pub fn interrupter(&self) -> Interrupt {
        self.intr.clone()
    }

    pub fn is_bound(&self) -> bool {
        !self.bound.lock().is_empty()
    }

    /// Release every bound context
    ///
    /// Idempotent; also run on drop.
    pub fn close(&self) {
        let bound = std::mem::take(&mut *self.bound.lock());
        for ctx in bound {
            tracing::info!(bdf = %ctx.pf_bdf(), "channel closed, releasing trap context");
            ctx.release();
        }
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("bound", &self.bound.lock().len())
            .field("interrupted", &self.intr.is_raised())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrapConfig;
    use crate::process::SimProcessTable;
    use hangtrap_core::backend::StaticBackend;
    use hangtrap_core::error::TrapError;
    use hangtrap_core::id::DeviceHandle;
    use hangtrap_core::process::ProcessTable;
    use hangtrap_core::state::{TrapEventKind, TrapStatus};
    use std::thread;
    use std::time::Duration;

    const DEV: DeviceHandle = DeviceHandle::new(1);
    const PF: Bdf = Bdf::new(0x0800);

    fn setup() -> (DebugControl, Arc<SimProcessTable>) {
        let procs = Arc::new(SimProcessTable::new());
        let control = DebugControl::new(
            TrapConfig::new().hangdump_timeout(Duration::from_millis(100)),
            procs.clone(),
            Arc::new(StaticBackend::new()),
        );
        control.attach_device(DEV, PF, 0);
        (control, procs)
    }

    fn wait_for_status(control: &DebugControl, status: TrapStatus) {
        let ctx = control.registry().find_by_bdf(PF).unwrap();
        for _ in 0..500 {
            if ctx.status() == status {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("context never reached {}", status);
    }

    #[test]
    fn test_unknown_bdf() {
        let (control, _) = setup();
        let channel = control.open_channel();
        let bdf = Bdf::new(0x0900);
        assert_eq!(channel.start_trap(bdf), Err(TrapError::NotFound));
        assert_eq!(channel.notify_dump_done(bdf), Err(TrapError::NotFound));
        assert_eq!(channel.stop_trap(bdf), Err(TrapError::NotFound));
        assert!(!channel.is_bound());
    }

    #[test]
    fn test_interrupt_start_trap() {
        let (control, procs) = setup();
        let pid = procs.spawn("monitor");
        let channel = Arc::new(control.open_channel());

        let (ch, p) = (Arc::clone(&channel), Arc::clone(&procs));
        let waiter = thread::spawn(move || {
            p.enter(pid);
            ch.start_trap(PF)
        });

        wait_for_status(&control, TrapStatus::Waiting);
        channel.interrupt();
        assert_eq!(waiter.join().unwrap(), Err(TrapError::Interrupted));
        assert!(channel.is_bound());

        // Closing the channel resets the stranded session
        channel.close();
        assert_eq!(control.registry().find_by_bdf(PF).unwrap().status(), TrapStatus::Disabled);
    }

    #[test]
    fn test_close_unblocks_start_trap() {
        let (control, procs) = setup();
        let pid = procs.spawn("monitor");
        let channel = Arc::new(control.open_channel());

        let (ch, p) = (Arc::clone(&channel), Arc::clone(&procs));
        let waiter = thread::spawn(move || {
            p.enter(pid);
            ch.start_trap(PF)
        });

        wait_for_status(&control, TrapStatus::Waiting);
        channel.close();

        let outcome = waiter.join().unwrap().unwrap();
        assert_eq!(outcome.event, TrapEventKind::Exit);
        assert_eq!(outcome.cookie, 0);
        assert_eq!(outcome.bdf, PF);
        let ctx = control.registry().find_by_bdf(PF).unwrap();
        assert_eq!(ctx.status(), TrapStatus::Disabled);
        assert!(ctx.owner().is_none());
    }

    #[test]
    fn test_drop_releases_owner() {
        let (control, procs) = setup();
        let pid = procs.spawn("monitor");
        procs.enter(pid);

        let channel = control.open_channel();
        let ctx = control.registry().find_by_bdf(PF).unwrap();
        ctx.claim(&procs.current(), &*procs).unwrap();
        channel.bind(&ctx);
        assert!(ctx.owner().is_some());

        drop(channel);
        assert!(ctx.owner().is_none());
    }

    #[test]
    fn test_close_without_binding_is_noop() {
        let (control, procs) = setup();
        let pid = procs.spawn("monitor");
        procs.enter(pid);
        let ctx = control.registry().find_by_bdf(PF).unwrap();
        ctx.claim(&procs.current(), &*procs).unwrap();

        // A channel that never captured the context leaves it alone
        control.open_channel().close();
        assert!(ctx.owner().is_some());
    }
}
