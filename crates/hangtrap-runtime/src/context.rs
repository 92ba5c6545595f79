//! Per-device trap context
//!
//! One `TrapContext` exists per physical GPU function. It carries the trap
//! status, the owning monitor, the last event payload and three re-armable
//! completions:
//!
//! ```text
//!              StartTrap                 hang / manual dump
//!   DISABLED ------------> WAITING ------------------------> DUMPING
//!      ^  ^                   |                               |  |  ^
//!      |  |        StopTrap   v          StopTrap             |  |  | NotifyDumpDone
//!      |  +---------------- EXIT <----------------------------+  +--+
//!      |                                                      |
//!      +---------------------- SignalDiagDataReady -----------+
//! ```
//!
//! - `trap`: signaled when an event (or a stop) is delivered to the monitor
//! - `untrap`: signaled (latched) when the monitor has finished dumping
//! - `data_ready`: signaled when diagnosis data can be read; starts signaled
//!
//! Status, owner and payload are only touched under the context lock.
//! Waits on the completions always happen with the lock released, so a
//! waiter must re-read state after waking.

use std::time::Duration;

use hangtrap_core::backend::DeviceBackend;
use hangtrap_core::completion::{Completion, Interrupt, WaitOutcome};
use hangtrap_core::cookie::{CookieGenerator, NO_COOKIE};
use hangtrap_core::error::{TrapError, TrapResult};
use hangtrap_core::id::{Bdf, DeviceHandle, VfIndex};
use hangtrap_core::process::{ProcessIdentity, ProcessTable};
use hangtrap_core::state::{TrapEventKind, TrapStatus};
use parking_lot::Mutex;

use crate::diag::{DiagData, DiagDataStore};
use crate::hooks::{Handshake, SkipReason};

/// Event payload returned to a StartTrap caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapOutcome {
    /// Function that raised the event (PF or VF)
    pub bdf: Bdf,
    pub vf_index: VfIndex,
    pub event: TrapEventKind,
    /// Absolute errno of the last internal failure
    pub error_code: u32,
    pub cookie: u32,
}

impl TrapOutcome {
    /// Payload after a reset
    pub const fn cleared() -> Self {
        Self {
            bdf: Bdf::new(0),
            vf_index: VfIndex::new(0),
            event: TrapEventKind::Exit,
            error_code: 0,
            cookie: NO_COOKIE,
        }
    }
}

struct TrapState {
    status: TrapStatus,
    owner: Option<ProcessIdentity>,
    payload: TrapOutcome,
}

/// Trap state for one physical GPU
pub struct TrapContext {
    device: DeviceHandle,
    pf_bdf: Bdf,
    gpu_index: usize,
    untrap_timeout: Duration,
    state: Mutex<TrapState>,
    trap: Completion,
    untrap: Completion,
    data_ready: Completion,
    diag: DiagDataStore,
}

impl TrapContext {
    pub fn new(
        device: DeviceHandle,
        pf_bdf: Bdf,
        gpu_index: usize,
        untrap_timeout: Duration,
        max_diag_size: usize,
    ) -> Self {
        Self {
            device,
            pf_bdf,
            gpu_index,
            untrap_timeout,
            state: Mutex::new(TrapState {
                status: TrapStatus::Disabled,
                owner: None,
                payload: TrapOutcome::cleared(),
            }),
            trap: Completion::new(),
            untrap: Completion::new(),
            // A read before any session must not block
            data_ready: Completion::signaled(),
            diag: DiagDataStore::new(max_diag_size),
        }
    }

    #[inline]
    pub fn device(&self) -> DeviceHandle {
        self.device
    }

    #[inline]
    pub fn pf_bdf(&self) -> Bdf {
        self.pf_bdf
    }

    #[inline]
    pub fn gpu_index(&self) -> usize {
        self.gpu_index
    }

    #[inline]
    pub fn untrap_timeout(&self) -> Duration {
        self.untrap_timeout
    }

    pub fn status(&self) -> TrapStatus {
        self.state.lock().status
    }

    pub fn owner(&self) -> Option<ProcessIdentity> {
        self.state.lock().owner.clone()
    }

    /// Current event payload
    pub fn outcome(&self) -> TrapOutcome {
        self.state.lock().payload
    }

    pub fn diag(&self) -> &DiagDataStore {
        &self.diag
    }

    fn transition(&self, st: &mut TrapState, to: TrapStatus) {
        debug_assert!(
            st.status.can_transition(to),
            "illegal trap transition {} -> {}",
            st.status,
            to
        );
        tracing::debug!(bdf = %self.pf_bdf, from = %st.status, to = %to, "trap status");
        st.status = to;
    }

    /// Walk back to DISABLED through EXIT and forget the owner
    fn reset_status(&self, st: &mut TrapState) {
        if st.status.is_trapping() {
            self.transition(st, TrapStatus::Exit);
        }
        if st.status == TrapStatus::Exit {
            self.transition(st, TrapStatus::Disabled);
        }
        st.owner = None;
    }

    /// Clear the payload and re-arm the events for a new session
    fn reset_output(&self, st: &mut TrapState) {
        st.payload = TrapOutcome::cleared();
        self.trap.rearm();
        self.untrap.rearm();
        self.data_ready.rearm();
        self.data_ready.signal();
    }

    fn is_owner(st: &TrapState, caller: &ProcessIdentity, procs: &dyn ProcessTable) -> bool {
        matches!(&st.owner, Some(owner) if owner == caller && owner.is_live(procs))
    }

    fn live_owner(&self, procs: &dyn ProcessTable) -> Option<ProcessIdentity> {
        let st = self.state.lock();
        st.owner.as_ref().filter(|owner| owner.is_live(procs)).cloned()
    }

    fn wake_owner(&self, owner: &ProcessIdentity, procs: &dyn ProcessTable) {
        if let Err(err) = procs.send_wake(owner) {
            tracing::warn!(bdf = %self.pf_bdf, owner = %owner, %err, "failed to wake monitor");
        }
    }

    // ------------------------------------------------------------------
    // Monitor side
    // ------------------------------------------------------------------

    /// Make `caller` the owner unless another live process holds it
    ///
    /// Returns `true` when ownership was newly captured.
    pub fn claim(&self, caller: &ProcessIdentity, procs: &dyn ProcessTable) -> TrapResult<bool> {
        let mut st = self.state.lock();
        if let Some(owner) = &st.owner {
            if owner.is_live(procs) {
                return if owner == caller {
                    Ok(false)
                } else {
                    Err(TrapError::Busy)
                };
            }
            tracing::warn!(bdf = %self.pf_bdf, owner = %owner, "previous monitor is gone");
        }
        st.owner = Some(caller.clone());
        Ok(true)
    }

    /// Arm the trap and block until an event or a stop is delivered
    pub fn wait_for_trap(
        &self,
        caller: &ProcessIdentity,
        procs: &dyn ProcessTable,
        intr: &Interrupt,
    ) -> TrapResult<TrapOutcome> {
        {
            let mut st = self.state.lock();
            if !Self::is_owner(&st, caller, procs) {
                return Err(TrapError::PermissionDenied);
            }
            if st.status != TrapStatus::Disabled {
                return Err(TrapError::InvalidState);
            }
            self.reset_output(&mut st);
            self.transition(&mut st, TrapStatus::Waiting);
        }

        match self.trap.wait_interruptible(intr, None) {
            WaitOutcome::Signaled => Ok(self.state.lock().payload),
            _ => Err(TrapError::Interrupted),
        }
    }

    /// Release the core-side waiter after the monitor finished dumping
    pub fn notify_dump_done(&self, caller: &ProcessIdentity, procs: &dyn ProcessTable) -> TrapResult<()> {
        let st = self.state.lock();
        if !Self::is_owner(&st, caller, procs) {
            return Err(TrapError::PermissionDenied);
        }
        match st.status {
            TrapStatus::Dumping | TrapStatus::Exit => {
                self.untrap.signal_all();
                // Fresh data must be signaled by its producer
                self.data_ready.rearm();
                Ok(())
            }
            _ => Err(TrapError::InvalidState),
        }
    }

    /// Read diagnosis data for the current session
    pub fn read_diag_data(
        &self,
        caller: &ProcessIdentity,
        procs: &dyn ProcessTable,
        backend: &dyn DeviceBackend,
        requested: usize,
        intr: &Interrupt,
    ) -> TrapResult<DiagData> {
        {
            let st = self.state.lock();
            match &st.owner {
                None => return Ok(DiagData::empty()),
                Some(owner) if owner == caller && owner.is_live(procs) => {}
                Some(_) => return Err(TrapError::PermissionDenied),
            }
        }

        if let Some(snapshot) = self.diag.take(requested) {
            tracing::info!(bdf = %self.pf_bdf, size = snapshot.len(), "serving manual dump snapshot");
            return Ok(snapshot);
        }

        match self.data_ready.wait_interruptible(intr, None) {
            WaitOutcome::Signaled => {}
            _ => return Err(TrapError::Interrupted),
        }

        let cookie = {
            let st = self.state.lock();
            if st.owner.is_none() {
                return Ok(DiagData::empty());
            }
            st.payload.cookie
        };

        let bytes = self
            .diag
            .query(backend, self.pf_bdf, requested)
            .map_err(|err| {
                tracing::error!(bdf = %self.pf_bdf, %err, "diagnosis data query failed");
                TrapError::Io
            })?;
        tracing::info!(bdf = %self.pf_bdf, size = bytes.len(), "diagnosis data read");
        Ok(DiagData::new(bytes, cookie))
    }

    /// End the session; the context is DISABLED on success
    pub fn stop_trap(
        &self,
        caller: &ProcessIdentity,
        procs: &dyn ProcessTable,
        intr: &Interrupt,
    ) -> TrapResult<()> {
        let mut st = self.state.lock();
        if !Self::is_owner(&st, caller, procs) {
            return Err(TrapError::PermissionDenied);
        }
        tracing::info!(bdf = %self.pf_bdf, status = %st.status, "monitor stopping trap");

        let status = st.status;
        match status {
            TrapStatus::Disabled | TrapStatus::Exit => {}
            TrapStatus::Waiting => {
                self.transition(&mut st, TrapStatus::Exit);
                st.payload.event = TrapEventKind::Exit;
                st.payload.cookie = NO_COOKIE;
                st.payload.bdf = self.pf_bdf;
                self.trap.signal();
            }
            TrapStatus::Dumping if self.untrap.is_done() => {
                self.transition(&mut st, TrapStatus::Exit);
            }
            TrapStatus::Dumping => {
                drop(st);
                match self.untrap.wait_interruptible(intr, Some(self.untrap_timeout)) {
                    WaitOutcome::Signaled => {}
                    WaitOutcome::TimedOut => {
                        self.wake_owner(caller, procs);
                        tracing::error!(bdf = %self.pf_bdf, "timed out waiting for hang dump to finish");
                        return Err(TrapError::Timeout);
                    }
                    WaitOutcome::Interrupted => return Err(TrapError::Interrupted),
                }
                st = self.state.lock();
            }
        }

        st.payload.cookie = NO_COOKIE;
        self.reset_status(&mut st);
        Ok(())
    }

    /// Channel-close cleanup; does not check ownership
    ///
    /// A pending `wait_for_trap` is released with an `Exit` outcome, the
    /// same way `stop_trap` releases it.
    pub(crate) fn release(&self) {
        let mut st = self.state.lock();
        if st.status == TrapStatus::Waiting {
            st.payload = TrapOutcome {
                bdf: self.pf_bdf,
                ..TrapOutcome::cleared()
            };
            self.trap.signal();
        } else {
            self.reset_output(&mut st);
        }
        self.reset_status(&mut st);
        tracing::debug!(bdf = %self.pf_bdf, "trap context released");
    }

    // ------------------------------------------------------------------
    // Hypervisor side
    // ------------------------------------------------------------------

    /// Hand an event to the waiting monitor and wait for it to finish
    ///
    /// Returns `Err(Timeout)` once if the monitor does not answer within
    /// the untrap timeout; the status is left as is.
    pub(crate) fn deliver(
        &self,
        kind: TrapEventKind,
        vf: VfIndex,
        procs: &dyn ProcessTable,
        backend: &dyn DeviceBackend,
        cookies: &CookieGenerator,
    ) -> TrapResult<Handshake> {
        let Some(owner) = self.live_owner(procs) else {
            tracing::debug!(bdf = %self.pf_bdf, "no monitor attached");
            return Ok(Handshake::Skipped(SkipReason::NoMonitor));
        };

        let source = if vf.is_pf() {
            self.pf_bdf
        } else {
            match backend.vf_bdf(self.device, vf) {
                Some(bdf) => bdf,
                None => {
                    tracing::warn!(bdf = %self.pf_bdf, vf = %vf, "cannot resolve VF");
                    return Ok(Handshake::Skipped(SkipReason::UnknownVf));
                }
            }
        };

        let cookie = {
            let mut st = self.state.lock();
            if st.status != TrapStatus::Waiting {
                return Ok(Handshake::Skipped(SkipReason::NotWaiting));
            }
            self.transition(&mut st, TrapStatus::Dumping);
            let cookie = cookies.next();
            st.payload = TrapOutcome {
                bdf: source,
                vf_index: vf,
                event: kind,
                error_code: 0,
                cookie,
            };
            self.untrap.rearm();
            self.trap.signal();
            cookie
        };
        tracing::info!(
            bdf = %self.pf_bdf,
            source = %source,
            event = %kind,
            cookie,
            "event delivered to {}",
            owner
        );

        match self.untrap.wait_timeout(self.untrap_timeout) {
            WaitOutcome::Signaled => {
                tracing::info!(bdf = %self.pf_bdf, cookie, "monitor finished dumping");
                Ok(Handshake::Completed { cookie })
            }
            _ => {
                self.wake_owner(&owner, procs);
                tracing::error!(bdf = %self.pf_bdf, cookie, "hang dump timed out");
                Err(TrapError::Timeout)
            }
        }
    }

    /// Collect a snapshot into the pending slot tagged with `cookie`
    ///
    /// Callers pass `NO_COOKIE` when no session was delivered, so the
    /// snapshot never carries a cookie left over from an earlier hang.
    pub(crate) fn stash_snapshot(&self, backend: &dyn DeviceBackend, cookie: u32) {
        match self.diag.capture(backend, self.pf_bdf, cookie) {
            Ok(size) => tracing::info!(bdf = %self.pf_bdf, size, cookie, "manual dump snapshot stored"),
            Err(err) => tracing::warn!(bdf = %self.pf_bdf, %err, "manual dump snapshot failed"),
        }
    }

    /// DUMPING -> DISABLED and wake one reader
    pub(crate) fn mark_data_ready(&self) -> bool {
        {
            let mut st = self.state.lock();
            if st.status != TrapStatus::Dumping {
                return false;
            }
            self.transition(&mut st, TrapStatus::Disabled);
        }
        self.data_ready.signal();
        true
    }

    /// Legacy collection must wait while a non-manual session is active
    pub fn collection_disabled(&self) -> bool {
        let st = self.state.lock();
        st.payload.event != TrapEventKind::ManualDump && st.status.is_trapping()
    }

    /// Force EXIT, wake every waiter and return to DISABLED
    pub(crate) fn shutdown(&self) {
        let mut st = self.state.lock();
        if st.status.is_trapping() {
            self.transition(&mut st, TrapStatus::Exit);
        }
        st.payload.event = TrapEventKind::Exit;
        st.payload.cookie = NO_COOKIE;
        st.payload.bdf = self.pf_bdf;
        self.trap.signal_all();
        self.untrap.signal_all();
        self.data_ready.signal_all();
        self.reset_status(&mut st);
        self.diag.clear();
    }
}

impl std::fmt::Debug for TrapContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.lock();
        f.debug_struct("TrapContext")
            .field("device", &self.device)
            .field("pf_bdf", &self.pf_bdf)
            .field("status", &st.status)
            .field("owner", &st.owner)
            .field("payload", &st.payload)
            .finish()
    }
}
