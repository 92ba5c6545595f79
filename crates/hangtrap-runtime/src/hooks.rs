//! Hypervisor-facing entry points
//!
//! Called by the hypervisor core's reset and event handling paths. None of
//! these ever fail the caller's reset flow: a missing context or monitor is
//! reported as `Handshake::Skipped`, and the only error is a `Timeout` when
//! the monitor does not finish its dump in time.

use hangtrap_core::cookie::NO_COOKIE;
use hangtrap_core::error::TrapResult;
use hangtrap_core::id::{Bdf, DeviceHandle, VfIndex};
use hangtrap_core::state::TrapEventKind;

use crate::control::DebugControl;

/// Why a hang or manual-dump signal did not reach a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The device has no trap context
    NoContext,
    /// No live monitor owns the context
    NoMonitor,
    /// The VF index did not resolve to a function
    UnknownVf,
    /// The context was not waiting for an event
    NotWaiting,
}

/// Result of handing an event to the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// The monitor was trapped and reported the dump done
    Completed { cookie: u32 },
    Skipped(SkipReason),
}

impl Handshake {
    #[inline]
    pub fn is_completed(&self) -> bool {
        matches!(self, Handshake::Completed { .. })
    }
}

/// Device addressed by handle or by PF BDF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRef {
    Handle(DeviceHandle),
    Bdf(Bdf),
}

impl From<DeviceHandle> for DeviceRef {
    fn from(device: DeviceHandle) -> Self {
        DeviceRef::Handle(device)
    }
}

impl From<Bdf> for DeviceRef {
    fn from(bdf: Bdf) -> Self {
        DeviceRef::Bdf(bdf)
    }
}

impl DebugControl {
    fn deliver(&self, device: DeviceHandle, vf: VfIndex, kind: TrapEventKind) -> TrapResult<Handshake> {
        let inner = &self.inner;
        let Some(ctx) = inner.registry.find_by_device(device) else {
            tracing::error!(device = %device, "no trap context");
            return Ok(Handshake::Skipped(SkipReason::NoContext));
        };

        let result = ctx.deliver(kind, vf, &*inner.procs, &*inner.backend, &inner.cookies);

        if kind == TrapEventKind::ManualDump
            && !matches!(
                result,
                Ok(Handshake::Skipped(SkipReason::NoMonitor | SkipReason::UnknownVf))
            )
        {
            let cookie = match &result {
                Ok(Handshake::Completed { cookie }) => *cookie,
                // Timed out after delivery; the payload holds this session's cookie
                Err(_) => ctx.outcome().cookie,
                Ok(Handshake::Skipped(_)) => NO_COOKIE,
            };
            ctx.stash_snapshot(&*inner.backend, cookie);
        }
        result
    }

    /// A hang was detected on `vf` of `device`
    ///
    /// Blocks until the monitor reports the dump done or the device's
    /// untrap timeout expires.
    pub fn signal_hang_detected(&self, device: DeviceHandle, vf: VfIndex) -> TrapResult<Handshake> {
        self.deliver(device, vf, TrapEventKind::Reset)
    }

    /// An operator asked for a diagnosis capture of `vf` on `device`
    ///
    /// Runs the same handshake as a hang, then stores a snapshot that the
    /// next GetDiagnosticData returns ahead of any other data. A snapshot
    /// taken while the monitor was not waiting carries no cookie.
    pub fn signal_manual_dump_requested(&self, device: DeviceHandle, vf: VfIndex) -> TrapResult<Handshake> {
        self.deliver(device, vf, TrapEventKind::ManualDump)
    }

    /// Diagnosis data for the current dump can now be read
    ///
    /// Returns whether a dumping session was completed.
    pub fn signal_diag_data_ready(&self, device: DeviceHandle) -> bool {
        let Some(ctx) = self.inner.registry.find_by_device(device) else {
            tracing::error!(device = %device, "no trap context");
            return false;
        };
        let done = ctx.mark_data_ready();
        if done {
            tracing::info!(bdf = %ctx.pf_bdf(), "diagnosis data ready");
        }
        done
    }

    /// Whether the legacy collection path must stay off for the device
    pub fn is_diag_collection_disabled(&self, target: impl Into<DeviceRef>) -> bool {
        let ctx = match target.into() {
            DeviceRef::Handle(device) => self.inner.registry.find_by_device(device),
            DeviceRef::Bdf(bdf) => self.inner.registry.find_by_bdf(bdf),
        };
        let Some(ctx) = ctx else {
            return false;
        };
        let disabled = ctx.collection_disabled();
        if disabled {
            tracing::info!(
                bdf = %ctx.pf_bdf(),
                "device is being trapped, diagnosis collection temporarily disabled"
            );
        }
        disabled
    }
}
