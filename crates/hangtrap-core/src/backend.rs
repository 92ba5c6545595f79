//! Hypervisor-side collaborators
//!
//! The trap protocol never produces diagnosis bytes itself. It asks a
//! `DeviceBackend` to resolve VF indices, collect snapshots, and serve the
//! auxiliary debug reads.
//!
//! # Implementors
//!
//! - The hypervisor core (production): backed by the GPU driver.
//! - `StaticBackend`: in-memory tables, used by tests and the demo.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{TrapError, TrapResult};
use crate::id::{Bdf, DeviceHandle, VfIndex};

/// Location of a function's firmware debug area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MesDebugInfo {
    pub size: u32,
    pub addr: u64,
}

/// Services the hypervisor core provides to the trap protocol
///
/// **Contract:**
/// - `collect_diag_data` must return at most `max_len` bytes.
/// - None of these calls may block on trap-context state.
pub trait DeviceBackend: Send + Sync {
    /// Resolve a VF index on `dev` to its BDF
    fn vf_bdf(&self, dev: DeviceHandle, vf: VfIndex) -> Option<Bdf>;

    /// Synchronously collect the current diagnosis snapshot for a PF
    fn collect_diag_data(&self, pf_bdf: Bdf, max_len: usize) -> TrapResult<Vec<u8>>;

    /// Frame-buffer bad-page records of one adapter, at most `max_len` bytes
    fn ffbm_data(&self, dev: DeviceHandle, max_len: usize) -> Vec<u8> {
        let _ = (dev, max_len);
        Vec::new()
    }

    /// Firmware debug area for the function owning `bdf`
    fn mes_debug_info(&self, bdf: Bdf) -> Option<MesDebugInfo> {
        let _ = bdf;
        None
    }
}

/// In-memory backend with fixed tables
#[derive(Default)]
pub struct StaticBackend {
    vfs: Mutex<HashMap<(DeviceHandle, u32), Bdf>>,
    diag: Mutex<HashMap<Bdf, Vec<u8>>>,
    ffbm: Mutex<HashMap<DeviceHandle, Vec<u8>>>,
    mes: Mutex<HashMap<Bdf, MesDebugInfo>>,
    fail_collect: AtomicBool,
    collect_calls: AtomicUsize,
}

impl StaticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `vf` on `dev` to `bdf`
    pub fn with_vf(self, dev: DeviceHandle, vf: VfIndex, bdf: Bdf) -> Self {
        self.vfs.lock().insert((dev, vf.as_u32()), bdf);
        self
    }

    /// Set the snapshot returned for `pf_bdf`
    pub fn set_diag_data(&self, pf_bdf: Bdf, data: Vec<u8>) {
        self.diag.lock().insert(pf_bdf, data);
    }

    pub fn set_ffbm_data(&self, dev: DeviceHandle, data: Vec<u8>) {
        self.ffbm.lock().insert(dev, data);
    }

    pub fn set_mes_debug_info(&self, bdf: Bdf, info: MesDebugInfo) {
        self.mes.lock().insert(bdf, info);
    }

    /// Make every collection fail
    pub fn set_fail_collect(&self, fail: bool) {
        self.fail_collect.store(fail, Ordering::Relaxed);
    }

    /// Number of `collect_diag_data` calls so far
    pub fn collect_calls(&self) -> usize {
        self.collect_calls.load(Ordering::Relaxed)
    }
}

impl DeviceBackend for StaticBackend {
    fn vf_bdf(&self, dev: DeviceHandle, vf: VfIndex) -> Option<Bdf> {
        self.vfs.lock().get(&(dev, vf.as_u32())).copied()
    }

    fn collect_diag_data(&self, pf_bdf: Bdf, max_len: usize) -> TrapResult<Vec<u8>> {
        self.collect_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_collect.load(Ordering::Relaxed) {
            return Err(TrapError::Io);
        }
        let diag = self.diag.lock();
        let data = diag.get(&pf_bdf).map(Vec::as_slice).unwrap_or(&[]);
        Ok(data[..data.len().min(max_len)].to_vec())
    }

    fn ffbm_data(&self, dev: DeviceHandle, max_len: usize) -> Vec<u8> {
        let ffbm = self.ffbm.lock();
        let data = ffbm.get(&dev).map(Vec::as_slice).unwrap_or(&[]);
        data[..data.len().min(max_len)].to_vec()
    }

    fn mes_debug_info(&self, bdf: Bdf) -> Option<MesDebugInfo> {
        self.mes.lock().get(&bdf).copied()
    }
}
