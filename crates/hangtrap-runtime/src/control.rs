//! Debug control service
//!
//! `DebugControl` owns the trap-context registry and the collaborators the
//! protocol needs (process table, device backend, cookie generator). The
//! hypervisor core attaches devices and calls the hooks on it; monitors
//! talk to it through `ControlChannel`s.

use std::sync::Arc;

use hangtrap_core::backend::{DeviceBackend, MesDebugInfo};
use hangtrap_core::cookie::CookieGenerator;
use hangtrap_core::error::{TrapError, TrapResult};
use hangtrap_core::id::{Bdf, DeviceHandle, VfIndex};
use hangtrap_core::process::ProcessTable;

use crate::channel::ControlChannel;
use crate::config::TrapConfig;
use crate::context::TrapContext;
use crate::registry::{TrapContextId, TrapContextRegistry};

pub(crate) struct Inner {
    pub(crate) config: TrapConfig,
    pub(crate) registry: TrapContextRegistry,
    pub(crate) procs: Arc<dyn ProcessTable>,
    pub(crate) backend: Arc<dyn DeviceBackend>,
    pub(crate) cookies: CookieGenerator,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.registry.destroy_all();
    }
}

/// Hang-trap service shared by the hypervisor core and every channel
///
/// Clones share the same registry.
#[derive(Clone)]
pub struct DebugControl {
    pub(crate) inner: Arc<Inner>,
}

impl DebugControl {
    pub fn new(
        config: TrapConfig,
        procs: Arc<dyn ProcessTable>,
        backend: Arc<dyn DeviceBackend>,
    ) -> Self {
        Self::with_cookies(config, procs, backend, CookieGenerator::new())
    }

    /// Service using a specific cookie generator
    pub fn with_cookies(
        config: TrapConfig,
        procs: Arc<dyn ProcessTable>,
        backend: Arc<dyn DeviceBackend>,
        cookies: CookieGenerator,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry: TrapContextRegistry::new(),
                procs,
                backend,
                cookies,
            }),
        }
    }

    /// Service tracking the host's real processes
    #[cfg(unix)]
    pub fn with_os_processes(config: TrapConfig, backend: Arc<dyn DeviceBackend>) -> Self {
        Self::new(config, Arc::new(crate::process::OsProcessTable::new()), backend)
    }

    pub fn config(&self) -> &TrapConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &TrapContextRegistry {
        &self.inner.registry
    }

    pub fn processes(&self) -> &dyn ProcessTable {
        &*self.inner.procs
    }

    pub fn backend(&self) -> &dyn DeviceBackend {
        &*self.inner.backend
    }

    /// Create the trap context for a physical GPU
    pub fn attach_device(&self, device: DeviceHandle, pf_bdf: Bdf, gpu_index: usize) -> TrapContextId {
        let config = &self.inner.config;
        let id = self.inner.registry.create_for_device(
            device,
            pf_bdf,
            gpu_index,
            config.untrap_timeout_for(gpu_index),
            config.max_diag_data_size,
        );
        tracing::info!(bdf = %pf_bdf, gpu_index, "device attached");
        id
    }

    /// Tear down one device's context, waking its waiters
    pub fn detach_device(&self, device: DeviceHandle) -> bool {
        let found = self.inner.registry.destroy(device);
        if found {
            tracing::info!(device = %device, "device detached");
        }
        found
    }

    /// Tear down every context
    pub fn shutdown(&self) {
        self.inner.registry.destroy_all();
        tracing::info!("hang-trap service shut down");
    }

    /// Open a monitor session
    pub fn open_channel(&self) -> ControlChannel {
        ControlChannel::new(self.clone())
    }

    pub(crate) fn context_for_bdf(&self, bdf: Bdf) -> TrapResult<Arc<TrapContext>> {
        self.inner.registry.find_by_bdf(bdf).ok_or_else(|| {
            tracing::error!(bdf = %bdf, "no trap context");
            TrapError::NotFound
        })
    }

    /// Frame-buffer bad-page records of every adapter on the bus of `bdf`
    pub fn get_ffbm_data(&self, bdf: Bdf) -> Vec<u8> {
        let budget = self.inner.config.ffbm_buffer_size();
        let mut out = Vec::new();
        for ctx in self.inner.registry.on_bus(bdf) {
            let remaining = budget.saturating_sub(out.len());
            if remaining == 0 {
                break;
            }
            out.extend(self.inner.backend.ffbm_data(ctx.device(), remaining));
        }
        out.truncate(budget);
        tracing::debug!(bdf = %bdf, size = out.len(), "ffbm data read");
        out
    }

    /// Adapter and function owning `bdf`
    fn function_of(&self, bdf: Bdf) -> Option<(Arc<TrapContext>, VfIndex)> {
        let backend = &self.inner.backend;
        self.inner.registry.snapshot().into_iter().find_map(|ctx| {
            if ctx.pf_bdf() == bdf {
                return Some((ctx, VfIndex::PF));
            }
            (0..VfIndex::MAX_VFS)
                .map(VfIndex::new)
                .find(|&vf| backend.vf_bdf(ctx.device(), vf) == Some(bdf))
                .map(|vf| (ctx, vf))
        })
    }

    /// Firmware debug area of the function owning `bdf`
    ///
    /// Zeroed when the function has none.
    pub fn get_mes_debug_info(&self, bdf: Bdf) -> TrapResult<MesDebugInfo> {
        let Some((ctx, vf)) = self.function_of(bdf) else {
            tracing::warn!(bdf = %bdf, "no device owns this function");
            return Err(TrapError::NotFound);
        };
        let info = self.inner.backend.mes_debug_info(bdf).unwrap_or_default();
        tracing::debug!(bdf = %ctx.pf_bdf(), vf = %vf, size = info.size, "mes debug info");
        Ok(info)
    }
}

impl std::fmt::Debug for DebugControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugControl")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::SimProcessTable;
    use hangtrap_core::backend::StaticBackend;
    use hangtrap_core::state::TrapStatus;

    const DEV: DeviceHandle = DeviceHandle::new(1);
    const PF: Bdf = Bdf::new(0x0800);

    fn control(backend: StaticBackend) -> DebugControl {
        DebugControl::new(
            TrapConfig::new().ffbm_max_records(1),
            Arc::new(SimProcessTable::new()),
            Arc::new(backend),
        )
    }

    #[test]
    fn test_attach_detach() {
        let control = control(StaticBackend::new());
        control.attach_device(DEV, PF, 0);
        assert_eq!(control.registry().len(), 1);
        assert_eq!(
            control.context_for_bdf(PF).unwrap().untrap_timeout(),
            control.config().untrap_timeout_for(0)
        );

        assert!(control.detach_device(DEV));
        assert!(!control.detach_device(DEV));
        assert_eq!(control.context_for_bdf(PF).unwrap_err(), TrapError::NotFound);
    }

    #[test]
    fn test_shutdown_leaves_disabled() {
        let control = control(StaticBackend::new());
        control.attach_device(DEV, PF, 0);
        let ctx = control.context_for_bdf(PF).unwrap();
        control.shutdown();
        assert!(control.registry().is_empty());
        assert_eq!(ctx.status(), TrapStatus::Disabled);
    }

    #[test]
    fn test_ffbm_budget() {
        let backend = StaticBackend::new();
        backend.set_ffbm_data(DEV, vec![0xaa; 100]);
        backend.set_ffbm_data(DeviceHandle::new(2), vec![0xbb; 100]);
        let control = control(backend);
        control.attach_device(DEV, PF, 0);
        control.attach_device(DeviceHandle::new(2), Bdf::new(0x0900), 1);

        // One 128-byte record
        let data = control.get_ffbm_data(Bdf::new(0x0815));
        assert_eq!(data, vec![0xaa; 100]);
        assert!(control.get_ffbm_data(Bdf::new(0x0a00)).is_empty());
    }

    #[test]
    fn test_mes_debug_info() {
        let vf0 = Bdf::new(0x0802);
        let backend = StaticBackend::new().with_vf(DEV, VfIndex::new(0), vf0);
        backend.set_mes_debug_info(
            vf0,
            MesDebugInfo {
                size: 0x1000,
                addr: 0xdead_0000,
            },
        );
        let control = control(backend);
        control.attach_device(DEV, PF, 0);

        assert_eq!(control.get_mes_debug_info(vf0).unwrap().addr, 0xdead_0000);
        assert_eq!(control.get_mes_debug_info(PF).unwrap(), MesDebugInfo::default());
        assert_eq!(control.get_mes_debug_info(Bdf::new(0x0803)), Err(TrapError::NotFound));
    }
}
