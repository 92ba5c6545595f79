//! Trap context registry
//!
//! Contexts live in an arena indexed by `TrapContextId`. The registry lock
//! only guards insertion, removal and lookup; it is never held while a
//! context is locked or waited on.

use std::sync::Arc;
use std::time::Duration;

use hangtrap_core::id::{Bdf, DeviceHandle};
use parking_lot::Mutex;

use crate::context::TrapContext;

/// Stable index of a context in the registry arena
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct TrapContextId(u32);

impl TrapContextId {
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for TrapContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// All trap contexts, one per attached physical GPU
#[derive(Default)]
pub struct TrapContextRegistry {
    slots: Mutex<Vec<Option<Arc<TrapContext>>>>,
}

impl TrapContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the context for a newly attached device
    ///
    /// A device that is already registered keeps its context.
    pub fn create_for_device(
        &self,
        device: DeviceHandle,
        pf_bdf: Bdf,
        gpu_index: usize,
        untrap_timeout: Duration,
        max_diag_size: usize,
    ) -> TrapContextId {
        let mut slots = self.slots.lock();
        if let Some(idx) = slots
            .iter()
            .position(|slot| matches!(slot, Some(ctx) if ctx.device() == device))
        {
            tracing::warn!(bdf = %pf_bdf, device = %device, "device already has a trap context");
            return TrapContextId(idx as u32);
        }

        let ctx = Arc::new(TrapContext::new(
            device,
            pf_bdf,
            gpu_index,
            untrap_timeout,
            max_diag_size,
        ));
        let idx = match slots.iter().position(Option::is_none) {
            Some(free) => {
                slots[free] = Some(ctx);
                free
            }
            None => {
                slots.push(Some(ctx));
                slots.len() - 1
            }
        };
        tracing::debug!(bdf = %pf_bdf, gpu_index, ?untrap_timeout, "trap context created");
        TrapContextId(idx as u32)
    }

    pub fn get(&self, id: TrapContextId) -> Option<Arc<TrapContext>> {
        self.slots.lock().get(id.0 as usize)?.clone()
    }

    fn find(&self, pred: impl Fn(&TrapContext) -> bool) -> Option<Arc<TrapContext>> {
        self.slots
            .lock()
            .iter()
            .flatten()
            .find(|ctx| pred(ctx))
            .cloned()
    }

    pub fn find_by_bdf(&self, bdf: Bdf) -> Option<Arc<TrapContext>> {
        self.find(|ctx| ctx.pf_bdf() == bdf)
    }

    pub fn find_by_device(&self, device: DeviceHandle) -> Option<Arc<TrapContext>> {
        self.find(|ctx| ctx.device() == device)
    }

    /// Every context whose PF sits on the same bus as `bdf`
    pub fn on_bus(&self, bdf: Bdf) -> Vec<Arc<TrapContext>> {
        let bus = bdf.bus_base();
        self.snapshot()
            .into_iter()
            .filter(|ctx| ctx.pf_bdf().bus_base() == bus)
            .collect()
    }

    /// Current contexts, in arena order
    pub fn snapshot(&self) -> Vec<Arc<TrapContext>> {
        self.slots.lock().iter().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and tear down the context of `device`
    pub fn destroy(&self, device: DeviceHandle) -> bool {
        let ctx = {
            let mut slots = self.slots.lock();
            slots
                .iter_mut()
                .find(|slot| matches!(slot, Some(ctx) if ctx.device() == device))
                .and_then(Option::take)
        };
        match ctx {
            Some(ctx) => {
                ctx.shutdown();
                tracing::debug!(bdf = %ctx.pf_bdf(), "trap context destroyed");
                true
            }
            None => false,
        }
    }

    /// Tear down every context
    pub fn destroy_all(&self) {
        let contexts: Vec<_> = self.slots.lock().drain(..).flatten().collect();
        for ctx in contexts {
            ctx.shutdown();
        }
    }
}

impl std::fmt::Debug for TrapContextRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrapContextRegistry")
            .field("contexts", &self.len())
            .finish()
    }
}
