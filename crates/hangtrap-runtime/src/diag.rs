//! Diagnosis data store
//!
//! Each trap context owns one `DiagDataStore`. Reads are served from the
//! pending snapshot slot first (filled by manual dumps) and otherwise by a
//! synchronous, size-bounded query to the `DeviceBackend`.

use hangtrap_core::backend::DeviceBackend;
use hangtrap_core::cookie::NO_COOKIE;
use hangtrap_core::error::TrapResult;
use hangtrap_core::id::Bdf;
use parking_lot::Mutex;

/// Diagnosis bytes plus the cookie of the event they belong to
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiagData {
    pub bytes: Vec<u8>,
    pub cookie: u32,
}

impl DiagData {
    /// Zero-length read with no cookie
    pub fn empty() -> Self {
        Self {
            bytes: Vec::new(),
            cookie: NO_COOKIE,
        }
    }

    /// Data with the cookie dropped when there are no bytes
    pub fn new(bytes: Vec<u8>, cookie: u32) -> Self {
        let cookie = if bytes.is_empty() { NO_COOKIE } else { cookie };
        Self { bytes, cookie }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Single-slot snapshot cache plus the bounded query path
pub struct DiagDataStore {
    pending: Mutex<Option<DiagData>>,
    max_size: usize,
}

impl DiagDataStore {
    pub fn new(max_size: usize) -> Self {
        Self {
            pending: Mutex::new(None),
            max_size,
        }
    }

    /// Cap applied to every copy
    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Replace the pending snapshot
    pub fn stash(&self, mut snapshot: DiagData) {
        snapshot.bytes.truncate(self.max_size);
        *self.pending.lock() = Some(snapshot);
    }

    /// Take the pending snapshot, truncated to `limit` bytes
    pub fn take(&self, limit: usize) -> Option<DiagData> {
        let mut snapshot = self.pending.lock().take()?;
        snapshot.bytes.truncate(limit);
        Some(DiagData::new(snapshot.bytes, snapshot.cookie))
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    pub fn clear(&self) {
        self.pending.lock().take();
    }

    /// Query the backend for at most `requested` bytes
    pub fn query(
        &self,
        backend: &dyn DeviceBackend,
        pf_bdf: Bdf,
        requested: usize,
    ) -> TrapResult<Vec<u8>> {
        let limit = requested.min(self.max_size);
        let mut bytes = backend.collect_diag_data(pf_bdf, limit)?;
        bytes.truncate(limit);
        Ok(bytes)
    }

    /// Query a full-size snapshot and stash it under `cookie`
    ///
    /// Returns the stashed length.
    pub fn capture(&self, backend: &dyn DeviceBackend, pf_bdf: Bdf, cookie: u32) -> TrapResult<usize> {
        let bytes = self.query(backend, pf_bdf, self.max_size)?;
        let len = bytes.len();
        self.stash(DiagData { bytes, cookie });
        Ok(len)
    }
}

impl std::fmt::Debug for DiagDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagDataStore")
            .field("pending", &self.has_pending())
            .field("max_size", &self.max_size)
            .finish()
    }
}
