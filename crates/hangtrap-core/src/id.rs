//! Device identifier types
//!
//! `Bdf` names a PCI function (physical or virtual), `DeviceHandle` is the
//! hypervisor core's opaque reference to a physical adapter, and `VfIndex`
//! selects one function of that adapter.

use core::fmt;

/// PCI bus/device/function identifier
///
/// Packed the way the hypervisor reports it: bits 15..8 bus, 7..3 device,
/// 2..0 function. Upper bits carry the domain/segment and are preserved.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Bdf(u32);

impl Bdf {
    /// Create a Bdf from its raw packed value
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Bdf(raw)
    }

    /// Build a Bdf from its components
    #[inline]
    pub const fn from_parts(bus: u8, device: u8, function: u8) -> Self {
        Bdf(((bus as u32) << 8) | (((device as u32) & 0x1f) << 3) | ((function as u32) & 0x7))
    }

    /// Get the raw u32 value
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn bus(self) -> u8 {
        ((self.0 >> 8) & 0xff) as u8
    }

    #[inline]
    pub const fn device(self) -> u8 {
        ((self.0 >> 3) & 0x1f) as u8
    }

    #[inline]
    pub const fn function(self) -> u8 {
        (self.0 & 0x7) as u8
    }

    /// Same Bdf with the device/function byte cleared
    ///
    /// Frame-buffer block records are keyed by bus, so every function on
    /// the bus matches the base value.
    #[inline]
    pub const fn bus_base(self) -> Self {
        Bdf((self.0 >> 8) << 8)
    }
}

impl From<u32> for Bdf {
    #[inline]
    fn from(raw: u32) -> Self {
        Bdf(raw)
    }
}

impl From<Bdf> for u32 {
    #[inline]
    fn from(bdf: Bdf) -> Self {
        bdf.0
    }
}

impl fmt::Debug for Bdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bdf({:#06x} {})", self.0, self)
    }
}

impl fmt::Display for Bdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}.{:x}", self.bus(), self.device(), self.function())
    }
}

/// Opaque handle to a physical GPU adapter owned by the hypervisor core
///
/// The value is never dereferenced here; it is only compared.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct DeviceHandle(u64);

impl DeviceHandle {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        DeviceHandle(raw)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev#{:x}", self.0)
    }
}

/// Function index within an adapter
///
/// Indices `0..MAX_VFS` are virtual functions; `VfIndex::PF` is the
/// physical function itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct VfIndex(u32);

impl VfIndex {
    /// Maximum number of virtual functions per adapter
    pub const MAX_VFS: u32 = 31;

    /// The physical function
    pub const PF: VfIndex = VfIndex(Self::MAX_VFS);

    #[inline]
    pub const fn new(idx: u32) -> Self {
        VfIndex(idx)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_pf(self) -> bool {
        self.0 == Self::MAX_VFS
    }
}

impl From<u32> for VfIndex {
    #[inline]
    fn from(idx: u32) -> Self {
        VfIndex(idx)
    }
}

impl fmt::Display for VfIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pf() {
            write!(f, "pf")
        } else {
            write!(f, "vf{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bdf_components() {
        let bdf = Bdf::new(0x0800);
        assert_eq!(bdf.bus(), 0x08);
        assert_eq!(bdf.device(), 0);
        assert_eq!(bdf.function(), 0);
        assert_eq!(format!("{}", bdf), "08:00.0");

        let vf = Bdf::from_parts(0x08, 0x02, 0x5);
        assert_eq!(vf.as_u32(), 0x0815);
        assert_eq!(format!("{}", vf), "08:02.5");
    }

    #[test]
    fn test_bdf_bus_base() {
        assert_eq!(Bdf::new(0x0815).bus_base(), Bdf::new(0x0800));
        assert_eq!(Bdf::new(0x1_0815).bus_base(), Bdf::new(0x1_0800));
    }

    #[test]
    fn test_vf_index_pf() {
        assert!(VfIndex::PF.is_pf());
        assert!(!VfIndex::new(0).is_pf());
        assert_eq!(VfIndex::PF.as_u32(), 31);
        assert_eq!(format!("{}", VfIndex::new(3)), "vf3");
    }
}
