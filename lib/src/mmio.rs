//! Memory-mapped register access.
//!
//! Physical memory is identity-mapped in this kernel, so mapping a register
//! block is a bounds record rather than a page-table update. Drivers take an
//! [`MmioMapper`] so tests can hand out [`crate::testing::FakeMmio`] blocks.

use core::ptr::{read_volatile, write_volatile};

/// 32-bit register window.
pub trait Mmio {
    fn read_u32(&self, offset: usize) -> u32;
    fn write_u32(&self, offset: usize, value: u32);

    /// Low dword then high dword. Not atomic against a running counter.
    fn read_u64(&self, offset: usize) -> u64 {
        let low = self.read_u32(offset) as u64;
        let high = self.read_u32(offset + 4) as u64;
        (high << 32) | low
    }

    fn write_u64(&self, offset: usize, value: u64) {
        self.write_u32(offset, value as u32);
        self.write_u32(offset + 4, (value >> 32) as u32);
    }
}

/// Produces register windows for physical ranges.
pub trait MmioMapper {
    type Region: Mmio;

    fn map(&self, phys: u64, size: usize) -> Option<Self::Region>;
}

#[derive(Clone, Copy, Debug)]
pub struct MmioRegion {
    virt_base: u64,
    phys_base: u64,
    size: usize,
}

impl MmioRegion {
    #[inline]
    pub const fn empty() -> Self {
        Self {
            virt_base: 0,
            phys_base: 0,
            size: 0,
        }
    }

    /// Identity-mapped register block at `phys`.
    ///
    /// # Safety
    ///
    /// `phys..phys + size` must be device memory reachable at the same
    /// virtual address for as long as the region is used.
    pub unsafe fn identity(phys: u64, size: usize) -> Option<Self> {
        if phys == 0 || size == 0 {
            return None;
        }
        phys.checked_add(size as u64)?;
        Some(Self {
            virt_base: phys,
            phys_base: phys,
            size,
        })
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.virt_base != 0
    }

    #[inline]
    pub fn phys_base(&self) -> u64 {
        self.phys_base
    }

    #[inline]
    pub fn virt_base(&self) -> u64 {
        self.virt_base
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    fn covers(&self, offset: usize, width: usize) -> bool {
        self.is_mapped()
            && offset % width == 0
            && offset.checked_add(width).is_some_and(|end| end <= self.size)
    }
}

impl Mmio for MmioRegion {
    #[inline]
    fn read_u32(&self, offset: usize) -> u32 {
        if !self.covers(offset, 4) {
            return 0;
        }
        let ptr = (self.virt_base + offset as u64) as *const u32;
        // SAFETY: bounds and alignment checked; `identity` contract covers the mapping.
        unsafe { read_volatile(ptr) }
    }

    #[inline]
    fn write_u32(&self, offset: usize, value: u32) {
        if !self.covers(offset, 4) {
            return;
        }
        let ptr = (self.virt_base + offset as u64) as *mut u32;
        // SAFETY: as for `read_u32`.
        unsafe { write_volatile(ptr, value) }
    }
}

/// Maps device ranges 1:1.
#[derive(Clone, Copy, Debug)]
pub struct IdentityMapper {
    _private: (),
}

impl IdentityMapper {
    /// # Safety
    ///
    /// Physical memory must be identity-mapped and uncached for device ranges.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl MmioMapper for IdentityMapper {
    type Region = MmioRegion;

    fn map(&self, phys: u64, size: usize) -> Option<MmioRegion> {
        // SAFETY: guaranteed by the contract of `IdentityMapper::new`.
        unsafe { MmioRegion::identity(phys, size) }
    }
}
