//! Access to firmware-owned physical memory.
//!
//! ACPI tables are read through [`PhysMemory`] so the parser never builds a
//! pointer itself. The kernel identity-maps low memory and uses
//! [`IdentityMemory`]; tests serve a synthetic firmware image. Every
//! multi-byte field is decoded explicitly as little-endian.

/// Read-only view of physical memory.
pub trait PhysMemory {
    /// `len` bytes starting at `phys`, or `None` if the range is not readable.
    fn bytes(&self, phys: u64, len: usize) -> Option<&[u8]>;
}

impl<T: PhysMemory + ?Sized> PhysMemory for &T {
    fn bytes(&self, phys: u64, len: usize) -> Option<&[u8]> {
        (**self).bytes(phys, len)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct IdentityMemory {
    _private: (),
}

impl IdentityMemory {
    /// # Safety
    ///
    /// Every physical address the parser is pointed at (the ACPI region and
    /// whatever its tables reference) must be identity-mapped and stay
    /// unmodified while borrowed.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl PhysMemory for IdentityMemory {
    fn bytes(&self, phys: u64, len: usize) -> Option<&[u8]> {
        if phys == 0 {
            return None;
        }
        phys.checked_add(len as u64)?;
        // SAFETY: guaranteed by the contract of `IdentityMemory::new`.
        Some(unsafe { core::slice::from_raw_parts(phys as *const u8, len) })
    }
}

#[inline]
pub(crate) fn le_u8(bytes: &[u8], offset: usize) -> Option<u8> {
    bytes.get(offset).copied()
}

#[inline]
pub(crate) fn le_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let raw = bytes.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([raw[0], raw[1]]))
}

#[inline]
pub(crate) fn le_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

#[inline]
pub(crate) fn le_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    let raw = bytes.get(offset..offset.checked_add(8)?)?;
    let mut word = [0u8; 8];
    word.copy_from_slice(raw);
    Some(u64::from_le_bytes(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_fields_decode_and_bound_check() {
        let bytes = [0x78, 0x56, 0x34, 0x12, 0xEF, 0xCD, 0xAB, 0x90];
        assert_eq!(le_u16(&bytes, 0), Some(0x5678));
        assert_eq!(le_u32(&bytes, 0), Some(0x1234_5678));
        assert_eq!(le_u64(&bytes, 0), Some(0x90AB_CDEF_1234_5678));
        assert_eq!(le_u32(&bytes, 6), None);
        assert_eq!(le_u8(&bytes, 8), None);
        assert_eq!(le_u16(&bytes, usize::MAX), None);
    }
}
