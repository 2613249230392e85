//! Local APIC definitions: base MSR layout, register offsets, control flags.

// =============================================================================
// APIC Base MSR
// =============================================================================

/// Physical base the firmware normally programs into `IA32_APIC_BASE`.
pub const LAPIC_DEFAULT_BASE: u64 = 0xFEE0_0000;

/// Size of the memory-mapped local APIC register page.
pub const LAPIC_REGION_SIZE: usize = 0x1000;

/// IA32_APIC_BASE MSR value (MSR 0x1B).
///
/// Layout:
/// - Bit 8: BSP flag
/// - Bit 10: x2APIC enable
/// - Bit 11: APIC global enable
/// - Bits 12-51: APIC base physical address (4KB aligned)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct ApicBaseMsr(pub u64);

impl ApicBaseMsr {
    pub const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;
    pub const BSP: u64 = 1 << 8;
    pub const X2APIC_ENABLE: u64 = 1 << 10;
    pub const GLOBAL_ENABLE: u64 = 1 << 11;

    #[inline]
    pub const fn address(self) -> u64 {
        self.0 & Self::ADDR_MASK
    }

    #[inline]
    pub const fn is_bsp(self) -> bool {
        self.0 & Self::BSP != 0
    }

    #[inline]
    pub const fn is_enabled(self) -> bool {
        self.0 & Self::GLOBAL_ENABLE != 0
    }

    /// Same flags, base replaced and the global enable bit forced on.
    #[inline]
    pub const fn with_base_enabled(self, base: u64) -> Self {
        Self((self.0 & !Self::ADDR_MASK) | (base & Self::ADDR_MASK) | Self::GLOBAL_ENABLE)
    }
}

// =============================================================================
// Local APIC Register Offsets
// =============================================================================

pub const LAPIC_ID: usize = 0x020;
pub const LAPIC_VERSION: usize = 0x030;
pub const LAPIC_EOI: usize = 0x0B0;
pub const LAPIC_SPURIOUS: usize = 0x0F0;

/// First 32-bit word of the 256-bit In-Service Register.
pub const LAPIC_ISR: usize = 0x100;

/// First 32-bit word of the 256-bit Interrupt Request Register.
pub const LAPIC_IRR: usize = 0x200;

pub const LAPIC_ESR: usize = 0x280;

/// LVT registers, 0x10 apart, in line order: timer, thermal, performance
/// counter, LINT0, LINT1, error.
pub const LAPIC_LVT_TIMER: usize = 0x320;
pub const LAPIC_LVT_THERMAL: usize = 0x330;
pub const LAPIC_LVT_PERFCNT: usize = 0x340;
pub const LAPIC_LVT_LINT0: usize = 0x350;
pub const LAPIC_LVT_LINT1: usize = 0x360;
pub const LAPIC_LVT_ERROR: usize = 0x370;

pub const LAPIC_LVT_STRIDE: usize = 0x10;
pub const LAPIC_LVT_COUNT: usize = 6;

// =============================================================================
// LAPIC Control Flags
// =============================================================================

/// Software enable (bit 8 of the spurious vector register).
pub const LAPIC_SPURIOUS_ENABLE: u32 = 1 << 8;

/// Vector delivered for spurious interrupts.
pub const LAPIC_SPURIOUS_VECTOR: u32 = 0x3F;

/// Mask flag for LVT entries (bit 16).
pub const LAPIC_LVT_MASKED: u32 = 1 << 16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_base_is_replaced_and_enabled() {
        let msr = ApicBaseMsr(ApicBaseMsr::BSP);
        let programmed = msr.with_base_enabled(LAPIC_DEFAULT_BASE);
        assert_eq!(programmed.address(), LAPIC_DEFAULT_BASE);
        assert!(programmed.is_enabled());
        assert!(programmed.is_bsp());
    }

    #[test]
    fn lvt_registers_are_evenly_spaced() {
        assert_eq!(LAPIC_LVT_TIMER + 3 * LAPIC_LVT_STRIDE, LAPIC_LVT_LINT0);
        assert_eq!(
            LAPIC_LVT_TIMER + (LAPIC_LVT_COUNT - 1) * LAPIC_LVT_STRIDE,
            LAPIC_LVT_ERROR
        );
    }
}
