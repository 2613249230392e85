//! Model-Specific Register (MSR) addresses.

/// Model-Specific Register address.
///
/// MSRs are accessed via RDMSR/WRMSR using a 32-bit address. The newtype keeps
/// an MSR number from being passed where a port or a register offset is
/// expected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Msr(pub u32);

impl Msr {
    /// APIC base MSR: physical base address and enable flags.
    pub const APIC_BASE: Self = Self(0x1B);

    #[inline]
    pub const fn address(self) -> u32 {
        self.0
    }
}
