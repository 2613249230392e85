pub mod core;
pub mod cpuid;
pub mod interrupts;
pub mod msr;

pub use self::core::*;
pub use cpuid::*;
pub use interrupts::*;
pub use msr::*;

use doomos_abi::arch::Msr;

/// CPU seam for code that queries features or flips the interrupt flag.
///
/// [`NativeCpu`] executes the instructions; [`crate::testing::FakeCpu`]
/// answers from a script and records what was asked of it.
pub trait CpuOps {
    fn cpuid(&self, leaf: u32) -> (u32, u32, u32, u32);
    fn read_msr(&self, msr: Msr) -> u64;
    fn write_msr(&self, msr: Msr, value: u64);
    fn disable_interrupts(&self);
    fn enable_interrupts(&self);
}

impl<T: CpuOps + ?Sized> CpuOps for &T {
    fn cpuid(&self, leaf: u32) -> (u32, u32, u32, u32) {
        (**self).cpuid(leaf)
    }
    fn read_msr(&self, msr: Msr) -> u64 {
        (**self).read_msr(msr)
    }
    fn write_msr(&self, msr: Msr, value: u64) {
        (**self).write_msr(msr, value)
    }
    fn disable_interrupts(&self) {
        (**self).disable_interrupts()
    }
    fn enable_interrupts(&self) {
        (**self).enable_interrupts()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct NativeCpu {
    _private: (),
}

impl NativeCpu {
    /// # Safety
    ///
    /// MSR access and `cli`/`sti` require ring 0.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl CpuOps for NativeCpu {
    fn cpuid(&self, leaf: u32) -> (u32, u32, u32, u32) {
        cpuid::cpuid(leaf)
    }
    fn read_msr(&self, msr: Msr) -> u64 {
        msr::read_msr(msr)
    }
    fn write_msr(&self, msr: Msr, value: u64) {
        msr::write_msr(msr, value)
    }
    fn disable_interrupts(&self) {
        interrupts::disable_interrupts()
    }
    fn enable_interrupts(&self) {
        interrupts::enable_interrupts()
    }
}
