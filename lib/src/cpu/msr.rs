//! RDMSR/WRMSR wrappers. MSR numbers live in `doomos_abi::arch::msr`.

use ::core::arch::asm;

use doomos_abi::arch::Msr;

#[inline(always)]
pub fn read_msr(msr: Msr) -> u64 {
    let low: u32;
    let high: u32;
    unsafe {
        asm!(
            "rdmsr",
            out("eax") low,
            out("edx") high,
            in("ecx") msr.address(),
            options(nomem, nostack, preserves_flags)
        );
    }
    ((high as u64) << 32) | (low as u64)
}

#[inline(always)]
pub fn write_msr(msr: Msr, value: u64) {
    let low = value as u32;
    let high = (value >> 32) as u32;
    unsafe {
        asm!(
            "wrmsr",
            in("eax") low,
            in("edx") high,
            in("ecx") msr.address(),
            options(nomem, nostack, preserves_flags)
        );
    }
}
