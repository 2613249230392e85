//! Local APIC: feature detection, base MSR, spurious vector, LVT masks and EOI.

use doomos_abi::arch::Msr;
use doomos_abi::arch::apic::*;
use doomos_abi::arch::cpuid::{
    CPUID_FEAT_ECX_X2APIC, CPUID_FEAT_EDX_APIC, CPUID_FEAT_EDX_MSR, CPUID_LEAF_FEATURES,
};
use doomos_abi::arch::pic::{IMCR_APIC_MODE, IMCR_DATA, IMCR_PRESENT, IMCR_REGISTER, IMCR_SELECT};
use doomos_lib::{CpuOps, Mmio, PortIo, klog_debug, klog_info};

/// What CPUID leaf 1 says about the local APIC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApicSupport {
    pub apic: bool,
    pub msr: bool,
    pub x2apic: bool,
}

impl ApicSupport {
    pub fn detect<C: CpuOps>(cpu: &C) -> Self {
        let (_, _, ecx, edx) = cpu.cpuid(CPUID_LEAF_FEATURES);
        Self {
            apic: edx & CPUID_FEAT_EDX_APIC != 0,
            msr: edx & CPUID_FEAT_EDX_MSR != 0,
            x2apic: ecx & CPUID_FEAT_ECX_X2APIC != 0,
        }
    }

    /// The xAPIC path needs both the APIC itself and RDMSR/WRMSR.
    #[inline]
    pub fn usable(&self) -> bool {
        self.apic && self.msr
    }
}

/// Globally enable the local APIC through `IA32_APIC_BASE` and return its
/// physical base. A zero base is replaced with `fallback`.
pub fn enable_base_msr<C: CpuOps>(cpu: &C, fallback: u64) -> u64 {
    let current = ApicBaseMsr(cpu.read_msr(Msr::APIC_BASE));
    let base = match current.address() {
        0 => fallback,
        address => address,
    };
    let programmed = current.with_base_enabled(base);
    cpu.write_msr(Msr::APIC_BASE, programmed.0);
    klog_debug!(
        "APIC: base {:#x}{}{}",
        programmed.address(),
        if programmed.is_bsp() { " BSP" } else { "" },
        if current.is_enabled() { "" } else { " (enabled now)" }
    );
    programmed.address()
}

/// Route INTR/NMI through the APIC if the chipset has an IMCR.
/// Returns whether one was found.
pub fn configure_imcr<P: PortIo>(ports: &P) -> bool {
    if ports.read_u8(IMCR_SELECT) & IMCR_PRESENT == 0 {
        return false;
    }
    ports.write_u8(IMCR_SELECT, IMCR_REGISTER);
    ports.write_u8(IMCR_DATA, IMCR_APIC_MODE);
    klog_debug!("APIC: IMCR switched to APIC mode");
    true
}

#[inline]
const fn lvt_register(index: usize) -> usize {
    LAPIC_LVT_TIMER + index * LAPIC_LVT_STRIDE
}

/// 256-bit ISR/IRR style register: word `vector / 32`, bit `vector % 32`.
#[inline]
const fn vector_word(base: usize, vector: u8) -> (usize, u32) {
    (base + (vector as usize / 32) * 0x10, 1 << (vector % 32))
}

pub struct LocalApic<R: Mmio> {
    regs: R,
    phys_base: u64,
}

impl<R: Mmio> LocalApic<R> {
    pub fn new(regs: R, phys_base: u64) -> Self {
        Self { regs, phys_base }
    }

    #[inline]
    pub fn phys_base(&self) -> u64 {
        self.phys_base
    }

    #[inline]
    pub fn read_register(&self, reg: usize) -> u32 {
        self.regs.read_u32(reg)
    }

    #[inline]
    pub fn write_register(&self, reg: usize, value: u32) {
        self.regs.write_u32(reg, value)
    }

    pub fn id(&self) -> u32 {
        self.read_register(LAPIC_ID) >> 24
    }

    pub fn version(&self) -> u32 {
        self.read_register(LAPIC_VERSION) & 0xFF
    }

    /// Software-enable with the spurious vector, preserving the other bits.
    pub fn program_spurious(&self) {
        let svr = self.read_register(LAPIC_SPURIOUS);
        let svr = (svr & !0xFF) | LAPIC_SPURIOUS_VECTOR | LAPIC_SPURIOUS_ENABLE;
        self.write_register(LAPIC_SPURIOUS, svr);
    }

    pub fn mask_all_lvt(&self) {
        for index in 0..LAPIC_LVT_COUNT {
            self.set_lvt_masked(index, true);
        }
    }

    /// `index` counts LVT entries from the timer (0) to the error entry (5).
    pub fn set_lvt_masked(&self, index: usize, masked: bool) {
        debug_assert!(index < LAPIC_LVT_COUNT);
        let reg = lvt_register(index);
        let value = self.read_register(reg);
        let value = if masked {
            value | LAPIC_LVT_MASKED
        } else {
            value & !LAPIC_LVT_MASKED
        };
        self.write_register(reg, value);
    }

    /// Replace the vector field, leaving the entry masked.
    pub fn set_lvt_vector(&self, index: usize, vector: u8) {
        debug_assert!(index < LAPIC_LVT_COUNT);
        let reg = lvt_register(index);
        let value = self.read_register(reg);
        self.write_register(reg, (value & !0xFF) | vector as u32 | LAPIC_LVT_MASKED);
    }

    pub fn lvt_masked(&self, index: usize) -> bool {
        self.read_register(lvt_register(index)) & LAPIC_LVT_MASKED != 0
    }

    pub fn clear_errors(&self) {
        // Back-to-back writes re-arm the error status register.
        self.write_register(LAPIC_ESR, 0);
        self.write_register(LAPIC_ESR, 0);
    }

    pub fn in_service(&self, vector: u8) -> bool {
        let (reg, bit) = vector_word(LAPIC_ISR, vector);
        self.read_register(reg) & bit != 0
    }

    pub fn pending(&self, vector: u8) -> bool {
        let (reg, bit) = vector_word(LAPIC_IRR, vector);
        self.read_register(reg) & bit != 0
    }

    #[inline]
    pub fn end_of_interrupt(&self) {
        self.write_register(LAPIC_EOI, 0);
    }

    /// Spurious vector on, every LVT entry masked, stale errors cleared.
    pub fn init(&self) {
        self.program_spurious();
        self.mask_all_lvt();
        self.clear_errors();
        klog_info!(
            "APIC: local APIC {} (version {:#x}) at {:#x}",
            self.id(),
            self.version(),
            self.phys_base
        );
    }
}
