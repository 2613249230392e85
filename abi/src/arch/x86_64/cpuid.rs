//! CPUID leaves and feature bits used for controller selection.

/// Basic CPU information and feature flags.
pub const CPUID_LEAF_FEATURES: u32 = 0x01;

/// APIC present (on-chip Advanced Programmable Interrupt Controller).
pub const CPUID_FEAT_EDX_APIC: u32 = 1 << 9;

/// Model-specific registers (RDMSR/WRMSR) supported.
pub const CPUID_FEAT_EDX_MSR: u32 = 1 << 5;

/// x2APIC support.
pub const CPUID_FEAT_ECX_X2APIC: u32 = 1 << 21;
