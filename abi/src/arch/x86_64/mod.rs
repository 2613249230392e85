pub mod apic;
pub mod cpuid;
pub mod idt;
pub mod ioapic;
pub mod msr;
pub mod pic;

pub use apic::ApicBaseMsr;
pub use msr::Msr;
