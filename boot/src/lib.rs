//! DoomOS boot-time orchestration.
//!
//! Ties the allocator, the ACPI parser and the interrupt/timer drivers
//! together: [`kernel_init`] runs the bring-up sequence once on the boot
//! CPU and publishes what it built in the singletons below. The IDT stubs
//! enter through [`irq_entry`]; [`kernel_shutdown`] and [`kernel_reboot`]
//! take the machine down.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod init;
pub mod interrupts;
pub mod shutdown;

use doomos_acpi::PlatformConfig;
use doomos_drivers::{Hpet, HpetRegs};
use doomos_lib::{MmioRegion, RawPorts};
use spin::Once;

pub use config::BootConfig;
pub use init::{BootParams, boot_device, discover_platform, kernel_init};
pub use interrupts::{
    KernelInterrupts, disable_irq_line, enable_irq_line, irq_entry, register_irq_handler,
};
pub use shutdown::{kernel_quiesce_interrupts, kernel_reboot, kernel_shutdown};

/// HPET reached through identity-mapped MMIO or the port window.
pub type KernelTimer = Hpet<HpetRegs<MmioRegion, RawPorts>>;

// SAFETY: everything in this crate runs in ring 0 on the kernel's own
// address space.
pub(crate) const PORTS: RawPorts = unsafe { RawPorts::new() };

/// Firmware configuration, published once ACPI parsing succeeds.
pub static PLATFORM: Once<PlatformConfig> = Once::new();

/// The calibrated HPET, published once it is running.
pub static TIMER: Once<KernelTimer> = Once::new();

#[inline]
pub fn platform() -> Option<&'static PlatformConfig> {
    PLATFORM.get()
}

#[inline]
pub fn timer() -> Option<&'static KernelTimer> {
    TIMER.get()
}

#[cfg(all(not(test), target_os = "none"))]
#[global_allocator]
static ALLOCATOR: doomos_mm::KernelAllocator = doomos_mm::KernelAllocator::new();

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    doomos_lib::cpu::disable_interrupts();
    doomos_lib::klog_error!("PANIC: {}", info);
    doomos_lib::cpu::halt_loop()
}
