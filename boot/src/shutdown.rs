use doomos_acpi::{PowerOffPath, emulator_power_off, power_off, pulse_keyboard_reset, reboot};
use doomos_lib::ports::serial_flush;
use doomos_lib::{COM1, StateFlag, cpu, klog_info, klog_warn};
use x86_64::VirtAddr;
use x86_64::instructions::{interrupts, tables};
use x86_64::structures::DescriptorTablePointer;

use crate::interrupts::INTERRUPTS;
use crate::{PORTS, platform};

static SHUTDOWN_IN_PROGRESS: StateFlag = StateFlag::new();
static INTERRUPTS_QUIESCED: StateFlag = StateFlag::new();

/// Mask every controller line. Idempotent.
pub fn kernel_quiesce_interrupts() {
    cpu::disable_interrupts();
    if !INTERRUPTS_QUIESCED.enter() {
        return;
    }
    klog_info!("BOOT: quiescing interrupt controller");
    // try_lock: the caller may be holding the manager.
    match INTERRUPTS.try_lock() {
        Some(guard) => {
            if let Some(manager) = guard.as_ref() {
                manager.mask_all_lines();
            }
        }
        None => klog_warn!("BOOT: interrupt manager busy, leaving lines as they are"),
    }
}

fn drain_serial() {
    // SAFETY: COM1 was programmed by kernel_init; ring 0.
    unsafe { serial_flush(COM1) };
}

pub fn kernel_shutdown() -> ! {
    cpu::disable_interrupts();
    if !SHUTDOWN_IN_PROGRESS.enter() {
        cpu::halt_loop();
    }

    klog_info!("=== Kernel Shutdown Requested ===");
    kernel_quiesce_interrupts();
    drain_serial();

    let path = match platform() {
        Some(config) => power_off(config, &PORTS),
        None => {
            emulator_power_off(&PORTS);
            PowerOffPath::EmulatorOnly
        }
    };
    klog_warn!("BOOT: still running after power-off ({:?}), halting", path);
    cpu::halt_loop()
}

pub fn kernel_reboot() -> ! {
    cpu::disable_interrupts();
    if !SHUTDOWN_IN_PROGRESS.enter() {
        cpu::halt_loop();
    }

    klog_info!("=== Kernel Reboot Requested ===");
    kernel_quiesce_interrupts();
    drain_serial();

    match platform() {
        Some(config) => reboot(config, &PORTS),
        None => pulse_keyboard_reset(&PORTS),
    }

    klog_warn!("BOOT: reset did not take, forcing a triple fault");
    triple_fault()
}

fn triple_fault() -> ! {
    let empty = DescriptorTablePointer {
        limit: 0,
        base: VirtAddr::zero(),
    };
    // SAFETY: the machine is going down; any exception now escalates to a
    // reset.
    unsafe { tables::lidt(&empty) };
    interrupts::int3();
    cpu::halt_loop()
}
