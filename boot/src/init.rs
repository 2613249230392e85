//! Bring-up sequence run once on the boot CPU.
//!
//! Each stage logs under `BOOT:` and degrades rather than stopping: no ACPI
//! leaves the hardware defaults in place, an unmappable APIC falls back to
//! the PIC, and a missing HPET only loses the delay source.

use doomos_abi::{BootDevice, KernelImage, MemoryMapEntry};
use doomos_acpi::{
    IdentityMemory, PhysMemory, PlatformConfig, enable_acpi, find_root_table, parse_root,
};
use doomos_drivers::{Hpet, bring_up};
use doomos_lib::ports::serial_init;
use doomos_lib::{
    COM1, IdentityMapper, NativeCpu, StateFlag, klog, klog_error, klog_info, klog_warn,
};
use doomos_mm::{MemoryMapSummary, init_kernel_heap, kernel_heap_ready};
use spin::Once;

use crate::config::BootConfig;
use crate::interrupts::{INTERRUPTS, enable_irq_line, sci_handler};
use crate::{PLATFORM, PORTS, TIMER, platform};

/// What the loader hands over.
#[derive(Clone, Copy, Debug)]
pub struct BootParams<'a> {
    pub memory_map: &'a [MemoryMapEntry],
    pub kernel_image: KernelImage,
    pub boot_device: BootDevice,
    pub cmdline: &'a str,
}

static KERNEL_INIT: StateFlag = StateFlag::new();
static BOOT_DEVICE: Once<BootDevice> = Once::new();

/// Firmware boot device, kept for the disk drivers.
pub fn boot_device() -> Option<BootDevice> {
    BOOT_DEVICE.get().copied()
}

/// Run the whole bring-up sequence and return the parsed command line.
/// A second call only logs and returns the configuration.
///
/// # Safety
///
/// Must run once, in ring 0 on the boot CPU, with the IDT installed and
/// physical memory identity-mapped. `memory_map` must describe real RAM:
/// every available region it lists becomes kernel heap.
pub unsafe fn kernel_init(params: BootParams<'_>) -> BootConfig {
    let config = BootConfig::from_cmdline(params.cmdline);
    if !KERNEL_INIT.enter() {
        klog_warn!("BOOT: kernel_init called twice, ignoring");
        return config;
    }

    init_logging(&config);
    klog_info!("BOOT: DoomOS starting, cmdline '{}'", params.cmdline);
    BOOT_DEVICE.call_once(|| params.boot_device);

    // SAFETY: forwarded from this function's contract.
    let summary = unsafe { init_kernel_heap(params.memory_map, params.kernel_image) };
    init_acpi(&config, &summary);
    init_interrupts(&config);
    init_timer(&config);

    klog_info!("BOOT: initialization complete");
    config
}

fn init_logging(config: &BootConfig) {
    // SAFETY: COM1 is the standard PC serial port; we run in ring 0.
    unsafe { serial_init(COM1) };
    klog::klog_register_backend(klog::serial_backend);
    klog::klog_init();
    klog::klog_set_level(config.log_level);
}

fn init_acpi(config: &BootConfig, summary: &MemoryMapSummary) {
    if !config.acpi {
        klog_info!("BOOT: ACPI disabled on the command line");
        return;
    }
    if !kernel_heap_ready() {
        klog_error!("BOOT: kernel heap unavailable, skipping ACPI");
        return;
    }

    // SAFETY: physical memory is identity-mapped (kernel_init contract).
    let memory = unsafe { IdentityMemory::new() };
    let Some(platform) = discover_platform(&memory, summary.acpi_region) else {
        return;
    };
    let platform = PLATFORM.call_once(|| platform);

    let Some(pm) = platform.power.as_ref() else {
        klog_warn!("BOOT: no FADT, staying in legacy mode");
        return;
    };
    match enable_acpi(pm, &PORTS, config.enable_wait()) {
        Ok(mode) => klog_info!("BOOT: ACPI mode {:?}", mode),
        Err(err) => klog_warn!("BOOT: ACPI enable failed: {}", err),
    }
}

/// Find and parse the root table inside the ACPI-reclaimable region.
/// `None` (with a log line) whenever there is nothing usable.
pub fn discover_platform<M: PhysMemory>(
    memory: &M,
    acpi_region: Option<(u64, u64)>,
) -> Option<PlatformConfig> {
    let Some((base, length)) = acpi_region else {
        klog_warn!("BOOT: no ACPI region in the memory map");
        return None;
    };
    let root = find_root_table(memory, base, length)
        .inspect_err(|err| klog_warn!("BOOT: no ACPI root table: {}", err))
        .ok()?;
    let platform = parse_root(memory, root)
        .inspect_err(|err| klog_warn!("BOOT: ACPI parse failed: {}", err))
        .ok()?;
    klog_info!(
        "BOOT: ACPI {} at {:#x}, {} tables skipped",
        platform.root_signature,
        platform.root_phys,
        platform.skipped
    );
    Some(platform)
}

fn init_interrupts(config: &BootConfig) {
    // SAFETY: ring 0, identity-mapped physical memory (kernel_init contract).
    let (cpu, mapper) = unsafe { (NativeCpu::new(), IdentityMapper::new()) };
    let mut manager = bring_up(&cpu, PORTS, &mapper, platform(), config.irq);

    let sci = platform().and_then(PlatformConfig::sci_interrupt);
    if let Some(line) = sci
        && let Err(err) = manager.register_handler(line as usize, sci_handler)
    {
        klog_warn!("BOOT: SCI handler not installed: {}", err);
    }
    *INTERRUPTS.lock() = Some(manager);

    // Unmask only once dispatch can see the handler.
    if let Some(line) = sci {
        match enable_irq_line(line as usize) {
            Ok(()) => klog_info!("BOOT: SCI on line {}", line),
            Err(err) => klog_warn!("BOOT: SCI line {} stays masked: {}", line, err),
        }
    }
}

fn init_timer(config: &BootConfig) {
    if !config.hpet {
        klog_info!("BOOT: HPET disabled on the command line");
        return;
    }
    // SAFETY: identity-mapped physical memory (kernel_init contract).
    let mapper = unsafe { IdentityMapper::new() };
    let block = platform().and_then(|platform| platform.timer.as_ref());
    match Hpet::initialize(block, &mapper, PORTS) {
        Some(hpet) => {
            TIMER.call_once(|| hpet);
        }
        None => klog_warn!("BOOT: running without a HPET"),
    }
}
