//! The active interrupt manager and the entry point the IDT stubs call.

use doomos_abi::InterruptFrame;
use doomos_acpi::acknowledge_sci;
use doomos_drivers::{Controller, InterruptManager, IrqError, IrqHandler, IrqResult};
use doomos_lib::{IrqMutex, MmioRegion, RawPorts, klog_debug, klog_warn};

use crate::{PORTS, platform};

pub type KernelInterrupts = InterruptManager<Controller<RawPorts, MmioRegion>>;

/// `None` until [`crate::kernel_init`] has brought a controller up.
pub(crate) static INTERRUPTS: IrqMutex<Option<KernelInterrupts>> = IrqMutex::new(None);

/// Reported for every line while no controller is installed.
const NO_CONTROLLER: usize = 0;

/// Common IRQ path. Interrupts are already disabled by the gate.
///
/// The manager lock is dropped while the handler runs, so handlers may
/// register, enable or mask lines themselves.
pub fn irq_entry(frame: &InterruptFrame) {
    let pending = match INTERRUPTS.lock().as_mut() {
        Some(manager) => manager.begin_dispatch(frame),
        None => {
            klog_warn!(
                "IRQ: vector {:#x} arrived before controller bring-up",
                frame.vector()
            );
            return;
        }
    };

    pending.run(frame);

    if let Some(manager) = INTERRUPTS.lock().as_ref() {
        manager.finish_dispatch(&pending);
    }
}

fn with_manager<T>(
    line: usize,
    f: impl FnOnce(&mut KernelInterrupts) -> IrqResult<T>,
) -> IrqResult<T> {
    match INTERRUPTS.lock().as_mut() {
        Some(manager) => f(manager),
        None => Err(IrqError::InvalidLine {
            line,
            capacity: NO_CONTROLLER,
        }),
    }
}

/// Install `handler` for `line`. The line stays masked until enabled.
pub fn register_irq_handler(line: usize, handler: IrqHandler) -> IrqResult {
    with_manager(line, |manager| manager.register_handler(line, handler))
}

pub fn enable_irq_line(line: usize) -> IrqResult {
    with_manager(line, |manager| manager.enable_line(line))
}

pub fn disable_irq_line(line: usize) -> IrqResult {
    with_manager(line, |manager| manager.disable_line(line))
}

/// ACPI system control interrupt: retire the PM1 event bits so the
/// level-triggered line drops.
pub(crate) fn sci_handler(line: u8, _frame: &InterruptFrame) {
    let Some(pm) = platform().and_then(|config| config.power.as_ref()) else {
        klog_warn!("ACPI: SCI on line {} without PM registers", line);
        return;
    };
    let status = acknowledge_sci(pm, &PORTS);
    klog_debug!("ACPI: SCI on line {} status {:#x}", line, status.bits());
}
