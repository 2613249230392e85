//! Interrupt line management over the 8259 pair or the local APIC + IOAPIC.
//!
//! One backend is chosen at boot by [`bring_up`] and wrapped in an
//! [`InterruptManager`], which owns the handler table and the dispatch path.
//! Every dispatch ends with exactly one end-of-interrupt, whether or not a
//! handler ran, so no line is left blocked.

use doomos_abi::InterruptFrame;
use doomos_abi::arch::apic::{LAPIC_DEFAULT_BASE, LAPIC_LVT_COUNT, LAPIC_REGION_SIZE};
use doomos_abi::arch::idt::IRQ_LAST_VECTOR;
use doomos_abi::arch::ioapic::{IOAPIC_DEFAULT_BASE, IOAPIC_REGION_SIZE, RedirectionFlags};
use doomos_abi::arch::pic::PIC_LINES;
use doomos_abi::arch::{ApicBaseMsr, IRQ_BASE_VECTOR, Msr};
use doomos_acpi::PlatformConfig;
use doomos_lib::{
    CpuOps, Mmio, MmioMapper, PortIo, klog_debug, klog_info, klog_trace, klog_warn,
};

use crate::apic::{self, ApicSupport, LocalApic};
use crate::error::{IrqError, IrqResult};
use crate::ioapic::{IoApic, Redirection};
use crate::pic::Pic8259;

/// Lines in the IRQ vector window.
pub const MAX_IRQ_LINES: usize = (IRQ_LAST_VECTOR - IRQ_BASE_VECTOR) as usize + 1;

/// First line backed by a local APIC LVT entry; lines 48..=53 are timer,
/// thermal, performance counter, LINT0, LINT1 and error.
pub const LVT_FIRST_LINE: usize = 48;

/// Clock input on the legacy ISA bus.
pub const CLOCK_LINE: usize = 0;

/// Called with the line index and the saved register state.
pub type IrqHandler = fn(line: u8, frame: &InterruptFrame);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LineStatus {
    pub in_service: bool,
    pub pending: bool,
}

pub trait InterruptController {
    fn name(&self) -> &'static str;

    /// Number of lines the handler table may use.
    fn capacity(&self) -> usize;

    /// Vector delivered for line 0.
    fn vector_base(&self) -> u8 {
        IRQ_BASE_VECTOR
    }

    fn set_masked(&self, line: usize, masked: bool) -> IrqResult;

    /// In-service / request bits, read for diagnostics only.
    fn line_status(&self, line: usize) -> LineStatus;

    fn end_of_interrupt(&self, line: usize);
}

// =============================================================================
// Legacy backend
// =============================================================================

pub struct LegacyController<P: PortIo> {
    pic: Pic8259<P>,
}

impl<P: PortIo> LegacyController<P> {
    /// Remap to the IRQ window and mask every line.
    pub fn new(ports: P) -> Self {
        let mut pic = Pic8259::new(ports);
        pic.remap(IRQ_BASE_VECTOR, IRQ_BASE_VECTOR + 8);
        Self { pic }
    }

    #[inline]
    pub fn pic(&self) -> &Pic8259<P> {
        &self.pic
    }
}

impl<P: PortIo> InterruptController for LegacyController<P> {
    fn name(&self) -> &'static str {
        "PIC"
    }

    fn capacity(&self) -> usize {
        PIC_LINES
    }

    fn vector_base(&self) -> u8 {
        self.pic.master_offset()
    }

    fn set_masked(&self, line: usize, masked: bool) -> IrqResult {
        if line >= PIC_LINES {
            return Err(IrqError::InvalidLine {
                line,
                capacity: PIC_LINES,
            });
        }
        self.pic.set_masked(line as u8, masked);
        Ok(())
    }

    fn line_status(&self, line: usize) -> LineStatus {
        if line >= PIC_LINES {
            return LineStatus::default();
        }
        let bit = 1u16 << line;
        LineStatus {
            in_service: self.pic.read_isr() & bit != 0,
            pending: self.pic.read_irr() & bit != 0,
        }
    }

    fn end_of_interrupt(&self, line: usize) {
        self.pic.end_of_interrupt(line.min(u8::MAX as usize) as u8);
    }
}

// =============================================================================
// Advanced backend
// =============================================================================

pub struct AdvancedController<R: Mmio> {
    lapic: LocalApic<R>,
    ioapic: IoApic<R>,
    routed: usize,
}

impl<R: Mmio> AdvancedController<R> {
    /// Program every redirection entry (masked, physical destination 0) and
    /// give each LVT entry its vector in the window. The local APIC must
    /// already be enabled.
    pub fn new(lapic: LocalApic<R>, ioapic: IoApic<R>) -> Self {
        let routed = (ioapic.pins() as usize).min(LVT_FIRST_LINE);
        if routed < ioapic.pins() as usize {
            klog_warn!(
                "IOAPIC: {} pins, only the first {} are routed",
                ioapic.pins(),
                routed
            );
        }

        for pin in 0..routed {
            let mut entry = Redirection::masked(IRQ_BASE_VECTOR + pin as u8, 0);
            if pin == CLOCK_LINE {
                entry.flags |= RedirectionFlags::TRIGGER_LEVEL;
            }
            ioapic.set_redirection(pin as u8, entry);
        }
        for index in 0..LAPIC_LVT_COUNT {
            lapic.set_lvt_vector(index, IRQ_BASE_VECTOR + (LVT_FIRST_LINE + index) as u8);
        }

        klog_info!(
            "IOAPIC: {} redirection entries programmed from vector {:#x}",
            routed,
            IRQ_BASE_VECTOR
        );
        Self {
            lapic,
            ioapic,
            routed,
        }
    }

    #[inline]
    pub fn local_apic(&self) -> &LocalApic<R> {
        &self.lapic
    }

    #[inline]
    pub fn io_apic(&self) -> &IoApic<R> {
        &self.ioapic
    }

    fn lvt_index(line: usize) -> Option<usize> {
        line.checked_sub(LVT_FIRST_LINE)
            .filter(|&index| index < LAPIC_LVT_COUNT)
    }
}

impl<R: Mmio> InterruptController for AdvancedController<R> {
    fn name(&self) -> &'static str {
        "APIC"
    }

    fn capacity(&self) -> usize {
        MAX_IRQ_LINES
    }

    fn set_masked(&self, line: usize, masked: bool) -> IrqResult {
        if line < self.routed {
            self.ioapic.set_masked(line as u8, masked);
            return Ok(());
        }
        match Self::lvt_index(line) {
            Some(index) => {
                self.lapic.set_lvt_masked(index, masked);
                Ok(())
            }
            None if line >= MAX_IRQ_LINES => Err(IrqError::InvalidLine {
                line,
                capacity: MAX_IRQ_LINES,
            }),
            None => Err(IrqError::NoMaskRegister { line }),
        }
    }

    fn line_status(&self, line: usize) -> LineStatus {
        let vector = IRQ_BASE_VECTOR.wrapping_add(line as u8);
        LineStatus {
            in_service: self.lapic.in_service(vector),
            pending: self.lapic.pending(vector),
        }
    }

    fn end_of_interrupt(&self, _line: usize) {
        self.lapic.end_of_interrupt();
    }
}

// =============================================================================
// Polymorphic handle
// =============================================================================

pub enum Controller<P: PortIo, R: Mmio> {
    Legacy(LegacyController<P>),
    Advanced(AdvancedController<R>),
}

impl<P: PortIo, R: Mmio> Controller<P, R> {
    pub fn backend(&self) -> Backend {
        match self {
            Self::Legacy(_) => Backend::Legacy,
            Self::Advanced(_) => Backend::Advanced,
        }
    }
}

impl<P: PortIo, R: Mmio> InterruptController for Controller<P, R> {
    fn name(&self) -> &'static str {
        match self {
            Self::Legacy(c) => c.name(),
            Self::Advanced(c) => c.name(),
        }
    }

    fn capacity(&self) -> usize {
        match self {
            Self::Legacy(c) => c.capacity(),
            Self::Advanced(c) => c.capacity(),
        }
    }

    fn vector_base(&self) -> u8 {
        match self {
            Self::Legacy(c) => c.vector_base(),
            Self::Advanced(c) => c.vector_base(),
        }
    }

    fn set_masked(&self, line: usize, masked: bool) -> IrqResult {
        match self {
            Self::Legacy(c) => c.set_masked(line, masked),
            Self::Advanced(c) => c.set_masked(line, masked),
        }
    }

    fn line_status(&self, line: usize) -> LineStatus {
        match self {
            Self::Legacy(c) => c.line_status(line),
            Self::Advanced(c) => c.line_status(line),
        }
    }

    fn end_of_interrupt(&self, line: usize) {
        match self {
            Self::Legacy(c) => c.end_of_interrupt(line),
            Self::Advanced(c) => c.end_of_interrupt(line),
        }
    }
}

// =============================================================================
// Handler table and dispatch
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled { line: usize },
    Unhandled { line: usize },
    /// Vector below the window or past the controller's capacity.
    OutOfWindow { vector: u8 },
}

pub struct InterruptManager<C: InterruptController> {
    controller: C,
    handlers: [Option<IrqHandler>; MAX_IRQ_LINES],
    counts: [u64; MAX_IRQ_LINES],
    unhandled: u64,
}

impl<C: InterruptController> InterruptManager<C> {
    pub fn new(controller: C) -> Self {
        Self {
            controller,
            handlers: [None; MAX_IRQ_LINES],
            counts: [0; MAX_IRQ_LINES],
            unhandled: 0,
        }
    }

    #[inline]
    pub fn controller(&self) -> &C {
        &self.controller
    }

    fn check_line(&self, line: usize) -> IrqResult {
        let capacity = self.controller.capacity().min(MAX_IRQ_LINES);
        if line >= capacity {
            klog_warn!(
                "IRQ: line {} rejected, {} has {} lines",
                line,
                self.controller.name(),
                capacity
            );
            return Err(IrqError::InvalidLine { line, capacity });
        }
        Ok(())
    }

    /// Replaces any handler already on the line.
    pub fn register_handler(&mut self, line: usize, handler: IrqHandler) -> IrqResult {
        self.check_line(line)?;
        if self.handlers[line].replace(handler).is_some() {
            klog_debug!("IRQ: handler for line {} replaced", line);
        }
        Ok(())
    }

    pub fn unregister_handler(&mut self, line: usize) -> IrqResult {
        self.check_line(line)?;
        self.handlers[line] = None;
        Ok(())
    }

    pub fn has_handler(&self, line: usize) -> bool {
        self.handlers.get(line).is_some_and(Option::is_some)
    }

    pub fn enable_line(&self, line: usize) -> IrqResult {
        self.set_line_masked(line, false)
    }

    pub fn disable_line(&self, line: usize) -> IrqResult {
        self.set_line_masked(line, true)
    }

    /// Mask every line the controller can mask, ignoring lines it has no
    /// register for.
    pub fn mask_all_lines(&self) {
        let capacity = self.controller.capacity().min(MAX_IRQ_LINES);
        for line in 0..capacity {
            let _ = self.controller.set_masked(line, true);
        }
    }

    fn set_line_masked(&self, line: usize, masked: bool) -> IrqResult {
        self.check_line(line)?;
        self.controller
            .set_masked(line, masked)
            .inspect_err(|err| klog_warn!("IRQ: {}: {}", self.controller.name(), err))
    }

    /// Deliveries seen on `line`, handled or not.
    pub fn count(&self, line: usize) -> u64 {
        self.counts.get(line).copied().unwrap_or(0)
    }

    pub fn unhandled_count(&self) -> u64 {
        self.unhandled
    }

    /// Common IRQ path: run the line's handler, then retire the interrupt.
    /// Callers that keep the manager behind a lock use
    /// [`begin_dispatch`](Self::begin_dispatch) and
    /// [`finish_dispatch`](Self::finish_dispatch) instead, so the handler
    /// runs with the lock released.
    pub fn dispatch(&mut self, frame: &InterruptFrame) -> DispatchOutcome {
        let pending = self.begin_dispatch(frame);
        pending.run(frame);
        self.finish_dispatch(&pending);
        pending.outcome()
    }

    /// Account for the delivery and look up its handler. Must be followed
    /// by exactly one [`finish_dispatch`](Self::finish_dispatch).
    pub fn begin_dispatch(&mut self, frame: &InterruptFrame) -> PendingIrq {
        let vector = frame.vector();
        let base = self.controller.vector_base();
        let line = vector.wrapping_sub(base) as usize;

        if vector < base || line >= self.controller.capacity().min(MAX_IRQ_LINES) {
            klog_warn!("IRQ: vector {:#x} outside the IRQ window", vector);
            self.unhandled += 1;
            return PendingIrq {
                outcome: DispatchOutcome::OutOfWindow { vector },
                eoi_line: line,
                handler: None,
            };
        }

        let status = self.controller.line_status(line);
        self.counts[line] += 1;

        match self.handlers[line] {
            Some(handler) => {
                klog_trace!(
                    "IRQ: line {} (isr={} irr={})",
                    line,
                    status.in_service,
                    status.pending
                );
                PendingIrq {
                    outcome: DispatchOutcome::Handled { line },
                    eoi_line: line,
                    handler: Some(handler),
                }
            }
            None => {
                klog_warn!(
                    "IRQ: unhandled {} IRQ {} (isr={} irr={})",
                    self.controller.name(),
                    line,
                    status.in_service,
                    status.pending
                );
                self.unhandled += 1;
                PendingIrq {
                    outcome: DispatchOutcome::Unhandled { line },
                    eoi_line: line,
                    handler: None,
                }
            }
        }
    }

    /// Retire a delivery taken with [`begin_dispatch`](Self::begin_dispatch).
    pub fn finish_dispatch(&self, pending: &PendingIrq) {
        self.controller.end_of_interrupt(pending.eoi_line);
    }
}

/// A delivery between [`InterruptManager::begin_dispatch`] and
/// [`InterruptManager::finish_dispatch`].
#[derive(Clone, Copy)]
pub struct PendingIrq {
    outcome: DispatchOutcome,
    eoi_line: usize,
    handler: Option<IrqHandler>,
}

impl PendingIrq {
    #[inline]
    pub fn outcome(&self) -> DispatchOutcome {
        self.outcome
    }

    /// Call the line's handler, if there is one. Needs no access to the
    /// manager, so the handler may register, enable or mask lines.
    pub fn run(&self, frame: &InterruptFrame) {
        if let (Some(handler), DispatchOutcome::Handled { line }) = (self.handler, self.outcome) {
            handler(line as u8, frame);
        }
    }
}

// =============================================================================
// Backend selection and bring-up
// =============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendPreference {
    #[default]
    Auto,
    Legacy,
    Advanced,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    Legacy,
    Advanced,
}

/// A legacy preference is honoured without probing the CPU. Otherwise the
/// APIC is used when CPUID reports both the APIC and MSR access.
pub fn select_backend<C: CpuOps>(cpu: &C, preference: BackendPreference) -> Backend {
    if preference == BackendPreference::Legacy {
        return Backend::Legacy;
    }
    let support = ApicSupport::detect(cpu);
    if support.usable() {
        return Backend::Advanced;
    }
    if preference == BackendPreference::Advanced {
        klog_warn!(
            "IRQ: APIC requested but unsupported (apic={} msr={})",
            support.apic,
            support.msr
        );
    }
    Backend::Legacy
}

struct AdvancedMapping<R> {
    lapic_base: u64,
    lapic: R,
    ioapic_base: u64,
    ioapic: R,
    gsi_base: u32,
}

/// Map both register blocks before anything is programmed, so a failure
/// leaves the machine untouched for the PIC path.
fn map_advanced<C: CpuOps, M: MmioMapper>(
    cpu: &C,
    mapper: &M,
    platform: Option<&PlatformConfig>,
) -> Option<AdvancedMapping<M::Region>> {
    let fallback = platform
        .and_then(PlatformConfig::local_apic_address)
        .unwrap_or(LAPIC_DEFAULT_BASE);
    let lapic_base = match ApicBaseMsr(cpu.read_msr(Msr::APIC_BASE)).address() {
        0 => fallback,
        address => address,
    };
    let Some(lapic) = mapper.map(lapic_base, LAPIC_REGION_SIZE) else {
        klog_warn!("APIC: cannot map local APIC at {:#x}", lapic_base);
        return None;
    };

    let effective = platform
        .and_then(|config| config.interrupts.as_ref())
        .and_then(|topology| topology.effective_io_apic());
    let (ioapic_base, gsi_base) = match effective {
        Some(info) => (info.address as u64, info.gsi_base),
        None => (IOAPIC_DEFAULT_BASE, 0),
    };
    let Some(ioapic) = mapper.map(ioapic_base, IOAPIC_REGION_SIZE) else {
        klog_warn!("IOAPIC: cannot map I/O APIC at {:#x}", ioapic_base);
        return None;
    };

    Some(AdvancedMapping {
        lapic_base,
        lapic,
        ioapic_base,
        ioapic,
        gsi_base,
    })
}

/// Bring up the interrupt controller with interrupts disabled, every line
/// masked and an empty handler table. Falls back to the 8259 pair when the
/// APIC is unsupported or its registers cannot be mapped.
pub fn bring_up<C, P, M>(
    cpu: &C,
    ports: P,
    mapper: &M,
    platform: Option<&PlatformConfig>,
    preference: BackendPreference,
) -> InterruptManager<Controller<P, M::Region>>
where
    C: CpuOps,
    P: PortIo,
    M: MmioMapper,
{
    cpu.disable_interrupts();

    let mut controller = None;
    if select_backend(cpu, preference) == Backend::Advanced {
        if let Some(mapping) = map_advanced(cpu, mapper, platform) {
            apic::enable_base_msr(cpu, mapping.lapic_base);
            apic::configure_imcr(&ports);
            let mut pic = Pic8259::new(&ports);
            pic.remap(IRQ_BASE_VECTOR, IRQ_BASE_VECTOR + 8);
            pic.disable();

            let lapic = LocalApic::new(mapping.lapic, mapping.lapic_base);
            lapic.init();
            let ioapic = IoApic::new(mapping.ioapic, mapping.ioapic_base, mapping.gsi_base);
            controller = Some(Controller::Advanced(AdvancedController::new(lapic, ioapic)));
        } else {
            klog_warn!("IRQ: falling back to the PIC");
        }
    }

    let controller =
        controller.unwrap_or_else(|| Controller::Legacy(LegacyController::new(ports)));
    klog_info!(
        "IRQ: {} active, {} lines from vector {:#x}",
        controller.name(),
        controller.capacity(),
        controller.vector_base()
    );

    cpu.enable_interrupts();
    InterruptManager::new(controller)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::{Cell, RefCell};
    use core::sync::atomic::{AtomicUsize, Ordering};
    use doomos_abi::arch::apic::{LAPIC_EOI, LAPIC_LVT_TIMER, LAPIC_SPURIOUS};
    use doomos_abi::arch::cpuid::{CPUID_FEAT_EDX_APIC, CPUID_FEAT_EDX_MSR};
    use doomos_abi::arch::ioapic::{IOAPIC_REGSEL, IOAPIC_WINDOW};
    use doomos_abi::arch::pic::{PIC1_COMMAND, PIC1_DATA, PIC2_DATA};
    use doomos_lib::testing::{CpuEvent, FakeCpu, FakeMapper, FakeMmio, FakePorts};

    #[derive(Default)]
    struct Recorder {
        eois: Cell<usize>,
        masks: RefCell<Vec<(usize, bool)>>,
    }

    impl InterruptController for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn capacity(&self) -> usize {
            16
        }

        fn set_masked(&self, line: usize, masked: bool) -> IrqResult {
            self.masks.borrow_mut().push((line, masked));
            Ok(())
        }

        fn line_status(&self, _line: usize) -> LineStatus {
            LineStatus::default()
        }

        fn end_of_interrupt(&self, _line: usize) {
            self.eois.set(self.eois.get() + 1);
        }
    }

    static HANDLED: AtomicUsize = AtomicUsize::new(0);

    fn counting_handler(line: u8, _frame: &InterruptFrame) {
        assert_eq!(line, 4);
        HANDLED.fetch_add(1, Ordering::SeqCst);
    }

    fn noop(_line: u8, _frame: &InterruptFrame) {}

    #[test]
    fn every_dispatch_path_sends_exactly_one_eoi() {
        let mut manager = InterruptManager::new(Recorder::default());
        manager.register_handler(4, counting_handler).unwrap();

        let before = HANDLED.load(Ordering::SeqCst);
        assert_eq!(
            manager.dispatch(&InterruptFrame::for_vector(0x24)),
            DispatchOutcome::Handled { line: 4 }
        );
        assert_eq!(HANDLED.load(Ordering::SeqCst), before + 1);
        assert_eq!(manager.controller().eois.get(), 1);

        assert_eq!(
            manager.dispatch(&InterruptFrame::for_vector(0x25)),
            DispatchOutcome::Unhandled { line: 5 }
        );
        assert_eq!(manager.controller().eois.get(), 2);

        for vector in [0x0E, 0x30, 0xFF] {
            assert_eq!(
                manager.dispatch(&InterruptFrame::for_vector(vector)),
                DispatchOutcome::OutOfWindow { vector }
            );
        }
        assert_eq!(manager.controller().eois.get(), 5);
        assert_eq!(manager.unhandled_count(), 4);
        assert_eq!(manager.count(4), 1);
        assert_eq!(manager.count(5), 1);
    }

    #[test]
    fn registration_is_bounded_by_capacity() {
        let mut manager = InterruptManager::new(Recorder::default());
        assert_eq!(
            manager.register_handler(16, noop),
            Err(IrqError::InvalidLine {
                line: 16,
                capacity: 16
            })
        );
        assert_eq!(
            manager.enable_line(200),
            Err(IrqError::InvalidLine {
                line: 200,
                capacity: 16
            })
        );

        manager.register_handler(15, noop).unwrap();
        assert!(manager.has_handler(15));
        manager.unregister_handler(15).unwrap();
        assert!(!manager.has_handler(15));

        manager.enable_line(3).unwrap();
        manager.disable_line(3).unwrap();
        assert_eq!(
            *manager.controller().masks.borrow(),
            vec![(3, false), (3, true)]
        );
    }

    #[test]
    fn mask_all_covers_the_whole_window() {
        let manager = InterruptManager::new(Recorder::default());
        manager.mask_all_lines();
        let masks = manager.controller().masks.borrow().clone();
        assert_eq!(masks.len(), 16);
        assert!(masks.iter().enumerate().all(|(i, &(line, masked))| line == i && masked));
    }

    thread_local! {
        static SHARED: RefCell<Option<InterruptManager<Recorder>>> = const { RefCell::new(None) };
    }

    fn masks_own_line(line: u8, _frame: &InterruptFrame) {
        SHARED.with(|shared| {
            let shared = shared.borrow();
            let manager = shared.as_ref().unwrap();
            manager.disable_line(line as usize).unwrap();
            manager.enable_line(line as usize).unwrap();
        });
    }

    #[test]
    fn handler_can_touch_its_own_line_between_begin_and_finish() {
        let mut manager = InterruptManager::new(Recorder::default());
        manager.register_handler(6, masks_own_line).unwrap();
        SHARED.with(|shared| *shared.borrow_mut() = Some(manager));

        let frame = InterruptFrame::for_vector(0x26);
        let pending = SHARED.with(|shared| {
            shared
                .borrow_mut()
                .as_mut()
                .unwrap()
                .begin_dispatch(&frame)
        });
        assert_eq!(pending.outcome(), DispatchOutcome::Handled { line: 6 });
        // The manager is not borrowed while the handler runs.
        pending.run(&frame);
        SHARED.with(|shared| {
            let shared = shared.borrow();
            let manager = shared.as_ref().unwrap();
            manager.finish_dispatch(&pending);
            assert_eq!(*manager.controller().masks.borrow(), vec![(6, true), (6, false)]);
            assert_eq!(manager.controller().eois.get(), 1);
            assert_eq!(manager.count(6), 1);
        });
    }

    #[test]
    fn out_of_window_delivery_has_nothing_to_run() {
        let mut manager = InterruptManager::new(Recorder::default());
        let frame = InterruptFrame::for_vector(0x08);
        let pending = manager.begin_dispatch(&frame);
        pending.run(&frame);
        manager.finish_dispatch(&pending);
        assert_eq!(pending.outcome(), DispatchOutcome::OutOfWindow { vector: 0x08 });
        assert_eq!(manager.controller().eois.get(), 1);
        assert_eq!(manager.unhandled_count(), 1);
    }

    #[test]
    fn unregistered_line_is_still_retired() {
        let mut manager = InterruptManager::new(Recorder::default());
        manager.register_handler(2, noop).unwrap();
        manager.unregister_handler(2).unwrap();
        assert_eq!(
            manager.dispatch(&InterruptFrame::for_vector(0x22)),
            DispatchOutcome::Unhandled { line: 2 }
        );
        assert_eq!(manager.controller().eois.get(), 1);
    }

    fn apic_cpu() -> FakeCpu {
        let cpu = FakeCpu::new();
        cpu.set_cpuid(1, (0, 0, 0, CPUID_FEAT_EDX_APIC | CPUID_FEAT_EDX_MSR));
        cpu
    }

    fn apic_mapper() -> (FakeMapper, FakeMmio, FakeMmio) {
        let lapic = FakeMmio::new();
        let ioapic = FakeMmio::indirect(IOAPIC_REGSEL, IOAPIC_WINDOW);
        ioapic.set_indirect(1, 0x0017_0011);
        let mapper = FakeMapper::new();
        mapper.insert(LAPIC_DEFAULT_BASE, lapic.clone());
        mapper.insert(IOAPIC_DEFAULT_BASE, ioapic.clone());
        (mapper, lapic, ioapic)
    }

    #[test]
    fn no_apic_support_selects_the_pic_without_touching_the_apic() {
        let cpu = FakeCpu::new();
        let ports = FakePorts::new();
        let mapper = FakeMapper::new();

        let manager = bring_up(&cpu, ports.clone(), &mapper, None, BackendPreference::Auto);
        assert_eq!(manager.controller().backend(), Backend::Legacy);
        assert_eq!(manager.controller().capacity(), 16);
        assert!(mapper.requests().is_empty());
        assert!(cpu.msr_writes().is_empty());
        assert_eq!(
            cpu.events(),
            vec![
                CpuEvent::DisableInterrupts,
                CpuEvent::Cpuid(1),
                CpuEvent::EnableInterrupts
            ]
        );
        assert_eq!(ports.writes_to(PIC1_DATA).last(), Some(&0xFF));
        assert_eq!(ports.writes_to(PIC2_DATA).last(), Some(&0xFF));
    }

    #[test]
    fn legacy_preference_skips_apic_detection() {
        let cpu = apic_cpu();
        assert_eq!(select_backend(&cpu, BackendPreference::Legacy), Backend::Legacy);
        assert!(cpu.events().is_empty());
        assert_eq!(select_backend(&cpu, BackendPreference::Auto), Backend::Advanced);
    }

    #[test]
    fn advanced_bring_up_programs_apic_and_ioapic() {
        let cpu = apic_cpu();
        let ports = FakePorts::new();
        ports.set(0x22, 0x80);
        let (mapper, lapic, ioapic) = apic_mapper();

        let manager = bring_up(&cpu, ports.clone(), &mapper, None, BackendPreference::Auto);
        let controller = manager.controller();
        assert_eq!(controller.backend(), Backend::Advanced);
        assert_eq!(controller.capacity(), 64);

        let msr = ApicBaseMsr(cpu.msr(Msr::APIC_BASE));
        assert_eq!(msr.address(), LAPIC_DEFAULT_BASE);
        assert!(msr.is_enabled());
        assert_eq!(ports.writes_to(0x23), vec![0x01]);
        assert_eq!(lapic.get(LAPIC_SPURIOUS), 0x13F);
        assert_eq!(lapic.get(LAPIC_LVT_TIMER), (1 << 16) | 0x50);

        assert_eq!(ioapic.get_indirect(0x10), 0x20 | (1 << 15) | (1 << 16));
        assert_eq!(ioapic.get_indirect(0x11), 0);
        assert_eq!(ioapic.get_indirect(0x12), 0x21 | (1 << 16));
        assert_eq!(ioapic.get_indirect(0x3E), 0x37 | (1 << 16));

        assert_eq!(cpu.events().first(), Some(&CpuEvent::DisableInterrupts));
        assert_eq!(cpu.events().last(), Some(&CpuEvent::EnableInterrupts));
    }

    #[test]
    fn advanced_lines_map_to_redirection_and_lvt_entries() {
        let cpu = apic_cpu();
        let (mapper, lapic, ioapic) = apic_mapper();
        let mut manager =
            bring_up(&cpu, FakePorts::new(), &mapper, None, BackendPreference::Auto);

        manager.enable_line(1).unwrap();
        assert_eq!(ioapic.get_indirect(0x12), 0x21);
        manager.enable_line(48).unwrap();
        assert_eq!(lapic.get(LAPIC_LVT_TIMER), 0x50);
        assert_eq!(
            manager.enable_line(30),
            Err(IrqError::NoMaskRegister { line: 30 })
        );

        lapic.clear_log();
        manager.register_handler(1, noop).unwrap();
        manager.dispatch(&InterruptFrame::for_vector(0x21));
        manager.dispatch(&InterruptFrame::for_vector(0x5E));
        assert_eq!(lapic.writes_to(LAPIC_EOI), vec![0, 0]);
    }

    #[test]
    fn unmappable_apic_falls_back_to_the_pic() {
        let cpu = apic_cpu();
        let ports = FakePorts::new();
        let mapper = FakeMapper::new();

        let manager = bring_up(&cpu, ports.clone(), &mapper, None, BackendPreference::Auto);
        assert_eq!(manager.controller().backend(), Backend::Legacy);
        assert_eq!(mapper.requests(), vec![(LAPIC_DEFAULT_BASE, LAPIC_REGION_SIZE)]);
        assert!(cpu.msr_writes().is_empty());
        assert_eq!(ports.writes_to(PIC1_COMMAND).first(), Some(&0x11));
    }
}
