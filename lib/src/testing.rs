//! Recording hardware fakes for host-side unit tests.
//!
//! Each fake is a cheap handle over shared state: clone it, hand one clone to
//! the code under test and keep the other to script reads and inspect what
//! was written.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use doomos_abi::arch::Msr;

use crate::cpu::CpuOps;
use crate::io::PortIo;
use crate::mmio::{Mmio, MmioMapper};

// =============================================================================
// Ports
// =============================================================================

#[derive(Default)]
struct PortState {
    latched: BTreeMap<u16, u32>,
    scripted: BTreeMap<u16, VecDeque<u32>>,
    writes: Vec<(u16, u32)>,
    reads: Vec<u16>,
}

/// Port space where a read returns the next scripted value for that port,
/// else the last value written (or set), else zero.
#[derive(Clone, Default)]
pub struct FakePorts {
    state: Rc<RefCell<PortState>>,
}

impl FakePorts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value returned by reads of `port` once its script runs dry.
    pub fn set(&self, port: u16, value: u32) {
        self.state.borrow_mut().latched.insert(port, value);
    }

    /// Queue values returned by successive reads of `port`.
    pub fn script(&self, port: u16, values: &[u32]) {
        self.state
            .borrow_mut()
            .scripted
            .entry(port)
            .or_default()
            .extend(values.iter().copied());
    }

    pub fn writes(&self) -> Vec<(u16, u32)> {
        self.state.borrow().writes.clone()
    }

    pub fn writes_to(&self, port: u16) -> Vec<u32> {
        self.state
            .borrow()
            .writes
            .iter()
            .filter(|(p, _)| *p == port)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn reads_of(&self, port: u16) -> usize {
        self.state.borrow().reads.iter().filter(|p| **p == port).count()
    }

    pub fn clear_log(&self) {
        let mut state = self.state.borrow_mut();
        state.writes.clear();
        state.reads.clear();
    }

    fn read(&self, port: u16) -> u32 {
        let mut state = self.state.borrow_mut();
        state.reads.push(port);
        if let Some(value) = state.scripted.get_mut(&port).and_then(|q| q.pop_front()) {
            return value;
        }
        state.latched.get(&port).copied().unwrap_or(0)
    }

    fn write(&self, port: u16, value: u32) {
        let mut state = self.state.borrow_mut();
        state.writes.push((port, value));
        state.latched.insert(port, value);
    }
}

impl PortIo for FakePorts {
    fn read_u8(&self, port: u16) -> u8 {
        self.read(port) as u8
    }
    fn write_u8(&self, port: u16, value: u8) {
        self.write(port, value as u32)
    }
    fn read_u16(&self, port: u16) -> u16 {
        self.read(port) as u16
    }
    fn write_u16(&self, port: u16, value: u16) {
        self.write(port, value as u32)
    }
    fn read_u32(&self, port: u16) -> u32 {
        self.read(port)
    }
    fn write_u32(&self, port: u16, value: u32) {
        self.write(port, value)
    }
}

// =============================================================================
// MMIO
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MmioAccess {
    Read(usize),
    Write(usize, u32),
}

/// 64-bit free-running counter exposed as two dwords at `offset`/`offset + 4`.
/// Each read of the low dword advances it by `step`.
#[derive(Clone, Copy)]
struct Counter {
    offset: usize,
    value: u64,
    step: u64,
}

/// Select/window pair (IOAPIC style): the dword written at `select` picks the
/// indirect register that `window` reads and writes.
#[derive(Clone, Copy)]
struct Indirect {
    select: usize,
    window: usize,
    current: u32,
}

#[derive(Default)]
struct MmioState {
    regs: BTreeMap<usize, u32>,
    indirect_regs: BTreeMap<u32, u32>,
    indirect: Option<Indirect>,
    counter: Option<Counter>,
    log: Vec<MmioAccess>,
}

#[derive(Clone, Default)]
pub struct FakeMmio {
    state: Rc<RefCell<MmioState>>,
}

impl FakeMmio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register block addressed through a select register and a data window.
    pub fn indirect(select: usize, window: usize) -> Self {
        let fake = Self::default();
        fake.state.borrow_mut().indirect = Some(Indirect {
            select,
            window,
            current: 0,
        });
        fake
    }

    pub fn with_counter(self, offset: usize, start: u64, step: u64) -> Self {
        self.state.borrow_mut().counter = Some(Counter {
            offset,
            value: start,
            step,
        });
        self
    }

    pub fn set(&self, offset: usize, value: u32) {
        self.state.borrow_mut().regs.insert(offset, value);
    }

    pub fn get(&self, offset: usize) -> u32 {
        self.state.borrow().regs.get(&offset).copied().unwrap_or(0)
    }

    pub fn set_indirect(&self, index: u32, value: u32) {
        self.state.borrow_mut().indirect_regs.insert(index, value);
    }

    pub fn get_indirect(&self, index: u32) -> u32 {
        self.state
            .borrow()
            .indirect_regs
            .get(&index)
            .copied()
            .unwrap_or(0)
    }

    pub fn counter_value(&self) -> Option<u64> {
        self.state.borrow().counter.map(|c| c.value)
    }

    pub fn log(&self) -> Vec<MmioAccess> {
        self.state.borrow().log.clone()
    }

    pub fn access_count(&self) -> usize {
        self.state.borrow().log.len()
    }

    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.state
            .borrow()
            .log
            .iter()
            .filter_map(|access| match access {
                MmioAccess::Write(o, v) if *o == offset => Some(*v),
                _ => None,
            })
            .collect()
    }

    pub fn clear_log(&self) {
        self.state.borrow_mut().log.clear();
    }
}

impl Mmio for FakeMmio {
    fn read_u32(&self, offset: usize) -> u32 {
        let mut state = self.state.borrow_mut();
        state.log.push(MmioAccess::Read(offset));

        if let Some(mut counter) = state.counter {
            if offset == counter.offset {
                let low = counter.value as u32;
                counter.value = counter.value.wrapping_add(counter.step);
                state.counter = Some(counter);
                return low;
            }
            if offset == counter.offset + 4 {
                return (counter.value >> 32) as u32;
            }
        }

        if let Some(indirect) = state.indirect {
            if offset == indirect.window {
                return state
                    .indirect_regs
                    .get(&indirect.current)
                    .copied()
                    .unwrap_or(0);
            }
        }

        state.regs.get(&offset).copied().unwrap_or(0)
    }

    fn write_u32(&self, offset: usize, value: u32) {
        let mut state = self.state.borrow_mut();
        state.log.push(MmioAccess::Write(offset, value));

        if let Some(mut indirect) = state.indirect {
            if offset == indirect.select {
                indirect.current = value;
                state.indirect = Some(indirect);
                return;
            }
            if offset == indirect.window {
                state.indirect_regs.insert(indirect.current, value);
                return;
            }
        }

        state.regs.insert(offset, value);
    }
}

/// Hands out pre-registered [`FakeMmio`] blocks and records every request.
#[derive(Clone, Default)]
pub struct FakeMapper {
    regions: Rc<RefCell<BTreeMap<u64, FakeMmio>>>,
    requests: Rc<RefCell<Vec<(u64, usize)>>>,
}

impl FakeMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, phys: u64, region: FakeMmio) {
        self.regions.borrow_mut().insert(phys, region);
    }

    pub fn requests(&self) -> Vec<(u64, usize)> {
        self.requests.borrow().clone()
    }
}

impl MmioMapper for FakeMapper {
    type Region = FakeMmio;

    fn map(&self, phys: u64, size: usize) -> Option<FakeMmio> {
        self.requests.borrow_mut().push((phys, size));
        self.regions.borrow().get(&phys).cloned()
    }
}

// =============================================================================
// CPU
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuEvent {
    Cpuid(u32),
    ReadMsr(u32),
    WriteMsr(u32, u64),
    DisableInterrupts,
    EnableInterrupts,
}

#[derive(Default)]
struct CpuState {
    leaves: BTreeMap<u32, (u32, u32, u32, u32)>,
    msrs: BTreeMap<u32, u64>,
    events: Vec<CpuEvent>,
}

#[derive(Clone, Default)]
pub struct FakeCpu {
    state: Rc<RefCell<CpuState>>,
}

impl FakeCpu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cpuid(&self, leaf: u32, regs: (u32, u32, u32, u32)) {
        self.state.borrow_mut().leaves.insert(leaf, regs);
    }

    pub fn set_msr(&self, msr: Msr, value: u64) {
        self.state.borrow_mut().msrs.insert(msr.address(), value);
    }

    pub fn msr(&self, msr: Msr) -> u64 {
        self.state
            .borrow()
            .msrs
            .get(&msr.address())
            .copied()
            .unwrap_or(0)
    }

    pub fn events(&self) -> Vec<CpuEvent> {
        self.state.borrow().events.clone()
    }

    pub fn msr_writes(&self) -> Vec<(u32, u64)> {
        self.state
            .borrow()
            .events
            .iter()
            .filter_map(|event| match event {
                CpuEvent::WriteMsr(msr, value) => Some((*msr, *value)),
                _ => None,
            })
            .collect()
    }
}

impl CpuOps for FakeCpu {
    fn cpuid(&self, leaf: u32) -> (u32, u32, u32, u32) {
        let mut state = self.state.borrow_mut();
        state.events.push(CpuEvent::Cpuid(leaf));
        state.leaves.get(&leaf).copied().unwrap_or((0, 0, 0, 0))
    }

    fn read_msr(&self, msr: Msr) -> u64 {
        let mut state = self.state.borrow_mut();
        state.events.push(CpuEvent::ReadMsr(msr.address()));
        state.msrs.get(&msr.address()).copied().unwrap_or(0)
    }

    fn write_msr(&self, msr: Msr, value: u64) {
        let mut state = self.state.borrow_mut();
        state.events.push(CpuEvent::WriteMsr(msr.address(), value));
        state.msrs.insert(msr.address(), value);
    }

    fn disable_interrupts(&self) {
        self.state.borrow_mut().events.push(CpuEvent::DisableInterrupts);
    }

    fn enable_interrupts(&self) {
        self.state.borrow_mut().events.push(CpuEvent::EnableInterrupts);
    }
}
