//! Interrupt controllers and the HPET for DoomOS.
//!
//! Register blocks are reached through the `doomos-lib` seams (`PortIo`,
//! `Mmio`, `MmioMapper`, `CpuOps`), so every driver here runs against the
//! recording fakes in unit tests.

#![cfg_attr(not(test), no_std)]

pub mod apic;
pub mod error;
pub mod hpet;
pub mod ioapic;
pub mod irq;
pub mod pic;

pub use error::{IrqError, IrqResult};
pub use hpet::{Hpet, HpetRegs};
pub use irq::{
    Backend, BackendPreference, Controller, DispatchOutcome, InterruptController,
    InterruptManager, IrqHandler, PendingIrq, bring_up, select_backend,
};
