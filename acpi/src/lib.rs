//! ACPI table parsing for DoomOS.
//!
//! Firmware tables are read through [`PhysMemory`], decoded field by field
//! (little-endian) and summarised into an owned [`PlatformConfig`] that the
//! interrupt and timer drivers consume. Bodies the kernel keeps (DSDT, SSDT,
//! the MCFG allocation array) are copied onto the kernel heap.
//!
//! - [`tables`]: header, checksum, RSDT/XSDT traversal.
//! - [`fadt`]: power-management registers and the ACPI enable handshake.
//! - [`madt`]: interrupt controller topology.
//! - [`hpet`], [`mcfg`], [`ssdt`], [`dsdt`]: the remaining tables.
//! - [`platform`]: the root walk.
//! - [`power`]: S5 and reset.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod dsdt;
pub mod error;
pub mod fadt;
pub mod hpet;
pub mod madt;
pub mod mcfg;
pub mod memory;
pub mod platform;
pub mod power;
pub mod ssdt;
pub mod tables;

#[cfg(test)]
mod test_fixtures;

pub use dsdt::{SleepStates, SleepType, scan_sleep_states};
pub use error::{AcpiError, AcpiResult};
pub use fadt::{AcpiMode, EnableWait, Pm1Status, PowerManagement, enable_acpi};
pub use hpet::TimerBlock;
pub use madt::{InterruptTopology, IoApicInfo};
pub use mcfg::{McfgEntry, PciSegments};
pub use memory::{IdentityMemory, PhysMemory};
pub use platform::{PlatformConfig, parse_root};
pub use power::{
    PowerOffPath, acknowledge_sci, emulator_power_off, power_off, pulse_keyboard_reset, reboot,
};
pub use tables::{GenericAddress, Signature, find_root_table};
