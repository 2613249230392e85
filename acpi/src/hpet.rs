//! HPET description table.
//!
//! Only the location and shape of the timer block come from firmware; the
//! tick period lives in the block's capability register and is read by the
//! driver.

use doomos_lib::klog_info;

use crate::error::AcpiResult;
use crate::memory::{le_u8, le_u16, le_u32};
use crate::tables::{GenericAddress, Signature, Table};

pub const HPET_TABLE_LEN: usize = 56;

const OFF_BLOCK_ID: usize = 36;
const OFF_BASE_ADDRESS: usize = 40;
const OFF_HPET_NUMBER: usize = 52;
const OFF_MINIMUM_TICK: usize = 53;
const OFF_PAGE_PROTECTION: usize = 55;

const BLOCK_ID_COMPARATORS_SHIFT: u32 = 8;
const BLOCK_ID_COMPARATORS_MASK: u32 = 0x1F;
const BLOCK_ID_COUNTER_64BIT: u32 = 1 << 13;
const BLOCK_ID_LEGACY_ROUTE: u32 = 1 << 15;

/// One event-timer block as described by firmware.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerBlock {
    pub block_id: u32,
    /// Address space 0 is memory-mapped, 1 is port-mapped.
    pub address: GenericAddress,
    pub hpet_number: u8,
    /// Minimum periodic tick, in main-counter ticks.
    pub minimum_tick: u16,
    pub page_protection: u8,
}

impl TimerBlock {
    pub fn parse(table: &Table<'_>) -> AcpiResult<Self> {
        let table = table
            .expect_signature(Signature::HPET)?
            .require_len(HPET_TABLE_LEN)?;
        let bytes = table.bytes();
        let block = Self {
            block_id: le_u32(bytes, OFF_BLOCK_ID).unwrap_or(0),
            address: GenericAddress::parse(bytes, OFF_BASE_ADDRESS).unwrap_or_default(),
            hpet_number: le_u8(bytes, OFF_HPET_NUMBER).unwrap_or(0),
            minimum_tick: le_u16(bytes, OFF_MINIMUM_TICK).unwrap_or(0),
            page_protection: le_u8(bytes, OFF_PAGE_PROTECTION).unwrap_or(0),
        };
        klog_info!(
            "ACPI: HPET #{} at {:#x} ({}), {} comparators, min tick {}",
            block.hpet_number,
            block.address.address,
            if block.address.is_io() { "port" } else { "mmio" },
            block.comparators(),
            block.minimum_tick
        );
        Ok(block)
    }

    #[inline]
    pub fn comparators(&self) -> u8 {
        (((self.block_id >> BLOCK_ID_COMPARATORS_SHIFT) & BLOCK_ID_COMPARATORS_MASK) as u8) + 1
    }

    #[inline]
    pub fn counter_64bit(&self) -> bool {
        self.block_id & BLOCK_ID_COUNTER_64BIT != 0
    }

    #[inline]
    pub fn legacy_route_capable(&self) -> bool {
        self.block_id & BLOCK_ID_LEGACY_ROUTE != 0
    }

    #[inline]
    pub fn pci_vendor(&self) -> u16 {
        (self.block_id >> 16) as u16
    }
}
