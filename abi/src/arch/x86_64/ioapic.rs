//! I/O APIC register definitions.

use bitflags::bitflags;

/// Physical base used when the MADT does not name an I/O APIC.
pub const IOAPIC_DEFAULT_BASE: u64 = 0xFEC0_0000;

pub const IOAPIC_REGION_SIZE: usize = 0x20;

/// Register select (index) window.
pub const IOAPIC_REGSEL: usize = 0x00;

/// Data window for the selected register.
pub const IOAPIC_WINDOW: usize = 0x10;

pub const IOAPIC_REG_ID: u8 = 0x00;
pub const IOAPIC_REG_VER: u8 = 0x01;

/// First redirection register; pin `n` uses `0x10 + 2n` (low) and `0x11 + 2n` (high).
pub const IOAPIC_REG_REDIR_BASE: u8 = 0x10;

bitflags! {
    /// Control bits of a redirection entry's low dword.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RedirectionFlags: u32 {
        const DELIVERY_LOWEST = 1 << 8;
        const DELIVERY_SMI = 2 << 8;
        const DELIVERY_NMI = 4 << 8;
        const DELIVERY_EXTINT = 7 << 8;
        const DEST_LOGICAL = 1 << 11;
        const POLARITY_LOW = 1 << 13;
        const TRIGGER_LEVEL = 1 << 15;
        const MASKED = 1 << 16;
    }
}

/// Low and high redirection register indices for `pin`.
#[inline]
pub const fn redirection_registers(pin: u8) -> (u8, u8) {
    let low = IOAPIC_REG_REDIR_BASE + pin * 2;
    (low, low + 1)
}
