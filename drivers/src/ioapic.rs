//! I/O APIC redirection table access through the select/window pair.

use doomos_abi::arch::ioapic::{
    IOAPIC_REG_ID, IOAPIC_REG_VER, IOAPIC_REGSEL, IOAPIC_WINDOW, RedirectionFlags,
    redirection_registers,
};
use doomos_lib::{Mmio, klog_debug};

/// Decoded redirection entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Redirection {
    pub vector: u8,
    pub flags: RedirectionFlags,
    /// Physical APIC ID (or logical set) in bits 56..64 of the entry.
    pub destination: u8,
}

impl Redirection {
    /// Fixed delivery, physical destination, masked.
    pub fn masked(vector: u8, destination: u8) -> Self {
        Self {
            vector,
            flags: RedirectionFlags::MASKED,
            destination,
        }
    }

    #[inline]
    pub fn low(&self) -> u32 {
        self.vector as u32 | self.flags.bits()
    }

    #[inline]
    pub fn high(&self) -> u32 {
        (self.destination as u32) << 24
    }

    fn decode(low: u32, high: u32) -> Self {
        Self {
            vector: low as u8,
            flags: RedirectionFlags::from_bits_truncate(low),
            destination: (high >> 24) as u8,
        }
    }
}

pub struct IoApic<R: Mmio> {
    regs: R,
    phys_base: u64,
    gsi_base: u32,
    pins: u8,
}

impl<R: Mmio> IoApic<R> {
    /// Wrap a mapped register window and read the pin count from the
    /// version register.
    pub fn new(regs: R, phys_base: u64, gsi_base: u32) -> Self {
        let mut ioapic = Self {
            regs,
            phys_base,
            gsi_base,
            pins: 0,
        };
        let version = ioapic.read_register(IOAPIC_REG_VER);
        ioapic.pins = (((version >> 16) & 0xFF) + 1) as u8;
        klog_debug!(
            "IOAPIC: id {} at {:#x} version {:#x}, {} pins from GSI {}",
            ioapic.id(),
            phys_base,
            version & 0xFF,
            ioapic.pins,
            gsi_base
        );
        ioapic
    }

    #[inline]
    pub fn phys_base(&self) -> u64 {
        self.phys_base
    }

    #[inline]
    pub fn gsi_base(&self) -> u32 {
        self.gsi_base
    }

    #[inline]
    pub fn pins(&self) -> u8 {
        self.pins
    }

    pub fn id(&self) -> u8 {
        ((self.read_register(IOAPIC_REG_ID) >> 24) & 0x0F) as u8
    }

    #[inline]
    fn read_register(&self, reg: u8) -> u32 {
        self.regs.write_u32(IOAPIC_REGSEL, reg as u32);
        self.regs.read_u32(IOAPIC_WINDOW)
    }

    #[inline]
    fn write_register(&self, reg: u8, value: u32) {
        self.regs.write_u32(IOAPIC_REGSEL, reg as u32);
        self.regs.write_u32(IOAPIC_WINDOW, value);
    }

    pub fn redirection(&self, pin: u8) -> Option<Redirection> {
        if pin >= self.pins {
            return None;
        }
        let (low, high) = redirection_registers(pin);
        Some(Redirection::decode(
            self.read_register(low),
            self.read_register(high),
        ))
    }

    /// Destination first so the entry never fires toward a stale CPU.
    pub fn set_redirection(&self, pin: u8, entry: Redirection) -> bool {
        if pin >= self.pins {
            return false;
        }
        let (low, high) = redirection_registers(pin);
        self.write_register(high, entry.high());
        self.write_register(low, entry.low());
        true
    }

    pub fn set_masked(&self, pin: u8, masked: bool) -> bool {
        if pin >= self.pins {
            return false;
        }
        let (low, _) = redirection_registers(pin);
        let mut flags = RedirectionFlags::from_bits_retain(self.read_register(low));
        flags.set(RedirectionFlags::MASKED, masked);
        self.write_register(low, flags.bits());
        true
    }
}
