//! Dual 8259 programmable interrupt controller.

use doomos_abi::arch::pic::{
    PIC_CASCADE_LINE, PIC_EOI, PIC_ICW1_INIT, PIC_ICW3_MASTER, PIC_ICW3_SLAVE, PIC_ICW4_8086,
    PIC_LINES, PIC_READ_IRR, PIC_READ_ISR, PIC1_COMMAND, PIC1_DATA, PIC2_COMMAND, PIC2_DATA,
};
use doomos_abi::arch::IRQ_BASE_VECTOR;
use doomos_lib::{PortIo, klog_debug};

const LINES_PER_CHIP: u8 = 8;

/// Master/slave pair. Lines 0-7 sit on the master, 8-15 on the slave.
pub struct Pic8259<P: PortIo> {
    ports: P,
    master_offset: u8,
    slave_offset: u8,
}

impl<P: PortIo> Pic8259<P> {
    pub fn new(ports: P) -> Self {
        Self {
            ports,
            master_offset: IRQ_BASE_VECTOR,
            slave_offset: IRQ_BASE_VECTOR + LINES_PER_CHIP,
        }
    }

    #[inline]
    pub fn ports(&self) -> &P {
        &self.ports
    }

    #[inline]
    pub fn master_offset(&self) -> u8 {
        self.master_offset
    }

    #[inline]
    pub fn slave_offset(&self) -> u8 {
        self.slave_offset
    }

    /// Run the ICW1..ICW4 sequence so the chips deliver on `master` and
    /// `slave` onwards. Leaves every line masked.
    pub fn remap(&mut self, master: u8, slave: u8) {
        let io = &self.ports;
        io.write_u8(PIC1_COMMAND, PIC_ICW1_INIT);
        io.io_wait();
        io.write_u8(PIC2_COMMAND, PIC_ICW1_INIT);
        io.io_wait();
        io.write_u8(PIC1_DATA, master);
        io.io_wait();
        io.write_u8(PIC2_DATA, slave);
        io.io_wait();
        io.write_u8(PIC1_DATA, PIC_ICW3_MASTER);
        io.io_wait();
        io.write_u8(PIC2_DATA, PIC_ICW3_SLAVE);
        io.io_wait();
        io.write_u8(PIC1_DATA, PIC_ICW4_8086);
        io.io_wait();
        io.write_u8(PIC2_DATA, PIC_ICW4_8086);
        io.io_wait();

        self.master_offset = master;
        self.slave_offset = slave;
        self.mask_all();
        klog_debug!("PIC: remapped to {:#x}/{:#x}", master, slave);
    }

    pub fn mask_all(&self) {
        self.ports.write_u8(PIC1_DATA, 0xFF);
        self.ports.write_u8(PIC2_DATA, 0xFF);
    }

    /// Mask everything and retire anything in service, for handing
    /// delivery over to the APIC.
    pub fn disable(&self) {
        self.mask_all();
        self.ports.write_u8(PIC1_COMMAND, PIC_EOI);
        self.ports.write_u8(PIC2_COMMAND, PIC_EOI);
    }

    /// Slave lines also unmask the cascade line on the master.
    pub fn set_masked(&self, line: u8, masked: bool) {
        debug_assert!((line as usize) < PIC_LINES);
        let (port, bit) = if line < LINES_PER_CHIP {
            (PIC1_DATA, line)
        } else {
            (PIC2_DATA, line - LINES_PER_CHIP)
        };
        let current = self.ports.read_u8(port);
        let next = if masked {
            current | (1 << bit)
        } else {
            current & !(1 << bit)
        };
        self.ports.write_u8(port, next);

        if !masked && line >= LINES_PER_CHIP {
            self.set_masked(PIC_CASCADE_LINE, false);
        }
    }

    /// Both mask registers, slave in the high byte.
    pub fn masks(&self) -> u16 {
        let master = self.ports.read_u8(PIC1_DATA) as u16;
        let slave = self.ports.read_u8(PIC2_DATA) as u16;
        (slave << 8) | master
    }

    fn read_register(&self, ocw3: u8) -> u16 {
        self.ports.write_u8(PIC1_COMMAND, ocw3);
        self.ports.write_u8(PIC2_COMMAND, ocw3);
        let master = self.ports.read_u8(PIC1_COMMAND) as u16;
        let slave = self.ports.read_u8(PIC2_COMMAND) as u16;
        (slave << 8) | master
    }

    #[inline]
    pub fn read_isr(&self) -> u16 {
        self.read_register(PIC_READ_ISR)
    }

    #[inline]
    pub fn read_irr(&self) -> u16 {
        self.read_register(PIC_READ_IRR)
    }

    /// Slave lines need an EOI on both chips.
    pub fn end_of_interrupt(&self, line: u8) {
        if (LINES_PER_CHIP..PIC_LINES as u8).contains(&line) {
            self.ports.write_u8(PIC2_COMMAND, PIC_EOI);
        }
        self.ports.write_u8(PIC1_COMMAND, PIC_EOI);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doomos_lib::testing::FakePorts;

    const POST: u16 = 0x80;

    #[test]
    fn remap_runs_the_init_sequence_and_masks_everything() {
        let ports = FakePorts::new();
        let mut pic = Pic8259::new(ports.clone());
        pic.remap(0x20, 0x28);

        let sequence: Vec<_> = ports
            .writes()
            .into_iter()
            .filter(|&(port, _)| port != POST)
            .collect();
        assert_eq!(
            sequence,
            vec![
                (PIC1_COMMAND, 0x11),
                (PIC2_COMMAND, 0x11),
                (PIC1_DATA, 0x20),
                (PIC2_DATA, 0x28),
                (PIC1_DATA, 0x04),
                (PIC2_DATA, 0x02),
                (PIC1_DATA, 0x01),
                (PIC2_DATA, 0x01),
                (PIC1_DATA, 0xFF),
                (PIC2_DATA, 0xFF),
            ]
        );
        assert_eq!(pic.masks(), 0xFFFF);
        assert_eq!((pic.master_offset(), pic.slave_offset()), (0x20, 0x28));
    }

    #[test]
    fn slave_unmask_opens_the_cascade() {
        let ports = FakePorts::new();
        let pic = Pic8259::new(ports.clone());
        pic.mask_all();
        pic.set_masked(12, false);
        assert_eq!(pic.masks(), 0xEFFB);

        pic.set_masked(1, false);
        pic.set_masked(12, true);
        assert_eq!(pic.masks(), 0xFFF9);
    }

    #[test]
    fn eoi_goes_to_both_chips_for_slave_lines() {
        let ports = FakePorts::new();
        let pic = Pic8259::new(ports.clone());

        pic.end_of_interrupt(3);
        assert_eq!(ports.writes(), vec![(PIC1_COMMAND, 0x20)]);

        ports.clear_log();
        pic.end_of_interrupt(9);
        assert_eq!(ports.writes(), vec![(PIC2_COMMAND, 0x20), (PIC1_COMMAND, 0x20)]);
    }

    #[test]
    fn isr_read_selects_the_register_first() {
        let ports = FakePorts::new();
        ports.script(PIC1_COMMAND, &[0x01]);
        ports.script(PIC2_COMMAND, &[0x10]);
        let pic = Pic8259::new(ports.clone());

        assert_eq!(pic.read_isr(), 0x1001);
        assert_eq!(ports.writes_to(PIC1_COMMAND), vec![0x0B]);
        assert_eq!(ports.writes_to(PIC2_COMMAND), vec![0x0B]);
    }
}
