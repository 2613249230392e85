//! 8259 PIC port numbers and command words.

pub const PIC1_COMMAND: u16 = 0x20;
pub const PIC1_DATA: u16 = 0x21;
pub const PIC2_COMMAND: u16 = 0xA0;
pub const PIC2_DATA: u16 = 0xA1;

/// ICW1: initialization, ICW4 follows.
pub const PIC_ICW1_INIT: u8 = 0x11;
/// ICW4: 8086/88 mode.
pub const PIC_ICW4_8086: u8 = 0x01;
/// ICW3 for the master: slave attached on line 2.
pub const PIC_ICW3_MASTER: u8 = 0x04;
/// ICW3 for the slave: cascade identity 2.
pub const PIC_ICW3_SLAVE: u8 = 0x02;

pub const PIC_EOI: u8 = 0x20;
/// OCW3 selecting the Interrupt Request Register for the next read.
pub const PIC_READ_IRR: u8 = 0x0A;
/// OCW3 selecting the In-Service Register for the next read.
pub const PIC_READ_ISR: u8 = 0x0B;

pub const PIC_LINES: usize = 16;
/// Cascade line on the master that carries the slave.
pub const PIC_CASCADE_LINE: u8 = 2;

/// Interrupt Mode Configuration Register select/data ports.
pub const IMCR_SELECT: u16 = 0x22;
pub const IMCR_DATA: u16 = 0x23;
/// Value written to the select port to address the IMCR.
pub const IMCR_REGISTER: u8 = 0x70;
/// Routes INTR/NMI through the APIC instead of the 8259 pair.
pub const IMCR_APIC_MODE: u8 = 0x01;

/// Bit the IMCR check reads back from the select port when the register exists.
pub const IMCR_PRESENT: u8 = 0x80;
