use crate::io::Port;

pub const COM1: Port<u8> = Port::new(0x3F8);

pub const PS2_STATUS: Port<u8> = Port::new(0x64);
pub const PS2_COMMAND: Port<u8> = Port::new(0x64);

pub const IO_DELAY: Port<u8> = Port::new(0x80);

/// Emulator power-off shortcuts: Bochs/old QEMU, QEMU, VirtualBox.
pub const ACPI_PM1A_CNT_BOCHS: Port<u16> = Port::new(0xB004);
pub const ACPI_PM1A_CNT: Port<u16> = Port::new(0x604);
pub const ACPI_PM1A_CNT_VBOX: Port<u16> = Port::new(0x4004);

pub const UART_REG_THR: u16 = 0;
pub const UART_REG_IER: u16 = 1;
pub const UART_REG_FCR: u16 = 2;
pub const UART_REG_LCR: u16 = 3;
pub const UART_REG_MCR: u16 = 4;
pub const UART_REG_LSR: u16 = 5;

pub const UART_LCR_DLAB: u8 = 0x80;
pub const UART_LCR_8N1: u8 = 0x03;
pub const UART_FCR_ENABLE_CLEAR_14: u8 = 0xC7;
pub const UART_MCR_DTR_RTS_OUT2: u8 = 0x0B;
pub const UART_LSR_TX_EMPTY: u8 = 0x20;
/// Transmitter fully idle (holding and shift registers empty).
pub const UART_LSR_TX_IDLE: u8 = 0x40;

/// Keyboard controller status: input buffer still full.
pub const PS2_STATUS_INPUT_FULL: u8 = 0x02;
/// Keyboard controller command pulsing the CPU reset line.
pub const PS2_CMD_RESET_CPU: u8 = 0xFE;

// ---------------------------------------------------------------------------
// Low-level serial I/O
// ---------------------------------------------------------------------------
//
// Every path that puts bytes on a UART funnels through here. The functions
// take no lock; callers serialise.

/// Program a 16550 for 38400 baud 8N1 with FIFOs enabled.
///
/// # Safety
///
/// Port I/O on the UART at `base`.
pub unsafe fn serial_init(base: Port<u8>) {
    unsafe {
        base.offset(UART_REG_IER).write(0x00);
        base.offset(UART_REG_LCR).write(UART_LCR_DLAB);
        base.offset(0).write(0x03);
        base.offset(1).write(0x00);
        base.offset(UART_REG_LCR).write(UART_LCR_8N1);
        base.offset(UART_REG_FCR).write(UART_FCR_ENABLE_CLEAR_14);
        base.offset(UART_REG_MCR).write(UART_MCR_DTR_RTS_OUT2);
    }
}

/// Write one byte, polling LSR until the holding register is empty.
///
/// # Safety
///
/// `base` must be an initialised 8250/16550-compatible UART and concurrent
/// access must be serialised by the caller.
#[inline(always)]
pub unsafe fn serial_putc(base: Port<u8>, byte: u8) {
    let lsr = base.offset(UART_REG_LSR);
    let thr = base.offset(UART_REG_THR);
    unsafe {
        while (lsr.read() & UART_LSR_TX_EMPTY) == 0 {
            core::hint::spin_loop();
        }
        thr.write(byte);
    }
}

/// Write a byte slice, converting lone `\n` into `\r\n`.
///
/// # Safety
///
/// Same requirements as [`serial_putc`].
#[inline]
pub unsafe fn serial_write_bytes(base: Port<u8>, bytes: &[u8]) {
    for &b in bytes {
        if b == b'\n' {
            unsafe { serial_putc(base, b'\r') };
        }
        unsafe { serial_putc(base, b) };
    }
}

/// Spin (bounded) until the transmitter has shifted out its last byte.
///
/// # Safety
///
/// Port I/O on the UART at `base`.
pub unsafe fn serial_flush(base: Port<u8>) {
    let lsr = base.offset(UART_REG_LSR);
    for _ in 0..1024 {
        if unsafe { lsr.read() } & UART_LSR_TX_IDLE != 0 {
            break;
        }
        core::hint::spin_loop();
    }
}
