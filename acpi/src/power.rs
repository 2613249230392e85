//! Soft-off and reset through the registers the FADT describes.
//!
//! Both paths only issue the writes; if the machine is still running
//! afterwards the caller decides what to do (normally halt).

use doomos_lib::ports::{
    ACPI_PM1A_CNT, ACPI_PM1A_CNT_BOCHS, ACPI_PM1A_CNT_VBOX, PS2_CMD_RESET_CPU, PS2_COMMAND,
    PS2_STATUS, PS2_STATUS_INPUT_FULL,
};
use doomos_lib::{PortIo, klog_info, klog_warn};

use crate::fadt::{Pm1Control, Pm1Status, PowerManagement};
use crate::platform::PlatformConfig;

/// Emulator power-off shortcuts (Bochs/older QEMU, QEMU PIIX4, VirtualBox),
/// written before trying the ACPI S5 transition.
const EMULATOR_POWER_OFF: [(u16, u16); 3] = [
    (ACPI_PM1A_CNT_BOCHS.number(), 0x2000),
    (ACPI_PM1A_CNT.number(), 0x2000),
    (ACPI_PM1A_CNT_VBOX.number(), 0x3400),
];

/// Status reads before pulsing reset regardless.
pub const KBC_DRAIN_POLLS: u32 = 0x1_0000;

/// How far `power_off` got.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerOffPath {
    /// Only the emulator shortcuts were written.
    EmulatorOnly,
    /// SLP_TYP for S5 was written with SLP_EN.
    SleepS5,
}

/// Write the emulator shortcuts only; used when no FADT is known.
pub fn emulator_power_off<P: PortIo>(ports: &P) {
    for (port, value) in EMULATOR_POWER_OFF {
        ports.write_u16(port, value);
    }
}

/// Enter S5.
pub fn power_off<P: PortIo>(config: &PlatformConfig, ports: &P) -> PowerOffPath {
    emulator_power_off(ports);

    let Some(pm) = config.power.as_ref().filter(|pm| pm.sci_interrupt != 0) else {
        klog_warn!("ACPI: no SCI, cannot enter S5");
        return PowerOffPath::EmulatorOnly;
    };
    let Some(s5) = config.sleep_states().s5() else {
        klog_warn!("ACPI: no \\_S5_ package, cannot enter S5");
        return PowerOffPath::EmulatorOnly;
    };

    klog_info!("ACPI: entering S5");
    let enable = Pm1Control::SLP_EN.bits();
    ports.write_u16(pm.pm1a_control as u16, s5.a | enable);
    if pm.pm1b_control != 0 {
        ports.write_u16(pm.pm1b_control as u16, s5.b | enable);
    }
    PowerOffPath::SleepS5
}

/// Reset through the FADT reset register, then the keyboard controller.
pub fn reboot<P: PortIo>(config: &PlatformConfig, ports: &P) {
    match config.power.as_ref().and_then(|pm| pm.reset) {
        Some(reset) if reset.register.is_io() && reset.register.address != 0 => {
            klog_info!(
                "ACPI: reset via port {:#x} value {:#x}",
                reset.register.address,
                reset.value
            );
            ports.write_u8(reset.register.address as u16, reset.value);
        }
        Some(reset) => {
            klog_warn!(
                "ACPI: reset register in address space {} not supported",
                reset.register.address_space
            );
        }
        None => klog_warn!("ACPI: no reset register"),
    }
    pulse_keyboard_reset(ports);
}

/// Wait (bounded) for the keyboard controller input buffer to drain, then
/// pulse the CPU reset line.
pub fn pulse_keyboard_reset<P: PortIo>(ports: &P) {
    let mut polls = 0;
    let status = PS2_STATUS.number();
    while ports.read_u8(status) & PS2_STATUS_INPUT_FULL != 0 && polls < KBC_DRAIN_POLLS {
        polls += 1;
    }
    ports.write_u8(PS2_COMMAND.number(), PS2_CMD_RESET_CPU);
}

/// Read the PM1 status registers and clear every bit that was set.
/// Returns the combined status of both event blocks.
pub fn acknowledge_sci<P: PortIo>(pm: &PowerManagement, ports: &P) -> Pm1Status {
    let mut seen = Pm1Status::empty();
    for block in [pm.pm1a_event, pm.pm1b_event] {
        if block == 0 {
            continue;
        }
        let status = Pm1Status::from_bits_retain(ports.read_u16(block as u16));
        if !status.is_empty() {
            ports.write_u16(block as u16, status.bits());
        }
        seen |= status;
    }
    if seen.contains(Pm1Status::PWRBTN_STS) {
        klog_info!("ACPI: power button pressed");
    }
    seen
}
