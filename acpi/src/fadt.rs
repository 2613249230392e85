//! Fixed ACPI Description Table (`FACP`) and the ACPI enable handshake.

use core::hint::spin_loop;

use bitflags::bitflags;
use doomos_lib::{PortIo, klog_debug, klog_info, klog_warn};

use crate::error::{AcpiError, AcpiResult};
use crate::memory::{le_u8, le_u16, le_u32, le_u64};
use crate::tables::{GenericAddress, Signature, Table};

/// ACPI 1.0 FADT: everything up to and including `Flags`.
pub const FADT_MIN_LEN: usize = 116;
const FADT_RESET_MIN_LEN: usize = 129;
const FADT_X_DSDT_MIN_LEN: usize = 148;

const OFF_FIRMWARE_CTRL: usize = 36;
const OFF_DSDT: usize = 40;
const OFF_SCI_INT: usize = 46;
const OFF_SMI_CMD: usize = 48;
const OFF_ACPI_ENABLE: usize = 52;
const OFF_ACPI_DISABLE: usize = 53;
const OFF_S4BIOS_REQ: usize = 54;
const OFF_PM1A_EVT: usize = 56;
const OFF_PM1B_EVT: usize = 60;
const OFF_PM1A_CNT: usize = 64;
const OFF_PM1B_CNT: usize = 68;
const OFF_PM2_CNT: usize = 72;
const OFF_PM_TMR: usize = 76;
const OFF_GPE0: usize = 80;
const OFF_GPE1: usize = 84;
const OFF_FLAGS: usize = 112;
const OFF_RESET_REG: usize = 116;
const OFF_RESET_VALUE: usize = 128;
const OFF_X_DSDT: usize = 140;

bitflags! {
    /// PM1 control register bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Pm1Control: u16 {
        const SCI_EN = 1 << 0;
        const BM_RLD = 1 << 1;
        const GBL_RLS = 1 << 2;
        const SLP_TYP = 0b111 << 10;
        const SLP_EN = 1 << 13;
    }
}

bitflags! {
    /// PM1 status register bits, write-one-to-clear.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Pm1Status: u16 {
        const TMR_STS = 1 << 0;
        const BM_STS = 1 << 4;
        const GBL_STS = 1 << 5;
        const PWRBTN_STS = 1 << 8;
        const SLPBTN_STS = 1 << 9;
        const RTC_STS = 1 << 10;
        const WAK_STS = 1 << 15;
    }
}

bitflags! {
    /// FADT feature flags (offset 112).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FadtFlags: u32 {
        const WBINVD = 1 << 0;
        const PROC_C1 = 1 << 2;
        const PWR_BUTTON = 1 << 4;
        const SLP_BUTTON = 1 << 5;
        const RESET_REG_SUP = 1 << 10;
        const HW_REDUCED_ACPI = 1 << 20;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResetRegister {
    pub register: GenericAddress,
    pub value: u8,
}

/// Power-management facts taken from the FADT.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PowerManagement {
    pub firmware_ctrl: u32,
    pub dsdt: u32,
    pub x_dsdt: Option<u64>,
    pub sci_interrupt: u16,
    pub smi_command: u32,
    pub acpi_enable: u8,
    pub acpi_disable: u8,
    pub s4bios_req: u8,
    /// Physical address of the S4BIOS_REQ byte inside the FADT.
    pub s4bios_req_address: u64,
    pub pm1a_event: u32,
    pub pm1b_event: u32,
    pub pm1a_control: u32,
    pub pm1b_control: u32,
    pub pm2_control: u32,
    pub pm_timer: u32,
    pub gpe0: u32,
    pub gpe1: u32,
    pub flags: FadtFlags,
    pub reset: Option<ResetRegister>,
}

impl PowerManagement {
    pub fn parse(table: &Table<'_>) -> AcpiResult<Self> {
        let table = table
            .expect_signature(Signature::FADT)?
            .require_len(FADT_MIN_LEN)?;
        let bytes = table.bytes();
        let short = AcpiError::TableTooShort {
            signature: Signature::FADT,
            length: table.header.length,
        };
        let u32_at = |offset| le_u32(bytes, offset).ok_or(short);
        let u8_at = |offset| le_u8(bytes, offset).ok_or(short);

        let reset = if bytes.len() >= FADT_RESET_MIN_LEN {
            GenericAddress::parse(bytes, OFF_RESET_REG)
                .zip(le_u8(bytes, OFF_RESET_VALUE))
                .map(|(register, value)| ResetRegister { register, value })
        } else {
            None
        };
        let x_dsdt = if bytes.len() >= FADT_X_DSDT_MIN_LEN {
            le_u64(bytes, OFF_X_DSDT).filter(|&addr| addr != 0)
        } else {
            None
        };

        Ok(Self {
            firmware_ctrl: u32_at(OFF_FIRMWARE_CTRL)?,
            dsdt: u32_at(OFF_DSDT)?,
            x_dsdt,
            sci_interrupt: le_u16(bytes, OFF_SCI_INT).ok_or(short)?,
            smi_command: u32_at(OFF_SMI_CMD)?,
            acpi_enable: u8_at(OFF_ACPI_ENABLE)?,
            acpi_disable: u8_at(OFF_ACPI_DISABLE)?,
            s4bios_req: u8_at(OFF_S4BIOS_REQ)?,
            s4bios_req_address: table.phys + OFF_S4BIOS_REQ as u64,
            pm1a_event: u32_at(OFF_PM1A_EVT)?,
            pm1b_event: u32_at(OFF_PM1B_EVT)?,
            pm1a_control: u32_at(OFF_PM1A_CNT)?,
            pm1b_control: u32_at(OFF_PM1B_CNT)?,
            pm2_control: u32_at(OFF_PM2_CNT)?,
            pm_timer: u32_at(OFF_PM_TMR)?,
            gpe0: u32_at(OFF_GPE0)?,
            gpe1: u32_at(OFF_GPE1)?,
            flags: FadtFlags::from_bits_retain(u32_at(OFF_FLAGS)?),
            reset,
        })
    }

    /// Physical address of the DSDT, preferring the 64-bit field.
    pub fn dsdt_address(&self) -> u64 {
        self.x_dsdt.unwrap_or(self.dsdt as u64)
    }

    pub(crate) fn log(&self) {
        klog_info!(
            "ACPI: FADT sci={} pm1a_cnt={:#x} pm1b_cnt={:#x} smi_cmd={:#x} dsdt={:#x}",
            self.sci_interrupt,
            self.pm1a_control,
            self.pm1b_control,
            self.smi_command,
            self.dsdt_address()
        );
        klog_debug!(
            "ACPI: FADT firmware_ctrl={:#x} pm_timer={:#x} s4bios_req={:#x}@{:#x}",
            self.firmware_ctrl,
            self.pm_timer,
            self.s4bios_req,
            self.s4bios_req_address
        );
    }
}

/// Bounds on the SCI_EN wait after writing `ACPI_ENABLE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnableWait {
    /// Spins before the first poll.
    pub settle_spins: u32,
    /// Reads of PM1 control before giving up.
    pub poll_limit: u32,
    /// Spins between two polls.
    pub spins_per_poll: u32,
}

impl EnableWait {
    pub const DEFAULT_POLLS: u32 = 300;

    pub const fn with_polls(poll_limit: u32) -> Self {
        Self {
            settle_spins: 100_000,
            poll_limit,
            spins_per_poll: 10_000,
        }
    }
}

impl Default for EnableWait {
    fn default() -> Self {
        Self::with_polls(Self::DEFAULT_POLLS)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcpiMode {
    AlreadyEnabled,
    Enabled,
    /// SCI_EN is clear and the FADT gives no way to set it.
    NoEnablePath,
}

#[inline]
fn sci_enabled<P: PortIo>(ports: &P, control: u32) -> bool {
    Pm1Control::from_bits_retain(ports.read_u16(control as u16)).contains(Pm1Control::SCI_EN)
}

fn spin(count: u32) {
    for _ in 0..count {
        spin_loop();
    }
}

/// Switch the platform from legacy to ACPI mode if it is not there yet.
///
/// Writes `ACPI_ENABLE` to the SMI command port and waits for SCI_EN in
/// PM1a (and PM1b when present), polling at most `wait.poll_limit` times.
pub fn enable_acpi<P: PortIo>(
    pm: &PowerManagement,
    ports: &P,
    wait: EnableWait,
) -> AcpiResult<AcpiMode> {
    if pm.pm1a_control == 0 {
        klog_warn!("ACPI: no PM1a control block, cannot enable");
        return Ok(AcpiMode::NoEnablePath);
    }
    if sci_enabled(ports, pm.pm1a_control) {
        klog_debug!("ACPI: already enabled");
        return Ok(AcpiMode::AlreadyEnabled);
    }
    if pm.smi_command == 0 || pm.acpi_enable == 0 {
        klog_warn!("ACPI: SCI_EN clear and no SMI enable command");
        return Ok(AcpiMode::NoEnablePath);
    }

    ports.write_u8(pm.smi_command as u16, pm.acpi_enable);
    spin(wait.settle_spins);

    let mut polls = 0;
    let blocks = [Some(pm.pm1a_control), (pm.pm1b_control != 0).then_some(pm.pm1b_control)];
    for control in blocks.into_iter().flatten() {
        while !sci_enabled(ports, control) {
            if polls >= wait.poll_limit {
                klog_warn!("ACPI: enable timed out after {} polls", polls);
                return Err(AcpiError::EnableTimeout { polls });
            }
            polls += 1;
            spin(wait.spins_per_poll);
        }
    }

    klog_info!("ACPI: enabled");
    Ok(AcpiMode::Enabled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{Body, fadt};
    use doomos_lib::testing::FakePorts;

    const QUICK: EnableWait = EnableWait {
        settle_spins: 0,
        poll_limit: 5,
        spins_per_poll: 0,
    };

    fn parsed() -> PowerManagement {
        let bytes = fadt(0x7FE_2000);
        PowerManagement::parse(&Table::from_bytes(0x7FE_0100, &bytes).unwrap()).unwrap()
    }

    #[test]
    fn fields_come_from_fixed_offsets() {
        let pm = parsed();
        assert_eq!(pm.firmware_ctrl, 0x7FE_1000);
        assert_eq!(pm.dsdt_address(), 0x7FE_2000);
        assert_eq!(pm.sci_interrupt, 9);
        assert_eq!(pm.smi_command, 0xB2);
        assert_eq!(pm.acpi_enable, 0xF1);
        assert_eq!(pm.acpi_disable, 0xF0);
        assert_eq!(pm.pm1a_event, 0x600);
        assert_eq!(pm.pm1a_control, 0x604);
        assert_eq!(pm.pm1b_control, 0);
        assert_eq!(pm.pm_timer, 0x608);
        assert_eq!(pm.gpe0, 0x620);
        assert_eq!(pm.s4bios_req_address, 0x7FE_0100 + 54);
        assert!(pm.flags.contains(FadtFlags::RESET_REG_SUP));
        let reset = pm.reset.unwrap();
        assert!(reset.register.is_io());
        assert_eq!(reset.register.address, 0xCF9);
        assert_eq!(reset.value, 6);
    }

    #[test]
    fn acpi_1_fadt_has_no_reset_register() {
        let bytes = Body::for_table(FADT_MIN_LEN)
            .u32(40, 0x1234)
            .u32(64, 0x404)
            .into_table(b"FACP", 1);
        let pm = PowerManagement::parse(&Table::from_bytes(0, &bytes).unwrap()).unwrap();
        assert_eq!(pm.reset, None);
        assert_eq!(pm.x_dsdt, None);
        assert_eq!(pm.dsdt_address(), 0x1234);
    }

    #[test]
    fn x_dsdt_wins_when_present() {
        let bytes = Body::for_table(148)
            .u32(40, 0x1234)
            .u64(140, 0x1_0000_0000)
            .into_table(b"FACP", 3);
        let pm = PowerManagement::parse(&Table::from_bytes(0, &bytes).unwrap()).unwrap();
        assert_eq!(pm.dsdt_address(), 0x1_0000_0000);
    }

    #[test]
    fn truncated_fadt_is_rejected() {
        let bytes = Body::for_table(100).into_table(b"FACP", 1);
        let table = Table::from_bytes(0, &bytes).unwrap();
        assert!(matches!(
            PowerManagement::parse(&table),
            Err(AcpiError::TableTooShort { length: 100, .. })
        ));
    }

    #[test]
    fn enable_is_skipped_when_sci_en_is_set() {
        let ports = FakePorts::new();
        ports.set(0x604, 1);
        assert_eq!(enable_acpi(&parsed(), &ports, QUICK), Ok(AcpiMode::AlreadyEnabled));
        assert!(ports.writes().is_empty());
    }

    #[test]
    fn enable_writes_command_and_polls_until_sci_en() {
        let ports = FakePorts::new();
        ports.script(0x604, &[0, 0, 0]);
        ports.set(0x604, 1);
        assert_eq!(enable_acpi(&parsed(), &ports, QUICK), Ok(AcpiMode::Enabled));
        assert_eq!(ports.writes_to(0xB2), vec![0xF1]);
        // initial check, two clear polls, one set poll
        assert_eq!(ports.reads_of(0x604), 4);
    }

    #[test]
    fn enable_wait_is_bounded() {
        let ports = FakePorts::new();
        assert_eq!(
            enable_acpi(&parsed(), &ports, QUICK),
            Err(AcpiError::EnableTimeout { polls: 5 })
        );
        assert_eq!(ports.reads_of(0x604), 1 + 5 + 1);
    }

    fn with_pm1b() -> PowerManagement {
        let mut pm = parsed();
        pm.pm1b_control = 0x614;
        pm
    }

    #[test]
    fn pm1b_shares_the_poll_budget_with_pm1a() {
        let ports = FakePorts::new();
        // PM1a needs two polls, PM1b never sets SCI_EN.
        ports.script(0x604, &[0, 0, 0]);
        ports.set(0x604, 1);
        assert_eq!(
            enable_acpi(&with_pm1b(), &ports, QUICK),
            Err(AcpiError::EnableTimeout { polls: 5 })
        );
        assert_eq!(ports.reads_of(0x604), 4);
        // three polls left for PM1b, plus the read that hits the limit
        assert_eq!(ports.reads_of(0x614), 4);
    }

    #[test]
    fn pm1b_setting_sci_en_late_completes_the_enable() {
        let ports = FakePorts::new();
        ports.script(0x604, &[0]);
        ports.set(0x604, 1);
        ports.script(0x614, &[0, 0]);
        ports.set(0x614, 1);
        assert_eq!(enable_acpi(&with_pm1b(), &ports, QUICK), Ok(AcpiMode::Enabled));
        assert_eq!(ports.reads_of(0x614), 3);
    }

    #[test]
    fn no_smi_command_means_no_enable_path() {
        let mut pm = parsed();
        pm.smi_command = 0;
        let ports = FakePorts::new();
        assert_eq!(enable_acpi(&pm, &ports, QUICK), Ok(AcpiMode::NoEnablePath));
        assert!(ports.writes().is_empty());
    }
}
