//! Root table walk and the platform configuration it produces.

use alloc::vec::Vec;

use doomos_lib::{klog_debug, klog_info, klog_warn};

use crate::dsdt::{DsdtCopy, SleepStates};
use crate::error::{AcpiError, AcpiResult};
use crate::fadt::PowerManagement;
use crate::hpet::TimerBlock;
use crate::madt::{InterruptTopology, Madt};
use crate::mcfg::PciSegments;
use crate::memory::PhysMemory;
use crate::ssdt::SsdtCopy;
use crate::tables::{RootTable, Signature, Table, load_table, push_entry};

/// Everything the kernel learned from firmware tables. Built once during
/// boot, read-only afterwards. Any table may be missing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformConfig {
    pub root_phys: u64,
    pub root_signature: Signature,
    pub power: Option<PowerManagement>,
    pub dsdt: Option<DsdtCopy>,
    pub interrupts: Option<InterruptTopology>,
    pub timer: Option<TimerBlock>,
    pub pci: Option<PciSegments>,
    pub ssdts: Vec<SsdtCopy>,
    /// Root entries that were unreadable, failed their checksum or failed
    /// to parse.
    pub skipped: usize,
}

impl PlatformConfig {
    fn empty(root_phys: u64, root_signature: Signature) -> Self {
        Self {
            root_phys,
            root_signature,
            power: None,
            dsdt: None,
            interrupts: None,
            timer: None,
            pci: None,
            ssdts: Vec::new(),
            skipped: 0,
        }
    }

    /// Not-found for every state when there is no DSDT.
    pub fn sleep_states(&self) -> SleepStates {
        self.dsdt
            .as_ref()
            .map(|dsdt| dsdt.sleep_states)
            .unwrap_or_default()
    }

    pub fn sci_interrupt(&self) -> Option<u16> {
        self.power
            .as_ref()
            .map(|pm| pm.sci_interrupt)
            .filter(|&sci| sci != 0)
    }

    pub fn local_apic_address(&self) -> Option<u64> {
        self.interrupts
            .as_ref()
            .map(|topology| topology.local_apic_address)
            .filter(|&address| address != 0)
    }

    pub fn io_apic_address(&self) -> Option<u64> {
        self.interrupts
            .as_ref()
            .and_then(InterruptTopology::effective_io_apic)
            .map(|ioapic| ioapic.address as u64)
    }

    fn record_failure(&mut self, signature: Signature, phys: u64, err: AcpiError) {
        klog_warn!("ACPI: {} at {:#x} skipped: {}", signature, phys, err);
        self.skipped += 1;
    }

    fn load_dsdt<M: PhysMemory>(&mut self, mem: &M, phys: u64) {
        if phys == 0 {
            klog_warn!("ACPI: FADT has no DSDT address");
            return;
        }
        let parsed = load_table(mem, phys).and_then(|table| {
            if !table.checksum_ok() {
                return Err(AcpiError::ChecksumMismatch {
                    signature: table.signature(),
                });
            }
            DsdtCopy::parse(&table)
        });
        match parsed {
            Ok(dsdt) => self.dsdt = Some(dsdt),
            Err(err) => self.record_failure(Signature::DSDT, phys, err),
        }
    }

    fn dispatch<M: PhysMemory>(&mut self, mem: &M, table: &Table<'_>) -> AcpiResult {
        match table.signature() {
            Signature::FADT => {
                let pm = PowerManagement::parse(table)?;
                pm.log();
                self.power = Some(pm);
                self.load_dsdt(mem, pm.dsdt_address());
            }
            Signature::MADT => {
                self.interrupts = Some(Madt::parse(table)?.topology()?);
            }
            Signature::HPET => {
                self.timer = Some(TimerBlock::parse(table)?);
            }
            Signature::MCFG => {
                self.pci = Some(PciSegments::parse(table)?);
            }
            Signature::SSDT => {
                let ssdt = SsdtCopy::parse(table)?;
                push_entry(&mut self.ssdts, ssdt, Signature::SSDT)?;
            }
            Signature::DSDT => {
                klog_debug!("ACPI: DSDT listed in root table, reached through FADT");
            }
            other => {
                klog_info!("ACPI: unknown table {} at {:#x}", other, table.phys);
            }
        }
        Ok(())
    }
}

/// Walk the RSDT/XSDT at `root_phys` and parse every table it lists.
///
/// Only a root that cannot be read or is not a root table fails the whole
/// parse. Each child is independent: one that is unreadable, has a bad
/// checksum or does not parse is logged and left out of the result.
pub fn parse_root<M: PhysMemory>(mem: &M, root_phys: u64) -> AcpiResult<PlatformConfig> {
    let table = load_table(mem, root_phys)?;
    let root = RootTable::from_table(table).inspect_err(|err| {
        klog_warn!("ACPI: root at {:#x} rejected: {}", root_phys, err);
    })?;
    if !root.table().checksum_ok() {
        klog_warn!("ACPI: {} checksum mismatch", table.signature());
        return Err(AcpiError::ChecksumMismatch {
            signature: table.signature(),
        });
    }

    klog_info!(
        "ACPI: {} at {:#x} lists {} tables",
        table.signature(),
        root_phys,
        root.entry_count()
    );

    let mut config = PlatformConfig::empty(root_phys, table.signature());
    for phys in root.entries() {
        let table = match load_table(mem, phys) {
            Ok(table) => table,
            Err(err) => {
                klog_warn!("ACPI: table at {:#x} unreadable: {}", phys, err);
                config.skipped += 1;
                continue;
            }
        };
        if !table.checksum_ok() {
            config.record_failure(
                table.signature(),
                phys,
                AcpiError::ChecksumMismatch {
                    signature: table.signature(),
                },
            );
            continue;
        }
        if let Err(err) = config.dispatch(mem, &table) {
            config.record_failure(table.signature(), phys, err);
        }
    }

    klog_info!(
        "ACPI: configuration committed ({} tables skipped)",
        config.skipped
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsdt::SleepType;
    use crate::test_fixtures::{Body, FirmwareImage, S5_PACKAGE, dsdt, fadt, rsdt, sdt};

    const RSDT_AT: u64 = 0x7FE_0000;
    const FADT_AT: u64 = 0x7FE_0100;
    const MADT_AT: u64 = 0x7FE_0300;
    const HPET_AT: u64 = 0x7FE_0400;
    const MCFG_AT: u64 = 0x7FE_0500;
    const SSDT_AT: u64 = 0x7FE_0600;
    const BGRT_AT: u64 = 0x7FE_0700;
    const DSDT_AT: u64 = 0x7FE_2000;

    fn madt() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&0xFEE0_0000u32.to_le_bytes());
        body.extend_from_slice(&1u32.to_le_bytes());
        body.extend_from_slice(&[0, 8, 0, 0, 1, 0, 0, 0]);
        body.extend_from_slice(&[1, 12, 0, 0, 0x00, 0x00, 0xC0, 0xFE, 0, 0, 0, 0]);
        sdt(b"APIC", 3, &body)
    }

    fn hpet() -> Vec<u8> {
        Body::for_table(56)
            .u32(36, 0x8086_A201)
            .u64(44, 0xFED0_0000)
            .u16(53, 0x80)
            .into_table(b"HPET", 1)
    }

    fn mcfg() -> Vec<u8> {
        let mut body = vec![0u8; 8];
        body.extend_from_slice(&0xB000_0000u64.to_le_bytes());
        body.extend_from_slice(&[0, 0, 0, 0xFF, 0, 0, 0, 0]);
        sdt(b"MCFG", 1, &body)
    }

    fn firmware() -> FirmwareImage {
        let mut image = FirmwareImage::new();
        image.place(
            RSDT_AT,
            rsdt(&[FADT_AT, MADT_AT, HPET_AT, MCFG_AT, SSDT_AT, BGRT_AT, DSDT_AT]),
        );
        image.place(FADT_AT, fadt(DSDT_AT as u32));
        image.place(MADT_AT, madt());
        image.place(HPET_AT, hpet());
        image.place(MCFG_AT, mcfg());
        image.place(SSDT_AT, sdt(b"SSDT", 2, &[0x10, 0x05, b'\\', b'_', b'P', b'R']));
        image.place(BGRT_AT, sdt(b"BGRT", 1, &[0; 20]));
        image.place(DSDT_AT, dsdt(&S5_PACKAGE));
        image
    }

    #[test]
    fn full_firmware_image_populates_every_field() {
        let config = parse_root(&firmware(), RSDT_AT).unwrap();

        assert_eq!(config.root_signature, Signature::RSDT);
        assert_eq!(config.skipped, 0);
        assert_eq!(config.sci_interrupt(), Some(9));

        let pm = config.power.unwrap();
        assert_eq!(pm.pm1a_control, 0x604);
        assert_eq!(pm.reset.unwrap().value, 6);

        assert_eq!(
            config.sleep_states().s5(),
            Some(SleepType {
                a: 5 << 10,
                b: 7 << 10
            })
        );
        assert_eq!(config.dsdt.as_ref().unwrap().phys, DSDT_AT);

        assert_eq!(config.local_apic_address(), Some(0xFEE0_0000));
        assert_eq!(config.io_apic_address(), Some(0xFEC0_0000));
        assert_eq!(config.timer.unwrap().address.address, 0xFED0_0000);
        assert_eq!(config.pci.as_ref().unwrap().len(), 1);
        assert_eq!(config.ssdts.len(), 1);
        assert_eq!(config.ssdts[0].aml().len(), 6);
    }

    #[test]
    fn foreign_root_signature_is_rejected() {
        let mut image = FirmwareImage::new();
        // Garbage where the pointer array would be must never be followed.
        image.place(RSDT_AT, sdt(b"FACP", 1, &[0xEF, 0xBE, 0xAD, 0xDE]));
        assert_eq!(
            parse_root(&image, RSDT_AT),
            Err(AcpiError::BadSignature {
                expected: Signature::RSDT,
                found: Signature::FADT
            })
        );
    }

    #[test]
    fn root_checksum_mismatch_fails_the_parse() {
        let mut image = firmware();
        let mut root = rsdt(&[FADT_AT]);
        root[9] = root[9].wrapping_add(1);
        image.place(RSDT_AT, root);
        assert_eq!(
            parse_root(&image, RSDT_AT),
            Err(AcpiError::ChecksumMismatch {
                signature: Signature::RSDT
            })
        );
    }

    #[test]
    fn broken_children_are_skipped_individually() {
        let mut image = firmware();
        let mut bad_madt = madt();
        bad_madt[20] ^= 0xFF;
        image.place(MADT_AT, bad_madt);
        image.place(
            RSDT_AT,
            rsdt(&[0x9000_0000, MADT_AT, HPET_AT, FADT_AT]),
        );

        let config = parse_root(&image, RSDT_AT).unwrap();
        assert_eq!(config.skipped, 2);
        assert!(config.interrupts.is_none());
        assert_eq!(config.io_apic_address(), None);
        assert!(config.timer.is_some());
        assert!(config.power.is_some());
    }

    #[test]
    fn missing_dsdt_leaves_sleep_states_unknown() {
        let mut image = FirmwareImage::new();
        image.place(RSDT_AT, rsdt(&[FADT_AT]));
        image.place(FADT_AT, fadt(0));

        let config = parse_root(&image, RSDT_AT).unwrap();
        assert!(config.power.is_some());
        assert!(config.dsdt.is_none());
        assert_eq!(config.sleep_states().found(), 0);
    }

    #[test]
    fn xsdt_root_is_walked_with_wide_pointers() {
        let mut image = firmware();
        let body: Vec<u8> = [HPET_AT, MCFG_AT]
            .iter()
            .flat_map(|phys| phys.to_le_bytes())
            .collect();
        image.place(RSDT_AT, sdt(b"XSDT", 1, &body));

        let config = parse_root(&image, RSDT_AT).unwrap();
        assert_eq!(config.root_signature, Signature::XSDT);
        assert!(config.timer.is_some());
        assert!(config.pci.is_some());
        assert!(config.power.is_none());
    }
}
