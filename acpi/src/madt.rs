//! Multiple APIC Description Table (`APIC`).
//!
//! The table body is a stream of self-describing entries (`type`, `length`,
//! payload). [`MadtEntries`] walks that stream over the borrowed table bytes
//! and stops for good at an entry shorter than its own two-byte header or
//! one that runs past the declared table length; [`MadtEntries::offset`]
//! then reports where the walk ended.

use alloc::vec::Vec;

use doomos_lib::{klog_debug, klog_info, klog_warn};

use crate::error::AcpiResult;
use crate::memory::{le_u16, le_u32, le_u64};
use crate::tables::{Signature, Table, push_entry};

const OFF_LAPIC_ADDRESS: usize = 36;
const OFF_FLAGS: usize = 40;
pub const MADT_ENTRIES_OFFSET: usize = 44;

const ENTRY_HEADER_LEN: usize = 2;

const ENTRY_LOCAL_APIC: u8 = 0;
const ENTRY_IO_APIC: u8 = 1;
const ENTRY_INTERRUPT_OVERRIDE: u8 = 2;
const ENTRY_NMI_SOURCE: u8 = 3;
const ENTRY_LOCAL_APIC_NMI: u8 = 4;
const ENTRY_LAPIC_ADDRESS_OVERRIDE: u8 = 5;
const ENTRY_LOCAL_X2APIC: u8 = 9;

/// MADT flag: dual 8259 PICs are installed.
pub const MADT_FLAG_PCAT_COMPAT: u32 = 1 << 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessorApic {
    pub acpi_id: u32,
    pub apic_id: u32,
    pub flags: u32,
    pub x2apic: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoApicInfo {
    pub id: u8,
    pub address: u32,
    pub gsi_base: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterruptOverride {
    pub bus_source: u8,
    pub irq_source: u8,
    pub gsi: u32,
    pub flags: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NmiSource {
    pub flags: u16,
    pub gsi: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalApicNmi {
    /// `0xFF` means every processor.
    pub acpi_id: u8,
    pub flags: u16,
    pub lint: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MadtEntry {
    LocalApic(ProcessorApic),
    IoApic(IoApicInfo),
    InterruptOverride(InterruptOverride),
    NmiSource(NmiSource),
    LocalApicNmi(LocalApicNmi),
    LocalApicAddressOverride { address: u64 },
    /// Unrecognised type, or a known type with a payload too short to decode.
    Unknown { entry_type: u8, length: u8 },
}

/// Why an entry walk ended before the end of the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkHalt {
    /// Entry length byte below the two-byte entry header.
    ShortEntry { offset: usize, length: u8 },
    /// Entry extends past the table.
    Overrun { offset: usize, length: usize },
}

impl MadtEntry {
    fn decode(entry_type: u8, raw: &[u8]) -> Self {
        let length = raw.len() as u8;
        let decoded = match entry_type {
            ENTRY_LOCAL_APIC if raw.len() >= 8 => le_u32(raw, 4).map(|flags| {
                Self::LocalApic(ProcessorApic {
                    acpi_id: raw[2] as u32,
                    apic_id: raw[3] as u32,
                    flags,
                    x2apic: false,
                })
            }),
            ENTRY_IO_APIC if raw.len() >= 12 => le_u32(raw, 4)
                .zip(le_u32(raw, 8))
                .map(|(address, gsi_base)| {
                    Self::IoApic(IoApicInfo {
                        id: raw[2],
                        address,
                        gsi_base,
                    })
                }),
            ENTRY_INTERRUPT_OVERRIDE if raw.len() >= 10 => le_u32(raw, 4)
                .zip(le_u16(raw, 8))
                .map(|(gsi, flags)| {
                    Self::InterruptOverride(InterruptOverride {
                        bus_source: raw[2],
                        irq_source: raw[3],
                        gsi,
                        flags,
                    })
                }),
            ENTRY_NMI_SOURCE if raw.len() >= 8 => le_u16(raw, 2)
                .zip(le_u32(raw, 4))
                .map(|(flags, gsi)| Self::NmiSource(NmiSource { flags, gsi })),
            ENTRY_LOCAL_APIC_NMI if raw.len() >= 6 => le_u16(raw, 3).map(|flags| {
                Self::LocalApicNmi(LocalApicNmi {
                    acpi_id: raw[2],
                    flags,
                    lint: raw[5],
                })
            }),
            ENTRY_LAPIC_ADDRESS_OVERRIDE if raw.len() >= 12 => {
                le_u64(raw, 4).map(|address| Self::LocalApicAddressOverride { address })
            }
            ENTRY_LOCAL_X2APIC if raw.len() >= 16 => le_u32(raw, 4)
                .zip(le_u32(raw, 8))
                .zip(le_u32(raw, 12))
                .map(|((apic_id, flags), acpi_id)| {
                    Self::LocalApic(ProcessorApic {
                        acpi_id,
                        apic_id,
                        flags,
                        x2apic: true,
                    })
                }),
            _ => None,
        };
        decoded.unwrap_or(Self::Unknown { entry_type, length })
    }
}

/// Iterator over MADT entries.
pub struct MadtEntries<'a> {
    bytes: &'a [u8],
    offset: usize,
    halt: Option<WalkHalt>,
}

impl<'a> MadtEntries<'a> {
    /// Walk `bytes` (a whole table, header included) from `start`.
    pub fn new(bytes: &'a [u8], start: usize) -> Self {
        Self {
            bytes,
            offset: start,
            halt: None,
        }
    }

    /// Table offset of the next entry, or of the entry that stopped the walk.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn halt(&self) -> Option<WalkHalt> {
        self.halt
    }
}

impl Iterator for MadtEntries<'_> {
    type Item = MadtEntry;

    fn next(&mut self) -> Option<MadtEntry> {
        if self.halt.is_some() || self.offset >= self.bytes.len() {
            return None;
        }

        let header_end = self.offset + ENTRY_HEADER_LEN;
        if header_end > self.bytes.len() {
            self.halt = Some(WalkHalt::Overrun {
                offset: self.offset,
                length: ENTRY_HEADER_LEN,
            });
            return None;
        }

        let entry_type = self.bytes[self.offset];
        let length = self.bytes[self.offset + 1];
        if (length as usize) < ENTRY_HEADER_LEN {
            klog_warn!(
                "ACPI: MADT entry at {:#x} has invalid length {}",
                self.offset,
                length
            );
            self.halt = Some(WalkHalt::ShortEntry {
                offset: self.offset,
                length,
            });
            return None;
        }

        let entry_end = self.offset + length as usize;
        if entry_end > self.bytes.len() {
            klog_warn!(
                "ACPI: MADT entry at {:#x} runs past the table ({} bytes)",
                self.offset,
                length
            );
            self.halt = Some(WalkHalt::Overrun {
                offset: self.offset,
                length: length as usize,
            });
            return None;
        }

        let entry = MadtEntry::decode(entry_type, &self.bytes[self.offset..entry_end]);
        self.offset = entry_end;
        Some(entry)
    }
}

/// Borrowed view of a MADT.
#[derive(Clone, Copy, Debug)]
pub struct Madt<'a> {
    pub local_apic_address: u32,
    pub flags: u32,
    bytes: &'a [u8],
}

impl<'a> Madt<'a> {
    pub fn parse(table: &Table<'a>) -> AcpiResult<Self> {
        let table = table
            .expect_signature(Signature::MADT)?
            .require_len(MADT_ENTRIES_OFFSET)?;
        let bytes = table.bytes();
        Ok(Self {
            local_apic_address: le_u32(bytes, OFF_LAPIC_ADDRESS).unwrap_or(0),
            flags: le_u32(bytes, OFF_FLAGS).unwrap_or(0),
            bytes,
        })
    }

    pub fn entries(&self) -> MadtEntries<'a> {
        MadtEntries::new(self.bytes, MADT_ENTRIES_OFFSET)
    }

    /// Walk every entry into an owned summary. Fails only when a list
    /// cannot grow.
    pub fn topology(&self) -> AcpiResult<InterruptTopology> {
        let mut topology = InterruptTopology {
            local_apic_address: self.local_apic_address as u64,
            pcat_compat: self.flags & MADT_FLAG_PCAT_COMPAT != 0,
            ..InterruptTopology::default()
        };

        let mut entries = self.entries();
        for entry in entries.by_ref() {
            match entry {
                MadtEntry::LocalApic(cpu) => {
                    klog_debug!(
                        "ACPI: CPU APIC id={} acpi_id={} flags={:#x}",
                        cpu.apic_id,
                        cpu.acpi_id,
                        cpu.flags
                    );
                    push_entry(&mut topology.processors, cpu, Signature::MADT)?;
                }
                MadtEntry::IoApic(ioapic) => {
                    klog_debug!(
                        "ACPI: IOAPIC id={} address={:#x} gsi_base={}",
                        ioapic.id,
                        ioapic.address,
                        ioapic.gsi_base
                    );
                    push_entry(&mut topology.io_apics, ioapic, Signature::MADT)?;
                }
                MadtEntry::InterruptOverride(iso) => {
                    klog_debug!(
                        "ACPI: IRQ override bus={} irq={} gsi={} flags={:#x}",
                        iso.bus_source,
                        iso.irq_source,
                        iso.gsi,
                        iso.flags
                    );
                    push_entry(&mut topology.overrides, iso, Signature::MADT)?;
                }
                MadtEntry::NmiSource(nmi) => {
                    push_entry(&mut topology.nmi_sources, nmi, Signature::MADT)?;
                }
                MadtEntry::LocalApicNmi(nmi) => {
                    push_entry(&mut topology.local_nmis, nmi, Signature::MADT)?;
                }
                MadtEntry::LocalApicAddressOverride { address } => {
                    topology.local_apic_address = address;
                }
                MadtEntry::Unknown { entry_type, length } => {
                    klog_debug!("ACPI: MADT entry type {} ({} bytes) skipped", entry_type, length);
                }
            }
        }
        topology.halted = entries.halt();

        klog_info!(
            "ACPI: MADT lapic={:#x} cpus={} ioapics={} overrides={}",
            topology.local_apic_address,
            topology.processors.len(),
            topology.io_apics.len(),
            topology.overrides.len()
        );
        Ok(topology)
    }
}

/// Interrupt routing facts gathered from the MADT.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InterruptTopology {
    /// With any 64-bit address override applied.
    pub local_apic_address: u64,
    pub pcat_compat: bool,
    pub processors: Vec<ProcessorApic>,
    pub io_apics: Vec<IoApicInfo>,
    pub overrides: Vec<InterruptOverride>,
    pub nmi_sources: Vec<NmiSource>,
    pub local_nmis: Vec<LocalApicNmi>,
    /// Set when the entry walk stopped on a malformed entry.
    pub halted: Option<WalkHalt>,
}

impl InterruptTopology {
    /// The IOAPIC that routes legacy lines: GSI base 0, else the first listed.
    pub fn effective_io_apic(&self) -> Option<IoApicInfo> {
        self.io_apics
            .iter()
            .find(|ioapic| ioapic.gsi_base == 0)
            .or_else(|| self.io_apics.first())
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::sdt;

    fn madt_bytes(entries: &[&[u8]]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&0xFEE0_0000u32.to_le_bytes());
        body.extend_from_slice(&MADT_FLAG_PCAT_COMPAT.to_le_bytes());
        for entry in entries {
            body.extend_from_slice(entry);
        }
        sdt(b"APIC", 3, &body)
    }

    const LAPIC0: [u8; 8] = [0, 8, 0, 0, 1, 0, 0, 0];
    const LAPIC1: [u8; 8] = [0, 8, 1, 1, 1, 0, 0, 0];
    const IOAPIC: [u8; 12] = [1, 12, 2, 0, 0x00, 0x00, 0xC0, 0xFE, 0, 0, 0, 0];
    const IOAPIC_HIGH: [u8; 12] = [1, 12, 3, 0, 0x00, 0x10, 0xC0, 0xFE, 24, 0, 0, 0];
    const ISO_TIMER: [u8; 10] = [2, 10, 0, 0, 2, 0, 0, 0, 0, 0];
    const LAPIC_NMI: [u8; 6] = [4, 6, 0xFF, 0x05, 0x00, 1];

    #[test]
    fn entries_decode_in_order() {
        let bytes = madt_bytes(&[&LAPIC0, &IOAPIC, &ISO_TIMER, &LAPIC_NMI]);
        let table = Table::from_bytes(0, &bytes).unwrap();
        let madt = Madt::parse(&table).unwrap();
        let entries: Vec<_> = madt.entries().collect();
        assert_eq!(entries.len(), 4);
        assert_eq!(
            entries[1],
            MadtEntry::IoApic(IoApicInfo {
                id: 2,
                address: 0xFEC0_0000,
                gsi_base: 0
            })
        );
        assert_eq!(
            entries[2],
            MadtEntry::InterruptOverride(InterruptOverride {
                bus_source: 0,
                irq_source: 0,
                gsi: 2,
                flags: 0
            })
        );
        assert_eq!(
            entries[3],
            MadtEntry::LocalApicNmi(LocalApicNmi {
                acpi_id: 0xFF,
                flags: 5,
                lint: 1
            })
        );
    }

    #[test]
    fn zero_length_entry_stops_the_walk_where_it_sits() {
        let broken: [u8; 4] = [0, 0, 0, 0];
        let bytes = madt_bytes(&[&LAPIC0, &broken, &IOAPIC]);
        let table = Table::from_bytes(0, &bytes).unwrap();
        let madt = Madt::parse(&table).unwrap();

        let mut walk = madt.entries();
        assert!(matches!(walk.next(), Some(MadtEntry::LocalApic(_))));
        assert_eq!(walk.next(), None);
        assert_eq!(walk.next(), None);
        assert_eq!(walk.offset(), MADT_ENTRIES_OFFSET + 8);
        assert_eq!(
            walk.halt(),
            Some(WalkHalt::ShortEntry {
                offset: MADT_ENTRIES_OFFSET + 8,
                length: 0
            })
        );
    }

    #[test]
    fn length_one_entry_also_stops_the_walk() {
        let broken: [u8; 2] = [1, 1];
        let bytes = madt_bytes(&[&broken, &IOAPIC]);
        let table = Table::from_bytes(0, &bytes).unwrap();
        let topology = Madt::parse(&table).unwrap().topology().unwrap();
        assert!(topology.io_apics.is_empty());
        assert_eq!(
            topology.halted,
            Some(WalkHalt::ShortEntry {
                offset: MADT_ENTRIES_OFFSET,
                length: 1
            })
        );
    }

    #[test]
    fn entry_overrunning_the_table_stops_the_walk() {
        let overrun: [u8; 4] = [1, 40, 0, 0];
        let bytes = madt_bytes(&[&LAPIC0, &overrun]);
        let table = Table::from_bytes(0, &bytes).unwrap();
        let mut walk = Madt::parse(&table).unwrap().entries();
        assert_eq!(walk.by_ref().count(), 1);
        assert_eq!(
            walk.halt(),
            Some(WalkHalt::Overrun {
                offset: MADT_ENTRIES_OFFSET + 8,
                length: 40
            })
        );
    }

    #[test]
    fn topology_picks_gsi_zero_ioapic_and_applies_override() {
        let mut addr_override = vec![5u8, 12, 0, 0];
        addr_override.extend_from_slice(&0x1_FEE0_0000u64.to_le_bytes());
        let bytes = madt_bytes(&[&LAPIC0, &LAPIC1, &IOAPIC_HIGH, &IOAPIC, &addr_override[..]]);
        let table = Table::from_bytes(0, &bytes).unwrap();
        let topology = Madt::parse(&table).unwrap().topology().unwrap();

        assert_eq!(topology.processors.len(), 2);
        assert!(topology.pcat_compat);
        assert_eq!(topology.local_apic_address, 0x1_FEE0_0000);
        assert_eq!(topology.effective_io_apic().unwrap().id, 2);
        assert_eq!(topology.halted, None);
    }

    #[test]
    fn topology_fills_every_list() {
        let nmi_source: [u8; 8] = [3, 8, 0x0D, 0, 2, 0, 0, 0];
        let bytes = madt_bytes(&[&LAPIC0, &IOAPIC, &ISO_TIMER, &nmi_source, &LAPIC_NMI]);
        let table = Table::from_bytes(0, &bytes).unwrap();
        let topology = Madt::parse(&table).unwrap().topology().unwrap();

        assert_eq!(topology.processors.len(), 1);
        assert_eq!(topology.io_apics.len(), 1);
        assert_eq!(topology.overrides.len(), 1);
        assert_eq!(topology.nmi_sources, [NmiSource { flags: 0x0D, gsi: 2 }]);
        assert_eq!(topology.local_nmis.len(), 1);
        assert_eq!(topology.halted, None);
    }

    #[test]
    fn x2apic_and_truncated_entries() {
        let mut x2 = vec![9u8, 16, 0, 0];
        x2.extend_from_slice(&300u32.to_le_bytes());
        x2.extend_from_slice(&1u32.to_le_bytes());
        x2.extend_from_slice(&7u32.to_le_bytes());
        let short_ioapic: [u8; 6] = [1, 6, 0, 0, 0, 0];
        let bytes = madt_bytes(&[&x2[..], &short_ioapic]);
        let table = Table::from_bytes(0, &bytes).unwrap();
        let entries: Vec<_> = Madt::parse(&table).unwrap().entries().collect();
        assert_eq!(
            entries,
            vec![
                MadtEntry::LocalApic(ProcessorApic {
                    acpi_id: 7,
                    apic_id: 300,
                    flags: 1,
                    x2apic: true
                }),
                MadtEntry::Unknown {
                    entry_type: 1,
                    length: 6
                },
            ]
        );
    }

    #[test]
    fn first_ioapic_is_used_without_gsi_zero() {
        let topology = InterruptTopology {
            io_apics: vec![
                IoApicInfo {
                    id: 4,
                    address: 0xFEC1_0000,
                    gsi_base: 24,
                },
                IoApicInfo {
                    id: 5,
                    address: 0xFEC2_0000,
                    gsi_base: 48,
                },
            ],
            ..InterruptTopology::default()
        };
        assert_eq!(topology.effective_io_apic().unwrap().id, 4);
        assert_eq!(InterruptTopology::default().effective_io_apic(), None);
    }
}
