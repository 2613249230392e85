//! PCI Express memory-mapped configuration table (`MCFG`).
//!
//! The allocation entries are copied out of firmware memory into an owned
//! vector so the configuration outlives the firmware mapping.

use alloc::vec::Vec;

use doomos_lib::{klog_info, klog_warn};

use crate::error::{AcpiError, AcpiResult};
use crate::memory::{le_u8, le_u16, le_u64};
use crate::tables::{SDT_HEADER_SIZE, Signature, Table};

/// Header plus eight reserved bytes.
pub const MCFG_ENTRIES_OFFSET: usize = SDT_HEADER_SIZE + 8;
pub const MCFG_ENTRY_SIZE: usize = 16;

/// One ECAM window: a segment group and the buses it decodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct McfgEntry {
    pub base_phys: u64,
    pub segment: u16,
    pub bus_start: u8,
    pub bus_end: u8,
}

impl McfgEntry {
    fn decode(raw: &[u8]) -> Option<Self> {
        Some(Self {
            base_phys: le_u64(raw, 0)?,
            segment: le_u16(raw, 8)?,
            bus_start: le_u8(raw, 10)?,
            bus_end: le_u8(raw, 11)?,
        })
    }

    /// 1 MiB of configuration space per bus.
    pub fn region_size(&self) -> u64 {
        let buses = (self.bus_end as u64).saturating_sub(self.bus_start as u64) + 1;
        buses << 20
    }

    /// Offset of a function's 4 KiB configuration page inside this window.
    pub fn ecam_offset(&self, bus: u8, device: u8, function: u8) -> Option<u64> {
        if bus < self.bus_start || bus > self.bus_end || device >= 32 || function >= 8 {
            return None;
        }
        let bus = (bus - self.bus_start) as u64;
        Some((bus << 20) | ((device as u64) << 15) | ((function as u64) << 12))
    }
}

/// Owned copy of the MCFG allocation array.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PciSegments {
    entries: Vec<McfgEntry>,
}

impl PciSegments {
    /// `(length - header - 8) / 16` entries, reserved exactly up front.
    pub fn parse(table: &Table<'_>) -> AcpiResult<Self> {
        let table = table
            .expect_signature(Signature::MCFG)?
            .require_len(MCFG_ENTRIES_OFFSET)?;
        let raw = &table.bytes()[MCFG_ENTRIES_OFFSET..];
        let count = raw.len() / MCFG_ENTRY_SIZE;

        let mut entries = Vec::new();
        if entries.try_reserve_exact(count).is_err() {
            let bytes = count * MCFG_ENTRY_SIZE;
            klog_warn!("ACPI: cannot allocate {} bytes for MCFG entries", bytes);
            return Err(AcpiError::AllocationFailed {
                signature: Signature::MCFG,
                bytes,
            });
        }
        entries.extend(
            raw.chunks_exact(MCFG_ENTRY_SIZE)
                .filter_map(McfgEntry::decode),
        );

        for entry in &entries {
            klog_info!(
                "ACPI: ECAM segment {} buses {}-{} at {:#x}",
                entry.segment,
                entry.bus_start,
                entry.bus_end,
                entry.base_phys
            );
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[McfgEntry] {
        &self.entries
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The window decoding `bus` on `segment`.
    pub fn find(&self, segment: u16, bus: u8) -> Option<&McfgEntry> {
        self.entries
            .iter()
            .find(|e| e.segment == segment && (e.bus_start..=e.bus_end).contains(&bus))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::sdt;

    fn mcfg(entries: &[(u64, u16, u8, u8)]) -> Vec<u8> {
        let mut body = vec![0u8; 8];
        for &(base, segment, start, end) in entries {
            body.extend_from_slice(&base.to_le_bytes());
            body.extend_from_slice(&segment.to_le_bytes());
            body.push(start);
            body.push(end);
            body.extend_from_slice(&[0; 4]);
        }
        sdt(b"MCFG", 1, &body)
    }

    #[test]
    fn entries_are_copied_out() {
        let bytes = mcfg(&[(0xB000_0000, 0, 0, 0xFF), (0xC000_0000, 1, 0, 0x3F)]);
        let segments = {
            let table = Table::from_bytes(0, &bytes).unwrap();
            PciSegments::parse(&table).unwrap()
        };
        drop(bytes);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments.entries()[1].segment, 1);
        let primary = segments.find(0, 3).unwrap();
        assert_eq!(primary.base_phys, 0xB000_0000);
        assert_eq!(primary.region_size(), 256 << 20);
        assert_eq!(primary.ecam_offset(1, 2, 3), Some((1 << 20) | (2 << 15) | (3 << 12)));
        assert_eq!(primary.ecam_offset(1, 32, 0), None);
        assert!(segments.find(1, 0x40).is_none());
    }

    #[test]
    fn trailing_partial_entry_is_ignored() {
        let mut bytes = mcfg(&[(0xB000_0000, 0, 0, 0xFF)]);
        bytes.extend_from_slice(&[0xAA; 7]);
        let length = bytes.len() as u32;
        bytes[4..8].copy_from_slice(&length.to_le_bytes());
        crate::test_fixtures::fix_checksum(&mut bytes);

        let segments = PciSegments::parse(&Table::from_bytes(0, &bytes).unwrap()).unwrap();
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn empty_table_yields_no_segments() {
        let bytes = mcfg(&[]);
        let segments = PciSegments::parse(&Table::from_bytes(0, &bytes).unwrap()).unwrap();
        assert!(segments.is_empty());
    }
}
