use alloc::vec::Vec;
use core::fmt;

use doomos_lib::{klog_debug, klog_warn};

use crate::error::{AcpiError, AcpiResult};
use crate::memory::{PhysMemory, le_u8, le_u32, le_u64};

pub const SDT_HEADER_SIZE: usize = 36;

/// Four ASCII characters naming a table. Compared byte for byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; 4]);

impl Signature {
    pub const RSDT: Self = Self(*b"RSDT");
    pub const XSDT: Self = Self(*b"XSDT");
    pub const FADT: Self = Self(*b"FACP");
    pub const MADT: Self = Self(*b"APIC");
    pub const HPET: Self = Self(*b"HPET");
    pub const MCFG: Self = Self(*b"MCFG");
    pub const SSDT: Self = Self(*b"SSDT");
    pub const DSDT: Self = Self(*b"DSDT");
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &byte in &self.0 {
            let c = if byte.is_ascii_graphic() { byte as char } else { '?' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

/// The 36-byte header in front of every system description table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SdtHeader {
    pub signature: Signature,
    pub length: u32,
    pub revision: u8,
    pub checksum: u8,
    pub oem_id: [u8; 6],
    pub oem_table_id: [u8; 8],
    pub oem_revision: u32,
    pub creator_id: u32,
    pub creator_revision: u32,
}

impl SdtHeader {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let raw = bytes.get(..SDT_HEADER_SIZE)?;
        let mut signature = [0u8; 4];
        signature.copy_from_slice(&raw[0..4]);
        let mut oem_id = [0u8; 6];
        oem_id.copy_from_slice(&raw[10..16]);
        let mut oem_table_id = [0u8; 8];
        oem_table_id.copy_from_slice(&raw[16..24]);
        Some(Self {
            signature: Signature(signature),
            length: le_u32(raw, 4)?,
            revision: raw[8],
            checksum: raw[9],
            oem_id,
            oem_table_id,
            oem_revision: le_u32(raw, 24)?,
            creator_id: le_u32(raw, 28)?,
            creator_revision: le_u32(raw, 32)?,
        })
    }
}

/// Byte sum of a whole table; valid tables sum to zero.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// One table, borrowed from firmware memory for its full declared length.
#[derive(Clone, Copy, Debug)]
pub struct Table<'a> {
    pub phys: u64,
    pub header: SdtHeader,
    bytes: &'a [u8],
}

impl<'a> Table<'a> {
    /// Wrap an in-memory table image.
    pub fn from_bytes(phys: u64, bytes: &'a [u8]) -> AcpiResult<Self> {
        let header = SdtHeader::parse(bytes).ok_or(AcpiError::Unmapped {
            address: phys,
            length: SDT_HEADER_SIZE,
        })?;
        let length = header.length as usize;
        if length < SDT_HEADER_SIZE || length > bytes.len() {
            return Err(AcpiError::TableTooShort {
                signature: header.signature,
                length: header.length,
            });
        }
        Ok(Self {
            phys,
            header,
            bytes: &bytes[..length],
        })
    }

    #[inline]
    pub fn signature(&self) -> Signature {
        self.header.signature
    }

    /// Header plus body.
    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Everything after the 36-byte header.
    #[inline]
    pub fn body(&self) -> &'a [u8] {
        &self.bytes[SDT_HEADER_SIZE..]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn checksum_ok(&self) -> bool {
        checksum(self.bytes) == 0
    }

    pub fn expect_signature(self, expected: Signature) -> AcpiResult<Self> {
        if self.signature() != expected {
            return Err(AcpiError::BadSignature {
                expected,
                found: self.signature(),
            });
        }
        Ok(self)
    }

    /// Fail with `TableTooShort` unless the table is at least `min` bytes.
    pub fn require_len(self, min: usize) -> AcpiResult<Self> {
        if self.len() < min {
            return Err(AcpiError::TableTooShort {
                signature: self.signature(),
                length: self.header.length,
            });
        }
        Ok(self)
    }

    /// Copy the body into a heap buffer owned by the caller.
    pub fn copy_body(&self) -> AcpiResult<Vec<u8>> {
        let body = self.body();
        let mut copy = Vec::new();
        copy.try_reserve_exact(body.len())
            .map_err(|_| AcpiError::AllocationFailed {
                signature: self.signature(),
                bytes: body.len(),
            })?;
        copy.extend_from_slice(body);
        Ok(copy)
    }
}

/// Make room for `additional` more entries of a `signature` table without
/// aborting when the heap is exhausted.
pub(crate) fn reserve_entries<T>(
    list: &mut Vec<T>,
    additional: usize,
    signature: Signature,
) -> AcpiResult {
    list.try_reserve(additional).map_err(|_| {
        let bytes = additional.saturating_mul(size_of::<T>());
        klog_warn!("ACPI: cannot allocate {} bytes for {} entries", bytes, signature);
        AcpiError::AllocationFailed { signature, bytes }
    })
}

pub(crate) fn push_entry<T>(list: &mut Vec<T>, item: T, signature: Signature) -> AcpiResult {
    reserve_entries(list, 1, signature)?;
    list.push(item);
    Ok(())
}

/// Read the header at `phys`, then borrow the table for its declared length.
pub fn load_table<M: PhysMemory>(mem: &M, phys: u64) -> AcpiResult<Table<'_>> {
    let head = mem.bytes(phys, SDT_HEADER_SIZE).ok_or(AcpiError::Unmapped {
        address: phys,
        length: SDT_HEADER_SIZE,
    })?;
    let header = SdtHeader::parse(head).ok_or(AcpiError::Unmapped {
        address: phys,
        length: SDT_HEADER_SIZE,
    })?;
    let length = header.length as usize;
    if length < SDT_HEADER_SIZE {
        return Err(AcpiError::TableTooShort {
            signature: header.signature,
            length: header.length,
        });
    }
    let bytes = mem.bytes(phys, length).ok_or(AcpiError::Unmapped {
        address: phys,
        length,
    })?;
    Table::from_bytes(phys, bytes)
}

/// Generic Address Structure: where a register lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GenericAddress {
    pub address_space: u8,
    pub bit_width: u8,
    pub bit_offset: u8,
    pub access_size: u8,
    pub address: u64,
}

impl GenericAddress {
    pub const SIZE: usize = 12;
    pub const SPACE_MEMORY: u8 = 0;
    pub const SPACE_IO: u8 = 1;

    pub fn parse(bytes: &[u8], offset: usize) -> Option<Self> {
        Some(Self {
            address_space: le_u8(bytes, offset)?,
            bit_width: le_u8(bytes, offset + 1)?,
            bit_offset: le_u8(bytes, offset + 2)?,
            access_size: le_u8(bytes, offset + 3)?,
            address: le_u64(bytes, offset + 4)?,
        })
    }

    #[inline]
    pub fn is_memory(&self) -> bool {
        self.address_space == Self::SPACE_MEMORY
    }

    #[inline]
    pub fn is_io(&self) -> bool {
        self.address_space == Self::SPACE_IO
    }
}

/// RSDT (32-bit entries) or XSDT (64-bit entries).
#[derive(Clone, Copy, Debug)]
pub struct RootTable<'a> {
    table: Table<'a>,
    entry_width: usize,
}

impl<'a> RootTable<'a> {
    /// Accept the table only if it is an RSDT or XSDT. No entry is read
    /// from a table that fails this check.
    pub fn from_table(table: Table<'a>) -> AcpiResult<Self> {
        let entry_width = match table.signature() {
            Signature::RSDT => 4,
            Signature::XSDT => 8,
            found => {
                return Err(AcpiError::BadSignature {
                    expected: Signature::RSDT,
                    found,
                });
            }
        };
        Ok(Self { table, entry_width })
    }

    #[inline]
    pub fn table(&self) -> &Table<'a> {
        &self.table
    }

    #[inline]
    pub fn entry_width(&self) -> usize {
        self.entry_width
    }

    /// `(length - header) / pointer width`.
    #[inline]
    pub fn entry_count(&self) -> usize {
        self.table.body().len() / self.entry_width
    }

    /// Physical addresses of the child tables.
    pub fn entries(&self) -> impl Iterator<Item = u64> + 'a {
        let body = self.table.body();
        let width = self.entry_width;
        (0..self.entry_count()).filter_map(move |i| match width {
            8 => le_u64(body, i * 8),
            _ => le_u32(body, i * 4).map(u64::from),
        })
    }
}

/// Locate the root table in the ACPI-reclaimable region handed over by the
/// memory map. It sits at the region base.
pub fn find_root_table<M: PhysMemory>(mem: &M, base: u64, length: u64) -> AcpiResult<u64> {
    if length < SDT_HEADER_SIZE as u64 {
        return Err(AcpiError::Unmapped {
            address: base,
            length: SDT_HEADER_SIZE,
        });
    }
    let head = mem.bytes(base, 4).ok_or(AcpiError::Unmapped {
        address: base,
        length: 4,
    })?;
    let found = Signature([head[0], head[1], head[2], head[3]]);
    if found != Signature::RSDT && found != Signature::XSDT {
        return Err(AcpiError::BadSignature {
            expected: Signature::RSDT,
            found,
        });
    }
    klog_debug!("ACPI: {} at {:#x}", found, base);
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{FirmwareImage, sdt};

    #[test]
    fn header_fields_decode() {
        let bytes = sdt(b"HPET", 1, &[0u8; 20]);
        let header = SdtHeader::parse(&bytes).unwrap();
        assert_eq!(header.signature, Signature::HPET);
        assert_eq!(header.length, 56);
        assert_eq!(header.revision, 1);
        assert_eq!(&header.oem_id, b"DOOMOS");
        assert_eq!(checksum(&bytes), 0);
    }

    #[test]
    fn load_table_borrows_declared_length() {
        let mut image = FirmwareImage::new();
        image.place(0x1000, sdt(b"SSDT", 2, &[1, 2, 3, 4]));
        let table = load_table(&image, 0x1000).unwrap();
        assert_eq!(table.signature(), Signature::SSDT);
        assert_eq!(table.body(), &[1, 2, 3, 4]);
        assert!(table.checksum_ok());
        assert!(matches!(
            load_table(&image, 0x9000),
            Err(AcpiError::Unmapped { address: 0x9000, .. })
        ));
    }

    #[test]
    fn declared_length_below_header_is_rejected() {
        let mut bytes = sdt(b"APIC", 1, &[]);
        bytes[4..8].copy_from_slice(&10u32.to_le_bytes());
        let mut image = FirmwareImage::new();
        image.place(0x2000, bytes);
        assert_eq!(
            load_table(&image, 0x2000).unwrap_err(),
            AcpiError::TableTooShort {
                signature: Signature::MADT,
                length: 10
            }
        );
    }

    #[test]
    fn root_table_entry_widths() {
        let rsdt = sdt(b"RSDT", 1, &[0x00, 0x10, 0, 0, 0x00, 0x20, 0, 0]);
        let table = Table::from_bytes(0x100, &rsdt).unwrap();
        let root = RootTable::from_table(table).unwrap();
        assert_eq!(root.entry_count(), 2);
        assert_eq!(root.entries().collect::<Vec<_>>(), vec![0x1000, 0x2000]);

        let mut body = Vec::new();
        body.extend_from_slice(&0x1_0000_0000u64.to_le_bytes());
        let xsdt = sdt(b"XSDT", 1, &body);
        let root = RootTable::from_table(Table::from_bytes(0x100, &xsdt).unwrap()).unwrap();
        assert_eq!(root.entries().collect::<Vec<_>>(), vec![0x1_0000_0000]);
    }

    #[test]
    fn root_table_rejects_foreign_signature() {
        let bogus = sdt(b"FACP", 1, &[0xFF; 8]);
        let table = Table::from_bytes(0x100, &bogus).unwrap();
        assert_eq!(
            RootTable::from_table(table).unwrap_err(),
            AcpiError::BadSignature {
                expected: Signature::RSDT,
                found: Signature::FADT
            }
        );
    }

    #[test]
    fn root_lookup_checks_region_base() {
        let mut image = FirmwareImage::new();
        image.place(0x7FE_0000, sdt(b"RSDT", 1, &[]));
        image.place(0x7FF_0000, sdt(b"JUNK", 1, &[]));
        assert_eq!(find_root_table(&image, 0x7FE_0000, 0x1_0000), Ok(0x7FE_0000));
        assert!(matches!(
            find_root_table(&image, 0x7FF_0000, 0x1_0000),
            Err(AcpiError::BadSignature { .. })
        ));
        assert!(find_root_table(&image, 0x7FE_0000, 8).is_err());
    }

    #[test]
    fn entry_growth_failure_is_reported_not_fatal() {
        let mut list: Vec<u32> = vec![7];
        assert_eq!(
            reserve_entries(&mut list, usize::MAX, Signature::MADT),
            Err(AcpiError::AllocationFailed {
                signature: Signature::MADT,
                bytes: usize::MAX
            })
        );
        assert_eq!(list, [7]);

        assert_eq!(push_entry(&mut list, 8, Signature::MADT), Ok(()));
        assert_eq!(list, [7, 8]);
    }

    #[test]
    fn generic_address_decodes() {
        let bytes = [1u8, 8, 0, 1, 0xF9, 0x0C, 0, 0, 0, 0, 0, 0];
        let gas = GenericAddress::parse(&bytes, 0).unwrap();
        assert!(gas.is_io());
        assert_eq!(gas.address, 0xCF9);
        assert_eq!(gas.bit_width, 8);
    }
}
