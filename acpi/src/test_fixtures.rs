//! Synthetic firmware images for the parser tests.

use std::collections::BTreeMap;
use std::vec::Vec;

use crate::memory::PhysMemory;
use crate::tables::{SDT_HEADER_SIZE, checksum};

/// Sparse physical memory made of placed byte blobs.
#[derive(Default)]
pub struct FirmwareImage {
    blobs: BTreeMap<u64, Vec<u8>>,
}

impl FirmwareImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn place(&mut self, phys: u64, bytes: Vec<u8>) {
        self.blobs.insert(phys, bytes);
    }
}

impl PhysMemory for FirmwareImage {
    fn bytes(&self, phys: u64, len: usize) -> Option<&[u8]> {
        let (&start, blob) = self.blobs.range(..=phys).next_back()?;
        let offset = (phys - start) as usize;
        blob.get(offset..offset.checked_add(len)?)
    }
}

/// A complete table: header with a fixed-up checksum, then `body`.
pub fn sdt(signature: &[u8; 4], revision: u8, body: &[u8]) -> Vec<u8> {
    let length = (SDT_HEADER_SIZE + body.len()) as u32;
    let mut bytes = Vec::with_capacity(length as usize);
    bytes.extend_from_slice(signature);
    bytes.extend_from_slice(&length.to_le_bytes());
    bytes.push(revision);
    bytes.push(0);
    bytes.extend_from_slice(b"DOOMOS");
    bytes.extend_from_slice(b"FIXTURE ");
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.extend_from_slice(b"DOOM");
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.extend_from_slice(body);
    fix_checksum(&mut bytes);
    bytes
}

pub fn fix_checksum(bytes: &mut [u8]) {
    bytes[9] = 0;
    bytes[9] = 0u8.wrapping_sub(checksum(bytes));
}

/// RSDT whose entries point at `tables`.
pub fn rsdt(tables: &[u64]) -> Vec<u8> {
    let body: Vec<u8> = tables
        .iter()
        .flat_map(|&phys| (phys as u32).to_le_bytes())
        .collect();
    sdt(b"RSDT", 1, &body)
}

/// Little-endian writer for table bodies with fixed field offsets.
pub struct Body {
    bytes: Vec<u8>,
}

impl Body {
    /// Zeroed body whose table (header included) will be `table_len` bytes.
    pub fn for_table(table_len: usize) -> Self {
        Self {
            bytes: vec![0; table_len - SDT_HEADER_SIZE],
        }
    }

    /// Offsets are table offsets, header included.
    pub fn u8(mut self, offset: usize, value: u8) -> Self {
        self.bytes[offset - SDT_HEADER_SIZE] = value;
        self
    }

    pub fn u16(mut self, offset: usize, value: u16) -> Self {
        let at = offset - SDT_HEADER_SIZE;
        self.bytes[at..at + 2].copy_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u32(mut self, offset: usize, value: u32) -> Self {
        let at = offset - SDT_HEADER_SIZE;
        self.bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u64(mut self, offset: usize, value: u64) -> Self {
        let at = offset - SDT_HEADER_SIZE;
        self.bytes[at..at + 8].copy_from_slice(&value.to_le_bytes());
        self
    }

    pub fn into_table(self, signature: &[u8; 4], revision: u8) -> Vec<u8> {
        sdt(signature, revision, &self.bytes)
    }
}

/// FADT used across tests: SCI 9, SMI port 0xB2, enable 0xF1, PM1a at
/// 0x604, reset register 0xCF9 (I/O) with value 6, DSDT at `dsdt`.
pub fn fadt(dsdt: u32) -> Vec<u8> {
    Body::for_table(148)
        .u32(36, 0x7FE_1000)
        .u32(40, dsdt)
        .u16(46, 9)
        .u32(48, 0xB2)
        .u8(52, 0xF1)
        .u8(53, 0xF0)
        .u32(56, 0x600)
        .u32(64, 0x604)
        .u32(76, 0x608)
        .u32(80, 0x620)
        .u32(112, 1 << 10)
        .u8(116, 1)
        .u8(117, 8)
        .u64(120, 0xCF9)
        .u8(128, 6)
        .into_table(b"FACP", 4)
}

/// `Name (_S5_, Package (0x04) { 0x05, 0x07, 0x00, 0x00 })`.
pub const S5_PACKAGE: [u8; 13] = [
    0x08, b'_', b'S', b'5', b'_', 0x12, 0x0A, 0x04, 0x0A, 0x05, 0x0A, 0x07, 0x00,
];

/// DSDT whose body holds some filler AML and then `aml`.
pub fn dsdt(aml: &[u8]) -> Vec<u8> {
    let mut body = vec![0x10, 0x49, 0x04, b'\\', b'_', b'S', b'B', b'_'];
    body.extend_from_slice(aml);
    sdt(b"DSDT", 2, &body)
}
