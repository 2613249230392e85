//! Firmware memory map as handed over by the boot loader.

/// Region type tag of a memory-map entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionKind {
    Available,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    BadMemory,
    Unknown(u32),
}

impl RegionKind {
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Available,
            2 => Self::Reserved,
            3 => Self::AcpiReclaimable,
            4 => Self::AcpiNvs,
            5 => Self::BadMemory,
            other => Self::Unknown(other),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::AcpiReclaimable => "acpi-reclaimable",
            Self::AcpiNvs => "acpi-nvs",
            Self::BadMemory => "bad",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// One raw memory-map entry: 64-bit base, 64-bit length, 32-bit type tag.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryMapEntry {
    pub base: u64,
    pub length: u64,
    pub kind: u32,
    pub reserved: u32,
}

impl MemoryMapEntry {
    pub const fn new(base: u64, length: u64, kind: u32) -> Self {
        Self {
            base,
            length,
            kind,
            reserved: 0,
        }
    }

    #[inline]
    pub const fn region_kind(&self) -> RegionKind {
        RegionKind::from_raw(self.kind)
    }

    #[inline]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.length)
    }
}

/// Physical span `[start, end)` occupied by the loaded kernel image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelImage {
    pub start: u64,
    pub end: u64,
}

impl KernelImage {
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    #[inline]
    pub const fn overlaps(&self, base: u64, end: u64) -> bool {
        base < self.end && end > self.start
    }
}
