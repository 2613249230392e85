use core::fmt;

use crate::tables::Signature;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcpiError {
    BadSignature { expected: Signature, found: Signature },
    /// The physical range could not be made readable.
    Unmapped { address: u64, length: usize },
    TableTooShort { signature: Signature, length: u32 },
    ChecksumMismatch { signature: Signature },
    AllocationFailed { signature: Signature, bytes: usize },
    /// SCI_EN never came up after writing ACPI_ENABLE.
    EnableTimeout { polls: u32 },
}

impl fmt::Display for AcpiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadSignature { expected, found } => {
                write!(f, "expected {} table, found {}", expected, found)
            }
            Self::Unmapped { address, length } => {
                write!(f, "cannot read {} bytes at {:#x}", length, address)
            }
            Self::TableTooShort { signature, length } => {
                write!(f, "{} table too short ({} bytes)", signature, length)
            }
            Self::ChecksumMismatch { signature } => {
                write!(f, "{} table checksum mismatch", signature)
            }
            Self::AllocationFailed { signature, bytes } => {
                write!(f, "cannot allocate {} bytes for {} copy", bytes, signature)
            }
            Self::EnableTimeout { polls } => {
                write!(f, "SCI_EN still clear after {} polls", polls)
            }
        }
    }
}

pub type AcpiResult<T = ()> = Result<T, AcpiError>;
