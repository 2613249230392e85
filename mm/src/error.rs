//! Error type for the physical memory allocator.
//!
//! Every fallible heap operation returns an [`MmResult`]; there is no
//! in-band failure pointer.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    /// No free block can hold `requested` bytes.
    OutOfMemory { requested: usize },
    /// Alignment is zero or not a power of two.
    InvalidAlignment { align: usize },
    /// The address is not the data pointer of a live block of this heap.
    InvalidPointer { address: usize },
    /// The block behind the address is already free.
    DoubleFree { address: usize },
    /// The region cannot host a block header plus the minimum payload.
    RegionTooSmall { base: usize, length: usize },
}

impl fmt::Display for MmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested } => {
                write!(f, "out of memory for {} bytes", requested)
            }
            Self::InvalidAlignment { align } => {
                write!(f, "alignment {:#x} is not a power of two", align)
            }
            Self::InvalidPointer { address } => {
                write!(f, "address {:#x} is not a live heap block", address)
            }
            Self::DoubleFree { address } => {
                write!(f, "block at {:#x} is already free", address)
            }
            Self::RegionTooSmall { base, length } => {
                write!(f, "region {:#x}+{:#x} too small for a block", base, length)
            }
        }
    }
}

/// Convenience result type for memory management operations.
pub type MmResult<T = ()> = Result<T, MmError>;
