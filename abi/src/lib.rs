//! DoomOS hardware and firmware ABI definitions.
//!
//! Bit-exact layouts and register numbers shared by the allocator, the ACPI
//! parser and the interrupt/timer drivers. Nothing in here touches hardware;
//! the instruction wrappers live in `doomos-lib`.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod arch;
pub mod boot;
pub mod frame;
pub mod memmap;

pub use boot::BootDevice;
pub use frame::InterruptFrame;
pub use memmap::{KernelImage, MemoryMapEntry, RegionKind};
