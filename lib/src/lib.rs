#![cfg_attr(not(test), no_std)]

#[cfg(any(test, feature = "testing"))]
extern crate alloc;

pub mod alignment;
pub mod cpu;
pub mod init_flag;
pub mod io;
pub mod klog;
pub mod mmio;
pub mod ports;
pub mod spinlock;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[doc(hidden)]
pub use paste;

pub use alignment::{align_down_u64, align_down_usize, align_up_u64, align_up_usize};
pub use alignment::{align_down_usize as align_down, align_up_usize as align_up};
pub use alignment::{is_aligned_u64, is_aligned_usize};
pub use cpu::{CpuOps, NativeCpu};
pub use init_flag::{InitFlag, StateFlag};
pub use io::{Port, PortIo, RawPorts};
pub use klog::{
    KlogLevel, klog_get_level, klog_init, klog_is_enabled, klog_register_backend, klog_set_level,
};
pub use mmio::{IdentityMapper, Mmio, MmioMapper, MmioRegion};
pub use ports::COM1;
pub use spinlock::{IrqMutex, IrqMutexGuard};
