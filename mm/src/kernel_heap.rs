//! The kernel's one heap instance.
//!
//! All entry points lock [`KERNEL_HEAP`], which masks interrupts for the
//! duration, so interrupt handlers may allocate. None of this may run in a
//! host test: taking the lock executes `cli`.

use core::ptr::NonNull;

use doomos_abi::{KernelImage, MemoryMapEntry};
use doomos_lib::{InitFlag, IrqMutex, klog_info};

use crate::error::MmResult;
use crate::heap::{FreeListHeap, HeapStats};
use crate::memory_init::{MemoryMapSummary, ingest_memory_map};

static KERNEL_HEAP: IrqMutex<FreeListHeap> = IrqMutex::new(FreeListHeap::new());
static KERNEL_HEAP_INIT: InitFlag = InitFlag::new();

/// Build the kernel heap from the firmware memory map.
///
/// # Safety
///
/// See [`ingest_memory_map`]. Must be called once, before any allocation.
pub unsafe fn init_kernel_heap(
    entries: &[MemoryMapEntry],
    kernel: KernelImage,
) -> MemoryMapSummary {
    let mut heap = KERNEL_HEAP.lock();
    // SAFETY: forwarded from the caller.
    let summary = unsafe { ingest_memory_map(&mut heap, entries, kernel) };
    if heap.is_initialized() {
        KERNEL_HEAP_INIT.mark_set();
        let stats = heap.stats();
        klog_info!(
            "MM: kernel heap ready, {} KiB free in {} blocks",
            stats.free_bytes / 1024,
            stats.free_blocks
        );
    }
    summary
}

#[inline]
pub fn kernel_heap_ready() -> bool {
    KERNEL_HEAP_INIT.is_set()
}

pub fn kmalloc(size: usize) -> MmResult<NonNull<u8>> {
    KERNEL_HEAP.lock().allocate(size)
}

pub fn kzalloc(size: usize) -> MmResult<NonNull<u8>> {
    KERNEL_HEAP.lock().allocate_zeroed(size)
}

pub fn kmalloc_aligned(size: usize, align: usize) -> MmResult<NonNull<u8>> {
    KERNEL_HEAP.lock().allocate_aligned(size, align)
}

/// Null is accepted and ignored.
pub fn kfree(ptr: *mut u8) -> MmResult {
    match NonNull::new(ptr) {
        Some(data) => KERNEL_HEAP.lock().free(data),
        None => Ok(()),
    }
}

pub fn krealloc(ptr: *mut u8, new_size: usize) -> MmResult<Option<NonNull<u8>>> {
    KERNEL_HEAP.lock().reallocate(NonNull::new(ptr), new_size)
}

pub fn kernel_heap_stats() -> HeapStats {
    KERNEL_HEAP.lock().stats()
}
