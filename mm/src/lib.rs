#![cfg_attr(not(test), no_std)]

pub mod error;
pub mod heap;
pub mod kernel_heap;
pub mod memory_init;

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};

pub use error::{MmError, MmResult};
pub use heap::{BLOCK_ALIGN, FreeListHeap, HEADER_SIZE, HEAP_FLOOR, HeapStats};
pub use kernel_heap::{
    init_kernel_heap, kernel_heap_ready, kernel_heap_stats, kfree, kmalloc, kmalloc_aligned,
    krealloc, kzalloc,
};
pub use memory_init::{MemoryMapSummary, ingest_memory_map};

/// `GlobalAlloc` front for the kernel heap. Boot installs it as the
/// `#[global_allocator]`; until the heap is initialised every request fails.
pub struct KernelAllocator;

impl KernelAllocator {
    pub const fn new() -> Self {
        Self
    }
}

impl Default for KernelAllocator {
    fn default() -> Self {
        Self::new()
    }
}

fn into_raw(result: MmResult<NonNull<u8>>) -> *mut u8 {
    result.map_or(ptr::null_mut(), NonNull::as_ptr)
}

unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= BLOCK_ALIGN {
            into_raw(kmalloc(layout.size()))
        } else {
            into_raw(kmalloc_aligned(layout.size(), layout.align()))
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= BLOCK_ALIGN {
            return into_raw(kzalloc(layout.size()));
        }
        let data = into_raw(kmalloc_aligned(layout.size(), layout.align()));
        if !data.is_null() {
            // SAFETY: the block holds at least `layout.size()` bytes.
            unsafe { ptr::write_bytes(data, 0, layout.size()) };
        }
        data
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // A rejected free is already logged by the heap.
        let _ = kfree(ptr);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() <= BLOCK_ALIGN {
            return match krealloc(ptr, new_size) {
                Ok(Some(data)) => data.as_ptr(),
                _ => ptr::null_mut(),
            };
        }

        // Over-aligned blocks are moved by hand so the new one keeps the alignment.
        let fresh = into_raw(kmalloc_aligned(new_size, layout.align()));
        if !fresh.is_null() {
            // SAFETY: both blocks hold at least the smaller of the two sizes.
            unsafe { ptr::copy_nonoverlapping(ptr, fresh, layout.size().min(new_size)) };
            let _ = kfree(ptr);
        }
        fresh
    }
}
