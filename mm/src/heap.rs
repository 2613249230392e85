//! First-fit free-list heap over firmware-reported memory.
//!
//! Every block, free or allocated, sits on one intrusive singly-linked list
//! in the order its memory was handed over. A block is a [`BlockHeader`]
//! immediately followed by its data area:
//!
//! ```text
//! +-------+-----+------+-------+-----------------------+
//! | magic | pad | size | next  | data (size bytes) ... |
//! +-------+-----+------+-------+-----------------------+
//!  <--------- HEADER_SIZE ------->
//! ```
//!
//! Blocks never nest and the data area always ends at or before the next
//! physically following header. The magic word records whether a block is
//! free or handed out, which is what `free` uses to reject double frees.
//!
//! Merging only ever joins a free block with its list successor, and only
//! when the two are physically adjacent; blocks carved from different
//! firmware regions stay separate.

use core::mem;
use core::ptr::{self, NonNull};

use doomos_lib::{align_up_usize, klog_debug, klog_warn};

use crate::error::{MmError, MmResult};

const BLOCK_MAGIC_FREE: u32 = 0x4652_4545;
const BLOCK_MAGIC_USED: u32 = 0x5553_4544;
/// Written over a header that was merged into its predecessor.
const BLOCK_MAGIC_DEAD: u32 = 0;

/// Granule of every block size and block address.
pub const BLOCK_ALIGN: usize = 8;
/// Smallest data area a block may have.
pub const MIN_PAYLOAD: usize = 8;
pub const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();
/// Nothing below 1 MiB becomes heap: real-mode IVT, BIOS data and the EBDA
/// live there, and address 0 is the list terminator.
pub const HEAP_FLOOR: usize = 0x10_0000;

#[repr(C)]
struct BlockHeader {
    magic: u32,
    size: usize,
    next: *mut BlockHeader,
}

impl BlockHeader {
    fn free(size: usize, next: *mut BlockHeader) -> Self {
        Self {
            magic: BLOCK_MAGIC_FREE,
            size,
            next,
        }
    }

    #[inline]
    fn is_free(&self) -> bool {
        self.magic == BLOCK_MAGIC_FREE
    }

    #[inline]
    fn data_start(&self) -> usize {
        self as *const Self as usize + HEADER_SIZE
    }

    #[inline]
    fn data_end(&self) -> usize {
        self.data_start() + self.size
    }

    #[inline]
    fn adjoins(&self, other: *mut BlockHeader) -> bool {
        self.data_end() == other as usize
    }
}

/// Walks the block list. Only yields headers linked by the heap itself.
struct Blocks {
    cursor: *mut BlockHeader,
}

impl Iterator for Blocks {
    type Item = *mut BlockHeader;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.is_null() {
            return None;
        }
        let block = self.cursor;
        // SAFETY: linked headers live in memory handed to `add_region`.
        self.cursor = unsafe { (*block).next };
        Some(block)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Headers plus data areas of every block.
    pub total_bytes: usize,
    pub free_bytes: usize,
    pub used_bytes: usize,
    pub free_blocks: usize,
    pub used_blocks: usize,
    pub largest_free: usize,
    pub allocation_count: u64,
    pub free_count: u64,
}

pub struct FreeListHeap {
    head: *mut BlockHeader,
    tail: *mut BlockHeader,
    bounds: Option<(usize, usize)>,
    allocation_count: u64,
    free_count: u64,
}

// SAFETY: the heap exclusively owns the memory its list points into.
unsafe impl Send for FreeListHeap {}

impl Default for FreeListHeap {
    fn default() -> Self {
        Self::new()
    }
}

fn round_request(size: usize) -> MmResult<usize> {
    size.max(MIN_PAYLOAD)
        .checked_add(BLOCK_ALIGN - 1)
        .map(|padded| padded & !(BLOCK_ALIGN - 1))
        .ok_or(MmError::OutOfMemory { requested: size })
}

/// First address at or after the block's data start that is `align`-aligned
/// and leaves either no prefix or a prefix big enough to be its own block.
fn aligned_slot(block: &BlockHeader, request: usize, align: usize) -> Option<usize> {
    let start = block.data_start();
    let mut slot = align_up_usize(start, align);
    if slot != start {
        while slot - start < HEADER_SIZE + MIN_PAYLOAD {
            slot = slot.checked_add(align)?;
        }
    }
    let end = slot.checked_add(request)?;
    (end <= block.data_end()).then_some(slot)
}

impl FreeListHeap {
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            bounds: None,
            allocation_count: 0,
            free_count: 0,
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        !self.head.is_null()
    }

    /// `[start, end)` of the first region handed to the heap. Informational:
    /// later regions may lie anywhere.
    pub fn bounds(&self) -> Option<(usize, usize)> {
        self.bounds
    }

    fn blocks(&self) -> Blocks {
        Blocks { cursor: self.head }
    }

    /// Turn `[base, base + length)` into one free block appended to the list.
    /// The part below [`HEAP_FLOOR`] is cut off; a region entirely below it
    /// is refused without being touched.
    ///
    /// # Safety
    ///
    /// The range must be writable RAM owned by nobody else for the lifetime
    /// of the heap, and must not overlap a region added earlier.
    pub unsafe fn add_region(&mut self, base: usize, length: usize) -> MmResult {
        let too_small = MmError::RegionTooSmall { base, length };
        let start = align_up_usize(base.max(HEAP_FLOOR), BLOCK_ALIGN);
        let end = base.checked_add(length).ok_or(too_small)? & !(BLOCK_ALIGN - 1);
        if end <= start || end - start < HEADER_SIZE + MIN_PAYLOAD {
            return Err(too_small);
        }

        let block = start as *mut BlockHeader;
        // SAFETY: the caller hands over `[start, end)`; `start` is 8-aligned.
        unsafe { block.write(BlockHeader::free(end - start - HEADER_SIZE, ptr::null_mut())) };

        if self.tail.is_null() {
            self.head = block;
        } else {
            // SAFETY: `tail` is a live header of this heap.
            unsafe { (*self.tail).next = block };
        }
        self.tail = block;

        if self.bounds.is_none() {
            self.bounds = Some((start, end));
        }
        klog_debug!("MM: heap region {:#x}-{:#x} ({} bytes)", start, end, end - start);
        Ok(())
    }

    /// First-fit allocation of at least `size` bytes, rounded up to 8.
    pub fn allocate(&mut self, size: usize) -> MmResult<NonNull<u8>> {
        let request = round_request(size)?;
        // SAFETY: `blocks` only yields live headers.
        let found = self
            .blocks()
            .find(|&block| unsafe { (*block).is_free() && (*block).size >= request });

        match found {
            // SAFETY: `block` is a free header holding at least `request` bytes.
            Some(block) => Ok(unsafe { self.claim(block, request) }),
            None => {
                klog_warn!("MM: out of memory for {} bytes", size);
                Err(MmError::OutOfMemory { requested: size })
            }
        }
    }

    /// Like [`allocate`](Self::allocate), with the data area zero-filled.
    pub fn allocate_zeroed(&mut self, size: usize) -> MmResult<NonNull<u8>> {
        let data = self.allocate(size)?;
        let request = round_request(size)?;
        // SAFETY: the block just claimed holds at least `request` bytes.
        unsafe { ptr::write_bytes(data.as_ptr(), 0, request) };
        Ok(data)
    }

    /// Allocation whose data pointer is a multiple of `align`.
    ///
    /// The bytes in front of the aligned slot always stay behind as their
    /// own free block. When the natural slot would leave a prefix too small
    /// to hold a header and [`MIN_PAYLOAD`], the next aligned slot is used.
    pub fn allocate_aligned(&mut self, size: usize, align: usize) -> MmResult<NonNull<u8>> {
        if !align.is_power_of_two() {
            klog_warn!("MM: rejected alignment {:#x}", align);
            return Err(MmError::InvalidAlignment { align });
        }
        if align <= BLOCK_ALIGN {
            return self.allocate(size);
        }

        let request = round_request(size)?;
        let candidate = self.blocks().find_map(|block| {
            // SAFETY: `blocks` only yields live headers.
            let header = unsafe { &*block };
            if !header.is_free() {
                return None;
            }
            aligned_slot(header, request, align).map(|slot| (block, slot))
        });

        let Some((block, slot)) = candidate else {
            klog_warn!("MM: out of memory for {} bytes aligned to {:#x}", size, align);
            return Err(MmError::OutOfMemory { requested: size });
        };

        // SAFETY: `slot` was checked against this free block's bounds.
        unsafe {
            let target = if slot == (*block).data_start() {
                block
            } else {
                self.split_prefix(block, slot)
            };
            Ok(self.claim(target, request))
        }
    }

    /// Return a block to the heap and coalesce adjacent free neighbours.
    pub fn free(&mut self, data: NonNull<u8>) -> MmResult {
        let block = self
            .live_block(data)
            .inspect_err(|err| klog_warn!("MM: free rejected: {}", err))?;
        // SAFETY: `live_block` only returns headers on the list.
        unsafe { (*block).magic = BLOCK_MAGIC_FREE };
        self.free_count += 1;
        self.coalesce();
        Ok(())
    }

    /// Resize an allocation.
    ///
    /// `None` allocates; a zero size frees and yields `None`. A block that is
    /// already large enough is returned as is, otherwise the contents move
    /// to a fresh block and the old one is freed. On failure the original
    /// allocation is left untouched.
    pub fn reallocate(
        &mut self,
        data: Option<NonNull<u8>>,
        new_size: usize,
    ) -> MmResult<Option<NonNull<u8>>> {
        let Some(data) = data else {
            return self.allocate(new_size).map(Some);
        };
        if new_size == 0 {
            self.free(data)?;
            return Ok(None);
        }

        let block = self.live_block(data)?;
        // SAFETY: `live_block` only returns headers on the list.
        let old_size = unsafe { (*block).size };
        if old_size >= new_size {
            return Ok(Some(data));
        }

        let fresh = self.allocate(new_size)?;
        // SAFETY: distinct live blocks; the old one holds `old_size` bytes.
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), fresh.as_ptr(), old_size) };
        self.free(data)?;
        Ok(Some(fresh))
    }

    /// Size of the data area behind a live allocation.
    pub fn usable_size(&self, data: NonNull<u8>) -> MmResult<usize> {
        let block = self.live_block(data)?;
        // SAFETY: `live_block` only returns headers on the list.
        Ok(unsafe { (*block).size })
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            allocation_count: self.allocation_count,
            free_count: self.free_count,
            ..HeapStats::default()
        };
        for block in self.blocks() {
            // SAFETY: `blocks` only yields live headers.
            let header = unsafe { &*block };
            stats.total_bytes += HEADER_SIZE + header.size;
            if header.is_free() {
                stats.free_bytes += header.size;
                stats.free_blocks += 1;
                stats.largest_free = stats.largest_free.max(header.size);
            } else {
                stats.used_bytes += header.size;
                stats.used_blocks += 1;
            }
        }
        stats
    }

    /// Header behind `data`, provided it is an allocated block of this heap.
    /// The candidate address is only compared, never dereferenced, until it
    /// is found on the list.
    fn live_block(&self, data: NonNull<u8>) -> MmResult<*mut BlockHeader> {
        let address = data.as_ptr() as usize;
        let candidate = address
            .checked_sub(HEADER_SIZE)
            .ok_or(MmError::InvalidPointer { address })?;
        let block = self
            .blocks()
            .find(|&block| block as usize == candidate)
            .ok_or(MmError::InvalidPointer { address })?;
        // SAFETY: found on the list.
        if unsafe { (*block).is_free() } {
            return Err(MmError::DoubleFree { address });
        }
        Ok(block)
    }

    /// Mark `block` allocated, splitting off the tail when more than a
    /// header's worth is left over.
    ///
    /// # Safety
    ///
    /// `block` must be a free header of this heap with `size >= request`.
    unsafe fn claim(&mut self, block: *mut BlockHeader, request: usize) -> NonNull<u8> {
        // SAFETY: guaranteed by the caller.
        let header = unsafe { &mut *block };
        if header.size > request + HEADER_SIZE {
            let rest = (header.data_start() + request) as *mut BlockHeader;
            let rest_size = header.size - request - HEADER_SIZE;
            // SAFETY: `rest` lies inside this block's data area, 8-aligned.
            unsafe { rest.write(BlockHeader::free(rest_size, header.next)) };
            header.size = request;
            header.next = rest;
            if block == self.tail {
                self.tail = rest;
            }
        }
        header.magic = BLOCK_MAGIC_USED;
        self.allocation_count += 1;
        // SAFETY: a header address plus HEADER_SIZE is never null.
        unsafe { NonNull::new_unchecked(header.data_start() as *mut u8) }
    }

    /// Split `block` so that a new free block's data starts at `slot`. The
    /// front part keeps the old header and stays free.
    ///
    /// # Safety
    ///
    /// `block` must be free and `slot` must come from [`aligned_slot`] for it.
    unsafe fn split_prefix(&mut self, block: *mut BlockHeader, slot: usize) -> *mut BlockHeader {
        // SAFETY: guaranteed by the caller.
        let header = unsafe { &mut *block };
        let aligned = (slot - HEADER_SIZE) as *mut BlockHeader;
        // SAFETY: `aligned` lies inside the data area and leaves room for the
        // prefix payload in front of it.
        unsafe { aligned.write(BlockHeader::free(header.data_end() - slot, header.next)) };
        header.size = aligned as usize - header.data_start();
        header.next = aligned;
        if block == self.tail {
            self.tail = aligned;
        }
        aligned
    }

    /// One pass over the list folding each free block's adjacent free
    /// successors into it.
    fn coalesce(&mut self) {
        let mut current = self.head;
        while !current.is_null() {
            // SAFETY: `current` is a live header.
            let header = unsafe { &mut *current };
            let next = header.next;
            if header.is_free() && !next.is_null() && header.adjoins(next) {
                // SAFETY: `next` is the live header that follows.
                let following = unsafe { &mut *next };
                if following.is_free() {
                    header.size += HEADER_SIZE + following.size;
                    header.next = following.next;
                    following.magic = BLOCK_MAGIC_DEAD;
                    if next == self.tail {
                        self.tail = current;
                    }
                    continue;
                }
            }
            current = next;
        }
    }
}
