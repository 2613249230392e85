use doomos_abi::{KernelImage, MemoryMapEntry, RegionKind};
use doomos_lib::{klog_debug, klog_info};

use crate::heap::FreeListHeap;

/// What the memory map yielded after ingestion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryMapSummary {
    pub entries_seen: usize,
    pub regions_ingested: usize,
    pub bytes_ingested: u64,
    pub available_bytes: u64,
    /// `[start, end)` of the first region handed to the heap.
    pub heap_bounds: Option<(usize, usize)>,
    /// `(base, length)` of the first ACPI-reclaimable entry.
    pub acpi_region: Option<(u64, u64)>,
}

/// Parts of `[base, end)` that do not overlap the kernel image.
fn usable_spans(base: u64, end: u64, kernel: KernelImage) -> [Option<(u64, u64)>; 2] {
    if !kernel.overlaps(base, end) {
        return [Some((base, end)), None];
    }
    let below = (base < kernel.start).then_some((base, kernel.start));
    let above = (end > kernel.end).then_some((kernel.end, end));
    [below, above]
}

/// Feed every available memory-map entry into `heap`, carving out the
/// kernel image, and locate the ACPI-reclaimable region.
///
/// # Safety
///
/// Every available entry must describe RAM that is identity-mapped, unused
/// apart from the kernel image, and handed to the heap for good.
pub unsafe fn ingest_memory_map(
    heap: &mut FreeListHeap,
    entries: &[MemoryMapEntry],
    kernel: KernelImage,
) -> MemoryMapSummary {
    let mut summary = MemoryMapSummary {
        entries_seen: entries.len(),
        ..MemoryMapSummary::default()
    };

    for entry in entries {
        match entry.region_kind() {
            RegionKind::Available => {
                summary.available_bytes += entry.length;
                for (start, end) in usable_spans(entry.base, entry.end(), kernel)
                    .into_iter()
                    .flatten()
                {
                    let length = (end - start) as usize;
                    // SAFETY: forwarded from the caller; the span avoids the
                    // kernel image.
                    match unsafe { heap.add_region(start as usize, length) } {
                        Ok(()) => {
                            summary.regions_ingested += 1;
                            summary.bytes_ingested += end - start;
                        }
                        Err(err) => klog_debug!("MM: skipping span: {}", err),
                    }
                }
            }
            RegionKind::AcpiReclaimable if summary.acpi_region.is_none() => {
                summary.acpi_region = Some((entry.base, entry.length));
            }
            kind => {
                klog_debug!(
                    "MM: ignoring {} region {:#x}+{:#x}",
                    kind.as_str(),
                    entry.base,
                    entry.length
                );
            }
        }
    }

    summary.heap_bounds = heap.bounds();
    klog_info!(
        "MM: {} regions, {} KiB on the heap ({} KiB reported available)",
        summary.regions_ingested,
        summary.bytes_ingested / 1024,
        summary.available_bytes / 1024
    );
    summary
}
