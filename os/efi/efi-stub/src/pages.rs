//! Constrained page allocation on top of `AllocatePages`.
//!
//! Firmware can only allocate "anywhere", "below" or "exactly at". Alignment
//! and a lowest/highest preference are implemented here by searching the
//! memory map for a suitable conventional region and then asking for that
//! exact address.

use crate::config::EFI_PAGE_SIZE;
use crate::{AllocateType, BootServices, StubError};
use efi_addresses::{EfiPage, PageSize, PhysicalAddress, PhysicalRange};
use efi_memmap::{DescriptorExt, MemoryType};
use log::debug;
use uefi::Status;

/// Number of firmware pages needed for `size` bytes.
#[inline]
#[must_use]
pub fn pages_for(size: u64) -> u64 {
    EfiPage::pages_for(size)
}

/// Allocate `size` bytes at the lowest suitable address, aligned to `align`.
///
/// Address zero is never returned.
///
/// # Errors
/// [`StubError::FirmwareUnavailable`] without a memory map, or
/// [`StubError::AllocationFailed`] if no region fits.
pub fn low_alloc<F: BootServices>(
    fw: &mut F,
    size: u64,
    align: u64,
) -> Result<PhysicalAddress, StubError> {
    let align = align.max(EFI_PAGE_SIZE);
    let pages = pages_for(size);
    let bytes = pages * EFI_PAGE_SIZE;

    let map = fw
        .memory_map()
        .map_err(|_| StubError::FirmwareUnavailable("no memory map"))?;

    let mut candidates = map
        .entries()
        .filter(|d| d.is_conventional() && d.page_count >= pages)
        .filter_map(|d| {
            let region = d.range();
            let mut start = region.base();
            // Never hand out page zero, it looks like a null pointer.
            if start.is_zero() {
                start = PhysicalAddress::new(align);
            }
            let start = start.align_up_to(align)?;
            let end = start.checked_add(bytes)?;
            (end <= region.end()).then_some(start)
        })
        .collect::<alloc::vec::Vec<_>>();
    drop(map);
    candidates.sort_unstable();

    for start in candidates {
        if fw
            .allocate_pages(AllocateType::Address(start), MemoryType::LOADER_DATA, pages)
            .is_ok()
        {
            debug!("low_alloc: {pages} pages at {start}");
            return Ok(start);
        }
    }
    Err(StubError::AllocationFailed {
        pages,
        status: Status::NOT_FOUND,
    })
}

/// Allocate `size` bytes at the highest suitable address, aligned to `align`,
/// such that the allocation ends at or below `max`.
///
/// # Errors
/// [`StubError::FirmwareUnavailable`] without a memory map, or
/// [`StubError::AllocationFailed`] if no region fits.
pub fn high_alloc<F: BootServices>(
    fw: &mut F,
    size: u64,
    align: u64,
    max: PhysicalAddress,
) -> Result<PhysicalAddress, StubError> {
    let align = align.max(EFI_PAGE_SIZE);
    let pages = pages_for(size);
    let bytes = pages * EFI_PAGE_SIZE;

    let map = fw
        .memory_map()
        .map_err(|_| StubError::FirmwareUnavailable("no memory map"))?;

    let mut candidates = map
        .entries()
        .filter(|d| d.is_conventional() && d.page_count >= pages)
        .filter_map(|d| {
            let region = d.range();
            let end = region.end().min(max);
            let start = PhysicalAddress::new(end.as_u64().checked_sub(bytes)?).align_down_to(align);
            (start >= region.base() && !start.is_zero()).then_some(start)
        })
        .collect::<alloc::vec::Vec<_>>();
    drop(map);
    candidates.sort_unstable_by(|a, b| b.cmp(a));

    for start in candidates {
        if fw
            .allocate_pages(AllocateType::Address(start), MemoryType::LOADER_DATA, pages)
            .is_ok()
        {
            debug!("high_alloc: {pages} pages at {start} (max {max})");
            return Ok(start);
        }
    }
    Err(StubError::AllocationFailed {
        pages,
        status: Status::NOT_FOUND,
    })
}

/// Release an allocation made by [`low_alloc`] or [`high_alloc`].
pub fn free<F: BootServices>(fw: &mut F, range: PhysicalRange) {
    if range.is_empty() {
        return;
    }
    let pages = range.page_count::<EfiPage>();
    if let Err(status) = fw.free_pages(range.base().align_down::<EfiPage>(), pages) {
        log::warn!("failed to free {pages} pages at {}: {status:?}", range.base());
    }
}
