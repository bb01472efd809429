use crate::{AllocateType, BootServices, StubError, pages};
use efi_addresses::{PhysicalAddress, PhysicalRange};
use efi_memmap::MemoryType;
use log::{info, warn};

/// Where an object may be placed, relative to the base of RAM.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Constraints {
    pub region_base: PhysicalAddress,
    /// Address to try first.
    pub preferred: Option<PhysicalAddress>,
    pub align: u64,
    pub min_offset: u64,
    pub max_offset: u64,
}

impl Constraints {
    /// Whether `addr` satisfies alignment and `min ≤ addr − base ≤ max`.
    #[must_use]
    pub fn admits(&self, addr: PhysicalAddress) -> bool {
        if !addr.is_aligned_to(self.align) {
            return false;
        }
        addr.offset_from(self.region_base)
            .is_some_and(|off| off >= self.min_offset && off <= self.max_offset)
    }
}

/// Outcome of placing one relocatable object.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RelocationRecord {
    pub align: u64,
    pub min_offset: u64,
    pub max_offset: u64,
    pub address: PhysicalAddress,
    /// Bytes reserved at `address`, including the zeroed tail.
    pub size: u64,
    /// Whether pages were allocated (and must be released on failure).
    pub allocated: bool,
}

impl RelocationRecord {
    #[must_use]
    pub const fn range(&self) -> PhysicalRange {
        PhysicalRange::new(self.address, self.size)
    }
}

/// Place an image of `image_size` bytes, currently at `current`, so that it
/// satisfies `constraints`, reserving `mem_size` bytes (file plus BSS).
///
/// If the current address already qualifies nothing is moved. Otherwise the
/// preferred address is tried first, then the lowest fitting address. The
/// image is copied and the tail beyond `image_size` is zeroed.
///
/// # Errors
/// - [`StubError::AllocationFailed`] if no memory could be allocated at all.
/// - [`StubError::RelocationOutOfRange`] if the only memory available is
///   outside the allowed window. The allocation is released first.
pub fn relocate<F: BootServices>(
    fw: &mut F,
    current: PhysicalAddress,
    image_size: u64,
    mem_size: u64,
    constraints: &Constraints,
) -> Result<RelocationRecord, StubError> {
    let record = |address, allocated| RelocationRecord {
        align: constraints.align,
        min_offset: constraints.min_offset,
        max_offset: constraints.max_offset,
        address,
        size: mem_size,
        allocated,
    };

    let in_place = constraints.admits(current)
        && constraints.preferred.is_none_or(|preferred| preferred == current);
    if in_place {
        return Ok(record(current, false));
    }

    let page_count = pages::pages_for(mem_size);
    let address = match constraints.preferred.map(|preferred| {
        fw.allocate_pages(
            AllocateType::Address(preferred),
            MemoryType::LOADER_DATA,
            page_count,
        )
    }) {
        Some(Ok(address)) => address,
        _ => pages::low_alloc(fw, mem_size, constraints.align)?,
    };

    let placed = record(address, true);
    if !constraints.admits(address) {
        warn!(
            "no low memory: {address} is outside [{:#x}, {:#x}] from {}",
            constraints.min_offset, constraints.max_offset, constraints.region_base
        );
        pages::free(fw, placed.range());
        return Err(StubError::RelocationOutOfRange {
            what: "image",
            address: address.as_u64(),
        });
    }

    if let Err(status) = fw.copy_mem(address, current, image_size) {
        pages::free(fw, placed.range());
        return Err(StubError::Firmware {
            what: "copying the image",
            status,
        });
    }
    if mem_size > image_size {
        let tail = PhysicalRange::new(address + image_size, mem_size - image_size);
        match fw.memory_mut(tail) {
            Some(bss) => bss.fill(0),
            None => {
                pages::free(fw, placed.range());
                return Err(StubError::FirmwareUnavailable("allocated memory not accessible"));
            }
        }
    }

    info!("Relocated image from {current} to {address}");
    Ok(placed)
}
