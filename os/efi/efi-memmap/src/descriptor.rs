#![allow(unsafe_code)]

use efi_addresses::{EfiPage, PageSize, PhysicalAddress, PhysicalRange, VirtualAddress};
use uefi::mem::memory_map::{MemoryAttribute, MemoryDescriptor, MemoryType};

/// Bytes of a version 1 descriptor. Reported strides are at least this long;
/// anything past it in a record is opaque.
pub const DESCRIPTOR_SIZE: usize = size_of::<MemoryDescriptor>();

/// Decode the descriptor at the start of `bytes`.
///
/// `bytes` may sit at any alignment, e.g. inside a blob property.
#[must_use]
pub fn read_descriptor(bytes: &[u8]) -> Option<MemoryDescriptor> {
    if bytes.len() < DESCRIPTOR_SIZE {
        return None;
    }
    // SAFETY: the length is checked and every bit pattern is a valid
    // `MemoryDescriptor` (plain integers, a u32 newtype and u64 flags).
    Some(unsafe { bytes.as_ptr().cast::<MemoryDescriptor>().read_unaligned() })
}

/// Store `desc` field by field at the start of `out`. The padding after the
/// type word and any stride tail keep their bytes.
///
/// Returns `false` if `out` is too short.
#[allow(clippy::cast_ptr_alignment)]
pub fn write_descriptor(desc: &MemoryDescriptor, out: &mut [u8]) -> bool {
    if out.len() < DESCRIPTOR_SIZE {
        return false;
    }
    let ptr = out.as_mut_ptr().cast::<MemoryDescriptor>();
    // SAFETY: the length is checked; only field places are written, through
    // unaligned stores, so no reference to the misaligned record exists.
    unsafe {
        (&raw mut (*ptr).ty).write_unaligned(desc.ty);
        (&raw mut (*ptr).phys_start).write_unaligned(desc.phys_start);
        (&raw mut (*ptr).virt_start).write_unaligned(desc.virt_start);
        (&raw mut (*ptr).page_count).write_unaligned(desc.page_count);
        (&raw mut (*ptr).att).write_unaligned(desc.att);
    }
    true
}

/// Address-typed accessors on a firmware descriptor.
pub trait DescriptorExt {
    fn start(&self) -> PhysicalAddress;

    /// The virtual start; zero until the runtime remapper assigns one.
    fn virt(&self) -> VirtualAddress;

    fn range(&self) -> PhysicalRange;

    fn size_bytes(&self) -> u64;

    fn is_conventional(&self) -> bool;

    fn is_mmio(&self) -> bool;

    /// Write-back cacheable; mapped as normal memory after hand-off.
    fn is_write_back(&self) -> bool;

    /// Needs a virtual mapping for runtime services.
    fn is_runtime(&self) -> bool;
}

impl DescriptorExt for MemoryDescriptor {
    #[inline]
    fn start(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.phys_start)
    }

    #[inline]
    fn virt(&self) -> VirtualAddress {
        VirtualAddress::new(self.virt_start)
    }

    #[inline]
    fn range(&self) -> PhysicalRange {
        PhysicalRange::from_efi_pages(self.start(), self.page_count)
    }

    #[inline]
    fn size_bytes(&self) -> u64 {
        self.page_count << EfiPage::SHIFT
    }

    #[inline]
    fn is_conventional(&self) -> bool {
        self.ty == MemoryType::CONVENTIONAL
    }

    #[inline]
    fn is_mmio(&self) -> bool {
        matches!(self.ty, MemoryType::MMIO | MemoryType::MMIO_PORT_SPACE)
    }

    #[inline]
    fn is_write_back(&self) -> bool {
        self.att.contains(MemoryAttribute::WRITE_BACK)
    }

    #[inline]
    fn is_runtime(&self) -> bool {
        self.att.contains(MemoryAttribute::RUNTIME)
    }
}
