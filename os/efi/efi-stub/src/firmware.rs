use alloc::vec::Vec;
use efi_addresses::{PhysicalAddress, PhysicalRange};
use efi_memmap::{MapKey, MemoryMap, MemoryType};
use uefi::Status;

/// `EFI_SYSTEM_TABLE_SIGNATURE`, "IBI SYST" read as a little-endian `u64`.
pub const SYSTEM_TABLE_SIGNATURE: u64 = 0x5453_5953_2049_4249;

/// How `AllocatePages` picks the address.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AllocateType {
    AnyPages,
    /// Anywhere at or below the given address.
    MaxAddress(PhysicalAddress),
    /// Exactly at the given address.
    Address(PhysicalAddress),
}

/// What the loaded-image protocol reports about the running stub.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadedImage {
    /// Where firmware loaded the image.
    pub base: PhysicalAddress,
    /// Size of the file contents loaded.
    pub size: u64,
    /// Zero-initialized memory the image expects past its file contents.
    pub bss_size: u64,
    /// Load options as passed by the boot manager (UCS-2, usually NUL terminated).
    pub load_options: Vec<u16>,
}

/// The firmware boot services used by the stub.
///
/// Every call crosses into firmware; implementations must not be used after
/// [`exit_boot_services`](Self::exit_boot_services) has returned `Ok`.
/// Boot-time code runs identity mapped, so physical addresses handed out by
/// [`allocate_pages`](Self::allocate_pages) are directly accessible through
/// [`memory_mut`](Self::memory_mut).
pub trait BootServices {
    /// Physical address of the system table.
    fn system_table(&self) -> PhysicalAddress;

    /// Signature field of the system table header.
    fn system_table_signature(&self) -> u64;

    /// # Errors
    /// The firmware status if the loaded-image protocol is unavailable.
    fn loaded_image(&mut self) -> Result<LoadedImage, Status>;

    /// # Errors
    /// The firmware status, typically `NOT_FOUND` or `OUT_OF_RESOURCES`.
    fn allocate_pages(
        &mut self,
        ty: AllocateType,
        memory_type: MemoryType,
        pages: u64,
    ) -> Result<PhysicalAddress, Status>;

    /// # Errors
    /// The firmware status if the range was not allocated.
    fn free_pages(&mut self, base: PhysicalAddress, pages: u64) -> Result<(), Status>;

    /// Capture the current memory map into a new buffer with some slack.
    ///
    /// # Errors
    /// The firmware status if no map can be produced.
    fn memory_map(&mut self) -> Result<MemoryMap, Status>;

    /// Capture the current memory map into the buffer of an earlier capture,
    /// without allocating.
    ///
    /// # Errors
    /// `BUFFER_TOO_SMALL` if the map outgrew the buffer's slack.
    fn refresh_memory_map(&mut self, map: &mut MemoryMap) -> Result<(), Status>;

    /// # Errors
    /// `INVALID_PARAMETER` if `key` is stale.
    fn exit_boot_services(&mut self, key: MapKey) -> Result<(), Status>;

    /// Read a whole file from the volume the image was loaded from.
    ///
    /// # Errors
    /// The firmware status of the failing file operation.
    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, Status>;

    /// Mutable access to memory the stub owns (an allocation or the image).
    fn memory_mut(&mut self, range: PhysicalRange) -> Option<&mut [u8]>;

    /// `CopyMem`: copy `len` bytes; the ranges may overlap.
    ///
    /// # Errors
    /// `INVALID_PARAMETER` if either range is not accessible.
    fn copy_mem(
        &mut self,
        dst: PhysicalAddress,
        src: PhysicalAddress,
        len: u64,
    ) -> Result<(), Status>;
}
