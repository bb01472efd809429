//! Names and layout of the firmware parameters handed to the OS through
//! the `/chosen` node of the device description blob.

use efi_addresses::PhysicalAddress;

/// `/chosen` property names shared by the boot stub (writer) and the
/// runtime (reader).
pub mod props {
    pub const CHOSEN: &str = "chosen";
    pub const CHOSEN_AT_0: &str = "chosen@0";
    pub const BOOTARGS: &str = "bootargs";
    pub const INITRD_START: &str = "linux,initrd-start";
    pub const INITRD_END: &str = "linux,initrd-end";
    pub const SYSTEM_TABLE: &str = "linux,efi-system-table";
    /// Raw descriptor bytes, exactly `map_size` long.
    pub const MMAP: &str = "linux,efi-mmap";
    pub const MMAP_START: &str = "linux,efi-mmap-start";
    pub const MMAP_SIZE: &str = "linux,efi-mmap-size";
    pub const MMAP_DESC_SIZE: &str = "linux,efi-mmap-desc-size";
    pub const MMAP_DESC_VER: &str = "linux,efi-mmap-desc-ver";
}

/// Stride assumed when the blob carries no `linux,efi-mmap-desc-size`.
pub const DEFAULT_DESC_SIZE: usize = 48;

/// Descriptor version assumed when the blob carries no `linux,efi-mmap-desc-ver`.
pub const DEFAULT_DESC_VERSION: u32 = 1;

/// Firmware parameters as recovered from the blob after hand-off.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EfiParams {
    /// Physical address of the firmware system table.
    pub system_table: PhysicalAddress,

    /// Physical address of the original map buffer, if the stub recorded it.
    pub mmap_start: Option<PhysicalAddress>,

    /// Length of the memory map in **bytes**.
    pub mmap_size: usize,

    /// Size of a single memory descriptor in bytes.
    pub desc_size: usize,

    /// Descriptor version reported by firmware.
    pub desc_version: u32,
}
