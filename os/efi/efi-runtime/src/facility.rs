use bitfield_struct::bitfield;

/// Firmware facilities the kernel has established so far.
///
/// Bits are only ever set, by `efi_init`, `reserve_regions`, the remapper and
/// the virtual-map switch. Everything else reads them through
/// [`BootContext::enabled`](crate::BootContext::enabled).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct FacilityFlags {
    /// Bit 0 — the blob carried firmware parameters and a valid system table.
    pub boot: bool,
    /// Bit 1 — the firmware memory map was found and is usable.
    pub memmap: bool,
    /// Bit 2 — runtime services are callable through their virtual mapping.
    pub runtime_services: bool,
    /// Bit 3 — the configuration table array was read.
    pub config_tables: bool,
    /// Bit 4 — the system table has a virtual mapping.
    pub system_tables: bool,
    /// Bit 5 — firmware tables use 64-bit pointers.
    pub is_64bit: bool,
    /// Bit 6 — `SetVirtualAddressMap` was attempted. It cannot be attempted
    /// twice, regardless of the outcome.
    pub virtual_map_attempted: bool,

    /// Bits 7–31 — reserved.
    #[bits(25)]
    _reserved_7_31: u32,
}

/// Name of a single bit of [`FacilityFlags`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Facility {
    Boot,
    MemMap,
    RuntimeServices,
    ConfigTables,
    SystemTables,
    Is64Bit,
    VirtualMapAttempted,
}

impl FacilityFlags {
    #[must_use]
    pub const fn enabled(&self, facility: Facility) -> bool {
        match facility {
            Facility::Boot => self.boot(),
            Facility::MemMap => self.memmap(),
            Facility::RuntimeServices => self.runtime_services(),
            Facility::ConfigTables => self.config_tables(),
            Facility::SystemTables => self.system_tables(),
            Facility::Is64Bit => self.is_64bit(),
            Facility::VirtualMapAttempted => self.virtual_map_attempted(),
        }
    }

    pub(crate) fn set(&mut self, facility: Facility) {
        match facility {
            Facility::Boot => self.set_boot(true),
            Facility::MemMap => self.set_memmap(true),
            Facility::RuntimeServices => self.set_runtime_services(true),
            Facility::ConfigTables => self.set_config_tables(true),
            Facility::SystemTables => self.set_system_tables(true),
            Facility::Is64Bit => self.set_is_64bit(true),
            Facility::VirtualMapAttempted => self.set_virtual_map_attempted(true),
        }
    }
}
