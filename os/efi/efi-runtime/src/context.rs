use crate::facility::{Facility, FacilityFlags};
use crate::remap::RuntimeMap;
use crate::services::{RuntimeServices, RuntimeServicesTable};
use crate::switch::SwitchState;
use crate::tables::TableLayout;
use alloc::vec::Vec;
use efi_addresses::{PhysicalAddress, PhysicalHandle, VirtualAddress};
use efi_memmap::handoff::EfiParams;
use efi_memmap::{MemoryMapView, RetentionPolicy};
use uefi::Guid;

/// Kernel command-line flag that turns on per-descriptor logging.
pub const UEFI_DEBUG_FLAG: &str = "uefi_debug";

/// What the architecture expects of the firmware tables.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RuntimeProfile {
    pub layout: TableLayout,
    /// Highest address the early kernel can map the memory map from.
    pub map_limit: Option<u64>,
}

impl RuntimeProfile {
    pub const ARM64: Self = Self {
        layout: TableLayout::BITS_64,
        map_limit: None,
    };

    pub const ARM32: Self = Self {
        layout: TableLayout::BITS_32,
        map_limit: Some(0xFFFF_FFFF),
    };
}

/// One entry of the firmware configuration table array.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ConfigTable {
    pub guid: Guid,
    pub address: PhysicalAddress,
}

/// Everything the kernel learns about the firmware, from the blob through
/// to the virtual-address-map switch.
///
/// Owned by the boot CPU and passed by `&mut` through the init phases.
#[derive(Debug)]
pub struct BootContext {
    pub(crate) profile: RuntimeProfile,
    pub(crate) policy: RetentionPolicy,
    pub(crate) debug: bool,
    pub(crate) flags: FacilityFlags,
    pub(crate) params: Option<EfiParams>,
    /// Copy of the descriptor bytes from the blob.
    pub(crate) boot_map: Vec<u8>,
    pub(crate) revision: u32,
    pub(crate) runtime_table: Option<PhysicalHandle<RuntimeServicesTable>>,
    pub(crate) config_tables: Vec<ConfigTable>,
    pub(crate) preserved: usize,
    pub(crate) runtime_map: Option<RuntimeMap>,
    pub(crate) system_table_va: Option<VirtualAddress>,
    pub(crate) runtime_table_va: Option<VirtualAddress>,
    pub(crate) switch: SwitchState,
    pub(crate) runtime: Option<RuntimeServices>,
}

impl BootContext {
    #[must_use]
    pub const fn new(profile: RuntimeProfile, policy: RetentionPolicy) -> Self {
        Self {
            profile,
            policy,
            debug: false,
            flags: FacilityFlags::new(),
            params: None,
            boot_map: Vec::new(),
            revision: 0,
            runtime_table: None,
            config_tables: Vec::new(),
            preserved: 0,
            runtime_map: None,
            system_table_va: None,
            runtime_table_va: None,
            switch: SwitchState::Idle,
            runtime: None,
        }
    }

    /// Turn on descriptor dumps if the kernel command line asks for them.
    #[must_use]
    pub fn with_cmdline(mut self, cmdline: &str) -> Self {
        self.debug = has_flag(cmdline, UEFI_DEBUG_FLAG);
        self
    }

    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub const fn profile(&self) -> &RuntimeProfile {
        &self.profile
    }

    #[must_use]
    pub const fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    #[must_use]
    pub const fn debug(&self) -> bool {
        self.debug
    }

    #[must_use]
    pub const fn flags(&self) -> FacilityFlags {
        self.flags
    }

    #[inline]
    #[must_use]
    pub const fn enabled(&self, facility: Facility) -> bool {
        self.flags.enabled(facility)
    }

    pub(crate) fn set(&mut self, facility: Facility) {
        self.flags.set(facility);
    }

    #[must_use]
    pub const fn params(&self) -> Option<&EfiParams> {
        self.params.as_ref()
    }

    /// The firmware memory map as handed over in the blob.
    #[must_use]
    pub fn boot_map(&self) -> Option<MemoryMapView<'_>> {
        let params = self.params.as_ref()?;
        MemoryMapView::new(&self.boot_map, params.desc_size, params.desc_version).ok()
    }

    /// System table revision, major version in the upper 16 bits.
    #[must_use]
    pub const fn revision(&self) -> u32 {
        self.revision
    }

    #[must_use]
    pub const fn runtime_table(&self) -> Option<PhysicalHandle<RuntimeServicesTable>> {
        self.runtime_table
    }

    #[must_use]
    pub fn config_tables(&self) -> &[ConfigTable] {
        &self.config_tables
    }

    /// Number of descriptors classified as Preserve by `reserve_regions`.
    #[must_use]
    pub const fn preserved_count(&self) -> usize {
        self.preserved
    }

    #[must_use]
    pub const fn runtime_map(&self) -> Option<&RuntimeMap> {
        self.runtime_map.as_ref()
    }

    /// Virtual address of the system table, once the remapper has placed it.
    #[must_use]
    pub const fn system_table_va(&self) -> Option<VirtualAddress> {
        self.system_table_va
    }

    #[must_use]
    pub const fn switch_state(&self) -> SwitchState {
        self.switch
    }

    /// The runtime services, if the virtual-address-map switch bound them.
    #[must_use]
    pub const fn runtime_services(&self) -> Option<&RuntimeServices> {
        self.runtime.as_ref()
    }
}

/// Whether `flag` appears as a whole word on the command line.
#[must_use]
pub fn has_flag(cmdline: &str, flag: &str) -> bool {
    cmdline.split_ascii_whitespace().any(|word| word == flag)
}
