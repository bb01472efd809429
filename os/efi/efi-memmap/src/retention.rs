use uefi::mem::memory_map::{MemoryAttribute, MemoryDescriptor, MemoryType};

/// Whether a region survives the end of boot services.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Retention {
    /// Firmware may still touch the region; keep it out of the OS allocator.
    Preserve,
    /// Free for the OS to reclaim.
    Discard,
}

/// Knobs of the region classifier.
///
/// The same policy value must be used by the reservation phase and by the
/// runtime remapper; both call [`RetentionPolicy::classify`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RetentionPolicy {
    /// Keep boot-services code and data. Some firmware keeps referencing
    /// them after `ExitBootServices`.
    pub keep_boot_services: bool,
    /// Keep every region; for debugging firmware that misreports types.
    pub keep_all: bool,
}

impl RetentionPolicy {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            keep_boot_services: cfg!(feature = "keep-boot-services-regions"),
            keep_all: false,
        }
    }

    #[must_use]
    pub const fn with_keep_boot_services(mut self, keep: bool) -> Self {
        self.keep_boot_services = keep;
        self
    }

    #[must_use]
    pub const fn with_keep_all(mut self, keep: bool) -> Self {
        self.keep_all = keep;
        self
    }

    /// Decide the fate of one region.
    ///
    /// In priority order: runtime attribute, ACPI reclaim, boot services
    /// (per policy), everything else is discarded.
    #[must_use]
    pub const fn classify(&self, desc: &MemoryDescriptor) -> Retention {
        if self.keep_all || desc.att.contains(MemoryAttribute::RUNTIME) {
            return Retention::Preserve;
        }
        match desc.ty {
            MemoryType::ACPI_RECLAIM => Retention::Preserve,
            MemoryType::BOOT_SERVICES_CODE | MemoryType::BOOT_SERVICES_DATA
                if self.keep_boot_services =>
            {
                Retention::Preserve
            }
            _ => Retention::Discard,
        }
    }

    #[inline]
    #[must_use]
    pub const fn preserves(&self, desc: &MemoryDescriptor) -> bool {
        matches!(self.classify(desc), Retention::Preserve)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new()
    }
}
