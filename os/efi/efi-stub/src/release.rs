use crate::BootServices;
use crate::pages;
use alloc::vec::Vec;
use core::fmt;
use efi_addresses::PhysicalRange;
use log::debug;

/// What a page allocation made by the stub holds.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Resource {
    CommandLine,
    BlobSource,
    KernelReservation,
    Image,
    Initrd,
    Blob,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CommandLine => "command line",
            Self::BlobSource => "device tree source",
            Self::KernelReservation => "kernel reservation",
            Self::Image => "image",
            Self::Initrd => "initrd",
            Self::Blob => "device tree",
        })
    }
}

/// One acquired allocation and how to give it back.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Release {
    pub resource: Resource,
    pub range: PhysicalRange,
}

/// Allocations made so far, in acquisition order.
///
/// On failure the stack is [unwound](Self::unwind), freeing everything in
/// reverse order. On success it is [disarmed](Self::disarm): the memory now
/// belongs to the OS.
#[derive(Debug, Default)]
pub struct ReleaseStack {
    entries: Vec<Release>,
}

impl ReleaseStack {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, resource: Resource, range: PhysicalRange) {
        self.entries.push(Release { resource, range });
    }

    #[must_use]
    pub fn entries(&self) -> &[Release] {
        &self.entries
    }

    /// Free the most recent allocation, which must hold `resource`.
    ///
    /// Returns `false` (and frees nothing) if the top of the stack holds
    /// something else.
    pub fn release_top<F: BootServices>(&mut self, fw: &mut F, resource: Resource) -> bool {
        match self.entries.last() {
            Some(top) if top.resource == resource => {}
            _ => return false,
        }
        if let Some(top) = self.entries.pop() {
            debug!("releasing {} at {:?}", top.resource, top.range);
            pages::free(fw, top.range);
        }
        true
    }

    /// Free every allocation, newest first.
    pub fn unwind<F: BootServices>(&mut self, fw: &mut F) {
        while let Some(entry) = self.entries.pop() {
            debug!("releasing {} at {:?}", entry.resource, entry.range);
            pages::free(fw, entry.range);
        }
    }

    /// Keep every allocation; returns what was kept.
    pub fn disarm(&mut self) -> Vec<Release> {
        core::mem::take(&mut self.entries)
    }
}
