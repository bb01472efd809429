//! Building the device description blob handed to the OS.
//!
//! [`load`] validates the source blob and [`prepare`] applies every edit
//! that does not depend on the memory map. [`BlobMutator::grow_and_patch`]
//! then runs the allocate / capture / write cycle until the blob fits,
//! keeping the buffer and the map of the same iteration together.

use crate::config::BlobGrowth;
use crate::release::{ReleaseStack, Resource};
use crate::{BootServices, StubError, pages};
use efi_addresses::{PhysicalAddress, PhysicalRange};
use efi_ddb::{DeviceTree, PropertyRef, PropertyValue, Serializer, check_header};
use efi_memmap::MemoryMap;
use efi_memmap::handoff::props;
use log::debug;

/// What the stub adds to the blob besides the memory map.
#[derive(Copy, Clone, Debug)]
pub struct BlobAdditions<'a> {
    pub cmdline: &'a str,
    pub initrd: Option<PhysicalRange>,
    pub system_table: PhysicalAddress,
}

/// Validate and parse the source blob, or start from an empty tree.
///
/// # Errors
/// [`StubError::BlobHeaderInvalid`] or [`StubError::BlobIncomplete`] if the
/// source fails validation.
pub fn load(source: Option<&[u8]>) -> Result<DeviceTree, StubError> {
    match source {
        Some(bytes) => {
            check_header(bytes).map_err(StubError::from_source_blob)?;
            DeviceTree::parse(bytes).map_err(StubError::from_source_blob)
        }
        None => Ok(DeviceTree::empty()),
    }
}

/// Apply every edit that does not depend on the memory map.
pub fn prepare(tree: &mut DeviceTree, additions: &BlobAdditions<'_>) {
    // The firmware memory map replaces whatever memory layout the blob describes.
    let removed = tree.remove_memory_nodes();
    if removed > 0 {
        debug!("removed {removed} memory node(s) from the device tree");
    }

    let chosen = tree.chosen_mut();
    if !additions.cmdline.is_empty() {
        chosen.set_str(props::BOOTARGS, additions.cmdline);
    }
    if let Some(initrd) = additions.initrd.filter(|r| !r.is_empty()) {
        chosen.set_u64(props::INITRD_START, initrd.base().as_u64());
        chosen.set_u64(props::INITRD_END, initrd.end().as_u64());
    }
    chosen.set_u64(props::SYSTEM_TABLE, additions.system_table.as_u64());
}

/// Names of the properties written from the captured map.
const MAP_PROPERTIES: [&str; 5] = [
    props::MMAP_START,
    props::MMAP_SIZE,
    props::MMAP_DESC_SIZE,
    props::MMAP_DESC_VER,
    props::MMAP,
];

/// Where and how big the new blob is allocated.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlobPlacement {
    pub initial_capacity: u64,
    pub align: u64,
    /// The blob must end at or below this address.
    pub max: PhysicalAddress,
    pub growth: BlobGrowth,
}

/// The finished blob and the memory map it was written from.
#[derive(Debug)]
pub struct PatchedBlob {
    /// The allocated buffer; `size` bytes of it are used.
    pub buffer: PhysicalRange,
    pub size: usize,
    /// Captured in the same iteration that wrote `buffer`.
    pub map: MemoryMap,
    /// Number of allocate/capture/write iterations it took.
    pub attempts: u32,
}

enum State {
    /// Capacity chosen, nothing allocated.
    Sized { capacity: u64 },
    /// Buffer allocated, then the map captured.
    Captured { buffer: PhysicalRange, map: MemoryMap },
    /// Blob written from `map` into `buffer`.
    Written {
        buffer: PhysicalRange,
        map: MemoryMap,
        size: usize,
    },
}

/// Writes a prepared tree plus the firmware memory map into a new buffer.
pub struct BlobMutator<'t> {
    serializer: Serializer<'t>,
}

impl<'t> BlobMutator<'t> {
    /// Set up the allocation-free writer for `tree`. The tree must contain
    /// a `/chosen` node (see [`prepare`]).
    #[must_use]
    pub fn new(tree: &'t DeviceTree) -> Self {
        let chosen = tree.chosen().map_or(props::CHOSEN, |n| n.name.as_str());
        Self {
            serializer: Serializer::new(tree, chosen, &MAP_PROPERTIES),
        }
    }

    /// Run the allocate / capture / write cycle until the blob fits.
    ///
    /// The buffer is pushed onto `release` as soon as it is allocated; a
    /// buffer that turns out too small is released again before the
    /// capacity grows.
    ///
    /// # Errors
    /// Allocation failures, a missing memory map, or any write error other
    /// than running out of space.
    pub fn grow_and_patch<F: BootServices>(
        &self,
        fw: &mut F,
        placement: &BlobPlacement,
        release: &mut ReleaseStack,
    ) -> Result<PatchedBlob, StubError> {
        let mut attempts = 0u32;
        let mut state = State::Sized {
            capacity: placement.initial_capacity,
        };

        loop {
            state = match state {
                State::Sized { capacity } => {
                    attempts += 1;
                    let base = pages::high_alloc(fw, capacity, placement.align, placement.max)?;
                    let buffer = PhysicalRange::new(base, capacity);
                    release.push(Resource::Blob, buffer);

                    // The allocation above invalidated any earlier key.
                    let map = fw
                        .memory_map()
                        .map_err(|_| StubError::FirmwareUnavailable("no memory map"))?;
                    State::Captured { buffer, map }
                }
                State::Captured { buffer, map } => match self.write(fw, buffer, &map) {
                    Ok(size) => State::Written { buffer, map, size },
                    Err(StubError::BlobBufferTooSmall { required, capacity }) => {
                        debug!("device tree needs {required} bytes, {capacity} allocated; growing");
                        drop(map);
                        release.release_top(fw, Resource::Blob);
                        State::Sized {
                            capacity: placement.growth.next(buffer.size()),
                        }
                    }
                    Err(other) => return Err(other),
                },
                // Nothing may run between here and `ExitBootServices` that
                // could allocate, so no logging either.
                State::Written { buffer, map, size } => {
                    return Ok(PatchedBlob {
                        buffer,
                        size,
                        map,
                        attempts,
                    });
                }
            };
        }
    }

    /// Re-capture the map into its own buffer and rewrite the blob in place.
    ///
    /// Used after firmware rejected a stale key; nothing is allocated.
    ///
    /// # Errors
    /// [`StubError::ExitRejected`] if the map cannot be refreshed, or
    /// [`StubError::BlobBufferTooSmall`] if the new map no longer fits.
    pub fn recapture<F: BootServices>(
        &self,
        fw: &mut F,
        blob: &mut PatchedBlob,
    ) -> Result<(), StubError> {
        fw.refresh_memory_map(&mut blob.map)
            .map_err(StubError::ExitRejected)?;
        blob.size = self.write(fw, blob.buffer, &blob.map)?;
        Ok(())
    }

    fn write<F: BootServices>(
        &self,
        fw: &mut F,
        buffer: PhysicalRange,
        map: &MemoryMap,
    ) -> Result<usize, StubError> {
        let meta = map.meta();
        let overlay = [
            PropertyRef {
                name: props::MMAP_START,
                value: PropertyValue::U64(map.location().as_u64()),
            },
            PropertyRef {
                name: props::MMAP_SIZE,
                value: PropertyValue::U32(cell(meta.map_size)),
            },
            PropertyRef {
                name: props::MMAP_DESC_SIZE,
                value: PropertyValue::U32(cell(meta.desc_size)),
            },
            PropertyRef {
                name: props::MMAP_DESC_VER,
                value: PropertyValue::U32(meta.desc_version),
            },
            PropertyRef {
                name: props::MMAP,
                value: PropertyValue::Bytes(map.as_bytes()),
            },
        ];
        let out = fw
            .memory_mut(buffer)
            .ok_or(StubError::FirmwareUnavailable("allocated memory not accessible"))?;
        self.serializer
            .write(&overlay, out)
            .map_err(StubError::from_blob_write)
    }

    /// Blob size the current tree needs with `map` attached.
    #[must_use]
    pub fn required_size(&self, map: &MemoryMap) -> usize {
        let overlay = [
            PropertyRef {
                name: props::MMAP_START,
                value: PropertyValue::U64(0),
            },
            PropertyRef {
                name: props::MMAP_SIZE,
                value: PropertyValue::U32(0),
            },
            PropertyRef {
                name: props::MMAP_DESC_SIZE,
                value: PropertyValue::U32(0),
            },
            PropertyRef {
                name: props::MMAP_DESC_VER,
                value: PropertyValue::U32(0),
            },
            PropertyRef {
                name: props::MMAP,
                value: PropertyValue::Bytes(map.as_bytes()),
            },
        ];
        self.serializer.required_size(&overlay)
    }
}

/// Sizes are written as single cells; a map larger than 4 GiB is not a thing.
fn cell(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
