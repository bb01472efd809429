use crate::descriptor::{DESCRIPTOR_SIZE, DescriptorExt, read_descriptor, write_descriptor};
use alloc::vec;
use alloc::vec::Vec;
use efi_addresses::PhysicalAddress;
use log::debug;
use uefi::mem::memory_map::MemoryDescriptor;

/// Firmware-issued token identifying the allocator state a map was captured in.
///
/// It must be presented unchanged to `ExitBootServices`, and it is stale as
/// soon as anything is allocated or freed after the capture. The raw value
/// comes straight from `GetMemoryMap`; `uefi::mem::memory_map::MemoryMapKey`
/// can only be created inside the `uefi` crate.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct MapKey(pub usize);

/// Metadata returned alongside the raw descriptor array, with the key kept
/// as a [`MapKey`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryMapMeta {
    /// Number of valid bytes in the buffer.
    pub map_size: usize,
    /// Stride between descriptors; at least [`DESCRIPTOR_SIZE`].
    pub desc_size: usize,
    pub desc_version: u32,
    pub key: MapKey,
}

impl MemoryMapMeta {
    #[inline]
    #[must_use]
    pub const fn entry_count(&self) -> usize {
        if self.desc_size == 0 {
            0
        } else {
            self.map_size / self.desc_size
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MemoryMapError {
    #[error("descriptor stride {0} is smaller than a descriptor")]
    StrideTooSmall(usize),
    #[error("map size {map_size} exceeds the {buffer} byte buffer")]
    Truncated { map_size: usize, buffer: usize },
}

/// A captured firmware memory map.
///
/// Immutable once captured. The key inside [`meta`](Self::meta) belongs to
/// exactly this capture; a new allocation or free requires a fresh capture.
#[derive(Debug)]
pub struct MemoryMap {
    buffer: Vec<u8>,
    meta: MemoryMapMeta,
}

impl MemoryMap {
    /// Wrap a buffer filled by `GetMemoryMap`.
    ///
    /// # Errors
    /// Rejects a stride below the descriptor size or a size larger than the buffer.
    pub fn from_raw(buffer: Vec<u8>, meta: MemoryMapMeta) -> Result<Self, MemoryMapError> {
        if meta.desc_size < DESCRIPTOR_SIZE {
            return Err(MemoryMapError::StrideTooSmall(meta.desc_size));
        }
        if meta.map_size > buffer.len() {
            return Err(MemoryMapError::Truncated {
                map_size: meta.map_size,
                buffer: buffer.len(),
            });
        }
        Ok(Self { buffer, meta })
    }

    /// Lay out `descriptors` with the given stride, the way firmware would.
    ///
    /// # Errors
    /// Rejects a stride below the descriptor size.
    pub fn from_descriptors(
        descriptors: &[MemoryDescriptor],
        desc_size: usize,
        desc_version: u32,
        key: MapKey,
    ) -> Result<Self, MemoryMapError> {
        let buffer = encode_descriptors(descriptors.iter(), desc_size)?;
        let meta = MemoryMapMeta {
            map_size: buffer.len(),
            desc_size,
            desc_version,
            key,
        };
        Self::from_raw(buffer, meta)
    }

    #[inline]
    #[must_use]
    pub const fn meta(&self) -> &MemoryMapMeta {
        &self.meta
    }

    #[inline]
    #[must_use]
    pub const fn key(&self) -> MapKey {
        self.meta.key
    }

    /// The raw descriptor bytes, `map_size` long.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.meta.map_size]
    }

    /// Where the descriptor array lives. Boot-time code runs identity mapped,
    /// so the buffer address is its physical address.
    #[inline]
    #[must_use]
    pub fn location(&self) -> PhysicalAddress {
        PhysicalAddress::from_ptr(self.buffer.as_ptr())
    }

    #[must_use]
    pub fn view(&self) -> MemoryMapView<'_> {
        MemoryMapView {
            bytes: self.as_bytes(),
            desc_size: self.meta.desc_size,
            desc_version: self.meta.desc_version,
        }
    }

    pub fn entries(&self) -> Entries<'_> {
        self.view().entries()
    }

    /// The whole backing buffer, for firmware to capture a new map into.
    #[inline]
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Adopt the metadata of a capture made through [`buffer_mut`](Self::buffer_mut).
    ///
    /// # Errors
    /// Same checks as [`from_raw`](Self::from_raw); the map is left unchanged on error.
    pub fn set_meta(&mut self, meta: MemoryMapMeta) -> Result<(), MemoryMapError> {
        if meta.desc_size < DESCRIPTOR_SIZE {
            return Err(MemoryMapError::StrideTooSmall(meta.desc_size));
        }
        if meta.map_size > self.buffer.len() {
            return Err(MemoryMapError::Truncated {
                map_size: meta.map_size,
                buffer: self.buffer.len(),
            });
        }
        self.meta = meta;
        Ok(())
    }

    /// Hand the buffer over for the rest of the boot; it is never freed.
    #[must_use]
    pub fn leak(self) -> &'static [u8] {
        let size = self.meta.map_size;
        &self.buffer.leak()[..size]
    }
}

/// A borrowed, stride-aware view over descriptor bytes, e.g. the copy of the
/// map embedded in the device description blob.
#[derive(Debug, Copy, Clone)]
pub struct MemoryMapView<'a> {
    bytes: &'a [u8],
    desc_size: usize,
    desc_version: u32,
}

impl<'a> MemoryMapView<'a> {
    /// # Errors
    /// Rejects a stride below the descriptor size.
    pub const fn new(
        bytes: &'a [u8],
        desc_size: usize,
        desc_version: u32,
    ) -> Result<Self, MemoryMapError> {
        if desc_size < DESCRIPTOR_SIZE {
            return Err(MemoryMapError::StrideTooSmall(desc_size));
        }
        Ok(Self {
            bytes,
            desc_size,
            desc_version,
        })
    }

    #[inline]
    #[must_use]
    pub const fn desc_size(&self) -> usize {
        self.desc_size
    }

    #[inline]
    #[must_use]
    pub const fn desc_version(&self) -> u32 {
        self.desc_version
    }

    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Iterate descriptors using the reported stride.
    ///
    /// Iteration ends at the last whole record, or early at a record with
    /// a zero page count.
    #[must_use]
    pub const fn entries(&self) -> Entries<'a> {
        Entries {
            bytes: self.bytes,
            stride: self.desc_size,
            offset: 0,
        }
    }

    /// Lowest conventional-memory base, aligned down to `align`.
    #[must_use]
    pub fn dram_base(&self, align: u64) -> Option<PhysicalAddress> {
        self.entries()
            .filter(DescriptorExt::is_conventional)
            .map(|d| d.start().align_down_to(align))
            .min()
    }

    /// The descriptor whose range contains `addr`.
    #[must_use]
    pub fn find(&self, addr: PhysicalAddress) -> Option<MemoryDescriptor> {
        self.entries().find(|d| d.range().contains(addr))
    }

    /// Log every descriptor at debug level.
    pub fn dump(&self) {
        for (i, d) in self.entries().enumerate() {
            debug!(
                "  {i:3}: {}-{} attr {:#018x} {:?}",
                d.start(),
                d.range().end(),
                d.att.bits(),
                d.ty
            );
        }
    }
}

/// Iterator over the descriptors of a [`MemoryMapView`].
#[derive(Debug, Clone)]
pub struct Entries<'a> {
    bytes: &'a [u8],
    stride: usize,
    offset: usize,
}

impl Iterator for Entries<'_> {
    type Item = MemoryDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        let end = self.offset.checked_add(self.stride)?;
        if end > self.bytes.len() {
            return None;
        }
        let desc = read_descriptor(&self.bytes[self.offset..end])?;
        if desc.page_count == 0 {
            self.offset = self.bytes.len();
            return None;
        }
        self.offset = end;
        Some(desc)
    }
}

/// Serialize descriptors into a fresh buffer with the given stride.
///
/// # Errors
/// Rejects a stride below the descriptor size.
pub fn encode_descriptors<'a>(
    descriptors: impl ExactSizeIterator<Item = &'a MemoryDescriptor>,
    desc_size: usize,
) -> Result<Vec<u8>, MemoryMapError> {
    if desc_size < DESCRIPTOR_SIZE {
        return Err(MemoryMapError::StrideTooSmall(desc_size));
    }
    let mut buffer = vec![0u8; descriptors.len() * desc_size];
    for (chunk, desc) in buffer.chunks_exact_mut(desc_size).zip(descriptors) {
        write_descriptor(desc, chunk);
    }
    Ok(buffer)
}
