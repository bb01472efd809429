//! # Firmware Memory Map
//!
//! Parsed view of the memory map reported by `GetMemoryMap`, and the single
//! region classifier used on both sides of `ExitBootServices`.
//!
//! * Records are [`uefi`]'s [`MemoryDescriptor`], typed by [`MemoryType`] and
//!   [`MemoryAttribute`]. [`read_descriptor`] and [`write_descriptor`] move
//!   them in and out of byte buffers at any alignment, and [`DescriptorExt`]
//!   adds address-typed accessors.
//! * [`MemoryMap`] owns a captured buffer together with its [`MapKey`];
//!   [`MemoryMapView`] borrows descriptor bytes from anywhere (e.g. the blob).
//!   Both always iterate with the firmware-reported stride and stop at a
//!   record with no pages.
//! * [`RetentionPolicy::classify`] decides [`Retention::Preserve`] or
//!   [`Retention::Discard`] per region.
//! * [`handoff`] names the blob properties that carry the map to the OS.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod descriptor;
pub mod handoff;
mod map;
mod retention;

pub use descriptor::{DESCRIPTOR_SIZE, DescriptorExt, read_descriptor, write_descriptor};
pub use map::{
    Entries, MapKey, MemoryMap, MemoryMapError, MemoryMapMeta, MemoryMapView, encode_descriptors,
};
pub use retention::{Retention, RetentionPolicy};
pub use uefi::mem::memory_map::{MemoryAttribute, MemoryDescriptor, MemoryType};
