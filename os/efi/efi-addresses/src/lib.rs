//! # Physical and Virtual Address Types for the Firmware Hand-off
//!
//! Strongly typed wrappers for the raw addresses that cross the boundary
//! between platform firmware and the OS.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`MemoryAddress`] | A raw 64-bit address, either physical or virtual. |
//! | [`PhysicalAddress`] | A physical address, as reported in the firmware memory map. |
//! | [`VirtualAddress`] | An address in the OS's own (page-table translated) address space. |
//! | [`PhysicalRange`] | A half-open physical range, e.g. one memory descriptor. |
//! | [`PhysicalHandle<T>`] / [`VirtualHandle<T>`] | A typed reference to a firmware object, before and after the address-map switch. |
//!
//! ## Page Sizes
//!
//! Firmware always counts in 4 KiB pages ([`EfiPage`]). The OS may run with
//! a larger native granule ([`Size64K`]) and maps firmware regions in
//! [`Size2M`] sections during the transient identity mapping. Use
//! [`efi_to_native`] to translate between the two.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use efi_addresses::*;
//! let pa = PhysicalAddress::new(0x4008_1234);
//! assert_eq!(pa.align_down::<Size4K>().as_u64(), 0x4008_1000);
//! assert_eq!(pa.align_up_to(0x20_0000).unwrap().as_u64(), 0x4020_0000);
//!
//! let range = PhysicalRange::from_efi_pages(PhysicalAddress::new(0x4000_0000), 16);
//! assert_eq!(range.size(), 16 * 4096);
//! ```
//!
//! ## Design Notes
//!
//! - Physical and virtual addresses do not convert into each other. The only
//!   bridge is [`PhysicalAddress::identity`], which spells out the identity
//!   mapping assumption at the call site.
//! - A [`VirtualHandle`] can only be minted through an `unsafe` constructor;
//!   the runtime crate does so exclusively after a successful address-map
//!   switch.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod handle;
mod memory_address;
mod page_size;
mod range;
mod typed_address;

pub use handle::{PhysicalHandle, VirtualHandle};
pub use memory_address::MemoryAddress;
pub use page_size::{EfiPage, PageSize, Size2M, Size4K, Size64K};
pub use range::{PhysicalRange, efi_to_native};
pub use typed_address::{PhysicalAddress, VirtualAddress};
