//! # Device Description Blob
//!
//! Reader and writer for the flattened device tree (FDT v17) that the boot
//! stub hands to the OS.
//!
//! The boot stub only needs a handful of operations, and this crate offers
//! exactly those:
//!
//! * [`check_header`] validates a blob read from storage, distinguishing a
//!   corrupt header ([`DdbError::BadHeader`]) from a truncated read
//!   ([`DdbError::Incomplete`]).
//! * [`DeviceTree::parse`] turns the blob into an editable [`DeviceTree`].
//! * [`Serializer`] writes it back, together with a set of extra
//!   [`PropertyRef`]s, into a caller-provided buffer without allocating.
//!   A short buffer yields [`DdbError::NoSpace`] with the exact size needed.
//!
//! ```rust
//! # use efi_ddb::*;
//! let mut tree = DeviceTree::empty();
//! tree.chosen_mut().set_str("bootargs", "console=ttyAMA0");
//!
//! let overlay = [PropertyRef { name: "linux,efi-mmap-desc-ver", value: PropertyValue::U32(1) }];
//! let serializer = Serializer::new(&tree, "chosen", &["linux,efi-mmap-desc-ver"]);
//! let mut buf = vec![0u8; serializer.required_size(&overlay)];
//! serializer.write(&overlay, &mut buf).unwrap();
//!
//! let parsed = DeviceTree::parse(&buf).unwrap();
//! let chosen = parsed.chosen().unwrap();
//! assert_eq!(chosen.property("linux,efi-mmap-desc-ver").unwrap().as_u32(), Some(1));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod error;
mod header;
mod parse;
mod tree;
mod write;

pub use error::DdbError;
pub use header::{FDT_MAGIC, HEADER_SIZE, Header, check_header};
pub use tree::{DeviceTree, Node, Property, Reservation};
pub use write::{PropertyRef, PropertyValue, Serializer};
