//! # EFI Boot Stub
//!
//! Runs as a UEFI application right before the OS kernel: places the kernel
//! image, loads the initrd and device tree named on the command line, adds
//! the firmware memory map to the device tree and exits boot services.
//!
//! ```text
//! loaded image ──► command line ──► dtb= ──► base of RAM
//!                                             │
//!      ┌──────────────────────────────────────┘
//!      ▼
//! relocate image ──► initrd= ──► prepare tree
//!                                   │
//!      ┌────────────────────────────┘
//!      ▼
//! ┌─ allocate ─► capture map ─► write ─┐  (grow on NoSpace)
//! └────────────────────────────────────┘
//!      │
//!      ▼
//! ExitBootServices(key) ─► stale? recapture, rewrite, retry once
//! ```
//!
//! Firmware is reached only through the [`BootServices`] trait. The real
//! implementation lives in the `platform` module and is built for UEFI targets
//! only; tests drive the same code against a simulated firmware.
//!
//! Every allocation is recorded on a [`ReleaseStack`] and freed again,
//! newest first, if any later step fails.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod blob;
pub mod cmdline;
pub mod config;
mod entry;
mod error;
pub mod exit;
pub mod files;
mod firmware;
pub mod logger;
pub mod pages;
pub mod release;
pub mod relocate;

#[cfg(target_os = "uefi")]
pub mod platform;

pub use config::StubConfig;
pub use entry::{BootHandoff, DTB_OPTION, EFI_STUB_ERROR, INITRD_OPTION, boot, efi_entry};
pub use error::StubError;
pub use firmware::{AllocateType, BootServices, LoadedImage, SYSTEM_TABLE_SIGNATURE};
pub use release::{Release, ReleaseStack, Resource};
