//! # EFI Runtime Services Hand-off
//!
//! The kernel side of the firmware hand-off. It picks the memory map and the
//! system table up from the device tree the boot stub wrote, keeps firmware
//! regions away from the kernel allocator, and later moves runtime services
//! over to the kernel's virtual addresses.
//!
//! ```text
//! blob ──► efi_init ──► reserve_regions        (early, physical)
//!                             ┆
//!                   kernel page tables up
//!                             ┆
//!              remap_all ──► enter_virtual_mode (once)
//! ```
//!
//! All state lives in a [`BootContext`] owned by the boot CPU. What has been
//! established so far is recorded in its [`FacilityFlags`].
//!
//! The kernel plugs in through traits: [`EarlyMemory`] and [`Reserver`] for
//! the early phase, [`RegionMapper`], [`CpuState`] and [`RuntimeFirmware`]
//! for the switch.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod context;
mod error;
pub mod facility;
pub mod init;
pub mod params;
pub mod remap;
pub mod services;
pub mod switch;
pub mod tables;

pub use context::{BootContext, ConfigTable, RuntimeProfile, UEFI_DEBUG_FLAG, has_flag};
pub use error::RuntimeError;
pub use facility::{Facility, FacilityFlags};
pub use init::{EarlyMemory, Reserver, efi_init, reserve_regions};
pub use params::{BlobParams, find_efi_params};
pub use remap::{RegionMapper, RuntimeMap, remap_all};
pub use services::RuntimeServices;
pub use switch::{CpuState, IrqGuard, RuntimeFirmware, SwitchState, enter_virtual_mode};
