//! Firmware backend for the real thing, built only for UEFI targets.

#![allow(unsafe_code)]

#[cfg(feature = "uefi-alloc")]
mod allocator;
mod boot_services;
mod file_system;

pub use boot_services::UefiBootServices;

use crate::logger::{Console, StubLogger};
use crate::{EFI_STUB_ERROR, StubConfig};
use core::ffi::c_void;
use core::fmt;
use log::LevelFilter;

/// Prints through the firmware's simple text output protocol.
pub struct FirmwareConsole;

impl Console for FirmwareConsole {
    fn write_fmt(&self, args: fmt::Arguments<'_>) {
        uefi::print!("{args}");
    }
}

pub static LOGGER: StubLogger<FirmwareConsole> = StubLogger::new(
    if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    },
    FirmwareConsole,
);

/// Called by the image header code with the firmware arguments.
///
/// Returns the address of the device tree to boot with, or all ones on
/// failure. The final image address is stored through `image_addr`.
///
/// # Safety
/// `image` and `system_table` must be the values firmware passed to the
/// image entry point, and boot services must still be running.
#[unsafe(no_mangle)]
pub unsafe extern "efiapi" fn efi_stub_entry(
    image: *mut c_void,
    system_table: *const c_void,
    image_addr: *mut u64,
) -> u64 {
    // SAFETY: provided by firmware.
    let Some(handle) = (unsafe { uefi::Handle::from_ptr(image) }) else {
        return EFI_STUB_ERROR;
    };
    if system_table.is_null() {
        return EFI_STUB_ERROR;
    }
    // SAFETY: non-null and provided by firmware.
    unsafe { uefi::table::set_system_table(system_table.cast()) };
    uefi::boot::set_image_handle(handle);

    // Somebody else may have installed a logger already; keep theirs.
    let _ = LOGGER.init();
    log::info!("Booting Linux Kernel...");

    let mut fw = UefiBootServices::new(&LOGGER);
    // SAFETY: the caller passes a valid location or null.
    let image_addr = unsafe { image_addr.as_mut() };
    crate::efi_entry(&mut fw, &StubConfig::native(), image_addr)
}
