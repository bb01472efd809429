use super::FirmwareConsole;
use super::file_system::load_file;
use crate::logger::StubLogger;
use crate::{AllocateType, BootServices, LoadedImage};
use alloc::vec;
use alloc::vec::Vec;
use core::ptr::NonNull;
use efi_addresses::{PhysicalAddress, PhysicalRange};
use efi_memmap::{MapKey, MemoryMap, MemoryMapMeta, MemoryType};
use uefi::proto::loaded_image::LoadedImage as LoadedImageProtocol;
use uefi::{Status, boot};
use uefi_raw::table::boot::BootServices as RawBootServices;
use uefi_raw::table::system::SystemTable as RawSystemTable;

/// Descriptors of headroom in every captured map buffer, so a later
/// recapture into the same buffer does not need to allocate.
const EXTRA_DESCS: usize = 32;

/// [`BootServices`] on top of the running firmware.
///
/// After a successful `ExitBootServices` every call fails with
/// `UNSUPPORTED` instead of reaching firmware.
pub struct UefiBootServices {
    logger: &'static StubLogger<FirmwareConsole>,
    exited: bool,
}

impl UefiBootServices {
    #[must_use]
    pub const fn new(logger: &'static StubLogger<FirmwareConsole>) -> Self {
        Self {
            logger,
            exited: false,
        }
    }

    fn system_table_ptr() -> Option<NonNull<RawSystemTable>> {
        uefi::table::system_table_raw()
    }

    fn raw_boot_services(&self) -> Result<*mut RawBootServices, Status> {
        if self.exited {
            return Err(Status::UNSUPPORTED);
        }
        let st = Self::system_table_ptr().ok_or(Status::NOT_READY)?;
        // SAFETY: the system table stays valid for the lifetime of the image.
        let bs = unsafe { st.as_ref().boot_services };
        if bs.is_null() {
            Err(Status::UNSUPPORTED)
        } else {
            Ok(bs)
        }
    }

    /// `GetMemoryMap` into `buffer`. On `BUFFER_TOO_SMALL` the required
    /// size is returned alongside the status.
    fn capture(&self, buffer: &mut [u8]) -> Result<MemoryMapMeta, (Status, usize)> {
        let bs = self.raw_boot_services().map_err(|s| (s, 0))?;
        let mut map_size = buffer.len();
        let mut key = 0usize;
        let mut desc_size = 0usize;
        let mut desc_version = 0u32;
        // SAFETY: all out-pointers are valid; the buffer is `map_size` bytes.
        let status = unsafe {
            ((*bs).get_memory_map)(
                &raw mut map_size,
                buffer.as_mut_ptr().cast(),
                &raw mut key,
                &raw mut desc_size,
                &raw mut desc_version,
            )
        };
        if status.is_success() {
            Ok(MemoryMapMeta {
                map_size,
                desc_size,
                desc_version,
                key: MapKey(key),
            })
        } else {
            Err((status, map_size + EXTRA_DESCS * desc_size.max(1)))
        }
    }
}

impl BootServices for UefiBootServices {
    fn system_table(&self) -> PhysicalAddress {
        Self::system_table_ptr().map_or(PhysicalAddress::zero(), |st| {
            PhysicalAddress::from_ptr(st.as_ptr().cast_const())
        })
    }

    fn system_table_signature(&self) -> u64 {
        // SAFETY: the system table stays valid for the lifetime of the image.
        Self::system_table_ptr().map_or(0, |st| unsafe { st.as_ref().header.signature })
    }

    fn loaded_image(&mut self) -> Result<LoadedImage, Status> {
        if self.exited {
            return Err(Status::UNSUPPORTED);
        }
        let image = boot::open_protocol_exclusive::<LoadedImageProtocol>(boot::image_handle())
            .map_err(|e| e.status())?;
        let (base, size) = image.info();
        let load_options = image
            .load_options_as_bytes()
            .map(|bytes| {
                bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect()
            })
            .unwrap_or_default();
        Ok(LoadedImage {
            base: PhysicalAddress::from_ptr(base),
            size,
            bss_size: 0,
            load_options,
        })
    }

    fn allocate_pages(
        &mut self,
        ty: AllocateType,
        memory_type: MemoryType,
        pages: u64,
    ) -> Result<PhysicalAddress, Status> {
        if self.exited {
            return Err(Status::UNSUPPORTED);
        }
        let ty = match ty {
            AllocateType::AnyPages => boot::AllocateType::AnyPages,
            AllocateType::MaxAddress(max) => boot::AllocateType::MaxAddress(max.as_u64()),
            AllocateType::Address(at) => boot::AllocateType::Address(at.as_u64()),
        };
        let count = usize::try_from(pages).map_err(|_| Status::INVALID_PARAMETER)?;
        let ptr = boot::allocate_pages(ty, memory_type, count)
            .map_err(|e| e.status())?;
        Ok(PhysicalAddress::from_ptr(ptr.as_ptr().cast_const()))
    }

    fn free_pages(&mut self, base: PhysicalAddress, pages: u64) -> Result<(), Status> {
        if self.exited {
            return Err(Status::UNSUPPORTED);
        }
        let ptr = NonNull::new(base.as_mut_ptr::<u8>()).ok_or(Status::INVALID_PARAMETER)?;
        let count = usize::try_from(pages).map_err(|_| Status::INVALID_PARAMETER)?;
        // SAFETY: callers only free ranges they allocated.
        unsafe { boot::free_pages(ptr, count) }.map_err(|e| e.status())
    }

    fn memory_map(&mut self) -> Result<MemoryMap, Status> {
        let mut size = match self.capture(&mut []) {
            Err((Status::BUFFER_TOO_SMALL, needed)) => needed,
            Err((status, _)) => return Err(status),
            Ok(_) => return Err(Status::UNSUPPORTED),
        };
        loop {
            // Allocating the buffer may itself add a descriptor.
            let mut buffer = vec![0u8; size];
            match self.capture(&mut buffer) {
                Ok(meta) => {
                    return MemoryMap::from_raw(buffer, meta).map_err(|_| Status::LOAD_ERROR);
                }
                Err((Status::BUFFER_TOO_SMALL, needed)) => size = needed,
                Err((status, _)) => return Err(status),
            }
        }
    }

    fn refresh_memory_map(&mut self, map: &mut MemoryMap) -> Result<(), Status> {
        let meta = self.capture(map.buffer_mut()).map_err(|(status, _)| status)?;
        map.set_meta(meta).map_err(|_| Status::BUFFER_TOO_SMALL)
    }

    fn exit_boot_services(&mut self, key: MapKey) -> Result<(), Status> {
        let bs = self.raw_boot_services()?;
        let image = boot::image_handle().as_ptr();
        // SAFETY: the handle is ours; firmware validates the key.
        let status = unsafe { ((*bs).exit_boot_services)(image, key.0) };
        if status.is_success() {
            self.exited = true;
            self.logger.exit_boot_services();
            #[cfg(feature = "uefi-alloc")]
            super::allocator::retire();
            Ok(())
        } else {
            Err(status)
        }
    }

    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, Status> {
        if self.exited {
            return Err(Status::UNSUPPORTED);
        }
        load_file(path)
    }

    fn memory_mut(&mut self, range: PhysicalRange) -> Option<&mut [u8]> {
        if range.base().is_zero() {
            return None;
        }
        let len = usize::try_from(range.size()).ok()?;
        // SAFETY: boot-time memory is identity mapped and callers only pass
        // ranges they own.
        Some(unsafe { core::slice::from_raw_parts_mut(range.base().as_mut_ptr::<u8>(), len) })
    }

    fn copy_mem(
        &mut self,
        dst: PhysicalAddress,
        src: PhysicalAddress,
        len: u64,
    ) -> Result<(), Status> {
        let bs = self.raw_boot_services()?;
        let len = usize::try_from(len).map_err(|_| Status::INVALID_PARAMETER)?;
        // SAFETY: identity mapped; `CopyMem` handles overlapping ranges.
        unsafe {
            ((*bs).copy_mem)(dst.as_mut_ptr::<u8>(), src.as_mut_ptr::<u8>().cast_const(), len);
        }
        Ok(())
    }
}
