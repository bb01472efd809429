use crate::cmdline::{option_values, to_firmware_path};
use crate::config::EFI_PAGE_SIZE;
use crate::{BootServices, StubError, pages};
use alloc::vec::Vec;
use efi_addresses::{PhysicalAddress, PhysicalRange};
use log::info;

/// Load every file named by `option` on the command line (e.g. all
/// `initrd=` entries) back to back into one allocation ending below `max`.
///
/// Returns `Ok(None)` if the option is absent. On error nothing stays
/// allocated.
///
/// # Errors
/// [`StubError::Firmware`] if a file cannot be read, or an allocation error.
pub fn load_cmdline_files<F: BootServices>(
    fw: &mut F,
    cmdline: &str,
    option: &str,
    max: PhysicalAddress,
) -> Result<Option<PhysicalRange>, StubError> {
    let mut contents: Vec<Vec<u8>> = Vec::new();
    for path in option_values(cmdline, option) {
        let path = to_firmware_path(path);
        info!("Loading file: {path}");
        let data = fw.read_file(&path).map_err(|status| StubError::Firmware {
            what: "reading a file named on the command line",
            status,
        })?;
        contents.push(data);
    }
    if contents.is_empty() {
        return Ok(None);
    }

    let total: u64 = contents.iter().map(|c| c.len() as u64).sum();
    if total == 0 {
        return Ok(None);
    }

    let base = pages::high_alloc(fw, total, EFI_PAGE_SIZE, max)?;
    let range = PhysicalRange::new(base, total);
    let Some(target) = fw.memory_mut(range) else {
        pages::free(fw, range);
        return Err(StubError::FirmwareUnavailable("allocated memory not accessible"));
    };

    let mut offset = 0usize;
    for data in &contents {
        target[offset..offset + data.len()].copy_from_slice(data);
        offset += data.len();
    }
    Ok(Some(range))
}
