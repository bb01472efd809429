use alloc::vec;
use alloc::vec::Vec;
use log::debug;
use uefi::proto::media::file::{File, FileAttribute, FileMode, RegularFile};
use uefi::{CString16, Status, boot};

/// Read a whole file from the volume the stub was loaded from.
///
/// # Errors
/// The status of the first failing file protocol call.
pub fn load_file(path: &str) -> Result<Vec<u8>, Status> {
    let path = CString16::try_from(path).map_err(|_| Status::INVALID_PARAMETER)?;

    let mut sfs = boot::get_image_file_system(boot::image_handle()).map_err(|e| {
        debug!("failed to get file system: {e:?}");
        e.status()
    })?;
    let mut volume = sfs.open_volume().map_err(|e| {
        debug!("failed to open root directory: {e:?}");
        e.status()
    })?;
    let handle = volume
        .open(&path, FileMode::Read, FileAttribute::empty())
        .map_err(|e| {
            debug!("failed to open {path}: {e:?}");
            e.status()
        })?;
    let Some(mut file) = handle.into_regular_file() else {
        debug!("{path} is not a file");
        return Err(Status::NOT_FOUND);
    };

    file.set_position(RegularFile::END_OF_FILE)
        .map_err(|e| e.status())?;
    let size = file.get_position().map_err(|e| e.status())?;
    file.set_position(0).map_err(|e| e.status())?;
    let size = usize::try_from(size).map_err(|_| Status::BAD_BUFFER_SIZE)?;

    let mut buf = vec![0u8; size];
    let read = file.read(&mut buf).map_err(|e| e.status())?;
    if read != size {
        debug!("read {read} bytes of {path}, expected {size}");
        return Err(Status::END_OF_FILE);
    }
    Ok(buf)
}
