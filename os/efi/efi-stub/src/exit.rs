use crate::blob::{BlobMutator, PatchedBlob};
use crate::{BootServices, StubError};
use log::warn;
use uefi::Status;

/// Exit boot services with the key of the map that is embedded in `blob`.
///
/// Firmware may change the memory map behind our back (timer events,
/// driver callbacks), in which case it rejects the key with
/// `INVALID_PARAMETER`. The map is then recaptured into the same buffer,
/// the blob rewritten in place and the exit retried exactly once.
///
/// Returns the number of retries that were needed (0 or 1). After `Ok`
/// boot services are gone and `fw` must not be used again.
///
/// # Errors
/// [`StubError::ExitRejected`] on any other status or a second rejection,
/// and the errors of [`BlobMutator::recapture`].
pub fn finalize<F: BootServices>(
    fw: &mut F,
    mutator: &BlobMutator<'_>,
    blob: &mut PatchedBlob,
) -> Result<u32, StubError> {
    match fw.exit_boot_services(blob.map.key()) {
        Ok(()) => return Ok(0),
        Err(Status::INVALID_PARAMETER) => {}
        Err(status) => return Err(StubError::ExitRejected(status)),
    }

    mutator.recapture(fw, blob)?;
    match fw.exit_boot_services(blob.map.key()) {
        Ok(()) => Ok(1),
        Err(status) => {
            warn!("exit boot services rejected the refreshed memory map: {status:?}");
            Err(StubError::ExitRejected(status))
        }
    }
}
