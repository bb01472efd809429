use efi_ddb::DdbError;
use uefi::Status;

/// Everything that can go wrong before (and including) `ExitBootServices`.
///
/// Every variant is fatal to the boot except [`StubError::BlobBufferTooSmall`]
/// while it is still inside the blob growth loop.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum StubError {
    #[error("firmware unavailable: {0}")]
    FirmwareUnavailable(&'static str),
    #[error("{what} failed: {status:?}")]
    Firmware { what: &'static str, status: Status },
    #[error("failed to allocate {pages} pages: {status:?}")]
    AllocationFailed { pages: u64, status: Status },
    /// The image or a blob ended up outside of what the OS can reach early.
    #[error("no low memory available for {what} (placed at {address:#x})")]
    RelocationOutOfRange { what: &'static str, address: u64 },
    #[error("no device tree given on the command line")]
    BlobMissing,
    #[error("invalid device tree header: {0}")]
    BlobHeaderInvalid(DdbError),
    #[error("incomplete device tree: {declared} bytes declared, {available} loaded")]
    BlobIncomplete { declared: usize, available: usize },
    #[error("device tree buffer too small: {required} bytes required, {capacity} available")]
    BlobBufferTooSmall { required: usize, capacity: usize },
    #[error("unable to construct new device tree: {0}")]
    BlobWrite(DdbError),
    #[error("exit boot services failed: {0:?}")]
    ExitRejected(Status),
}

impl StubError {
    /// Classify an error raised while validating a loaded blob.
    pub(crate) fn from_source_blob(err: DdbError) -> Self {
        match err {
            DdbError::Incomplete {
                declared,
                available,
            } => Self::BlobIncomplete {
                declared,
                available,
            },
            other => Self::BlobHeaderInvalid(other),
        }
    }

    /// Classify an error raised while writing the new blob.
    pub(crate) fn from_blob_write(err: DdbError) -> Self {
        match err {
            DdbError::NoSpace { required, capacity } => {
                Self::BlobBufferTooSmall { required, capacity }
            }
            other => Self::BlobWrite(other),
        }
    }
}

impl From<StubError> for Status {
    fn from(value: StubError) -> Self {
        match value {
            StubError::FirmwareUnavailable(_) => Status::UNSUPPORTED,
            StubError::Firmware { status, .. }
            | StubError::AllocationFailed { status, .. }
            | StubError::ExitRejected(status) => status,
            StubError::RelocationOutOfRange { .. } => Status::OUT_OF_RESOURCES,
            StubError::BlobMissing => Status::NOT_FOUND,
            StubError::BlobHeaderInvalid(_)
            | StubError::BlobIncomplete { .. }
            | StubError::BlobWrite(_) => Status::LOAD_ERROR,
            StubError::BlobBufferTooSmall { .. } => Status::BUFFER_TOO_SMALL,
        }
    }
}
