use efi_memmap::MemoryMapError;
use uefi::Status;

/// Failures of the runtime side of the hand-off.
///
/// None of these stop the kernel from booting; they only mean that firmware
/// runtime services stay unavailable.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("no firmware parameters found in the device tree")]
    NoParameters,
    #[error("memory map located above 4GB at {0:#x} - unusable")]
    MemoryMapUnusable(u64),
    #[error("invalid memory map: {0}")]
    MemoryMap(#[from] MemoryMapError),
    #[error("unable to read the system table at {0:#x}")]
    SystemTableUnreadable(u64),
    #[error("system table signature incorrect: {0:#018x}")]
    SystemTableSignature(u64),
    #[error("firmware was not initialized")]
    NotBooted,
    #[error("failed to remap the region at {0:#x}")]
    RemapPartialFailure(u64),
    #[error("failed to identity map the region at {0:#x}")]
    IdentityMapFailed(u64),
    #[error("unable to read the runtime services table at {0:#x}")]
    RuntimeTableUnreadable(u64),
    #[error("SetVirtualAddressMap rejected: {0:?}")]
    AddressSwitchRejected(Status),
    #[error("SetVirtualAddressMap was already attempted")]
    AlreadyAttempted,
}
