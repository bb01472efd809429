//! Typed references to the firmware runtime services.

use efi_addresses::VirtualHandle;

/// `EFI_SYSTEM_TABLE`.
pub enum SystemTable {}

/// `EFI_RUNTIME_SERVICES`.
pub enum RuntimeServicesTable {}

/// Entry point of `GetVariable`.
pub enum GetVariable {}

/// Entry point of `GetNextVariableName`.
pub enum GetNextVariableName {}

/// Entry point of `SetVariable`.
pub enum SetVariable {}

/// Variable services, bound through the virtual mapping after a successful
/// `SetVirtualAddressMap`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RuntimeServices {
    pub table: VirtualHandle<RuntimeServicesTable>,
    pub get_variable: VirtualHandle<GetVariable>,
    pub get_next_variable_name: VirtualHandle<GetNextVariableName>,
    pub set_variable: VirtualHandle<SetVariable>,
}
