//! The one-shot switch of firmware runtime services to virtual addressing.
//!
//! ```text
//!   Idle ──► Prologue ──► FirmwareCall ──► Epilogue ──► Enabled
//!    │          │                             │
//!    └──────────┴─────────────────────────────┴───────► Disabled
//! ```
//!
//! The prologue masks interrupts, identity maps the runtime regions, and
//! turns the caches off. `SetVirtualAddressMap` then runs through its
//! physical entry point. The epilogue restores the kernel's tables and
//! caches before interrupts come back on. Whatever the outcome, the switch
//! is never attempted again.

#![allow(unsafe_code)]

use crate::context::BootContext;
use crate::error::RuntimeError;
use crate::facility::Facility;
use crate::remap::{RegionMapper, remap_all};
use crate::services::RuntimeServices;
use crate::tables::TableLayout;
use core::ops::{Deref, DerefMut};
use efi_addresses::{PhysicalAddress, PhysicalRange, VirtualAddress, VirtualHandle};
use log::{error, info, warn};
use uefi::Status;

/// Where the switch protocol stands.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SwitchState {
    Idle,
    Prologue,
    FirmwareCall,
    Epilogue,
    /// Firmware accepted the new map.
    Enabled,
    /// The switch failed; runtime services stay unavailable.
    Disabled,
}

/// The CPU operations the switch is choreographed from.
pub trait CpuState {
    /// Mask interrupts and report whether they were enabled before.
    fn disable_interrupts(&mut self) -> bool;

    /// Undo [`disable_interrupts`](Self::disable_interrupts).
    fn restore_interrupts(&mut self, were_enabled: bool);

    /// Add an identity mapping of `range` to the transient tables.
    fn identity_map(&mut self, range: PhysicalRange) -> bool;

    /// Install the transient identity tables.
    fn switch_to_identity(&mut self);

    fn flush_tlb(&mut self);

    /// Clean and invalidate all caches, then turn them off.
    fn flush_and_disable_caches(&mut self);

    /// Reinstall the kernel's own translation tables.
    fn restore_os_tables(&mut self);

    fn flush_branch_predictor(&mut self);

    fn enable_caches(&mut self);
}

/// Masks interrupts for as long as it lives.
///
/// Dereferences to the wrapped [`CpuState`] so that the rest of the
/// choreography runs through the guard.
pub struct IrqGuard<'a, C: CpuState> {
    cpu: &'a mut C,
    were_enabled: bool,
}

impl<'a, C: CpuState> IrqGuard<'a, C> {
    pub fn new(cpu: &'a mut C) -> Self {
        let were_enabled = cpu.disable_interrupts();
        Self { cpu, were_enabled }
    }
}

impl<C: CpuState> Deref for IrqGuard<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.cpu
    }
}

impl<C: CpuState> DerefMut for IrqGuard<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.cpu
    }
}

impl<C: CpuState> Drop for IrqGuard<'_, C> {
    fn drop(&mut self) {
        self.cpu.restore_interrupts(self.were_enabled);
    }
}

/// Firmware runtime services as seen from the kernel.
pub trait RuntimeFirmware {
    /// Call `SetVirtualAddressMap` at its physical entry point `entry`.
    ///
    /// # Safety
    /// The caller must have masked interrupts, identity mapped every runtime
    /// region and disabled the caches. The call is allowed at most once.
    unsafe fn set_virtual_address_map(
        &mut self,
        entry: PhysicalAddress,
        map_size: usize,
        desc_size: usize,
        desc_version: u32,
        map: &[u8],
    ) -> Status;

    /// Read firmware memory by physical address.
    fn read_physical(&self, phys: PhysicalAddress, buf: &mut [u8]) -> bool;

    /// Read firmware memory through the kernel's mapping.
    fn read_virtual(&self, va: VirtualAddress, buf: &mut [u8]) -> bool;
}

/// Switch the firmware runtime services to the kernel's virtual addresses.
///
/// Remaps the preserved regions unless [`remap_all`] already did, then runs
/// the switch protocol. On success, and when the runtime-services table has
/// a mapping, the variable services are bound and
/// [`Facility::RuntimeServices`] is set.
///
/// # Errors
/// - [`RuntimeError::AlreadyAttempted`] on every call after the first.
/// - [`RuntimeError::NotBooted`] without firmware; nothing is attempted.
/// - Remapping, identity mapping or the firmware call failing; the state
///   then is [`SwitchState::Disabled`].
pub fn enter_virtual_mode<M, C, F>(
    ctx: &mut BootContext,
    mapper: &mut M,
    cpu: &mut C,
    firmware: &mut F,
) -> Result<(), RuntimeError>
where
    M: RegionMapper,
    C: CpuState,
    F: RuntimeFirmware,
{
    if ctx.switch != SwitchState::Idle || ctx.enabled(Facility::VirtualMapAttempted) {
        warn!("EFI virtual address map was already set up");
        return Err(RuntimeError::AlreadyAttempted);
    }
    if !ctx.enabled(Facility::Boot) {
        info!("EFI services will not be available");
        return Err(RuntimeError::NotBooted);
    }

    let result = switch(ctx, mapper, cpu, firmware);
    ctx.set(Facility::VirtualMapAttempted);
    match result {
        Ok(()) => ctx.switch = SwitchState::Enabled,
        Err(ref e) => {
            warn!("Unable to switch EFI into virtual mode: {e}");
            ctx.switch = SwitchState::Disabled;
        }
    }
    result?;

    let Some(table) = ctx.runtime_table_va else {
        warn!("EFI runtime services table has no virtual mapping");
        return Ok(());
    };
    match bind_services(&ctx.profile.layout, table, firmware) {
        Some(services) => {
            ctx.runtime = Some(services);
            ctx.set(Facility::RuntimeServices);
        }
        None => warn!("Unable to read the EFI runtime services table at {table}"),
    }
    Ok(())
}

fn switch<M, C, F>(
    ctx: &mut BootContext,
    mapper: &mut M,
    cpu: &mut C,
    firmware: &mut F,
) -> Result<(), RuntimeError>
where
    M: RegionMapper,
    C: CpuState,
    F: RuntimeFirmware,
{
    if ctx.runtime_map.is_none() {
        remap_all(ctx, mapper)?;
    }

    let layout = ctx.profile.layout;
    let table = ctx.runtime_table.map_or(PhysicalAddress::zero(), |t| t.addr());
    let offset = layout.set_virtual_address_map();
    let Some(entry) = read_physical_pointer(&layout, table, offset, firmware) else {
        return Err(RuntimeError::RuntimeTableUnreadable(table.as_u64()));
    };

    let Some(map) = ctx.runtime_map.as_ref() else {
        return Err(RuntimeError::NotBooted);
    };

    ctx.switch = SwitchState::Prologue;
    let status = {
        let mut cpu = IrqGuard::new(cpu);

        let mut mapped = false;
        for region in map.identity_regions() {
            if !cpu.identity_map(region) {
                error!("Failed to identity map EFI region {}", region.base());
                return Err(RuntimeError::IdentityMapFailed(region.base().as_u64()));
            }
            mapped = true;
        }
        if mapped {
            cpu.switch_to_identity();
        }
        cpu.flush_tlb();
        cpu.flush_and_disable_caches();

        ctx.switch = SwitchState::FirmwareCall;
        // SAFETY: interrupts are masked, the runtime regions are identity
        // mapped, the caches are off, and the state machine runs once.
        let status = unsafe {
            firmware.set_virtual_address_map(
                PhysicalAddress::new(entry),
                map.map_size(),
                map.desc_size(),
                map.desc_version(),
                map.as_bytes(),
            )
        };

        ctx.switch = SwitchState::Epilogue;
        cpu.restore_os_tables();
        cpu.flush_branch_predictor();
        cpu.flush_tlb();
        cpu.enable_caches();
        status
    };

    if status != Status::SUCCESS {
        return Err(RuntimeError::AddressSwitchRejected(status));
    }
    info!("EFI virtual address map set");
    Ok(())
}

fn bind_services<F: RuntimeFirmware>(
    layout: &TableLayout,
    table: VirtualAddress,
    firmware: &F,
) -> Option<RuntimeServices> {
    let pointer = |offset| read_virtual_pointer(layout, table, offset, firmware);
    let get_variable = pointer(layout.get_variable())?;
    let get_next_variable_name = pointer(layout.get_next_variable_name())?;
    let set_variable = pointer(layout.set_variable())?;

    // SAFETY: firmware accepted the new map, and every address was read
    // through the kernel's mapping of the runtime-services table.
    unsafe {
        Some(RuntimeServices {
            table: VirtualHandle::new(table),
            get_variable: VirtualHandle::new(get_variable),
            get_next_variable_name: VirtualHandle::new(get_next_variable_name),
            set_variable: VirtualHandle::new(set_variable),
        })
    }
}

fn read_physical_pointer<F: RuntimeFirmware>(
    layout: &TableLayout,
    base: PhysicalAddress,
    offset: usize,
    firmware: &F,
) -> Option<u64> {
    let addr = base.checked_add(u64::try_from(offset).ok()?)?;
    let mut raw = [0u8; 8];
    let width = layout.width.bytes();
    if !firmware.read_physical(addr, &mut raw[..width]) {
        return None;
    }
    layout.read_pointer(&raw, 0)
}

fn read_virtual_pointer<F: RuntimeFirmware>(
    layout: &TableLayout,
    base: VirtualAddress,
    offset: usize,
    firmware: &F,
) -> Option<VirtualAddress> {
    let addr = base.checked_add(u64::try_from(offset).ok()?)?;
    let mut raw = [0u8; 8];
    let width = layout.width.bytes();
    if !firmware.read_virtual(addr, &mut raw[..width]) {
        return None;
    }
    layout.read_pointer(&raw, 0).map(VirtualAddress::new)
}
