use crate::context::BootContext;
use crate::error::RuntimeError;
use crate::facility::Facility;
use crate::switch::SwitchState;
use alloc::vec::Vec;
use efi_addresses::{PageSize, PhysicalAddress, PhysicalRange, VirtualAddress, efi_to_native};
use efi_memmap::{
    DescriptorExt, Entries, MapKey, MemoryDescriptor, MemoryMap, MemoryMapMeta, MemoryMapView,
    Retention, RetentionPolicy, read_descriptor, write_descriptor,
};
use log::{debug, warn};

/// The kernel's side of mapping firmware regions.
pub trait RegionMapper {
    /// The kernel's native page size; regions are rounded out to it.
    type Page: PageSize;

    /// Whether `range` is RAM already covered by the kernel's linear map.
    fn is_linear(&self, range: PhysicalRange) -> bool;

    /// Linear-map address of `phys`. Only called when [`is_linear`](Self::is_linear) agreed.
    fn linear_address(&self, phys: PhysicalAddress) -> VirtualAddress;

    /// Map `range` as normal cacheable memory.
    fn map_cached(&mut self, range: PhysicalRange) -> Option<VirtualAddress>;

    /// Map `range` as device memory.
    fn map_device(&mut self, range: PhysicalRange) -> Option<VirtualAddress>;
}

/// The table handed to `SetVirtualAddressMap`: every preserved descriptor,
/// in firmware order and with the firmware's stride, with `virt_start`
/// filled in.
#[derive(Debug)]
pub struct RuntimeMap {
    map: MemoryMap,
}

impl RuntimeMap {
    #[must_use]
    pub fn view(&self) -> MemoryMapView<'_> {
        self.map.view()
    }

    #[must_use]
    pub fn entries(&self) -> Entries<'_> {
        self.map.entries()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.map.as_bytes()
    }

    #[must_use]
    pub const fn map_size(&self) -> usize {
        self.map.meta().map_size
    }

    #[must_use]
    pub const fn desc_size(&self) -> usize {
        self.map.meta().desc_size
    }

    #[must_use]
    pub const fn desc_version(&self) -> u32 {
        self.map.meta().desc_version
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.map.meta().entry_count()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Translate `phys` through the new mappings.
    ///
    /// `None` if no remapped region contains it.
    #[must_use]
    pub fn lookup_mapped_addr(&self, phys: PhysicalAddress) -> Option<VirtualAddress> {
        let desc = self.view().find(phys)?;
        if desc.virt_start == 0 {
            return None;
        }
        desc.virt().checked_add(phys.offset_from(desc.start())?)
    }

    /// Regions the firmware call needs identity mapped: everything except MMIO.
    pub fn identity_regions(&self) -> impl Iterator<Item = PhysicalRange> + '_ {
        self.entries()
            .filter(|d| !d.is_mmio())
            .map(|d| d.range())
    }
}

/// Give every preserved region a mapping in the kernel's address space.
///
/// Write-back regions reuse the linear map when they are part of it and are
/// mapped cached otherwise; everything else is mapped as device memory.
/// The system table and the runtime-services table are then looked up
/// through the new table.
///
/// # Errors
/// - [`RuntimeError::NotBooted`] without a memory map.
/// - [`RuntimeError::AlreadyAttempted`] once the address-map switch ran.
/// - [`RuntimeError::RemapPartialFailure`] if any region could not be mapped.
///   The switch then counts as attempted and is [`SwitchState::Disabled`],
///   so runtime services stay unavailable and nothing is retried.
pub fn remap_all<'c, M: RegionMapper>(
    ctx: &'c mut BootContext,
    mapper: &mut M,
) -> Result<&'c RuntimeMap, RuntimeError> {
    if ctx.enabled(Facility::VirtualMapAttempted) {
        return Err(RuntimeError::AlreadyAttempted);
    }
    let Some(map) = ctx.boot_map() else {
        return Err(RuntimeError::NotBooted);
    };

    let stride = map.desc_size();
    let desc_version = map.desc_version();
    let table = match build_table(map, ctx.policy, ctx.debug, mapper) {
        Ok(table) => table,
        Err(phys) => {
            ctx.set(Facility::VirtualMapAttempted);
            ctx.switch = SwitchState::Disabled;
            return Err(RuntimeError::RemapPartialFailure(phys.as_u64()));
        }
    };

    let meta = MemoryMapMeta {
        map_size: table.len(),
        desc_size: stride,
        desc_version,
        key: MapKey(0),
    };
    let runtime_map = RuntimeMap {
        map: MemoryMap::from_raw(table, meta)?,
    };

    ctx.system_table_va = ctx
        .params
        .as_ref()
        .and_then(|p| runtime_map.lookup_mapped_addr(p.system_table));
    if ctx.system_table_va.is_some() {
        ctx.set(Facility::SystemTables);
    }
    ctx.runtime_table_va = ctx
        .runtime_table
        .and_then(|rt| runtime_map.lookup_mapped_addr(rt.addr()));

    Ok(ctx.runtime_map.insert(runtime_map))
}

/// Copy every preserved record, stride tail included, with `virt_start`
/// filled in. Fails with the first region that could not be mapped.
fn build_table<M: RegionMapper>(
    map: MemoryMapView<'_>,
    policy: RetentionPolicy,
    debug: bool,
    mapper: &mut M,
) -> Result<Vec<u8>, PhysicalAddress> {
    let mut table = Vec::new();
    for raw in map.as_bytes().chunks_exact(map.desc_size()) {
        let Some(mut desc) = read_descriptor(raw) else {
            break;
        };
        if desc.page_count == 0 {
            break;
        }
        if policy.classify(&desc) == Retention::Discard {
            continue;
        }

        let Some(va) = remap_region(mapper, &desc) else {
            warn!(
                "Failed to remap EFI region {} ({:?}) - runtime services will not be available",
                desc.start(),
                desc.ty
            );
            return Err(desc.start());
        };
        desc.virt_start = va.as_u64();
        if debug {
            debug!("  EFI remap {} => {va} ({:?})", desc.start(), desc.ty);
        }

        let at = table.len();
        table.extend_from_slice(raw);
        write_descriptor(&desc, &mut table[at..]);
    }
    Ok(table)
}

fn remap_region<M: RegionMapper>(
    mapper: &mut M,
    desc: &MemoryDescriptor,
) -> Option<VirtualAddress> {
    let (base, pages) = efi_to_native::<M::Page>(desc.start(), desc.page_count);
    let range = PhysicalRange::new(base, pages << M::Page::SHIFT);
    let va = if desc.is_write_back() {
        if mapper.is_linear(range) {
            Some(mapper.linear_address(base))
        } else {
            mapper.map_cached(range)
        }
    } else {
        mapper.map_device(range)
    }?;
    va.checked_add(desc.start().offset_from(base)?)
}
