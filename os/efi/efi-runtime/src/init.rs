//! Early firmware discovery: everything that happens between taking the
//! blob over from the boot stub and the kernel's memory manager coming up.

use crate::context::{BootContext, ConfigTable};
use crate::error::RuntimeError;
use crate::facility::Facility;
use crate::params::find_efi_params;
use crate::tables::{PointerWidth, SYSTEM_TABLE_SIGNATURE, TableLayout, read_u32, read_u64};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use efi_addresses::{PageSize, PhysicalAddress, PhysicalHandle, PhysicalRange, efi_to_native};
use efi_ddb::DeviceTree;
use efi_memmap::{DescriptorExt, MemoryType, Retention};
use log::{debug, error, info, warn};
use uefi::{Guid, guid};

/// Longest firmware vendor string read, in UCS-2 units.
const VENDOR_MAX: usize = 100;

/// Upper bound on configuration table entries accepted.
const CONFIG_TABLES_MAX: u64 = 256;

const KNOWN_TABLES: [(Guid, &str); 5] = [
    (guid!("8868e871-e4f1-11d3-bc22-0080c73c8881"), "ACPI 2.0"),
    (guid!("eb9d2d30-2d88-11d3-9a16-0090273fc14d"), "ACPI"),
    (guid!("f2fd1544-9794-4a2c-992e-e5bbcf20e394"), "SMBIOS 3.0"),
    (guid!("eb9d2d31-2d88-11d3-9a16-0090273fc14d"), "SMBIOS"),
    (guid!("b1b621d5-f19c-41a5-830b-d9152c69aae0"), "DTB"),
];

/// Temporary access to physical memory before the kernel maps it for good.
pub trait EarlyMemory {
    /// Copy `buf.len()` bytes starting at `phys` into `buf`.
    ///
    /// Returns `false` if the range cannot be mapped.
    fn read(&self, phys: PhysicalAddress, buf: &mut [u8]) -> bool;
}

/// The kernel's early physical memory bookkeeping.
pub trait Reserver {
    /// The kernel's native page size; reservations are rounded out to it.
    type Page: PageSize;

    /// Keep `range` away from the kernel allocator.
    fn reserve(&mut self, range: PhysicalRange);

    /// Hand `range` to the kernel allocator as usable memory.
    fn add_memory(&mut self, range: PhysicalRange);
}

struct SystemTableInfo {
    revision: u32,
    fw_vendor: u64,
    runtime: u64,
    nr_tables: u64,
    tables: u64,
}

/// Take over the firmware parameters from the blob and validate the
/// system table.
///
/// On success the context knows the memory map, the runtime-services table
/// (by physical address) and the configuration tables, and the
/// corresponding facility flags are set.
///
/// # Errors
/// - [`RuntimeError::NoParameters`] if the blob carries no firmware parameters.
/// - [`RuntimeError::MemoryMapUnusable`] if the profile cannot reach the map.
/// - [`RuntimeError::SystemTableUnreadable`] or
///   [`RuntimeError::SystemTableSignature`] for a bad system table.
pub fn efi_init(
    ctx: &mut BootContext,
    tree: &DeviceTree,
    memory: &impl EarlyMemory,
) -> Result<(), RuntimeError> {
    let Some(found) = find_efi_params(tree) else {
        return Err(RuntimeError::NoParameters);
    };

    if let (Some(limit), Some(start)) = (ctx.profile.map_limit, found.params.mmap_start)
        && start.as_u64() > limit
    {
        error!("EFI memory map located above 4GB at {start} - unusable");
        return Err(RuntimeError::MemoryMapUnusable(start.as_u64()));
    }

    if ctx.debug {
        info!("Processing EFI memory map:");
        found.map.dump();
    }

    let layout = ctx.profile.layout;
    let systab = read_system_table(&layout, found.params.system_table, memory)?;
    let (major, minor) = (systab.revision >> 16, systab.revision & 0xFFFF);
    if major < 2 {
        warn!("EFI system table version {major}.{minor:02}, expected 2.00 or greater");
    }
    let vendor = read_vendor(systab.fw_vendor, memory);
    info!(
        "EFI v{major}.{minor:02} by {}",
        vendor.as_deref().unwrap_or("unknown")
    );

    ctx.revision = systab.revision;
    ctx.runtime_table = Some(PhysicalHandle::new(PhysicalAddress::new(systab.runtime)));
    ctx.boot_map = found.map.as_bytes().to_vec();
    ctx.params = Some(found.params);

    ctx.set(Facility::Boot);
    ctx.set(Facility::MemMap);
    if layout.width == PointerWidth::Bits64 {
        ctx.set(Facility::Is64Bit);
    }

    match read_config_tables(&layout, &systab, memory) {
        Some(tables) => {
            ctx.config_tables = tables;
            ctx.set(Facility::ConfigTables);
        }
        None => warn!("Unable to read the EFI configuration tables"),
    }
    Ok(())
}

/// Split the firmware memory map between the firmware and the kernel.
///
/// Preserved regions are reserved (rounded out to native pages) unless they
/// are MMIO, which the kernel never treats as memory anyway. Discardable RAM
/// is handed to the kernel. Returns the number of preserved descriptors,
/// which is also the size of the table the remapper will build.
///
/// # Errors
/// [`RuntimeError::NotBooted`] if [`efi_init`] has not succeeded.
pub fn reserve_regions<R: Reserver>(
    ctx: &mut BootContext,
    reserver: &mut R,
) -> Result<usize, RuntimeError> {
    if !ctx.enabled(Facility::MemMap) {
        return Err(RuntimeError::NotBooted);
    }
    let Some(map) = ctx.boot_map() else {
        return Err(RuntimeError::NotBooted);
    };

    let mut preserved = 0;
    for desc in map.entries() {
        let retention = ctx.policy.classify(&desc);
        if ctx.debug {
            debug!(
                "  {}-{} {:?} {:?}",
                desc.start(),
                desc.range().end(),
                retention,
                desc.ty
            );
        }
        match retention {
            Retention::Preserve => {
                if !desc.is_mmio() {
                    let (base, pages) = efi_to_native::<R::Page>(desc.start(), desc.page_count);
                    reserver.reserve(PhysicalRange::new(base, pages << R::Page::SHIFT));
                }
                preserved += 1;
            }
            Retention::Discard if desc.is_write_back() && is_usable_ram(desc.ty) => {
                reserver.add_memory(desc.range());
            }
            Retention::Discard => {}
        }
    }

    ctx.preserved = preserved;
    Ok(preserved)
}

const fn is_usable_ram(ty: MemoryType) -> bool {
    matches!(
        ty,
        MemoryType::LOADER_CODE
            | MemoryType::LOADER_DATA
            | MemoryType::BOOT_SERVICES_CODE
            | MemoryType::BOOT_SERVICES_DATA
            | MemoryType::CONVENTIONAL
            | MemoryType::PERSISTENT_MEMORY
    )
}

fn read_system_table(
    layout: &TableLayout,
    addr: PhysicalAddress,
    memory: &impl EarlyMemory,
) -> Result<SystemTableInfo, RuntimeError> {
    let mut raw = vec![0u8; layout.system_table_size()];
    if !memory.read(addr, &mut raw) {
        error!("Unable to map the EFI system table at {addr}");
        return Err(RuntimeError::SystemTableUnreadable(addr.as_u64()));
    }

    let signature = read_u64(&raw, 0).unwrap_or_default();
    if signature != SYSTEM_TABLE_SIGNATURE {
        error!("System table signature incorrect: {signature:#018x}");
        return Err(RuntimeError::SystemTableSignature(signature));
    }

    let field = |offset| layout.read_pointer(&raw, offset).unwrap_or_default();
    Ok(SystemTableInfo {
        revision: read_u32(&raw, 8).unwrap_or_default(),
        fw_vendor: field(layout.fw_vendor()),
        runtime: field(layout.runtime_services()),
        nr_tables: field(layout.nr_tables()),
        tables: field(layout.config_tables()),
    })
}

fn read_vendor(addr: u64, memory: &impl EarlyMemory) -> Option<String> {
    if addr == 0 {
        return None;
    }
    let mut raw = [0u8; VENDOR_MAX * 2];
    if !memory.read(PhysicalAddress::new(addr), &mut raw) {
        return None;
    }
    let units = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0);
    Some(
        char::decode_utf16(units)
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect(),
    )
}

fn read_config_tables(
    layout: &TableLayout,
    systab: &SystemTableInfo,
    memory: &impl EarlyMemory,
) -> Option<Vec<ConfigTable>> {
    if systab.nr_tables == 0 {
        return Some(Vec::new());
    }
    if systab.tables == 0 || systab.nr_tables > CONFIG_TABLES_MAX {
        return None;
    }

    let entry = layout.config_entry_size();
    let count = usize::try_from(systab.nr_tables).ok()?;
    let mut raw = vec![0u8; count * entry];
    if !memory.read(PhysicalAddress::new(systab.tables), &mut raw) {
        return None;
    }

    let tables: Vec<ConfigTable> = raw
        .chunks_exact(entry)
        .filter_map(|e| {
            let guid: [u8; 16] = e.get(..16)?.try_into().ok()?;
            Some(ConfigTable {
                guid: Guid::from_bytes(guid),
                address: PhysicalAddress::new(layout.read_pointer(e, 16)?),
            })
        })
        .collect();

    for table in &tables {
        if let Some((_, name)) = KNOWN_TABLES.iter().find(|(g, _)| *g == table.guid) {
            info!("  {name}={}", table.address);
        }
    }
    Some(tables)
}
