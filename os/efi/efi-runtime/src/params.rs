use efi_addresses::PhysicalAddress;
use efi_ddb::{DeviceTree, Node};
use efi_memmap::handoff::{DEFAULT_DESC_SIZE, DEFAULT_DESC_VERSION, EfiParams, props};
use efi_memmap::MemoryMapView;
use log::{debug, info, warn};

/// Firmware parameters found in `/chosen`, with the descriptor bytes still
/// borrowed from the blob.
#[derive(Debug, Clone)]
pub struct BlobParams<'t> {
    pub params: EfiParams,
    pub map: MemoryMapView<'t>,
}

/// Read the firmware parameters the boot stub left in `/chosen` (or
/// `chosen@0`).
///
/// The system table and the map itself are required. The descriptor stride
/// and version fall back to 48 and 1, and the map size falls back to the
/// length of the embedded map. Returns `None` when the blob did not come
/// from a firmware boot.
#[must_use]
pub fn find_efi_params(tree: &DeviceTree) -> Option<BlobParams<'_>> {
    let Some(chosen) = tree.chosen() else {
        info!("No /chosen node found; booted without firmware");
        return None;
    };

    let system_table = required(chosen, props::SYSTEM_TABLE)?;
    let mmap = chosen.property(props::MMAP).map(|p| p.value.as_slice());
    let Some(mmap) = mmap.filter(|m| !m.is_empty()) else {
        info!("No {} property in /chosen", props::MMAP);
        return None;
    };

    let mmap_size = optional(chosen, props::MMAP_SIZE)
        .and_then(|s| usize::try_from(s).ok())
        .unwrap_or(mmap.len());
    if mmap_size > mmap.len() {
        warn!(
            "{} of {mmap_size} bytes exceeds the {} bytes present",
            props::MMAP_SIZE,
            mmap.len()
        );
        return None;
    }

    let desc_size = optional(chosen, props::MMAP_DESC_SIZE)
        .and_then(|s| usize::try_from(s).ok())
        .unwrap_or(DEFAULT_DESC_SIZE);
    let desc_version = optional(chosen, props::MMAP_DESC_VER)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(DEFAULT_DESC_VERSION);

    let map = match MemoryMapView::new(&mmap[..mmap_size], desc_size, desc_version) {
        Ok(map) => map,
        Err(e) => {
            warn!("Unusable firmware memory map: {e}");
            return None;
        }
    };

    let params = EfiParams {
        system_table: PhysicalAddress::new(system_table),
        mmap_start: optional(chosen, props::MMAP_START).map(PhysicalAddress::new),
        mmap_size,
        desc_size,
        desc_version,
    };
    debug!("  System table: {}", params.system_table);
    debug!("  MemMap size: {mmap_size:#x} (desc size {desc_size}, ver {desc_version})");
    Some(BlobParams { params, map })
}

fn required(node: &Node, name: &str) -> Option<u64> {
    let value = optional(node, name);
    if value.is_none() {
        info!("No {name} property in /chosen");
    }
    value
}

fn optional(node: &Node, name: &str) -> Option<u64> {
    node.property(name).and_then(efi_ddb::Property::as_cells)
}
