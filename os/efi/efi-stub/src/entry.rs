//! The boot sequence, from the loaded image to exiting boot services.

use crate::blob::{self, BlobAdditions, BlobMutator, BlobPlacement};
use crate::cmdline::{to_ascii, to_firmware_path};
use crate::config::{DramBase, EFI_PAGE_SIZE, StubConfig};
use crate::exit::finalize;
use crate::files::load_cmdline_files;
use crate::relocate::{Constraints, RelocationRecord, relocate};
use crate::release::{Release, ReleaseStack, Resource};
use crate::{AllocateType, BootServices, LoadedImage, StubError, pages};
use alloc::string::String;
use alloc::vec::Vec;
use efi_addresses::{PhysicalAddress, PhysicalRange};
use efi_ddb::DeviceTree;
use efi_memmap::{MemoryMap, MemoryType};
use log::{debug, error, info};

/// Returned to the caller of the stub instead of a blob address on failure.
pub const EFI_STUB_ERROR: u64 = u64::MAX;

/// Command-line option naming the device tree file.
pub const DTB_OPTION: &str = "dtb=";

/// Command-line option naming initrd files; may repeat.
pub const INITRD_OPTION: &str = "initrd=";

/// Everything the OS is handed after boot services are gone.
#[derive(Debug)]
pub struct BootHandoff {
    /// The blob buffer; `blob_size` bytes of it are used.
    pub blob: PhysicalRange,
    pub blob_size: usize,
    pub image: RelocationRecord,
    pub initrd: Option<PhysicalRange>,
    /// The map whose key was accepted by `ExitBootServices`.
    pub memory_map: MemoryMap,
    pub blob_attempts: u32,
    pub exit_retries: u32,
    /// Allocations now owned by the OS.
    pub retained: Vec<Release>,
}

/// Run the boot sequence and exit boot services.
///
/// On failure every allocation made so far is released, newest first,
/// before the error is returned. On success `fw` must not be used again.
///
/// # Errors
/// The first fatal [`StubError`].
pub fn boot<F: BootServices>(fw: &mut F, config: &StubConfig) -> Result<BootHandoff, StubError> {
    let mut release = ReleaseStack::new();
    match run(fw, config, &mut release) {
        Ok(mut handoff) => {
            handoff.retained = release.disarm();
            Ok(handoff)
        }
        Err(err) => {
            error!("{err}");
            release.unwind(fw);
            Err(err)
        }
    }
}

/// Entry point semantics of the stub: the address of the new blob, or
/// [`EFI_STUB_ERROR`]. On success the final image address is stored in
/// `image_addr`.
///
/// The memory map backing the blob's `linux,efi-mmap-start` is never freed.
pub fn efi_entry<F: BootServices>(
    fw: &mut F,
    config: &StubConfig,
    image_addr: Option<&mut u64>,
) -> u64 {
    match boot(fw, config) {
        Ok(handoff) => {
            if let Some(out) = image_addr {
                *out = handoff.image.address.as_u64();
            }
            let _map: &'static [u8] = handoff.memory_map.leak();
            handoff.blob.base().as_u64()
        }
        Err(_) => EFI_STUB_ERROR,
    }
}

fn run<F: BootServices>(
    fw: &mut F,
    config: &StubConfig,
    release: &mut ReleaseStack,
) -> Result<BootHandoff, StubError> {
    if fw.system_table_signature() != crate::SYSTEM_TABLE_SIGNATURE {
        return Err(StubError::FirmwareUnavailable("system table signature mismatch"));
    }

    let image = fw.loaded_image().map_err(|status| StubError::Firmware {
        what: "opening the loaded image protocol",
        status,
    })?;

    let cmdline = command_line(fw, config, &image);
    stash_command_line(fw, &cmdline, release)?;

    let (mut tree, source_size) = load_source_blob(fw, config, &cmdline, release)?;

    let dram_base = dram_base(fw, config, &tree)?;
    debug!("base of RAM at {dram_base}");

    if let Some(size) = config.kernel_reserve {
        let count = pages::pages_for(size);
        let base = fw
            .allocate_pages(AllocateType::Address(dram_base), MemoryType::LOADER_DATA, count)
            .map_err(|status| StubError::AllocationFailed {
                pages: count,
                status,
            })?;
        release.push(Resource::KernelReservation, PhysicalRange::new(base, size));
    }

    let placed = relocate_image(fw, config, &image, dram_base)?;
    if placed.allocated {
        release.push(Resource::Image, placed.range());
    }

    let initrd = load_cmdline_files(fw, &cmdline, INITRD_OPTION, dram_base + config.initrd_limit)?;
    if let Some(range) = initrd {
        info!("initrd: {} bytes at {}", range.size(), range.base());
        release.push(Resource::Initrd, range);
    }

    blob::prepare(
        &mut tree,
        &BlobAdditions {
            cmdline: &cmdline,
            initrd,
            system_table: fw.system_table(),
        },
    );

    let mutator = BlobMutator::new(&tree);
    let placement = BlobPlacement {
        initial_capacity: source_size + config.blob_slack.bytes(cmdline.len()),
        align: config.blob_align,
        max: dram_base + config.blob_limit,
        growth: config.blob_growth,
    };

    info!("Exiting boot services and installing the device tree...");
    let mut patched = mutator.grow_and_patch(fw, &placement, release)?;
    let exit_retries = finalize(fw, &mutator, &mut patched)?;

    Ok(BootHandoff {
        blob: patched.buffer,
        blob_size: patched.size,
        image: placed,
        initrd,
        memory_map: patched.map,
        blob_attempts: patched.attempts,
        exit_retries,
        retained: Vec::new(),
    })
}

/// The load options as ASCII, falling back to a command-line file.
fn command_line<F: BootServices>(fw: &mut F, config: &StubConfig, image: &LoadedImage) -> String {
    let cmdline = to_ascii(&image.load_options);
    if !cmdline.trim().is_empty() {
        return cmdline;
    }
    let Some(file) = config.cmdline_file else {
        return cmdline;
    };
    // Only the first line of the file counts.
    match fw.read_file(&to_firmware_path(file)) {
        Ok(bytes) => bytes
            .iter()
            .take_while(|&&b| b != 0 && b != b'\n')
            .map(|&b| if b.is_ascii() { char::from(b) } else { '?' })
            .collect::<String>()
            .trim()
            .into(),
        Err(status) => {
            debug!("no command line file {file}: {status:?}");
            cmdline
        }
    }
}

/// Copy the command line, NUL terminated, below 4 GiB and out of the way
/// of the base of RAM.
fn stash_command_line<F: BootServices>(
    fw: &mut F,
    cmdline: &str,
    release: &mut ReleaseStack,
) -> Result<(), StubError> {
    let size = cmdline.len() as u64 + 1;
    let base = pages::high_alloc(fw, size, EFI_PAGE_SIZE, PhysicalAddress::new(1 << 32))?;
    let range = PhysicalRange::new(base, size);
    release.push(Resource::CommandLine, range);

    let target = fw
        .memory_mut(range)
        .ok_or(StubError::FirmwareUnavailable("allocated memory not accessible"))?;
    let (text, nul) = target.split_at_mut(cmdline.len());
    text.copy_from_slice(cmdline.as_bytes());
    nul.fill(0);
    Ok(())
}

/// Load and parse the `dtb=` file, returning the tree and the source size.
fn load_source_blob<F: BootServices>(
    fw: &mut F,
    config: &StubConfig,
    cmdline: &str,
    release: &mut ReleaseStack,
) -> Result<(DeviceTree, u64), StubError> {
    let source = load_cmdline_files(fw, cmdline, DTB_OPTION, PhysicalAddress::new(u64::MAX))?;
    let Some(range) = source else {
        if config.require_blob {
            return Err(StubError::BlobMissing);
        }
        info!("Generating empty device tree");
        return Ok((blob::load(None)?, 0));
    };
    release.push(Resource::BlobSource, range);

    let bytes = fw
        .memory_mut(range)
        .ok_or(StubError::FirmwareUnavailable("allocated memory not accessible"))?;
    let tree = blob::load(Some(bytes))?;
    Ok((tree, range.size()))
}

fn dram_base<F: BootServices>(
    fw: &mut F,
    config: &StubConfig,
    tree: &DeviceTree,
) -> Result<PhysicalAddress, StubError> {
    let base = match config.dram_base {
        DramBase::FromMemoryMap { align } => fw
            .memory_map()
            .map_err(|_| StubError::FirmwareUnavailable("no memory map"))?
            .view()
            .dram_base(align),
        DramBase::FromBlob => tree.memory_base().map(PhysicalAddress::new),
    };
    base.ok_or(StubError::FirmwareUnavailable("unable to determine the base of RAM"))
}

fn relocate_image<F: BootServices>(
    fw: &mut F,
    config: &StubConfig,
    image: &LoadedImage,
    dram_base: PhysicalAddress,
) -> Result<RelocationRecord, StubError> {
    let mem_size = image.size + image.bss_size;
    let constraints = match config.image_offset {
        Some(offset) => Constraints {
            region_base: dram_base,
            preferred: Some(dram_base + offset),
            align: config.image_align,
            min_offset: offset,
            max_offset: offset,
        },
        None => Constraints {
            region_base: dram_base,
            preferred: None,
            align: config.image_align,
            min_offset: 0,
            max_offset: config.image_limit.saturating_sub(mem_size),
        },
    };
    relocate(fw, image.base, image.size, mem_size, &constraints)
}
