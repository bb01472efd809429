//! A simulated firmware for driving the stub on the host.

#![allow(dead_code)]

use efi_addresses::{PhysicalAddress, PhysicalRange};
use efi_ddb::DeviceTree;
use efi_memmap::{
    DescriptorExt, MapKey, MemoryAttribute, MemoryDescriptor, MemoryMap, MemoryMapMeta, MemoryType,
    encode_descriptors,
};
use efi_stub::{AllocateType, BootServices, LoadedImage, SYSTEM_TABLE_SIGNATURE};
use std::collections::{BTreeMap, HashMap};
use uefi::Status;

pub const PAGE: u64 = 4096;
pub const DRAM_BASE: u64 = 0x4000_0000;
pub const IMAGE_BASE: u64 = 0x4400_0000;
pub const IMAGE_SIZE: u64 = 0x3000;
pub const IMAGE_BSS: u64 = 0x1000;
pub const SYSTEM_TABLE: u64 = 0x4426_0000;

/// Descriptors of headroom in every captured map buffer.
const EXTRA_DESCS: usize = 8;

/// Freshly allocated pages are filled with this, like firmware leaves garbage.
pub const POISON: u8 = 0xAA;

#[derive(Clone, Debug)]
struct Allocation {
    pages: u64,
    memory_type: MemoryType,
    bytes: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct SimFirmware {
    regions: Vec<MemoryDescriptor>,
    allocations: BTreeMap<u64, Allocation>,
    /// Memory that exists without being allocated by the stub (the image).
    preloaded: BTreeMap<u64, Vec<u8>>,
    files: HashMap<String, Vec<u8>>,
    image: LoadedImage,
    pub signature: u64,
    pub desc_size: usize,
    key: usize,
    /// Number of allocation requests so far, successful or not.
    pub allocation_requests: usize,
    /// Every allocation request from this index on fails.
    pub fail_allocations_from: Option<usize>,
    /// Number of upcoming `ExitBootServices` calls that find the map changed
    /// by a firmware event since it was captured.
    pub map_changes_before_exit: u32,
    pub exit_calls: u32,
    pub exited: bool,
    /// Boot service calls made after a successful exit.
    pub violations: Vec<&'static str>,
}

pub fn desc(ty: MemoryType, base: u64, pages: u64) -> MemoryDescriptor {
    MemoryDescriptor {
        ty,
        phys_start: base,
        virt_start: 0,
        page_count: pages,
        att: MemoryAttribute::WRITE_BACK,
    }
}

pub fn runtime(ty: MemoryType, base: u64, pages: u64) -> MemoryDescriptor {
    let mut d = desc(ty, base, pages);
    d.att |= MemoryAttribute::RUNTIME;
    d
}

/// A small ARM64 virtual machine: a UART, 64 MiB of low RAM, the loaded
/// image, some firmware regions (one of them needed at runtime) and
/// 128 MiB more RAM.
pub fn platform_regions() -> Vec<MemoryDescriptor> {
    let mut uart = desc(MemoryType::MMIO, 0x0900_0000, 1);
    uart.att = MemoryAttribute::UNCACHEABLE;
    vec![
        uart,
        desc(MemoryType::CONVENTIONAL, DRAM_BASE, 0x4000),
        desc(MemoryType::LOADER_CODE, IMAGE_BASE, 0x200),
        desc(MemoryType::BOOT_SERVICES_CODE, 0x4420_0000, 0x20),
        desc(MemoryType::BOOT_SERVICES_DATA, 0x4422_0000, 0x40),
        runtime(MemoryType::RUNTIME_SERVICES_DATA, SYSTEM_TABLE, 0x10),
        desc(MemoryType::ACPI_RECLAIM, 0x4427_0000, 0x10),
        desc(MemoryType::CONVENTIONAL, 0x4428_0000, 0x8000),
    ]
}

pub fn ucs2(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(Some(0)).collect()
}

pub fn image_bytes() -> Vec<u8> {
    (0..IMAGE_SIZE).map(|i| (i % 251) as u8).collect()
}

/// A source device tree with a memory node, as a platform would ship it.
pub fn source_tree(memory_base: u64) -> DeviceTree {
    let mut tree = DeviceTree::empty();
    tree.root.set_u32("#address-cells", 2);
    tree.root.set_u32("#size-cells", 2);
    tree.root.set_str("compatible", "linux,dummy-virt");
    let memory = tree.root.child_or_insert(&format!("memory@{memory_base:x}"));
    memory.set_str("device_type", "memory");
    let mut reg = memory_base.to_be_bytes().to_vec();
    reg.extend_from_slice(&0x1000_0000u64.to_be_bytes());
    memory.set_property("reg", reg);
    let uart = tree.root.child_or_insert("pl011@9000000");
    uart.set_str("compatible", "arm,pl011");
    tree
}

impl SimFirmware {
    pub fn new(regions: Vec<MemoryDescriptor>) -> Self {
        let mut preloaded = BTreeMap::new();
        let mut bytes = image_bytes();
        bytes.resize((IMAGE_SIZE + IMAGE_BSS) as usize, POISON);
        preloaded.insert(IMAGE_BASE, bytes);
        let mut sys = vec![0u8; PAGE as usize];
        sys[..8].copy_from_slice(&SYSTEM_TABLE_SIGNATURE.to_le_bytes());
        preloaded.insert(SYSTEM_TABLE, sys);

        Self {
            regions,
            allocations: BTreeMap::new(),
            preloaded,
            files: HashMap::new(),
            image: LoadedImage {
                base: PhysicalAddress::new(IMAGE_BASE),
                size: IMAGE_SIZE,
                bss_size: IMAGE_BSS,
                load_options: Vec::new(),
            },
            signature: SYSTEM_TABLE_SIGNATURE,
            desc_size: 48,
            key: 1,
            allocation_requests: 0,
            fail_allocations_from: None,
            map_changes_before_exit: 0,
            exit_calls: 0,
            exited: false,
            violations: Vec::new(),
        }
    }

    pub fn with_cmdline(mut self, cmdline: &str) -> Self {
        self.image.load_options = ucs2(cmdline);
        self
    }

    pub fn with_file(mut self, path: &str, contents: Vec<u8>) -> Self {
        self.files.insert(path.to_owned(), contents);
        self
    }

    /// Number of page allocations not yet freed.
    pub fn outstanding(&self) -> usize {
        self.allocations.len()
    }

    pub fn allocations(&self) -> Vec<PhysicalRange> {
        self.allocations
            .iter()
            .map(|(&base, a)| PhysicalRange::from_efi_pages(PhysicalAddress::new(base), a.pages))
            .collect()
    }

    pub fn current_key(&self) -> MapKey {
        MapKey(self.key)
    }

    /// Bytes at `range`, for inspecting what the stub wrote.
    pub fn read(&self, range: PhysicalRange) -> Option<Vec<u8>> {
        let (base, bytes) = self.block_containing(range)?;
        let start = (range.base().as_u64() - base) as usize;
        Some(bytes[start..start + range.size() as usize].to_vec())
    }

    /// The descriptors firmware would report right now.
    pub fn descriptors(&self) -> Vec<MemoryDescriptor> {
        let mut out = Vec::new();
        for region in &self.regions {
            if !region.is_conventional() {
                out.push(*region);
                continue;
            }
            let range = region.range();
            let mut cursor = range.base().as_u64();
            for (&base, alloc) in self.allocations.range(range.base().as_u64()..range.end().as_u64()) {
                if base > cursor {
                    out.push(desc(MemoryType::CONVENTIONAL, cursor, (base - cursor) / PAGE));
                }
                out.push(desc(alloc.memory_type, base, alloc.pages));
                cursor = base + alloc.pages * PAGE;
            }
            if cursor < range.end().as_u64() {
                out.push(desc(
                    MemoryType::CONVENTIONAL,
                    cursor,
                    (range.end().as_u64() - cursor) / PAGE,
                ));
            }
        }
        out
    }

    fn touch(&mut self, what: &'static str) {
        if self.exited {
            self.violations.push(what);
        }
    }

    fn block_containing(&self, range: PhysicalRange) -> Option<(u64, &Vec<u8>)> {
        let a = range.base().as_u64();
        let end = a.checked_add(range.size())?;
        self.allocations
            .iter()
            .map(|(&b, alloc)| (b, &alloc.bytes))
            .chain(self.preloaded.iter().map(|(&b, bytes)| (b, bytes)))
            .find(|&(b, bytes)| a >= b && end <= b + bytes.len() as u64)
    }

    fn is_free(&self, base: u64, pages: u64) -> bool {
        let wanted = PhysicalRange::from_efi_pages(PhysicalAddress::new(base), pages);
        let inside_ram = self
            .regions
            .iter()
            .any(|r| r.is_conventional() && r.range().covers(&wanted));
        inside_ram
            && !self.allocations.iter().any(|(&b, alloc)| {
                PhysicalRange::from_efi_pages(PhysicalAddress::new(b), alloc.pages).overlaps(&wanted)
            })
    }

    /// Free spots in ascending order, one candidate per page.
    fn candidates(&self, pages: u64) -> Vec<u64> {
        self.descriptors()
            .iter()
            .filter(|d| d.is_conventional() && d.page_count >= pages)
            .flat_map(|d| {
                let base = d.phys_start;
                (0..=d.page_count - pages).map(move |p| base + p * PAGE)
            })
            .collect()
    }

    fn capture_into(&self, buffer: &mut Vec<u8>) -> MemoryMapMeta {
        let descriptors = self.descriptors();
        let bytes = encode_descriptors(descriptors.iter(), self.desc_size).unwrap_or_default();
        let map_size = bytes.len();
        if buffer.len() < map_size {
            buffer.resize(map_size + EXTRA_DESCS * self.desc_size, 0);
        }
        buffer[..map_size].copy_from_slice(&bytes);
        MemoryMapMeta {
            map_size,
            desc_size: self.desc_size,
            desc_version: 1,
            key: MapKey(self.key),
        }
    }
}

impl BootServices for SimFirmware {
    fn system_table(&self) -> PhysicalAddress {
        PhysicalAddress::new(SYSTEM_TABLE)
    }

    fn system_table_signature(&self) -> u64 {
        self.signature
    }

    fn loaded_image(&mut self) -> Result<LoadedImage, Status> {
        self.touch("loaded_image");
        Ok(self.image.clone())
    }

    fn allocate_pages(
        &mut self,
        ty: AllocateType,
        memory_type: MemoryType,
        pages: u64,
    ) -> Result<PhysicalAddress, Status> {
        self.touch("allocate_pages");
        let index = self.allocation_requests;
        self.allocation_requests += 1;
        if self.fail_allocations_from.is_some_and(|from| index >= from) {
            return Err(Status::OUT_OF_RESOURCES);
        }
        if pages == 0 {
            return Err(Status::INVALID_PARAMETER);
        }

        let base = match ty {
            AllocateType::Address(at) => {
                let at = at.as_u64();
                if at % PAGE != 0 {
                    return Err(Status::INVALID_PARAMETER);
                }
                if !self.is_free(at, pages) {
                    return Err(Status::NOT_FOUND);
                }
                at
            }
            AllocateType::AnyPages => *self
                .candidates(pages)
                .first()
                .ok_or(Status::OUT_OF_RESOURCES)?,
            AllocateType::MaxAddress(max) => *self
                .candidates(pages)
                .iter()
                .rev()
                .find(|&&b| b + pages * PAGE - 1 <= max.as_u64())
                .ok_or(Status::OUT_OF_RESOURCES)?,
        };

        self.allocations.insert(
            base,
            Allocation {
                pages,
                memory_type,
                bytes: vec![POISON; (pages * PAGE) as usize],
            },
        );
        self.key += 1;
        Ok(PhysicalAddress::new(base))
    }

    fn free_pages(&mut self, base: PhysicalAddress, pages: u64) -> Result<(), Status> {
        self.touch("free_pages");
        match self.allocations.get(&base.as_u64()) {
            Some(alloc) if alloc.pages == pages => {
                self.allocations.remove(&base.as_u64());
                self.key += 1;
                Ok(())
            }
            _ => Err(Status::NOT_FOUND),
        }
    }

    fn memory_map(&mut self) -> Result<MemoryMap, Status> {
        self.touch("memory_map");
        let mut buffer = Vec::new();
        let meta = self.capture_into(&mut buffer);
        MemoryMap::from_raw(buffer, meta).map_err(|_| Status::LOAD_ERROR)
    }

    fn refresh_memory_map(&mut self, map: &mut MemoryMap) -> Result<(), Status> {
        self.touch("refresh_memory_map");
        let descriptors = self.descriptors();
        let needed = descriptors.len() * self.desc_size;
        let buffer = map.buffer_mut();
        if buffer.len() < needed {
            return Err(Status::BUFFER_TOO_SMALL);
        }
        let mut scratch = buffer.to_vec();
        let meta = self.capture_into(&mut scratch);
        map.buffer_mut()[..meta.map_size].copy_from_slice(&scratch[..meta.map_size]);
        map.set_meta(meta).map_err(|_| Status::BUFFER_TOO_SMALL)
    }

    fn exit_boot_services(&mut self, key: MapKey) -> Result<(), Status> {
        self.touch("exit_boot_services");
        self.exit_calls += 1;
        if self.map_changes_before_exit > 0 {
            self.map_changes_before_exit -= 1;
            // A timer event allocated something behind the stub's back.
            self.key += 1;
        }
        if key.0 != self.key {
            return Err(Status::INVALID_PARAMETER);
        }
        self.exited = true;
        Ok(())
    }

    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, Status> {
        self.touch("read_file");
        self.files.get(path).cloned().ok_or(Status::NOT_FOUND)
    }

    fn memory_mut(&mut self, range: PhysicalRange) -> Option<&mut [u8]> {
        let a = range.base().as_u64();
        let end = a.checked_add(range.size())?;
        self.allocations
            .iter_mut()
            .map(|(&b, alloc)| (b, &mut alloc.bytes))
            .chain(self.preloaded.iter_mut().map(|(&b, bytes)| (b, bytes)))
            .find(|(b, bytes)| a >= *b && end <= *b + bytes.len() as u64)
            .map(|(b, bytes)| &mut bytes[(a - b) as usize..(end - b) as usize])
    }

    fn copy_mem(
        &mut self,
        dst: PhysicalAddress,
        src: PhysicalAddress,
        len: u64,
    ) -> Result<(), Status> {
        self.touch("copy_mem");
        let data = self
            .read(PhysicalRange::new(src, len))
            .ok_or(Status::INVALID_PARAMETER)?;
        let target = self
            .memory_mut(PhysicalRange::new(dst, len))
            .ok_or(Status::INVALID_PARAMETER)?;
        target.copy_from_slice(&data);
        Ok(())
    }
}
