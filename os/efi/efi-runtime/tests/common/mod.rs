//! A simulated machine for driving the runtime hand-off on the host:
//! firmware tables in memory, the kernel's mapper and the CPU.

#![allow(dead_code)]

use efi_addresses::{PageSize, PhysicalAddress, PhysicalRange, Size4K, VirtualAddress};
use efi_ddb::DeviceTree;
use efi_memmap::handoff::props;
use efi_memmap::{
    DescriptorExt, MemoryAttribute, MemoryDescriptor, MemoryMapView, MemoryType, encode_descriptors,
};
use efi_runtime::tables::{RUNTIME_SERVICES_SIGNATURE, SYSTEM_TABLE_SIGNATURE, TableLayout};
use efi_runtime::{CpuState, EarlyMemory, RegionMapper, Reserver, RuntimeFirmware};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;
use uefi::Status;

pub const DESC_SIZE: usize = 48;

pub const UART: u64 = 0x0900_0000;
pub const RUNTIME_CODE: u64 = 0x4420_0000;
pub const RUNTIME_DATA: u64 = 0x4426_0000;
pub const ACPI_RECLAIM: u64 = 0x4428_9000;
pub const BOOT_CODE: u64 = 0x4410_0000;

pub const SYSTEM_TABLE: u64 = RUNTIME_DATA;
pub const RUNTIME_TABLE: u64 = RUNTIME_DATA + 0x1000;
pub const VENDOR: u64 = RUNTIME_DATA + 0x2000;
pub const CONFIG_TABLES: u64 = RUNTIME_DATA + 0x3000;
pub const ACPI_TABLE: u64 = ACPI_RECLAIM + 0x100;

/// Physical entry points inside the runtime code region.
pub const SET_VIRTUAL_ADDRESS_MAP: u64 = RUNTIME_CODE + 0x100;
pub const GET_VARIABLE: u64 = RUNTIME_CODE + 0x200;
pub const GET_NEXT_VARIABLE_NAME: u64 = RUNTIME_CODE + 0x300;
pub const SET_VARIABLE: u64 = RUNTIME_CODE + 0x400;

/// Revision 2.70.
pub const REVISION: u32 = (2 << 16) | 70;

/// The kernel's linear map covers this much RAM, at `LINEAR_OFFSET + pa`.
pub const LINEAR: PhysicalRange = PhysicalRange::new(PhysicalAddress::new(0x4000_0000), 0x0424_0000);
pub const LINEAR_OFFSET: u64 = 0xFFFF_0000_0000_0000;
pub const CACHED_BASE: u64 = 0xFFFF_FD00_0000_0000;
pub const DEVICE_BASE: u64 = 0xFFFF_FE00_0000_0000;

pub const ACPI2_GUID: [u8; 16] = [
    0x71, 0xe8, 0x68, 0x88, 0xf1, 0xe4, 0xd3, 0x11, 0xbc, 0x22, 0x00, 0x80, 0xc7, 0x3c, 0x88,
    0x81,
];

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

/// A runtime RTC, RAM, the loaded kernel, firmware regions and a reserved
/// hole. Four regions are preserved unless boot services are kept as well.
pub fn platform_regions() -> Vec<MemoryDescriptor> {
    let mut rtc = runtime(MemoryType::MMIO, UART, 1);
    rtc.att = MemoryAttribute::UNCACHEABLE | MemoryAttribute::RUNTIME;
    vec![
        rtc,
        desc(MemoryType::CONVENTIONAL, 0x4000_0000, 0x4000),
        desc(MemoryType::LOADER_DATA, 0x4400_0000, 0x100),
        desc(MemoryType::BOOT_SERVICES_CODE, BOOT_CODE, 0x10),
        runtime(MemoryType::RUNTIME_SERVICES_CODE, RUNTIME_CODE, 0x20),
        runtime(MemoryType::RUNTIME_SERVICES_DATA, RUNTIME_DATA, 0x10),
        desc(MemoryType::ACPI_RECLAIM, ACPI_RECLAIM, 0x8),
        desc(MemoryType::RESERVED, 0x4430_0000, 0x10),
        desc(MemoryType::CONVENTIONAL, 0x4440_0000, 0x1000),
    ]
}

/// RAM only; nothing survives boot services.
pub fn plain_regions() -> Vec<MemoryDescriptor> {
    vec![
        desc(MemoryType::CONVENTIONAL, 0x4000_0000, 0x4000),
        desc(MemoryType::LOADER_DATA, 0x4400_0000, 0x100),
        desc(MemoryType::CONVENTIONAL, 0x4440_0000, 0x1000),
    ]
}

/// The device tree the boot stub leaves behind.
pub fn handoff_tree(regions: &[MemoryDescriptor], system_table: u64, mmap_start: u64) -> DeviceTree {
    let mmap = encode_descriptors(regions.iter(), DESC_SIZE).unwrap();
    let mut tree = DeviceTree::empty();
    let chosen = tree.chosen_mut();
    chosen.set_str(props::BOOTARGS, "console=ttyAMA0");
    chosen.set_u64(props::SYSTEM_TABLE, system_table);
    chosen.set_u64(props::MMAP_START, mmap_start);
    chosen.set_u32(props::MMAP_SIZE, u32::try_from(mmap.len()).unwrap());
    chosen.set_u32(props::MMAP_DESC_SIZE, u32::try_from(DESC_SIZE).unwrap());
    chosen.set_u32(props::MMAP_DESC_VER, 1);
    chosen.set_property(props::MMAP, mmap);
    tree
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Event {
    InterruptsOff,
    InterruptsRestored(bool),
    IdentityMap(u64),
    SwitchToIdentity,
    FlushTlb,
    CachesOff,
    FirmwareCall,
    RestoreTables,
    FlushBranchPredictor,
    CachesOn,
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

/// Sparse physical memory.
#[derive(Clone, Debug, Default)]
pub struct SimMemory {
    chunks: Vec<(u64, Vec<u8>)>,
}

impl SimMemory {
    pub fn write(&mut self, addr: u64, bytes: &[u8]) {
        if let Some((base, chunk)) = self
            .chunks
            .iter_mut()
            .find(|(b, c)| *b <= addr && addr + bytes.len() as u64 <= *b + c.len() as u64)
        {
            let at = (addr - *base) as usize;
            chunk[at..at + bytes.len()].copy_from_slice(bytes);
        } else {
            self.chunks.push((addr, bytes.to_vec()));
        }
    }

    pub fn read(&self, addr: u64, buf: &mut [u8]) -> bool {
        let Some((base, chunk)) = self
            .chunks
            .iter()
            .find(|(b, c)| *b <= addr && addr + buf.len() as u64 <= *b + c.len() as u64)
        else {
            return false;
        };
        let at = (addr - *base) as usize;
        buf.copy_from_slice(&chunk[at..at + buf.len()]);
        true
    }

    fn write_pointer(&mut self, layout: &TableLayout, addr: u64, value: u64) {
        let width = layout.width.bytes();
        self.write(addr, &value.to_le_bytes()[..width]);
    }
}

/// `SetVirtualAddressMap` as the firmware saw it.
#[derive(Clone, Debug)]
pub struct SwitchCall {
    pub entry: u64,
    pub map_size: usize,
    pub desc_size: usize,
    pub desc_version: u32,
    pub map: Vec<u8>,
}

/// Firmware tables laid out in memory, plus the runtime services.
pub struct SimFirmware {
    pub memory: SimMemory,
    pub layout: TableLayout,
    pub events: EventLog,
    /// Returned by `SetVirtualAddressMap`.
    pub status: Status,
    pub calls: Vec<SwitchCall>,
    /// Regions and their new virtual addresses, once a map was accepted.
    virtual_map: Vec<MemoryDescriptor>,
}

impl SimFirmware {
    pub fn new(layout: TableLayout, events: EventLog) -> Self {
        let mut memory = SimMemory::default();
        // Zero-fill the firmware data region so that table reads stay in one chunk.
        memory.write(RUNTIME_DATA, &vec![0u8; 0x10 * 4096]);
        memory.write(RUNTIME_CODE, &vec![0u8; 0x20 * 4096]);

        let mut header = [0u8; 24];
        header[..8].copy_from_slice(&SYSTEM_TABLE_SIGNATURE.to_le_bytes());
        header[8..12].copy_from_slice(&REVISION.to_le_bytes());
        memory.write(SYSTEM_TABLE, &header);
        memory.write_pointer(&layout, SYSTEM_TABLE + layout.fw_vendor() as u64, VENDOR);
        memory.write_pointer(&layout, SYSTEM_TABLE + layout.runtime_services() as u64, RUNTIME_TABLE);
        memory.write_pointer(&layout, SYSTEM_TABLE + layout.nr_tables() as u64, 1);
        memory.write_pointer(&layout, SYSTEM_TABLE + layout.config_tables() as u64, CONFIG_TABLES);

        let vendor: Vec<u8> = "EDK II\0".encode_utf16().flat_map(u16::to_le_bytes).collect();
        memory.write(VENDOR, &vendor);

        memory.write(CONFIG_TABLES, &ACPI2_GUID);
        memory.write_pointer(&layout, CONFIG_TABLES + 16, ACPI_TABLE);

        memory.write(RUNTIME_TABLE, &RUNTIME_SERVICES_SIGNATURE.to_le_bytes());
        for (offset, entry) in [
            (layout.set_virtual_address_map(), SET_VIRTUAL_ADDRESS_MAP),
            (layout.get_variable(), GET_VARIABLE),
            (layout.get_next_variable_name(), GET_NEXT_VARIABLE_NAME),
            (layout.set_variable(), SET_VARIABLE),
        ] {
            memory.write_pointer(&layout, RUNTIME_TABLE + offset as u64, entry);
        }

        Self {
            memory,
            layout,
            events,
            status: Status::SUCCESS,
            calls: Vec::new(),
            virtual_map: Vec::new(),
        }
    }

    pub fn with_signature(mut self, signature: u64) -> Self {
        self.memory.write(SYSTEM_TABLE, &signature.to_le_bytes());
        self
    }

    fn to_physical(&self, va: u64) -> Option<u64> {
        self.virtual_map.iter().find_map(|d| {
            let start = d.virt_start;
            (start..start + d.size_bytes())
                .contains(&va)
                .then(|| d.phys_start + (va - start))
        })
    }

    fn convert_pointer(&mut self, table: u64, offset: usize) {
        let addr = table + offset as u64;
        let mut raw = [0u8; 8];
        let width = self.layout.width.bytes();
        assert!(self.memory.read(addr, &mut raw[..width]));
        let phys = u64::from_le_bytes(raw);
        let virt = self
            .virtual_map
            .iter()
            .find(|d| d.range().contains(PhysicalAddress::new(phys)))
            .map(|d| d.virt_start + (phys - d.phys_start))
            .expect("runtime entry point outside the runtime regions");
        let layout = self.layout;
        self.memory.write_pointer(&layout, addr, virt);
    }
}

impl EarlyMemory for SimFirmware {
    fn read(&self, phys: PhysicalAddress, buf: &mut [u8]) -> bool {
        self.memory.read(phys.as_u64(), buf)
    }
}

impl RuntimeFirmware for SimFirmware {
    unsafe fn set_virtual_address_map(
        &mut self,
        entry: PhysicalAddress,
        map_size: usize,
        desc_size: usize,
        desc_version: u32,
        map: &[u8],
    ) -> Status {
        self.events.borrow_mut().push(Event::FirmwareCall);
        self.calls.push(SwitchCall {
            entry: entry.as_u64(),
            map_size,
            desc_size,
            desc_version,
            map: map.to_vec(),
        });
        if self.status != Status::SUCCESS {
            return self.status;
        }

        let view = MemoryMapView::new(map, desc_size, desc_version).unwrap();
        self.virtual_map = view.entries().collect();
        if self.virtual_map.iter().any(|d| d.range().contains(PhysicalAddress::new(RUNTIME_TABLE))) {
            for offset in [
                self.layout.get_variable(),
                self.layout.get_next_variable_name(),
                self.layout.set_variable(),
            ] {
                self.convert_pointer(RUNTIME_TABLE, offset);
            }
        }
        Status::SUCCESS
    }

    fn read_physical(&self, phys: PhysicalAddress, buf: &mut [u8]) -> bool {
        self.memory.read(phys.as_u64(), buf)
    }

    fn read_virtual(&self, va: VirtualAddress, buf: &mut [u8]) -> bool {
        self.to_physical(va.as_u64())
            .is_some_and(|pa| self.memory.read(pa, buf))
    }
}

/// The kernel's early memory bookkeeping.
#[derive(Debug)]
pub struct SimReserver<S: PageSize = Size4K> {
    pub reserved: Vec<PhysicalRange>,
    pub memory: Vec<PhysicalRange>,
    _page: PhantomData<S>,
}

impl<S: PageSize> Default for SimReserver<S> {
    fn default() -> Self {
        Self {
            reserved: Vec::new(),
            memory: Vec::new(),
            _page: PhantomData,
        }
    }
}

impl<S: PageSize> Reserver for SimReserver<S> {
    type Page = S;

    fn reserve(&mut self, range: PhysicalRange) {
        self.reserved.push(range);
    }

    fn add_memory(&mut self, range: PhysicalRange) {
        self.memory.push(range);
    }
}

/// The kernel's page-table code: a linear map plus two bump regions for
/// cached and device mappings.
#[derive(Debug)]
pub struct SimMapper<S: PageSize = Size4K> {
    next_cached: u64,
    next_device: u64,
    /// Mapping a region starting at this address fails.
    pub fail_at: Option<u64>,
    pub cached: Vec<PhysicalRange>,
    pub device: Vec<PhysicalRange>,
    _page: PhantomData<S>,
}

impl<S: PageSize> Default for SimMapper<S> {
    fn default() -> Self {
        Self {
            next_cached: CACHED_BASE,
            next_device: DEVICE_BASE,
            fail_at: None,
            cached: Vec::new(),
            device: Vec::new(),
            _page: PhantomData,
        }
    }
}

impl<S: PageSize> SimMapper<S> {
    fn fails(&self, range: PhysicalRange) -> bool {
        self.fail_at.is_some_and(|a| range.contains(PhysicalAddress::new(a)))
    }
}

impl<S: PageSize> RegionMapper for SimMapper<S> {
    type Page = S;

    fn is_linear(&self, range: PhysicalRange) -> bool {
        LINEAR.covers(&range)
    }

    fn linear_address(&self, phys: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(LINEAR_OFFSET + phys.as_u64())
    }

    fn map_cached(&mut self, range: PhysicalRange) -> Option<VirtualAddress> {
        if self.fails(range) {
            return None;
        }
        self.cached.push(range);
        let va = self.next_cached;
        self.next_cached += range.size();
        Some(VirtualAddress::new(va))
    }

    fn map_device(&mut self, range: PhysicalRange) -> Option<VirtualAddress> {
        if self.fails(range) {
            return None;
        }
        self.device.push(range);
        let va = self.next_device;
        self.next_device += range.size();
        Some(VirtualAddress::new(va))
    }
}

/// Records every CPU operation into the shared event log.
#[derive(Debug)]
pub struct SimCpu {
    pub events: EventLog,
    pub interrupts_enabled: bool,
    /// Identity mapping a region starting here fails.
    pub fail_identity_at: Option<u64>,
}

impl SimCpu {
    pub fn new(events: EventLog) -> Self {
        Self {
            events,
            interrupts_enabled: true,
            fail_identity_at: None,
        }
    }

    fn log(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }
}

impl CpuState for SimCpu {
    fn disable_interrupts(&mut self) -> bool {
        self.log(Event::InterruptsOff);
        std::mem::replace(&mut self.interrupts_enabled, false)
    }

    fn restore_interrupts(&mut self, were_enabled: bool) {
        self.log(Event::InterruptsRestored(were_enabled));
        self.interrupts_enabled = were_enabled;
    }

    fn identity_map(&mut self, range: PhysicalRange) -> bool {
        assert!(!self.interrupts_enabled, "identity mapping with interrupts on");
        self.log(Event::IdentityMap(range.base().as_u64()));
        self.fail_identity_at != Some(range.base().as_u64())
    }

    fn switch_to_identity(&mut self) {
        self.log(Event::SwitchToIdentity);
    }

    fn flush_tlb(&mut self) {
        self.log(Event::FlushTlb);
    }

    fn flush_and_disable_caches(&mut self) {
        self.log(Event::CachesOff);
    }

    fn restore_os_tables(&mut self) {
        self.log(Event::RestoreTables);
    }

    fn flush_branch_predictor(&mut self) {
        self.log(Event::FlushBranchPredictor);
    }

    fn enable_caches(&mut self) {
        self.log(Event::CachesOn);
    }
}

/// Everything a test needs, wired to one event log.
pub struct Machine {
    pub events: EventLog,
    pub firmware: SimFirmware,
    pub mapper: SimMapper,
    pub cpu: SimCpu,
}

impl Machine {
    pub fn new(layout: TableLayout) -> Self {
        let events = EventLog::default();
        Self {
            firmware: SimFirmware::new(layout, events.clone()),
            mapper: SimMapper::default(),
            cpu: SimCpu::new(events.clone()),
            events,
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }
}
