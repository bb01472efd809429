mod common;

use common::*;
use efi_addresses::{PhysicalAddress, PhysicalRange};
use efi_memmap::MemoryType;
use efi_stub::StubError;
use efi_stub::config::{TEXT_OFFSET, ZIMAGE_OFFSET_LIMIT};
use efi_stub::relocate::{Constraints, relocate};

fn arm64_constraints() -> Constraints {
    Constraints {
        region_base: PhysicalAddress::new(DRAM_BASE),
        preferred: Some(PhysicalAddress::new(DRAM_BASE + TEXT_OFFSET)),
        align: 0x1000,
        min_offset: TEXT_OFFSET,
        max_offset: TEXT_OFFSET,
    }
}

#[test]
fn image_goes_to_the_preferred_address() {
    let mut sim = SimFirmware::new(platform_regions());
    let placed = relocate(
        &mut sim,
        PhysicalAddress::new(IMAGE_BASE),
        IMAGE_SIZE,
        IMAGE_SIZE + IMAGE_BSS,
        &arm64_constraints(),
    )
    .unwrap();

    assert_eq!(placed.address.as_u64(), DRAM_BASE + TEXT_OFFSET);
    assert_eq!(placed.size, IMAGE_SIZE + IMAGE_BSS);
    assert!(placed.allocated);
    assert_eq!(
        sim.read(PhysicalRange::new(placed.address, IMAGE_SIZE)).unwrap(),
        image_bytes()
    );
    let bss = sim
        .read(PhysicalRange::new(placed.address + IMAGE_SIZE, IMAGE_BSS))
        .unwrap();
    assert!(bss.iter().all(|&b| b == 0));
}

#[test]
fn image_already_in_place_is_not_moved() {
    let mut sim = SimFirmware::new(platform_regions());
    let mut constraints = arm64_constraints();
    constraints.region_base = PhysicalAddress::new(IMAGE_BASE - TEXT_OFFSET);
    constraints.preferred = Some(PhysicalAddress::new(IMAGE_BASE));

    let placed = relocate(
        &mut sim,
        PhysicalAddress::new(IMAGE_BASE),
        IMAGE_SIZE,
        IMAGE_SIZE + IMAGE_BSS,
        &constraints,
    )
    .unwrap();
    assert_eq!(placed.address.as_u64(), IMAGE_BASE);
    assert!(!placed.allocated);
    assert_eq!(sim.allocation_requests, 0);
}

#[test]
fn occupied_preferred_address_falls_back_and_fails_out_of_range() {
    // Firmware owns base + TEXT_OFFSET, so the only way out is lower
    // memory, which is never at the required offset.
    let mut regions = platform_regions();
    regions[1] = desc(MemoryType::CONVENTIONAL, DRAM_BASE, 0x10);
    regions.insert(2, desc(MemoryType::BOOT_SERVICES_DATA, DRAM_BASE + 0x1_0000, 0x3FF0));
    let mut sim = SimFirmware::new(regions);

    let err = relocate(
        &mut sim,
        PhysicalAddress::new(IMAGE_BASE),
        IMAGE_SIZE,
        IMAGE_SIZE + IMAGE_BSS,
        &arm64_constraints(),
    )
    .unwrap_err();

    assert_eq!(
        err,
        StubError::RelocationOutOfRange {
            what: "image",
            address: DRAM_BASE,
        }
    );
    assert_eq!(sim.outstanding(), 0);
}

fn window_constraints(mem_size: u64) -> Constraints {
    Constraints {
        region_base: PhysicalAddress::new(DRAM_BASE),
        preferred: None,
        align: 0x1_0000,
        min_offset: 0,
        max_offset: 0x100_0000 - mem_size,
    }
}

#[test]
fn lowest_fit_respects_alignment_and_window() {
    let mut sim = SimFirmware::new(platform_regions());
    let mem_size = IMAGE_SIZE + IMAGE_BSS;
    let constraints = window_constraints(mem_size);
    let current = PhysicalAddress::new(IMAGE_BASE);
    assert!(!constraints.admits(current));

    let placed = relocate(&mut sim, current, IMAGE_SIZE, mem_size, &constraints).unwrap();
    assert!(placed.address.is_aligned_to(0x1_0000));
    assert!(constraints.admits(placed.address));
    assert!(placed.range().end().as_u64() <= DRAM_BASE + 0x100_0000);
    assert_eq!(
        sim.read(PhysicalRange::new(placed.address, IMAGE_SIZE)).unwrap(),
        image_bytes()
    );
}

#[test]
fn lowest_fit_outside_the_window_is_no_low_memory() {
    let mut regions = platform_regions();
    regions[1] = desc(MemoryType::BOOT_SERVICES_DATA, DRAM_BASE, 0x4000);
    let mut sim = SimFirmware::new(regions);
    let mem_size = IMAGE_SIZE + IMAGE_BSS;

    let err = relocate(
        &mut sim,
        PhysicalAddress::new(IMAGE_BASE),
        IMAGE_SIZE,
        mem_size,
        &window_constraints(mem_size),
    )
    .unwrap_err();
    assert!(matches!(err, StubError::RelocationOutOfRange { what: "image", .. }));
    assert_eq!(sim.outstanding(), 0);
}

#[test]
fn zimage_window_matches_the_decompressor_limit() {
    let mem_size = IMAGE_SIZE + IMAGE_BSS;
    let constraints = Constraints {
        max_offset: ZIMAGE_OFFSET_LIMIT - mem_size,
        align: 0x1000,
        ..window_constraints(mem_size)
    };
    let last = PhysicalAddress::new(DRAM_BASE + ZIMAGE_OFFSET_LIMIT - mem_size);
    assert!(constraints.admits(last));
    assert!(!constraints.admits(last + 0x1000));
    assert!(!constraints.admits(PhysicalAddress::new(DRAM_BASE - 0x1000)));
}
