//! Placement rules of the supported early boot protocols.

/// Offset of the ARM64 kernel image from the 2 MiB aligned base of RAM.
pub const TEXT_OFFSET: u64 = 0x8_0000;

/// Largest blob the ARM64 kernel maps early; also the blob alignment.
pub const MAX_DTB_SIZE: u64 = 0x4_0000;
pub const DTB_ALIGN: u64 = MAX_DTB_SIZE;

/// The ARM64 kernel only maps the first 512 MiB of RAM before its own page
/// tables exist; the blob and initrd have to sit below that.
pub const MAX_DTB_OFFSET: u64 = 0x2000_0000;

/// Room reserved at the base of RAM for the decompressed ARM32 kernel.
pub const MAX_UNCOMP_KERNEL_SIZE: u64 = 32 * 1024 * 1024;

/// The ARM32 decompressor assumes the zImage sits within 128 MiB of the
/// base of RAM.
pub const ZIMAGE_OFFSET_LIMIT: u64 = 128 * 1024 * 1024;

/// Extra room added on top of the source blob for the first attempt.
pub const ARM32_BLOB_SLACK: u64 = 0x800;

/// Page size firmware allocates in.
pub const EFI_PAGE_SIZE: u64 = 4096;

/// File read when the firmware passes an empty command line and the
/// `cmdline-file` feature is enabled.
pub const CMDLINE_FILE: &str = "cmdline";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Arch {
    Arm64,
    Arm32,
}

/// Where the base of RAM comes from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DramBase {
    /// Lowest conventional region of the firmware map, masked to this alignment.
    FromMemoryMap { align: u64 },
    /// First `memory` node of the supplied device tree.
    FromBlob,
}

/// How the blob buffer grows after a failed write.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlobGrowth {
    /// Add a fixed number of bytes.
    Add(u64),
    /// Add a quarter of the current capacity.
    Quarter,
}

impl BlobGrowth {
    #[must_use]
    pub const fn next(self, capacity: u64) -> u64 {
        match self {
            Self::Add(bytes) => capacity + bytes,
            Self::Quarter => capacity + capacity.div_ceil(4),
        }
    }
}

/// Initial extra room of the new blob over the source blob.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlobSlack {
    Fixed(u64),
    /// The command line length plus a fixed amount.
    CommandLinePlus(u64),
}

impl BlobSlack {
    #[must_use]
    pub const fn bytes(self, cmdline_len: usize) -> u64 {
        match self {
            Self::Fixed(bytes) => bytes,
            Self::CommandLinePlus(bytes) => cmdline_len as u64 + bytes,
        }
    }
}

/// Rules the boot stub follows for one early boot protocol.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StubConfig {
    pub arch: Arch,
    pub dram_base: DramBase,
    /// Exact offset of the image from the base of RAM, if the protocol has one.
    pub image_offset: Option<u64>,
    pub image_align: u64,
    /// The image must *end* below `base + image_limit`.
    pub image_limit: u64,
    /// Pages reserved at the base of RAM before placing the image.
    pub kernel_reserve: Option<u64>,
    /// The initrd must end below `base + initrd_limit`.
    pub initrd_limit: u64,
    pub blob_align: u64,
    /// The new blob must end below `base + blob_limit`.
    pub blob_limit: u64,
    pub blob_slack: BlobSlack,
    pub blob_growth: BlobGrowth,
    /// Fail when no `dtb=` is given instead of building an empty tree.
    pub require_blob: bool,
    /// Fallback file for an empty command line.
    pub cmdline_file: Option<&'static str>,
}

impl StubConfig {
    #[must_use]
    pub const fn arm64() -> Self {
        Self {
            arch: Arch::Arm64,
            dram_base: DramBase::FromMemoryMap { align: TEXT_OFFSET },
            image_offset: Some(TEXT_OFFSET),
            image_align: EFI_PAGE_SIZE,
            image_limit: MAX_DTB_OFFSET,
            kernel_reserve: None,
            initrd_limit: MAX_DTB_OFFSET,
            blob_align: DTB_ALIGN,
            blob_limit: MAX_DTB_OFFSET,
            blob_slack: BlobSlack::Fixed(EFI_PAGE_SIZE),
            blob_growth: BlobGrowth::Add(EFI_PAGE_SIZE),
            require_blob: false,
            cmdline_file: cmdline_file(),
        }
    }

    #[must_use]
    pub const fn arm32() -> Self {
        Self {
            arch: Arch::Arm32,
            dram_base: DramBase::FromBlob,
            image_offset: None,
            image_align: EFI_PAGE_SIZE,
            image_limit: ZIMAGE_OFFSET_LIMIT,
            kernel_reserve: Some(MAX_UNCOMP_KERNEL_SIZE),
            initrd_limit: ZIMAGE_OFFSET_LIMIT,
            blob_align: EFI_PAGE_SIZE,
            blob_limit: ZIMAGE_OFFSET_LIMIT,
            blob_slack: BlobSlack::CommandLinePlus(ARM32_BLOB_SLACK),
            blob_growth: BlobGrowth::Quarter,
            require_blob: true,
            cmdline_file: cmdline_file(),
        }
    }

    /// The profile matching the architecture this crate is built for.
    #[must_use]
    pub const fn native() -> Self {
        if cfg!(target_arch = "arm") {
            Self::arm32()
        } else {
            Self::arm64()
        }
    }
}

const fn cmdline_file() -> Option<&'static str> {
    if cfg!(feature = "cmdline-file") {
        Some(CMDLINE_FILE)
    } else {
        None
    }
}
