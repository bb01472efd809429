use crate::DdbError;

pub const FDT_MAGIC: u32 = 0xd00d_feed;
pub const HEADER_SIZE: usize = 40;

/// Version written by this crate.
pub const FDT_VERSION: u32 = 17;
/// Oldest version a reader of our output must understand.
pub const FDT_LAST_COMP_VERSION: u32 = 16;

/// Oldest header layout we can still read (has `size_dt_strings`).
const FIRST_SUPPORTED_VERSION: u32 = 16;

pub(crate) const FDT_BEGIN_NODE: u32 = 1;
pub(crate) const FDT_END_NODE: u32 = 2;
pub(crate) const FDT_PROP: u32 = 3;
pub(crate) const FDT_NOP: u32 = 4;
pub(crate) const FDT_END: u32 = 9;

/// The fixed, big-endian blob header.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Header {
    pub magic: u32,
    pub total_size: u32,
    pub off_dt_struct: u32,
    pub off_dt_strings: u32,
    pub off_mem_rsvmap: u32,
    pub version: u32,
    pub last_comp_version: u32,
    pub boot_cpuid_phys: u32,
    pub size_dt_strings: u32,
    pub size_dt_struct: u32,
}

impl Header {
    /// Decode and sanity check the header at the start of `buf`.
    ///
    /// # Errors
    /// [`DdbError::BadHeader`] on a short buffer, wrong magic or an
    /// unsupported version.
    pub fn read(buf: &[u8]) -> Result<Self, DdbError> {
        if buf.len() < HEADER_SIZE {
            return Err(DdbError::BadHeader("shorter than the header"));
        }
        let word = |i: usize| be_u32(buf, i * 4);
        let header = Self {
            magic: word(0),
            total_size: word(1),
            off_dt_struct: word(2),
            off_dt_strings: word(3),
            off_mem_rsvmap: word(4),
            version: word(5),
            last_comp_version: word(6),
            boot_cpuid_phys: word(7),
            size_dt_strings: word(8),
            size_dt_struct: word(9),
        };
        if header.magic != FDT_MAGIC {
            return Err(DdbError::BadHeader("bad magic"));
        }
        if header.version < FIRST_SUPPORTED_VERSION || header.last_comp_version > FDT_VERSION {
            return Err(DdbError::BadHeader("unsupported version"));
        }
        if (header.total_size as usize) < HEADER_SIZE {
            return Err(DdbError::BadHeader("total size smaller than the header"));
        }
        Ok(header)
    }

    pub(crate) fn write(&self, out: &mut [u8]) {
        let words = [
            self.magic,
            self.total_size,
            self.off_dt_struct,
            self.off_dt_strings,
            self.off_mem_rsvmap,
            self.version,
            self.last_comp_version,
            self.boot_cpuid_phys,
            self.size_dt_strings,
            self.size_dt_struct,
        ];
        for (chunk, word) in out[..HEADER_SIZE].chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
    }

    /// Check that every block lies inside `total_size`.
    pub(crate) fn check_layout(&self) -> Result<(), DdbError> {
        let total = u64::from(self.total_size);
        let struct_end = u64::from(self.off_dt_struct) + u64::from(self.size_dt_struct);
        let strings_end = u64::from(self.off_dt_strings) + u64::from(self.size_dt_strings);
        if struct_end > total || strings_end > total || u64::from(self.off_mem_rsvmap) > total {
            return Err(DdbError::Malformed("block outside the declared size"));
        }
        Ok(())
    }
}

/// Validate a loaded blob the way the boot stub does before touching it:
/// the header must be sane, and the declared size must fit into the bytes
/// actually read.
///
/// # Errors
/// [`DdbError::BadHeader`] or [`DdbError::Incomplete`].
pub fn check_header(buf: &[u8]) -> Result<Header, DdbError> {
    let header = Header::read(buf)?;
    let declared = header.total_size as usize;
    if declared > buf.len() {
        return Err(DdbError::Incomplete {
            declared,
            available: buf.len(),
        });
    }
    Ok(header)
}

#[inline]
pub(crate) fn be_u32(buf: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    u32::from_be_bytes(raw)
}

#[inline]
pub(crate) fn be_u64(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_be_bytes(raw)
}

#[inline]
pub(crate) const fn align4(n: usize) -> usize {
    (n + 3) & !3
}
