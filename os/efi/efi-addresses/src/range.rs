use crate::{EfiPage, PageSize, PhysicalAddress};
use core::fmt;

/// A half-open physical range `[base, base + size)`.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct PhysicalRange {
    base: PhysicalAddress,
    size: u64,
}

impl PhysicalRange {
    #[inline]
    #[must_use]
    pub const fn new(base: PhysicalAddress, size: u64) -> Self {
        Self { base, size }
    }

    /// A range of `pages` firmware pages starting at `base`.
    #[inline]
    #[must_use]
    pub const fn from_efi_pages(base: PhysicalAddress, pages: u64) -> Self {
        Self::new(base, pages << EfiPage::SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Exclusive end of the range; saturates at the top of the address space.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base.as_u64().saturating_add(self.size))
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, addr: PhysicalAddress) -> bool {
        addr.as_u64() >= self.base.as_u64() && addr.as_u64() < self.end().as_u64()
    }

    /// Whether `other` lies entirely inside this range.
    #[inline]
    #[must_use]
    pub const fn covers(&self, other: &Self) -> bool {
        other.base.as_u64() >= self.base.as_u64() && other.end().as_u64() <= self.end().as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.base.as_u64() < other.end().as_u64() && other.base.as_u64() < self.end().as_u64()
    }

    /// Grow the range outwards to `S` boundaries.
    #[must_use]
    pub fn align_outwards<S: PageSize>(&self) -> Self {
        let base = self.base.align_down::<S>();
        let end = self
            .end()
            .align_up::<S>()
            .unwrap_or(PhysicalAddress::new(u64::MAX & !(S::SIZE - 1)));
        Self::new(base, end.as_u64() - base.as_u64())
    }

    /// Number of `S` pages spanned after aligning outwards.
    #[must_use]
    pub fn page_count<S: PageSize>(&self) -> u64 {
        self.align_outwards::<S>().size >> S::SHIFT
    }
}

impl fmt::Debug for PhysicalRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[0x{:016X}-0x{:016X})",
            self.base.as_u64(),
            self.end().as_u64()
        )
    }
}

/// Convert a range given in firmware pages to the OS's native page size `S`.
///
/// Returns the native-aligned base and the number of native pages needed to
/// cover the whole firmware range.
#[must_use]
pub fn efi_to_native<S: PageSize>(base: PhysicalAddress, efi_pages: u64) -> (PhysicalAddress, u64) {
    let range = PhysicalRange::from_efi_pages(base, efi_pages);
    let native = range.align_outwards::<S>();
    (native.base(), native.size() >> S::SHIFT)
}
