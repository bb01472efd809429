use core::fmt;
use core::hash::Hash;

/// Sealed trait pattern to restrict `PageSize` impls to our markers.
mod sealed {
    pub trait Sealed {}
}

/// Marker trait for supported page and section sizes.
pub trait PageSize:
    sealed::Sealed + Clone + Copy + Eq + PartialEq + Ord + PartialOrd + Hash + fmt::Debug
{
    /// Size in bytes (power of two).
    const SIZE: u64;
    /// log2(SIZE), i.e., number of low bits used for the offset.
    const SHIFT: u32;

    fn as_str() -> &'static str;

    /// Number of pages of this size needed to cover `bytes`.
    #[inline]
    #[must_use]
    fn pages_for(bytes: u64) -> u64 {
        bytes.div_ceil(Self::SIZE)
    }
}

macro_rules! page_size {
    ($(#[$doc:meta])* $name:ident, $shift:expr, $label:literal) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name;

        impl sealed::Sealed for $name {}

        impl PageSize for $name {
            const SIZE: u64 = 1 << $shift;
            const SHIFT: u32 = $shift;

            fn as_str() -> &'static str {
                $label
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(Self::as_str())
            }
        }
    };
}

page_size!(
    /// 4 KiB page. This is the unit firmware uses for every page count.
    Size4K,
    12,
    "4K"
);

page_size!(
    /// 64 KiB page, a native granule on some 64-bit ARM kernels.
    Size64K,
    16,
    "64K"
);

page_size!(
    /// 2 MiB section; the granularity of the transient identity map.
    Size2M,
    21,
    "2M"
);

/// The page size used by every firmware memory descriptor.
pub type EfiPage = Size4K;
