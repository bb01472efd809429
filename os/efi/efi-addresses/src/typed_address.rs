use crate::{MemoryAddress, PageSize};
use core::fmt;
use core::ops::{Add, AddAssign};

macro_rules! typed_address {
    ($(#[$doc:meta])* $name:ident, $tag:literal) => {
        $(#[$doc])*
        #[repr(transparent)]
        #[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(MemoryAddress);

        impl $name {
            #[inline]
            #[must_use]
            pub const fn new(v: u64) -> Self {
                Self(MemoryAddress::new(v))
            }

            #[inline]
            #[must_use]
            pub const fn zero() -> Self {
                Self::new(0)
            }

            #[inline]
            #[must_use]
            pub fn from_ptr<T>(ptr: *const T) -> Self {
                Self(MemoryAddress::from_ptr(ptr))
            }

            #[inline]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0.as_u64()
            }

            #[inline]
            #[must_use]
            pub const fn is_zero(self) -> bool {
                self.0.as_u64() == 0
            }

            #[inline]
            #[must_use]
            pub const fn align_down<S: PageSize>(self) -> Self {
                Self(self.0.align_down::<S>())
            }

            #[inline]
            #[must_use]
            pub const fn align_up<S: PageSize>(self) -> Option<Self> {
                match self.0.align_up::<S>() {
                    Some(a) => Some(Self(a)),
                    None => None,
                }
            }

            #[inline]
            #[must_use]
            pub const fn align_down_to(self, align: u64) -> Self {
                Self(self.0.align_down_to(align))
            }

            #[inline]
            #[must_use]
            pub const fn align_up_to(self, align: u64) -> Option<Self> {
                match self.0.align_up_to(align) {
                    Some(a) => Some(Self(a)),
                    None => None,
                }
            }

            #[inline]
            #[must_use]
            pub const fn is_aligned_to(self, align: u64) -> bool {
                self.0.is_aligned_to(align)
            }

            #[inline]
            #[must_use]
            pub const fn checked_add(self, rhs: u64) -> Option<Self> {
                match self.0.checked_add(rhs) {
                    Some(a) => Some(Self(a)),
                    None => None,
                }
            }

            /// Distance from `base` up to `self`, or `None` if `self` lies below `base`.
            #[inline]
            #[must_use]
            pub const fn offset_from(self, base: Self) -> Option<u64> {
                self.as_u64().checked_sub(base.as_u64())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "(0x{:016X})"), self.as_u64())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:016X}", self.as_u64())
            }
        }

        impl fmt::LowerHex for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.as_u64(), f)
            }
        }

        impl Add<u64> for $name {
            type Output = Self;
            #[inline]
            fn add(self, rhs: u64) -> Self::Output {
                Self::new(self.as_u64() + rhs)
            }
        }

        impl AddAssign<u64> for $name {
            #[inline]
            fn add_assign(&mut self, rhs: u64) {
                *self = *self + rhs;
            }
        }

        impl From<u64> for $name {
            #[inline]
            fn from(v: u64) -> Self {
                Self::new(v)
            }
        }

        impl From<$name> for MemoryAddress {
            #[inline]
            fn from(v: $name) -> Self {
                v.0
            }
        }
    };
}

typed_address!(
    /// Physical memory address.
    ///
    /// Before the virtual-address-map switch this is also the address the
    /// firmware dereferences. Boot-stub code runs identity mapped, so a
    /// physical address can be turned into a pointer with [`PhysicalAddress::as_mut_ptr`].
    PhysicalAddress,
    "PA"
);

typed_address!(
    /// Virtual memory address in the OS's own address space.
    ///
    /// It does not validate canonicality at runtime; it only carries the *kind* of
    /// address at the type level so you don't accidentally mix virtual and physical
    /// values.
    VirtualAddress,
    "VA"
);

impl PhysicalAddress {
    /// Pointer to this address under an identity mapping.
    #[inline]
    #[must_use]
    pub fn as_mut_ptr<T>(self) -> *mut T {
        self.as_u64() as usize as *mut T
    }

    /// The identity-mapped virtual address for this physical address.
    #[inline]
    #[must_use]
    pub const fn identity(self) -> VirtualAddress {
        VirtualAddress::new(self.as_u64())
    }
}
