use crate::{PhysicalAddress, VirtualAddress};
use core::fmt;
use core::marker::PhantomData;

/// A firmware structure (or entry point) referenced by its physical address.
///
/// Valid while firmware still runs in physical mode, or under an identity
/// mapping. There is deliberately no conversion into a [`VirtualHandle`]:
/// the virtual location of a firmware object is only known once the firmware
/// itself has switched, and must be re-read then.
pub struct PhysicalHandle<T: ?Sized> {
    addr: PhysicalAddress,
    _type: PhantomData<fn() -> T>,
}

/// A firmware structure (or entry point) referenced by its OS virtual address,
/// after the firmware has been switched to virtual addressing.
pub struct VirtualHandle<T: ?Sized> {
    addr: VirtualAddress,
    _type: PhantomData<fn() -> T>,
}

impl<T: ?Sized> PhysicalHandle<T> {
    #[inline]
    #[must_use]
    pub const fn new(addr: PhysicalAddress) -> Self {
        Self {
            addr,
            _type: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn addr(&self) -> PhysicalAddress {
        self.addr
    }

    #[inline]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.addr.is_zero()
    }
}

impl<T: ?Sized> VirtualHandle<T> {
    /// # Safety
    /// The caller asserts that the firmware has completed its switch to
    /// virtual addressing and that `addr` was read back through the OS
    /// mapping after that switch.
    #[inline]
    #[must_use]
    pub const unsafe fn new(addr: VirtualAddress) -> Self {
        Self {
            addr,
            _type: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn addr(&self) -> VirtualAddress {
        self.addr
    }
}

macro_rules! handle_traits {
    ($name:ident, $tag:literal) => {
        impl<T: ?Sized> Clone for $name<T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T: ?Sized> Copy for $name<T> {}

        impl<T: ?Sized> PartialEq for $name<T> {
            fn eq(&self, other: &Self) -> bool {
                self.addr == other.addr
            }
        }

        impl<T: ?Sized> Eq for $name<T> {}

        impl<T: ?Sized> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(
                    f,
                    concat!($tag, "<{}>(0x{:016X})"),
                    core::any::type_name::<T>(),
                    self.addr.as_u64()
                )
            }
        }
    };
}

handle_traits!(PhysicalHandle, "PhysicalHandle");
handle_traits!(VirtualHandle, "VirtualHandle");
