//! Byte layout of the firmware system and runtime-services tables.
//!
//! Both tables start with the common 24-byte table header. Everything after
//! it is a sequence of natural-width pointers, so the offsets differ between
//! 32-bit and 64-bit firmware.

/// `EFI_SYSTEM_TABLE_SIGNATURE`, "IBI SYST" read as a little-endian `u64`.
pub const SYSTEM_TABLE_SIGNATURE: u64 = 0x5453_5953_2049_4249;

/// `EFI_RUNTIME_SERVICES_SIGNATURE`, "RUNTSERV".
pub const RUNTIME_SERVICES_SIGNATURE: u64 = 0x5652_4553_544e_5552;

/// Size of the common table header.
pub const HEADER_SIZE: usize = 24;

/// Width of the firmware's pointers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PointerWidth {
    Bits32,
    Bits64,
}

impl PointerWidth {
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Bits32 => 4,
            Self::Bits64 => 8,
        }
    }
}

/// Field offsets within the system table, the runtime-services table and a
/// configuration table entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TableLayout {
    pub width: PointerWidth,
}

impl TableLayout {
    pub const BITS_64: Self = Self {
        width: PointerWidth::Bits64,
    };

    pub const BITS_32: Self = Self {
        width: PointerWidth::Bits32,
    };

    /// Offset of the `n`-th pointer-sized field after the header.
    const fn slot(&self, n: usize) -> usize {
        HEADER_SIZE + n * self.width.bytes()
    }

    #[must_use]
    pub const fn fw_vendor(&self) -> usize {
        self.slot(0)
    }

    #[must_use]
    pub const fn runtime_services(&self) -> usize {
        // FirmwareRevision, ConsoleInHandle, ConIn, ConsoleOutHandle, ConOut, StandardErrorHandle, StdErr
        self.slot(8)
    }

    #[must_use]
    pub const fn nr_tables(&self) -> usize {
        self.slot(10)
    }

    #[must_use]
    pub const fn config_tables(&self) -> usize {
        self.slot(11)
    }

    /// Bytes of the system table read during init.
    #[must_use]
    pub const fn system_table_size(&self) -> usize {
        self.slot(12)
    }

    // GetTime, SetTime, GetWakeupTime, SetWakeupTime precede these.

    #[must_use]
    pub const fn set_virtual_address_map(&self) -> usize {
        self.slot(4)
    }

    #[must_use]
    pub const fn get_variable(&self) -> usize {
        self.slot(6)
    }

    #[must_use]
    pub const fn get_next_variable_name(&self) -> usize {
        self.slot(7)
    }

    #[must_use]
    pub const fn set_variable(&self) -> usize {
        self.slot(8)
    }

    /// A configuration table entry is a GUID followed by a pointer.
    #[must_use]
    pub const fn config_entry_size(&self) -> usize {
        16 + self.width.bytes()
    }

    /// Read a pointer-sized little-endian field.
    #[must_use]
    pub fn read_pointer(&self, bytes: &[u8], offset: usize) -> Option<u64> {
        let field = bytes.get(offset..offset + self.width.bytes())?;
        let mut raw = [0u8; 8];
        raw[..field.len()].copy_from_slice(field);
        Some(u64::from_le_bytes(raw))
    }
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(raw))
}

pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    let raw: [u8; 8] = bytes.get(offset..offset + 8)?.try_into().ok()?;
    Some(u64::from_le_bytes(raw))
}
