use crate::header::{
    FDT_BEGIN_NODE, FDT_END, FDT_END_NODE, FDT_LAST_COMP_VERSION, FDT_MAGIC, FDT_PROP,
    FDT_VERSION, HEADER_SIZE, Header, align4,
};
use crate::{DdbError, DeviceTree, Node};
use alloc::vec::Vec;

/// Value of a property supplied at write time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PropertyValue<'a> {
    Bytes(&'a [u8]),
    U32(u32),
    U64(u64),
}

impl PropertyValue<'_> {
    #[must_use]
    pub const fn len(&self) -> usize {
        match self {
            Self::Bytes(b) => b.len(),
            Self::U32(_) => 4,
            Self::U64(_) => 8,
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A property that is not stored in the tree but written on the fly.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PropertyRef<'a> {
    pub name: &'a str,
    pub value: PropertyValue<'a>,
}

/// Allocation-free writer for a [`DeviceTree`] plus a set of extra
/// properties placed into one top-level node.
///
/// Everything that needs the heap (the string table) is built by
/// [`Serializer::new`]. [`Serializer::write`] only touches the caller's
/// buffer, so it can run between capturing the firmware memory map and
/// exiting boot services without invalidating the map key.
#[derive(Debug)]
pub struct Serializer<'t> {
    tree: &'t DeviceTree,
    overlay_node: &'t str,
    strings: Vec<u8>,
}

impl<'t> Serializer<'t> {
    /// Prepare to write `tree`, with extra properties named `overlay_names`
    /// going into the top-level node `overlay_node`.
    #[must_use]
    pub fn new(tree: &'t DeviceTree, overlay_node: &'t str, overlay_names: &[&str]) -> Self {
        let mut strings = Vec::new();
        collect_strings(&tree.root, &mut strings);
        for name in overlay_names {
            intern(&mut strings, name);
        }
        Self {
            tree,
            overlay_node,
            strings,
        }
    }

    /// Exact size of the blob [`write`](Self::write) would produce.
    #[must_use]
    pub fn required_size(&self, overlay: &[PropertyRef<'_>]) -> usize {
        self.rsvmap_offset_end() + self.struct_size(overlay) + self.strings.len()
    }

    /// Serialize into `out`, returning the number of bytes written.
    ///
    /// # Errors
    /// - [`DdbError::NoSpace`] if `out` is too small; nothing meaningful has
    ///   been written in that case.
    /// - [`DdbError::MissingNode`] if the overlay target node does not exist.
    /// - [`DdbError::UnknownString`] if an overlay name was not announced to
    ///   [`Serializer::new`].
    pub fn write(&self, overlay: &[PropertyRef<'_>], out: &mut [u8]) -> Result<usize, DdbError> {
        if !overlay.is_empty() && self.tree.root.child(self.overlay_node).is_none() {
            return Err(DdbError::MissingNode);
        }
        if overlay
            .iter()
            .any(|p| string_offset(&self.strings, p.name).is_none())
        {
            return Err(DdbError::UnknownString);
        }

        let struct_size = self.struct_size(overlay);
        let off_dt_struct = self.rsvmap_offset_end();
        let off_dt_strings = off_dt_struct + struct_size;
        let total = off_dt_strings + self.strings.len();
        if total > out.len() {
            return Err(DdbError::NoSpace {
                required: total,
                capacity: out.len(),
            });
        }
        let total_u32 =
            u32::try_from(total).map_err(|_| DdbError::Malformed("blob exceeds 4 GiB"))?;

        let header = Header {
            magic: FDT_MAGIC,
            total_size: total_u32,
            off_dt_struct: off_dt_struct as u32,
            off_dt_strings: off_dt_strings as u32,
            off_mem_rsvmap: HEADER_SIZE as u32,
            version: FDT_VERSION,
            last_comp_version: FDT_LAST_COMP_VERSION,
            boot_cpuid_phys: self.tree.boot_cpuid_phys,
            size_dt_strings: self.strings.len() as u32,
            size_dt_struct: struct_size as u32,
        };
        header.write(out);

        let mut cursor = Cursor {
            buf: &mut out[..total],
            pos: HEADER_SIZE,
        };
        for r in &self.tree.reservations {
            cursor.u64(r.address);
            cursor.u64(r.size);
        }
        cursor.u64(0);
        cursor.u64(0);

        self.write_node(&mut cursor, &self.tree.root, 0, overlay)?;
        cursor.u32(FDT_END);
        debug_assert_eq!(cursor.pos, off_dt_strings);

        cursor.bytes(&self.strings);
        Ok(total)
    }

    const fn rsvmap_offset_end(&self) -> usize {
        HEADER_SIZE + 16 * (self.tree.reservations.len() + 1)
    }

    fn struct_size(&self, overlay: &[PropertyRef<'_>]) -> usize {
        node_size(&self.tree.root, 0, self.overlay_node, overlay) + 4
    }

    fn write_node(
        &self,
        cursor: &mut Cursor<'_>,
        node: &Node,
        depth: usize,
        overlay: &[PropertyRef<'_>],
    ) -> Result<(), DdbError> {
        cursor.u32(FDT_BEGIN_NODE);
        cursor.bytes(node.name.as_bytes());
        cursor.bytes(&[0]);
        cursor.pad4();

        let extra = if depth == 1 && node.name == self.overlay_node {
            overlay
        } else {
            &[]
        };

        for prop in &node.properties {
            if extra.iter().any(|p| p.name == prop.name) {
                continue;
            }
            let name_off = string_offset(&self.strings, &prop.name).ok_or(DdbError::UnknownString)?;
            cursor.u32(FDT_PROP);
            cursor.u32(prop.value.len() as u32);
            cursor.u32(name_off);
            cursor.bytes(&prop.value);
            cursor.pad4();
        }
        for prop in extra {
            let name_off = string_offset(&self.strings, prop.name).ok_or(DdbError::UnknownString)?;
            cursor.u32(FDT_PROP);
            cursor.u32(prop.value.len() as u32);
            cursor.u32(name_off);
            match prop.value {
                PropertyValue::Bytes(b) => cursor.bytes(b),
                PropertyValue::U32(v) => cursor.u32(v),
                PropertyValue::U64(v) => cursor.u64(v),
            }
            cursor.pad4();
        }

        for child in &node.children {
            self.write_node(cursor, child, depth + 1, overlay)?;
        }
        cursor.u32(FDT_END_NODE);
        Ok(())
    }
}

impl DeviceTree {
    /// Serialize into a freshly allocated, exactly sized buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let serializer = Serializer::new(self, "", &[]);
        let mut out = alloc::vec![0u8; serializer.required_size(&[])];
        // The buffer is sized from the same serializer and no overlay is used,
        // so this cannot fail.
        let written = serializer.write(&[], &mut out).unwrap_or(0);
        out.truncate(written);
        out
    }
}

fn node_size(node: &Node, depth: usize, overlay_node: &str, overlay: &[PropertyRef<'_>]) -> usize {
    let extra = if depth == 1 && node.name == overlay_node {
        overlay
    } else {
        &[]
    };
    let mut size = 4 + align4(node.name.len() + 1);
    size += node
        .properties
        .iter()
        .filter(|p| !extra.iter().any(|e| e.name == p.name))
        .map(|p| 12 + align4(p.value.len()))
        .sum::<usize>();
    size += extra.iter().map(|p| 12 + align4(p.value.len())).sum::<usize>();
    size += node
        .children
        .iter()
        .map(|c| node_size(c, depth + 1, overlay_node, overlay))
        .sum::<usize>();
    size + 4
}

fn collect_strings(node: &Node, strings: &mut Vec<u8>) {
    for prop in &node.properties {
        intern(strings, &prop.name);
    }
    for child in &node.children {
        collect_strings(child, strings);
    }
}

fn intern(strings: &mut Vec<u8>, name: &str) {
    if string_offset(strings, name).is_none() {
        strings.extend_from_slice(name.as_bytes());
        strings.push(0);
    }
}

/// Offset of `name` in a block of NUL-terminated strings.
fn string_offset(strings: &[u8], name: &str) -> Option<u32> {
    let mut offset = 0usize;
    for entry in strings.split(|&b| b == 0) {
        if offset >= strings.len() {
            break;
        }
        if entry == name.as_bytes() {
            return u32::try_from(offset).ok();
        }
        offset += entry.len() + 1;
    }
    None
}

struct Cursor<'b> {
    buf: &'b mut [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn bytes(&mut self, b: &[u8]) {
        self.buf[self.pos..self.pos + b.len()].copy_from_slice(b);
        self.pos += b.len();
    }

    fn u32(&mut self, v: u32) {
        self.bytes(&v.to_be_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.bytes(&v.to_be_bytes());
    }

    fn pad4(&mut self) {
        let aligned = align4(self.pos);
        self.buf[self.pos..aligned].fill(0);
        self.pos = aligned;
    }
}
