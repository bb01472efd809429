use alloc::string::String;
use alloc::vec::Vec;

/// One entry of the memory reservation block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Reservation {
    pub address: u64,
    pub size: u64,
}

/// A named property with a raw big-endian value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Property {
    pub name: String,
    pub value: Vec<u8>,
}

impl Property {
    /// The value as a single 32-bit cell.
    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        let raw: [u8; 4] = self.value.as_slice().try_into().ok()?;
        Some(u32::from_be_bytes(raw))
    }

    /// The value as one 64-bit quantity stored in two cells.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        let raw: [u8; 8] = self.value.as_slice().try_into().ok()?;
        Some(u64::from_be_bytes(raw))
    }

    /// The value read as a big-endian number of however many cells it has.
    ///
    /// One cell reads as a `u32`, two as a `u64`. Longer values keep only the
    /// low 64 bits.
    #[must_use]
    pub fn as_cells(&self) -> Option<u64> {
        if self.value.is_empty() || self.value.len() % 4 != 0 {
            return None;
        }
        Some(
            self.value
                .chunks_exact(4)
                .fold(0u64, |acc, c| (acc << 32) | u64::from(u32::from_be_bytes([c[0], c[1], c[2], c[3]]))),
        )
    }

    /// The value as a NUL-terminated string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        let (last, body) = self.value.split_last()?;
        if *last != 0 {
            return None;
        }
        core::str::from_utf8(body).ok()
    }
}

/// A node of the tree; the root node has an empty name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Node {
    pub name: String,
    pub properties: Vec<Property>,
    pub children: Vec<Node>,
}

impl Node {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Set (or replace) a property with raw bytes.
    pub fn set_property(&mut self, name: &str, value: impl Into<Vec<u8>>) {
        let value = value.into();
        match self.properties.iter_mut().find(|p| p.name == name) {
            Some(p) => p.value = value,
            None => self.properties.push(Property {
                name: String::from(name),
                value,
            }),
        }
    }

    pub fn set_u32(&mut self, name: &str, value: u32) {
        self.set_property(name, value.to_be_bytes().to_vec());
    }

    pub fn set_u64(&mut self, name: &str, value: u64) {
        self.set_property(name, value.to_be_bytes().to_vec());
    }

    /// Set a string property; the stored value is NUL terminated.
    pub fn set_str(&mut self, name: &str, value: &str) {
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
        self.set_property(name, bytes);
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Property> {
        let idx = self.properties.iter().position(|p| p.name == name)?;
        Some(self.properties.remove(idx))
    }

    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// The child called `name`, created empty if it does not exist yet.
    pub fn child_or_insert(&mut self, name: &str) -> &mut Node {
        let idx = match self.children.iter().position(|c| c.name == name) {
            Some(idx) => idx,
            None => {
                self.children.push(Node::new(name));
                self.children.len() - 1
            }
        };
        &mut self.children[idx]
    }

    /// Remove every direct child for which `pred` holds; returns how many went.
    pub fn remove_children(&mut self, mut pred: impl FnMut(&Node) -> bool) -> usize {
        let before = self.children.len();
        self.children.retain(|c| !pred(c));
        before - self.children.len()
    }

    /// Whether this node describes RAM (`device_type = "memory"`).
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.property("device_type").and_then(Property::as_str) == Some("memory")
    }
}

/// An owned, editable device description blob.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceTree {
    pub reservations: Vec<Reservation>,
    pub boot_cpuid_phys: u32,
    pub root: Node,
}

impl DeviceTree {
    /// A tree with nothing but an empty root node.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The `/chosen` node, also accepting the `chosen@0` spelling.
    #[must_use]
    pub fn chosen(&self) -> Option<&Node> {
        self.root
            .children
            .iter()
            .find(|c| c.name == "chosen" || c.name == "chosen@0")
    }

    /// The `/chosen` node, created if missing.
    pub fn chosen_mut(&mut self) -> &mut Node {
        let idx = self
            .root
            .children
            .iter()
            .position(|c| c.name == "chosen" || c.name == "chosen@0");
        match idx {
            Some(idx) => &mut self.root.children[idx],
            None => self.root.child_or_insert("chosen"),
        }
    }

    /// Drop every top-level memory node; returns how many were removed.
    pub fn remove_memory_nodes(&mut self) -> usize {
        self.root.remove_children(Node::is_memory)
    }

    /// Base address of the first memory node's first `reg` entry.
    #[must_use]
    pub fn memory_base(&self) -> Option<u64> {
        let address_cells = self
            .root
            .property("#address-cells")
            .and_then(Property::as_u32)
            .unwrap_or(2) as usize;
        let reg = self
            .root
            .children
            .iter()
            .find(|n| n.is_memory())?
            .property("reg")?;
        let bytes = reg.value.get(..address_cells * 4)?;
        let cells = Property {
            name: String::new(),
            value: bytes.to_vec(),
        };
        cells.as_cells()
    }
}
