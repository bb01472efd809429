use crate::header::{
    FDT_BEGIN_NODE, FDT_END, FDT_END_NODE, FDT_NOP, FDT_PROP, align4, be_u32, be_u64,
    check_header,
};
use crate::{DdbError, DeviceTree, Node, Property, Reservation};
use alloc::string::String;
use alloc::vec::Vec;

impl DeviceTree {
    /// Parse a loaded blob.
    ///
    /// `buf` is everything that was read from storage; the header must fit
    /// into it entirely (see [`check_header`]).
    ///
    /// # Errors
    /// Header errors as reported by [`check_header`], or
    /// [`DdbError::Malformed`] for a broken structure block.
    pub fn parse(buf: &[u8]) -> Result<Self, DdbError> {
        let header = check_header(buf)?;
        header.check_layout()?;
        let blob = &buf[..header.total_size as usize];

        let reservations = parse_reservations(blob, header.off_mem_rsvmap as usize)?;

        let strings_start = header.off_dt_strings as usize;
        let strings = &blob[strings_start..strings_start + header.size_dt_strings as usize];
        let struct_start = header.off_dt_struct as usize;
        let structure = &blob[struct_start..struct_start + header.size_dt_struct as usize];

        let root = parse_structure(structure, strings)?;
        Ok(Self {
            reservations,
            boot_cpuid_phys: header.boot_cpuid_phys,
            root,
        })
    }
}

fn parse_reservations(blob: &[u8], mut offset: usize) -> Result<Vec<Reservation>, DdbError> {
    let mut reservations = Vec::new();
    loop {
        if offset + 16 > blob.len() {
            return Err(DdbError::Malformed("unterminated reservation map"));
        }
        let address = be_u64(blob, offset);
        let size = be_u64(blob, offset + 8);
        offset += 16;
        if address == 0 && size == 0 {
            return Ok(reservations);
        }
        reservations.push(Reservation { address, size });
    }
}

fn parse_structure(structure: &[u8], strings: &[u8]) -> Result<Node, DdbError> {
    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<Node> = None;
    let mut pos = 0usize;

    let token_at = |pos: usize| -> Result<u32, DdbError> {
        if pos + 4 > structure.len() {
            return Err(DdbError::Malformed("structure block truncated"));
        }
        Ok(be_u32(structure, pos))
    };

    loop {
        let token = token_at(pos)?;
        pos += 4;
        match token {
            FDT_BEGIN_NODE => {
                if root.is_some() {
                    return Err(DdbError::Malformed("second root node"));
                }
                let name = c_str(structure, pos)?;
                pos += align4(name.len() + 1);
                stack.push(Node::new(name));
            }
            FDT_END_NODE => {
                let node = stack.pop().ok_or(DdbError::Malformed("unbalanced end of node"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            FDT_PROP => {
                let len = token_at(pos)? as usize;
                let name_off = token_at(pos + 4)? as usize;
                pos += 8;
                if pos + len > structure.len() {
                    return Err(DdbError::Malformed("property value truncated"));
                }
                let name = c_str(strings, name_off)?;
                let node = stack
                    .last_mut()
                    .ok_or(DdbError::Malformed("property outside of a node"))?;
                node.properties.push(Property {
                    name: String::from(name),
                    value: structure[pos..pos + len].to_vec(),
                });
                pos += align4(len);
            }
            FDT_NOP => {}
            FDT_END => {
                if !stack.is_empty() {
                    return Err(DdbError::Malformed("end token inside a node"));
                }
                return root.ok_or(DdbError::Malformed("no root node"));
            }
            _ => return Err(DdbError::Malformed("unknown structure token")),
        }
    }
}

/// The NUL-terminated string at `offset`, without the terminator.
fn c_str(buf: &[u8], offset: usize) -> Result<&str, DdbError> {
    let tail = buf
        .get(offset..)
        .ok_or(DdbError::Malformed("string offset out of range"))?;
    let len = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(DdbError::Malformed("unterminated string"))?;
    core::str::from_utf8(&tail[..len]).map_err(|_| DdbError::Malformed("string is not UTF-8"))
}
