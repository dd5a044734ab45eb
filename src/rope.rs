//! Rope strings.
//!
//! A [`Rope`] is an immutable, structurally shared string made of three kinds
//! of nodes:
//!
//! * **Leaf** – a contiguous buffer of UTF‑16 code units, stored either
//!   *narrow* (one byte per code unit, every unit ≤ `0xFF`) or *wide*
//!   (two bytes per unit).  The encoding is chosen from the content.
//! * **Concat** – an ordered list of child ropes.  Its length is always the
//!   sum of its children's lengths.
//! * **Flat** – the memoized result of flattening a former `Concat`.  The
//!   children are released, every holder of the node observes the same
//!   content as before.
//!
//! Concatenation is O(1): it allocates one node and copies nothing.  Appending
//! to a `Concat` nobody else holds pushes onto its child list in place, which
//! keeps `s += x` loops from building one wrapper per step.
//!
//! Every traversal (flattening, indexing, teardown) uses an explicit work
//! stack.  Ropes built from hundreds of thousands of nested concatenations
//! therefore never exhaust the native stack.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use bytes::Bytes;
use log::debug;
use thiserror::Error;

/// Largest string length (in code units) the engine will build.
pub const MAX_STRING_LENGTH: usize = (1 << 30) - 25;

/// Failures of rope operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RopeError {
    /// Code-unit access past the end of the string.
    #[error("index {index} out of range for string of length {length}")]
    IndexOutOfRange { index: usize, length: usize },

    /// The result would exceed [`MAX_STRING_LENGTH`].
    #[error("Invalid string length")]
    LengthOverflow,
}

/// A contiguous run of code units.
#[derive(Clone)]
pub enum FlatStr {
    /// Latin‑1: one byte per code unit.
    Narrow(Bytes),

    /// UTF‑16 code units.
    Wide(Rc<[u16]>),
}

impl FlatStr {
    pub fn len(&self) -> usize {
        match self {
            FlatStr::Narrow(bytes) => bytes.len(),
            FlatStr::Wide(units) => units.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, FlatStr::Wide(_))
    }

    pub fn code_unit(&self, index: usize) -> Option<u16> {
        match self {
            FlatStr::Narrow(bytes) => bytes.get(index).map(|&b| u16::from(b)),
            FlatStr::Wide(units) => units.get(index).copied(),
        }
    }

    /// The backing bytes of a narrow buffer.
    pub fn as_narrow(&self) -> Option<&[u8]> {
        match self {
            FlatStr::Narrow(bytes) => Some(bytes),
            FlatStr::Wide(_) => None,
        }
    }

    /// The backing units of a wide buffer.
    pub fn as_wide(&self) -> Option<&[u16]> {
        match self {
            FlatStr::Narrow(_) => None,
            FlatStr::Wide(units) => Some(units),
        }
    }

    pub fn code_units(&self) -> Box<dyn Iterator<Item = u16> + '_> {
        match self {
            FlatStr::Narrow(bytes) => Box::new(bytes.iter().map(|&b| u16::from(b))),
            FlatStr::Wide(units) => Box::new(units.iter().copied()),
        }
    }

    /// Decodes to UTF‑8; unpaired surrogates become U+FFFD.
    pub fn to_string_lossy(&self) -> String {
        match self {
            FlatStr::Narrow(bytes) => bytes.iter().map(|&b| char::from(b)).collect(),
            FlatStr::Wide(units) => String::from_utf16_lossy(units),
        }
    }

    /// `true` when both values share one allocation.
    pub fn same_buffer(&self, other: &FlatStr) -> bool {
        match (self, other) {
            (FlatStr::Narrow(a), FlatStr::Narrow(b)) => a.as_ptr() == b.as_ptr() && a.len() == b.len(),
            (FlatStr::Wide(a), FlatStr::Wide(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl PartialEq for FlatStr {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }

        match (self, other) {
            (FlatStr::Narrow(a), FlatStr::Narrow(b)) => a == b,
            (FlatStr::Wide(a), FlatStr::Wide(b)) => a == b,
            _ => self.code_units().eq(other.code_units()),
        }
    }
}

impl Eq for FlatStr {}

impl fmt::Debug for FlatStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoding = if self.is_wide() { "wide" } else { "narrow" };
        write!(f, "{}{:?}", encoding, self.to_string_lossy())
    }
}

enum Repr {
    Leaf(FlatStr),
    /// `ends[i]` is the offset just past `children[i]`.
    Concat { children: Vec<Rope>, ends: Vec<usize> },
    Flat(FlatStr),
}

struct RopeNode {
    len: Cell<usize>,
    wide: Cell<bool>,
    depth: Cell<usize>,
    repr: RefCell<Repr>,
}

impl Drop for RopeNode {
    fn drop(&mut self) {
        let mut stack = match self.repr.get_mut() {
            Repr::Concat { children, .. } => std::mem::take(children),
            _ => return,
        };

        // Tear down uniquely owned descendants here instead of letting
        // `Rc`'s drop glue recurse once per level.
        while let Some(child) = stack.pop() {
            if let Ok(mut node) = Rc::try_unwrap(child.0) {
                if let Repr::Concat { children, .. } = node.repr.get_mut() {
                    stack.append(children);
                }
            }
        }
    }
}

/// Which representation a rope node currently has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RopeShape {
    Leaf,
    Concat,
    Flat,
}

/// Reference-counted rope handle.  Cloning shares the node.
#[derive(Clone)]
pub struct Rope(Rc<RopeNode>);

impl Rope {
    fn from_flat(flat: FlatStr) -> Self {
        Rope(Rc::new(RopeNode {
            len: Cell::new(flat.len()),
            wide: Cell::new(flat.is_wide()),
            depth: Cell::new(0),
            repr: RefCell::new(Repr::Leaf(flat)),
        }))
    }

    pub fn empty() -> Self {
        Rope::from_flat(FlatStr::Narrow(Bytes::new()))
    }

    /// Builds a leaf from UTF‑8 text, narrow if every char fits in one byte.
    pub fn from_str(text: &str) -> Self {
        if text.chars().all(|c| u32::from(c) <= 0xFF) {
            let bytes: Vec<u8> = text.chars().map(|c| u32::from(c) as u8).collect();
            Rope::from_flat(FlatStr::Narrow(Bytes::from(bytes)))
        } else {
            let units: Vec<u16> = text.encode_utf16().collect();
            Rope::from_flat(FlatStr::Wide(units.into()))
        }
    }

    /// Builds a leaf from UTF‑16 code units, narrowing when possible.
    pub fn from_utf16(units: &[u16]) -> Self {
        if units.iter().all(|&u| u <= 0xFF) {
            let bytes: Vec<u8> = units.iter().map(|&u| u as u8).collect();
            Rope::from_flat(FlatStr::Narrow(Bytes::from(bytes)))
        } else {
            Rope::from_flat(FlatStr::Wide(units.into()))
        }
    }

    /// Builds a narrow leaf from Latin‑1 bytes (NUL included).
    pub fn from_latin1(bytes: impl Into<Bytes>) -> Self {
        Rope::from_flat(FlatStr::Narrow(bytes.into()))
    }

    pub fn len(&self) -> usize {
        self.0.len.get()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` when at least one leaf needs two bytes per code unit.
    pub fn is_wide(&self) -> bool {
        self.0.wide.get()
    }

    /// Longest path from this node to a leaf.  Zero for leaves and flattened nodes.
    pub fn depth(&self) -> usize {
        self.0.depth.get()
    }

    pub fn shape(&self) -> RopeShape {
        match &*self.0.repr.borrow() {
            Repr::Leaf(_) => RopeShape::Leaf,
            Repr::Concat { .. } => RopeShape::Concat,
            Repr::Flat(_) => RopeShape::Flat,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.shape() != RopeShape::Concat
    }

    pub fn ptr_eq(a: &Rope, b: &Rope) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// Address of the shared node, stable for the node's lifetime.
    pub fn node_addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    /// Number of handles sharing this node.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Concatenates without copying.  An empty operand yields the other one
    /// unchanged.
    pub fn concat(a: &Rope, b: &Rope) -> Result<Rope, RopeError> {
        if a.is_empty() {
            return Ok(b.clone());
        }
        if b.is_empty() {
            return Ok(a.clone());
        }

        let len = checked_len(a.len(), b.len())?;

        Ok(Rope(Rc::new(RopeNode {
            len: Cell::new(len),
            wide: Cell::new(a.is_wide() || b.is_wide()),
            depth: Cell::new(1 + a.depth().max(b.depth())),
            repr: RefCell::new(Repr::Concat {
                children: vec![a.clone(), b.clone()],
                ends: vec![a.len(), len],
            }),
        })))
    }

    /// Concatenation that may reuse `self`'s node.
    ///
    /// The node is grown in place only when this handle is its sole owner.
    /// Any alias taken earlier keeps a strong count above one, so it sees a
    /// fresh node allocated instead and its content never changes.
    pub fn append(self, other: &Rope) -> Result<Rope, RopeError> {
        if other.is_empty() {
            return Ok(self);
        }
        if self.is_empty() {
            return Ok(other.clone());
        }

        let len = checked_len(self.len(), other.len())?;

        if Rc::strong_count(&self.0) == 1 && Rc::weak_count(&self.0) == 0 {
            let grown = match &mut *self.0.repr.borrow_mut() {
                Repr::Concat { children, ends } => {
                    children.push(other.clone());
                    ends.push(len);
                    true
                }
                _ => false,
            };

            if grown {
                debug!("Appended in place; rope length now {}", len);

                let node = &self.0;
                node.len.set(len);
                node.wide.set(node.wide.get() || other.is_wide());
                node.depth.set(node.depth.get().max(1 + other.depth()));
                return Ok(self);
            }
        }

        Rope::concat(&self, other)
    }

    /// Materializes the content into one buffer and memoizes it on the node.
    ///
    /// Narrow leaves are widened when any leaf is wide.  Calling this again
    /// returns the memoized buffer without visiting children.
    pub fn flatten(&self) -> FlatStr {
        if let Repr::Leaf(flat) | Repr::Flat(flat) = &*self.0.repr.borrow() {
            return flat.clone();
        }

        let len = self.len();
        let flat = if self.is_wide() {
            let mut buf: Vec<u16> = Vec::with_capacity(len);
            self.for_each_leaf(|leaf| match leaf {
                FlatStr::Narrow(bytes) => buf.extend(bytes.iter().map(|&b| u16::from(b))),
                FlatStr::Wide(units) => buf.extend_from_slice(units),
            });
            FlatStr::Wide(buf.into())
        } else {
            let mut buf: Vec<u8> = Vec::with_capacity(len);
            self.for_each_leaf(|leaf| {
                if let FlatStr::Narrow(bytes) = leaf {
                    buf.extend_from_slice(bytes);
                }
            });
            FlatStr::Narrow(Bytes::from(buf))
        };

        debug!("Flattened rope of length {} (depth {})", len, self.depth());

        *self.0.repr.borrow_mut() = Repr::Flat(flat.clone());
        self.0.depth.set(0);

        flat
    }

    /// In-order leaf visit with an explicit stack.
    fn for_each_leaf(&self, mut visit: impl FnMut(&FlatStr)) {
        let mut stack: Vec<Rope> = vec![self.clone()];

        while let Some(node) = stack.pop() {
            match &*node.0.repr.borrow() {
                Repr::Leaf(flat) | Repr::Flat(flat) => visit(flat),
                Repr::Concat { children, .. } => stack.extend(children.iter().rev().cloned()),
            }
        }
    }

    /// Reads one code unit without flattening.  Each level costs a binary
    /// search over that node's children, so a wide node built by repeated
    /// appends stays cheap to index.
    pub fn char_at(&self, index: usize) -> Result<u16, RopeError> {
        let out_of_range = RopeError::IndexOutOfRange {
            index,
            length: self.len(),
        };

        if index >= self.len() {
            return Err(out_of_range);
        }

        let mut node = self.clone();
        let mut offset = index;

        loop {
            let next = match &*node.0.repr.borrow() {
                Repr::Leaf(flat) | Repr::Flat(flat) => {
                    return flat.code_unit(offset).ok_or(out_of_range);
                }
                Repr::Concat { children, ends } => {
                    let i = ends.partition_point(|&end| end <= offset);
                    let start = i.checked_sub(1).and_then(|j| ends.get(j)).copied().unwrap_or(0);
                    offset -= start;
                    children.get(i).cloned()
                }
            };

            match next {
                Some(child) => node = child,
                None => return Err(out_of_range),
            }
        }
    }

    /// Content equality, independent of tree shape.
    pub fn equals(&self, other: &Rope) -> bool {
        if Rope::ptr_eq(self, other) {
            return true;
        }
        if self.len() != other.len() {
            return false;
        }

        self.flatten() == other.flatten()
    }

    pub fn to_string_lossy(&self) -> String {
        self.flatten().to_string_lossy()
    }

    /// Direct children of a `Concat` node; empty for leaves and flat nodes.
    pub fn children(&self) -> Vec<Rope> {
        match &*self.0.repr.borrow() {
            Repr::Concat { children, .. } => children.clone(),
            _ => Vec::new(),
        }
    }
}

fn checked_len(a: usize, b: usize) -> Result<usize, RopeError> {
    match a.checked_add(b) {
        Some(len) if len <= MAX_STRING_LENGTH => Ok(len),
        _ => Err(RopeError::LengthOverflow),
    }
}

impl Default for Rope {
    fn default() -> Self {
        Rope::empty()
    }
}

impl From<&str> for Rope {
    fn from(text: &str) -> Self {
        Rope::from_str(text)
    }
}

impl PartialEq for Rope {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Eq for Rope {}

impl PartialOrd for Rope {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rope {
    /// Code-unit order, as the relational operators use.
    fn cmp(&self, other: &Self) -> Ordering {
        self.flatten().code_units().cmp(other.flatten().code_units())
    }
}

impl fmt::Display for Rope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl fmt::Debug for Rope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rope")
            .field("len", &self.len())
            .field("shape", &self.shape())
            .field("depth", &self.depth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_and_wide_leaves_are_chosen_by_content() {
        assert!(!Rope::from_str("plain ascii").is_wide());
        assert!(!Rope::from_str("caf\u{e9}").is_wide());
        assert!(Rope::from_str("\u{3042}").is_wide());
        assert!(!Rope::from_utf16(&[0x41, 0xFF]).is_wide());
    }

    #[test]
    fn flatten_drops_children_and_memoizes() {
        let rope = Rope::concat(&Rope::from_str("ab"), &Rope::from_str("cd")).unwrap();
        assert_eq!(rope.shape(), RopeShape::Concat);
        assert_eq!(rope.children().len(), 2);

        let first = rope.flatten();
        assert_eq!(rope.shape(), RopeShape::Flat);
        assert!(rope.children().is_empty());
        assert_eq!(rope.depth(), 0);

        let second = rope.flatten();
        assert!(first.same_buffer(&second));
    }

    #[test]
    fn unique_append_grows_the_same_node() {
        let base = Rope::concat(&Rope::from_str("a"), &Rope::from_str("b")).unwrap();
        let before = Rc::as_ptr(&base.0);

        let grown = base.append(&Rope::from_str("c")).unwrap();
        assert_eq!(Rc::as_ptr(&grown.0), before);
        assert_eq!(grown.children().len(), 3);
        assert_eq!(grown.char_at(2), Ok(u16::from(b'c')));
        assert_eq!(grown.to_string_lossy(), "abc");
    }

    #[test]
    fn shared_append_allocates_a_new_node() {
        let base = Rope::concat(&Rope::from_str("a"), &Rope::from_str("b")).unwrap();
        let alias = base.clone();

        let grown = base.append(&Rope::from_str("c")).unwrap();
        assert!(!Rope::ptr_eq(&grown, &alias));
        assert_eq!(alias.children().len(), 2);
        assert_eq!(alias.to_string_lossy(), "ab");
    }

    #[test]
    fn depth_tracks_nesting() {
        let mut rope = Rope::from_str("x");
        for _ in 0..5 {
            rope = Rope::concat(&rope, &Rope::from_str("y")).unwrap();
        }
        assert_eq!(rope.depth(), 5);
    }

    #[test]
    fn length_overflow_is_reported() {
        assert_eq!(checked_len(MAX_STRING_LENGTH, 1), Err(RopeError::LengthOverflow));
        assert_eq!(checked_len(usize::MAX, 1), Err(RopeError::LengthOverflow));
        assert_eq!(checked_len(3, 4), Ok(7));
    }
}
