//! The B-Tree is the data structure used to represent the single table.
//!
//! Why is a tree a good data structure for a database?
//! - Searching for a particular value is fast (logarithmic time)
//! - Inserting a value you've already found a slot for is fast (constant-ish
//!   time to rebalance)
//! - Traversing a range of values is fast (unlike a hash map)
//!
//! Unlike a binary tree, each node here can have many more than 2 children.
//! Internal nodes and leaf nodes are structured differently:
//!
//! | Property           | Internal Node                  | Leaf Node              |
//! |---------------------|--------------------------------|------------------------|
//! | Stores              | keys and pointers to children  | keys and row values    |
//! | Number of keys      | up to `INTERNAL_NODE_MAX_KEYS`  | as many as will fit    |
//! | Number of pointers   | number of keys + 1             | none                   |
//! | Key purpose          | used for routing               | paired with a row      |
//!
//! A [`Node`] owns one raw page buffer and exposes typed accessors over it;
//! it never allocates beyond that buffer and never by itself decides which
//! page number it lives at (that's the pager's and tree's job).
use crate::errors::Error;
use crate::storage::pager::PAGE_SIZE;
use crate::storage::row::ROW_SIZE;

/// Marks the absence of a child pointer. Distinguishes "no child" from a
/// legitimate reference to page 0, which is always the root.
pub const INVALID_PAGE: u32 = u32::MAX;

/// Maximum number of keys an internal node may hold before it must split.
/// Kept deliberately small so splits are exercised by small test fixtures.
pub const INTERNAL_NODE_MAX_KEYS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Leaf,
    Internal,
}

// Common node header layout.
const NODE_TYPE_OFFSET: usize = 0;
const NODE_TYPE_SIZE: usize = 1;
const IS_ROOT_OFFSET: usize = NODE_TYPE_OFFSET + NODE_TYPE_SIZE;
const IS_ROOT_SIZE: usize = 1;
const PARENT_POINTER_OFFSET: usize = IS_ROOT_OFFSET + IS_ROOT_SIZE;
const PARENT_POINTER_SIZE: usize = 4;
pub const COMMON_NODE_HEADER_SIZE: usize = NODE_TYPE_SIZE + IS_ROOT_SIZE + PARENT_POINTER_SIZE;

// Leaf node header layout.
const LEAF_NODE_NUM_CELLS_OFFSET: usize = COMMON_NODE_HEADER_SIZE;
const LEAF_NODE_NUM_CELLS_SIZE: usize = 4;
const LEAF_NODE_NEXT_LEAF_OFFSET: usize = LEAF_NODE_NUM_CELLS_OFFSET + LEAF_NODE_NUM_CELLS_SIZE;
const LEAF_NODE_NEXT_LEAF_SIZE: usize = 4;
pub const LEAF_NODE_HEADER_SIZE: usize =
    COMMON_NODE_HEADER_SIZE + LEAF_NODE_NUM_CELLS_SIZE + LEAF_NODE_NEXT_LEAF_SIZE;

// Leaf node body layout.
const LEAF_NODE_KEY_SIZE: usize = 4;
const LEAF_NODE_VALUE_SIZE: usize = ROW_SIZE;
pub const LEAF_NODE_CELL_SIZE: usize = LEAF_NODE_KEY_SIZE + LEAF_NODE_VALUE_SIZE;
const LEAF_NODE_SPACE_FOR_CELLS: usize = PAGE_SIZE - LEAF_NODE_HEADER_SIZE;
pub const LEAF_NODE_MAX_CELLS: usize = LEAF_NODE_SPACE_FOR_CELLS / LEAF_NODE_CELL_SIZE;
pub const LEAF_NODE_RIGHT_SPLIT_COUNT: usize = (LEAF_NODE_MAX_CELLS + 1) / 2;
pub const LEAF_NODE_LEFT_SPLIT_COUNT: usize = (LEAF_NODE_MAX_CELLS + 1) - LEAF_NODE_RIGHT_SPLIT_COUNT;

// Internal node header layout.
const INTERNAL_NODE_NUM_KEYS_OFFSET: usize = COMMON_NODE_HEADER_SIZE;
const INTERNAL_NODE_NUM_KEYS_SIZE: usize = 4;
const INTERNAL_NODE_RIGHT_CHILD_OFFSET: usize =
    INTERNAL_NODE_NUM_KEYS_OFFSET + INTERNAL_NODE_NUM_KEYS_SIZE;
const INTERNAL_NODE_RIGHT_CHILD_SIZE: usize = 4;
const INTERNAL_NODE_HEADER_SIZE: usize =
    COMMON_NODE_HEADER_SIZE + INTERNAL_NODE_NUM_KEYS_SIZE + INTERNAL_NODE_RIGHT_CHILD_SIZE;

// Internal node body layout: each cell is (child: u32, key: u32).
const INTERNAL_NODE_CHILD_SIZE: usize = 4;
const INTERNAL_NODE_KEY_SIZE: usize = 4;
const INTERNAL_NODE_CELL_SIZE: usize = INTERNAL_NODE_CHILD_SIZE + INTERNAL_NODE_KEY_SIZE;

fn corrupt(msg: impl Into<String>) -> Error {
    Error::Corrupt(msg.into())
}

/// One page's worth of tree data, plus typed accessors over it.
///
/// Holds the raw bytes and nothing else: no page number, no dirty flag.
/// Those are tracked by the pager, which is what lets a single `Node` be
/// shared (via `Arc<Mutex<_>>`) across a mutation that touches several
/// pages at once without losing track of identity.
#[derive(Debug, Clone)]
pub struct Node {
    pub data: [u8; PAGE_SIZE],
}

impl Node {
    pub fn from_bytes(buf: [u8; PAGE_SIZE]) -> Self {
        Node { data: buf }
    }

    pub fn zeroed() -> Self {
        Node {
            data: [0u8; PAGE_SIZE],
        }
    }

    // --- common header ---

    pub fn get_node_type(&self) -> Result<NodeType, Error> {
        match self.data[NODE_TYPE_OFFSET] {
            0 => Ok(NodeType::Leaf),
            1 => Ok(NodeType::Internal),
            other => Err(corrupt(format!("invalid node type byte {other}"))),
        }
    }

    pub fn set_node_type(&mut self, node_type: NodeType) {
        self.data[NODE_TYPE_OFFSET] = match node_type {
            NodeType::Leaf => 0,
            NodeType::Internal => 1,
        };
    }

    pub fn is_node_root(&self) -> bool {
        self.data[IS_ROOT_OFFSET] == 1
    }

    pub fn set_node_root(&mut self, is_root: bool) {
        self.data[IS_ROOT_OFFSET] = is_root as u8;
    }

    pub fn node_parent(&self) -> u32 {
        read_u32(&self.data, PARENT_POINTER_OFFSET)
    }

    pub fn set_node_parent(&mut self, parent: u32) {
        write_u32(&mut self.data, PARENT_POINTER_OFFSET, parent);
    }

    /// The maximum key stored directly in *this* node's leaf cells.
    ///
    /// Only meaningful for a leaf. An internal node's true subtree maximum
    /// lives in its `right_child`'s subtree, not in anything this node's
    /// own bytes can tell you — computing that requires following the
    /// pager, which is why it's `Table::max_key`, not a `Node` method.
    pub fn leaf_node_max_key(&self) -> Result<u32, Error> {
        let n = self.leaf_node_num_cells();
        if n == 0 {
            return Err(corrupt("leaf node with no cells has no max key"));
        }
        self.leaf_node_key(n - 1)
    }

    // --- leaf node ---

    pub fn initialize_leaf_node(&mut self) {
        self.data = [0u8; PAGE_SIZE];
        self.set_node_type(NodeType::Leaf);
        self.set_node_root(false);
        self.set_leaf_node_num_cells(0);
        self.set_leaf_node_next_leaf(0);
    }

    pub fn leaf_node_num_cells(&self) -> u32 {
        read_u32(&self.data, LEAF_NODE_NUM_CELLS_OFFSET)
    }

    pub fn set_leaf_node_num_cells(&mut self, num: u32) {
        write_u32(&mut self.data, LEAF_NODE_NUM_CELLS_OFFSET, num);
    }

    pub fn leaf_node_next_leaf(&self) -> u32 {
        read_u32(&self.data, LEAF_NODE_NEXT_LEAF_OFFSET)
    }

    pub fn set_leaf_node_next_leaf(&mut self, next: u32) {
        write_u32(&mut self.data, LEAF_NODE_NEXT_LEAF_OFFSET, next);
    }

    fn leaf_node_cell_offset(&self, cell_num: u32) -> Result<usize, Error> {
        if cell_num as usize >= LEAF_NODE_MAX_CELLS {
            return Err(corrupt(format!(
                "leaf cell {cell_num} out of bounds (max {LEAF_NODE_MAX_CELLS})"
            )));
        }
        Ok(LEAF_NODE_HEADER_SIZE + cell_num as usize * LEAF_NODE_CELL_SIZE)
    }

    pub fn leaf_node_key(&self, cell_num: u32) -> Result<u32, Error> {
        let offset = self.leaf_node_cell_offset(cell_num)?;
        Ok(read_u32(&self.data, offset))
    }

    pub fn set_leaf_node_key(&mut self, cell_num: u32, key: u32) -> Result<(), Error> {
        let offset = self.leaf_node_cell_offset(cell_num)?;
        write_u32(&mut self.data, offset, key);
        Ok(())
    }

    pub fn leaf_node_value(&self, cell_num: u32) -> Result<&[u8], Error> {
        let offset = self.leaf_node_cell_offset(cell_num)? + LEAF_NODE_KEY_SIZE;
        Ok(&self.data[offset..offset + LEAF_NODE_VALUE_SIZE])
    }

    pub fn set_leaf_node_value(&mut self, cell_num: u32, value: &[u8]) -> Result<(), Error> {
        if value.len() != LEAF_NODE_VALUE_SIZE {
            return Err(corrupt(format!(
                "row value size mismatch (expected {LEAF_NODE_VALUE_SIZE}, got {})",
                value.len()
            )));
        }
        let offset = self.leaf_node_cell_offset(cell_num)? + LEAF_NODE_KEY_SIZE;
        self.data[offset..offset + LEAF_NODE_VALUE_SIZE].copy_from_slice(value);
        Ok(())
    }

    /// Shifts cells `[from, num_cells)` one slot to the right, making room
    /// to insert at `from`. Caller is responsible for bumping `num_cells`.
    pub fn leaf_node_shift_right(&mut self, from: u32, num_cells: u32) -> Result<(), Error> {
        let mut i = num_cells;
        while i > from {
            let src = self.leaf_node_cell_offset(i - 1)?;
            let dst = self.leaf_node_cell_offset(i)?;
            let cell = {
                let mut buf = [0u8; LEAF_NODE_CELL_SIZE];
                buf.copy_from_slice(&self.data[src..src + LEAF_NODE_CELL_SIZE]);
                buf
            };
            self.data[dst..dst + LEAF_NODE_CELL_SIZE].copy_from_slice(&cell);
            i -= 1;
        }
        Ok(())
    }

    // --- internal node ---

    pub fn initialize_internal_node(&mut self) {
        self.data = [0u8; PAGE_SIZE];
        self.set_node_type(NodeType::Internal);
        self.set_node_root(false);
        self.set_internal_node_num_keys(0);
        self.set_internal_node_right_child(INVALID_PAGE);
    }

    pub fn internal_node_num_keys(&self) -> u32 {
        read_u32(&self.data, INTERNAL_NODE_NUM_KEYS_OFFSET)
    }

    pub fn set_internal_node_num_keys(&mut self, num: u32) {
        write_u32(&mut self.data, INTERNAL_NODE_NUM_KEYS_OFFSET, num);
    }

    pub fn internal_node_right_child(&self) -> u32 {
        read_u32(&self.data, INTERNAL_NODE_RIGHT_CHILD_OFFSET)
    }

    pub fn set_internal_node_right_child(&mut self, page_num: u32) {
        write_u32(&mut self.data, INTERNAL_NODE_RIGHT_CHILD_OFFSET, page_num);
    }

    fn internal_node_cell_offset(&self, cell_num: u32) -> usize {
        INTERNAL_NODE_HEADER_SIZE + cell_num as usize * INTERNAL_NODE_CELL_SIZE
    }

    /// Returns the child pointer at `child_num`, where `child_num ==
    /// num_keys` means the trailing `right_child`.
    pub fn internal_node_child(&self, child_num: u32) -> Result<u32, Error> {
        let num_keys = self.internal_node_num_keys();
        if child_num > num_keys {
            return Err(corrupt(format!(
                "internal child {child_num} exceeds num_keys {num_keys}"
            )));
        }
        let page = if child_num == num_keys {
            self.internal_node_right_child()
        } else {
            let offset = self.internal_node_cell_offset(child_num);
            read_u32(&self.data, offset)
        };
        if page == INVALID_PAGE {
            return Err(corrupt(format!(
                "internal node child {child_num} is unset (INVALID_PAGE)"
            )));
        }
        Ok(page)
    }

    pub fn set_internal_node_child(&mut self, child_num: u32, page_num: u32) -> Result<(), Error> {
        let num_keys = self.internal_node_num_keys();
        if child_num > num_keys {
            return Err(corrupt(format!(
                "internal child {child_num} exceeds num_keys {num_keys}"
            )));
        }
        if child_num == num_keys {
            self.set_internal_node_right_child(page_num);
        } else {
            let offset = self.internal_node_cell_offset(child_num);
            write_u32(&mut self.data, offset, page_num);
        }
        Ok(())
    }

    pub fn internal_node_key(&self, key_num: u32) -> Result<u32, Error> {
        let num_keys = self.internal_node_num_keys();
        if key_num >= num_keys {
            return Err(corrupt(format!(
                "internal key {key_num} exceeds num_keys {num_keys}"
            )));
        }
        let offset = self.internal_node_cell_offset(key_num) + INTERNAL_NODE_CHILD_SIZE;
        Ok(read_u32(&self.data, offset))
    }

    pub fn set_internal_node_key(&mut self, key_num: u32, key: u32) -> Result<(), Error> {
        let num_keys = self.internal_node_num_keys();
        if key_num >= num_keys {
            return Err(corrupt(format!(
                "internal key {key_num} exceeds num_keys {num_keys}"
            )));
        }
        let offset = self.internal_node_cell_offset(key_num) + INTERNAL_NODE_CHILD_SIZE;
        write_u32(&mut self.data, offset, key);
        Ok(())
    }

    /// Binary search for the smallest child index whose key is `>= key`.
    /// A result equal to `num_keys` means "descend via right_child".
    pub fn internal_node_find_child(&self, key: u32) -> Result<u32, Error> {
        let num_keys = self.internal_node_num_keys();
        let mut lo = 0u32;
        let mut hi = num_keys;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let mid_key = self.internal_node_key(mid)?;
            if mid_key >= key {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Ok(lo)
    }

    /// Shifts body cells `[from, num_keys)` one slot to the right.
    pub fn internal_node_shift_right(&mut self, from: u32, num_keys: u32) {
        let mut i = num_keys;
        while i > from {
            let src = self.internal_node_cell_offset(i - 1);
            let dst = self.internal_node_cell_offset(i);
            let cell = {
                let mut buf = [0u8; INTERNAL_NODE_CELL_SIZE];
                buf.copy_from_slice(&self.data[src..src + INTERNAL_NODE_CELL_SIZE]);
                buf
            };
            self.data[dst..dst + INTERNAL_NODE_CELL_SIZE].copy_from_slice(&cell);
            i -= 1;
        }
    }
}

fn read_u32(data: &[u8; PAGE_SIZE], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

fn write_u32(data: &mut [u8; PAGE_SIZE], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_cell_round_trip() {
        let mut node = Node::zeroed();
        node.initialize_leaf_node();
        node.set_leaf_node_num_cells(1);
        node.set_leaf_node_key(0, 42).unwrap();
        let value = vec![7u8; ROW_SIZE];
        node.set_leaf_node_value(0, &value).unwrap();
        assert_eq!(node.leaf_node_key(0).unwrap(), 42);
        assert_eq!(node.leaf_node_value(0).unwrap(), value.as_slice());
    }

    #[test]
    fn internal_find_child_binary_search() {
        let mut node = Node::zeroed();
        node.initialize_internal_node();
        node.set_internal_node_num_keys(3);
        node.set_internal_node_key(0, 10).unwrap();
        node.set_internal_node_key(1, 20).unwrap();
        node.set_internal_node_key(2, 30).unwrap();
        assert_eq!(node.internal_node_find_child(5).unwrap(), 0);
        assert_eq!(node.internal_node_find_child(15).unwrap(), 1);
        assert_eq!(node.internal_node_find_child(25).unwrap(), 2);
        assert_eq!(node.internal_node_find_child(35).unwrap(), 3);
    }

    #[test]
    fn invalid_child_is_rejected() {
        let mut node = Node::zeroed();
        node.initialize_internal_node();
        assert!(node.internal_node_child(0).is_err());
    }
}
