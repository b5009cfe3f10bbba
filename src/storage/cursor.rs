//! Locates a position in the tree and walks forward through it in key order.
use crate::errors::Error;
use crate::storage::btree::{Node, NodeType};
use crate::storage::row::Row;
use crate::storage::table::Table;

/// Names a position in the tree: either an existing cell, or the slot a
/// new key with this value would be inserted into.
pub struct Cursor<'a> {
    pub table: &'a mut Table,
    pub page_num: u32,
    pub cell_num: u32,
    pub end_of_table: bool,
}

impl<'a> Cursor<'a> {
    /// Descends from the root to the leaf that does or should contain `key`.
    pub fn find(table: &'a mut Table, key: u32) -> Result<Self, Error> {
        let root_page = table.root_page_num;
        let (page_num, cell_num) = find_leaf(table, root_page, key)?;
        Ok(Cursor {
            table,
            page_num,
            cell_num,
            end_of_table: false,
        })
    }

    /// Positions at the first row in key order.
    pub fn start(table: &'a mut Table) -> Result<Self, Error> {
        let mut cursor = Cursor::find(table, 0)?;
        let num_cells = cursor.leaf_num_cells()?;
        cursor.end_of_table = num_cells == 0;
        Ok(cursor)
    }

    fn leaf_num_cells(&mut self) -> Result<u32, Error> {
        let handle = self.table.pager.get(self.page_num)?;
        let node = handle
            .lock()
            .map_err(|e| Error::LockPoisoned(e.to_string()))?;
        Ok(node.leaf_node_num_cells())
    }

    /// Reads the row at the cursor's current position.
    pub fn value(&mut self) -> Result<Row, Error> {
        let handle = self.table.pager.get(self.page_num)?;
        let node = handle
            .lock()
            .map_err(|e| Error::LockPoisoned(e.to_string()))?;
        let bytes = node.leaf_node_value(self.cell_num)?;
        Row::deserialize(bytes)
    }

    /// Returns the key at the cursor's current position, if any.
    pub fn key(&mut self) -> Result<Option<u32>, Error> {
        let num_cells = self.leaf_num_cells()?;
        if self.cell_num >= num_cells {
            return Ok(None);
        }
        let handle = self.table.pager.get(self.page_num)?;
        let node = handle
            .lock()
            .map_err(|e| Error::LockPoisoned(e.to_string()))?;
        Ok(Some(node.leaf_node_key(self.cell_num)?))
    }

    /// Advances to the next row, following the leaf chain when the current
    /// leaf is exhausted.
    pub fn advance(&mut self) -> Result<(), Error> {
        let num_cells = self.leaf_num_cells()?;
        self.cell_num += 1;
        if self.cell_num >= num_cells {
            let next_leaf = {
                let handle = self.table.pager.get(self.page_num)?;
                let node = handle
                    .lock()
                    .map_err(|e| Error::LockPoisoned(e.to_string()))?;
                node.leaf_node_next_leaf()
            };
            if next_leaf == 0 {
                self.end_of_table = true;
            } else {
                self.page_num = next_leaf;
                self.cell_num = 0;
            }
        }
        Ok(())
    }
}

/// Descends from `page_num` to the leaf that does or should contain `key`,
/// returning `(leaf_page_num, cell_num)`. `cell_num` is the matching cell
/// if present, or the ascending insertion point otherwise.
fn find_leaf(table: &mut Table, page_num: u32, key: u32) -> Result<(u32, u32), Error> {
    let node_type = {
        let handle = table.pager.get(page_num)?;
        let node = handle
            .lock()
            .map_err(|e| Error::LockPoisoned(e.to_string()))?;
        node.get_node_type()?
    };

    match node_type {
        NodeType::Leaf => {
            let cell_num = {
                let handle = table.pager.get(page_num)?;
                let node = handle
                    .lock()
                    .map_err(|e| Error::LockPoisoned(e.to_string()))?;
                leaf_find(&node, key)?
            };
            Ok((page_num, cell_num))
        }
        NodeType::Internal => {
            let child_page = {
                let handle = table.pager.get(page_num)?;
                let node = handle
                    .lock()
                    .map_err(|e| Error::LockPoisoned(e.to_string()))?;
                let child_index = node.internal_node_find_child(key)?;
                node.internal_node_child(child_index)?
            };
            find_leaf(table, child_page, key)
        }
    }
}

/// Binary search within one leaf for `key`, returning the matching cell or
/// the ascending insertion point.
fn leaf_find(node: &Node, key: u32) -> Result<u32, Error> {
    let num_cells = node.leaf_node_num_cells();
    let mut lo = 0u32;
    let mut hi = num_cells;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let mid_key = node.leaf_node_key(mid)?;
        if mid_key == key {
            return Ok(mid);
        }
        if key < mid_key {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    Ok(lo)
}
