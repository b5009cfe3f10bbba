//! Ties the pager and the B+ tree together into the one table this engine
//! stores. Owns the root page number and every mutating tree operation:
//! leaf insert, leaf split, internal insert, internal split, and the
//! root-splitting dance that keeps the root pinned at page 0.
use std::path::Path;

use tracing::{debug, trace, warn};

use crate::errors::Error;
use crate::storage::btree::{self, Node, NodeType};
use crate::storage::cursor::Cursor;
use crate::storage::pager::{Pager, PAGE_SIZE};
use crate::storage::row::{Row, ROW_SIZE};

#[derive(Debug, PartialEq, Eq)]
pub enum ExecuteResult {
    Success,
    DuplicateKey,
}

pub struct Table {
    pub pager: Pager,
    pub root_page_num: u32,
}

fn lock_err(e: impl std::fmt::Display) -> Error {
    Error::LockPoisoned(e.to_string())
}

impl Table {
    /// Opens (or creates) the backing file. A freshly created file gets a
    /// single root leaf at page 0.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let mut pager = Pager::open(path)?;
        if pager.num_pages() == 0 {
            let handle = pager.get(0)?;
            let mut root = handle.lock().map_err(lock_err)?;
            root.initialize_leaf_node();
            root.set_node_root(true);
        }
        Ok(Table {
            pager,
            root_page_num: 0,
        })
    }

    pub fn close(&mut self) -> Result<(), Error> {
        self.pager.close()
    }

    // --- top-level operations ---

    pub fn execute_insert(&mut self, row: Row) -> Result<ExecuteResult, Error> {
        let key = row.id;
        let (page_num, cell_num, existing_key) = {
            let mut cursor = Cursor::find(self, key)?;
            let existing_key = cursor.key()?;
            (cursor.page_num, cursor.cell_num, existing_key)
        };

        if existing_key == Some(key) {
            return Ok(ExecuteResult::DuplicateKey);
        }

        self.leaf_insert(page_num, cell_num, key, &row)?;
        Ok(ExecuteResult::Success)
    }

    pub fn execute_select(&mut self) -> Result<Vec<Row>, Error> {
        let mut rows = Vec::new();
        let mut cursor = Cursor::start(self)?;
        while !cursor.end_of_table {
            rows.push(cursor.value()?);
            cursor.advance()?;
        }
        Ok(rows)
    }

    // --- tree mutation ---

    /// The true maximum key in the subtree rooted at `page_num`, following
    /// `right_child` all the way down for internal nodes.
    fn max_key(&mut self, page_num: u32) -> Result<u32, Error> {
        let node_type = {
            let handle = self.pager.get(page_num)?;
            let node = handle.lock().map_err(lock_err)?;
            node.get_node_type()?
        };
        match node_type {
            NodeType::Leaf => {
                let handle = self.pager.get(page_num)?;
                let node = handle.lock().map_err(lock_err)?;
                node.leaf_node_max_key()
            }
            NodeType::Internal => {
                let right_child = {
                    let handle = self.pager.get(page_num)?;
                    let node = handle.lock().map_err(lock_err)?;
                    node.internal_node_right_child()
                };
                self.max_key(right_child)
            }
        }
    }

    fn leaf_insert(&mut self, page_num: u32, cell_num: u32, key: u32, row: &Row) -> Result<(), Error> {
        let num_cells = {
            let handle = self.pager.get(page_num)?;
            let node = handle.lock().map_err(lock_err)?;
            node.leaf_node_num_cells()
        };

        if num_cells as usize >= btree::LEAF_NODE_MAX_CELLS {
            return self.leaf_split_and_insert(page_num, cell_num, key, row);
        }

        let handle = self.pager.get(page_num)?;
        let mut node = handle.lock().map_err(lock_err)?;
        if cell_num < num_cells {
            node.leaf_node_shift_right(cell_num, num_cells)?;
        }
        node.set_leaf_node_num_cells(num_cells + 1);
        node.set_leaf_node_key(cell_num, key)?;
        let mut buf = [0u8; ROW_SIZE];
        row.serialize(&mut buf);
        node.set_leaf_node_value(cell_num, &buf)?;
        Ok(())
    }

    fn leaf_split_and_insert(
        &mut self,
        old_page_num: u32,
        insert_at: u32,
        key: u32,
        row: &Row,
    ) -> Result<(), Error> {
        debug!(old_page_num, "splitting leaf node");
        let new_page_num = self.pager.get_unused_page_num();

        let (old_is_root, old_parent, old_next_leaf) = {
            let handle = self.pager.get(old_page_num)?;
            let node = handle.lock().map_err(lock_err)?;
            (node.is_node_root(), node.node_parent(), node.leaf_node_next_leaf())
        };

        {
            let handle = self.pager.get(new_page_num)?;
            let mut new_node = handle.lock().map_err(lock_err)?;
            new_node.initialize_leaf_node();
            new_node.set_node_parent(old_parent);
            new_node.set_leaf_node_next_leaf(old_next_leaf);
        }
        {
            let handle = self.pager.get(old_page_num)?;
            let mut old_node = handle.lock().map_err(lock_err)?;
            old_node.set_leaf_node_next_leaf(new_page_num);
        }

        // Snapshot the old leaf's current cells; the redistribution below
        // reads from this immutable copy while writing into both pages.
        let old_snapshot: Node = {
            let handle = self.pager.get(old_page_num)?;
            let node = handle.lock().map_err(lock_err)?;
            node.clone()
        };
        let mut serialized = [0u8; ROW_SIZE];
        row.serialize(&mut serialized);

        // The virtual sequence of LEAF_NODE_MAX_CELLS + 1 cells (old cells
        // plus the new one at `insert_at`) is divided between old (left)
        // and new (right). Walking from the right avoids clobbering a cell
        // before it's been read.
        for i in (0..=btree::LEAF_NODE_MAX_CELLS as u32).rev() {
            let goes_right = i as usize >= btree::LEAF_NODE_LEFT_SPLIT_COUNT;
            let dest_page = if goes_right { new_page_num } else { old_page_num };
            let dest_cell = if goes_right {
                i - btree::LEAF_NODE_LEFT_SPLIT_COUNT as u32
            } else {
                i
            };

            let handle = self.pager.get(dest_page)?;
            let mut dest = handle.lock().map_err(lock_err)?;

            if i == insert_at {
                dest.set_leaf_node_key(dest_cell, key)?;
                dest.set_leaf_node_value(dest_cell, &serialized)?;
            } else {
                let src_cell = if i > insert_at { i - 1 } else { i };
                let src_key = old_snapshot.leaf_node_key(src_cell)?;
                let src_value = old_snapshot.leaf_node_value(src_cell)?.to_vec();
                dest.set_leaf_node_key(dest_cell, src_key)?;
                dest.set_leaf_node_value(dest_cell, &src_value)?;
            }
        }

        {
            let handle = self.pager.get(old_page_num)?;
            let mut node = handle.lock().map_err(lock_err)?;
            node.set_leaf_node_num_cells(btree::LEAF_NODE_LEFT_SPLIT_COUNT as u32);
        }
        {
            let handle = self.pager.get(new_page_num)?;
            let mut node = handle.lock().map_err(lock_err)?;
            node.set_leaf_node_num_cells(btree::LEAF_NODE_RIGHT_SPLIT_COUNT as u32);
        }

        if old_is_root {
            self.create_new_root(new_page_num)?;
            return Ok(());
        }

        let old_max = old_snapshot.leaf_node_max_key()?;
        let new_max = self.max_key(old_page_num)?;
        self.update_internal_key(old_parent, old_max, new_max)?;
        self.internal_insert(old_parent, new_page_num)?;
        Ok(())
    }

    /// Allocates a fresh left child holding a copy of the current root,
    /// reinitializes page 0 as the new internal root with `right_child_page_num`
    /// as its right child, and returns the left child's page number.
    fn create_new_root(&mut self, right_child_page_num: u32) -> Result<u32, Error> {
        debug!(right_child_page_num, "creating new root");
        let left_child_page_num = self.pager.get_unused_page_num();
        let root_page_num = self.root_page_num;

        let root_bytes = {
            let handle = self.pager.get(root_page_num)?;
            let node = handle.lock().map_err(lock_err)?;
            node.data
        };
        {
            let handle = self.pager.get(left_child_page_num)?;
            let mut left = handle.lock().map_err(lock_err)?;
            left.data = root_bytes;
            left.set_node_root(false);
        }

        let left_is_internal = {
            let handle = self.pager.get(left_child_page_num)?;
            let node = handle.lock().map_err(lock_err)?;
            node.get_node_type()? == NodeType::Internal
        };
        if left_is_internal {
            let num_keys = {
                let handle = self.pager.get(left_child_page_num)?;
                let node = handle.lock().map_err(lock_err)?;
                node.internal_node_num_keys()
            };
            for i in 0..=num_keys {
                let child_page = {
                    let handle = self.pager.get(left_child_page_num)?;
                    let node = handle.lock().map_err(lock_err)?;
                    node.internal_node_child(i)?
                };
                let handle = self.pager.get(child_page)?;
                let mut child = handle.lock().map_err(lock_err)?;
                child.set_node_parent(left_child_page_num);
            }
        }

        let left_max = self.max_key(left_child_page_num)?;

        {
            let handle = self.pager.get(root_page_num)?;
            let mut root = handle.lock().map_err(lock_err)?;
            root.initialize_internal_node();
            root.set_node_root(true);
            root.set_internal_node_num_keys(1);
            root.set_internal_node_child(0, left_child_page_num)?;
            root.set_internal_node_key(0, left_max)?;
            root.set_internal_node_right_child(right_child_page_num);
        }
        {
            let handle = self.pager.get(left_child_page_num)?;
            let mut left = handle.lock().map_err(lock_err)?;
            left.set_node_parent(root_page_num);
        }
        {
            let handle = self.pager.get(right_child_page_num)?;
            let mut right = handle.lock().map_err(lock_err)?;
            right.set_node_parent(root_page_num);
        }

        Ok(left_child_page_num)
    }

    /// Adds `(max_key(child), child)` to `parent`, splitting it first if
    /// it's already full.
    fn internal_insert(&mut self, parent_page_num: u32, child_page_num: u32) -> Result<(), Error> {
        trace!(parent_page_num, child_page_num, "internal node insert");
        let child_max = self.max_key(child_page_num)?;

        let (num_keys, right_child) = {
            let handle = self.pager.get(parent_page_num)?;
            let node = handle.lock().map_err(lock_err)?;
            (node.internal_node_num_keys(), node.internal_node_right_child())
        };

        if num_keys >= btree::INTERNAL_NODE_MAX_KEYS {
            return self.internal_split_and_insert(parent_page_num, child_page_num);
        }

        if right_child == btree::INVALID_PAGE {
            let handle = self.pager.get(parent_page_num)?;
            let mut node = handle.lock().map_err(lock_err)?;
            node.set_internal_node_right_child(child_page_num);
            drop(node);
            let handle = self.pager.get(child_page_num)?;
            let mut child = handle.lock().map_err(lock_err)?;
            child.set_node_parent(parent_page_num);
            return Ok(());
        }

        let right_child_max = self.max_key(right_child)?;

        if child_max > right_child_max {
            let handle = self.pager.get(parent_page_num)?;
            let mut node = handle.lock().map_err(lock_err)?;
            node.set_internal_node_num_keys(num_keys + 1);
            node.set_internal_node_child(num_keys, right_child)?;
            node.set_internal_node_key(num_keys, right_child_max)?;
            node.set_internal_node_right_child(child_page_num);
        } else {
            let index = {
                let handle = self.pager.get(parent_page_num)?;
                let node = handle.lock().map_err(lock_err)?;
                node.internal_node_find_child(child_max)?
            };
            let handle = self.pager.get(parent_page_num)?;
            let mut node = handle.lock().map_err(lock_err)?;
            node.set_internal_node_num_keys(num_keys + 1);
            node.internal_node_shift_right(index, num_keys);
            node.set_internal_node_child(index, child_page_num)?;
            node.set_internal_node_key(index, child_max)?;
        }

        let handle = self.pager.get(child_page_num)?;
        let mut child = handle.lock().map_err(lock_err)?;
        child.set_node_parent(parent_page_num);
        Ok(())
    }

    /// Splits a full internal node, redistributing its children and
    /// routing `child_page_num` into whichever side covers its max key.
    fn internal_split_and_insert(
        &mut self,
        old_page_num_in: u32,
        child_page_num: u32,
    ) -> Result<(), Error> {
        debug!(old_page_num_in, child_page_num, "splitting internal node");
        let old_max = self.max_key(old_page_num_in)?;
        let splitting_root = {
            let handle = self.pager.get(old_page_num_in)?;
            let node = handle.lock().map_err(lock_err)?;
            node.is_node_root()
        };

        let new_page_num = self.pager.get_unused_page_num();
        {
            let handle = self.pager.get(new_page_num)?;
            let mut node = handle.lock().map_err(lock_err)?;
            node.initialize_internal_node();
        }

        // When the root itself is what's overflowing, `create_new_root`
        // moves its contents into a freshly allocated page. Everything
        // below must keep operating on that page, not on page 0 — using
        // the pre-split `old_page_num_in` here would silently mutate the
        // brand new (nearly empty) root instead of the node being split.
        let old_page_num = if splitting_root {
            self.create_new_root(new_page_num)?
        } else {
            old_page_num_in
        };

        let old_right_child = {
            let handle = self.pager.get(old_page_num)?;
            let node = handle.lock().map_err(lock_err)?;
            node.internal_node_right_child()
        };
        {
            let handle = self.pager.get(old_page_num)?;
            let mut node = handle.lock().map_err(lock_err)?;
            node.set_internal_node_right_child(btree::INVALID_PAGE);
        }
        self.internal_insert(new_page_num, old_right_child)?;

        let split_from = btree::INTERNAL_NODE_MAX_KEYS - 1;
        let split_to = btree::INTERNAL_NODE_MAX_KEYS / 2 + 1;
        let mut i = split_from;
        loop {
            let child = {
                let handle = self.pager.get(old_page_num)?;
                let node = handle.lock().map_err(lock_err)?;
                node.internal_node_child(i)?
            };
            self.internal_insert(new_page_num, child)?;
            {
                let handle = self.pager.get(old_page_num)?;
                let mut node = handle.lock().map_err(lock_err)?;
                let num_keys = node.internal_node_num_keys();
                node.set_internal_node_num_keys(num_keys - 1);
            }
            if i == split_to {
                break;
            }
            i -= 1;
        }

        {
            let last_child = {
                let handle = self.pager.get(old_page_num)?;
                let node = handle.lock().map_err(lock_err)?;
                let num_keys = node.internal_node_num_keys();
                node.internal_node_child(num_keys - 1)?
            };
            let handle = self.pager.get(old_page_num)?;
            let mut node = handle.lock().map_err(lock_err)?;
            node.set_internal_node_right_child(last_child);
            let num_keys = node.internal_node_num_keys();
            node.set_internal_node_num_keys(num_keys - 1);
        }

        let child_max = self.max_key(child_page_num)?;
        let old_max_after_split = self.max_key(old_page_num)?;
        let destination = if child_max < old_max_after_split {
            old_page_num
        } else {
            new_page_num
        };
        self.internal_insert(destination, child_page_num)?;

        let parent_page_num = {
            let handle = self.pager.get(old_page_num)?;
            let node = handle.lock().map_err(lock_err)?;
            node.node_parent()
        };
        let final_old_max = self.max_key(old_page_num)?;
        self.update_internal_key(parent_page_num, old_max, final_old_max)?;

        if !splitting_root {
            self.internal_insert(parent_page_num, new_page_num)?;
        }

        Ok(())
    }

    /// Finds the child whose key equals `old_key` and rewrites it to
    /// `new_key`, keeping a parent's routing key in sync with a child's
    /// post-split maximum.
    fn update_internal_key(&mut self, node_page_num: u32, old_key: u32, new_key: u32) -> Result<(), Error> {
        let handle = self.pager.get(node_page_num)?;
        let mut node = handle.lock().map_err(lock_err)?;
        let index = node.internal_node_find_child(old_key)?;
        if index >= node.internal_node_num_keys() {
            warn!(node_page_num, old_key, "no matching routing key to update");
            return Ok(());
        }
        node.set_internal_node_key(index, new_key)
    }

    // --- introspection for the `.btree` / `.constants` meta-commands ---

    pub fn print_tree(&mut self) -> Result<String, Error> {
        let mut out = String::new();
        self.print_tree_node(self.root_page_num, 0, &mut out)?;
        Ok(out)
    }

    fn print_tree_node(&mut self, page_num: u32, indent: usize, out: &mut String) -> Result<(), Error> {
        let node_type = {
            let handle = self.pager.get(page_num)?;
            let node = handle.lock().map_err(lock_err)?;
            node.get_node_type()?
        };
        let pad = "  ".repeat(indent);
        match node_type {
            NodeType::Leaf => {
                let num_cells = {
                    let handle = self.pager.get(page_num)?;
                    let node = handle.lock().map_err(lock_err)?;
                    node.leaf_node_num_cells()
                };
                out.push_str(&format!("{pad}- leaf (size {num_cells})\n"));
                for i in 0..num_cells {
                    let key = {
                        let handle = self.pager.get(page_num)?;
                        let node = handle.lock().map_err(lock_err)?;
                        node.leaf_node_key(i)?
                    };
                    out.push_str(&format!("{pad}  - {key}\n"));
                }
            }
            NodeType::Internal => {
                let num_keys = {
                    let handle = self.pager.get(page_num)?;
                    let node = handle.lock().map_err(lock_err)?;
                    node.internal_node_num_keys()
                };
                out.push_str(&format!("{pad}- internal (size {num_keys})\n"));
                for i in 0..num_keys {
                    let child = {
                        let handle = self.pager.get(page_num)?;
                        let node = handle.lock().map_err(lock_err)?;
                        node.internal_node_child(i)?
                    };
                    self.print_tree_node(child, indent + 1, out)?;
                    let key = {
                        let handle = self.pager.get(page_num)?;
                        let node = handle.lock().map_err(lock_err)?;
                        node.internal_node_key(i)?
                    };
                    out.push_str(&format!("{pad}  - key {key}\n"));
                }
                let right_child = {
                    let handle = self.pager.get(page_num)?;
                    let node = handle.lock().map_err(lock_err)?;
                    node.internal_node_right_child()
                };
                self.print_tree_node(right_child, indent + 1, out)?;
            }
        }
        Ok(())
    }
}

pub fn print_constants() -> String {
    format!(
        "ROW_SIZE: {}\nCOMMON_NODE_HEADER_SIZE: {}\nLEAF_NODE_HEADER_SIZE: {}\nLEAF_NODE_CELL_SIZE: {}\nLEAF_NODE_MAX_CELLS: {}\nINTERNAL_NODE_MAX_KEYS: {}\nPAGE_SIZE: {}\n",
        ROW_SIZE,
        btree::COMMON_NODE_HEADER_SIZE,
        btree::LEAF_NODE_HEADER_SIZE,
        btree::LEAF_NODE_CELL_SIZE,
        btree::LEAF_NODE_MAX_CELLS,
        btree::INTERNAL_NODE_MAX_KEYS,
        PAGE_SIZE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::row::Row;
    use tempfile::tempdir;

    fn open_table() -> (tempfile::TempDir, Table) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let table = Table::open(&path).unwrap();
        (dir, table)
    }

    #[test]
    fn insert_then_select_in_order() {
        let (_dir, mut table) = open_table();
        for id in [3u32, 1, 2] {
            let row = Row::new(id, format!("user{id}"), format!("user{id}@x.com")).unwrap();
            assert_eq!(table.execute_insert(row).unwrap(), ExecuteResult::Success);
        }
        let rows = table.execute_select().unwrap();
        let ids: Vec<u32> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let (_dir, mut table) = open_table();
        let row = Row::new(1, "alice", "a@x.com").unwrap();
        assert_eq!(
            table.execute_insert(row.clone()).unwrap(),
            ExecuteResult::Success
        );
        assert_eq!(
            table.execute_insert(row).unwrap(),
            ExecuteResult::DuplicateKey
        );
        assert_eq!(table.execute_select().unwrap().len(), 1);
    }

    #[test]
    fn persists_across_close_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let mut table = Table::open(&path).unwrap();
            let row = Row::new(1, "alice", "a@x.com").unwrap();
            table.execute_insert(row).unwrap();
            table.close().unwrap();
        }
        {
            let mut table = Table::open(&path).unwrap();
            let rows = table.execute_select().unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].username, "alice");
        }
    }

    #[test]
    fn leaf_split_keeps_all_keys_in_order() {
        let (_dir, mut table) = open_table();
        let count = btree::LEAF_NODE_MAX_CELLS as u32 + 1;
        for id in 0..count {
            let row = Row::new(id, format!("u{id}"), "e@x.com").unwrap();
            table.execute_insert(row).unwrap();
        }
        let rows = table.execute_select().unwrap();
        let ids: Vec<u32> = rows.iter().map(|r| r.id).collect();
        let expected: Vec<u32> = (0..count).collect();
        assert_eq!(ids, expected);

        let root_type = {
            let handle = table.pager.get(0).unwrap();
            let node = handle.lock().unwrap();
            node.get_node_type().unwrap()
        };
        assert_eq!(root_type, NodeType::Internal);
    }

    #[test]
    fn internal_node_splits_as_tree_grows() {
        let (_dir, mut table) = open_table();
        // Comfortably enough ascending inserts to force a second level of
        // internal split: several leaf splits plus more than
        // INTERNAL_NODE_MAX_KEYS + 1 leaves hanging off the root.
        let count = (btree::LEAF_NODE_MAX_CELLS as u32 + 1) * 6;
        for id in 0..count {
            let row = Row::new(id, format!("u{id}"), "e@x.com").unwrap();
            table.execute_insert(row).unwrap();
        }
        let rows = table.execute_select().unwrap();
        let ids: Vec<u32> = rows.iter().map(|r| r.id).collect();
        let expected: Vec<u32> = (0..count).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn internal_keys_track_child_max_and_parent_links_are_consistent() {
        let (_dir, mut table) = open_table();
        let count = (btree::LEAF_NODE_MAX_CELLS as u32 + 1) * 3;
        for id in 0..count {
            let row = Row::new(id, format!("u{id}"), "e@x.com").unwrap();
            table.execute_insert(row).unwrap();
        }
        check_subtree_invariants(&mut table, table.root_page_num, btree::INVALID_PAGE);
    }

    /// Property 2: every internal body key equals the max key of the child
    /// it routes to. Property 3: every non-root node's recorded parent
    /// actually is its parent.
    fn check_subtree_invariants(table: &mut Table, page_num: u32, expected_parent: u32) {
        let (node_type, parent) = {
            let handle = table.pager.get(page_num).unwrap();
            let node = handle.lock().unwrap();
            (node.get_node_type().unwrap(), node.node_parent())
        };
        if expected_parent != btree::INVALID_PAGE {
            assert_eq!(parent, expected_parent, "page {page_num} has a stale parent pointer");
        }
        if node_type == NodeType::Internal {
            let num_keys = {
                let handle = table.pager.get(page_num).unwrap();
                let node = handle.lock().unwrap();
                node.internal_node_num_keys()
            };
            for i in 0..num_keys {
                let (child, key) = {
                    let handle = table.pager.get(page_num).unwrap();
                    let node = handle.lock().unwrap();
                    (node.internal_node_child(i).unwrap(), node.internal_node_key(i).unwrap())
                };
                assert_eq!(table.max_key(child).unwrap(), key);
                check_subtree_invariants(table, child, page_num);
            }
            let right_child = {
                let handle = table.pager.get(page_num).unwrap();
                let node = handle.lock().unwrap();
                node.internal_node_right_child()
            };
            check_subtree_invariants(table, right_child, page_num);
        }
    }
}
