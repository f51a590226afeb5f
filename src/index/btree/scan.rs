//! Range-scan cursor of the B+Tree index.
//!
//! A scan walks the leaf chain left to right, emitting the RIDs of every
//! entry inside the requested bounds in ascending key order. The cursor
//! remembers the leaf page number and slot between calls and re-pins the
//! leaf inside each call, so no pin outlives a public operation.

use crate::common::{Error, PageId, RecordId, Result};

use super::node::{InternalNode, LeafNode};
use super::BTreeIndex;

/// Comparison operators for scan bounds.
///
/// A scan's low bound uses `Gt` or `Gte`; its high bound uses `Lt` or
/// `Lte`. Any other combination is rejected with [`Error::BadOpcodes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// Greater than or equal to.
    Gte,
    /// Greater than.
    Gt,
}

/// Cursor state of the active scan.
pub(crate) struct ScanState {
    /// True if an index scan has been started.
    pub executing: bool,
    /// Slot of the next entry to be examined in the current leaf.
    pub next_entry: usize,
    /// Page number of the leaf being scanned.
    pub current_page_num: PageId,
    /// Low value of the range.
    pub low_val: i32,
    /// High value of the range.
    pub high_val: i32,
    /// Low operator (GT or GTE).
    pub low_op: Operator,
    /// High operator (LT or LTE).
    pub high_op: Operator,
}

impl Default for ScanState {
    fn default() -> Self {
        Self {
            executing: false,
            next_entry: 0,
            current_page_num: PageId::NIL,
            low_val: 0,
            high_val: 0,
            low_op: Operator::Gt,
            high_op: Operator::Lt,
        }
    }
}

impl BTreeIndex {
    /// Begin a filtered scan of the index.
    ///
    /// Positions the cursor on the first entry whose key satisfies both
    /// bounds; `scan_next` then yields RIDs in ascending key order. If a
    /// scan is already active it is ended first.
    ///
    /// # Errors
    /// - `Error::BadOpcodes` if `low_op` is not GT/GTE or `high_op` is not
    ///   LT/LTE
    /// - `Error::BadScanRange` if `low > high`
    /// - `Error::NoSuchKeyFound` if no key lies within the range
    pub fn start_scan(
        &mut self,
        low: i32,
        low_op: Operator,
        high: i32,
        high_op: Operator,
    ) -> Result<()> {
        if self.scan.executing {
            self.end_scan()?;
        }

        if !matches!(low_op, Operator::Gt | Operator::Gte)
            || !matches!(high_op, Operator::Lt | Operator::Lte)
        {
            return Err(Error::BadOpcodes);
        }
        if low > high {
            return Err(Error::BadScanRange);
        }

        let mut current_page_num = self.root_page_num;

        // Descend internal levels toward the leaf that could hold the first
        // qualifying key. Each internal page is unpinned on the way down.
        if self.initial_root_page_num != self.root_page_num {
            loop {
                let mut guard = self.pool.fetch_page(current_page_num)?;
                let cur = InternalNode::new(&mut guard, self.node_occupancy);
                let above_leaves = cur.level() == 1;
                current_page_num = cur.find_child(low);
                drop(guard);
                if above_leaves {
                    break;
                }
            }
        }

        // Walk the leaf chain for the first entry inside the bounds
        loop {
            let mut guard = self.pool.fetch_page(current_page_num)?;
            let leaf = LeafNode::new(&mut guard, self.leaf_occupancy);

            // A leaf without even a first entry is the empty original root
            if !leaf.slot_used(0) {
                return Err(Error::NoSuchKeyFound);
            }

            let mut on_last_entry = false;
            for i in 0..self.leaf_occupancy {
                let key = leaf.key(i);
                // Latch whether this is the last present entry of the leaf
                if i < self.leaf_occupancy - 1 && !leaf.slot_used(i + 1) {
                    on_last_entry = true;
                }

                if check_key(low, low_op, high, high_op, key) {
                    self.scan.low_val = low;
                    self.scan.high_val = high;
                    self.scan.low_op = low_op;
                    self.scan.high_op = high_op;
                    self.scan.next_entry = i;
                    self.scan.current_page_num = current_page_num;
                    self.scan.executing = true;
                    return Ok(());
                } else if (high_op == Operator::Lt && key >= high)
                    || (high_op == Operator::Lte && key > high)
                {
                    // Keys only grow to the right; the range is empty
                    return Err(Error::NoSuchKeyFound);
                }

                if i == self.leaf_occupancy - 1 || on_last_entry {
                    // Leaf exhausted below the bound; move right
                    let sib = leaf.right_sib();
                    if sib.is_nil() {
                        return Err(Error::NoSuchKeyFound);
                    }
                    current_page_num = sib;
                    break;
                }
            }
        }
    }

    /// Fetch the record id of the next entry that matches the scan.
    ///
    /// # Errors
    /// - `Error::ScanNotInitialized` if no scan is active
    /// - `Error::IndexScanCompleted` once the cursor has moved past the
    ///   last qualifying entry (subsequent calls keep returning it)
    pub fn scan_next(&mut self) -> Result<RecordId> {
        if !self.scan.executing {
            return Err(Error::ScanNotInitialized);
        }

        let mut guard = self.pool.fetch_page(self.scan.current_page_num)?;

        // Leaf exhausted: move to the right sibling
        let exhausted_sib = {
            let leaf = LeafNode::new(&mut guard, self.leaf_occupancy);
            if self.scan.next_entry == self.leaf_occupancy
                || !leaf.slot_used(self.scan.next_entry)
            {
                Some(leaf.right_sib())
            } else {
                None
            }
        };

        if let Some(sib) = exhausted_sib {
            drop(guard);
            if sib.is_nil() {
                return Err(Error::IndexScanCompleted);
            }
            self.scan.current_page_num = sib;
            self.scan.next_entry = 0;
            guard = self.pool.fetch_page(sib)?;
        }

        let leaf = LeafNode::new(&mut guard, self.leaf_occupancy);
        let key = leaf.key(self.scan.next_entry);
        if check_key(
            self.scan.low_val,
            self.scan.low_op,
            self.scan.high_val,
            self.scan.high_op,
            key,
        ) {
            let rid = leaf.rid(self.scan.next_entry);
            self.scan.next_entry += 1;
            Ok(rid)
        } else {
            // Keys are monotonic across the leaf chain: the bound is crossed
            Err(Error::IndexScanCompleted)
        }
    }

    /// Terminate the current scan and reset the cursor.
    ///
    /// # Errors
    /// - `Error::ScanNotInitialized` if no scan is active
    pub fn end_scan(&mut self) -> Result<()> {
        if !self.scan.executing {
            return Err(Error::ScanNotInitialized);
        }
        self.scan = ScanState::default();
        Ok(())
    }
}

/// True iff `key` satisfies both bounds.
fn check_key(
    low: i32,
    low_op: Operator,
    high: i32,
    high_op: Operator,
    key: i32,
) -> bool {
    match (low_op, high_op) {
        (Operator::Gte, Operator::Lte) => key >= low && key <= high,
        (Operator::Gt, Operator::Lte) => key > low && key <= high,
        (Operator::Gte, Operator::Lt) => key >= low && key < high,
        _ => key > low && key < high,
    }
}
