//! B+Tree index over a single integer attribute of a heap relation.
//!
//! The index maps `i32` key values to the [`RecordId`]s of the tuples that
//! carry them, supporting single-key insertion and half-open range scans.
//! All tree state lives in pages of one index file, cached by a
//! [`BufferPoolManager`]; the file starts with a meta page, and the tree
//! grows from a single root leaf through recursive splits that push
//! separators toward the root.
//!
//! ```text
//!                  ┌─────────────┐
//!                  │  meta page  │ page 1: relation, attr, root page no
//!                  └──────┬──────┘
//!                         ▼
//!                  ┌─────────────┐
//!                  │  internal   │ level 1: children are leaves
//!                  └──┬───────┬──┘
//!                     ▼       ▼
//!               ┌───────┐  ┌───────┐
//!               │ leaf  │─▶│ leaf  │─▶ ... right-sibling chain
//!               └───────┘  └───────┘
//! ```
//!
//! One scan may be active per index at a time; starting a new scan ends the
//! previous one. The index is single-threaded.

mod node;
mod scan;

use std::path::Path;

use crate::buffer::BufferPoolManager;
use crate::common::config::KEY_SIZE;
use crate::common::{Error, PageId, RecordId, Result};
use crate::heap::HeapFile;
use crate::storage::DiskManager;

use node::{
    split_internal_into, split_leaf_into, InternalNode, LeafEntry, LeafNode, MetaPage,
    PageKeyPair, LEAF_OCCUPANCY, NODE_OCCUPANCY,
};
use scan::ScanState;

pub use scan::Operator;

/// Type of the attribute an index is built over.
///
/// Only [`Datatype::Integer`] is supported by this core; the variant is
/// stored in the meta page and validated on reopen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datatype {
    Integer,
    Double,
    String,
}

impl Datatype {
    fn to_u32(self) -> u32 {
        match self {
            Datatype::Integer => 0,
            Datatype::Double => 1,
            Datatype::String => 2,
        }
    }
}

/// A B+Tree index on a single attribute of a relation.
///
/// Opening the index either loads an existing index file (validating its
/// meta page against the arguments) or creates a new file and bulk-loads an
/// entry for every tuple of the base relation. The index file is named
/// `<relation_name>.<attr_byte_offset>` and lives beside the relation.
///
/// # Example
/// ```no_run
/// use martendb::{BTreeIndex, Datatype, HeapFile, Operator};
///
/// let mut relation = HeapFile::open("data/rel_a")?;
/// let mut index = BTreeIndex::open(&mut relation, 0, Datatype::Integer, 32)?;
///
/// index.start_scan(10, Operator::Gte, 20, Operator::Lte)?;
/// while let Ok(rid) = index.scan_next() {
///     println!("{rid}");
/// }
/// index.end_scan()?;
/// # Ok::<(), martendb::Error>(())
/// ```
pub struct BTreeIndex {
    /// Page cache over the index file.
    pool: BufferPoolManager,

    /// `<relation_name>.<attr_byte_offset>`.
    index_name: String,

    /// Page number of the meta page (the file's first page).
    header_page_num: PageId,

    /// Page number of the current root.
    root_page_num: PageId,

    /// Page number of the leaf created at construction; the root is a leaf
    /// exactly while it still equals this.
    initial_root_page_num: PageId,

    /// Offset of the indexed attribute inside a record.
    attr_byte_offset: usize,

    /// Keys per leaf node.
    leaf_occupancy: usize,

    /// Separator keys per internal node.
    node_occupancy: usize,

    /// Cursor state of the active scan, if any.
    scan: ScanState,
}

impl BTreeIndex {
    /// Open the index for `relation` on the integer attribute at
    /// `attr_byte_offset`, creating and bulk-loading it if the index file
    /// does not exist yet.
    ///
    /// `pool_size` is the number of page frames the index's cache holds; it
    /// must comfortably exceed the tree height (an insert pins one page per
    /// level while descending).
    ///
    /// # Errors
    /// - `Error::BadIndexInfo` if an index file exists but its meta page
    ///   disagrees with the arguments, if `attr_type` is not
    ///   [`Datatype::Integer`], or if the attribute does not fit inside the
    ///   relation's records
    /// - I/O errors from file creation or the bulk load
    pub fn open(
        relation: &mut HeapFile,
        attr_byte_offset: usize,
        attr_type: Datatype,
        pool_size: usize,
    ) -> Result<Self> {
        Self::open_with_occupancy(
            relation,
            attr_byte_offset,
            attr_type,
            pool_size,
            LEAF_OCCUPANCY,
            NODE_OCCUPANCY,
        )
    }

    /// As [`BTreeIndex::open`], with explicit node occupancies.
    ///
    /// Small occupancies let tests exercise splits without thousands of
    /// keys; an index must always be reopened with the occupancies it was
    /// created with.
    pub(crate) fn open_with_occupancy(
        relation: &mut HeapFile,
        attr_byte_offset: usize,
        attr_type: Datatype,
        pool_size: usize,
        leaf_occupancy: usize,
        node_occupancy: usize,
    ) -> Result<Self> {
        let index_name = format!("{}.{}", relation.name(), attr_byte_offset);

        if attr_type != Datatype::Integer {
            return Err(Error::BadIndexInfo(index_name));
        }
        if attr_byte_offset + KEY_SIZE > relation.record_len() {
            return Err(Error::BadIndexInfo(index_name));
        }

        let index_path = relation
            .path()
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&index_name);

        match DiskManager::open_existing(&index_path) {
            Ok(disk) => Self::open_existing(
                disk,
                relation.name(),
                index_name,
                attr_byte_offset,
                attr_type,
                pool_size,
                leaf_occupancy,
                node_occupancy,
            ),
            Err(Error::FileNotFound(_)) => {
                let disk = DiskManager::create_new(&index_path)?;
                Self::create_and_load(
                    disk,
                    relation,
                    index_name,
                    attr_byte_offset,
                    attr_type,
                    pool_size,
                    leaf_occupancy,
                    node_occupancy,
                )
            }
            Err(e) => Err(e),
        }
    }

    /// Open an existing index file, validating its meta page.
    #[allow(clippy::too_many_arguments)]
    fn open_existing(
        disk: DiskManager,
        relation_name: &str,
        index_name: String,
        attr_byte_offset: usize,
        attr_type: Datatype,
        pool_size: usize,
        leaf_occupancy: usize,
        node_occupancy: usize,
    ) -> Result<Self> {
        let pool = BufferPoolManager::new(pool_size, disk);
        let header_page_num = pool.first_page_no();

        let root_page_num = {
            let mut guard = pool.fetch_page(header_page_num)?;
            let meta = MetaPage::new(&mut guard);

            // The stored name was truncated at creation; compare likewise
            let stored_name = meta.relation_name();
            let expected = truncated_name(relation_name);
            if stored_name != expected.as_ref()
                || meta.attr_byte_offset() != attr_byte_offset as i32
                || meta.attr_type() != attr_type.to_u32()
            {
                return Err(Error::BadIndexInfo(index_name));
            }
            meta.root_page_no()
            // guard drops here: meta page unpinned clean
        };

        // Creation allocates the root leaf right after the meta page, so
        // the original root's page number is deterministic on reopen.
        let initial_root_page_num = PageId::new(header_page_num.0 + 1);

        Ok(Self {
            pool,
            index_name,
            header_page_num,
            root_page_num,
            initial_root_page_num,
            attr_byte_offset,
            leaf_occupancy,
            node_occupancy,
            scan: ScanState::default(),
        })
    }

    /// Create a fresh index file and bulk-load every tuple of the relation.
    #[allow(clippy::too_many_arguments)]
    fn create_and_load(
        disk: DiskManager,
        relation: &mut HeapFile,
        index_name: String,
        attr_byte_offset: usize,
        attr_type: Datatype,
        pool_size: usize,
        leaf_occupancy: usize,
        node_occupancy: usize,
    ) -> Result<Self> {
        let pool = BufferPoolManager::new(pool_size, disk);

        let (header_page_num, root_page_num) = {
            let (header_pid, mut header_guard) = pool.alloc_page()?;
            let (root_pid, mut root_guard) = pool.alloc_page()?;

            {
                let mut meta = MetaPage::new(&mut header_guard);
                meta.set_relation_name(relation.name());
                meta.set_attr_byte_offset(attr_byte_offset as i32);
                meta.set_attr_type(attr_type.to_u32());
                meta.set_root_page_no(root_pid);
            }
            header_guard.mark_dirty();

            {
                // The root starts as an empty leaf with no right sibling
                let mut root = LeafNode::new(&mut root_guard, leaf_occupancy);
                root.set_right_sib(PageId::NIL);
            }
            root_guard.mark_dirty();

            (header_pid, root_pid)
        };

        let mut index = Self {
            pool,
            index_name,
            header_page_num,
            root_page_num,
            initial_root_page_num: root_page_num,
            attr_byte_offset,
            leaf_occupancy,
            node_occupancy,
            scan: ScanState::default(),
        };

        // Insert an entry for every tuple of the base relation
        for item in relation.scan() {
            let (record, rid) = item?;
            let key = i32::from_ne_bytes(
                record[attr_byte_offset..attr_byte_offset + KEY_SIZE]
                    .try_into()
                    .unwrap(),
            );
            index.insert_entry(key, rid)?;
        }

        index.pool.flush_file()?;
        Ok(index)
    }

    /// The index name: `<relation_name>.<attr_byte_offset>`.
    #[inline]
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Offset of the indexed attribute inside a record.
    #[inline]
    pub fn attr_byte_offset(&self) -> usize {
        self.attr_byte_offset
    }

    /// Pins currently held by the index's page cache.
    ///
    /// Every public operation releases what it acquires, so this is zero
    /// between calls; it exists so tests can verify that.
    pub fn pinned_page_count(&self) -> usize {
        self.pool.pinned_page_count()
    }

    /// Flush the index file and release the index.
    ///
    /// Dropping the index flushes best-effort; `close` surfaces the error.
    pub fn close(self) -> Result<()> {
        self.pool.flush_file()
    }

    // ========================================================================
    // Insertion
    // ========================================================================

    /// Insert the pair `(key, rid)`.
    ///
    /// Descends from the root to the owning leaf; a full leaf splits, which
    /// may split internal nodes all the way up and finally replace the root.
    /// Duplicate keys are allowed and are not detected.
    pub fn insert_entry(&mut self, key: i32, rid: RecordId) -> Result<()> {
        let entry = LeafEntry { key, rid };
        let root = self.root_page_num;
        let root_is_leaf = root == self.initial_root_page_num;

        if let Some(promoted) = self.insert_into(root, root_is_leaf, entry)? {
            self.replace_root(root, root_is_leaf, promoted)?;
        }
        Ok(())
    }

    /// Recursive descent of the insert.
    ///
    /// Returns the separator pushed up by a split in this subtree, or `None`
    /// when everything fit. The node's page stays pinned across the child's
    /// recursion and is unpinned on return: dirty iff this call wrote to it.
    fn insert_into(
        &self,
        page_num: PageId,
        node_is_leaf: bool,
        entry: LeafEntry,
    ) -> Result<Option<PageKeyPair>> {
        let mut guard = self.pool.fetch_page(page_num)?;

        if node_is_leaf {
            if !LeafNode::new(&mut guard, self.leaf_occupancy).is_full() {
                LeafNode::new(&mut guard, self.leaf_occupancy).insert(entry);
                guard.mark_dirty();
                return Ok(None);
            }

            // Full leaf: split into a new right sibling
            let (new_pid, mut new_guard) = self.pool.alloc_page()?;
            let promoted_key = {
                let mut leaf = LeafNode::new(&mut guard, self.leaf_occupancy);
                let mut new_leaf = LeafNode::new(&mut new_guard, self.leaf_occupancy);
                split_leaf_into(&mut leaf, &mut new_leaf, new_pid, entry)
            };
            guard.mark_dirty();
            new_guard.mark_dirty();

            return Ok(Some(PageKeyPair {
                page_no: new_pid,
                key: promoted_key,
            }));
        }

        // Internal node: pick the child and recurse
        let (child_pid, child_is_leaf) = {
            let cur = InternalNode::new(&mut guard, self.node_occupancy);
            (cur.find_child(entry.key), cur.level() == 1)
        };

        let promoted = self.insert_into(child_pid, child_is_leaf, entry)?;

        let Some(promoted) = promoted else {
            // Nothing split below; unpin clean
            return Ok(None);
        };

        if !InternalNode::new(&mut guard, self.node_occupancy).is_full() {
            InternalNode::new(&mut guard, self.node_occupancy).insert(promoted);
            guard.mark_dirty();
            return Ok(None);
        }

        // Full internal node: split and push a separator further up
        let (new_pid, mut new_guard) = self.pool.alloc_page()?;
        let promoted_key = {
            let mut old = InternalNode::new(&mut guard, self.node_occupancy);
            let mut new_node = InternalNode::new(&mut new_guard, self.node_occupancy);
            split_internal_into(&mut old, &mut new_node, promoted)
        };
        guard.mark_dirty();
        new_guard.mark_dirty();

        Ok(Some(PageKeyPair {
            page_no: new_pid,
            key: promoted_key,
        }))
    }

    /// Install a new root above a split old root.
    ///
    /// `child_is_leaf` says whether the replaced root was the original leaf;
    /// the new root's `level` is 1 exactly then. The meta page is rewritten
    /// (and unpinned dirty) so `root_page_no` always names the current root.
    fn replace_root(
        &mut self,
        old_root: PageId,
        child_is_leaf: bool,
        promoted: PageKeyPair,
    ) -> Result<()> {
        let (new_root_pid, mut guard) = self.pool.alloc_page()?;
        {
            let mut root = InternalNode::new(&mut guard, self.node_occupancy);
            root.set_level(if child_is_leaf { 1 } else { 0 });
            root.set_child(0, old_root);
            root.set_child(1, promoted.page_no);
            root.set_key(0, promoted.key);
        }
        guard.mark_dirty();
        drop(guard);

        let mut meta_guard = self.pool.fetch_page(self.header_page_num)?;
        MetaPage::new(&mut meta_guard).set_root_page_no(new_root_pid);
        meta_guard.mark_dirty();
        drop(meta_guard);

        self.root_page_num = new_root_pid;
        Ok(())
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        // Flush must not propagate (or panic) out of the destructor
        let _ = self.pool.flush_file();
    }
}

/// Relation names are stored in a 20-byte null-terminated meta field.
fn truncated_name(name: &str) -> std::borrow::Cow<'_, str> {
    let bytes = name.as_bytes();
    let len = bytes.len().min(19);
    String::from_utf8_lossy(&bytes[..len])
}
