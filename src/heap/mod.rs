//! Heap relation files.
//!
//! A [`HeapFile`] stores fixed-size tuples in page-sized blocks and hands
//! them back, with their [`RecordId`]s, through [`HeapScan`]. This is the
//! base relation the B+Tree index is built over: index creation walks the
//! whole heap once and inserts an entry per tuple.
//!
//! # File Layout
//! ```text
//! Page 1 (header)     Page 2..N (data)
//! ┌──────────────┐    ┌──────────────────────────────┐
//! │ magic    u32 │    │ record_count u16             │
//! │ rec_len  u32 │    │ record 0 | record 1 | ...    │
//! │ checksum u32 │    │ (rec_len bytes each, packed) │
//! └──────────────┘    └──────────────────────────────┘
//! ```
//!
//! The header checksum is a CRC32 over the header page with the checksum
//! field zeroed, so verification needs no special casing.

use std::path::{Path, PathBuf};

use crate::common::config::PAGE_SIZE;
use crate::common::{Error, PageId, RecordId, Result};
use crate::storage::{DiskManager, Page};

/// Magic number identifying a heap file ("MHF1").
const HEAP_MAGIC: u32 = 0x4D48_4631;

const OFFSET_MAGIC: usize = 0;
const OFFSET_RECORD_LEN: usize = 4;
const OFFSET_CHECKSUM: usize = 8;

/// Bytes of a data page taken by the record count prefix.
const DATA_PAGE_HEADER: usize = 2;

/// A relation stored as fixed-size records in a paged heap file.
///
/// Records are appended densely; slots are never reclaimed (this crate has
/// no delete path). Record ids are `(page, slot)` pairs; data pages start at
/// page 2, so no valid record ever lives on page 0 or page 1.
pub struct HeapFile {
    disk: DiskManager,
    path: PathBuf,
    name: String,
    record_len: usize,
}

impl HeapFile {
    /// Create a new heap file for records of `record_len` bytes.
    ///
    /// # Panics
    /// Panics if `record_len` is zero or a record cannot fit in a page.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, record_len: usize) -> Result<Self> {
        assert!(
            record_len > 0 && record_len <= PAGE_SIZE - DATA_PAGE_HEADER,
            "record_len must fit in a data page"
        );

        let mut disk = DiskManager::create_new(&path)?;

        // Header page
        let header_pid = disk.allocate_page()?;
        let mut header = Page::new();
        write_header(&mut header, record_len as u32);
        disk.write_page(header_pid, &header)?;
        disk.sync()?;

        Ok(Self {
            disk,
            name: file_name(path.as_ref()),
            path: path.as_ref().to_path_buf(),
            record_len,
        })
    }

    /// Open an existing heap file.
    ///
    /// # Errors
    /// - `Error::FileNotFound` if the file does not exist
    /// - `Error::Corrupted` if the header fails validation
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut disk = DiskManager::open_existing(&path)?;

        if disk.page_count() < 1 {
            return Err(Error::Corrupted(format!(
                "{}: missing heap header page",
                path.as_ref().display()
            )));
        }

        let header_pid = disk.first_page_no();
        let header = disk.read_page(header_pid)?;
        let record_len = read_header(&header).ok_or_else(|| {
            Error::Corrupted(format!(
                "{}: bad heap header magic or checksum",
                path.as_ref().display()
            ))
        })?;

        Ok(Self {
            disk,
            name: file_name(path.as_ref()),
            path: path.as_ref().to_path_buf(),
            record_len: record_len as usize,
        })
    }

    /// The relation name: the heap file's name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the heap file on disk.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of every record in this relation, in bytes.
    #[inline]
    pub fn record_len(&self) -> usize {
        self.record_len
    }

    /// Records that fit in one data page.
    #[inline]
    fn records_per_page(&self) -> usize {
        (PAGE_SIZE - DATA_PAGE_HEADER) / self.record_len
    }

    /// Append a record, returning its id.
    ///
    /// # Panics
    /// Panics if `record` is not exactly `record_len` bytes.
    pub fn append(&mut self, record: &[u8]) -> Result<RecordId> {
        assert_eq!(record.len(), self.record_len, "record length mismatch");

        let per_page = self.records_per_page();

        // Reuse the last data page if it has room, else extend the file
        let (pid, mut page, count) = if self.disk.page_count() >= 2 {
            let pid = PageId::new(self.disk.page_count());
            let page = self.disk.read_page(pid)?;
            let count = record_count(&page) as usize;
            if count < per_page {
                (pid, page, count)
            } else {
                (self.disk.allocate_page()?, Page::new(), 0)
            }
        } else {
            (self.disk.allocate_page()?, Page::new(), 0)
        };

        let offset = DATA_PAGE_HEADER + count * self.record_len;
        page.as_mut_slice()[offset..offset + self.record_len].copy_from_slice(record);
        set_record_count(&mut page, (count + 1) as u16);
        self.disk.write_page(pid, &page)?;

        Ok(RecordId::new(pid, count as u16))
    }

    /// Scan every record in (page, slot) order.
    pub fn scan(&mut self) -> HeapScan<'_> {
        HeapScan {
            heap: self,
            next_page: 2,
            next_slot: 0,
            current: None,
        }
    }

    /// Flush buffered writes to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.disk.sync()
    }
}

/// Iterator over `(record bytes, record id)` pairs of a heap file.
///
/// End of the relation is signalled by iterator exhaustion; I/O failures
/// surface as `Err` items.
pub struct HeapScan<'a> {
    heap: &'a mut HeapFile,
    next_page: u32,
    next_slot: u16,
    /// Page currently being walked and its record count.
    current: Option<(Page, u16)>,
}

impl Iterator for HeapScan<'_> {
    type Item = Result<(Vec<u8>, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((page, count)) = self.current.as_ref() {
                if self.next_slot < *count {
                    let slot = self.next_slot;
                    self.next_slot += 1;

                    let offset = DATA_PAGE_HEADER + slot as usize * self.heap.record_len;
                    let bytes = page.as_slice()[offset..offset + self.heap.record_len].to_vec();
                    let rid = RecordId::new(PageId::new(self.next_page - 1), slot);
                    return Some(Ok((bytes, rid)));
                }
            }

            // Current page exhausted (or none yet): advance to the next one
            if self.next_page > self.heap.disk.page_count() {
                return None;
            }
            let pid = PageId::new(self.next_page);
            self.next_page += 1;
            self.next_slot = 0;

            match self.heap.disk.read_page(pid) {
                Ok(page) => {
                    let count = record_count(&page);
                    self.current = Some((page, count));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn record_count(page: &Page) -> u16 {
    let data = page.as_slice();
    u16::from_le_bytes([data[0], data[1]])
}

fn set_record_count(page: &mut Page, count: u16) {
    page.as_mut_slice()[..2].copy_from_slice(&count.to_le_bytes());
}

fn write_header(page: &mut Page, record_len: u32) {
    let data = page.as_mut_slice();
    data[OFFSET_MAGIC..OFFSET_MAGIC + 4].copy_from_slice(&HEAP_MAGIC.to_le_bytes());
    data[OFFSET_RECORD_LEN..OFFSET_RECORD_LEN + 4].copy_from_slice(&record_len.to_le_bytes());
    let checksum = compute_checksum(data);
    data[OFFSET_CHECKSUM..OFFSET_CHECKSUM + 4].copy_from_slice(&checksum.to_le_bytes());
}

/// Validate the header page, returning the record length if it is intact.
fn read_header(page: &Page) -> Option<u32> {
    let data = page.as_slice();
    let magic = u32::from_le_bytes(data[OFFSET_MAGIC..OFFSET_MAGIC + 4].try_into().unwrap());
    if magic != HEAP_MAGIC {
        return None;
    }

    let stored = u32::from_le_bytes(
        data[OFFSET_CHECKSUM..OFFSET_CHECKSUM + 4]
            .try_into()
            .unwrap(),
    );
    if stored != compute_checksum(data) {
        return None;
    }

    let record_len = u32::from_le_bytes(
        data[OFFSET_RECORD_LEN..OFFSET_RECORD_LEN + 4]
            .try_into()
            .unwrap(),
    );
    Some(record_len)
}

/// CRC32 over the header page with the checksum field zeroed.
fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&data[..OFFSET_CHECKSUM]);
    hasher.update(&[0u8; 4]);
    hasher.update(&data[OFFSET_CHECKSUM + 4..]);
    hasher.finalize()
}
