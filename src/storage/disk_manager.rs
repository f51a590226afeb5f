//! Disk Manager - low-level file I/O for pages.
//!
//! The [`DiskManager`] handles all direct file operations:
//! - Reading and writing pages
//! - Allocating new pages
//! - Creating and opening page files

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::common::config::PAGE_SIZE;
use crate::common::{Error, PageId, Result};
use crate::storage::page::Page;

/// Manages disk I/O for a single page file.
///
/// # File Layout
/// The file is a sequence of fixed-size pages. Page numbering starts at 1,
/// leaving 0 free as the nil page id:
/// ```text
/// ┌─────────┬─────────┬─────────┬─────────┐
/// │ Page 1  │ Page 2  │  ...    │ Page N  │
/// │ (4KB)   │ (4KB)   │         │ (4KB)   │
/// └─────────┴─────────┴─────────┴─────────┘
/// Offset:  0      4096    ...   (N-1)×4096
/// ```
///
/// Page `n` is located at file offset `(n-1) × PAGE_SIZE`.
///
/// # Thread Safety
/// `DiskManager` is **single-threaded**. The `BufferPoolManager` is
/// responsible for serializing access to the disk manager.
///
/// # Durability
/// Individual writes are not synced; callers decide when to make the file
/// durable via [`DiskManager::sync`]. The buffer pool syncs as part of
/// `flush_file`.
pub struct DiskManager {
    file: File,
    /// Number of pages in the file.
    page_count: u32,
}

impl DiskManager {
    /// Create a new page file.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create_new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        Ok(Self {
            file,
            page_count: 0,
        })
    }

    /// Open an existing page file.
    ///
    /// # Errors
    /// Returns `Error::FileNotFound` if the file does not exist.
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Self> {
        if !path.as_ref().exists() {
            return Err(Error::FileNotFound(path.as_ref().to_path_buf()));
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        // Calculate page count from file size
        let metadata = file.metadata()?;
        let file_size = metadata.len();
        let page_count = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self { file, page_count })
    }

    /// Number of the first page of the file.
    ///
    /// Pages are numbered from 1, so this is always `PageId(1)`; it exists
    /// so callers locating a header page need not hard-code the convention.
    #[inline]
    pub fn first_page_no(&self) -> PageId {
        PageId::new(1)
    }

    /// Read a page from disk.
    ///
    /// # Errors
    /// Returns `Error::PageNotFound` if the page has not been allocated.
    pub fn read_page(&mut self, page_id: PageId) -> Result<Page> {
        if page_id.is_nil() || page_id.0 > self.page_count {
            return Err(Error::PageNotFound(page_id.0));
        }

        let offset = (page_id.0 as u64 - 1) * (PAGE_SIZE as u64);
        self.file.seek(SeekFrom::Start(offset))?;

        let mut page = Page::new();
        self.file.read_exact(page.as_mut_slice())?;

        Ok(page)
    }

    /// Write a page to disk.
    ///
    /// The page must have been previously allocated with `allocate_page()`.
    ///
    /// # Errors
    /// Returns `Error::PageNotFound` if the page has not been allocated.
    pub fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        if page_id.is_nil() || page_id.0 > self.page_count {
            return Err(Error::PageNotFound(page_id.0));
        }

        let offset = (page_id.0 as u64 - 1) * (PAGE_SIZE as u64);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(page.as_slice())?;

        Ok(())
    }

    /// Allocate a new page at the end of the file.
    ///
    /// Returns the `PageId` of the newly allocated page. The page is
    /// initialized with zeros.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        let page_id = PageId::new(self.page_count + 1);

        // Extend file with a zeroed page
        let offset = (page_id.0 as u64 - 1) * (PAGE_SIZE as u64);
        self.file.seek(SeekFrom::Start(offset))?;

        let zeros = [0u8; PAGE_SIZE];
        self.file.write_all(&zeros)?;

        self.page_count += 1;
        Ok(page_id)
    }

    /// Flush all buffered writes to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Get the number of pages in the file.
    #[inline]
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Get the total size of the file in bytes.
    #[inline]
    pub fn file_size(&self) -> u64 {
        (self.page_count as u64) * (PAGE_SIZE as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_new_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.mdb");

        let dm = DiskManager::create_new(&path).unwrap();
        assert_eq!(dm.page_count(), 0);
        assert_eq!(dm.file_size(), 0);
        assert_eq!(dm.first_page_no(), PageId::new(1));
    }

    #[test]
    fn test_create_existing_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.mdb");

        DiskManager::create_new(&path).unwrap();
        assert!(DiskManager::create_new(&path).is_err());
    }

    #[test]
    fn test_open_nonexistent_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonexistent.mdb");

        match DiskManager::open_existing(&path) {
            Err(Error::FileNotFound(p)) => assert_eq!(p, path),
            other => panic!("expected FileNotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_allocate_and_read_page() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.mdb");

        let mut dm = DiskManager::create_new(&path).unwrap();

        // Allocate first page: numbering starts at 1
        let page_id = dm.allocate_page().unwrap();
        assert_eq!(page_id, PageId::new(1));
        assert_eq!(dm.page_count(), 1);

        // Read it back (should be zeros)
        let page = dm.read_page(page_id).unwrap();
        assert_eq!(page.as_slice()[0], 0);
        assert_eq!(page.as_slice()[4095], 0);
    }

    #[test]
    fn test_write_and_read_page() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.mdb");

        let mut dm = DiskManager::create_new(&path).unwrap();
        let page_id = dm.allocate_page().unwrap();

        let mut page = Page::new();
        page.as_mut_slice()[0] = 0xAB;
        page.as_mut_slice()[100] = 0xCD;
        page.as_mut_slice()[4095] = 0xEF;

        dm.write_page(page_id, &page).unwrap();

        let read_page = dm.read_page(page_id).unwrap();
        assert_eq!(read_page.as_slice()[0], 0xAB);
        assert_eq!(read_page.as_slice()[100], 0xCD);
        assert_eq!(read_page.as_slice()[4095], 0xEF);
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.mdb");

        // Create and write
        {
            let mut dm = DiskManager::create_new(&path).unwrap();
            let page_id = dm.allocate_page().unwrap();

            let mut page = Page::new();
            page.as_mut_slice()[0] = 0x42;
            dm.write_page(page_id, &page).unwrap();
            dm.sync().unwrap();
        }

        // Reopen and verify
        {
            let mut dm = DiskManager::open_existing(&path).unwrap();
            assert_eq!(dm.page_count(), 1);

            let page = dm.read_page(PageId::new(1)).unwrap();
            assert_eq!(page.as_slice()[0], 0x42);
        }
    }

    #[test]
    fn test_multiple_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.mdb");

        let mut dm = DiskManager::create_new(&path).unwrap();

        for i in 1..=10u32 {
            let page_id = dm.allocate_page().unwrap();
            assert_eq!(page_id.0, i);

            let mut page = Page::new();
            page.as_mut_slice()[0] = i as u8;
            dm.write_page(page_id, &page).unwrap();
        }

        assert_eq!(dm.page_count(), 10);
        assert_eq!(dm.file_size(), 10 * PAGE_SIZE as u64);

        for i in 1..=10u32 {
            let page = dm.read_page(PageId::new(i)).unwrap();
            assert_eq!(page.as_slice()[0], i as u8);
        }
    }

    #[test]
    fn test_read_unallocated_page() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.mdb");

        let mut dm = DiskManager::create_new(&path).unwrap();
        dm.allocate_page().unwrap(); // Page 1 exists

        assert!(dm.read_page(PageId::new(2)).is_err());
        assert!(dm.read_page(PageId::NIL).is_err());
    }

    #[test]
    fn test_write_unallocated_page() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.mdb");

        let mut dm = DiskManager::create_new(&path).unwrap();

        let page = Page::new();
        assert!(dm.write_page(PageId::new(1), &page).is_err());
    }
}
