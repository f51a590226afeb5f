//! Buffer Pool Manager - the page caching layer the index runs on.
//!
//! The [`BufferPoolManager`] provides:
//! - Page caching between disk and memory
//! - Pin-based reference counting via RAII guards
//! - Dirty page write-back on eviction and flush
//! - FIFO eviction of unpinned frames

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use crate::buffer::replacer::FifoReplacer;
use crate::buffer::{Frame, PageGuard};
use crate::common::{Error, FrameId, PageId, Result};
use crate::storage::DiskManager;

/// Manages a pool of buffer frames for caching pages of one file.
///
/// # Architecture
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │                    BufferPoolManager                        │
/// │  ┌──────────────┐  ┌───────────────────────────────────┐   │
/// │  │ page_table   │  │        frames: Vec<Frame>         │   │
/// │  │PageId → Fid  │─▶│  [Frame0] [Frame1] [Frame2] ...   │   │
/// │  └──────────────┘  └───────────────────────────────────┘   │
/// │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
/// │  │  free_list   │  │   replacer   │  │disk_manager  │      │
/// │  │ Vec<FrameId> │  │ FifoReplacer │  │   Mutex      │      │
/// │  └──────────────┘  └──────────────┘  └──────────────┘      │
/// └─────────────────────────────────────────────────────────────┘
/// ```
///
/// One pool serves one [`DiskManager`], i.e. one file. A page stays resident
/// while pinned; an unpinned page may be evicted, but its contents survive
/// the round trip through disk and reappear on the next fetch of the same
/// page id.
///
/// # Usage
/// ```ignore
/// let dm = DiskManager::create_new("index.mdb")?;
/// let pool = BufferPoolManager::new(16, dm);
///
/// let (pid, mut guard) = pool.alloc_page()?;
/// guard.as_mut_slice()[0] = 0xAB;
/// guard.mark_dirty();
/// drop(guard); // unpinned dirty
///
/// let guard = pool.fetch_page(pid)?;
/// assert_eq!(guard.as_slice()[0], 0xAB);
/// ```
pub struct BufferPoolManager {
    /// Fixed pool of frames allocated at startup.
    frames: Vec<Frame>,

    /// Maps page IDs to frame IDs.
    page_table: RwLock<HashMap<PageId, FrameId>>,

    /// Stack of free frame IDs (LIFO for cache locality).
    free_list: Mutex<Vec<FrameId>>,

    /// Eviction policy for selecting victim frames.
    replacer: Mutex<FifoReplacer>,

    /// Handles all disk I/O.
    disk_manager: Mutex<DiskManager>,

    /// Number of frames in the pool (immutable after construction).
    pool_size: usize,
}

impl BufferPoolManager {
    /// Create a new buffer pool manager over `disk_manager`'s file.
    ///
    /// # Panics
    /// Panics if `pool_size` is 0.
    pub fn new(pool_size: usize, disk_manager: DiskManager) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");

        // Allocate all frames upfront
        let frames: Vec<Frame> = (0..pool_size).map(|_| Frame::new()).collect();

        // All frames start on the free list (LIFO order)
        let free_list: Vec<FrameId> = (0..pool_size).map(FrameId::new).collect();

        Self {
            frames,
            page_table: RwLock::new(HashMap::new()),
            free_list: Mutex::new(free_list),
            replacer: Mutex::new(FifoReplacer::new()),
            disk_manager: Mutex::new(disk_manager),
            pool_size,
        }
    }

    // ========================================================================
    // Public API: Fetch and allocate pages
    // ========================================================================

    /// Fetch a page, pinning it for the lifetime of the returned guard.
    ///
    /// If the page is already in the buffer pool, returns immediately.
    /// Otherwise, loads the page from disk (possibly evicting another page).
    ///
    /// # Errors
    /// - `Error::PageNotFound` if the page doesn't exist on disk
    /// - `Error::NoFreeFrames` if all frames are pinned
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        let frame_id = self.fetch_page_internal(page_id)?;
        let lock = self.frames[frame_id.0].page_mut();

        Ok(PageGuard::new(self, frame_id, page_id, lock))
    }

    /// Allocate a new page on disk and pin it.
    ///
    /// The page contents are undefined until written (in practice: zeroed).
    ///
    /// # Errors
    /// - `Error::NoFreeFrames` if all frames are pinned
    /// - I/O errors from disk allocation
    pub fn alloc_page(&self) -> Result<(PageId, PageGuard<'_>)> {
        // Get a free frame (or evict one)
        let frame_id = self.get_free_frame()?;

        // Allocate page on disk
        let page_id = {
            let mut dm = self.disk_manager.lock();
            match dm.allocate_page() {
                Ok(pid) => pid,
                Err(e) => {
                    // Return the frame so the failed allocation doesn't leak it
                    self.free_list.lock().push(frame_id);
                    return Err(e);
                }
            }
        };

        let frame = &self.frames[frame_id.0];

        // Reset the page data
        frame.page_mut().reset();

        // Set frame metadata and pin
        frame.set_page_id(Some(page_id));
        frame.pin();

        // Add to page table
        {
            let mut pt = self.page_table.write();
            pt.insert(page_id, frame_id);
        }

        // Record access with replacer (not evictable while pinned)
        {
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id);
            replacer.set_evictable(frame_id, false);
        }

        let lock = frame.page_mut();

        Ok((page_id, PageGuard::new(self, frame_id, page_id, lock)))
    }

    // ========================================================================
    // Public API: Flush
    // ========================================================================

    /// Write back every dirty page and sync the file.
    ///
    /// # Errors
    /// - I/O errors from disk writes
    pub fn flush_file(&self) -> Result<()> {
        // Collect all (page_id, frame_id) pairs
        let pages: Vec<(PageId, FrameId)> = {
            let pt = self.page_table.read();
            pt.iter().map(|(&pid, &fid)| (pid, fid)).collect()
        };

        for (page_id, frame_id) in pages {
            self.flush_frame(frame_id, page_id)?;
        }

        self.disk_manager.lock().sync()
    }

    // ========================================================================
    // Public API: Accounting
    // ========================================================================

    /// Number of the first page of the underlying file.
    pub fn first_page_no(&self) -> PageId {
        self.disk_manager.lock().first_page_no()
    }

    /// Get the pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Get the number of free frames.
    pub fn free_frame_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Get the number of pages resident in the buffer pool.
    pub fn resident_page_count(&self) -> usize {
        self.page_table.read().len()
    }

    /// Total pins currently held across all frames.
    ///
    /// Zero whenever no guard is alive; the index's tests use this to check
    /// that every operation releases what it acquired.
    pub fn pinned_page_count(&self) -> usize {
        self.frames.iter().filter(|f| f.is_pinned()).count()
    }

    // ========================================================================
    // Internal: Called by PageGuard on drop
    // ========================================================================

    /// Unpin a page. Called by PageGuard on drop.
    pub(crate) fn unpin_page_internal(&self, frame_id: FrameId, is_dirty: bool) {
        let frame = &self.frames[frame_id.0];

        // Mark dirty if requested
        if is_dirty {
            frame.mark_dirty();
        }

        // Decrement pin count
        let new_pin_count = frame.unpin();

        // If pin count dropped to 0, page is now evictable
        if new_pin_count == 0 {
            let mut replacer = self.replacer.lock();
            replacer.set_evictable(frame_id, true);
        }
    }

    // ========================================================================
    // Internal: Core fetch logic
    // ========================================================================

    /// Fetch a page into the buffer pool, returning its frame ID.
    fn fetch_page_internal(&self, page_id: PageId) -> Result<FrameId> {
        // Fast path: check if page is already in pool (read lock only)
        {
            let pt = self.page_table.read();
            if let Some(&frame_id) = pt.get(&page_id) {
                // Cache hit
                self.handle_cache_hit(frame_id);
                return Ok(frame_id);
            }
        }

        // Cache miss: need to load from disk
        self.handle_cache_miss(page_id)
    }

    /// Handle a cache hit: pin the frame and update replacer.
    fn handle_cache_hit(&self, frame_id: FrameId) {
        let frame = &self.frames[frame_id.0];
        frame.pin();

        let mut replacer = self.replacer.lock();
        replacer.record_access(frame_id);
        replacer.set_evictable(frame_id, false);
    }

    /// Handle a cache miss: get a frame, load from disk, update mappings.
    fn handle_cache_miss(&self, page_id: PageId) -> Result<FrameId> {
        // Get a free frame
        let frame_id = self.get_free_frame()?;

        // Read page from disk
        let page_data = {
            let mut dm = self.disk_manager.lock();
            match dm.read_page(page_id) {
                Ok(page) => page,
                Err(e) => {
                    // Return the frame so the failed fetch doesn't leak it
                    self.free_list.lock().push(frame_id);
                    return Err(e);
                }
            }
        };

        let frame = &self.frames[frame_id.0];

        // Copy page data into frame
        {
            let mut page = frame.page_mut();
            page.as_mut_slice().copy_from_slice(page_data.as_slice());
        }

        // Set frame metadata and pin
        frame.set_page_id(Some(page_id));
        frame.pin();

        // Add to page table
        {
            let mut pt = self.page_table.write();
            pt.insert(page_id, frame_id);
        }

        // Update replacer
        {
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id);
            replacer.set_evictable(frame_id, false);
        }

        Ok(frame_id)
    }

    // ========================================================================
    // Internal: Frame allocation and eviction
    // ========================================================================

    /// Get a free frame, evicting if necessary.
    fn get_free_frame(&self) -> Result<FrameId> {
        // Try the free list first
        {
            let mut fl = self.free_list.lock();
            if let Some(frame_id) = fl.pop() {
                return Ok(frame_id);
            }
        }

        // No free frames, need to evict
        self.evict_page()
    }

    /// Evict a page and return its frame.
    fn evict_page(&self) -> Result<FrameId> {
        // Ask replacer for a victim
        let frame_id = {
            let mut replacer = self.replacer.lock();
            replacer.evict().ok_or(Error::NoFreeFrames)?
        };

        let frame = &self.frames[frame_id.0];

        // Get the page ID before we clear it
        let old_page_id = frame.page_id();

        // If dirty, flush to disk
        if frame.is_dirty() {
            if let Some(pid) = old_page_id {
                self.flush_frame(frame_id, pid)?;
            }
        }

        // Remove from page table
        if let Some(pid) = old_page_id {
            let mut pt = self.page_table.write();
            pt.remove(&pid);
        }

        // Reset frame state
        frame.clear_dirty();
        frame.set_page_id(None);

        Ok(frame_id)
    }

    /// Flush a frame to disk if dirty.
    fn flush_frame(&self, frame_id: FrameId, page_id: PageId) -> Result<()> {
        let frame = &self.frames[frame_id.0];

        if frame.is_dirty() {
            // Hold page read lock while writing to disk
            let page = frame.page();
            {
                let mut dm = self.disk_manager.lock();
                dm.write_page(page_id, &page)?;
            }
            drop(page);

            frame.clear_dirty();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Helper to create a pool with a temporary file.
    fn create_test_pool(pool_size: usize) -> (BufferPoolManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.mdb");
        let dm = DiskManager::create_new(&path).unwrap();
        (BufferPoolManager::new(pool_size, dm), dir)
    }

    #[test]
    fn test_alloc_page() {
        let (pool, _dir) = create_test_pool(10);

        let (pid, guard) = pool.alloc_page().unwrap();
        assert_eq!(pid, PageId::new(1));
        assert_eq!(guard.page_id(), pid);
        drop(guard);

        let (pid, _guard) = pool.alloc_page().unwrap();
        assert_eq!(pid, PageId::new(2));
    }

    #[test]
    fn test_fetch_after_dirty_drop() {
        let (pool, _dir) = create_test_pool(10);

        let pid = {
            let (pid, mut guard) = pool.alloc_page().unwrap();
            guard.as_mut_slice()[0] = 0xAB;
            guard.mark_dirty();
            pid
        };

        let guard = pool.fetch_page(pid).unwrap();
        assert_eq!(guard.as_slice()[0], 0xAB);
    }

    #[test]
    fn test_clean_drop_discards_nothing_resident() {
        let (pool, _dir) = create_test_pool(10);

        let pid = {
            let (pid, mut guard) = pool.alloc_page().unwrap();
            guard.as_mut_slice()[0] = 0xCD;
            guard.mark_dirty();
            pid
        };

        // Fetch without marking dirty; contents must survive the clean unpin
        {
            let _guard = pool.fetch_page(pid).unwrap();
        }
        let guard = pool.fetch_page(pid).unwrap();
        assert_eq!(guard.as_slice()[0], 0xCD);
    }

    #[test]
    fn test_eviction_writes_back_dirty_page() {
        let (pool, _dir) = create_test_pool(1); // Only 1 frame

        let pid = {
            let (pid, mut guard) = pool.alloc_page().unwrap();
            guard.as_mut_slice()[0] = 0x42;
            guard.mark_dirty();
            pid
        };

        // Allocating another page evicts page 1, flushing it first
        {
            let (_pid2, _guard) = pool.alloc_page().unwrap();
        }

        // Fetching page 1 reloads it from disk with our data
        let guard = pool.fetch_page(pid).unwrap();
        assert_eq!(guard.as_slice()[0], 0x42);
    }

    #[test]
    fn test_no_free_frames() {
        let (pool, _dir) = create_test_pool(2);

        // Pin both frames (hold the guards)
        let (_p1, _g1) = pool.alloc_page().unwrap();
        let (_p2, _g2) = pool.alloc_page().unwrap();

        // All frames pinned, can't allocate
        match pool.alloc_page() {
            Err(Error::NoFreeFrames) => {}
            other => panic!("expected NoFreeFrames, got {:?}", other.map(|_| ())),
        };
    }

    #[test]
    fn test_fetch_missing_page() {
        let (pool, _dir) = create_test_pool(10);

        assert!(pool.fetch_page(PageId::new(99)).is_err());
        // The failed fetch must not leak its frame
        assert_eq!(pool.free_frame_count(), 10);
    }

    #[test]
    fn test_pin_accounting() {
        let (pool, _dir) = create_test_pool(10);

        assert_eq!(pool.pinned_page_count(), 0);

        let (pid, guard) = pool.alloc_page().unwrap();
        assert_eq!(pool.pinned_page_count(), 1);
        drop(guard);
        assert_eq!(pool.pinned_page_count(), 0);

        let guard = pool.fetch_page(pid).unwrap();
        assert_eq!(pool.pinned_page_count(), 1);
        drop(guard);
        assert_eq!(pool.pinned_page_count(), 0);
    }

    #[test]
    fn test_flush_file_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.mdb");

        let pid = {
            let dm = DiskManager::create_new(&path).unwrap();
            let pool = BufferPoolManager::new(4, dm);
            let (pid, mut guard) = pool.alloc_page().unwrap();
            guard.as_mut_slice()[7] = 0x7E;
            guard.mark_dirty();
            drop(guard);
            pool.flush_file().unwrap();
            pid
        };

        // Reopen through a fresh pool and verify
        let dm = DiskManager::open_existing(&path).unwrap();
        let pool = BufferPoolManager::new(4, dm);
        let guard = pool.fetch_page(pid).unwrap();
        assert_eq!(guard.as_slice()[7], 0x7E);
    }
}
