//! RAII guard for page access.
//!
//! A [`PageGuard`] represents one pin on a buffer-pool page. Dropping the
//! guard releases the pin; whether the release schedules a write-back is
//! decided by the holder through [`PageGuard::mark_dirty`]. This keeps the
//! unpin-with-dirty-bit protocol explicit on every path, including early
//! returns on errors.

use std::ops::{Deref, DerefMut};

use parking_lot::RwLockWriteGuard;

use crate::common::{FrameId, PageId};
use crate::storage::Page;

use super::buffer_pool_manager::BufferPoolManager;

/// Guard for exclusive access to a pinned page.
///
/// The page stays pinned (and therefore resident) for the lifetime of the
/// guard. Access is exclusive; the index is single-threaded, so no shared
/// variant is needed.
///
/// # Example
/// ```ignore
/// let mut guard = pool.fetch_page(page_id)?;
/// guard.as_mut_slice()[0] = 0xFF;
/// guard.mark_dirty();
/// // guard drops here: page unpinned, write-back scheduled
/// ```
pub struct PageGuard<'a> {
    /// Reference back to the pool for unpin on drop.
    pool: &'a BufferPoolManager,
    /// Frame holding this page.
    frame_id: FrameId,
    /// Page ID for convenience.
    page_id: PageId,
    /// Lock guard providing access to page data.
    lock: RwLockWriteGuard<'a, Page>,
    /// Whether the page will be unpinned dirty.
    dirty: bool,
}

impl<'a> PageGuard<'a> {
    /// Create a new guard.
    ///
    /// Called by `BufferPoolManager::fetch_page()` / `alloc_page()`.
    pub(crate) fn new(
        pool: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockWriteGuard<'a, Page>,
    ) -> Self {
        Self {
            pool,
            frame_id,
            page_id,
            lock,
            dirty: false,
        }
    }

    /// Get the page ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Schedule the page for write-back when the guard drops.
    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Deref for PageGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        &self.lock
    }
}

impl DerefMut for PageGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Page {
        &mut self.lock
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page_internal(self.frame_id, self.dirty);
    }
}
