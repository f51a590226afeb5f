//! Frame - a slot in the buffer pool.
//!
//! A [`Frame`] holds a [`Page`] plus metadata needed for buffer management:
//! - Which page is loaded (if any)
//! - Pin count for reference counting
//! - Dirty flag for write-back tracking

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::PageId;
use crate::storage::Page;

/// A frame in the buffer pool.
///
/// Frames are the "slots" in the buffer pool. Each frame can hold one page.
/// The buffer pool has a fixed number of frames allocated at startup.
///
/// # Thread Safety
/// All fields use interior mutability:
/// - `page`: `RwLock` for page data access
/// - `page_id`: `Mutex` for safe updates
/// - `pin_count`: `AtomicU32` for lock-free reference counting
/// - `is_dirty`: `AtomicBool` for lock-free dirty tracking
pub struct Frame {
    /// The page data, protected by RwLock.
    page: RwLock<Page>,

    /// Which page is currently loaded, or None if frame is empty.
    page_id: Mutex<Option<PageId>>,

    /// Number of active references to this frame.
    pin_count: AtomicU32,

    /// Whether the page has been modified since loading.
    is_dirty: AtomicBool,
}

impl Frame {
    /// Create a new empty frame.
    pub fn new() -> Self {
        Self {
            page: RwLock::new(Page::new()),
            page_id: Mutex::new(None),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    // ========================================================================
    // Page access (RwLock)
    // ========================================================================

    /// Acquire read lock on the page.
    #[inline]
    pub fn page(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    /// Acquire write lock on the page.
    #[inline]
    pub fn page_mut(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }

    // ========================================================================
    // Page ID management (Mutex for interior mutability)
    // ========================================================================

    /// Get the page ID of the loaded page.
    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        *self.page_id.lock()
    }

    /// Set the page ID.
    #[inline]
    pub fn set_page_id(&self, page_id: Option<PageId>) {
        *self.page_id.lock() = page_id;
    }

    // ========================================================================
    // Pin count operations (Atomic)
    // ========================================================================

    /// Increment the pin count. Returns the new pin count.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrement the pin count. Returns the new pin count.
    ///
    /// # Panics
    /// Panics if pin count is already 0.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::Relaxed);
        assert!(old > 0, "pin count underflow");
        old - 1
    }

    /// Get the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Relaxed)
    }

    /// Check if the frame is currently pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    // ========================================================================
    // Dirty flag operations (Atomic)
    // ========================================================================

    /// Mark the frame as dirty (modified).
    #[inline]
    pub fn mark_dirty(&self) {
        self.is_dirty.store(true, Ordering::Relaxed);
    }

    /// Clear the dirty flag.
    #[inline]
    pub fn clear_dirty(&self) {
        self.is_dirty.store(false, Ordering::Relaxed);
    }

    /// Check if the frame is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Frame state queries
    // ========================================================================

    /// Check if the frame is empty (no page loaded).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.page_id().is_none()
    }

    /// Check if the frame can be evicted.
    #[inline]
    pub fn is_evictable(&self) -> bool {
        self.page_id().is_some() && !self.is_pinned()
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}
