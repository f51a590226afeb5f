//! Configuration constants for martendb.

/// Size of a page in bytes (4KB).
///
/// This value is chosen to match:
/// - OS page size on most systems (4096 bytes)
/// - Common database page sizes
///
/// Every persistent structure in the crate (index nodes, heap pages, the
/// index meta page) lives inside blocks of exactly this size.
pub const PAGE_SIZE: usize = 4096;

/// Serialized size of a page id (`u32`) inside a page.
pub const PAGE_ID_SIZE: usize = 4;

/// Serialized size of an index key (`i32`) inside a page.
pub const KEY_SIZE: usize = 4;

/// Serialized size of a [`RecordId`](super::RecordId) inside a page:
/// page number (4) + slot number (2) + 2 bytes padding.
pub const RECORD_ID_SIZE: usize = 8;
