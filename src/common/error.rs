//! Error types for martendb.

use std::fmt;
use std::path::PathBuf;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
/// This is a common Rust pattern (see `std::io::Result`).
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in martendb.
///
/// By having a single error type, error handling stays consistent across the
/// storage, buffer, heap, and index layers. The scan-protocol variants
/// (`ScanNotInitialized`, `IndexScanCompleted`, ...) double as control-flow
/// signals for the cursor state machine, matching how callers drive a scan.
#[derive(Debug)]
pub enum Error {
    /// I/O error from disk operations.
    Io(std::io::Error),

    /// A file that was expected to exist does not.
    FileNotFound(PathBuf),

    /// Requested page does not exist on disk.
    PageNotFound(u32),

    /// Buffer pool has no free frames and cannot evict any pages.
    ///
    /// This happens when all frames are pinned.
    NoFreeFrames,

    /// A heap file failed validation on open (bad magic or checksum).
    Corrupted(String),

    /// An index file exists but its meta page disagrees with the
    /// constructor arguments (relation name, attribute offset, or type).
    BadIndexInfo(String),

    /// Scan operators outside the permitted set: the low operator must be
    /// `GT` or `GTE` and the high operator must be `LT` or `LTE`.
    BadOpcodes,

    /// Scan range with a low value greater than the high value.
    BadScanRange,

    /// Scan initialization found no key within the requested range.
    NoSuchKeyFound,

    /// `scan_next` or `end_scan` was called without an active scan.
    ScanNotInitialized,

    /// The scan cursor has moved past the last qualifying entry.
    IndexScanCompleted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::FileNotFound(path) => write!(f, "File not found: {}", path.display()),
            Error::PageNotFound(pid) => write!(f, "Page {} not found", pid),
            Error::NoFreeFrames => write!(f, "No free frames available in buffer pool"),
            Error::Corrupted(what) => write!(f, "Corrupted file: {}", what),
            Error::BadIndexInfo(name) => {
                write!(f, "Index meta page mismatch for index {}", name)
            }
            Error::BadOpcodes => write!(f, "Bad scan operators"),
            Error::BadScanRange => write!(f, "Bad scan range: low value exceeds high value"),
            Error::NoSuchKeyFound => write!(f, "No key in the scan range"),
            Error::ScanNotInitialized => write!(f, "No scan has been initialized"),
            Error::IndexScanCompleted => write!(f, "Index scan completed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            // I/O errors have a source (the underlying std::io::Error)
            Error::Io(e) => Some(e),
            // Our custom errors don't have a source
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}
