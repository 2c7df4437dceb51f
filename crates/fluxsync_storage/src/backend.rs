//! Append-only storage medium used by the facet journal.

use crate::error::StorageResult;

/// A byte medium that journals can be written to.
///
/// Backends never interpret what they hold. The journal layered on top
/// frames its own records and decides what a torn tail means.
///
/// # Invariants
///
/// - `append` returns the offset at which the bytes start
/// - `read_at` returns exactly the bytes previously appended at that offset
/// - after `sync` returns, everything appended so far survives a crash
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range extends
    /// beyond the current size.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Current size in bytes, which is also the offset of the next append.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Makes every appended byte durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying medium fails to sync.
    fn sync(&mut self) -> StorageResult<()>;

    /// Cuts the medium back to `new_size` bytes.
    ///
    /// Used to drop a torn tail record after a crash and to restart the
    /// journal during compaction.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is larger than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
