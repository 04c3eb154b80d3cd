//! Progress and completion observers
//!
//! One observer accompanies each submitted file. `progress` percentages are
//! monotone non-decreasing within a file and reach exactly 100 on success;
//! `finished` fires exactly once per job, on success and on failure alike.
//! Jobs removed from the queue by `stop(Cancel)` are dropped without any
//! callback.

use crate::upload::Source;
use shardkeep_core::chunk::StoredFile;

/// Observer for one queued upload
pub trait UploadObserver: Send {
    /// Informational percentage in 0..=100
    fn progress(&mut self, _percent: u8) {}

    /// Fired once when the upload completes. Ownership of the source handle
    /// returns to the caller; `stored` is `None` when the upload failed.
    fn finished(&mut self, source: Box<dyn Source>, stored: Option<&StoredFile>);
}

/// Observer for one queued download
pub trait DownloadObserver: Send {
    /// Informational percentage in 0..=100
    fn progress(&mut self, _percent: u8) {}

    /// Fired once when the download completes or fails
    fn finished(&mut self, success: bool);
}
