//! ShardKeep Client Library
//!
//! Client-side pipelines for durable, private file storage over a set of
//! untrusted object-storage buckets:
//! - an upload pipeline (hash, chunk, reverse-link headers, encrypt,
//!   erasure-encode, disperse to N buckets)
//! - a download pipeline (fetch K of N shards, erasure-decode, decrypt,
//!   follow the header chain, reassemble)
//! - the bucket-set abstraction with HTTP and in-memory implementations
//!
//! Each pipeline runs one worker thread fed by a bounded job queue; progress
//! and completion are reported through observer traits.

pub mod bucket;
pub mod config;
pub mod download;
pub mod progress;
pub mod queue;
pub mod upload;

pub use bucket::{BucketSet, HttpBucketSet, MemoryBucketSet, ShardRead, ShardWrite};
pub use config::{BucketConfig, ClientConfig, CodingConfig};
pub use download::{Downloader, Output};
pub use progress::{DownloadObserver, UploadObserver};
pub use upload::{Source, Uploader};

/// How `stop` treats work still sitting in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Finish every queued job, then shut the worker down
    Drain,
    /// Drop queued jobs (their observers are never called), finish only the
    /// job already in flight
    Cancel,
}
