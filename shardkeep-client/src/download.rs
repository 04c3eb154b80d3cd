//! Download pipeline
//!
//! The mirror of the upload pipeline. Starting from a `StoredFile` manifest,
//! the worker fetches K of the N shards of each chunk, erasure-decodes the
//! encrypted blob, opens it with the material carried by the previous header
//! (or the manifest, for chunk 0), verifies the digests, appends the payload
//! to the output and follows the header's link to the next chunk.

use crate::bucket::BucketSet;
use crate::config::ClientConfig;
use crate::progress::DownloadObserver;
use crate::queue::JobQueue;
use crate::StopMode;
use rand::Rng;
use shardkeep_core::chunk::{ChunkHeader, StoredFile};
use shardkeep_core::crypto::{open_in_place, sha256, DIGEST_SIZE};
use shardkeep_core::erasure::ErasureCoder;
use shardkeep_core::error::{Result, ShardKeepError};
use shardkeep_core::{CHUNK_SIZE, HEADER_SIZE};
use sha2::{Digest, Sha256};
use std::io::{BufWriter, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Anything a file can be downloaded into
pub trait Output: Write + Send {}

impl<T: Write + Send> Output for T {}

struct DownloadJob {
    stored: StoredFile,
    output: Box<dyn Output>,
    observer: Box<dyn DownloadObserver>,
}

struct DownloadShared {
    queue: JobQueue<DownloadJob>,
    stop: AtomicBool,
    buckets: Arc<dyn BucketSet>,
    coder: ErasureCoder,
}

/// Download pipeline: `StoredFile` manifests in, file contents out
pub struct Downloader {
    shared: Arc<DownloadShared>,
    worker: Option<JoinHandle<()>>,
}

impl Downloader {
    pub fn new(config: &ClientConfig, buckets: Arc<dyn BucketSet>) -> Result<Self> {
        config.validate()?;
        let coder = config.coder()?;
        if buckets.shard_count() != coder.shard_count() {
            return Err(ShardKeepError::Configuration(format!(
                "bucket set has {} buckets, coder disperses over {}",
                buckets.shard_count(),
                coder.shard_count()
            )));
        }
        Ok(Self {
            shared: Arc::new(DownloadShared {
                queue: JobQueue::with_capacity(config.queue_capacity),
                stop: AtomicBool::new(false),
                buckets,
                coder,
            }),
            worker: None,
        })
    }

    /// Spawn the worker thread. Must be called at most once.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(ShardKeepError::AlreadyStarted);
        }
        let shared = self.shared.clone();
        let handle = std::thread::Builder::new()
            .name("shardkeep-download".to_string())
            .spawn(move || worker_loop(shared))?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Queue a download described by a previously emitted manifest
    pub fn download_file(
        &self,
        stored: StoredFile,
        output: Box<dyn Output>,
        observer: Box<dyn DownloadObserver>,
    ) -> Result<()> {
        if stored.chunk_count == 0 {
            return Err(ShardKeepError::Configuration(
                "manifest names zero chunks".to_string(),
            ));
        }
        self.shared.queue.push(DownloadJob {
            stored,
            output,
            observer,
        });
        Ok(())
    }

    /// Shut the worker down and join it
    pub fn stop(&mut self, mode: StopMode) {
        if mode == StopMode::Cancel {
            self.shared.queue.clear();
        }
        self.shared.stop.store(true, Ordering::Relaxed);
        self.shared.queue.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Downloader {
    fn drop(&mut self) {
        self.stop(StopMode::Drain);
    }
}

fn worker_loop(shared: Arc<DownloadShared>) {
    while let Some(job) = shared.queue.pop_wait(&shared.stop) {
        run_job(&shared, job);
    }
    debug!("download worker exiting");
}

fn run_job(shared: &DownloadShared, job: DownloadJob) {
    let DownloadJob {
        stored,
        mut output,
        mut observer,
    } = job;
    let chunks = stored.chunk_count;
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        download_one(shared, &stored, output.as_mut(), observer.as_mut())
    }));
    match outcome {
        Ok(Ok(bytes)) => {
            info!(chunks, bytes, name = %stored.first_name, "download complete");
            observer.finished(true);
        }
        Ok(Err(err)) => {
            warn!(error = %err, name = %stored.first_name, "download failed");
            observer.finished(false);
        }
        Err(_) => {
            error!(name = %stored.first_name, "download job panicked");
            observer.finished(false);
        }
    }
}

fn download_one(
    shared: &DownloadShared,
    stored: &StoredFile,
    output: &mut dyn Output,
    observer: &mut dyn DownloadObserver,
) -> Result<u64> {
    let coder = &shared.coder;
    let shard_count = coder.shard_count();
    let absent = shard_count - coder.shards_required();

    let mut out = BufWriter::new(output);
    let mut name = stored.first_name;
    let mut material = stored.encryption;
    let mut expected_file_digest = [0u8; DIGEST_SIZE];
    let mut file_hash = Sha256::new();
    let mut rng = rand::thread_rng();
    let mut last_percent = 0u8;
    let mut produced = 0u64;

    for index in 0..stored.chunk_count {
        // Each chunk tolerates its own set of unavailable buckets
        let excluded = sample_excluded(&mut rng, shard_count, absent);
        let survivors: Vec<usize> = (0..shard_count)
            .filter(|i| !excluded.contains(i))
            .collect();
        let mut readers = shared.buckets.start_get(&name, &survivors)?;

        let mut blob = Vec::with_capacity(HEADER_SIZE + CHUNK_SIZE);
        coder.decode(&mut readers, &excluded, &mut blob)?;
        if sha256(&blob) != *name.as_bytes() {
            return Err(ShardKeepError::ChainBroken(format!(
                "chunk {}: blob digest does not match its name",
                index
            )));
        }

        open_in_place(&material.key, &material.nonce, &material.tag, &mut blob)?;
        let header = ChunkHeader::from_bytes(&blob)?;
        let payload = &blob[HEADER_SIZE..];
        if sha256(payload) != header.chunk_digest {
            return Err(ShardKeepError::ChainBroken(format!(
                "chunk {}: payload digest mismatch",
                index
            )));
        }
        if index == 0 {
            expected_file_digest = header.file_digest;
        }

        file_hash.update(payload);
        out.write_all(payload)?;
        produced += payload.len() as u64;
        debug!(chunk = index, name = %name, bytes = payload.len(), "chunk recovered");

        let terminal = index + 1 == stored.chunk_count;
        if terminal {
            if !header.next.blob_digest.is_zero() {
                return Err(ShardKeepError::ChainBroken(
                    "terminal chunk links onward".to_string(),
                ));
            }
        } else {
            if header.next.blob_digest.is_zero() {
                return Err(ShardKeepError::ChainBroken(format!(
                    "chain ends at chunk {} of {}",
                    index + 1,
                    stored.chunk_count
                )));
            }
            name = header.next.blob_digest;
            material = header.next.encryption;
        }

        let percent = ((index + 1) * 100 / stored.chunk_count) as u8;
        if percent > last_percent {
            last_percent = percent;
            observer.progress(percent);
        }
    }

    let file_digest: [u8; DIGEST_SIZE] = file_hash.finalize().into();
    if file_digest != expected_file_digest {
        return Err(ShardKeepError::ChainBroken(
            "full-file digest mismatch".to_string(),
        ));
    }
    out.flush()?;
    Ok(produced)
}

/// Uniform sample of `count` distinct shard indices to leave unread
fn sample_excluded(rng: &mut impl Rng, shard_count: usize, count: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..shard_count).collect();
    for i in 0..count {
        let j = rng.gen_range(i..shard_count);
        indices.swap(i, j);
    }
    let mut excluded = indices[..count].to_vec();
    excluded.sort_unstable();
    excluded
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_sample_excluded_is_distinct_and_in_range() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let excluded = sample_excluded(&mut rng, 5, 2);
            assert_eq!(excluded.len(), 2);
            let unique: HashSet<usize> = excluded.iter().copied().collect();
            assert_eq!(unique.len(), 2);
            assert!(excluded.iter().all(|&i| i < 5));
            assert!(excluded[0] < excluded[1]);
        }
    }

    #[test]
    fn test_sample_excluded_covers_all_indices() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let mut seen = HashSet::new();
        for _ in 0..200 {
            for index in sample_excluded(&mut rng, 5, 2) {
                seen.insert(index);
            }
        }
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn test_sample_excluded_empty_when_all_required() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(9);
        assert!(sample_excluded(&mut rng, 3, 0).is_empty());
    }
}
