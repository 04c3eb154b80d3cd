//! Upload pipeline
//!
//! One worker thread consumes queued files. Each file is processed in two
//! passes:
//!
//! 1. Sequential scan: rolling full-file SHA-256 plus one digest per chunk,
//!    collected into the header array. The full-file digest lands in
//!    header 0.
//! 2. Reverse walk from the last chunk to the first. A chunk's encrypted
//!    blob (header plus payload) determines its name, and that name plus the
//!    AEAD material is written into the previous chunk's header before that
//!    header is encrypted in turn. Chunk 0's name and material become the
//!    emitted `StoredFile`.
//!
//! The reverse order is forced by the format: a header embeds the name of
//! the next chunk's ciphertext, and the ciphertext (and therefore the name)
//! of a chunk depends on its own header.

use crate::bucket::{BucketSet, ShardWrite};
use crate::config::ClientConfig;
use crate::progress::UploadObserver;
use crate::queue::JobQueue;
use crate::StopMode;
use shardkeep_core::chunk::{
    chunk_count_for_size, chunk_len, chunk_offset, ChunkHeader, ChunkName, NextChunk, StoredFile,
};
use shardkeep_core::crypto::{seal_in_place, sha256, EncryptionKey, NonceGenerator};
use shardkeep_core::erasure::ErasureCoder;
use shardkeep_core::error::{Result, ShardKeepError};
use shardkeep_core::{AeadMaterial, CHUNK_SIZE, HEADER_SIZE};
use sha2::{Digest, Sha256};
use std::cell::{Cell, RefCell};
use std::io::{Read, Seek, SeekFrom, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Anything a file can be uploaded from
pub trait Source: Read + Seek + Send {}

impl<T: Read + Seek + Send> Source for T {}

struct UploadJob {
    source: Box<dyn Source>,
    size: u64,
    observer: Box<dyn UploadObserver>,
}

struct UploadShared {
    queue: JobQueue<UploadJob>,
    stop: AtomicBool,
    buckets: Arc<dyn BucketSet>,
    coder: ErasureCoder,
    key: EncryptionKey,
}

/// Upload pipeline: queue in, `StoredFile` manifests out
pub struct Uploader {
    shared: Arc<UploadShared>,
    worker: Option<JoinHandle<()>>,
}

impl Uploader {
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
        let key = config.encryption_key()?;
        Ok(Self {
            shared: Arc::new(UploadShared {
                queue: JobQueue::with_capacity(config.queue_capacity),
                stop: AtomicBool::new(false),
                buckets,
                coder,
                key,
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
            .name("shardkeep-upload".to_string())
            .spawn(move || worker_loop(shared))?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Queue a file for upload.
    ///
    /// The source is measured by seeking; a stated size only serves as a
    /// debug cross-check. The observer's `finished` returns the source and,
    /// on success, the manifest needed to download the file again.
    pub fn upload_file(
        &self,
        mut source: Box<dyn Source>,
        size: Option<u64>,
        observer: Box<dyn UploadObserver>,
    ) -> Result<()> {
        let measured = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(0))?;
        if let Some(stated) = size {
            debug_assert_eq!(
                stated, measured,
                "stated upload size disagrees with the source"
            );
        }
        self.shared.queue.push(UploadJob {
            source,
            size: measured,
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

impl Drop for Uploader {
    fn drop(&mut self) {
        self.stop(StopMode::Drain);
    }
}

fn worker_loop(shared: Arc<UploadShared>) {
    let mut nonces = NonceGenerator::new();
    let mut blob = vec![0u8; HEADER_SIZE + CHUNK_SIZE];
    while let Some(job) = shared.queue.pop_wait(&shared.stop) {
        run_job(&shared, job, &mut nonces, &mut blob);
    }
    debug!("upload worker exiting");
}

/// Process one job and fire its close callback exactly once, whatever
/// happened
fn run_job(
    shared: &UploadShared,
    job: UploadJob,
    nonces: &mut NonceGenerator,
    blob: &mut [u8],
) {
    let UploadJob {
        mut source,
        size,
        mut observer,
    } = job;
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        upload_one(shared, source.as_mut(), size, observer.as_mut(), nonces, blob)
    }));
    match outcome {
        Ok(Ok(stored)) => {
            info!(chunks = stored.chunk_count, name = %stored.first_name, "upload complete");
            observer.finished(source, Some(&stored));
        }
        Ok(Err(err)) => {
            warn!(error = %err, size, "upload failed");
            observer.finished(source, None);
        }
        Err(_) => {
            error!(size, "upload job panicked");
            observer.finished(source, None);
        }
    }
}

fn upload_one(
    shared: &UploadShared,
    source: &mut dyn Source,
    size: u64,
    observer: &mut dyn UploadObserver,
    nonces: &mut NonceGenerator,
    blob: &mut [u8],
) -> Result<StoredFile> {
    let coder = &shared.coder;
    let count = chunk_count_for_size(size);
    let mut headers = vec![ChunkHeader::default(); count as usize];

    // Pass 1: full-file digest and per-chunk digests
    source.seek(SeekFrom::Start(0))?;
    let mut file_hash = Sha256::new();
    for index in 0..count {
        let want = chunk_len(size, index);
        let payload = &mut blob[HEADER_SIZE..HEADER_SIZE + want];
        let got = read_full(source, payload)?;
        if got < want {
            return Err(ShardKeepError::SizeMismatch {
                stated: size,
                measured: chunk_offset(index) + got as u64,
            });
        }
        file_hash.update(&payload[..]);
        headers[index as usize].chunk_digest = sha256(payload);
    }
    // The source must be exhausted exactly at the last chunk
    let mut probe = [0u8; 1];
    if source.read(&mut probe)? != 0 {
        // The source holds more than was measured; count what is really there
        let extra = 1 + std::io::copy(source, &mut std::io::sink())?;
        return Err(ShardKeepError::ChunkCountMismatch {
            expected: count,
            actual: chunk_count_for_size(size + extra),
        });
    }
    headers[0].file_digest = file_hash.finalize().into();

    // Pass 2: reverse walk, encrypt, link, disperse
    let total: u64 = (0..count)
        .map(|i| coder.total_encoded_size((HEADER_SIZE + chunk_len(size, i)) as u64))
        .sum();
    let meter = ProgressMeter::new(total, observer);
    let key = shared.key.as_bytes();
    let mut stored = None;

    for index in (0..count).rev() {
        let blob_len = HEADER_SIZE + chunk_len(size, index);
        headers[index as usize].write_to(blob);
        source.seek(SeekFrom::Start(chunk_offset(index)))?;
        let payload = &mut blob[HEADER_SIZE..blob_len];
        let got = read_full(source, payload)?;
        if got < payload.len() {
            return Err(ShardKeepError::SizeMismatch {
                stated: size,
                measured: chunk_offset(index) + got as u64,
            });
        }

        let nonce = nonces.next_nonce();
        let tag = seal_in_place(key, &nonce, &mut blob[..blob_len])?;
        let name = ChunkName::from_bytes(sha256(&blob[..blob_len]));
        let material = AeadMaterial {
            tag,
            nonce,
            key: *key,
        };
        if index > 0 {
            headers[index as usize - 1].next = NextChunk {
                blob_digest: name,
                encryption: material,
            };
        } else {
            stored = Some(StoredFile {
                first_name: name,
                encryption: material,
                chunk_count: count,
            });
        }

        disperse_chunk(shared, &name, &blob[..blob_len], &meter)?;
        debug!(chunk = index, name = %name, "chunk dispersed");
    }

    meter.complete();
    Ok(stored.expect("chunk count is at least one"))
}

/// Stream one encrypted blob through the erasure encoder into N bucket
/// writers.
///
/// Every writer opened by `start_put` is driven to `finish`, even when the
/// encode or a sibling writer fails, so no started transfer is abandoned in
/// flight. The first error observed is the one reported.
fn disperse_chunk(
    shared: &UploadShared,
    name: &ChunkName,
    blob: &[u8],
    meter: &ProgressMeter<'_>,
) -> Result<()> {
    let writers = shared.buckets.start_put(name)?;
    let mut counting: Vec<CountingWriter<'_, '_>> = writers
        .into_iter()
        .map(|inner| CountingWriter { inner, meter })
        .collect();
    let mut input = blob;
    let mut first_error = shared.coder.encode(&mut input, &mut counting).err();
    for writer in counting {
        if let Err(err) = writer.inner.finish() {
            first_error.get_or_insert(err);
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Accumulates bytes handed to the bucket writers and reports monotone
/// percentages
struct ProgressMeter<'a> {
    total: u64,
    sent: Cell<u64>,
    last: Cell<u8>,
    observer: RefCell<&'a mut dyn UploadObserver>,
}

impl<'a> ProgressMeter<'a> {
    fn new(total: u64, observer: &'a mut dyn UploadObserver) -> Self {
        Self {
            total,
            sent: Cell::new(0),
            last: Cell::new(0),
            observer: RefCell::new(observer),
        }
    }

    fn add(&self, bytes: u64) {
        let sent = self.sent.get() + bytes;
        self.sent.set(sent);
        let percent = if self.total == 0 {
            100
        } else {
            (sent * 100 / self.total).min(100) as u8
        };
        if percent > self.last.get() {
            self.last.set(percent);
            self.observer.borrow_mut().progress(percent);
        }
    }

    fn complete(&self) {
        if self.last.get() < 100 {
            self.last.set(100);
            self.observer.borrow_mut().progress(100);
        }
    }
}

struct CountingWriter<'m, 'a> {
    inner: Box<dyn ShardWrite>,
    meter: &'m ProgressMeter<'a>,
}

impl Write for CountingWriter<'_, '_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.meter.add(written as u64);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
