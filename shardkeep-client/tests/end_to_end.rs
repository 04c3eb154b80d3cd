//! End-to-end integration tests for ShardKeep
//!
//! Drives the complete pipeline: file → digests → reverse-linked headers →
//! encrypt → erasure-encode → bucket set → erasure-decode → decrypt → file.
//!
//! Run with: cargo test --test end_to_end

use shardkeep_client::{
    ClientConfig, Downloader, MemoryBucketSet, Source, StopMode, Uploader,
    UploadObserver,
};
use shardkeep_core::chunk::{chunk_count_for_size, ChunkHeader, ChunkName, StoredFile};
use shardkeep_core::crypto::{open_in_place, sha256};
use shardkeep_core::erasure::ErasureCoder;
use shardkeep_core::{CHUNK_SIZE, HEADER_SIZE};
use std::io::Cursor;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const RECV_TIMEOUT: Duration = Duration::from_secs(30);

/// Generate test file data of specified size
fn generate_file(size: usize) -> Vec<u8> {
    // Use a pattern that's easy to verify
    (0..size).map(|i| (i % 256) as u8).collect()
}

struct CollectingUpload {
    updates: Vec<u8>,
    tx: mpsc::Sender<(Vec<u8>, Option<StoredFile>)>,
}

impl UploadObserver for CollectingUpload {
    fn progress(&mut self, percent: u8) {
        self.updates.push(percent);
    }

    fn finished(&mut self, _source: Box<dyn Source>, stored: Option<&StoredFile>) {
        let _ = self
            .tx
            .send((std::mem::take(&mut self.updates), stored.cloned()));
    }
}

struct CollectingDownload {
    updates: Vec<u8>,
    tx: mpsc::Sender<(Vec<u8>, bool)>,
}

impl shardkeep_client::DownloadObserver for CollectingDownload {
    fn progress(&mut self, percent: u8) {
        self.updates.push(percent);
    }

    fn finished(&mut self, success: bool) {
        let _ = self.tx.send((std::mem::take(&mut self.updates), success));
    }
}

/// Output sink the test can inspect after the worker is done with it
#[derive(Clone)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn pipelines(n: usize, k: usize) -> (Uploader, Downloader, MemoryBucketSet) {
    let store = MemoryBucketSet::new(n, k);
    let config = ClientConfig::for_buckets(Vec::new(), n, k);
    let mut uploader = Uploader::new(&config, Arc::new(store.clone())).unwrap();
    uploader.start().unwrap();
    let mut downloader = Downloader::new(&config, Arc::new(store.clone())).unwrap();
    downloader.start().unwrap();
    (uploader, downloader, store)
}

fn upload(uploader: &Uploader, data: &[u8]) -> (Vec<u8>, StoredFile) {
    let (tx, rx) = mpsc::channel();
    uploader
        .upload_file(
            Box::new(Cursor::new(data.to_vec())),
            Some(data.len() as u64),
            Box::new(CollectingUpload {
                updates: Vec::new(),
                tx,
            }),
        )
        .unwrap();
    let (updates, stored) = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    (updates, stored.expect("upload should succeed"))
}

fn download(downloader: &Downloader, stored: &StoredFile) -> (Vec<u8>, Vec<u8>, bool) {
    let buf = SharedBuf(Arc::new(Mutex::new(Vec::new())));
    let (tx, rx) = mpsc::channel();
    downloader
        .download_file(
            stored.clone(),
            Box::new(buf.clone()),
            Box::new(CollectingDownload {
                updates: Vec::new(),
                tx,
            }),
        )
        .unwrap();
    let (updates, success) = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    let data = buf.0.lock().unwrap().clone();
    (data, updates, success)
}

/// Recover one chunk blob straight from the store, reading the first K
/// shards
fn fetch_blob(store: &MemoryBucketSet, coder: &ErasureCoder, name: &ChunkName) -> Vec<u8> {
    let mut readers: Vec<_> = (0..coder.shards_required())
        .map(|i| Cursor::new(store.shard(name, i).unwrap()))
        .collect();
    let excluded: Vec<usize> = (coder.shards_required()..coder.shard_count()).collect();
    let mut blob = Vec::new();
    coder.decode(&mut readers, &excluded, &mut blob).unwrap();
    blob
}

#[test]
fn test_roundtrip_at_boundary_sizes() {
    let (uploader, downloader, store) = pipelines(5, 3);
    for size in [0, 1, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, 10 * CHUNK_SIZE + 17] {
        let data = generate_file(size);
        let (_, stored) = upload(&uploader, &data);
        assert_eq!(stored.chunk_count, chunk_count_for_size(size as u64));

        let (recovered, _, success) = download(&downloader, &stored);
        assert!(success, "size {}", size);
        assert_eq!(recovered, data, "size {}", size);
    }
    // One object per bucket per chunk
    let chunks: u64 = [0usize, 1, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, 10 * CHUNK_SIZE + 17]
        .iter()
        .map(|&s| chunk_count_for_size(s as u64))
        .sum();
    assert_eq!(store.object_count() as u64, chunks * 5);
}

#[test]
fn test_single_chunk_manifest_shape() {
    let (uploader, _, store) = pipelines(5, 3);
    let data = [0x42u8];
    let (_, stored) = upload(&uploader, &data);
    assert_eq!(stored.chunk_count, 1);

    let coder = ErasureCoder::new(5, 3, Default::default()).unwrap();
    let mut blob = fetch_blob(&store, &coder, &stored.first_name);
    assert_eq!(sha256(&blob), *stored.first_name.as_bytes());

    open_in_place(
        &stored.encryption.key,
        &stored.encryption.nonce,
        &stored.encryption.tag,
        &mut blob,
    )
    .unwrap();
    let header = ChunkHeader::from_bytes(&blob).unwrap();
    assert_eq!(&blob[HEADER_SIZE..], &data);
    assert_eq!(header.chunk_digest, sha256(&data));
    assert_eq!(header.file_digest, sha256(&data));
    // A single-chunk file has nothing to link to
    assert!(header.next.blob_digest.is_zero());
    assert_eq!(header.next.encryption.tag, [0u8; 16]);
    assert_eq!(header.next.encryption.nonce, [0u8; 12]);
    assert_eq!(header.next.encryption.key, [0u8; 32]);
}

#[test]
fn test_two_chunk_header_chain() {
    let (uploader, _, store) = pipelines(5, 3);
    let data = generate_file(CHUNK_SIZE + 1);
    let (_, stored) = upload(&uploader, &data);
    assert_eq!(stored.chunk_count, 2);

    let coder = ErasureCoder::new(5, 3, Default::default()).unwrap();

    let mut first = fetch_blob(&store, &coder, &stored.first_name);
    open_in_place(
        &stored.encryption.key,
        &stored.encryption.nonce,
        &stored.encryption.tag,
        &mut first,
    )
    .unwrap();
    let header0 = ChunkHeader::from_bytes(&first).unwrap();
    assert_eq!(header0.file_digest, sha256(&data));
    assert_eq!(header0.chunk_digest, sha256(&data[..CHUNK_SIZE]));
    assert!(!header0.next.blob_digest.is_zero());

    // header 0 names chunk 1's encrypted blob and carries what opens it
    let mut second = fetch_blob(&store, &coder, &header0.next.blob_digest);
    assert_eq!(sha256(&second), *header0.next.blob_digest.as_bytes());
    open_in_place(
        &header0.next.encryption.key,
        &header0.next.encryption.nonce,
        &header0.next.encryption.tag,
        &mut second,
    )
    .unwrap();
    let header1 = ChunkHeader::from_bytes(&second).unwrap();
    assert_eq!(&second[HEADER_SIZE..], &data[CHUNK_SIZE..]);
    assert_eq!(header1.chunk_digest, sha256(&data[CHUNK_SIZE..]));
    // Only chunk 0 carries the full-file digest; chunk 1 is terminal
    assert_eq!(header1.file_digest, [0u8; 32]);
    assert!(header1.next.blob_digest.is_zero());
}

#[test]
fn test_progress_is_monotone_and_ends_at_100() {
    let (uploader, downloader, _) = pipelines(5, 3);
    let data = generate_file(7 * CHUNK_SIZE + 123);

    let (updates, stored) = upload(&uploader, &data);
    assert!(!updates.is_empty());
    assert!(updates.windows(2).all(|w| w[0] <= w[1]), "{:?}", updates);
    assert_eq!(*updates.last().unwrap(), 100);
    assert!(updates.iter().all(|&p| p <= 100));

    let (_, updates, success) = download(&downloader, &stored);
    assert!(success);
    assert!(updates.windows(2).all(|w| w[0] <= w[1]), "{:?}", updates);
    assert_eq!(*updates.last().unwrap(), 100);
}

#[test]
fn test_empty_file_still_reports_completion() {
    let (uploader, downloader, _) = pipelines(3, 2);
    let (updates, stored) = upload(&uploader, &[]);
    assert_eq!(*updates.last().unwrap(), 100);
    assert_eq!(stored.chunk_count, 1);

    let (recovered, _, success) = download(&downloader, &stored);
    assert!(success);
    assert!(recovered.is_empty());
}

#[test]
fn test_cancel_drops_queued_jobs_without_close() {
    let store = MemoryBucketSet::new(3, 2);
    let config = ClientConfig::for_buckets(Vec::new(), 3, 2);
    // Worker intentionally never started, so the jobs stay queued
    let mut uploader = Uploader::new(&config, Arc::new(store)).unwrap();

    let (tx, rx) = mpsc::channel();
    for _ in 0..2 {
        uploader
            .upload_file(
                Box::new(Cursor::new(generate_file(64))),
                None,
                Box::new(CollectingUpload {
                    updates: Vec::new(),
                    tx: tx.clone(),
                }),
            )
            .unwrap();
    }
    uploader.stop(StopMode::Cancel);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_drain_finishes_queued_jobs() {
    let store = MemoryBucketSet::new(3, 2);
    let config = ClientConfig::for_buckets(Vec::new(), 3, 2);
    let mut uploader = Uploader::new(&config, Arc::new(store)).unwrap();

    let (tx, rx) = mpsc::channel();
    for _ in 0..3 {
        uploader
            .upload_file(
                Box::new(Cursor::new(generate_file(CHUNK_SIZE))),
                None,
                Box::new(CollectingUpload {
                    updates: Vec::new(),
                    tx: tx.clone(),
                }),
            )
            .unwrap();
    }
    uploader.start().unwrap();
    uploader.stop(StopMode::Drain);
    for _ in 0..3 {
        let (_, stored) = rx.recv_timeout(RECV_TIMEOUT).unwrap();
        assert!(stored.is_some());
    }
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_start_twice_is_rejected() {
    let store = MemoryBucketSet::new(3, 2);
    let config = ClientConfig::for_buckets(Vec::new(), 3, 2);
    let mut uploader = Uploader::new(&config, Arc::new(store)).unwrap();
    uploader.start().unwrap();
    assert!(uploader.start().is_err());
}

#[test]
fn test_download_of_lost_data_fails_with_close() {
    let (uploader, downloader, store) = pipelines(3, 2);
    let data = generate_file(2 * CHUNK_SIZE);
    let (_, stored) = upload(&uploader, &data);

    store.clear();
    let (_, _, success) = download(&downloader, &stored);
    assert!(!success);
}

#[test]
fn test_tampered_manifest_fails_authentication() {
    let (uploader, downloader, _) = pipelines(3, 2);
    let (_, mut stored) = upload(&uploader, &generate_file(100));
    stored.encryption.key[0] ^= 1;
    let (_, _, success) = download(&downloader, &stored);
    assert!(!success);
}

#[test]
fn test_manifest_serialization_roundtrip() {
    let (uploader, _, _) = pipelines(3, 2);
    let (_, stored) = upload(&uploader, &generate_file(100));
    let text = toml::to_string(&stored).unwrap();
    let parsed: StoredFile = toml::from_str(&text).unwrap();
    assert_eq!(parsed, stored);
}
