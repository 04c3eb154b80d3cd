//! Bucket-set abstraction
//!
//! A bucket set maps a chunk name to one storage location per shard. The
//! pipelines only see the `BucketSet` trait; the HTTP implementation talks to
//! real object stores, the in-memory one backs tests and development.

use crate::config::{BucketConfig, ClientConfig};
use bytes::Bytes;
use parking_lot::RwLock;
use shardkeep_core::chunk::ChunkName;
use shardkeep_core::error::{Result, ShardKeepError};
use std::collections::HashMap;
use std::io::{Cursor, PipeWriter, Read, Write};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// One shard upload in flight. Bytes written stream to the destination;
/// `finish` completes the transfer and surfaces any transport error.
pub trait ShardWrite: Write + Send {
    fn finish(self: Box<Self>) -> Result<()>;
}

/// One shard download in flight
pub trait ShardRead: Read + Send {}

impl<T: Read + Send> ShardRead for T {}

/// A set of N buckets, one shard of every chunk per bucket
pub trait BucketSet: Send + Sync {
    /// Number of buckets (N)
    fn shard_count(&self) -> usize;

    /// Shards needed to reconstruct a chunk (K)
    fn shards_required(&self) -> usize;

    /// Open one writer per bucket for the shards of `name`. Transfers start
    /// immediately; every writer must be driven to `finish`.
    fn start_put(&self, name: &ChunkName) -> Result<Vec<Box<dyn ShardWrite>>>;

    /// Open readers for the given shard indices of `name`, in the same order
    fn start_get(&self, name: &ChunkName, shards: &[usize]) -> Result<Vec<Box<dyn ShardRead>>>;
}

// ==================== HTTP bucket set ====================

struct HttpBucket {
    base_url: String,
    access_token: Option<String>,
}

/// Bucket set over HTTP object stores, one base URL per shard index.
///
/// Objects live at `{base_url}/{hex(name)}`. Shard uploads stream through a
/// pipe into a sender thread per bucket, so all N PUTs run in parallel while
/// the erasure encoder produces their bodies.
pub struct HttpBucketSet {
    client: reqwest::blocking::Client,
    buckets: Vec<HttpBucket>,
    shards_required: usize,
}

impl HttpBucketSet {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        if config.buckets.is_empty() {
            return Err(ShardKeepError::Configuration(
                "no buckets configured".to_string(),
            ));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| ShardKeepError::Configuration(e.to_string()))?;
        let buckets = config
            .buckets
            .iter()
            .map(|b: &BucketConfig| HttpBucket {
                base_url: b.url.trim_end_matches('/').to_string(),
                access_token: b.access_token.clone(),
            })
            .collect();
        Ok(Self {
            client,
            buckets,
            shards_required: config.coding.shards_required,
        })
    }

    fn object_url(&self, shard: usize, name: &ChunkName) -> String {
        format!("{}/{}", self.buckets[shard].base_url, name.to_hex())
    }
}

impl BucketSet for HttpBucketSet {
    fn shard_count(&self) -> usize {
        self.buckets.len()
    }

    fn shards_required(&self) -> usize {
        self.shards_required
    }

    fn start_put(&self, name: &ChunkName) -> Result<Vec<Box<dyn ShardWrite>>> {
        let mut writers: Vec<Box<dyn ShardWrite>> = Vec::with_capacity(self.buckets.len());
        for (shard, bucket) in self.buckets.iter().enumerate() {
            let (reader, writer) = std::io::pipe()?;
            let client = self.client.clone();
            let url = self.object_url(shard, name);
            let token = bucket.access_token.clone();
            let handle = std::thread::Builder::new()
                .name(format!("shardkeep-put-{}", shard))
                .spawn(move || -> Result<()> {
                    let mut request = client
                        .put(&url)
                        .body(reqwest::blocking::Body::new(reader));
                    if let Some(token) = token {
                        request = request.bearer_auth(token);
                    }
                    let response = request
                        .send()
                        .map_err(|e| ShardKeepError::Network(e.to_string()))?;
                    if !response.status().is_success() {
                        return Err(ShardKeepError::Network(format!(
                            "PUT {}: {}",
                            url,
                            response.status()
                        )));
                    }
                    Ok(())
                })?;
            writers.push(Box::new(HttpShardWriter { writer, handle }));
        }
        Ok(writers)
    }

    fn start_get(&self, name: &ChunkName, shards: &[usize]) -> Result<Vec<Box<dyn ShardRead>>> {
        let mut handles = Vec::with_capacity(shards.len());
        for &shard in shards {
            if shard >= self.buckets.len() {
                return Err(ShardKeepError::Configuration(format!(
                    "shard index {} out of range 0..{}",
                    shard,
                    self.buckets.len()
                )));
            }
            let client = self.client.clone();
            let url = self.object_url(shard, name);
            let token = self.buckets[shard].access_token.clone();
            let handle = std::thread::Builder::new()
                .name(format!("shardkeep-get-{}", shard))
                .spawn(move || -> Result<reqwest::blocking::Response> {
                    let mut request = client.get(&url);
                    if let Some(token) = token {
                        request = request.bearer_auth(token);
                    }
                    let response = request
                        .send()
                        .map_err(|e| ShardKeepError::Network(e.to_string()))?;
                    if !response.status().is_success() {
                        return Err(ShardKeepError::Network(format!(
                            "GET {}: {}",
                            url,
                            response.status()
                        )));
                    }
                    Ok(response)
                })?;
            handles.push(handle);
        }

        let mut readers: Vec<Box<dyn ShardRead>> = Vec::with_capacity(handles.len());
        for handle in handles {
            let response = join_transfer(handle)??;
            readers.push(Box::new(response));
        }
        Ok(readers)
    }
}

struct HttpShardWriter {
    writer: PipeWriter,
    handle: JoinHandle<Result<()>>,
}

impl Write for HttpShardWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl ShardWrite for HttpShardWriter {
    fn finish(self: Box<Self>) -> Result<()> {
        let HttpShardWriter { writer, handle } = *self;
        // Closing the pipe ends the request body
        drop(writer);
        join_transfer(handle)?
    }
}

fn join_transfer<T>(handle: JoinHandle<T>) -> Result<T> {
    handle
        .join()
        .map_err(|_| ShardKeepError::Network("transfer thread panicked".to_string()))
}

// ==================== In-memory bucket set ====================

/// In-memory bucket set for tests and development. Not persistent.
#[derive(Clone)]
pub struct MemoryBucketSet {
    shard_count: usize,
    shards_required: usize,
    objects: Arc<RwLock<HashMap<(ChunkName, usize), Bytes>>>,
}

impl MemoryBucketSet {
    pub fn new(shard_count: usize, shards_required: usize) -> Self {
        Self {
            shard_count,
            shards_required,
            objects: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Stored shard bytes, if present
    pub fn shard(&self, name: &ChunkName, index: usize) -> Option<Bytes> {
        self.objects.read().get(&(*name, index)).cloned()
    }

    /// Number of stored shard objects across all buckets
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Drop every stored object
    pub fn clear(&self) {
        self.objects.write().clear();
    }
}

impl BucketSet for MemoryBucketSet {
    fn shard_count(&self) -> usize {
        self.shard_count
    }

    fn shards_required(&self) -> usize {
        self.shards_required
    }

    fn start_put(&self, name: &ChunkName) -> Result<Vec<Box<dyn ShardWrite>>> {
        Ok((0..self.shard_count)
            .map(|index| {
                Box::new(MemoryShardWriter {
                    buf: Vec::new(),
                    key: (*name, index),
                    objects: self.objects.clone(),
                }) as Box<dyn ShardWrite>
            })
            .collect())
    }

    fn start_get(&self, name: &ChunkName, shards: &[usize]) -> Result<Vec<Box<dyn ShardRead>>> {
        let objects = self.objects.read();
        shards
            .iter()
            .map(|&index| {
                let data = objects.get(&(*name, index)).cloned().ok_or_else(|| {
                    ShardKeepError::Network(format!("shard {} of {} not found", index, name))
                })?;
                Ok(Box::new(Cursor::new(data)) as Box<dyn ShardRead>)
            })
            .collect()
    }
}

struct MemoryShardWriter {
    buf: Vec<u8>,
    key: (ChunkName, usize),
    objects: Arc<RwLock<HashMap<(ChunkName, usize), Bytes>>>,
}

impl Write for MemoryShardWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl ShardWrite for MemoryShardWriter {
    fn finish(self: Box<Self>) -> Result<()> {
        let MemoryShardWriter { buf, key, objects } = *self;
        objects.write().insert(key, Bytes::from(buf));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardkeep_core::crypto::sha256;

    fn name_of(data: &[u8]) -> ChunkName {
        ChunkName::from_bytes(sha256(data))
    }

    #[test]
    fn test_memory_put_get_roundtrip() {
        let store = MemoryBucketSet::new(3, 2);
        let name = name_of(b"object");

        let writers = store.start_put(&name).unwrap();
        assert_eq!(writers.len(), 3);
        for (i, mut writer) in writers.into_iter().enumerate() {
            writer.write_all(&[i as u8; 10]).unwrap();
            writer.finish().unwrap();
        }
        assert_eq!(store.object_count(), 3);

        let mut readers = store.start_get(&name, &[0, 2]).unwrap();
        let mut buf = Vec::new();
        readers[0].read_to_end(&mut buf).unwrap();
        assert_eq!(buf, vec![0u8; 10]);
        buf.clear();
        readers[1].read_to_end(&mut buf).unwrap();
        assert_eq!(buf, vec![2u8; 10]);
    }

    #[test]
    fn test_memory_missing_shard() {
        let store = MemoryBucketSet::new(3, 2);
        let result = store.start_get(&name_of(b"absent"), &[0, 1]);
        assert!(matches!(result, Err(ShardKeepError::Network(_))));
    }

    #[test]
    fn test_memory_unfinished_write_stores_nothing() {
        let store = MemoryBucketSet::new(2, 1);
        let name = name_of(b"partial");
        let mut writers = store.start_put(&name).unwrap();
        writers[0].write_all(b"data").unwrap();
        drop(writers);
        assert_eq!(store.object_count(), 0);
    }

    #[test]
    fn test_http_object_url() {
        let config = ClientConfig::for_buckets(
            vec![
                BucketConfig::new("https://a.example/bucket/"),
                BucketConfig::new("https://b.example/bucket"),
            ],
            2,
            1,
        );
        let set = HttpBucketSet::new(&config).unwrap();
        let name = name_of(b"x");
        assert_eq!(
            set.object_url(0, &name),
            format!("https://a.example/bucket/{}", name.to_hex())
        );
        assert_eq!(
            set.object_url(1, &name),
            format!("https://b.example/bucket/{}", name.to_hex())
        );
    }
}
