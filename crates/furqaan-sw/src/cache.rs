//! Cache API: named buckets of request/response pairs.
//!
//! Buckets live in memory and, when the storage is opened on a directory, are
//! written through to one JSON file per bucket so they survive restarts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use furqaan_common::unix_millis;
use furqaan_net::{Request, Response};
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{ServiceWorkerError, SwResult};

/// Cache storage shared between every handler of an origin.
pub type SharedCacheStorage = Arc<RwLock<CacheStorage>>;

// ==================== Entry ====================

/// A response header as stored on disk. Values are kept as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedHeader {
    pub name: String,
    #[serde(serialize_with = "bytes_to_base64", deserialize_with = "bytes_from_base64")]
    pub value: Vec<u8>,
}

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers, in received order.
    pub headers: Vec<CachedHeader>,

    /// Response body.
    #[serde(serialize_with = "bytes_to_base64", deserialize_with = "bytes_from_base64")]
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response for storage.
    pub fn from_response(request: &Request, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| CachedHeader {
                name: name.as_str().to_string(),
                value: value.as_bytes().to_vec(),
            })
            .collect();

        Self {
            url: request.url.to_string(),
            method: request.method.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            cached_at: unix_millis(),
        }
    }

    /// Rebuild a response from the stored copy.
    pub fn to_response(&self) -> SwResult<Response> {
        let url = Url::parse(&self.url)
            .map_err(|e| ServiceWorkerError::CacheError(format!("{}: {}", self.url, e)))?;
        let status = StatusCode::from_u16(self.status).map_err(|e| {
            ServiceWorkerError::CacheError(format!("{} status {}: {}", self.url, self.status, e))
        })?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for header in &self.headers {
            match (
                HeaderName::try_from(header.name.as_str()),
                HeaderValue::from_bytes(&header.value),
            ) {
                (Ok(n), Ok(v)) => {
                    headers.append(n, v);
                }
                _ => trace!(url = %self.url, header = %header.name, "Dropping unparsable cached header"),
            }
        }

        Ok(Response {
            url,
            status,
            headers,
            body: Bytes::from(self.body.clone()),
        })
    }
}

fn bytes_to_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64.encode(bytes))
}

fn bytes_from_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    BASE64.decode(encoded).map_err(serde::de::Error::custom)
}

// ==================== Cache ====================

/// A cache bucket.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries by request key.
    entries: HashMap<String, CacheEntry>,

    /// Storage generation of the last change.
    #[serde(skip)]
    generation: u64,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Match a request key.
    pub fn match_request(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Add or replace an entry, returning the replaced one.
    pub fn put(&mut self, key: &str, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(key.to_string(), entry)
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// All request keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Persistence ====================

/// Per-bucket file lock guarding the generation last written to disk.
type FileLock = Arc<Mutex<u64>>;

/// A serialized bucket snapshot headed for its backing file.
#[derive(Debug)]
struct FileWrite {
    path: PathBuf,
    data: Vec<u8>,
    lock: FileLock,
}

impl FileWrite {
    /// Write the snapshot unless a newer one (or a delete) already reached disk.
    async fn write(&self, generation: u64) -> SwResult<()> {
        let mut written = self.lock.lock().await;
        if *written >= generation {
            trace!(path = %self.path.display(), generation, "Superseded bucket snapshot skipped");
            return Ok(());
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &self.data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        *written = generation;
        Ok(())
    }
}

/// An in-memory cache update whose bucket file is not written yet.
///
/// Produced by [`CacheStorage::stage_put`] so the storage lock can be
/// released before any disk I/O happens.
#[must_use = "the bucket file is only written by `commit`"]
#[derive(Debug)]
pub struct PendingWrite {
    name: String,
    key: String,
    previous: Option<CacheEntry>,
    created: bool,
    generation: u64,
    file: Option<FileWrite>,
}

impl PendingWrite {
    async fn write_file(&self) -> SwResult<()> {
        match self.file {
            Some(ref file) => file.write(self.generation).await,
            None => Ok(()),
        }
    }

    /// Write the bucket file, taking the storage lock again only to undo a failed write.
    pub async fn commit(self, caches: &SharedCacheStorage) -> SwResult<()> {
        let result = self.write_file().await;
        if result.is_err() {
            caches.write().await.rollback(self);
        }
        result
    }
}

// ==================== Cache Storage ====================

/// Cache storage (the `caches` global).
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    dir: Option<PathBuf>,
    generation: u64,
    files: HashMap<String, FileLock>,
}

impl CacheStorage {
    /// Create in-memory cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open storage persisted under `dir`, loading every bucket found there.
    pub async fn open_dir(dir: impl Into<PathBuf>) -> SwResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let mut caches = HashMap::new();
        let mut listing = tokio::fs::read_dir(&dir).await?;
        while let Some(item) = listing.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match load_bucket(&path).await {
                Ok(cache) => {
                    debug!(bucket = %cache.name, entries = cache.len(), "Loaded bucket");
                    caches.insert(cache.name.clone(), cache);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable bucket file"),
            }
        }

        Ok(Self {
            caches,
            dir: Some(dir),
            ..Default::default()
        })
    }

    /// Wrap into the shared handle used by controllers.
    pub fn shared(self) -> SharedCacheStorage {
        Arc::new(RwLock::new(self))
    }

    /// Directory backing this storage, if persisted.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Get a bucket by name.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Get all cache names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Open a cache, creating it if it doesn't exist.
    pub async fn open(&mut self, name: &str) -> SwResult<&Cache> {
        if !self.caches.contains_key(name) {
            self.put_all(name, Vec::new()).await?;
        }
        self.caches
            .get(name)
            .ok_or_else(|| ServiceWorkerError::NotFound(name.to_string()))
    }

    /// Store one entry, creating the bucket on first use. Last write wins.
    ///
    /// A failed file write undoes the in-memory change.
    pub async fn put(&mut self, name: &str, key: &str, entry: CacheEntry) -> SwResult<()> {
        let pending = self.stage_put(name, key, entry)?;
        let result = pending.write_file().await;
        if result.is_err() {
            self.rollback(pending);
        }
        result
    }

    /// Apply one entry in memory and serialize the bucket, leaving the file
    /// write to [`PendingWrite::commit`].
    pub fn stage_put(&mut self, name: &str, key: &str, entry: CacheEntry) -> SwResult<PendingWrite> {
        let created = !self.caches.contains_key(name);
        let target = self.file_target(name);
        let generation = self.next_generation();

        let cache = self
            .caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name));
        let previous = cache.put(key, entry);
        cache.generation = generation;
        let encoded = target.map(|(path, lock)| encode(cache).map(|data| FileWrite { path, data, lock }));

        let mut pending = PendingWrite {
            name: name.to_string(),
            key: key.to_string(),
            previous,
            created,
            generation,
            file: None,
        };
        match encoded {
            Some(Ok(file)) => pending.file = Some(file),
            Some(Err(e)) => {
                self.rollback(pending);
                return Err(e);
            }
            None => {}
        }
        trace!(bucket = %name, key = %key, generation, "Cache entry staged");
        Ok(pending)
    }

    /// Store a batch of entries as one unit.
    ///
    /// Either every entry lands in the bucket or, on a storage error, the
    /// bucket is left exactly as it was (or absent if it did not exist).
    pub async fn put_all(&mut self, name: &str, entries: Vec<(String, CacheEntry)>) -> SwResult<()> {
        let target = self.file_target(name);
        let generation = self.next_generation();

        let mut next = self
            .caches
            .get(name)
            .cloned()
            .unwrap_or_else(|| Cache::new(name));
        for (key, entry) in entries {
            next.put(&key, entry);
        }
        next.generation = generation;

        if let Some((path, lock)) = target {
            let file = FileWrite {
                path,
                data: encode(&next)?,
                lock,
            };
            file.write(generation).await?;
        }
        trace!(bucket = %name, entries = next.len(), "Bucket updated");
        self.caches.insert(name.to_string(), next);
        Ok(())
    }

    /// Delete a cache.
    ///
    /// Returns whether it existed. If the backing file cannot be removed the
    /// bucket stays in place and the error is returned. Staged writes that
    /// have not reached disk yet are discarded.
    pub async fn delete(&mut self, name: &str) -> SwResult<bool> {
        if !self.caches.contains_key(name) {
            return Ok(false);
        }
        if let Some((path, lock)) = self.file_target(name) {
            let tombstone = self.next_generation();
            let mut written = lock.lock().await;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(ServiceWorkerError::StorageError(format!(
                        "removing {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
            *written = tombstone;
        }
        Ok(self.caches.remove(name).is_some())
    }

    /// Match a key in one bucket.
    pub fn match_in(&self, name: &str, key: &str) -> Option<&CacheEntry> {
        self.caches.get(name).and_then(|c| c.match_request(key))
    }

    /// Match a key across `order`, returning the first hit and its bucket.
    pub fn match_ordered<'a>(&'a self, order: &[&'a str], key: &str) -> Option<(&'a str, &'a CacheEntry)> {
        order
            .iter()
            .find_map(|name| self.match_in(name, key).map(|entry| (*name, entry)))
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn file_target(&mut self, name: &str) -> Option<(PathBuf, FileLock)> {
        let dir = self.dir.as_ref()?;
        let path = bucket_path(dir, name);
        let lock = Arc::clone(self.files.entry(name.to_string()).or_default());
        Some((path, lock))
    }

    /// Undo a staged put, unless a later change to the bucket superseded it.
    fn rollback(&mut self, pending: PendingWrite) {
        let Some(cache) = self.caches.get_mut(&pending.name) else {
            return;
        };
        if cache.generation != pending.generation {
            return;
        }
        match pending.previous {
            Some(previous) => {
                cache.put(&pending.key, previous);
            }
            None => {
                cache.delete(&pending.key);
            }
        }
        if pending.created && cache.is_empty() {
            self.caches.remove(&pending.name);
        }
        debug!(bucket = %pending.name, key = %pending.key, "Cache write rolled back");
    }
}

fn encode(cache: &Cache) -> SwResult<Vec<u8>> {
    serde_json::to_vec(cache)
        .map_err(|e| ServiceWorkerError::StorageError(format!("encoding {}: {}", cache.name, e)))
}

async fn load_bucket(path: &Path) -> SwResult<Cache> {
    let data = tokio::fs::read(path).await?;
    serde_json::from_slice(&data)
        .map_err(|e| ServiceWorkerError::StorageError(format!("decoding {}: {}", path.display(), e)))
}

/// File backing a bucket. Characters outside `[A-Za-z0-9._-]` become `_`.
fn bucket_path(dir: &Path, name: &str) -> PathBuf {
    let stem: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    dir.join(format!("{stem}.json"))
}
