//! Fingerprint-keyed memoization for the pipeline stages.
//!
//! Every stage stores its per-file result next to the fingerprint of the
//! file it was computed from. A lookup only succeeds while the stored
//! fingerprint still matches, so staleness is detected without any
//! external bookkeeping.

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use crate::parse::hash_content;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(content: &[u8]) -> Self {
        Self(hash_content(content))
    }

    /// Derives a fingerprint that also changes whenever `salt` does.
    pub fn salted(&self, salt: &str) -> Self {
        Self(format!("{}:{salt}", self.0))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
}

impl SourceFile {
    /// Reads `path` and fingerprints its content. The content is returned so
    /// callers that need it do not read the file twice.
    pub fn read(path: &Path) -> Result<(Self, Vec<u8>)> {
        let content = std::fs::read(path)?;
        let file = Self {
            path: path.to_path_buf(),
            fingerprint: Fingerprint::of(&content),
        };
        Ok((file, content))
    }

    pub fn key(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    Resolve,
    Filter,
    Extract,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [Bucket::Resolve, Bucket::Filter, Bucket::Extract];

    pub fn name(self) -> &'static str {
        match self {
            Bucket::Resolve => "resolve",
            Bucket::Filter => "filter",
            Bucket::Extract => "extract",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub fingerprint: Fingerprint,
    pub payload: String,
}

#[derive(Debug, Default)]
pub struct StoreCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl StoreCounters {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub backend: String,
    pub location: Option<String>,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub entries: BTreeMap<String, u64>,
}

pub trait FingerprintStore {
    fn get(&self, bucket: Bucket, path: &str) -> Option<StoredEntry>;

    fn put(&self, bucket: Bucket, path: &str, entry: StoredEntry) -> Result<()>;

    fn counters(&self) -> &StoreCounters;

    fn stats(&self) -> Result<StoreStats>;
}

/// Returns the payload cached for `file` if it was stored under `fingerprint`.
pub fn recall_with<T: DeserializeOwned>(
    store: &dyn FingerprintStore,
    bucket: Bucket,
    file: &SourceFile,
    fingerprint: &Fingerprint,
) -> Option<T> {
    let key = file.key();
    let found = store
        .get(bucket, &key)
        .filter(|entry| &entry.fingerprint == fingerprint)
        .and_then(|entry| match serde_json::from_str::<T>(&entry.payload) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(
                    "Ignoring corrupt {} cache entry for {key}: {e}",
                    bucket.name()
                );
                None
            }
        });

    if found.is_some() {
        store.counters().hit();
    } else {
        store.counters().miss();
    }
    found
}

pub fn recall<T: DeserializeOwned>(
    store: &dyn FingerprintStore,
    bucket: Bucket,
    file: &SourceFile,
) -> Option<T> {
    recall_with(store, bucket, file, &file.fingerprint)
}

/// Stores `payload` for `file`. A failed write only costs a recomputation on
/// the next run, so it is reported and swallowed.
pub fn remember_with<T: Serialize>(
    store: &dyn FingerprintStore,
    bucket: Bucket,
    file: &SourceFile,
    fingerprint: &Fingerprint,
    payload: &T,
) {
    let key = file.key();
    let result = serde_json::to_string(payload)
        .map_err(anyhow::Error::from)
        .and_then(|payload| {
            store.put(
                bucket,
                &key,
                StoredEntry {
                    fingerprint: fingerprint.clone(),
                    payload,
                },
            )
        });

    match result {
        Ok(()) => store.counters().write(),
        Err(e) => warn!("Failed to cache {} result for {key}: {e:#}", bucket.name()),
    }
}

pub fn remember<T: Serialize>(
    store: &dyn FingerprintStore,
    bucket: Bucket,
    file: &SourceFile,
    payload: &T,
) {
    remember_with(store, bucket, file, &file.fingerprint, payload)
}

/// Keeps entries for the lifetime of the process only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(Bucket, String), StoredEntry>>,
    counters: StoreCounters,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FingerprintStore for MemoryStore {
    fn get(&self, bucket: Bucket, path: &str) -> Option<StoredEntry> {
        let entries = self.entries.lock().ok()?;
        entries.get(&(bucket, path.to_string())).cloned()
    }

    fn put(&self, bucket: Bucket, path: &str, entry: StoredEntry) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        entries.insert((bucket, path.to_string()), entry);
        Ok(())
    }

    fn counters(&self) -> &StoreCounters {
        &self.counters
    }

    fn stats(&self) -> Result<StoreStats> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        let mut per_bucket = BTreeMap::new();
        for bucket in Bucket::ALL {
            let count = entries.keys().filter(|(b, _)| *b == bucket).count() as u64;
            per_bucket.insert(bucket.name().to_string(), count);
        }
        Ok(StoreStats {
            backend: "memory".to_string(),
            location: None,
            hits: self.counters.hits(),
            misses: self.counters.misses(),
            writes: self.counters.writes(),
            entries: per_bucket,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(path: &str, content: &str) -> SourceFile {
        SourceFile {
            path: PathBuf::from(path),
            fingerprint: Fingerprint::of(content.as_bytes()),
        }
    }

    #[test]
    fn recall_requires_matching_fingerprint() {
        let store = MemoryStore::new();
        let v1 = source("/src/A.java", "class A {}");
        remember(&store, Bucket::Resolve, &v1, &vec!["A".to_string()]);

        let hit: Option<Vec<String>> = recall(&store, Bucket::Resolve, &v1);
        assert_eq!(hit, Some(vec!["A".to_string()]));

        let v2 = source("/src/A.java", "class A { int x; }");
        let miss: Option<Vec<String>> = recall(&store, Bucket::Resolve, &v2);
        assert!(miss.is_none());

        assert_eq!(store.counters().hits(), 1);
        assert_eq!(store.counters().misses(), 1);
        assert_eq!(store.counters().writes(), 1);
    }

    #[test]
    fn buckets_are_independent() {
        let store = MemoryStore::new();
        let file = source("/src/A.java", "class A {}");
        remember(&store, Bucket::Resolve, &file, &vec!["A".to_string()]);

        let filtered: Option<Vec<String>> = recall(&store, Bucket::Filter, &file);
        assert!(filtered.is_none());
    }

    #[test]
    fn corrupt_payload_is_a_miss() {
        let store = MemoryStore::new();
        let file = source("/src/A.java", "class A {}");
        store
            .put(
                Bucket::Extract,
                &file.key(),
                StoredEntry {
                    fingerprint: file.fingerprint.clone(),
                    payload: "{not json".to_string(),
                },
            )
            .unwrap();

        let got: Option<Vec<String>> = recall(&store, Bucket::Extract, &file);
        assert!(got.is_none());
        assert_eq!(store.counters().misses(), 1);
    }

    #[test]
    fn salted_fingerprint_differs_from_plain() {
        let store = MemoryStore::new();
        let file = source("/src/A.java", "class A {}");
        let salted = file.fingerprint.salted("args=false");
        remember_with(&store, Bucket::Extract, &file, &salted, &1u32);

        assert_eq!(recall::<u32>(&store, Bucket::Extract, &file), None);
        assert_eq!(
            recall_with::<u32>(&store, Bucket::Extract, &file, &salted),
            Some(1)
        );
    }
}
