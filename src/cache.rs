//! Durable fingerprint store.
//!
//! Uses LMDB (via heed) rooted at the cache directory. Each pipeline stage
//! gets its own named database keyed by absolute source path; values are
//! JSON-encoded [`StoredEntry`] rows, replaced whole on every put.

use anyhow::{Context, Result};
use heed::types::Str;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::store::{Bucket, FingerprintStore, StoreCounters, StoreStats, StoredEntry};

pub const RESOLVE_DB: &str = "resolve";
pub const FILTER_DB: &str = "filter";
pub const EXTRACT_DB: &str = "extract";

const DEFAULT_MAP_SIZE: usize = 256 * 1024 * 1024;
const DEFAULT_MAX_DBS: u32 = 8;

type StrDb = Database<Str, Str>;

#[derive(Debug)]
pub struct DurableStore {
    env: Env,
    cache_dir: PathBuf,
    resolve: StrDb,
    filter: StrDb,
    extract: StrDb,
    counters: StoreCounters,
}

impl DurableStore {
    pub fn open(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir).with_context(|| {
            format!("Failed to create cache directory: {}", cache_dir.display())
        })?;

        let env = open_env(&cache_dir)?;

        let mut wtxn = env.write_txn()?;
        let resolve = env.create_database::<Str, Str>(&mut wtxn, Some(RESOLVE_DB))?;
        let filter = env.create_database::<Str, Str>(&mut wtxn, Some(FILTER_DB))?;
        let extract = env.create_database::<Str, Str>(&mut wtxn, Some(EXTRACT_DB))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            cache_dir,
            resolve,
            filter,
            extract,
            counters: StoreCounters::default(),
        })
    }

    fn db(&self, bucket: Bucket) -> &StrDb {
        match bucket {
            Bucket::Resolve => &self.resolve,
            Bucket::Filter => &self.filter,
            Bucket::Extract => &self.extract,
        }
    }

    fn read_raw(&self, bucket: Bucket, path: &str) -> Result<Option<String>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db(bucket).get(&rtxn, path)?.map(|v| v.to_string()))
    }
}

impl FingerprintStore for DurableStore {
    fn get(&self, bucket: Bucket, path: &str) -> Option<StoredEntry> {
        let raw = match self.read_raw(bucket, path) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Failed to read {} cache entry for {path}: {e:#}", bucket.name());
                return None;
            }
        };
        match serde_json::from_str::<StoredEntry>(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Ignoring unreadable {} cache entry for {path}: {e}", bucket.name());
                None
            }
        }
    }

    fn put(&self, bucket: Bucket, path: &str, entry: StoredEntry) -> Result<()> {
        let value = serde_json::to_string(&entry)?;
        let mut wtxn = self.env.write_txn()?;
        self.db(bucket).put(&mut wtxn, path, value.as_str())?;
        wtxn.commit()?;
        Ok(())
    }

    fn counters(&self) -> &StoreCounters {
        &self.counters
    }

    fn stats(&self) -> Result<StoreStats> {
        let rtxn = self.env.read_txn()?;
        let mut entries = BTreeMap::new();
        for bucket in Bucket::ALL {
            entries.insert(bucket.name().to_string(), table_len(self.db(bucket), &rtxn)?);
        }
        Ok(StoreStats {
            backend: "lmdb".to_string(),
            location: Some(self.cache_dir.to_string_lossy().to_string()),
            hits: self.counters.hits(),
            misses: self.counters.misses(),
            writes: self.counters.writes(),
            entries,
        })
    }
}

/// Removes the store files under `cache_dir`, leaving the directory itself.
pub fn clear(cache_dir: &Path) -> Result<()> {
    for name in ["data.mdb", "lock.mdb"] {
        let path = cache_dir.join(name);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove cache file: {}", path.display()))?;
        }
    }
    Ok(())
}

fn open_env(cache_dir: &Path) -> Result<Env> {
    let mut options = EnvOpenOptions::new();
    options.map_size(DEFAULT_MAP_SIZE);
    options.max_dbs(DEFAULT_MAX_DBS);
    // SAFETY: default LMDB locking is kept and the directory is owned by this
    // process for the duration of a regeneration run.
    unsafe {
        options
            .open(cache_dir)
            .with_context(|| format!("Failed to create/open cache env: {}", cache_dir.display()))
    }
}

fn table_len(db: &StrDb, rtxn: &RoTxn<'_>) -> Result<u64> {
    Ok(db.len(rtxn)?)
}
