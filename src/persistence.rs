use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::Context;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheStore, CachedRecord};

pub const SNAPSHOT_VERSION: u32 = 1;
pub const DEFAULT_CACHE_FILE: &str = "dns_cache.json";

/// On-disk form of the whole cache: query type -> query name -> entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub partitions: BTreeMap<u16, BTreeMap<String, SnapshotEntry>>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Snapshot {
            version: SNAPSHOT_VERSION,
            partitions: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub expires_at_ms: u64,
    pub records: Vec<CachedRecord>,
}

/// Reads the snapshot at `path`. `Ok(None)` means there is no snapshot yet.
pub fn read_snapshot(path: &Path) -> anyhow::Result<Option<Snapshot>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };

    let snapshot: Snapshot = serde_json::from_slice(&bytes)
        .with_context(|| format!("decoding {}", path.display()))?;
    if snapshot.version != SNAPSHOT_VERSION {
        anyhow::bail!(
            "{} has snapshot version {}, expected {}",
            path.display(),
            snapshot.version,
            SNAPSHOT_VERSION
        );
    }

    Ok(Some(snapshot))
}

/// Writes `snapshot` next to `path` and renames it into place, so a failed write leaves the
/// previous snapshot intact.
pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec(snapshot).context("encoding snapshot")?;
    let tmp = tmp_path(path);

    fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("replacing {}", path.display()));
    }

    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from(DEFAULT_CACHE_FILE));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Builds the startup cache from `path`. A missing, unreadable or corrupt snapshot yields an empty
/// cache.
pub fn load(path: &Path) -> CacheStore {
    let cache = CacheStore::new();

    match read_snapshot(path) {
        Ok(Some(snapshot)) => {
            let restored = cache.restore(snapshot, SystemTime::now());
            info!("Cache was loaded: {} live entries from {}", restored, path.display());
        }
        Ok(None) => info!("Cache is empty: no snapshot at {}", path.display()),
        Err(e) => warn!("Couldn't load cache, starting empty: {:#}", e),
    }

    cache
}

/// Sweeps `cache` and writes what is left to `path`. Failures are logged, never returned.
pub fn save(path: &Path, cache: &CacheStore) {
    let swept = cache.sweep();
    let snapshot = cache.snapshot();

    match write_snapshot(path, &snapshot) {
        Ok(()) => info!(
            "Cache was saved to {} ({} expired entries dropped)",
            path.display(),
            swept
        ),
        Err(e) => error!("Couldn't save cache: {:#}", e),
    }
}
