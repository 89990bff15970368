use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::persistence::{Snapshot, SnapshotEntry};

/// A resource record as the cache keeps it: owner name, type, class, ttl and self-contained rdata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRecord {
    pub name: String,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug)]
struct CacheEntry {
    expires_at: SystemTime,
    records: Vec<CachedRecord>,
}

impl CacheEntry {
    fn is_expired(&self, now: SystemTime) -> bool {
        now > self.expires_at
    }
}

// query type -> query name -> entry
type Partitions = HashMap<u16, HashMap<String, CacheEntry>>;

/// Lowercases `name` and gives it exactly one trailing dot, so `Example.COM` and `example.com.`
/// share an entry.
pub fn normalize_name(name: &str) -> String {
    let mut normalized = name.trim_end_matches('.').to_ascii_lowercase();
    normalized.push('.');
    normalized
}

/// Milliseconds since the epoch, rounded up so a stored expiry never comes earlier than the real
/// one.
pub(crate) fn to_epoch_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| {
            let partial = u64::from(elapsed.subsec_nanos() % 1_000_000 != 0);
            elapsed.as_millis() as u64 + partial
        })
        .unwrap_or(0)
}

pub(crate) fn from_epoch_ms(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

/// TTL bounded record cache, partitioned by query type and then by query name.
///
/// Every operation takes the same lock over the whole store. An entry is replaced wholesale on
/// `put`, so readers see either the old entry or the new one, never a mix.
#[derive(Debug, Default)]
pub struct CacheStore {
    partitions: Mutex<Partitions>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Every mutation is a single insert or remove, so a panic while the lock was held cannot have
    // left an entry half written.
    fn partitions(&self) -> MutexGuard<'_, Partitions> {
        self.partitions.lock().unwrap_or_else(|poisoned| {
            warn!("Cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn get(&self, name: &str, rtype: u16) -> Option<Vec<CachedRecord>> {
        self.get_at(name, rtype, SystemTime::now())
    }

    /// Returns the records for the key unless they expired before `now`. An expired entry is
    /// removed on the way out.
    pub fn get_at(&self, name: &str, rtype: u16, now: SystemTime) -> Option<Vec<CachedRecord>> {
        let name = normalize_name(name);
        let mut partitions = self.partitions();
        let partition = partitions.get_mut(&rtype)?;

        let expired = partition.get(&name)?.is_expired(now);
        if expired {
            debug!("Evicting expired entry {} ({})", name, rtype);
            partition.remove(&name);
            if partition.is_empty() {
                partitions.remove(&rtype);
            }
            return None;
        }

        partition.get(&name).map(|entry| entry.records.clone())
    }

    pub fn put(&self, name: &str, rtype: u16, records: Vec<CachedRecord>, ttl: u32) {
        self.put_at(name, rtype, records, ttl, SystemTime::now())
    }

    /// Stores `records` until `now + ttl`. Empty record sets and a zero ttl are not cached.
    pub fn put_at(
        &self,
        name: &str,
        rtype: u16,
        records: Vec<CachedRecord>,
        ttl: u32,
        now: SystemTime,
    ) {
        if records.is_empty() || ttl == 0 {
            debug!("Not caching {} ({}): nothing to keep", name, rtype);
            return;
        }

        let entry = CacheEntry {
            expires_at: now + Duration::from_secs(u64::from(ttl)),
            records,
        };

        self.partitions()
            .entry(rtype)
            .or_default()
            .insert(normalize_name(name), entry);
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(SystemTime::now())
    }

    /// Drops every entry that expired before `now` and returns how many went.
    pub fn sweep_at(&self, now: SystemTime) -> usize {
        let mut partitions = self.partitions();
        let mut removed = 0;

        for partition in partitions.values_mut() {
            let before = partition.len();
            partition.retain(|_, entry| !entry.is_expired(now));
            removed += before - partition.len();
        }
        partitions.retain(|_, partition| !partition.is_empty());

        removed
    }

    pub fn snapshot(&self) -> Snapshot {
        let partitions = self.partitions();
        let mut snapshot = Snapshot::default();

        for (rtype, partition) in partitions.iter() {
            let names = partition
                .iter()
                .map(|(name, entry)| {
                    let entry = SnapshotEntry {
                        expires_at_ms: to_epoch_ms(entry.expires_at),
                        records: entry.records.clone(),
                    };
                    (name.clone(), entry)
                })
                .collect::<BTreeMap<_, _>>();
            snapshot.partitions.insert(*rtype, names);
        }

        snapshot
    }

    /// Installs every entry of `snapshot` still live at `now`, replacing entries with the same
    /// key. Returns how many were installed.
    pub fn restore(&self, snapshot: Snapshot, now: SystemTime) -> usize {
        let mut partitions = self.partitions();
        let mut restored = 0;

        for (rtype, names) in snapshot.partitions {
            for (name, stored) in names {
                let entry = CacheEntry {
                    expires_at: from_epoch_ms(stored.expires_at_ms),
                    records: stored.records,
                };
                if entry.records.is_empty() || entry.is_expired(now) {
                    continue;
                }

                partitions
                    .entry(rtype)
                    .or_default()
                    .insert(normalize_name(&name), entry);
                restored += 1;
            }
        }

        restored
    }

    pub fn len(&self) -> usize {
        self.partitions().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
