//! Embedded ordered-set / hash index store.
//!
//! The store keeps the command surface the rest of the crate needs: add and
//! remove on score-ordered integer sets, rank and score range reads, and
//! string-field hashes. Members double as scores, so a `BTreeSet<i64>` gives
//! the required ordering directly.
//!
//! Durability comes from the write-ahead [`log`]: a mutation is appended to
//! the log first and applied in memory only after the append succeeds, and
//! [`IndexStore::open`] replays the log. Mutations that would not change
//! state are not logged, which keeps replay idempotent and the log compact.

pub mod log;

use crate::config::SyncMode;
use crate::error::Result;
use self::log::{IndexLog, LogEntry};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Ordered-set and hash store backing the device/block/LGV indexes.
#[derive(Debug)]
pub struct IndexStore {
    sets: BTreeMap<String, BTreeSet<i64>>,
    hashes: BTreeMap<String, BTreeMap<String, String>>,
    log: Option<IndexLog>,
}

impl IndexStore {
    /// Opens a durable store whose log lives in `dir`, replaying prior state.
    pub async fn open(dir: &Path, sync_mode: SyncMode) -> Result<Self> {
        let (log, entries) = IndexLog::open(dir, sync_mode).await?;
        let mut store = Self {
            sets: BTreeMap::new(),
            hashes: BTreeMap::new(),
            log: Some(log),
        };
        for entry in entries {
            store.apply(entry);
        }
        Ok(store)
    }

    /// Creates a volatile store with no backing log.
    pub fn in_memory() -> Self {
        Self {
            sets: BTreeMap::new(),
            hashes: BTreeMap::new(),
            log: None,
        }
    }

    fn apply(&mut self, entry: LogEntry) {
        match entry {
            LogEntry::SetAdd { key, member } => {
                self.sets.entry(key).or_default().insert(member);
            }
            LogEntry::SetRemove { key, member } => {
                if let Some(set) = self.sets.get_mut(&key) {
                    set.remove(&member);
                    if set.is_empty() {
                        self.sets.remove(&key);
                    }
                }
            }
            LogEntry::HashSet { key, field, value } => {
                self.hashes.entry(key).or_default().insert(field, value);
            }
        }
    }

    async fn record(&mut self, entry: &LogEntry) -> Result<()> {
        if let Some(log) = self.log.as_mut() {
            log.append(entry).await?;
        }
        Ok(())
    }

    /// Adds a member to an ordered set; returns whether it was new.
    pub async fn set_add(&mut self, key: &str, member: i64) -> Result<bool> {
        if self.set_contains(key, member) {
            return Ok(false);
        }
        let entry = LogEntry::SetAdd {
            key: key.to_string(),
            member,
        };
        self.record(&entry).await?;
        self.apply(entry);
        Ok(true)
    }

    /// Removes a member from an ordered set; returns whether it was present.
    pub async fn set_remove(&mut self, key: &str, member: i64) -> Result<bool> {
        if !self.set_contains(key, member) {
            return Ok(false);
        }
        let entry = LogEntry::SetRemove {
            key: key.to_string(),
            member,
        };
        self.record(&entry).await?;
        self.apply(entry);
        Ok(true)
    }

    /// Returns whether a member is in the set.
    pub fn set_contains(&self, key: &str, member: i64) -> bool {
        self.sets.get(key).is_some_and(|set| set.contains(&member))
    }

    /// Returns the cardinality of a set.
    pub fn set_len(&self, key: &str) -> usize {
        self.sets.get(key).map_or(0, |set| set.len())
    }

    /// Returns all members in ascending score order.
    pub fn set_members(&self, key: &str) -> Vec<i64> {
        self.sets
            .get(key)
            .map_or_else(Vec::new, |set| set.iter().copied().collect())
    }

    /// Returns all members in descending score order.
    pub fn set_members_desc(&self, key: &str) -> Vec<i64> {
        self.sets
            .get(key)
            .map_or_else(Vec::new, |set| set.iter().rev().copied().collect())
    }

    /// Returns members with score strictly greater than `score`, ascending.
    pub fn set_range_above(&self, key: &str, score: i64) -> Vec<i64> {
        use std::ops::Bound;
        self.sets.get(key).map_or_else(Vec::new, |set| {
            set.range((Bound::Excluded(score), Bound::Unbounded))
                .copied()
                .collect()
        })
    }

    /// Returns the `n` lowest-scored members, ascending.
    pub fn set_lowest(&self, key: &str, n: usize) -> Vec<i64> {
        self.sets
            .get(key)
            .map_or_else(Vec::new, |set| set.iter().take(n).copied().collect())
    }

    /// Returns the lowest-scored member.
    pub fn set_first(&self, key: &str) -> Option<i64> {
        self.sets.get(key).and_then(|set| set.iter().next().copied())
    }

    /// Returns the highest-scored member.
    pub fn set_last(&self, key: &str) -> Option<i64> {
        self.sets
            .get(key)
            .and_then(|set| set.iter().next_back().copied())
    }

    /// Sets one hash field. Writing the value a field already holds is a
    /// no-op and is not logged.
    pub async fn hash_set(&mut self, key: &str, field: &str, value: String) -> Result<()> {
        if self
            .hash_get(key, field)
            .is_some_and(|current| current == value)
        {
            return Ok(());
        }
        let entry = LogEntry::HashSet {
            key: key.to_string(),
            field: field.to_string(),
            value,
        };
        self.record(&entry).await?;
        self.apply(entry);
        Ok(())
    }

    /// Sets several hash fields in order.
    pub async fn hash_set_many(&mut self, key: &str, pairs: &[(String, String)]) -> Result<()> {
        for (field, value) in pairs {
            self.hash_set(key, field, value.clone()).await?;
        }
        Ok(())
    }

    /// Reads one hash field.
    pub fn hash_get(&self, key: &str, field: &str) -> Option<&str> {
        self.hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .map(String::as_str)
    }

    /// Reads an entire hash.
    pub fn hash_all(&self, key: &str) -> Option<&BTreeMap<String, String>> {
        self.hashes.get(key)
    }

    /// Returns the byte length of the backing log, 0 for volatile stores.
    pub fn log_len(&self) -> u64 {
        self.log.as_ref().map_or(0, IndexLog::len)
    }

    /// Rewrites the backing log from live state. No-op for volatile stores.
    pub async fn compact(&mut self) -> Result<()> {
        let entries = self.snapshot_entries();
        if let Some(log) = self.log.as_mut() {
            log.rewrite(&entries).await?;
        }
        Ok(())
    }

    fn snapshot_entries(&self) -> Vec<LogEntry> {
        let mut entries = Vec::new();
        for (key, set) in &self.sets {
            for member in set {
                entries.push(LogEntry::SetAdd {
                    key: key.clone(),
                    member: *member,
                });
            }
        }
        for (key, hash) in &self.hashes {
            for (field, value) in hash {
                entries.push(LogEntry::HashSet {
                    key: key.clone(),
                    field: field.clone(),
                    value: value.clone(),
                });
            }
        }
        entries
    }
}
