// Copyright 2025 Laptrace (https://github.com/laptrace)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! In-process cache store
//!
//! Same record semantics as the remote store, held in a `moka` cache
//! whose per-entry expiry mirrors the sliding TTL: creates and updates
//! arm the write window, reads renew the read window. Reading any
//! field counts as reading the record.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use moka::sync::Cache;
use moka::Expiry;

use laptrace_core::Result;

use crate::store::{
    now_epoch_secs, timestamp_field, CacheKey, CachePartition, CacheStore, PutEntry, TtlPolicy,
};

/// Records held at most.
const DEFAULT_CAPACITY: u64 = 10_000;

type Record = HashMap<String, String>;

struct SlidingExpiry {
    ttl: TtlPolicy,
}

impl Expiry<String, Record> for SlidingExpiry {
    fn expire_after_create(&self, _: &String, _: &Record, _: Instant) -> Option<Duration> {
        Some(self.ttl.write_ttl)
    }

    fn expire_after_read(
        &self,
        _: &String,
        _: &Record,
        _: Instant,
        _: Option<Duration>,
        _: Instant,
    ) -> Option<Duration> {
        Some(self.ttl.read_ttl)
    }

    fn expire_after_update(
        &self,
        _: &String,
        _: &Record,
        _: Instant,
        _: Option<Duration>,
    ) -> Option<Duration> {
        Some(self.ttl.write_ttl)
    }
}

/// Hit/miss counters, counted per variable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct MemoryStore {
    records: Cache<String, Record>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_ttl_policy(TtlPolicy::default())
    }

    pub fn with_ttl_policy(ttl: TtlPolicy) -> Self {
        Self {
            records: Cache::builder()
                .max_capacity(DEFAULT_CAPACITY)
                .expire_after(SlidingExpiry { ttl })
                .build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for MemoryStore {
    fn partition(
        &self,
        key: &CacheKey,
        variables: &[String],
        refresh: bool,
    ) -> Result<CachePartition> {
        let mut part = CachePartition::default();
        if variables.is_empty() {
            return Ok(part);
        }

        // peek first: an absent record must not arm any timer
        let record = if refresh || !self.records.contains_key(key.as_str()) {
            None
        } else {
            self.records.get(key.as_str())
        };

        match record {
            None => {
                self.misses
                    .fetch_add(variables.len() as u64, Ordering::Relaxed);
                part.missing = variables.to_vec();
            }
            Some(record) => {
                for var in variables {
                    match record.get(var) {
                        Some(payload) => part.cached.push((var.clone(), payload.clone())),
                        None => part.missing.push(var.clone()),
                    }
                }
                self.hits
                    .fetch_add(part.cached.len() as u64, Ordering::Relaxed);
                self.misses
                    .fetch_add(part.missing.len() as u64, Ordering::Relaxed);
            }
        }
        Ok(part)
    }

    fn put(&self, entries: &[PutEntry]) -> Result<()> {
        let now = now_epoch_secs().to_string();
        let mut grouped: HashMap<&CacheKey, Vec<&PutEntry>> = HashMap::new();
        for entry in entries {
            grouped.entry(&entry.key).or_default().push(entry);
        }
        for (key, group) in grouped {
            let mut record = self.records.get(key.as_str()).unwrap_or_default();
            for entry in group {
                record.insert(entry.variable.clone(), entry.payload.clone());
                record.insert(timestamp_field(&entry.variable), now.clone());
            }
            self.records.insert(key.as_str().to_string(), record);
        }
        Ok(())
    }

    fn timestamps(&self, key: &CacheKey, variables: &[String]) -> Result<Vec<Option<u64>>> {
        let record = self.records.get(key.as_str()).unwrap_or_default();
        Ok(variables
            .iter()
            .map(|var| {
                record
                    .get(&timestamp_field(var))
                    .and_then(|raw| raw.trim().parse().ok())
            })
            .collect())
    }

    fn has_fields(&self, key: &CacheKey, variables: &[String]) -> Result<Vec<bool>> {
        let record = self.records.get(key.as_str()).unwrap_or_default();
        Ok(variables.iter().map(|var| record.contains_key(var)).collect())
    }

    fn delete(&self, keys: &[CacheKey]) -> Result<u64> {
        let mut dropped = 0;
        for key in keys {
            if self.records.contains_key(key.as_str()) {
                dropped += 1;
            }
            self.records.invalidate(key.as_str());
        }
        Ok(dropped)
    }

    fn delete_matching(&self, pattern: &str) -> Result<u64> {
        let victims: Vec<_> = self
            .records
            .iter()
            .filter(|(key, _)| key_matches(pattern, key))
            .map(|(key, _)| key)
            .collect();
        for key in &victims {
            self.records.invalidate(key.as_str());
        }
        Ok(victims.len() as u64)
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// `*`-wildcard match, anchored at both ends.
fn key_matches(pattern: &str, key: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == key;
    }
    let segments: Vec<&str> = pattern.split('*').collect();
    let head = segments[0];
    let tail = segments[segments.len() - 1];
    if !key.starts_with(head) {
        return false;
    }
    let mut pos = head.len();
    for seg in &segments[1..segments.len() - 1] {
        if seg.is_empty() {
            continue;
        }
        match key[pos..].find(seg) {
            Some(at) => pos = pos + at + seg.len(),
            None => return false,
        }
    }
    if tail.is_empty() {
        return true;
    }
    key.len() >= pos + tail.len() && key.ends_with(tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use laptrace_core::{DataType, RunId};

    fn key(run: &str) -> CacheKey {
        CacheKey::new(&RunId::new(run), DataType::Lap)
    }

    fn vars(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_partition_on_absent_record_reports_all_missing() {
        let store = MemoryStore::new();
        let part = store.partition(&key("r1"), &vars(&["a", "b"]), false).unwrap();
        assert!(part.cached.is_empty());
        assert_eq!(part.missing, vars(&["a", "b"]));
        assert_eq!(store.stats().misses, 2);
    }

    #[test]
    fn test_partition_splits_and_preserves_order() {
        let store = MemoryStore::new();
        store
            .put(&[
                PutEntry::new(key("r1"), "b", "{}"),
                PutEntry::new(key("r1"), "d", "{}"),
            ])
            .unwrap();

        let part = store
            .partition(&key("r1"), &vars(&["a", "b", "c", "d"]), false)
            .unwrap();
        let cached: Vec<&str> = part.cached.iter().map(|(v, _)| v.as_str()).collect();
        assert_eq!(cached, vec!["b", "d"]);
        assert_eq!(part.missing, vars(&["a", "c"]));
        assert_eq!(part.cached.len() + part.missing.len(), 4);
        assert_eq!(store.stats(), MemoryStoreStats { hits: 2, misses: 2 });
    }

    #[test]
    fn test_refresh_forces_missing() {
        let store = MemoryStore::new();
        store.put(&[PutEntry::new(key("r1"), "a", "{}")]).unwrap();
        let part = store.partition(&key("r1"), &vars(&["a"]), true).unwrap();
        assert!(part.cached.is_empty());
        assert_eq!(part.missing, vars(&["a"]));
    }

    #[test]
    fn test_put_writes_timestamp_siblings() {
        let store = MemoryStore::new();
        let before = now_epoch_secs();
        store.put(&[PutEntry::new(key("r1"), "a", "{\"Run\":{\"0\":1}}")]).unwrap();
        let stamps = store.timestamps(&key("r1"), &vars(&["a", "b"])).unwrap();
        assert!(stamps[0].unwrap() >= before);
        assert_eq!(stamps[1], None);

        let flags = store.has_fields(&key("r1"), &vars(&["a", "b"])).unwrap();
        assert_eq!(flags, vec![true, false]);
    }

    #[test]
    fn test_delete_counts_existing_records() {
        let store = MemoryStore::new();
        store.put(&[PutEntry::new(key("r1"), "a", "{}")]).unwrap();
        let dropped = store.delete(&[key("r1"), key("r2")]).unwrap();
        assert_eq!(dropped, 1);
        assert!(!store.records.contains_key(key("r1").as_str()));
    }

    #[test]
    fn test_delete_matching_uses_wildcards() {
        let store = MemoryStore::new();
        store
            .put(&[
                PutEntry::new(key("r1"), "a", "{}"),
                PutEntry::new(key("r2"), "a", "{}"),
                PutEntry::new(CacheKey::new(&RunId::new("r1"), DataType::RunScalar), "a", "{}"),
            ])
            .unwrap();
        let dropped = store.delete_matching("*R1*").unwrap();
        assert_eq!(dropped, 2);
        assert!(store.records.contains_key(key("r2").as_str()));
    }

    #[test]
    fn test_sliding_expiry_windows() {
        let ttl = TtlPolicy::default();
        let expiry = SlidingExpiry { ttl };
        let record = Record::new();
        let now = Instant::now();
        assert_eq!(
            expiry.expire_after_create(&String::new(), &record, now),
            Some(ttl.write_ttl)
        );
        assert_eq!(
            expiry.expire_after_read(&String::new(), &record, now, None, now),
            Some(ttl.read_ttl)
        );
        assert_eq!(
            expiry.expire_after_update(&String::new(), &record, now, None),
            Some(ttl.write_ttl)
        );
    }

    #[test]
    fn test_key_matches() {
        assert!(key_matches("*R1*", "R1+lap"));
        assert!(key_matches("*+lap", "R1+lap"));
        assert!(key_matches("R1*", "R1+lap"));
        assert!(key_matches("R1+lap", "R1+lap"));
        assert!(key_matches("*1+l*p", "R1+lap"));
        assert!(!key_matches("*R2*", "R1+lap"));
        assert!(!key_matches("R1", "R1+lap"));
        assert!(!key_matches("*+run_scalar", "R1+lap"));
    }
}
