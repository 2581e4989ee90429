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

//! Cache-through orchestration
//!
//! [`CacheThrough`] wraps a fetch routine: partition each run's
//! variables into cached and missing, delegate a reduced request for
//! the missing half, write the computed payloads back (empty payloads
//! included, so absent files are not re-probed), and return the merged
//! union. Staleness verification against backing files is opt-in and
//! only ever demotes variables that were reported cached.

use std::collections::HashMap;

use tracing::debug;

use laptrace_core::{DataType, Result, RunEntry, RunId, RunSet};

use crate::store::{CacheKey, CachePartition, CacheStore, PutEntry};

/// Serialized payloads per run, keyed by variable.
pub type RunPayloads = HashMap<RunId, HashMap<String, String>>;

/// Answers whether a backing file changed after a payload was cached.
pub trait FreshnessCheck: Send + Sync {
    fn modified_since(&self, run: &RunId, year: i32, variable: &str, cached_at: u64) -> bool;
}

/// Explicit cache-through wrapper around a fetch routine.
pub struct CacheThrough<'a> {
    store: &'a dyn CacheStore,
    freshness: Option<&'a dyn FreshnessCheck>,
}

impl<'a> CacheThrough<'a> {
    pub fn new(store: &'a dyn CacheStore) -> Self {
        Self {
            store,
            freshness: None,
        }
    }

    /// Enables staleness verification for this wrapper.
    pub fn with_staleness(mut self, check: &'a dyn FreshnessCheck) -> Self {
        self.freshness = Some(check);
        self
    }

    /// Serves `request` from the cache, delegating only what is
    /// missing. The result holds every requested run, with the union
    /// of its cached and computed payloads.
    pub fn fetch<F>(
        &self,
        data_type: DataType,
        request: &RunSet,
        refresh: bool,
        fetch: F,
    ) -> Result<RunPayloads>
    where
        F: FnOnce(&RunSet) -> Result<RunPayloads>,
    {
        let mut result = RunPayloads::new();
        if request.is_empty() {
            return Ok(result);
        }

        let mut partitions: Vec<(&RunEntry, CachePartition)> =
            Vec::with_capacity(request.len());
        for entry in request.entries() {
            let cache_key = CacheKey::new(&entry.run, data_type);
            let mut part = self.store.partition(&cache_key, &entry.variables, refresh)?;
            if let Some(check) = self.freshness {
                self.demote_stale(check, entry, &cache_key, &mut part)?;
            }
            debug!(
                run = %entry.run,
                cached = part.cached.len(),
                missing = part.missing.len(),
                "cache partition"
            );
            partitions.push((entry, part));
        }

        let reduced = RunSet::from_entries(
            partitions
                .iter()
                .filter(|(_, part)| !part.missing.is_empty())
                .map(|(entry, part)| RunEntry {
                    run: entry.run.clone(),
                    year: entry.year,
                    variables: part.missing.clone(),
                })
                .collect(),
        );

        let computed = if reduced.is_empty() {
            RunPayloads::new()
        } else {
            debug!(
                runs = reduced.len(),
                pairs = reduced.num_pairs(),
                "delegating reduced request"
            );
            fetch(&reduced)?
        };

        let mut writes = Vec::new();
        for (run, payloads) in &computed {
            let cache_key = CacheKey::new(run, data_type);
            for (variable, payload) in payloads {
                writes.push(PutEntry::new(cache_key.clone(), variable, payload));
            }
        }
        if !writes.is_empty() {
            self.store.put(&writes)?;
        }

        for (entry, part) in partitions {
            let merged = result.entry(entry.run.clone()).or_default();
            for (variable, payload) in part.cached {
                merged.insert(variable, payload);
            }
        }
        for (run, payloads) in computed {
            result.entry(run).or_default().extend(payloads);
        }
        Ok(result)
    }

    /// Moves cached variables whose backing file is newer than their
    /// cached write timestamp over to the missing half. A hit without
    /// a readable timestamp counts as stale.
    fn demote_stale(
        &self,
        check: &dyn FreshnessCheck,
        entry: &RunEntry,
        cache_key: &CacheKey,
        part: &mut CachePartition,
    ) -> Result<()> {
        if part.cached.is_empty() {
            return Ok(());
        }
        let cached_vars: Vec<String> = part.cached.iter().map(|(v, _)| v.clone()).collect();
        let stamps = self.store.timestamps(cache_key, &cached_vars)?;

        let mut kept = Vec::with_capacity(part.cached.len());
        for ((variable, payload), cached_at) in part.cached.drain(..).zip(stamps) {
            if check.modified_since(&entry.run, entry.year, &variable, cached_at.unwrap_or(0)) {
                debug!(run = %entry.run, variable, "cached payload is stale");
                part.missing.push(variable);
            } else {
                kept.push((variable, payload));
            }
        }
        part.cached = kept;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(runs: &[(&str, i32)], variables: &[&str]) -> RunSet {
        RunSet::new(
            &runs.iter().map(|(r, _)| RunId::new(r)).collect::<Vec<_>>(),
            &runs.iter().map(|(_, y)| *y).collect::<Vec<_>>(),
            &variables.iter().map(|v| v.to_string()).collect::<Vec<_>>(),
        )
        .unwrap()
    }

    fn constant_fetch(payload: &'static str) -> impl Fn(&RunSet) -> Result<RunPayloads> {
        move |reduced: &RunSet| {
            let mut out = RunPayloads::new();
            for entry in reduced.entries() {
                let vars = entry
                    .variables
                    .iter()
                    .map(|v| (v.clone(), payload.to_string()))
                    .collect();
                out.insert(entry.run.clone(), vars);
            }
            Ok(out)
        }
    }

    #[test]
    fn test_empty_request_never_delegates() {
        let store = MemoryStore::new();
        let through = CacheThrough::new(&store);
        let calls = AtomicUsize::new(0);
        let result = through
            .fetch(DataType::Lap, &request(&[("r1", 2024)], &[]), false, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(RunPayloads::new())
            })
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_second_fetch_served_from_cache() {
        let store = MemoryStore::new();
        let through = CacheThrough::new(&store);
        let req = request(&[("r1", 2024), ("r2", 2024)], &["Speed", "Gear"]);

        let first = through
            .fetch(DataType::Lap, &req, false, constant_fetch("{\"Lap1\":{\"0\":1.0}}"))
            .unwrap();
        assert_eq!(first.len(), 2);

        let calls = AtomicUsize::new(0);
        let second = through
            .fetch(DataType::Lap, &req, false, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(RunPayloads::new())
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0, "everything was cached");
        assert_eq!(second, first);
    }

    #[test]
    fn test_reduced_request_holds_exactly_the_missing_pairs() {
        let store = MemoryStore::new();
        let through = CacheThrough::new(&store);

        // pre-populate one pair out of four
        through
            .fetch(
                DataType::Lap,
                &request(&[("r1", 2024)], &["Speed"]),
                false,
                constant_fetch("{}"),
            )
            .unwrap();

        let seen: parking_lot::Mutex<Vec<(String, i32, Vec<String>)>> =
            parking_lot::Mutex::new(Vec::new());
        through
            .fetch(
                DataType::Lap,
                &request(&[("r1", 2024), ("r2", 2025)], &["Speed", "Gear"]),
                false,
                |reduced| {
                    for entry in reduced.entries() {
                        seen.lock().push((
                            entry.run.as_str().to_string(),
                            entry.year,
                            entry.variables.clone(),
                        ));
                    }
                    constant_fetch("{}")(reduced)
                },
            )
            .unwrap();

        let seen = seen.into_inner();
        assert_eq!(
            seen,
            vec![
                ("R1".to_string(), 2024, vec!["Gear".to_string()]),
                ("R2".to_string(), 2025, vec!["Speed".to_string(), "Gear".to_string()]),
            ]
        );
    }

    #[test]
    fn test_staleness_demotes_only_cached_variables() {
        struct AlwaysStale;
        impl FreshnessCheck for AlwaysStale {
            fn modified_since(&self, _: &RunId, _: i32, _: &str, _: u64) -> bool {
                true
            }
        }

        let store = MemoryStore::new();
        let req = request(&[("r1", 2024)], &["Speed"]);
        CacheThrough::new(&store)
            .fetch(DataType::Lap, &req, false, constant_fetch("{\"Lap1\":{\"0\":1.0}}"))
            .unwrap();

        let calls = AtomicUsize::new(0);
        let check = AlwaysStale;
        CacheThrough::new(&store)
            .with_staleness(&check)
            .fetch(DataType::Lap, &req, false, |reduced| {
                calls.fetch_add(1, Ordering::SeqCst);
                assert_eq!(reduced.entries()[0].variables, vec!["Speed".to_string()]);
                constant_fetch("{\"Lap1\":{\"0\":2.0}}")(reduced)
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1, "stale variable recomputed");
    }

    #[test]
    fn test_refresh_bypasses_cache_but_rewrites_it() {
        let store = MemoryStore::new();
        let through = CacheThrough::new(&store);
        let req = request(&[("r1", 2024)], &["Speed"]);

        through
            .fetch(DataType::Lap, &req, false, constant_fetch("{\"Lap1\":{\"0\":1.0}}"))
            .unwrap();
        let refreshed = through
            .fetch(DataType::Lap, &req, true, constant_fetch("{\"Lap1\":{\"0\":9.0}}"))
            .unwrap();
        assert_eq!(
            refreshed[&RunId::new("r1")]["Speed"],
            "{\"Lap1\":{\"0\":9.0}}"
        );

        // the rewrite is what later reads see
        let calls = AtomicUsize::new(0);
        let after = through
            .fetch(DataType::Lap, &req, false, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(RunPayloads::new())
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(after, refreshed);
    }

    #[test]
    fn test_empty_payloads_are_cached_too() {
        let store = MemoryStore::new();
        let through = CacheThrough::new(&store);
        let req = request(&[("r1", 2024)], &["Ghost"]);

        through
            .fetch(DataType::Lap, &req, false, constant_fetch("{}"))
            .unwrap();

        let calls = AtomicUsize::new(0);
        let result = through
            .fetch(DataType::Lap, &req, false, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(RunPayloads::new())
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0, "absence is served from cache");
        assert_eq!(result[&RunId::new("r1")]["Ghost"], "{}");
    }
}
