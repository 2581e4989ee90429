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

//! Live lap ingestion
//!
//! During a session, per-lap values arrive one lap at a time and are
//! folded into the same cached lap documents the batch read path
//! serves. Laps that never arrived are recorded as `Null` so column
//! positions stay aligned with lap numbers.

use tracing::{debug, warn};

use laptrace_core::{DataType, LaptraceError, Result, RunId, Table, Value};

use crate::store::{CacheKey, CacheStore, PutEntry};

/// One live lap for one run: the lap number (1-based) and the value
/// each variable produced on it.
#[derive(Debug, Clone)]
pub struct LiveLap {
    pub run: RunId,
    pub lap_number: u32,
    pub values: Vec<(String, Value)>,
}

/// Folds live laps into cached lap documents.
pub struct LiveLapWriter<'a> {
    store: &'a dyn CacheStore,
}

impl<'a> LiveLapWriter<'a> {
    pub fn new(store: &'a dyn CacheStore) -> Self {
        Self { store }
    }

    /// Records one lap. Returns how many variables were written. A
    /// variable whose document already holds a value for this lap is
    /// left alone; the first recording wins.
    pub fn record(&self, lap: &LiveLap) -> Result<usize> {
        if lap.lap_number == 0 {
            return Err(LaptraceError::Validation(
                "lap numbers start at 1".to_string(),
            ));
        }
        if lap.values.is_empty() {
            return Ok(0);
        }

        let key = CacheKey::new(&lap.run, DataType::Lap);
        let variables: Vec<String> = lap.values.iter().map(|(v, _)| v.clone()).collect();
        let part = self.store.partition(&key, &variables, false)?;
        let cached: std::collections::HashMap<&str, &str> = part
            .cached
            .iter()
            .map(|(v, payload)| (v.as_str(), payload.as_str()))
            .collect();

        let label = format!("Lap{}", lap.lap_number);
        let mut writes = Vec::new();
        for (variable, value) in &lap.values {
            let mut doc = match cached.get(variable.as_str()) {
                Some(payload) => Table::from_json(payload).unwrap_or_else(|err| {
                    warn!(run = %lap.run, variable, %err, "unreadable lap document, starting over");
                    Table::new()
                }),
                None => Table::new(),
            };

            if doc
                .value_at(&label, 0)
                .is_some_and(|current| !current.is_missing())
            {
                warn!(run = %lap.run, variable, lap = lap.lap_number, "lap already recorded");
                continue;
            }

            for earlier in 1..lap.lap_number {
                let name = format!("Lap{earlier}");
                if !doc.has_column(&name) {
                    doc.push_column(name, vec![Value::Null]);
                }
            }
            doc.push_column(label.clone(), vec![value.clone()]);
            writes.push(PutEntry::new(key.clone(), variable, doc.to_json()));
        }

        if !writes.is_empty() {
            self.store.put(&writes)?;
        }
        debug!(
            run = %lap.run,
            lap = lap.lap_number,
            written = writes.len(),
            skipped = lap.values.len() - writes.len(),
            "live lap recorded"
        );
        Ok(writes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn lap(run: &str, number: u32, values: &[(&str, Value)]) -> LiveLap {
        LiveLap {
            run: RunId::new(run),
            lap_number: number,
            values: values
                .iter()
                .map(|(v, x)| (v.to_string(), x.clone()))
                .collect(),
        }
    }

    fn cached_doc(store: &MemoryStore, run: &str, variable: &str) -> Table {
        let key = CacheKey::new(&RunId::new(run), DataType::Lap);
        let part = store
            .partition(&key, &[variable.to_string()], false)
            .unwrap();
        Table::from_json(&part.cached[0].1).unwrap()
    }

    #[test]
    fn test_laps_accumulate_in_order() {
        let store = MemoryStore::new();
        let writer = LiveLapWriter::new(&store);
        writer
            .record(&lap("r1", 1, &[("Speed", Value::Float(301.4))]))
            .unwrap();
        writer
            .record(&lap("r1", 2, &[("Speed", Value::Float(299.8))]))
            .unwrap();

        let doc = cached_doc(&store, "r1", "Speed");
        assert_eq!(
            doc.column_names().collect::<Vec<_>>(),
            vec!["Lap1", "Lap2"]
        );
        assert_eq!(doc.value_at("Lap2", 0), Some(&Value::Float(299.8)));
    }

    #[test]
    fn test_skipped_laps_fill_with_null() {
        let store = MemoryStore::new();
        let writer = LiveLapWriter::new(&store);
        writer
            .record(&lap("r1", 3, &[("Gear", Value::Int(6))]))
            .unwrap();

        let doc = cached_doc(&store, "r1", "Gear");
        assert_eq!(
            doc.column_names().collect::<Vec<_>>(),
            vec!["Lap1", "Lap2", "Lap3"]
        );
        assert_eq!(doc.value_at("Lap1", 0), Some(&Value::Null));
        assert_eq!(doc.value_at("Lap3", 0), Some(&Value::Int(6)));
    }

    #[test]
    fn test_first_recording_wins() {
        let store = MemoryStore::new();
        let writer = LiveLapWriter::new(&store);
        let written = writer
            .record(&lap("r1", 1, &[("Speed", Value::Float(300.0))]))
            .unwrap();
        assert_eq!(written, 1);

        let written = writer
            .record(&lap("r1", 1, &[("Speed", Value::Float(150.0))]))
            .unwrap();
        assert_eq!(written, 0);
        let doc = cached_doc(&store, "r1", "Speed");
        assert_eq!(doc.value_at("Lap1", 0), Some(&Value::Float(300.0)));
    }

    #[test]
    fn test_null_placeholder_is_overwritten() {
        let store = MemoryStore::new();
        let writer = LiveLapWriter::new(&store);
        writer
            .record(&lap("r1", 2, &[("Speed", Value::Float(299.0))]))
            .unwrap();
        let written = writer
            .record(&lap("r1", 1, &[("Speed", Value::Float(301.0))]))
            .unwrap();
        assert_eq!(written, 1, "a gap-filled lap accepts its late value");

        let doc = cached_doc(&store, "r1", "Speed");
        assert_eq!(doc.value_at("Lap1", 0), Some(&Value::Float(301.0)));
        assert_eq!(doc.value_at("Lap2", 0), Some(&Value::Float(299.0)));
    }

    #[test]
    fn test_lap_zero_rejected() {
        let store = MemoryStore::new();
        let writer = LiveLapWriter::new(&store);
        let err = writer
            .record(&lap("r1", 0, &[("Speed", Value::Float(1.0))]))
            .unwrap_err();
        assert!(matches!(err, LaptraceError::Validation(_)));
    }
}
