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

//! Parallel file retrieval
//!
//! One job per (run, variable) pair, fanned out over a small pool of
//! OS threads. A missing file yields an empty table; unreadable or
//! malformed files are logged and yield an empty table. Every requested
//! pair is present in the output.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::time::Instant;

use tracing::{info, warn};

use laptrace_cache::RunPayloads;
use laptrace_core::{DataType, Result, RunId, RunSet, Table};

use crate::paths::StorePaths;

/// Worker pool cap for one batch.
const MAX_WORKERS: usize = 6;

/// Batches at or above this many files are flagged.
const BIG_BATCH: usize = 500;

/// Decoded tables per run, keyed by variable.
pub type RunTables = HashMap<RunId, HashMap<String, Table>>;

/// Reads column-document files for whole requests.
#[derive(Debug, Clone)]
pub struct FileRetriever {
    paths: StorePaths,
}

impl FileRetriever {
    pub fn new(paths: StorePaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Reads every requested (run, variable) pair as a decoded table.
    pub fn read_tables(&self, data_type: DataType, request: &RunSet) -> Result<RunTables> {
        let mut out: RunTables = request
            .entries()
            .iter()
            .map(|e| (e.run.clone(), HashMap::new()))
            .collect();
        for (run, variable, table) in self.read_batch(data_type, request) {
            out.entry(run).or_default().insert(variable, table);
        }
        Ok(out)
    }

    /// Reads every requested pair as a column-document string, the form
    /// the cache stores. Absent files serialize to `{}`.
    pub fn read_serialized(&self, data_type: DataType, request: &RunSet) -> Result<RunPayloads> {
        let mut out: RunPayloads = request
            .entries()
            .iter()
            .map(|e| (e.run.clone(), HashMap::new()))
            .collect();
        for (run, variable, table) in self.read_batch(data_type, request) {
            out.entry(run).or_default().insert(variable, table.to_json());
        }
        Ok(out)
    }

    fn read_batch(&self, data_type: DataType, request: &RunSet) -> Vec<(RunId, String, Table)> {
        let jobs: Vec<(RunId, String, std::path::PathBuf)> = request
            .entries()
            .iter()
            .flat_map(|entry| {
                entry.variables.iter().map(|variable| {
                    (
                        entry.run.clone(),
                        variable.clone(),
                        self.paths
                            .variable_file(entry.year, &entry.run, data_type, variable),
                    )
                })
            })
            .collect();
        if jobs.is_empty() {
            return Vec::new();
        }
        if jobs.len() >= BIG_BATCH {
            warn!(files = jobs.len(), "large file batch");
        }

        let started = Instant::now();
        let workers = jobs.len().min(MAX_WORKERS);
        let chunk_size = jobs.len().div_ceil(workers);
        let mut results = Vec::with_capacity(jobs.len());
        std::thread::scope(|scope| {
            let handles: Vec<_> = jobs
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|(run, variable, path)| {
                                (run.clone(), variable.clone(), read_one(path))
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(part) => results.extend(part),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
        });
        info!(
            files = jobs.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "file batch read"
        );
        results
    }
}

fn read_one(path: &Path) -> Table {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Table::new(),
        Err(err) => {
            warn!(path = %path.display(), %err, "unreadable data file");
            return Table::new();
        }
    };
    Table::from_json(&raw).unwrap_or_else(|err| {
        warn!(path = %path.display(), %err, "malformed data file");
        Table::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use laptrace_core::Value;
    use std::fs;

    fn fixture(
        dir: &Path,
        year: i32,
        run: &str,
        data_type: DataType,
        variable: &str,
        payload: &str,
    ) {
        let paths = StorePaths::new(dir, "computed_data");
        let file = paths.variable_file(year, &RunId::new(run), data_type, variable);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, payload).unwrap();
    }

    fn request(runs: &[(&str, i32)], variables: &[&str]) -> RunSet {
        RunSet::new(
            &runs.iter().map(|(r, _)| RunId::new(r)).collect::<Vec<_>>(),
            &runs.iter().map(|(_, y)| *y).collect::<Vec<_>>(),
            &variables.iter().map(|v| v.to_string()).collect::<Vec<_>>(),
        )
        .unwrap()
    }

    #[test]
    fn test_reads_present_files_and_fills_absent_pairs() {
        let dir = tempfile::tempdir().unwrap();
        fixture(
            dir.path(),
            2024,
            "r1",
            DataType::Lap,
            "Speed",
            r#"{"Lap1":{"0":301.5},"Lap2":{"0":299.0}}"#,
        );

        let retriever = FileRetriever::new(StorePaths::new(dir.path(), "computed_data"));
        let tables = retriever
            .read_tables(DataType::Lap, &request(&[("r1", 2024), ("r2", 2024)], &["Speed"]))
            .unwrap();

        let r1 = &tables[&RunId::new("r1")]["Speed"];
        assert_eq!(r1.value_at("Lap1", 0), Some(&Value::Float(301.5)));
        assert!(tables[&RunId::new("r2")]["Speed"].is_empty());
    }

    #[test]
    fn test_malformed_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path(), 2024, "r1", DataType::Lap, "Speed", "not json at all");

        let retriever = FileRetriever::new(StorePaths::new(dir.path(), "computed_data"));
        let tables = retriever
            .read_tables(DataType::Lap, &request(&[("r1", 2024)], &["Speed"]))
            .unwrap();
        assert!(tables[&RunId::new("r1")]["Speed"].is_empty());
    }

    #[test]
    fn test_serialized_absent_pair_is_the_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let retriever = FileRetriever::new(StorePaths::new(dir.path(), "computed_data"));
        let payloads = retriever
            .read_serialized(DataType::Lap, &request(&[("r1", 2024)], &["Ghost"]))
            .unwrap();
        assert_eq!(payloads[&RunId::new("r1")]["Ghost"], "{}");
    }

    #[test]
    fn test_large_batches_fan_out() {
        let dir = tempfile::tempdir().unwrap();
        let variables: Vec<String> = (0..40).map(|i| format!("Var{i}")).collect();
        for variable in &variables {
            fixture(
                dir.path(),
                2024,
                "r1",
                DataType::RunScalar,
                variable,
                r#"{"Run":{"0":1.0}}"#,
            );
        }

        let retriever = FileRetriever::new(StorePaths::new(dir.path(), "computed_data"));
        let set = RunSet::new(&[RunId::new("r1")], &[2024], &variables).unwrap();
        let tables = retriever.read_tables(DataType::RunScalar, &set).unwrap();
        assert_eq!(tables[&RunId::new("r1")].len(), 40);
        assert!(tables[&RunId::new("r1")]
            .values()
            .all(|t| t.value_at("Run", 0) == Some(&Value::Float(1.0))));
    }
}
