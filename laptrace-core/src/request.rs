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

//! Request types
//!
//! [`RunSet`] is the validated run collection every read path works
//! from: runs in caller order, years aligned, duplicates dropped.
//! [`RunFilter`] is the explicit record handed to the metadata
//! collaborator to resolve run identifiers.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{LaptraceError, Result};
use crate::types::{Aggregation, DataType, Program, RunId};

/// One run of a request: identifier, recording year (the storage path
/// segment), and the variables still wanted for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunEntry {
    pub run: RunId,
    pub year: i32,
    pub variables: Vec<String>,
}

/// Ordered, de-duplicated run collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSet {
    entries: Vec<RunEntry>,
}

impl RunSet {
    /// Builds the set from the caller's parallel run/year lists. The
    /// lists must have equal lengths. A run identifier appearing more
    /// than once keeps its first occurrence's year; later occurrences
    /// are dropped. Every kept run starts with the full variable list.
    pub fn new(run_ids: &[RunId], years: &[i32], variables: &[String]) -> Result<Self> {
        if run_ids.len() != years.len() {
            return Err(LaptraceError::Validation(format!(
                "run identifiers and years differ in length: {} vs {}",
                run_ids.len(),
                years.len()
            )));
        }

        let mut seen: HashSet<&RunId> = HashSet::new();
        let mut entries = Vec::with_capacity(run_ids.len());
        for (run, year) in run_ids.iter().zip(years) {
            if seen.insert(run) {
                entries.push(RunEntry {
                    run: run.clone(),
                    year: *year,
                    variables: variables.to_vec(),
                });
            }
        }
        Ok(Self { entries })
    }

    /// Wraps already-reduced entries, e.g. the missing half of a cache
    /// partition.
    pub fn from_entries(entries: Vec<RunEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[RunEntry] {
        &self.entries
    }

    pub fn runs(&self) -> impl Iterator<Item = &RunId> {
        self.entries.iter().map(|e| &e.run)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Nothing to fetch: no runs, or no variables on any run.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.variables.is_empty())
    }

    /// Total (run, variable) pairs.
    pub fn num_pairs(&self) -> usize {
        self.entries.iter().map(|e| e.variables.len()).sum()
    }
}

/// A complete read request as the caller hands it over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRequest {
    pub program: Program,
    pub data_type: DataType,
    pub run_ids: Vec<RunId>,
    pub years: Vec<i32>,
    pub variables: Vec<String>,
    /// Empty means no aggregation was requested.
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
    /// Bypass cached payloads and recompute everything.
    #[serde(default)]
    pub refresh: bool,
}

impl DataRequest {
    pub fn run_set(&self) -> Result<RunSet> {
        RunSet::new(&self.run_ids, &self.years, &self.variables)
    }
}

/// Explicit run filter for the metadata collaborator. Every field is a
/// list of accepted values or absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunFilter {
    pub cars: Option<Vec<String>>,
    pub chassis: Option<Vec<String>>,
    pub engine_types: Option<Vec<String>>,
    pub tracks: Option<Vec<String>>,
    pub drivers: Option<Vec<String>>,
    pub events: Option<Vec<String>>,
    pub sessions: Option<Vec<String>>,
    pub session_names: Option<Vec<String>>,
    pub run_types: Option<Vec<String>>,
    pub run_tags: Option<Vec<String>>,
    pub run_numbers: Option<Vec<i64>>,
    pub run_ids: Option<Vec<RunId>>,
}

impl RunFilter {
    /// Single validated conversion from a loosely-typed map. Scalars
    /// are promoted to one-element lists, empty lists collapse to
    /// absent, unknown keys and ill-typed values are rejected, run
    /// identifiers must be well-formed.
    pub fn from_map(map: &serde_json::Map<String, serde_json::Value>) -> Result<RunFilter> {
        let mut filter = RunFilter::default();
        for (key, value) in map {
            match key.as_str() {
                "cars" => filter.cars = string_list(key, value)?,
                "chassis" => filter.chassis = string_list(key, value)?,
                "engine_types" => filter.engine_types = string_list(key, value)?,
                "tracks" => filter.tracks = string_list(key, value)?,
                "drivers" => filter.drivers = string_list(key, value)?,
                "events" => filter.events = string_list(key, value)?,
                "sessions" => filter.sessions = string_list(key, value)?,
                "session_names" => filter.session_names = string_list(key, value)?,
                "run_types" => filter.run_types = string_list(key, value)?,
                "run_tags" => filter.run_tags = string_list(key, value)?,
                "run_numbers" => filter.run_numbers = integer_list(key, value)?,
                "run_ids" => filter.run_ids = run_id_list(key, value)?,
                other => {
                    return Err(LaptraceError::Validation(format!(
                        "unknown filter field '{other}'"
                    )))
                }
            }
        }
        Ok(filter)
    }

    pub fn is_empty(&self) -> bool {
        self.cars.is_none()
            && self.chassis.is_none()
            && self.engine_types.is_none()
            && self.tracks.is_none()
            && self.drivers.is_none()
            && self.events.is_none()
            && self.sessions.is_none()
            && self.session_names.is_none()
            && self.run_types.is_none()
            && self.run_tags.is_none()
            && self.run_numbers.is_none()
            && self.run_ids.is_none()
    }
}

/// Scalar or list of scalars, as a list. `None` for null and empty
/// lists.
fn scalars(key: &str, value: &serde_json::Value) -> Result<Option<Vec<serde_json::Value>>> {
    let items = match value {
        serde_json::Value::Null => return Ok(None),
        serde_json::Value::Array(items) => items.clone(),
        scalar => vec![scalar.clone()],
    };
    if items.is_empty() {
        return Ok(None);
    }
    if items.iter().any(|v| v.is_array() || v.is_object()) {
        return Err(LaptraceError::Validation(format!(
            "filter field '{key}' holds nested values"
        )));
    }
    Ok(Some(items))
}

fn string_list(key: &str, value: &serde_json::Value) -> Result<Option<Vec<String>>> {
    let Some(items) = scalars(key, value)? else {
        return Ok(None);
    };
    items
        .iter()
        .map(|v| match v {
            serde_json::Value::String(s) => Ok(s.clone()),
            serde_json::Value::Number(n) => Ok(n.to_string()),
            other => Err(LaptraceError::Validation(format!(
                "filter field '{key}' holds non-string value {other}"
            ))),
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn integer_list(key: &str, value: &serde_json::Value) -> Result<Option<Vec<i64>>> {
    let Some(items) = scalars(key, value)? else {
        return Ok(None);
    };
    items
        .iter()
        .map(|v| {
            v.as_i64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
                .ok_or_else(|| {
                    LaptraceError::Validation(format!(
                        "filter field '{key}' holds non-integer value {v}"
                    ))
                })
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn run_id_list(key: &str, value: &serde_json::Value) -> Result<Option<Vec<RunId>>> {
    let Some(items) = scalars(key, value)? else {
        return Ok(None);
    };
    items
        .iter()
        .map(|v| {
            let raw = v.as_str().ok_or_else(|| {
                LaptraceError::Validation(format!("filter field '{key}' holds non-string value"))
            })?;
            let run = RunId::new(raw);
            if !run.is_well_formed() {
                return Err(LaptraceError::Validation(format!(
                    "filter field '{key}' holds malformed run identifier '{raw}'"
                )));
            }
            Ok(run)
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}
