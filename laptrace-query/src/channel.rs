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

//! Raw channels: high-frequency time/value traces
//!
//! Channels are read straight off disk every time: the traces are too
//! large to cache and a request rarely repeats. Per variable, each
//! run's `Time` (integer milliseconds, normalized to seconds) and
//! `Value` samples concatenate with the run identifier repeated. Never
//! aggregated.

use std::collections::BTreeMap;

use laptrace_core::{DataType, Result, RunId, RunSet, Table, Value};

use crate::codec::{encode_run_index, RUN_UID};
use crate::fetch::PayloadSource;
use crate::process::repeated;

pub fn process(
    source: &PayloadSource<'_>,
    request: &RunSet,
    variables: &[String],
    request_runs: &[RunId],
) -> Result<BTreeMap<String, Table>> {
    let tables = source.read_native(DataType::Channel, request)?;

    let mut result = BTreeMap::new();
    for variable in variables {
        let mut parts = Vec::new();
        for entry in request.entries() {
            let Some(trace) = tables.get(&entry.run).and_then(|vars| vars.get(variable)) else {
                continue;
            };
            if trace.is_empty() {
                continue;
            }
            let mut part = trace.clone();
            if let Some(times) = part.values("Time") {
                let seconds = times
                    .iter()
                    .map(|cell| match cell.as_f64() {
                        Some(millis) => Value::Float(millis / 1e3),
                        None => Value::Null,
                    })
                    .collect();
                part.push_column("Time", seconds);
            }
            part.push_column(RUN_UID, repeated(entry.run.as_str().into(), trace.num_rows()));
            parts.push(part);
        }
        if parts.is_empty() {
            continue;
        }
        result.insert(
            variable.clone(),
            encode_run_index(Table::concat(parts), request_runs),
        );
    }
    Ok(result)
}
