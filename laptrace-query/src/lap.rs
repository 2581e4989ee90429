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

//! Lap data: one value per lap per variable
//!
//! A payload holds one single-row column per lap (`Lap1`, `Lap2`, ...),
//! in lap order. Variables of one run are zipped into rows and
//! truncated to the shortest variable present, so every row is a fully
//! populated lap; `LapCount` numbers laps from 1. Runs concatenate
//! row-wise with `Null` fill for variables a run lacks entirely.

use laptrace_core::{DataType, Result, RunId, RunSet, Table, Value};

use crate::codec::{encode_run_index, LAP_COUNT, RUN_UID, RUN_UID_INDEX};
use crate::fetch::PayloadSource;
use crate::process::{decode_payload, repeated};

pub fn process(
    source: &PayloadSource<'_>,
    request: &RunSet,
    request_runs: &[RunId],
    refresh: bool,
) -> Result<Table> {
    let payloads = source.fetch(DataType::Lap, request, refresh)?;

    let mut parts = Vec::new();
    for entry in request.entries() {
        let mut variables: Vec<(&str, Vec<Value>)> = Vec::new();
        let mut shortest = usize::MAX;
        for variable in &entry.variables {
            let Some(table) = decode_payload(&entry.run, variable, &payloads) else {
                continue;
            };
            let laps: Vec<Value> = table
                .columns()
                .iter()
                .map(|col| col.values.first().cloned().unwrap_or(Value::Null))
                .collect();
            shortest = shortest.min(laps.len());
            variables.push((variable, laps));
        }
        if variables.is_empty() {
            continue;
        }

        let mut part = Table::new();
        for (name, mut laps) in variables {
            laps.truncate(shortest);
            part.push_column(name, laps);
        }
        part.push_column(RUN_UID, repeated(entry.run.as_str().into(), shortest));
        part.push_column(
            LAP_COUNT,
            (1..=shortest as i64).map(Value::Int).collect(),
        );
        parts.push(part);
    }

    if parts.is_empty() {
        return Ok(Table::with_headers(&[RUN_UID_INDEX, LAP_COUNT]));
    }
    Ok(encode_run_index(Table::concat(parts), request_runs))
}
