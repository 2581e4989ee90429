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

//! Run series: variable-length value sequences per run
//!
//! The loosest shape served: a `Run` column of arbitrary length per
//! variable. Per variable the sequences concatenate across runs with
//! the run identifier repeated alongside; runs never align, so no
//! aggregation applies.

use std::collections::BTreeMap;

use laptrace_core::{DataType, Result, RunId, RunSet, Table};

use crate::codec::{encode_run_index, RUN_UID};
use crate::fetch::PayloadSource;
use crate::process::{decode_payload, repeated};

pub fn process(
    source: &PayloadSource<'_>,
    request: &RunSet,
    variables: &[String],
    request_runs: &[RunId],
    refresh: bool,
) -> Result<BTreeMap<String, Table>> {
    let payloads = source.fetch(DataType::RunSeries, request, refresh)?;

    let mut result = BTreeMap::new();
    for variable in variables {
        let mut parts = Vec::new();
        for entry in request.entries() {
            let Some(table) = decode_payload(&entry.run, variable, &payloads) else {
                continue;
            };
            let Some(values) = table.values("Run") else {
                continue;
            };
            let mut part = Table::new();
            part.push_column(variable.clone(), values.to_vec());
            part.push_column(RUN_UID, repeated(entry.run.as_str().into(), values.len()));
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
