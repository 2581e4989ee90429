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

//! Run scalars: one value per variable per run
//!
//! The payload holds a single `Run` cell per variable. Output is one
//! row per run with a column per requested variable; a run with no
//! value for any variable is skipped, a variable absent for one run
//! becomes `Null` in that run's row.

use laptrace_core::{DataType, Result, RunId, RunSet, Table};

use crate::codec::{encode_run_index, RUN_UID, RUN_UID_INDEX};
use crate::fetch::PayloadSource;
use crate::process::decode_payload;

pub fn process(
    source: &PayloadSource<'_>,
    request: &RunSet,
    request_runs: &[RunId],
    refresh: bool,
) -> Result<Table> {
    let payloads = source.fetch(DataType::RunScalar, request, refresh)?;

    let mut rows = Vec::new();
    for entry in request.entries() {
        let mut row = Table::new();
        for variable in &entry.variables {
            let Some(table) = decode_payload(&entry.run, variable, &payloads) else {
                continue;
            };
            let Some(value) = table.value_at("Run", 0) else {
                continue;
            };
            row.push_column(variable.clone(), vec![value.clone()]);
        }
        if row.num_columns() == 0 {
            continue;
        }
        row.push_column(RUN_UID, vec![entry.run.as_str().into()]);
        rows.push(row);
    }

    if rows.is_empty() {
        return Ok(Table::with_headers(&[RUN_UID_INDEX]));
    }
    Ok(encode_run_index(Table::concat(rows), request_runs))
}
