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

//! Run identifier codec
//!
//! Result tables carry one row per run/lap/bin, so repeating the full
//! 36-character run identifier dominates large responses. The codec
//! replaces the identifier column with the identifier's position in
//! the caller's original request list; the caller decodes against its
//! own copy of that list. No state survives a call.

use std::collections::HashMap;

use tracing::warn;

use laptrace_core::{RunId, Table, Value};

/// Run identifier column produced while reshaping.
pub const RUN_UID: &str = "RunUID";

/// Positional replacement for [`RUN_UID`] in served tables.
pub const RUN_UID_INDEX: &str = "RunUID_index";

/// Lap number column, counting from 1.
pub const LAP_COUNT: &str = "LapCount";

/// Replaces the `RunUID` column with a 0-based `RunUID_index` column,
/// appended last. The index is the identifier's position in the
/// caller's original (possibly duplicated) run list; a duplicated
/// identifier encodes to its LAST position. Tables without a `RunUID`
/// column pass through unchanged.
pub fn encode_run_index(mut table: Table, request_runs: &[RunId]) -> Table {
    let Some(column) = table.remove_column(RUN_UID) else {
        return table;
    };

    let positions: HashMap<&str, i64> = request_runs
        .iter()
        .enumerate()
        .map(|(idx, run)| (run.as_str(), idx as i64))
        .collect();

    let encoded = column
        .values
        .iter()
        .map(|cell| match cell.as_str().and_then(|run| positions.get(run)) {
            Some(&idx) => Value::Int(idx),
            None => {
                warn!(run = %cell, "run identifier not in the request list");
                Value::Null
            }
        })
        .collect();
    table.push_column(RUN_UID_INDEX, encoded);
    table
}
