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

//! Reshaping helpers shared by the processors.

use tracing::warn;

use laptrace_cache::RunPayloads;
use laptrace_core::{Aggregation, RunEntry, RunId, RunSet, Table, Value};

/// Bin-edge companion of a 1-D (or the first axis of a 2-D) histogram
/// variable.
pub(crate) const X_AXIS_SUFFIX: &str = "_xAxis";

/// Second-axis companion of a 2-D histogram variable.
pub(crate) const Y_AXIS_SUFFIX: &str = "_yAxis";

/// Decodes one run's payload for a variable. `None` when the variable
/// is absent or its document is empty; malformed documents are logged
/// and also read as absent.
pub(crate) fn decode_payload(
    run: &RunId,
    variable: &str,
    payloads: &RunPayloads,
) -> Option<Table> {
    let payload = payloads.get(run)?.get(variable)?;
    match Table::from_json(payload) {
        Ok(table) if table.is_empty() => None,
        Ok(table) => Some(table),
        Err(err) => {
            warn!(%run, variable, %err, "malformed payload, treating as absent");
            None
        }
    }
}

/// Aggregation applies only when at least one function was requested
/// and `none` is not among them.
pub(crate) fn aggregation_requested(aggs: &[Aggregation]) -> bool {
    !aggs.is_empty() && !aggs.iter().any(Aggregation::is_none)
}

/// Histogram shapes always fold; an empty request defaults to `sum`.
pub(crate) fn require_aggregation(aggs: &[Aggregation]) -> Vec<Aggregation> {
    if aggs.is_empty() {
        warn!("no aggregation function received, defaulting to sum");
        vec![Aggregation::Sum]
    } else {
        aggs.to_vec()
    }
}

/// Same runs and years, with each entry's variables expanded (e.g. by
/// histogram axis companions).
pub(crate) fn expand_variables<F>(request: &RunSet, expand: F) -> RunSet
where
    F: Fn(&str) -> Vec<String>,
{
    RunSet::from_entries(
        request
            .entries()
            .iter()
            .map(|entry| RunEntry {
                run: entry.run.clone(),
                year: entry.year,
                variables: entry.variables.iter().flat_map(|v| expand(v)).collect(),
            })
            .collect(),
    )
}

/// Left/right bin edges of one histogram axis.
#[derive(Debug, Clone)]
pub(crate) struct Interval {
    pub left: Vec<Value>,
    pub right: Vec<Value>,
}

impl Interval {
    pub fn len(&self) -> usize {
        self.left.len()
    }
}

/// Reads an axis document's `Value` column into bin edges: axis
/// `[0,10,20,30]` gives left `[0,10,20]` and right `[10,20,30]`. An
/// absent or degenerate axis yields `None`, logged by the caller.
pub(crate) fn axis_interval(
    run: &RunId,
    axis_variable: &str,
    payloads: &RunPayloads,
) -> Option<Interval> {
    let table = decode_payload(run, axis_variable, payloads)?;
    let edges = table.values("Value")?;
    if edges.len() < 2 {
        return None;
    }
    Some(Interval {
        left: edges[..edges.len() - 1].to_vec(),
        right: edges[1..].to_vec(),
    })
}

/// `n` copies of one cell.
pub(crate) fn repeated(value: Value, n: usize) -> Vec<Value> {
    vec![value; n]
}

/// The whole slice, `times` times over.
pub(crate) fn tiled(values: &[Value], times: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(values.len() * times);
    for _ in 0..times {
        out.extend_from_slice(values);
    }
    out
}

/// A zeroed `RunUID_index` column for aggregated outputs, which fold
/// the per-run dimension away.
pub(crate) fn zero_index(rows: usize) -> Vec<Value> {
    repeated(Value::Int(0), rows)
}
