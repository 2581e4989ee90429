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

//! 1-D histograms: binned counts per run
//!
//! Each variable stores its counts in a `Run` column and its bin edges
//! in a companion `<variable>_xAxis` document, fetched alongside but
//! never exposed. A variable's axis is identical across runs; the
//! first contributing run defines it. Per variable the counts stack
//! run over run with `Left`/`Right` edge columns tiled to match, then
//! fold by `Left` or keep raw rows with run-index encoding.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::warn;

use laptrace_core::{Aggregation, DataType, Fold, Result, RunId, RunSet, Table, Value};

use crate::codec::{encode_run_index, RUN_UID, RUN_UID_INDEX};
use crate::fetch::PayloadSource;
use crate::process::{
    aggregation_requested, axis_interval, decode_payload, expand_variables, repeated,
    require_aggregation, tiled, zero_index, X_AXIS_SUFFIX,
};

/// Per-variable reshapes slower than this are logged.
const SLOW_VARIABLE_MILLIS: u128 = 500;

pub fn process(
    source: &PayloadSource<'_>,
    request: &RunSet,
    variables: &[String],
    request_runs: &[RunId],
    refresh: bool,
    aggs: &[Aggregation],
) -> Result<BTreeMap<String, Table>> {
    let aggs = require_aggregation(aggs);
    let folding = aggregation_requested(&aggs);

    let augmented = expand_variables(request, |var| {
        vec![var.to_string(), format!("{var}{X_AXIS_SUFFIX}")]
    });
    let payloads = source.fetch(DataType::Histogram1d, &augmented, refresh)?;

    let mut result = BTreeMap::new();
    for variable in variables {
        let started = Instant::now();
        let axis_variable = format!("{variable}{X_AXIS_SUFFIX}");

        let mut interval = None;
        let mut counts: Vec<Value> = Vec::new();
        let mut contributing: Vec<&RunId> = Vec::new();
        for entry in request.entries() {
            let Some(table) = decode_payload(&entry.run, variable, &payloads) else {
                continue;
            };
            if interval.is_none() {
                match axis_interval(&entry.run, &axis_variable, &payloads) {
                    Some(axis) => interval = Some(axis),
                    None => {
                        warn!(run = %entry.run, variable, "histogram data without a usable axis");
                        continue;
                    }
                }
            }
            let Some(axis) = interval.as_ref() else {
                continue;
            };
            let bins = axis.len();
            let mut run_counts = table
                .values("Run")
                .map(<[Value]>::to_vec)
                .unwrap_or_default();
            if run_counts.len() != bins {
                warn!(
                    run = %entry.run,
                    variable,
                    got = run_counts.len(),
                    expected = bins,
                    "histogram counts do not match the axis, padding"
                );
                run_counts.resize(bins, Value::Null);
            }
            counts.extend(run_counts);
            contributing.push(&entry.run);
        }

        let Some(interval) = interval else {
            continue;
        };
        if contributing.is_empty() {
            continue;
        }

        let mut table = Table::new();
        table.push_column(variable.clone(), counts);
        if !folding {
            let uids = contributing
                .iter()
                .flat_map(|run| repeated(run.as_str().into(), interval.len()))
                .collect();
            table.push_column(RUN_UID, uids);
        }
        table.push_column("Left", tiled(&interval.left, contributing.len()));
        table.push_column("Right", tiled(&interval.right, contributing.len()));

        let table = if folding {
            let mut folded = table.group_by_fold(
                &["Left"],
                &[Fold {
                    column: variable,
                    aggs: &aggs,
                    label_by_agg: true,
                }],
                &["Right"],
            );
            folded.push_column(RUN_UID_INDEX, zero_index(folded.num_rows()));
            folded
        } else {
            encode_run_index(table, request_runs)
        };

        let elapsed = started.elapsed().as_millis();
        if elapsed > SLOW_VARIABLE_MILLIS {
            warn!(variable, elapsed_ms = elapsed as u64, "slow histogram reshape");
        }
        result.insert(variable.clone(), table);
    }
    Ok(result)
}
