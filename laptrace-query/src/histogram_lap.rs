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

//! Lap-indexed histograms: binned counts per lap per run
//!
//! A payload holds one column of bin counts per lap (`Lap1`, `Lap2`,
//! ...) sharing the `<variable>_xAxis` edges. Output is one row per
//! bin per contributing run with one column per lap number up to the
//! longest run; laps a run never drove (gaps included) are
//! `Null`-filled. Folding collapses each lap column per `Left` bin
//! first, then folds the per-lap results row-wise with the same
//! aggregator, one output column per requested function.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::warn;

use laptrace_core::{
    fold_values, Aggregation, DataType, Result, RunId, RunSet, Table, Value,
};

use crate::codec::{encode_run_index, RUN_UID, RUN_UID_INDEX};
use crate::fetch::PayloadSource;
use crate::process::{
    aggregation_requested, axis_interval, decode_payload, expand_variables, repeated,
    require_aggregation, tiled, zero_index, X_AXIS_SUFFIX,
};

const SLOW_VARIABLE_MILLIS: u128 = 500;

/// Lap number from a `Lap<n>` column name; gap tolerant, so `Lap7` in
/// a payload without `Lap6` still lands in the right column.
fn lap_number(column: &str) -> Option<usize> {
    column.strip_prefix("Lap")?.parse().ok()
}

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
    let payloads = source.fetch(DataType::HistogramPerLap, &augmented, refresh)?;

    let mut result = BTreeMap::new();
    for variable in variables {
        let started = Instant::now();
        let axis_variable = format!("{variable}{X_AXIS_SUFFIX}");

        let mut interval = None;
        let mut contributing: Vec<(&RunId, Table)> = Vec::new();
        for entry in request.entries() {
            let Some(table) = decode_payload(&entry.run, variable, &payloads) else {
                continue;
            };
            if interval.is_none() {
                match axis_interval(&entry.run, &axis_variable, &payloads) {
                    Some(axis) => interval = Some(axis),
                    None => {
                        warn!(run = %entry.run, variable, "per-lap histogram without a usable axis");
                        continue;
                    }
                }
            }
            contributing.push((&entry.run, table));
        }

        let Some(interval) = interval else {
            continue;
        };
        if contributing.is_empty() {
            continue;
        }
        let bins = interval.len();

        let max_lap = contributing
            .iter()
            .flat_map(|(_, table)| table.column_names().filter_map(lap_number))
            .max()
            .unwrap_or(0);

        let mut table = Table::new();
        if !folding {
            let uids = contributing
                .iter()
                .flat_map(|(run, _)| repeated(run.as_str().into(), bins))
                .collect();
            table.push_column(RUN_UID, uids);
        }
        let lap_names: Vec<String> = (1..=max_lap).map(|lap| format!("Lap{lap}")).collect();
        for lap_name in &lap_names {
            let mut column = Vec::with_capacity(bins * contributing.len());
            for (_, run_table) in &contributing {
                match run_table.values(lap_name) {
                    Some(values) => {
                        let mut cells = values.to_vec();
                        cells.resize(bins, Value::Null);
                        column.extend(cells);
                    }
                    None => column.extend(repeated(Value::Null, bins)),
                }
            }
            table.push_column(lap_name.clone(), column);
        }
        let times = contributing.len();
        table.push_column("Left", tiled(&interval.left, times));
        table.push_column("Right", tiled(&interval.right, times));

        let table = if folding {
            fold_per_lap(&table, &lap_names, &aggs)
        } else {
            encode_run_index(table, request_runs)
        };

        let elapsed = started.elapsed().as_millis();
        if elapsed > SLOW_VARIABLE_MILLIS {
            warn!(variable, elapsed_ms = elapsed as u64, "slow per-lap histogram reshape");
        }
        result.insert(variable.clone(), table);
    }
    Ok(result)
}

/// Two-stage fold: per `Left` bin collapse each lap column across
/// contributing runs, then collapse the per-lap values row-wise with
/// the same aggregator. One output column per aggregator, labeled by
/// its name.
fn fold_per_lap(table: &Table, lap_names: &[String], aggs: &[Aggregation]) -> Table {
    let groups = table.group_rows(&["Left"]);

    let mut out = Table::new();
    out.push_column(
        "Left",
        groups.iter().map(|(key, _)| key[0].clone()).collect(),
    );
    for agg in aggs {
        let values: Vec<Value> = groups
            .iter()
            .map(|(_, rows)| {
                let per_lap: Vec<Value> = lap_names
                    .iter()
                    .map(|lap| {
                        fold_values(
                            *agg,
                            rows.iter()
                                .map(|&row| table.value_at(lap, row).unwrap_or(&Value::Null)),
                        )
                    })
                    .collect();
                fold_values(*agg, per_lap.iter())
            })
            .collect();
        out.push_column(agg.as_str(), values);
    }
    let right: Vec<Value> = groups
        .iter()
        .map(|(_, rows)| {
            fold_values(
                Aggregation::First,
                rows.iter()
                    .map(|&row| table.value_at("Right", row).unwrap_or(&Value::Null)),
            )
        })
        .collect();
    out.push_column("Right", right);
    out.push_column(RUN_UID_INDEX, zero_index(out.num_rows()));
    out
}
