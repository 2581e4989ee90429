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

//! 2-D histograms: binned counts over two axes
//!
//! Counts are stored flattened, row-major with the y axis outer, so a
//! payload of `nx * ny` cells maps onto the cartesian product of the
//! `<variable>_yAxis` and `<variable>_xAxis` bin edges. Output carries
//! `y_Left`/`y_Right`/`x_Left`/`x_Right` cell-edge columns; folding
//! groups by the `(y_Left, x_Left)` cell key.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::warn;

use laptrace_core::{Aggregation, DataType, Fold, Result, RunId, RunSet, Table, Value};

use crate::codec::{encode_run_index, RUN_UID, RUN_UID_INDEX};
use crate::fetch::PayloadSource;
use crate::process::{
    aggregation_requested, axis_interval, decode_payload, expand_variables, repeated,
    require_aggregation, tiled, zero_index, Interval, X_AXIS_SUFFIX, Y_AXIS_SUFFIX,
};

/// 2-D reshapes move more data; the slow threshold is laxer than 1-D.
const SLOW_VARIABLE_MILLIS: u128 = 1_000;

/// Cell-edge columns of the flattened y-outer/x-inner grid.
struct Grid {
    y_left: Vec<Value>,
    y_right: Vec<Value>,
    x_left: Vec<Value>,
    x_right: Vec<Value>,
}

impl Grid {
    fn new(y: &Interval, x: &Interval) -> Self {
        let cells = y.len() * x.len();
        let mut grid = Grid {
            y_left: Vec::with_capacity(cells),
            y_right: Vec::with_capacity(cells),
            x_left: Vec::with_capacity(cells),
            x_right: Vec::with_capacity(cells),
        };
        for (yl, yr) in y.left.iter().zip(&y.right) {
            for (xl, xr) in x.left.iter().zip(&x.right) {
                grid.y_left.push(yl.clone());
                grid.y_right.push(yr.clone());
                grid.x_left.push(xl.clone());
                grid.x_right.push(xr.clone());
            }
        }
        grid
    }

    fn len(&self) -> usize {
        self.y_left.len()
    }
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
        vec![
            var.to_string(),
            format!("{var}{X_AXIS_SUFFIX}"),
            format!("{var}{Y_AXIS_SUFFIX}"),
        ]
    });
    let payloads = source.fetch(DataType::Histogram2d, &augmented, refresh)?;

    let mut result = BTreeMap::new();
    for variable in variables {
        let started = Instant::now();

        let mut grid: Option<Grid> = None;
        let mut counts: Vec<Value> = Vec::new();
        let mut contributing: Vec<&RunId> = Vec::new();
        for entry in request.entries() {
            let Some(table) = decode_payload(&entry.run, variable, &payloads) else {
                continue;
            };
            if grid.is_none() {
                let x = axis_interval(&entry.run, &format!("{variable}{X_AXIS_SUFFIX}"), &payloads);
                let y = axis_interval(&entry.run, &format!("{variable}{Y_AXIS_SUFFIX}"), &payloads);
                match (y, x) {
                    (Some(y), Some(x)) => grid = Some(Grid::new(&y, &x)),
                    _ => {
                        warn!(run = %entry.run, variable, "2-D histogram without a usable axis pair");
                        continue;
                    }
                }
            }
            let Some(cells) = grid.as_ref().map(Grid::len) else {
                continue;
            };
            let mut run_counts = table
                .values("Run")
                .map(<[Value]>::to_vec)
                .unwrap_or_default();
            if run_counts.len() != cells {
                warn!(
                    run = %entry.run,
                    variable,
                    got = run_counts.len(),
                    expected = cells,
                    "2-D histogram counts do not match the grid, padding"
                );
                run_counts.resize(cells, Value::Null);
            }
            counts.extend(run_counts);
            contributing.push(&entry.run);
        }

        let Some(grid) = grid else {
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
                .flat_map(|run| repeated(run.as_str().into(), grid.len()))
                .collect();
            table.push_column(RUN_UID, uids);
        }
        let times = contributing.len();
        table.push_column("y_Left", tiled(&grid.y_left, times));
        table.push_column("y_Right", tiled(&grid.y_right, times));
        table.push_column("x_Left", tiled(&grid.x_left, times));
        table.push_column("x_Right", tiled(&grid.x_right, times));

        let table = if folding {
            let mut folded = table.group_by_fold(
                &["y_Left", "x_Left"],
                &[Fold {
                    column: variable,
                    aggs: &aggs,
                    label_by_agg: true,
                }],
                &["y_Right", "x_Right"],
            );
            folded.push_column(RUN_UID_INDEX, zero_index(folded.num_rows()));
            folded
        } else {
            encode_run_index(table, request_runs)
        };

        let elapsed = started.elapsed().as_millis();
        if elapsed > SLOW_VARIABLE_MILLIS {
            warn!(variable, elapsed_ms = elapsed as u64, "slow 2-D histogram reshape");
        }
        result.insert(variable.clone(), table);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use laptrace_cache::MemoryStore;
    use laptrace_store::{FileRetriever, StorePaths};
    use std::fs;

    fn write_doc(root: &std::path::Path, run: &str, variable: &str, payload: &str) {
        let paths = StorePaths::new(root, "computed_data");
        let file = paths.variable_file(2024, &RunId::new(run), DataType::Histogram2d, variable);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, payload).unwrap();
    }

    /// 2 x bins, 2 y bins: counts flattened y-outer.
    fn write_histogram(root: &std::path::Path, run: &str, variable: &str, counts: &[f64; 4]) {
        let cells: Vec<String> = counts
            .iter()
            .enumerate()
            .map(|(i, v)| format!(r#""{i}":{v:?}"#))
            .collect();
        write_doc(
            root,
            run,
            variable,
            &format!(r#"{{"Run":{{{}}}}}"#, cells.join(",")),
        );
        write_doc(
            root,
            run,
            &format!("{variable}_xAxis"),
            r#"{"Value":{"0":0.0,"1":50.0,"2":100.0}}"#,
        );
        write_doc(
            root,
            run,
            &format!("{variable}_yAxis"),
            r#"{"Value":{"0":0.0,"1":4000.0,"2":8000.0}}"#,
        );
    }

    fn run_process(
        dir: &std::path::Path,
        runs: &[&str],
        aggs: &[Aggregation],
    ) -> BTreeMap<String, Table> {
        let store = MemoryStore::new();
        let retriever = FileRetriever::new(StorePaths::new(dir, "computed_data"));
        let source = PayloadSource::new(&store, &retriever);
        let ids: Vec<RunId> = runs.iter().map(RunId::new).collect();
        let vars = vec!["ThrottleVsRpm".to_string()];
        let set = RunSet::new(&ids, &vec![2024; ids.len()], &vars).unwrap();
        process(&source, &set, &vars, &ids, false, aggs).unwrap()
    }

    #[test]
    fn test_grid_is_y_outer_x_inner() {
        let dir = tempfile::tempdir().unwrap();
        write_histogram(dir.path(), "r1", "ThrottleVsRpm", &[1.0, 2.0, 3.0, 4.0]);

        let result = run_process(dir.path(), &["r1"], &[Aggregation::None]);
        let table = &result["ThrottleVsRpm"];
        assert_eq!(table.num_rows(), 4);
        assert_eq!(
            table.values("y_Left").unwrap(),
            &[
                Value::Float(0.0),
                Value::Float(0.0),
                Value::Float(4000.0),
                Value::Float(4000.0)
            ][..]
        );
        assert_eq!(
            table.values("x_Left").unwrap(),
            &[
                Value::Float(0.0),
                Value::Float(50.0),
                Value::Float(0.0),
                Value::Float(50.0)
            ][..]
        );
        assert_eq!(
            table.values("x_Right").unwrap(),
            &[
                Value::Float(50.0),
                Value::Float(100.0),
                Value::Float(50.0),
                Value::Float(100.0)
            ][..]
        );
    }

    #[test]
    fn test_folds_by_cell_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        write_histogram(dir.path(), "r1", "ThrottleVsRpm", &[1.0, 2.0, 3.0, 4.0]);
        write_histogram(dir.path(), "r2", "ThrottleVsRpm", &[10.0, 20.0, 30.0, 40.0]);

        let result = run_process(dir.path(), &["r1", "r2"], &[Aggregation::Sum]);
        let table = &result["ThrottleVsRpm"];
        assert_eq!(table.num_rows(), 4);
        assert_eq!(
            table.values("sum").unwrap(),
            &[
                Value::Float(11.0),
                Value::Float(22.0),
                Value::Float(33.0),
                Value::Float(44.0)
            ][..]
        );
        assert_eq!(table.values(RUN_UID_INDEX).unwrap(), &zero_index(4)[..]);
        let names: Vec<&str> = table.column_names().collect();
        assert_eq!(
            names,
            vec!["y_Left", "x_Left", "sum", "y_Right", "x_Right", RUN_UID_INDEX]
        );
    }
}
