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

//! Detected-event (CDC) data
//!
//! Events are a lap-shaped specialization with one indirection: the
//! caller requests event identifiers, but the cached payloads are
//! keyed by event UID, resolved through the rule set applicable to
//! the MOST RECENT run in the request (by metadata start time). A
//! payload holds one column per lap plus a leading run-total column,
//! skipped here; row 0 is the event's duration on that lap, row 1 its
//! occurrence count.
//!
//! Only `none` and `sum` are statistically meaningful aggregations for
//! event counts; anything else is logged but still executed as asked.

use chrono::{TimeZone, Utc};
use tracing::{error, warn};

use laptrace_cache::RunPayloads;

use laptrace_core::{
    Aggregation, DataType, EventDefinition, Fold, MetadataProvider, Program, Result, RunEntry,
    RunId, RunMetadata, RunSet, Table, Value, RUN_METADATA_VARIABLE,
};

use crate::codec::{encode_run_index, LAP_COUNT, RUN_UID, RUN_UID_INDEX};
use crate::fetch::PayloadSource;
use crate::process::{aggregation_requested, decode_payload, repeated, zero_index};

/// Event catalog plus the reshaped data table.
#[derive(Debug, Clone, PartialEq)]
pub struct CdcOutcome {
    pub catalog: Vec<EventDefinition>,
    pub table: Table,
}

impl CdcOutcome {
    fn empty(catalog: Vec<EventDefinition>) -> Self {
        Self {
            catalog,
            table: Table::with_headers(&[RUN_UID_INDEX, LAP_COUNT]),
        }
    }
}

pub fn process(
    source: &PayloadSource<'_>,
    metadata: &dyn MetadataProvider,
    request: &RunSet,
    request_runs: &[RunId],
    identifiers: &[String],
    refresh: bool,
    aggs: &[Aggregation],
) -> Result<CdcOutcome> {
    // Resolve the applicable rule set from the newest run's metadata.
    let meta_request = RunSet::from_entries(
        request
            .entries()
            .iter()
            .map(|entry| RunEntry {
                run: entry.run.clone(),
                year: entry.year,
                variables: vec![RUN_METADATA_VARIABLE.to_string()],
            })
            .collect(),
    );
    let meta_payloads = source.fetch(DataType::Metadata, &meta_request, false)?;

    let cutoff = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
    let mut latest: Option<RunMetadata> = None;
    let mut documented: Vec<&RunEntry> = Vec::new();
    for entry in request.entries() {
        let Some(doc) = decode_payload(&entry.run, RUN_METADATA_VARIABLE, &meta_payloads) else {
            continue;
        };
        let Some(meta) = RunMetadata::from_table(&doc) else {
            warn!(run = %entry.run, "metadata document misses required fields");
            continue;
        };
        if meta.start_time < cutoff {
            error!(run = %entry.run, start_time = %meta.start_time, "run start time before 2010");
        }
        if latest
            .as_ref()
            .map_or(true, |best| meta.start_time > best.start_time)
        {
            latest = Some(meta.clone());
        }
        documented.push(entry);
    }
    let Some(latest) = latest else {
        return Ok(CdcOutcome::empty(Vec::new()));
    };

    let program = Program::new(&latest.program);
    let Some(rule_set) = metadata.latest_rule_set(
        &latest.engine_type,
        &latest.run_tag,
        &program,
        latest.start_time,
    )?
    else {
        return Ok(CdcOutcome::empty(Vec::new()));
    };
    let catalog = metadata.event_definitions(&rule_set, identifiers)?;
    if catalog.is_empty() {
        return Ok(CdcOutcome::empty(catalog));
    }

    let event_uids: Vec<String> = catalog.iter().map(|def| def.event_uid.clone()).collect();
    let event_request = RunSet::from_entries(
        documented
            .iter()
            .map(|entry| RunEntry {
                run: entry.run.clone(),
                year: entry.year,
                variables: event_uids.clone(),
            })
            .collect(),
    );
    let payloads = source.fetch(DataType::Cdc, &event_request, refresh)?;

    let folding = aggregation_requested(aggs);
    if folding && aggs != [Aggregation::Sum] {
        if aggs.len() > 1 {
            error!(?aggs, "only one aggregation function applies to detected events");
        } else {
            warn!(agg = %aggs[0], "aggregation other than sum used for detected events");
        }
    }

    let mut parts = Vec::new();
    for entry in event_request.entries() {
        let part = reshape_run(entry, &catalog, &payloads, folding);
        if !part.is_empty() {
            parts.push(part);
        }
    }
    if parts.is_empty() {
        return Ok(CdcOutcome::empty(catalog));
    }
    let table = Table::concat(parts);

    let table = if folding {
        let agg = [aggs[0]];
        let mut folded = table.group_by_fold(
            &["Identifier", "CDCUID"],
            &[
                Fold {
                    column: "Occurrences",
                    aggs: &agg,
                    label_by_agg: false,
                },
                Fold {
                    column: "Duration",
                    aggs: &agg,
                    label_by_agg: false,
                },
            ],
            &["CDCLimitUID"],
        );
        folded.push_column(RUN_UID_INDEX, zero_index(folded.num_rows()));
        folded
    } else {
        encode_run_index(table, request_runs)
    };

    Ok(CdcOutcome { catalog, table })
}

/// One run's rows: per event, duration (row 0) and occurrences (row 1)
/// of every lap column past the leading run total.
fn reshape_run(
    entry: &RunEntry,
    catalog: &[EventDefinition],
    payloads: &RunPayloads,
    folding: bool,
) -> Table {
    let mut duration = Vec::new();
    let mut occurrences = Vec::new();
    let mut lap_count = Vec::new();
    let mut identifier = Vec::new();
    let mut event_uid = Vec::new();
    let mut limit_uid = Vec::new();

    for def in catalog {
        let Some(table) = decode_payload(&entry.run, &def.event_uid, payloads) else {
            continue;
        };
        let columns = table.columns();
        if columns.len() < 2 {
            continue;
        }
        let laps = &columns[1..];
        for lap in laps {
            duration.push(lap.values.first().cloned().unwrap_or(Value::Null));
            occurrences.push(lap.values.get(1).cloned().unwrap_or(Value::Null));
        }
        lap_count.extend((1..=laps.len() as i64).map(Value::Int));
        identifier.extend(repeated(def.identifier.as_str().into(), laps.len()));
        event_uid.extend(repeated(def.event_uid.as_str().into(), laps.len()));
        limit_uid.extend(repeated(def.limit_uid.as_str().into(), laps.len()));
    }

    let mut part = Table::new();
    if duration.is_empty() {
        return part;
    }
    part.push_column("Duration", duration);
    part.push_column("Occurrences", occurrences);
    part.push_column(LAP_COUNT, lap_count);
    part.push_column("Identifier", identifier);
    part.push_column("CDCLimitUID", limit_uid);
    part.push_column("CDCUID", event_uid);
    if !folding {
        part.push_column(
            RUN_UID,
            repeated(entry.run.as_str().into(), part.num_rows()),
        );
    }
    part
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use laptrace_cache::MemoryStore;
    use laptrace_core::{LaptraceError, RuleSetId, RunFilter};
    use laptrace_store::{FileRetriever, StorePaths};
    use std::fs;

    /// Canned metadata store: one rule set, fixed event definitions.
    struct StubMetadata {
        rule_set: Option<RuleSetId>,
        events: Vec<EventDefinition>,
    }

    impl MetadataProvider for StubMetadata {
        fn resolve_runs(&self, _: &Program, _: &RunFilter) -> Result<Vec<(RunId, i32)>> {
            Err(LaptraceError::Metadata("not under test".into()))
        }

        fn latest_rule_set(
            &self,
            _: &str,
            _: &str,
            _: &Program,
            _: DateTime<Utc>,
        ) -> Result<Option<RuleSetId>> {
            Ok(self.rule_set.clone())
        }

        fn event_definitions(
            &self,
            _: &RuleSetId,
            identifiers: &[String],
        ) -> Result<Vec<EventDefinition>> {
            Ok(self
                .events
                .iter()
                .filter(|def| identifiers.contains(&def.identifier))
                .cloned()
                .collect())
        }
    }

    fn event(identifier: &str, uid: &str) -> EventDefinition {
        EventDefinition {
            identifier: identifier.to_string(),
            event_uid: uid.to_string(),
            limit_uid: format!("{uid}-limit"),
            channel: None,
            unit: None,
            description: None,
        }
    }

    fn write_file(root: &std::path::Path, run: &str, data_type: DataType, var: &str, doc: &str) {
        let paths = StorePaths::new(root, "computed_data");
        let file = paths.variable_file(2024, &RunId::new(run), data_type, var);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, doc).unwrap();
    }

    fn write_metadata(root: &std::path::Path, run: &str, start_ms: i64) {
        write_file(
            root,
            run,
            DataType::Metadata,
            RUN_METADATA_VARIABLE,
            &format!(
                r#"{{"StartTime":{{"0":{start_ms}}},"EngineType":{{"0":"EVO24"}},"RunTag":{{"0":"race"}},"Program":{{"0":"endurance"}}}}"#
            ),
        );
    }

    /// Event payload: leading run-total column, then one column per
    /// lap; row 0 duration, row 1 occurrences.
    fn write_event(root: &std::path::Path, run: &str, uid: &str, laps: &[(f64, f64)]) {
        let total: (f64, f64) = laps
            .iter()
            .fold((0.0, 0.0), |acc, lap| (acc.0 + lap.0, acc.1 + lap.1));
        let mut columns = vec![format!(r#""Run":{{"0":{:?},"1":{:?}}}"#, total.0, total.1)];
        columns.extend(
            laps.iter()
                .enumerate()
                .map(|(i, (d, o))| format!(r#""Lap{}":{{"0":{d:?},"1":{o:?}}}"#, i + 1)),
        );
        write_file(
            root,
            run,
            DataType::Cdc,
            uid,
            &format!("{{{}}}", columns.join(",")),
        );
    }

    fn run_process(
        dir: &std::path::Path,
        metadata: &StubMetadata,
        runs: &[&str],
        identifiers: &[&str],
        aggs: &[Aggregation],
    ) -> CdcOutcome {
        let store = MemoryStore::new();
        let retriever = FileRetriever::new(StorePaths::new(dir, "computed_data"));
        let source = PayloadSource::new(&store, &retriever);
        let ids: Vec<RunId> = runs.iter().map(RunId::new).collect();
        let vars: Vec<String> = identifiers.iter().map(|v| v.to_string()).collect();
        let set = RunSet::new(&ids, &vec![2024; ids.len()], &vars).unwrap();
        process(&source, metadata, &set, &ids, &vars, false, aggs).unwrap()
    }

    #[test]
    fn test_total_column_is_skipped_and_laps_numbered() {
        let dir = tempfile::tempdir().unwrap();
        write_metadata(dir.path(), "r1", 1_714_550_400_000);
        write_event(dir.path(), "r1", "EV-1", &[(1.5, 2.0), (0.5, 1.0)]);

        let metadata = StubMetadata {
            rule_set: Some(RuleSetId::new("rs-1")),
            events: vec![event("OverRev", "EV-1")],
        };
        let outcome = run_process(
            dir.path(),
            &metadata,
            &["r1"],
            &["OverRev"],
            &[Aggregation::None],
        );

        assert_eq!(outcome.catalog.len(), 1);
        let table = &outcome.table;
        assert_eq!(table.num_rows(), 2);
        assert_eq!(
            table.values("Duration").unwrap(),
            &[Value::Float(1.5), Value::Float(0.5)][..]
        );
        assert_eq!(
            table.values("Occurrences").unwrap(),
            &[Value::Float(2.0), Value::Float(1.0)][..]
        );
        assert_eq!(
            table.values(LAP_COUNT).unwrap(),
            &[Value::Int(1), Value::Int(2)][..]
        );
        assert_eq!(
            table.values(RUN_UID_INDEX).unwrap(),
            &[Value::Int(0), Value::Int(0)][..]
        );
    }

    #[test]
    fn test_sum_folds_per_event_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        write_metadata(dir.path(), "r1", 1_714_550_400_000);
        write_metadata(dir.path(), "r2", 1_714_636_800_000);
        write_event(dir.path(), "r1", "EV-1", &[(1.0, 2.0), (3.0, 4.0)]);
        write_event(dir.path(), "r2", "EV-1", &[(10.0, 20.0)]);

        let metadata = StubMetadata {
            rule_set: Some(RuleSetId::new("rs-1")),
            events: vec![event("OverRev", "EV-1")],
        };
        let outcome = run_process(
            dir.path(),
            &metadata,
            &["r1", "r2"],
            &["OverRev"],
            &[Aggregation::Sum],
        );

        let table = &outcome.table;
        assert_eq!(table.num_rows(), 1);
        assert_eq!(table.values("Occurrences").unwrap(), &[Value::Float(26.0)][..]);
        assert_eq!(table.values("Duration").unwrap(), &[Value::Float(14.0)][..]);
        assert_eq!(
            table.value_at("CDCLimitUID", 0),
            Some(&Value::Str("EV-1-limit".into()))
        );
        assert_eq!(table.values(RUN_UID_INDEX).unwrap(), &[Value::Int(0)][..]);
    }

    #[test]
    fn test_no_metadata_yields_empty_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = StubMetadata {
            rule_set: Some(RuleSetId::new("rs-1")),
            events: vec![event("OverRev", "EV-1")],
        };
        let outcome = run_process(
            dir.path(),
            &metadata,
            &["r1"],
            &["OverRev"],
            &[Aggregation::Sum],
        );
        assert!(outcome.catalog.is_empty());
        assert!(outcome.table.is_empty());
        let names: Vec<&str> = outcome.table.column_names().collect();
        assert_eq!(names, vec![RUN_UID_INDEX, LAP_COUNT]);
    }

    #[test]
    fn test_no_applicable_rule_set_yields_empty_outcome() {
        let dir = tempfile::tempdir().unwrap();
        write_metadata(dir.path(), "r1", 1_714_550_400_000);
        let metadata = StubMetadata {
            rule_set: None,
            events: Vec::new(),
        };
        let outcome = run_process(
            dir.path(),
            &metadata,
            &["r1"],
            &["OverRev"],
            &[Aggregation::Sum],
        );
        assert!(outcome.catalog.is_empty());
        assert!(outcome.table.is_empty());
    }

    #[test]
    fn test_unusual_aggregation_is_still_executed() {
        let dir = tempfile::tempdir().unwrap();
        write_metadata(dir.path(), "r1", 1_714_550_400_000);
        write_event(dir.path(), "r1", "EV-1", &[(1.0, 2.0), (3.0, 6.0)]);

        let metadata = StubMetadata {
            rule_set: Some(RuleSetId::new("rs-1")),
            events: vec![event("OverRev", "EV-1")],
        };
        let outcome = run_process(
            dir.path(),
            &metadata,
            &["r1"],
            &["OverRev"],
            &[Aggregation::Mean],
        );
        assert_eq!(
            outcome.table.values("Occurrences").unwrap(),
            &[Value::Float(4.0)][..]
        );
    }
}
