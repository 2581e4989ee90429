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

//! Metadata collaborator interface
//!
//! The relational run-metadata store stays outside this workspace; the
//! engine only needs the three queries below. Implementations are
//! injected wherever they are needed.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::request::RunFilter;
use crate::table::Table;
use crate::types::{Program, RunId};

/// Variable name of the per-run metadata document at the run root.
pub const RUN_METADATA_VARIABLE: &str = "run_metadata";

/// Identifier of one detected-event rule set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSetId(String);

impl RuleSetId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One detected-event definition out of a rule set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDefinition {
    /// Caller-facing event identifier.
    pub identifier: String,
    /// Cache field name of the event's per-run payload.
    pub event_uid: String,
    /// Limit revision the event was detected against.
    pub limit_uid: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// The slice of a run's metadata document the engine reads.
#[derive(Debug, Clone, PartialEq)]
pub struct RunMetadata {
    pub start_time: DateTime<Utc>,
    pub engine_type: String,
    pub run_tag: String,
    pub program: String,
}

impl RunMetadata {
    /// Reads the first row of a metadata document. `None` when any of
    /// the needed columns is absent or ill-typed.
    pub fn from_table(table: &Table) -> Option<RunMetadata> {
        let start_ms = table.value_at("StartTime", 0)?.as_f64()? as i64;
        let start_time = Utc.timestamp_millis_opt(start_ms).single()?;
        Some(RunMetadata {
            start_time,
            engine_type: table.value_at("EngineType", 0)?.as_str()?.to_string(),
            run_tag: table.value_at("RunTag", 0)?.as_str()?.to_string(),
            program: table.value_at("Program", 0)?.as_str()?.to_string(),
        })
    }
}

/// Read-only queries against the run-metadata store.
pub trait MetadataProvider: Send + Sync {
    /// Run identifiers (with recording years) matching a filter.
    fn resolve_runs(&self, program: &Program, filter: &RunFilter) -> Result<Vec<(RunId, i32)>>;

    /// Most recent rule set applicable to the given engine/tag/program
    /// at `as_of`. `None` when no rule set covers that instant.
    fn latest_rule_set(
        &self,
        engine_type: &str,
        run_tag: &str,
        program: &Program,
        as_of: DateTime<Utc>,
    ) -> Result<Option<RuleSetId>>;

    /// Event definitions of a rule set, restricted to the requested
    /// identifiers.
    fn event_definitions(
        &self,
        rule_set: &RuleSetId,
        identifiers: &[String],
    ) -> Result<Vec<EventDefinition>>;
}
