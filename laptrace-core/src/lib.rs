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

//! Laptrace Core
//!
//! Domain model for the telemetry run-data engine: run identifiers,
//! data-type and aggregation vocabularies, the columnar [`Table`]
//! structure shared by file payloads and query results, request
//! validation, configuration, and the error taxonomy.

pub mod config;
pub mod error;
pub mod metadata;
pub mod request;
pub mod table;
pub mod types;

pub use config::{CacheSettings, EngineConfig, StorageSettings};
pub use error::{LaptraceError, Result};
pub use metadata::{
    EventDefinition, MetadataProvider, RuleSetId, RunMetadata, RUN_METADATA_VARIABLE,
};
pub use request::{DataRequest, RunEntry, RunFilter, RunSet};
pub use table::{fold_values, Column, Fold, Table, Value};
pub use types::{Aggregation, DataType, Program, RunId};
