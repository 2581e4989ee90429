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

//! The data engine facade
//!
//! One explicitly constructed, dependency-injected instance per
//! program: cache store, storage settings and metadata provider are
//! handed in, never reached through globals. [`DataEngine::fetch`]
//! validates the request into a [`RunSet`], resolves the storage root
//! and dispatches to the data type's processor.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use laptrace_cache::CacheStore;
use laptrace_core::{
    DataRequest, DataType, EventDefinition, LaptraceError, MetadataProvider, Program, Result,
    RunSet, StorageSettings, Table,
};
use laptrace_store::{FileRetriever, StorePaths};

use crate::codec::{encode_run_index, RUN_UID};
use crate::fetch::PayloadSource;
use crate::process::{decode_payload, repeated};
use crate::{cdc, channel, histogram, histogram2d, histogram_lap, lap, scalar, series};

/// Shape of a served result, decided by the data type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DataResponse {
    /// One table: scalar and lap shapes.
    Table(Table),
    /// One table per requested variable: histogram, series, channel
    /// and metadata shapes.
    PerVariable(BTreeMap<String, Table>),
    /// Detected events: the resolved catalog plus the data table.
    Events {
        catalog: Vec<EventDefinition>,
        table: Table,
    },
}

/// Serves tabular telemetry data for one program, cache-first.
pub struct DataEngine {
    store: Arc<dyn CacheStore>,
    storage: StorageSettings,
    metadata: Arc<dyn MetadataProvider>,
    program: Program,
}

impl DataEngine {
    pub fn new(
        store: Arc<dyn CacheStore>,
        storage: StorageSettings,
        metadata: Arc<dyn MetadataProvider>,
        program: Program,
    ) -> Self {
        Self {
            store,
            storage,
            metadata,
            program,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Serves one request: validate, resolve storage, dispatch.
    pub fn fetch(&self, request: &DataRequest) -> Result<DataResponse> {
        if request.program != self.program {
            return Err(LaptraceError::Validation(format!(
                "request for program '{}' hit the '{}' engine",
                request.program, self.program
            )));
        }
        let started = Instant::now();
        let run_set = request.run_set()?;
        let paths = StorePaths::resolve(&self.storage, &self.program)?;
        let retriever = FileRetriever::new(paths);
        let source = PayloadSource::new(self.store.as_ref(), &retriever);

        let response = match request.data_type {
            DataType::RunScalar => {
                scalar::process(&source, &run_set, &request.run_ids, request.refresh)
                    .map(DataResponse::Table)
            }
            DataType::Lap => lap::process(&source, &run_set, &request.run_ids, request.refresh)
                .map(DataResponse::Table),
            DataType::Histogram1d => histogram::process(
                &source,
                &run_set,
                &request.variables,
                &request.run_ids,
                request.refresh,
                &request.aggregations,
            )
            .map(DataResponse::PerVariable),
            DataType::Histogram2d => histogram2d::process(
                &source,
                &run_set,
                &request.variables,
                &request.run_ids,
                request.refresh,
                &request.aggregations,
            )
            .map(DataResponse::PerVariable),
            DataType::HistogramPerLap => histogram_lap::process(
                &source,
                &run_set,
                &request.variables,
                &request.run_ids,
                request.refresh,
                &request.aggregations,
            )
            .map(DataResponse::PerVariable),
            DataType::RunSeries => series::process(
                &source,
                &run_set,
                &request.variables,
                &request.run_ids,
                request.refresh,
            )
            .map(DataResponse::PerVariable),
            DataType::Channel => {
                channel::process(&source, &run_set, &request.variables, &request.run_ids)
                    .map(DataResponse::PerVariable)
            }
            DataType::Cdc => cdc::process(
                &source,
                self.metadata.as_ref(),
                &run_set,
                &request.run_ids,
                &request.variables,
                request.refresh,
                &request.aggregations,
            )
            .map(|outcome| DataResponse::Events {
                catalog: outcome.catalog,
                table: outcome.table,
            }),
            DataType::Metadata => self
                .metadata_documents(&source, &run_set, request)
                .map(DataResponse::PerVariable),
        }?;

        info!(
            data_type = %request.data_type,
            runs = run_set.len(),
            variables = request.variables.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request served"
        );
        Ok(response)
    }

    /// Metadata documents pass through as-is: per variable, each run's
    /// document rows concatenate with the run identifier alongside.
    fn metadata_documents(
        &self,
        source: &PayloadSource<'_>,
        run_set: &RunSet,
        request: &DataRequest,
    ) -> Result<BTreeMap<String, Table>> {
        let payloads = source.fetch(DataType::Metadata, run_set, request.refresh)?;

        let mut result = BTreeMap::new();
        for variable in &request.variables {
            let mut parts = Vec::new();
            for entry in run_set.entries() {
                let Some(mut doc) = decode_payload(&entry.run, variable, &payloads) else {
                    continue;
                };
                doc.push_column(RUN_UID, repeated(entry.run.as_str().into(), doc.num_rows()));
                parts.push(doc);
            }
            if parts.is_empty() {
                continue;
            }
            result.insert(
                variable.clone(),
                encode_run_index(Table::concat(parts), &request.run_ids),
            );
        }
        Ok(result)
    }
}
