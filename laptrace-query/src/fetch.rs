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

//! Payload acquisition shared by every processor
//!
//! One injected pair of collaborators: the cache store and the file
//! retriever. Cached reads run through [`CacheThrough`] with
//! file-modification staleness verification; channel reads bypass the
//! cache entirely and decode straight off disk.

use laptrace_cache::{CacheStore, CacheThrough, RunPayloads};
use laptrace_core::{DataType, Result, RunSet};
use laptrace_store::{FileFreshness, FileRetriever, RunTables};

/// The processors' window onto cache and file storage.
pub struct PayloadSource<'a> {
    store: &'a dyn CacheStore,
    retriever: &'a FileRetriever,
}

impl<'a> PayloadSource<'a> {
    pub fn new(store: &'a dyn CacheStore, retriever: &'a FileRetriever) -> Self {
        Self { store, retriever }
    }

    /// Serves serialized payloads cache-first: cached variables whose
    /// backing file has not changed are returned as-is, everything
    /// else is read from disk and written back.
    pub fn fetch(
        &self,
        data_type: DataType,
        request: &RunSet,
        refresh: bool,
    ) -> Result<RunPayloads> {
        let freshness = FileFreshness::new(self.retriever.paths().clone(), data_type);
        CacheThrough::new(self.store)
            .with_staleness(&freshness)
            .fetch(data_type, request, refresh, |reduced| {
                self.retriever.read_serialized(data_type, reduced)
            })
    }

    /// Reads decoded tables straight from the file store, no cache
    /// involvement. The channel path.
    pub fn read_native(&self, data_type: DataType, request: &RunSet) -> Result<RunTables> {
        self.retriever.read_tables(data_type, request)
    }
}
