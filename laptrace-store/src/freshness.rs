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

//! File-modification freshness
//!
//! A cached payload is stale when its backing file was written after
//! the payload was cached. A file that cannot be inspected (deleted,
//! unreadable) is never stale; the cached copy is all there is.

use std::time::UNIX_EPOCH;

use laptrace_cache::FreshnessCheck;
use laptrace_core::{DataType, RunId};

use crate::paths::StorePaths;

/// [`FreshnessCheck`] over the storage layout, fixed to one data type.
#[derive(Debug, Clone)]
pub struct FileFreshness {
    paths: StorePaths,
    data_type: DataType,
}

impl FileFreshness {
    pub fn new(paths: StorePaths, data_type: DataType) -> Self {
        Self { paths, data_type }
    }
}

impl FreshnessCheck for FileFreshness {
    fn modified_since(&self, run: &RunId, year: i32, variable: &str, cached_at: u64) -> bool {
        let path = self.paths.variable_file(year, run, self.data_type, variable);
        let Ok(meta) = std::fs::metadata(&path) else {
            return false;
        };
        let Ok(modified) = meta.modified() else {
            return false;
        };
        let Ok(since_epoch) = modified.duration_since(UNIX_EPOCH) else {
            return false;
        };
        since_epoch.as_secs() > cached_at
    }
}
