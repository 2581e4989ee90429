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

//! Storage path construction
//!
//! Files live under `root/year/run/folder/variable.json`, where the
//! folder is the data type's fixed mapping: computed types under the
//! computed-data directory, channels in their own folder, metadata
//! documents at the run root.

use std::path::PathBuf;

use laptrace_core::{DataType, Program, Result, RunId, StorageSettings};

/// Data file extension.
pub const DATA_FILE_EXT: &str = "json";

/// Resolved storage layout for one program.
#[derive(Debug, Clone)]
pub struct StorePaths {
    root: PathBuf,
    computed_dir: String,
}

impl StorePaths {
    pub fn new(root: impl Into<PathBuf>, computed_dir: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            computed_dir: computed_dir.into(),
        }
    }

    /// Resolves the program's root for the current OS. Fails when the
    /// root is not configured or not mounted.
    pub fn resolve(settings: &StorageSettings, program: &Program) -> Result<Self> {
        let root = settings.resolve_root(program)?;
        Ok(Self::new(root, settings.computed_dir.clone()))
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn run_dir(&self, year: i32, run: &RunId) -> PathBuf {
        self.root.join(year.to_string()).join(run.as_str())
    }

    /// Directory holding one data type's files for a run.
    pub fn data_dir(&self, year: i32, run: &RunId, data_type: DataType) -> PathBuf {
        let run_dir = self.run_dir(year, run);
        if data_type.is_computed() {
            run_dir.join(&self.computed_dir).join(data_type.folder_name())
        } else if data_type.folder_name().is_empty() {
            run_dir
        } else {
            run_dir.join(data_type.folder_name())
        }
    }

    pub fn variable_file(
        &self,
        year: i32,
        run: &RunId,
        data_type: DataType,
        variable: &str,
    ) -> PathBuf {
        self.data_dir(year, run, data_type)
            .join(format!("{variable}.{DATA_FILE_EXT}"))
    }
}
