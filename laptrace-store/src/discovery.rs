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

//! Variable discovery
//!
//! Lists what a run has on disk for one data type, so clients can ask
//! before they fetch.

use std::io;

use tracing::warn;

use laptrace_core::{DataType, Result, RunId};

use crate::paths::{StorePaths, DATA_FILE_EXT};

/// Variables available for one run and data type, sorted. Histogram
/// axis companions are dropped. A missing directory yields an empty
/// list.
pub fn list_variables(
    paths: &StorePaths,
    data_type: DataType,
    year: i32,
    run: &RunId,
) -> Result<Vec<String>> {
    let dir = paths.data_dir(year, run, data_type);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            warn!(dir = %dir.display(), %err, "unreadable data directory");
            return Ok(Vec::new());
        }
    };

    let mut variables = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(DATA_FILE_EXT) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if data_type.has_axis_files() && (stem.ends_with("_xAxis") || stem.ends_with("_yAxis")) {
            continue;
        }
        variables.push(stem.to_string());
    }
    variables.sort();
    Ok(variables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(paths: &StorePaths, data_type: DataType, variable: &str) {
        let file = paths.variable_file(2024, &RunId::new("r1"), data_type, variable);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, "{}").unwrap();
    }

    #[test]
    fn test_sorted_with_axis_companions_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::new(dir.path(), "computed_data");
        for variable in ["Throttle", "Brake", "Throttle_xAxis", "Brake_xAxis"] {
            touch(&paths, DataType::Histogram1d, variable);
        }

        let variables =
            list_variables(&paths, DataType::Histogram1d, 2024, &RunId::new("r1")).unwrap();
        assert_eq!(variables, vec!["Brake", "Throttle"]);
    }

    #[test]
    fn test_axis_suffix_kept_for_non_histogram_types() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::new(dir.path(), "computed_data");
        touch(&paths, DataType::Lap, "Speed_xAxis");

        let variables = list_variables(&paths, DataType::Lap, 2024, &RunId::new("r1")).unwrap();
        assert_eq!(variables, vec!["Speed_xAxis"]);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::new(dir.path(), "computed_data");
        let variables = list_variables(&paths, DataType::Lap, 2024, &RunId::new("r1")).unwrap();
        assert!(variables.is_empty());
    }
}
