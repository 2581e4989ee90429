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

//! Laptrace Store
//!
//! Backing file access: path construction over the year/run/data-type
//! layout, a bounded parallel reader for column-document files, variable
//! discovery, and file-modification freshness for the cache layer.
//! Absent files are data, not errors: every read yields a table, empty
//! when there is nothing on disk.

pub mod discovery;
pub mod freshness;
pub mod paths;
pub mod retriever;

pub use discovery::list_variables;
pub use freshness::FileFreshness;
pub use paths::StorePaths;
pub use retriever::{FileRetriever, RunTables};
