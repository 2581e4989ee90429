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

//! Error taxonomy for the engine
//!
//! Only hard failures surface as errors. Partial data absence (missing
//! files, variables, laps) is never an error: readers produce empty or
//! null-filled results instead. Malformed payloads are logged by the
//! layer that decodes them and treated as absence.

use thiserror::Error;

/// Errors surfaced by the telemetry data engine.
#[derive(Debug, Error)]
pub enum LaptraceError {
    /// Deployment problem: unknown OS or program, unmounted storage
    /// root, unmapped cache database.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed request: mismatched run/year lists, unknown data type
    /// or aggregation name, invalid filter.
    #[error("validation error: {0}")]
    Validation(String),

    /// The cache store cannot be reached or spoke garbage.
    #[error("cache store unavailable: {0}")]
    CacheUnavailable(String),

    /// The metadata collaborator failed to answer.
    #[error("metadata store error: {0}")]
    Metadata(String),
}

pub type Result<T> = std::result::Result<T, LaptraceError>;
