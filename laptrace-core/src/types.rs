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

//! Core vocabularies: run identifiers, programs, data types, aggregations

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LaptraceError, Result};

/// Canonical run identifier: an opaque 36-character token, stored and
/// cached upper-case so lookups are case-insensitive end to end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the token parses as a UUID. Filters validate this;
    /// read paths accept any canonicalized token.
    pub fn is_well_formed(&self) -> bool {
        uuid::Uuid::parse_str(&self.0).is_ok()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Competition/program namespace. Selects the cache database index and
/// the storage root a request resolves against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Program(String);

impl Program {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Program {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// The closed set of served data shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// One scalar per run.
    RunScalar,
    /// One value per lap per run.
    Lap,
    /// Binned counts over one axis.
    Histogram1d,
    /// Binned counts over two axes.
    Histogram2d,
    /// Binned counts per lap.
    HistogramPerLap,
    /// Variable-length value series per run.
    RunSeries,
    /// Detected-event lap summaries.
    Cdc,
    /// Raw time/value traces.
    Channel,
    /// Per-run metadata documents.
    Metadata,
}

impl DataType {
    /// Stable wire name: cache-key suffix and request vocabulary.
    pub fn wire_name(&self) -> &'static str {
        match self {
            DataType::RunScalar => "run_scalar",
            DataType::Lap => "lap",
            DataType::Histogram1d => "histogram1d",
            DataType::Histogram2d => "histogram2d",
            DataType::HistogramPerLap => "histogram_per_lap",
            DataType::RunSeries => "run_series",
            DataType::Cdc => "cdc",
            DataType::Channel => "channel",
            DataType::Metadata => "metadata",
        }
    }

    /// Channel traces are served straight from files, everything else
    /// goes through the cache.
    pub fn is_cached(&self) -> bool {
        !matches!(self, DataType::Channel)
    }

    /// Histogram types store bin-edge companions next to each variable.
    pub fn has_axis_files(&self) -> bool {
        matches!(
            self,
            DataType::Histogram1d | DataType::Histogram2d | DataType::HistogramPerLap
        )
    }

    /// Directory holding this type's files inside a run: a named folder
    /// under the computed-data directory, `channels` for raw traces,
    /// empty for documents living at the run root.
    pub fn folder_name(&self) -> &'static str {
        match self {
            DataType::RunScalar => "rundata",
            DataType::Lap => "lapdata",
            DataType::Histogram1d => "histodata",
            DataType::Histogram2d => "histo2ddata",
            DataType::HistogramPerLap => "histolapdata",
            DataType::RunSeries => "otherdata",
            DataType::Cdc => "cdcdata",
            DataType::Channel => "channels",
            DataType::Metadata => "",
        }
    }

    /// Computed types nest under the configured computed-data directory.
    pub fn is_computed(&self) -> bool {
        !matches!(self, DataType::Channel | DataType::Metadata)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for DataType {
    type Err = LaptraceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "run_scalar" => Ok(DataType::RunScalar),
            "lap" => Ok(DataType::Lap),
            "histogram1d" => Ok(DataType::Histogram1d),
            "histogram2d" => Ok(DataType::Histogram2d),
            "histogram_per_lap" => Ok(DataType::HistogramPerLap),
            "run_series" => Ok(DataType::RunSeries),
            "cdc" => Ok(DataType::Cdc),
            "channel" => Ok(DataType::Channel),
            "metadata" => Ok(DataType::Metadata),
            other => Err(LaptraceError::Validation(format!(
                "unknown data type '{other}'"
            ))),
        }
    }
}

/// Aggregation functions a caller may request. `None` means raw rows
/// with run-index encoding instead of folding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    None,
    Sum,
    Mean,
    Min,
    Max,
    First,
    Last,
    Count,
    Median,
    Prod,
    Std,
    Var,
    All,
    Any,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::None => "none",
            Aggregation::Sum => "sum",
            Aggregation::Mean => "mean",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::First => "first",
            Aggregation::Last => "last",
            Aggregation::Count => "count",
            Aggregation::Median => "median",
            Aggregation::Prod => "prod",
            Aggregation::Std => "std",
            Aggregation::Var => "var",
            Aggregation::All => "all",
            Aggregation::Any => "any",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Aggregation::None)
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = LaptraceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(Aggregation::None),
            "sum" => Ok(Aggregation::Sum),
            "mean" => Ok(Aggregation::Mean),
            "min" => Ok(Aggregation::Min),
            "max" => Ok(Aggregation::Max),
            "first" => Ok(Aggregation::First),
            "last" => Ok(Aggregation::Last),
            "count" => Ok(Aggregation::Count),
            "median" => Ok(Aggregation::Median),
            "prod" => Ok(Aggregation::Prod),
            "std" => Ok(Aggregation::Std),
            "var" => Ok(Aggregation::Var),
            "all" => Ok(Aggregation::All),
            "any" => Ok(Aggregation::Any),
            other => Err(LaptraceError::Validation(format!(
                "unknown aggregation '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_canonicalized_upper_case() {
        let id = RunId::new(" 5f0c6b1a-9d2e-4f1b-8a3c-0e7d6c5b4a39 ");
        assert_eq!(id.as_str(), "5F0C6B1A-9D2E-4F1B-8A3C-0E7D6C5B4A39");
        assert!(id.is_well_formed());
    }

    #[test]
    fn test_run_id_opaque_tokens_accepted() {
        let id = RunId::new("not-a-uuid");
        assert_eq!(id.as_str(), "NOT-A-UUID");
        assert!(!id.is_well_formed());
    }

    #[test]
    fn test_data_type_round_trip() {
        for dt in [
            DataType::RunScalar,
            DataType::Lap,
            DataType::Histogram1d,
            DataType::Histogram2d,
            DataType::HistogramPerLap,
            DataType::RunSeries,
            DataType::Cdc,
            DataType::Channel,
            DataType::Metadata,
        ] {
            assert_eq!(dt.wire_name().parse::<DataType>().unwrap(), dt);
        }
    }

    #[test]
    fn test_data_type_unknown_rejected() {
        assert!(matches!(
            "telemetry".parse::<DataType>(),
            Err(LaptraceError::Validation(_))
        ));
    }

    #[test]
    fn test_channel_not_cached() {
        assert!(!DataType::Channel.is_cached());
        assert!(DataType::Lap.is_cached());
    }

    #[test]
    fn test_aggregation_parse_case_insensitive() {
        assert_eq!("SUM".parse::<Aggregation>().unwrap(), Aggregation::Sum);
        assert_eq!(" Median ".parse::<Aggregation>().unwrap(), Aggregation::Median);
        assert!("percentile".parse::<Aggregation>().is_err());
    }
}
