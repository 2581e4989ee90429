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

//! Cache store contract
//!
//! Keys are `<run>+<data type>` in one flat namespace. Every payload
//! write lands together with its `<variable>_timestamp` sibling so
//! staleness checks can compare against backing-file modification
//! times.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use laptrace_core::{DataType, Result, RunId};

/// Separates run identifier and data type inside a key.
pub const KEY_SEPARATOR: char = '+';

/// TTL armed by writes.
pub const DEFAULT_WRITE_TTL: Duration = Duration::from_secs(4 * 7 * 24 * 3600);

/// TTL renewed by read hits.
pub const DEFAULT_READ_TTL: Duration = Duration::from_secs(8 * 7 * 24 * 3600);

/// Record key: run identifier plus data-type wire name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(run: &RunId, data_type: DataType) -> Self {
        Self(format!("{run}{KEY_SEPARATOR}{}", data_type.wire_name()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of the write-timestamp sibling of a variable field.
pub fn timestamp_field(variable: &str) -> String {
    format!("{variable}_timestamp")
}

/// Seconds since the epoch, saturating at zero on a clock before 1970.
pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Sliding-expiration windows of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    /// Armed when any field of the record is written.
    pub write_ttl: Duration,
    /// Renewed when an existing record is read.
    pub read_ttl: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            write_ttl: DEFAULT_WRITE_TTL,
            read_ttl: DEFAULT_READ_TTL,
        }
    }
}

/// Outcome of probing one record for a variable list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachePartition {
    /// Hit variables with their payloads, request order.
    pub cached: Vec<(String, String)>,
    /// Variables the record does not hold, request order.
    pub missing: Vec<String>,
}

/// One field write.
#[derive(Debug, Clone, PartialEq)]
pub struct PutEntry {
    pub key: CacheKey,
    pub variable: String,
    pub payload: String,
}

impl PutEntry {
    pub fn new(key: CacheKey, variable: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            key,
            variable: variable.into(),
            payload: payload.into(),
        }
    }
}

/// Hash-record cache store. Implementations are injected; everything
/// here is a synchronous blocking round-trip.
pub trait CacheStore: Send + Sync {
    /// Splits `variables` into cached and missing for one record.
    ///
    /// With `refresh`, or when the record is absent, every variable is
    /// missing and the record's TTL is left untouched. Otherwise the
    /// probe renews the record to the read window and bulk-reads the
    /// fields. The two halves partition the request: together they
    /// cover every variable exactly once, in request order.
    fn partition(
        &self,
        key: &CacheKey,
        variables: &[String],
        refresh: bool,
    ) -> Result<CachePartition>;

    /// Writes payload fields plus their timestamp siblings, then arms
    /// the write TTL on every touched record.
    fn put(&self, entries: &[PutEntry]) -> Result<()>;

    /// Write timestamps (epoch seconds) of the given variables.
    fn timestamps(&self, key: &CacheKey, variables: &[String]) -> Result<Vec<Option<u64>>>;

    /// Per-variable field existence, without reading payloads.
    fn has_fields(&self, key: &CacheKey, variables: &[String]) -> Result<Vec<bool>>;

    /// Drops whole records. Returns how many existed.
    fn delete(&self, keys: &[CacheKey]) -> Result<u64>;

    /// Drops every record whose key matches a `*`-wildcard pattern.
    /// Returns how many were dropped.
    fn delete_matching(&self, pattern: &str) -> Result<u64>;

    /// Round-trip health check.
    fn ping(&self) -> Result<()>;
}
