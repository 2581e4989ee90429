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

//! Columnar tables
//!
//! [`Table`] is the shape shared by backing files, cached payloads and
//! query results: named columns of dynamically-typed cells. The wire
//! format is a column document, `{"column": {"rowLabel": value}}`,
//! with `{}` as the empty table. Column order follows the document;
//! row labels that all parse as integers are ordered numerically.
//!
//! Aggregation is an explicit group-by-and-fold over the columns, with
//! flat single-name output labels.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use crate::types::Aggregation;

/// Folds slower than this are logged.
const FOLD_WARN_MILLIS: u128 = 100;

/// One cell. `Null` means "not available".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null, or a float that carries no value.
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// Named column of cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

/// One value column to fold within each group.
#[derive(Debug, Clone)]
pub struct Fold<'a> {
    pub column: &'a str,
    pub aggs: &'a [Aggregation],
    /// Label output columns by the aggregator name (histogram style)
    /// instead of keeping the source column name. Folds that keep the
    /// column name must carry a single aggregator.
    pub label_by_agg: bool,
}

/// Ordered named columns of equal length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty table that still advertises its column names, for results
    /// with a fixed schema and no rows.
    pub fn with_headers(names: &[&str]) -> Self {
        Self {
            columns: names
                .iter()
                .map(|n| Column {
                    name: n.to_string(),
                    values: Vec::new(),
                })
                .collect(),
        }
    }

    /// Appends a column; an existing column with the same name is
    /// replaced in place.
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<Value>) {
        let name = name.into();
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(col) => col.values = values,
            None => self.columns.push(Column { name, values }),
        }
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let idx = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(idx))
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn values(&self, name: &str) -> Option<&[Value]> {
        self.column(name).map(|c| c.values.as_slice())
    }

    pub fn value_at(&self, name: &str, row: usize) -> Option<&Value> {
        self.values(name).and_then(|v| v.get(row))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.columns.iter().map(|c| c.values.len()).max().unwrap_or(0)
    }

    /// No rows. A table may still carry header names.
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    fn pad(&mut self) {
        let rows = self.num_rows();
        for col in &mut self.columns {
            col.values.resize(rows, Value::Null);
        }
    }

    /// Row-wise concatenation. Column sets are unioned in first-seen
    /// order; cells absent from a part become `Null`.
    pub fn concat<I>(parts: I) -> Table
    where
        I: IntoIterator<Item = Table>,
    {
        let mut out = Table::new();
        let mut total_rows = 0usize;
        for part in parts {
            let part_rows = part.num_rows();
            for Column { name, mut values } in part.columns {
                values.resize(part_rows, Value::Null);
                match out.columns.iter_mut().find(|c| c.name == name) {
                    Some(col) => {
                        col.values.resize(total_rows, Value::Null);
                        col.values.extend(values);
                    }
                    None => {
                        let mut padded = vec![Value::Null; total_rows];
                        padded.extend(values);
                        out.columns.push(Column { name, values: padded });
                    }
                }
            }
            total_rows += part_rows;
            for col in &mut out.columns {
                col.values.resize(total_rows, Value::Null);
            }
        }
        out
    }

    /// Groups rows by the key columns, ascending key order. Rows with a
    /// missing key value are dropped, as are all rows when a key column
    /// does not exist. Returns the key values as first seen plus the
    /// member row indices of each group.
    pub fn group_rows(&self, keys: &[&str]) -> Vec<(Vec<Value>, Vec<usize>)> {
        let mut key_cols: Vec<&[Value]> = Vec::with_capacity(keys.len());
        for key in keys {
            match self.values(key) {
                Some(col) => key_cols.push(col),
                None => return Vec::new(),
            }
        }

        let mut index: HashMap<Vec<GroupKey>, usize> = HashMap::new();
        let mut groups: Vec<(Vec<GroupKey>, Vec<Value>, Vec<usize>)> = Vec::new();
        'rows: for row in 0..self.num_rows() {
            let mut group_key = Vec::with_capacity(key_cols.len());
            let mut shown = Vec::with_capacity(key_cols.len());
            for col in &key_cols {
                let cell = col.get(row).unwrap_or(&Value::Null);
                match GroupKey::from_value(cell) {
                    Some(k) => {
                        group_key.push(k);
                        shown.push(cell.clone());
                    }
                    None => continue 'rows,
                }
            }
            match index.get(&group_key) {
                Some(&slot) => groups[slot].2.push(row),
                None => {
                    index.insert(group_key.clone(), groups.len());
                    groups.push((group_key, shown, vec![row]));
                }
            }
        }

        groups.sort_by(|a, b| a.0.cmp(&b.0));
        groups.into_iter().map(|(_, shown, rows)| (shown, rows)).collect()
    }

    /// Group-by-and-fold. Output columns: the keys, then one column per
    /// fold/aggregator pair, then the `carry_first` columns holding each
    /// group's first non-missing value. All labels are flat single names.
    pub fn group_by_fold(&self, keys: &[&str], folds: &[Fold<'_>], carry_first: &[&str]) -> Table {
        let started = Instant::now();
        let groups = self.group_rows(keys);

        let mut out = Table::new();
        for (ki, key) in keys.iter().enumerate() {
            let vals = groups.iter().map(|(k, _)| k[ki].clone()).collect();
            out.push_column(*key, vals);
        }
        for fold in folds {
            let source = self.values(fold.column);
            for agg in fold.aggs {
                let label = if fold.label_by_agg {
                    agg.as_str().to_string()
                } else {
                    fold.column.to_string()
                };
                let vals = groups
                    .iter()
                    .map(|(_, rows)| {
                        fold_values(
                            *agg,
                            rows.iter()
                                .map(|&r| source.and_then(|s| s.get(r)).unwrap_or(&Value::Null)),
                        )
                    })
                    .collect();
                out.push_column(label, vals);
            }
        }
        for carry in carry_first {
            let source = self.values(carry);
            let vals = groups
                .iter()
                .map(|(_, rows)| {
                    fold_values(
                        Aggregation::First,
                        rows.iter()
                            .map(|&r| source.and_then(|s| s.get(r)).unwrap_or(&Value::Null)),
                    )
                })
                .collect();
            out.push_column(*carry, vals);
        }

        let elapsed = started.elapsed().as_millis();
        if elapsed > FOLD_WARN_MILLIS {
            warn!(
                elapsed_ms = elapsed as u64,
                rows = self.num_rows(),
                groups = out.num_rows(),
                "group fold ran long"
            );
        }
        out
    }

    /// Parses a column document. Malformed input is the caller's to
    /// demote to absence.
    pub fn from_json(payload: &str) -> serde_json::Result<Table> {
        serde_json::from_str(payload)
    }

    /// Column-document string. Row labels are "0".."n-1".
    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(s) => s,
            Err(err) => {
                warn!(error = %err, "table serialization failed, emitting empty document");
                String::from("{}")
            }
        }
    }
}

/// Hashable, orderable stand-in for a key cell. Numeric cells compare
/// as floats so `3` and `3.0` land in one group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum GroupKey {
    Bool(bool),
    Num(OrdFloat),
    Str(String),
}

impl GroupKey {
    /// None for missing cells; those rows leave the grouping.
    fn from_value(v: &Value) -> Option<GroupKey> {
        if v.is_missing() {
            return None;
        }
        match v {
            Value::Bool(b) => Some(GroupKey::Bool(*b)),
            Value::Int(i) => Some(GroupKey::Num(OrdFloat::new(*i as f64))),
            Value::Float(f) => Some(GroupKey::Num(OrdFloat::new(*f))),
            Value::Str(s) => Some(GroupKey::Str(s.clone())),
            Value::Null => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct OrdFloat(f64);

impl OrdFloat {
    fn new(f: f64) -> Self {
        // normalize -0.0 so it hashes with 0.0
        Self(if f == 0.0 { 0.0 } else { f })
    }
}

impl Eq for OrdFloat {}

impl PartialOrd for OrdFloat {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdFloat {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl std::hash::Hash for OrdFloat {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.to_bits());
    }
}

/// Folds an iterator of cells with one aggregator, skipping missing
/// values. Empty input yields the aggregator's identity where one
/// exists (`sum` 0, `prod` 1, `all` true, `any` false, `count` 0) and
/// `Null` otherwise.
pub fn fold_values<'a, I>(agg: Aggregation, values: I) -> Value
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut present = values.into_iter().filter(|v| !v.is_missing());
    match agg {
        Aggregation::None => Value::Null,
        Aggregation::First => present.next().cloned().unwrap_or(Value::Null),
        Aggregation::Last => present.last().cloned().unwrap_or(Value::Null),
        Aggregation::Count => Value::Int(present.count() as i64),
        Aggregation::All => Value::Bool(present.all(|v| v.truthy())),
        Aggregation::Any => Value::Bool(present.any(|v| v.truthy())),
        _ => numeric_fold(agg, present),
    }
}

fn numeric_fold<'a, I>(agg: Aggregation, values: I) -> Value
where
    I: Iterator<Item = &'a Value>,
{
    let mut nums: Vec<f64> = Vec::new();
    let mut all_int = true;
    for v in values {
        if let Some(f) = v.as_f64() {
            all_int &= matches!(v, Value::Int(_));
            nums.push(f);
        }
    }

    let renumber = |x: f64, all_int: bool| -> Value {
        if all_int {
            Value::Int(x as i64)
        } else {
            Value::Float(x)
        }
    };

    match agg {
        Aggregation::Sum => {
            if nums.is_empty() {
                Value::Int(0)
            } else {
                renumber(nums.iter().sum(), all_int)
            }
        }
        Aggregation::Prod => {
            if nums.is_empty() {
                Value::Int(1)
            } else {
                renumber(nums.iter().product(), all_int)
            }
        }
        Aggregation::Mean => {
            if nums.is_empty() {
                Value::Null
            } else {
                Value::Float(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        Aggregation::Min => match nums.iter().cloned().reduce(f64::min) {
            Some(m) => renumber(m, all_int),
            None => Value::Null,
        },
        Aggregation::Max => match nums.iter().cloned().reduce(f64::max) {
            Some(m) => renumber(m, all_int),
            None => Value::Null,
        },
        Aggregation::Median => {
            if nums.is_empty() {
                return Value::Null;
            }
            nums.sort_by(|a, b| a.total_cmp(b));
            let mid = nums.len() / 2;
            let median = if nums.len() % 2 == 1 {
                nums[mid]
            } else {
                (nums[mid - 1] + nums[mid]) / 2.0
            };
            Value::Float(median)
        }
        Aggregation::Var => sample_variance(&nums).map(Value::Float).unwrap_or(Value::Null),
        Aggregation::Std => sample_variance(&nums)
            .map(|v| Value::Float(v.sqrt()))
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Sample variance, ddof 1. Needs at least two values.
fn sample_variance(nums: &[f64]) -> Option<f64> {
    if nums.len() < 2 {
        return None;
    }
    let n = nums.len() as f64;
    let mean = nums.iter().sum::<f64>() / n;
    Some(nums.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0))
}

impl Serialize for Table {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct RowMap<'a>(&'a [Value]);

        impl Serialize for RowMap<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(self.0.len()))?;
                for (row, value) in self.0.iter().enumerate() {
                    map.serialize_entry(&row.to_string(), value)?;
                }
                map.end()
            }
        }

        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for col in &self.columns {
            map.serialize_entry(&col.name, &RowMap(&col.values))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Table {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Table, D::Error> {
        struct Rows(Vec<Value>);

        impl<'de> Deserialize<'de> for Rows {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Rows, D::Error> {
                struct RowsVisitor;

                impl<'de> Visitor<'de> for RowsVisitor {
                    type Value = Rows;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        f.write_str("a map of row label to cell value")
                    }

                    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Rows, A::Error> {
                        let mut entries: Vec<(String, Value)> = Vec::new();
                        while let Some(entry) = access.next_entry::<String, Value>()? {
                            entries.push(entry);
                        }
                        // numeric row labels sort numerically, anything
                        // else keeps document order
                        if entries.iter().all(|(label, _)| label.parse::<u64>().is_ok()) {
                            entries.sort_by_key(|(label, _)| label.parse::<u64>().unwrap_or(0));
                        }
                        Ok(Rows(entries.into_iter().map(|(_, v)| v).collect()))
                    }
                }

                deserializer.deserialize_map(RowsVisitor)
            }
        }

        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = Table;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of column name to row map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Table, A::Error> {
                let mut table = Table::new();
                while let Some(name) = access.next_key::<String>()? {
                    let rows: Rows = access.next_value()?;
                    table.push_column(name, rows.0);
                }
                table.pad();
                Ok(table)
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}
