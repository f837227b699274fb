//! Tabular datasets assembled from normalized records.
//!
//! Columns are the union of every record's keys, sorted by name, so the same
//! input shape always yields the same column order. Cells missing from a record
//! are filled with [`Cell::Null`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::warn;

use crate::models::Collection;
use crate::normalize::Record;

const TIMESTAMP_COLUMNS: &[&str] = &["start_time", "end_time", "created_time", "collected_at"];
const DATE_COLUMNS: &[&str] = &["date_start", "date_stop"];
const INTEGER_COLUMNS: &[&str] = &["impressions", "clicks", "daily_budget", "lifetime_budget"];
const FLOAT_COLUMNS: &[&str] = &["ctr", "spend", "frequency"];

#[derive(Error, Debug, Clone, PartialEq)]
#[error("column '{column}' holds a value that is not a valid {expected}: {value}")]
pub struct DataTypeError {
    pub column: String,
    pub expected: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    /// Nested object or array, kept whole.
    Json(Value),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    fn from_raw(value: Value) -> Self {
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Cell::Int(i),
                None => n.as_f64().map(Cell::Float).unwrap_or(Cell::Null),
            },
            Value::String(s) => Cell::Text(s),
            nested @ (Value::Array(_) | Value::Object(_)) => Cell::Json(nested),
        }
    }

    /// Text form used for delimited files.
    pub fn render(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) => f.to_string(),
            Cell::Bool(b) => b.to_string(),
            Cell::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Cell::Date(d) => d.format("%Y-%m-%d").to_string(),
            Cell::Json(v) => v.to_string(),
        }
    }

    /// JSON form used for warehouse uploads. Nested values become JSON strings.
    pub fn to_json(&self) -> Value {
        match self {
            Cell::Null => Value::Null,
            Cell::Text(s) => Value::String(s.clone()),
            Cell::Int(i) => Value::from(*i),
            Cell::Float(f) => Value::from(*f),
            Cell::Bool(b) => Value::Bool(*b),
            Cell::Timestamp(ts) => Value::String(ts.format("%Y-%m-%d %H:%M:%S%.6f UTC").to_string()),
            Cell::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            Cell::Json(v) => Value::String(v.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Every value is null.
    Null,
    String,
    Int64,
    Float64,
    Bool,
    Timestamp,
    Date,
    Json,
    Mixed,
}

impl ColumnType {
    fn of(cell: &Cell) -> Self {
        match cell {
            Cell::Null => ColumnType::Null,
            Cell::Text(_) => ColumnType::String,
            Cell::Int(_) => ColumnType::Int64,
            Cell::Float(_) => ColumnType::Float64,
            Cell::Bool(_) => ColumnType::Bool,
            Cell::Timestamp(_) => ColumnType::Timestamp,
            Cell::Date(_) => ColumnType::Date,
            Cell::Json(_) => ColumnType::Json,
        }
    }

    fn merge(self, other: ColumnType) -> ColumnType {
        use ColumnType::*;
        match (self, other) {
            (Null, t) | (t, Null) => t,
            (a, b) if a == b => a,
            (Int64, Float64) | (Float64, Int64) => Float64,
            _ => Mixed,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnType::Null => "null",
            ColumnType::String => "string",
            ColumnType::Int64 => "int64",
            ColumnType::Float64 => "float64",
            ColumnType::Bool => "bool",
            ColumnType::Timestamp => "timestamp[utc]",
            ColumnType::Date => "date",
            ColumnType::Json => "json",
            ColumnType::Mixed => "mixed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Dataset {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cells of one column, top to bottom.
    pub fn column<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a Cell> + 'a> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    pub fn column_type(&self, idx: usize) -> ColumnType {
        self.rows
            .iter()
            .map(|row| ColumnType::of(&row[idx]))
            .fold(ColumnType::Null, ColumnType::merge)
    }

    pub fn null_count(&self, idx: usize) -> usize {
        self.rows.iter().filter(|row| row[idx].is_null()).count()
    }

    /// Rows as JSON objects, with nulls left out. Cells of mixed columns are
    /// rendered as text to match their `STRING` schema.
    pub fn json_rows(&self) -> impl Iterator<Item = Value> + '_ {
        let mixed: Vec<bool> = (0..self.columns.len())
            .map(|idx| self.column_type(idx) == ColumnType::Mixed)
            .collect();

        self.rows.iter().map(move |row| {
            let object = self
                .columns
                .iter()
                .zip(row)
                .zip(&mixed)
                .filter(|((_, cell), _)| !cell.is_null())
                .map(|((name, cell), &as_text)| {
                    let value = if as_text {
                        Value::String(cell.render())
                    } else {
                        cell.to_json()
                    };
                    (name.clone(), value)
                })
                .collect();
            Value::Object(object)
        })
    }
}

enum Coercion {
    Timestamp,
    Date,
    Integer,
    Float,
    AsIs,
}

fn coercion_for(column: &str) -> Coercion {
    if TIMESTAMP_COLUMNS.contains(&column) {
        Coercion::Timestamp
    } else if DATE_COLUMNS.contains(&column) {
        Coercion::Date
    } else if INTEGER_COLUMNS.contains(&column) {
        Coercion::Integer
    } else if FLOAT_COLUMNS.contains(&column) {
        Coercion::Float
    } else {
        Coercion::AsIs
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    // Graph API style: 2024-01-15T10:00:00+0000
    if let Ok(ts) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(s).map(|ts| ts.date_naive()))
}

fn type_error(column: &str, expected: &'static str, value: &Value) -> DataTypeError {
    DataTypeError {
        column: column.to_string(),
        expected,
        value: value.to_string(),
    }
}

/// Coerces one raw value. Numeric columns degrade to `None` (lost) instead of failing.
fn coerce(column: &str, value: Value) -> Result<Option<Cell>, DataTypeError> {
    if value.is_null() {
        return Ok(Some(Cell::Null));
    }

    let cell = match coercion_for(column) {
        Coercion::Timestamp => match value.as_str() {
            Some("") => Cell::Null,
            Some(s) => match parse_timestamp(s) {
                Some(ts) => Cell::Timestamp(ts),
                None => return Err(type_error(column, "timestamp", &value)),
            },
            None => return Err(type_error(column, "timestamp", &value)),
        },
        Coercion::Date => match value.as_str() {
            Some("") => Cell::Null,
            Some(s) => match parse_date(s) {
                Some(d) => Cell::Date(d),
                None => return Err(type_error(column, "date", &value)),
            },
            None => return Err(type_error(column, "date", &value)),
        },
        Coercion::Integer => {
            let parsed = match &value {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            match parsed {
                Some(i) => Cell::Int(i),
                None => return Ok(None),
            }
        }
        Coercion::Float => {
            let parsed = match &value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            match parsed {
                Some(f) => Cell::Float(f),
                None => return Ok(None),
            }
        }
        Coercion::AsIs => Cell::from_raw(value),
    };

    Ok(Some(cell))
}

fn column_union(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .flat_map(|record| record.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Builds a rectangular dataset from heterogeneous records.
pub fn assemble(records: Vec<Record>) -> Result<Dataset, DataTypeError> {
    typed(&records)
}

/// Same shape as [`assemble`], with every value kept as it arrived.
pub fn assemble_untyped(records: Vec<Record>) -> Dataset {
    untyped(&records)
}

fn typed(records: &[Record]) -> Result<Dataset, DataTypeError> {
    let columns = column_union(records);
    let mut lost: BTreeMap<&str, usize> = BTreeMap::new();
    let mut rows = Vec::with_capacity(records.len());

    for record in records {
        let mut row = Vec::with_capacity(columns.len());
        for column in &columns {
            let cell = match record.get(column) {
                Some(value) => match coerce(column, value.clone())? {
                    Some(cell) => cell,
                    None => {
                        *lost.entry(column.as_str()).or_default() += 1;
                        Cell::Null
                    }
                },
                None => Cell::Null,
            };
            row.push(cell);
        }
        rows.push(row);
    }

    for (column, count) in lost {
        warn!(column, count, "Non-numeric values replaced with null");
    }

    Ok(Dataset { columns, rows })
}

fn untyped(records: &[Record]) -> Dataset {
    let columns = column_union(records);
    let rows = records
        .iter()
        .map(|record| {
            columns
                .iter()
                .map(|column| record.get(column).cloned().map(Cell::from_raw).unwrap_or(Cell::Null))
                .collect()
        })
        .collect();
    Dataset { columns, rows }
}

/// A collection whose values did not fit its column types.
///
/// Carries every dataset of the batch: collections that typed cleanly as
/// usual, failing ones untyped, so they can still be written out.
#[derive(Error, Debug)]
#[error("{collection} could not be assembled: {source}")]
pub struct AssemblyError {
    pub collection: Collection,
    #[source]
    pub source: DataTypeError,
    pub untyped: Datasets,
}

/// Normalized records grouped by the collection that produced them.
#[derive(Debug, Default)]
pub struct Batches {
    campaigns: Vec<Record>,
    adsets: Vec<Record>,
    insights: Vec<Record>,
}

impl Batches {
    pub fn extend(&mut self, collection: Collection, records: Vec<Record>) {
        match collection {
            Collection::Campaigns => self.campaigns.extend(records),
            Collection::AdSets => self.adsets.extend(records),
            Collection::Insights => self.insights.extend(records),
        }
    }

    pub fn len(&self, collection: Collection) -> usize {
        match collection {
            Collection::Campaigns => self.campaigns.len(),
            Collection::AdSets => self.adsets.len(),
            Collection::Insights => self.insights.len(),
        }
    }

    /// Types all three collections. Every one is attempted even after a failure.
    pub fn assemble(self) -> Result<Datasets, AssemblyError> {
        let mut failure: Option<(Collection, DataTypeError)> = None;
        let mut build = |collection: Collection, records: &[Record]| match typed(records) {
            Ok(dataset) => dataset,
            Err(source) => {
                warn!(collection = %collection, error = %source, "Keeping collection untyped");
                if failure.is_none() {
                    failure = Some((collection, source));
                }
                untyped(records)
            }
        };

        let datasets = Datasets {
            campaigns: build(Collection::Campaigns, &self.campaigns),
            adsets: build(Collection::AdSets, &self.adsets),
            insights: build(Collection::Insights, &self.insights),
        };

        match failure {
            None => Ok(datasets),
            Some((collection, source)) => Err(AssemblyError {
                collection,
                source,
                untyped: datasets,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Datasets {
    pub campaigns: Dataset,
    pub adsets: Dataset,
    pub insights: Dataset,
}

impl Datasets {
    pub fn get(&self, collection: Collection) -> &Dataset {
        match collection {
            Collection::Campaigns => &self.campaigns,
            Collection::AdSets => &self.adsets,
            Collection::Insights => &self.insights,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Collection, &Dataset)> + '_ {
        Collection::ALL.into_iter().map(move |c| (c, self.get(c)))
    }
}
