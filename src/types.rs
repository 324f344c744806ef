//! Core types shared across the index
//!
//! This module defines the value model and the row contracts:
//! - **`RowValue`**: the closed value enum used for raw input values,
//!   extracted complex values and aggregator outputs
//! - **`InputRow`** / **`MapRow`**: the ingestion-side row contract and its
//!   map-backed implementation
//! - **`Row`**: an aggregated row materialized during iteration
//! - **`Granularity`** / **`TimeRange`**: timestamp bucketing and intervals
//! - **`ColumnCapabilities`**: per-column kind and flags, discovered as
//!   data comes in

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single column value
///
/// One enum covers the three places values travel through the index: raw
/// values read off an input row, values extracted by a complex-metric
/// serde, and results produced by an aggregator's `get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowValue {
    /// No value
    Null,
    /// A single string value
    String(String),
    /// A multi-valued string column
    Strings(Vec<String>),
    /// A 64-bit float
    Float(f64),
    /// A 64-bit integer
    Long(i64),
    /// Opaque complex intermediate bytes
    Bytes(Vec<u8>),
}

impl RowValue {
    /// Numeric view of this value, if it has one
    ///
    /// Used by post-aggregators, which compute over materialized outputs.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RowValue::Float(v) => Some(*v),
            RowValue::Long(v) => Some(*v as f64),
            _ => None,
        }
    }
}

/// Declared kind of a column's values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    /// Dimension strings
    String,
    /// Float metric
    Float,
    /// Complex (serde-mediated) metric
    Complex,
}

/// Per-column capabilities, mutated as data is discovered
///
/// `has_multiple_values` is monotonic: once a row contributes more than one
/// value to a dimension, the flag stays set. Spatial indexing is carried on
/// the capability surface but never set by this index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnCapabilities {
    /// Kind of values the column holds
    pub kind: ValueKind,
    /// Whether any row has contributed more than one value
    pub has_multiple_values: bool,
    /// Whether the column participates in a spatial index
    pub has_spatial_indexes: bool,
}

impl ColumnCapabilities {
    /// Capabilities of a freshly discovered string dimension
    pub fn string() -> Self {
        Self {
            kind: ValueKind::String,
            has_multiple_values: false,
            has_spatial_indexes: false,
        }
    }

    /// Capabilities of a metric column of the given kind
    pub fn metric(kind: ValueKind) -> Self {
        Self {
            kind,
            has_multiple_values: false,
            has_spatial_indexes: false,
        }
    }
}

/// Timestamp bucketing applied to every ingested row
///
/// `truncate` floors an epoch-millis timestamp to its bucket boundary;
/// `next` returns the start of the following bucket. Negative timestamps
/// floor correctly (euclidean division).
///
/// # Example
///
/// ```
/// use magma::types::Granularity;
///
/// let gran = Granularity::minute();
/// assert_eq!(gran.truncate(61_000), 60_000);
/// assert_eq!(gran.truncate(119_000), 60_000);
/// assert_eq!(gran.next(61_000), 120_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Granularity {
    /// No bucketing: every distinct timestamp is its own bucket
    None,
    /// Fixed-duration buckets, in milliseconds (must be positive)
    Duration(i64),
}

impl Granularity {
    /// One-second buckets
    pub const fn second() -> Self {
        Granularity::Duration(1_000)
    }

    /// One-minute buckets
    pub const fn minute() -> Self {
        Granularity::Duration(60_000)
    }

    /// One-hour buckets
    pub const fn hour() -> Self {
        Granularity::Duration(3_600_000)
    }

    /// One-day buckets
    pub const fn day() -> Self {
        Granularity::Duration(86_400_000)
    }

    /// Floor a timestamp to its bucket boundary
    pub fn truncate(&self, millis: i64) -> i64 {
        match self {
            Granularity::None => millis,
            Granularity::Duration(d) => millis.div_euclid(*d) * d,
        }
    }

    /// Start of the bucket following the one containing `millis`
    pub fn next(&self, millis: i64) -> i64 {
        match self {
            Granularity::None => millis.saturating_add(1),
            Granularity::Duration(d) => self.truncate(millis).saturating_add(*d),
        }
    }
}

/// Half-open time interval `[start, end)` in epoch millis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: i64,
    /// End timestamp (exclusive)
    pub end: i64,
}

impl TimeRange {
    /// Create a new time range with validation
    ///
    /// Returns an error if `start > end`.
    pub fn new(start: i64, end: i64) -> Result<Self, crate::error::Error> {
        if start > end {
            return Err(crate::error::Error::Configuration(format!(
                "Invalid time range: start {} > end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Check if a timestamp falls within this range
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Duration of this range in milliseconds
    pub fn duration_ms(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }

    /// Whether the range is degenerate (covers no instant)
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// A row of input data, as seen by the ingestion path
///
/// All name-based accessors take lowercased names; implementations are
/// expected to store or resolve names case-insensitively. Dimension values
/// may be empty or multi-valued.
pub trait InputRow: Send + Sync {
    /// Row timestamp in epoch millis
    fn timestamp_millis(&self) -> i64;

    /// Names of the dimensions this row carries
    fn dimension_names(&self) -> Vec<String>;

    /// Values for one dimension; empty if the row has none
    fn dimension_values(&self, dimension: &str) -> Vec<String>;

    /// Float value of a metric column
    fn float_metric(&self, metric: &str) -> f64;

    /// Raw value of any column
    fn raw_value(&self, column: &str) -> RowValue;
}

/// Map-backed [`InputRow`]
///
/// The canonical way to feed the index: a timestamp, a list of dimension
/// names, and an event map from lowercased column name to value.
///
/// # Example
///
/// ```
/// use magma::types::{InputRow, MapRow};
///
/// let row = MapRow::new(61_000)
///     .with_dimension("host", ["web-01"])
///     .with_metric("latency", 3.5);
///
/// assert_eq!(row.timestamp_millis(), 61_000);
/// assert_eq!(row.dimension_values("host"), vec!["web-01".to_string()]);
/// assert_eq!(row.float_metric("latency"), 3.5);
/// ```
#[derive(Debug, Clone)]
pub struct MapRow {
    timestamp: i64,
    dimensions: Vec<String>,
    event: HashMap<String, RowValue>,
}

impl MapRow {
    /// Create an empty row at the given timestamp
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            dimensions: Vec::new(),
            event: HashMap::new(),
        }
    }

    /// Add a dimension and its values
    ///
    /// The name is lowercased. A single value becomes a plain string; any
    /// other count becomes a multi-valued column.
    pub fn with_dimension<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.to_lowercase();
        let mut values: Vec<String> = values.into_iter().map(Into::into).collect();
        let value = if values.len() == 1 {
            RowValue::String(values.remove(0))
        } else {
            RowValue::Strings(values)
        };
        self.dimensions.push(name.clone());
        self.event.insert(name, value);
        self
    }

    /// Add a float metric
    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.event.insert(name.to_lowercase(), RowValue::Float(value));
        self
    }

    /// Add an arbitrary column value
    pub fn with_value(mut self, name: &str, value: RowValue) -> Self {
        self.event.insert(name.to_lowercase(), value);
        self
    }
}

impl InputRow for MapRow {
    fn timestamp_millis(&self) -> i64 {
        self.timestamp
    }

    fn dimension_names(&self) -> Vec<String> {
        self.dimensions.clone()
    }

    fn dimension_values(&self, dimension: &str) -> Vec<String> {
        match self.event.get(dimension) {
            Some(RowValue::String(s)) => vec![s.clone()],
            Some(RowValue::Strings(values)) => values.clone(),
            _ => Vec::new(),
        }
    }

    /// Float view of a column: floats and longs coerce; numeric strings
    /// parse; everything else reads as 0.0
    fn float_metric(&self, metric: &str) -> f64 {
        match self.event.get(metric) {
            Some(RowValue::Float(v)) => *v,
            Some(RowValue::Long(v)) => *v as f64,
            Some(RowValue::String(s)) => s.parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    fn raw_value(&self, column: &str) -> RowValue {
        self.event.get(column).cloned().unwrap_or(RowValue::Null)
    }
}

/// An aggregated row materialized from the index
///
/// Values preserve insertion order: dimensions in registry order, then
/// aggregators in declaration order, then post-aggregators.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    timestamp: i64,
    values: IndexMap<String, RowValue>,
}

impl Row {
    pub(crate) fn new(timestamp: i64, values: IndexMap<String, RowValue>) -> Self {
        Self { timestamp, values }
    }

    /// Bucket timestamp of this row in epoch millis
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Value of one column, if present
    pub fn get(&self, name: &str) -> Option<&RowValue> {
        self.values.get(name)
    }

    /// All values in materialization order
    pub fn values(&self) -> &IndexMap<String, RowValue> {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granularity_truncate() {
        let minute = Granularity::minute();
        assert_eq!(minute.truncate(0), 0);
        assert_eq!(minute.truncate(59_999), 0);
        assert_eq!(minute.truncate(60_000), 60_000);
        assert_eq!(minute.truncate(119_000), 60_000);
    }

    #[test]
    fn test_granularity_truncate_negative() {
        let minute = Granularity::minute();
        assert_eq!(minute.truncate(-1), -60_000);
        assert_eq!(minute.truncate(-60_000), -60_000);
        assert_eq!(minute.truncate(-60_001), -120_000);
    }

    #[test]
    fn test_granularity_none() {
        assert_eq!(Granularity::None.truncate(1234), 1234);
        assert_eq!(Granularity::None.next(1234), 1235);
    }

    #[test]
    fn test_granularity_next() {
        let hour = Granularity::hour();
        assert_eq!(hour.next(0), 3_600_000);
        assert_eq!(hour.next(3_599_999), 3_600_000);
        assert_eq!(hour.next(3_600_000), 7_200_000);
    }

    #[test]
    fn test_time_range() {
        let range = TimeRange::new(1000, 2000).unwrap();
        assert!(range.contains(1000));
        assert!(range.contains(1999));
        assert!(!range.contains(2000));
        assert_eq!(range.duration_ms(), 1000);
        assert!(TimeRange::new(2000, 1000).is_err());
        assert!(TimeRange::new(1000, 1000).unwrap().is_empty());
    }

    #[test]
    fn test_map_row_dimensions() {
        let row = MapRow::new(0)
            .with_dimension("Host", ["a"])
            .with_dimension("tag", ["b", "a"]);

        assert_eq!(row.dimension_names(), vec!["host", "tag"]);
        assert_eq!(row.dimension_values("host"), vec!["a"]);
        assert_eq!(row.dimension_values("tag"), vec!["b", "a"]);
        assert!(row.dimension_values("missing").is_empty());
    }

    #[test]
    fn test_map_row_float_coercion() {
        let row = MapRow::new(0)
            .with_metric("f", 1.5)
            .with_value("l", RowValue::Long(2))
            .with_value("s", RowValue::String("3.5".to_string()))
            .with_value("junk", RowValue::String("nope".to_string()));

        assert_eq!(row.float_metric("f"), 1.5);
        assert_eq!(row.float_metric("l"), 2.0);
        assert_eq!(row.float_metric("s"), 3.5);
        assert_eq!(row.float_metric("junk"), 0.0);
        assert_eq!(row.float_metric("absent"), 0.0);
    }

    #[test]
    fn test_row_value_as_f64() {
        assert_eq!(RowValue::Float(1.5).as_f64(), Some(1.5));
        assert_eq!(RowValue::Long(3).as_f64(), Some(3.0));
        assert_eq!(RowValue::Null.as_f64(), None);
        assert_eq!(RowValue::String("x".into()).as_f64(), None);
    }
}
