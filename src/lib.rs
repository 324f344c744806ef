//! Magma - incremental, in-memory, column-oriented aggregation index
//!
//! This library provides the mutable write-side tier of a column store:
//! - On-the-fly ingestion of timestamped rows with per-key aggregation merge
//! - Packed fixed-capacity arena holding all aggregator intermediate state
//! - Per-dimension string dictionaries with canonical interning
//! - Dynamic dimension discovery under concurrent ingestion
//! - Key-ordered iteration materializing aggregated rows

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregate;
pub mod config;
pub mod error;
pub mod index;
pub mod pool;
pub mod types;

// Re-export main types
pub use aggregate::{AggregatorFactory, BufferAggregator, ColumnSelectorFactory};
pub use config::{IndexSchema, IndexSchemaBuilder};
pub use error::{Error, Result};
pub use index::IncrementalIndex;
pub use pool::ArenaPool;
pub use types::{Granularity, InputRow, MapRow, Row, RowValue};
