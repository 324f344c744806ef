//! Error types for the index

use thiserror::Error;

/// Main error type for the index
#[derive(Error, Debug)]
pub enum Error {
    /// Ingestion error
    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    /// Dictionary error
    #[error("Dictionary error: {0}")]
    Dictionary(#[from] DictionaryError),

    /// Schema error
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ingestion errors
///
/// Row-level failures (`BelowMinTimestamp`, `ArenaFull`) leave the index
/// usable; the row is rejected and nothing else changes. The invariant
/// violation (`TransformerYieldedNull`) leaves it in an undefined state.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Row timestamp is earlier than the index's minimum timestamp
    #[error("Cannot add row at {timestamp}: below the minimum timestamp {min_timestamp}")]
    BelowMinTimestamp {
        /// The rejected row's timestamp in epoch millis
        timestamp: i64,
        /// The index's configured minimum timestamp
        min_timestamp: i64,
    },

    /// The arena has no room for another row slot
    ///
    /// The tentative key has already been removed from the fact map when
    /// this is returned. Callers are expected to hand the index off and
    /// swap in a fresh one.
    #[error("Arena full, cannot add more rows: current row count {entries}")]
    ArenaFull {
        /// Number of rows already resident
        entries: usize,
    },

    /// A row transformer returned nothing
    #[error("Row transformer yielded no row")]
    TransformerYieldedNull,

    /// The index has been closed
    #[error("Index is closed")]
    IndexClosed,
}

/// Dimension dictionary errors
#[derive(Error, Debug)]
pub enum DictionaryError {
    /// Sorted-rank lookup before `sort()` was called
    #[error("Dictionary is not sorted: call sort() before rank lookups")]
    NotSorted,

    /// A dictionary was created twice for the same dimension
    ///
    /// Internal invariant violation; the index state is undefined.
    #[error("Dictionary for dimension '{dimension}' already exists")]
    DuplicateDimension {
        /// The offending dimension name
        dimension: String,
    },

    /// Sorted-rank lookup for a value the dictionary does not hold
    #[error("Value '{value}' is not in the dictionary")]
    UnknownValue {
        /// The value that was looked up
        value: String,
    },

    /// Sorted-value lookup with a rank past the end of the sorted view
    #[error("Rank {rank} is out of range for a dictionary of {len} values")]
    RankOutOfRange {
        /// The requested rank
        rank: u32,
        /// Number of values in the sorted view
        len: usize,
    },
}

/// Schema errors, surfaced at index construction
#[derive(Error, Debug)]
pub enum SchemaError {
    /// No complex-metric serde registered for a non-float aggregator type
    #[error("No serde registered for metric type '{type_name}'")]
    UnknownType {
        /// The declared aggregator type name
        type_name: String,
    },

    /// Two aggregators share a (lowercased) name
    #[error("Duplicate metric name '{name}'")]
    DuplicateMetric {
        /// The duplicated metric name
        name: String,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
