//! Index schema configuration
//!
//! An [`IndexSchema`] carries everything an index needs at construction:
//! the minimum timestamp, the bucketing granularity, the aggregator
//! factories, the complex-metric serde registry, the row transformer
//! chain, and the two behavior flags (complex-metric deserialization and
//! reclaimable interning).

use std::sync::Arc;

use crate::aggregate::{AggregatorFactory, SerdeRegistry};
use crate::error::{Error, SchemaError};
use crate::types::{Granularity, InputRow};

/// A step of the row transformer chain
///
/// Transformers run in order before any other ingestion work; returning
/// `None` is an invariant violation surfaced as
/// [`IngestError::TransformerYieldedNull`](crate::error::IngestError).
pub type RowTransform = Arc<dyn Fn(Arc<dyn InputRow>) -> Option<Arc<dyn InputRow>> + Send + Sync>;

/// Construction-time description of an index
pub struct IndexSchema {
    pub(crate) min_timestamp: i64,
    pub(crate) granularity: Granularity,
    pub(crate) metrics: Vec<Arc<dyn AggregatorFactory>>,
    pub(crate) deserialize_complex_metrics: bool,
    pub(crate) reclaimable_interning: bool,
    pub(crate) serdes: SerdeRegistry,
    pub(crate) transforms: Vec<RowTransform>,
}

impl IndexSchema {
    /// Start building a schema
    pub fn builder() -> IndexSchemaBuilder {
        IndexSchemaBuilder::default()
    }

    /// Rows below this timestamp are rejected
    pub fn min_timestamp(&self) -> i64 {
        self.min_timestamp
    }

    /// Timestamp bucketing applied to every row
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }
}

/// Builder for [`IndexSchema`]
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use magma::aggregate::builtin::CountAggregatorFactory;
/// use magma::config::IndexSchema;
/// use magma::types::Granularity;
///
/// let schema = IndexSchema::builder()
///     .with_min_timestamp(0)
///     .with_granularity(Granularity::minute())
///     .with_metric(Arc::new(CountAggregatorFactory::new("count")))
///     .build()
///     .unwrap();
/// assert_eq!(schema.min_timestamp(), 0);
/// ```
#[derive(Default)]
pub struct IndexSchemaBuilder {
    min_timestamp: i64,
    granularity: Option<Granularity>,
    metrics: Vec<Arc<dyn AggregatorFactory>>,
    deserialize_complex_metrics: Option<bool>,
    reclaimable_interning: bool,
    serdes: Option<SerdeRegistry>,
    transforms: Vec<RowTransform>,
}

impl IndexSchemaBuilder {
    /// Reject rows earlier than `min_timestamp` (default 0)
    pub fn with_min_timestamp(mut self, min_timestamp: i64) -> Self {
        self.min_timestamp = min_timestamp;
        self
    }

    /// Bucket row timestamps with `granularity` (default none)
    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = Some(granularity);
        self
    }

    /// Append one aggregator
    pub fn with_metric(mut self, metric: Arc<dyn AggregatorFactory>) -> Self {
        self.metrics.push(metric);
        self
    }

    /// Append several aggregators
    pub fn with_metrics(mut self, metrics: impl IntoIterator<Item = Arc<dyn AggregatorFactory>>) -> Self {
        self.metrics.extend(metrics);
        self
    }

    /// Use an existing serde registry instead of an empty one
    pub fn with_serde_registry(mut self, serdes: SerdeRegistry) -> Self {
        self.serdes = Some(serdes);
        self
    }

    /// Append one row transformer
    pub fn with_transform(mut self, transform: RowTransform) -> Self {
        self.transforms.push(transform);
        self
    }

    /// Whether object selectors run complex values through their serde
    /// (default true); intermediate-tier indexes that re-aggregate
    /// already-extracted values turn this off
    pub fn deserialize_complex_metrics(mut self, enabled: bool) -> Self {
        self.deserialize_complex_metrics = Some(enabled);
        self
    }

    /// Use the shared bounded canonicalization cache instead of
    /// per-dictionary retaining interners (default false)
    ///
    /// This flag is authoritative; nothing overrides it later.
    pub fn reclaimable_interning(mut self, enabled: bool) -> Self {
        self.reclaimable_interning = enabled;
        self
    }

    /// Validate and build the schema
    pub fn build(self) -> Result<IndexSchema, Error> {
        let granularity = self.granularity.unwrap_or(Granularity::None);
        if let Granularity::Duration(d) = granularity {
            if d <= 0 {
                return Err(Error::Configuration(format!(
                    "Granularity duration must be positive, got {}",
                    d
                )));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for metric in &self.metrics {
            let name = metric.name().to_lowercase();
            if !seen.insert(name.clone()) {
                return Err(SchemaError::DuplicateMetric { name }.into());
            }
        }

        Ok(IndexSchema {
            min_timestamp: self.min_timestamp,
            granularity,
            metrics: self.metrics,
            deserialize_complex_metrics: self.deserialize_complex_metrics.unwrap_or(true),
            reclaimable_interning: self.reclaimable_interning,
            serdes: self.serdes.unwrap_or_default(),
            transforms: self.transforms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::builtin::{CountAggregatorFactory, DoubleSumAggregatorFactory};

    #[test]
    fn test_defaults() {
        let schema = IndexSchema::builder().build().unwrap();
        assert_eq!(schema.min_timestamp(), 0);
        assert_eq!(schema.granularity(), Granularity::None);
        assert!(schema.deserialize_complex_metrics);
        assert!(!schema.reclaimable_interning);
    }

    #[test]
    fn test_duplicate_metric_rejected() {
        let result = IndexSchema::builder()
            .with_metric(Arc::new(CountAggregatorFactory::new("count")))
            .with_metric(Arc::new(DoubleSumAggregatorFactory::new("Count", "value")))
            .build();
        assert!(matches!(
            result,
            Err(Error::Schema(SchemaError::DuplicateMetric { .. }))
        ));
    }

    #[test]
    fn test_invalid_granularity_rejected() {
        let result = IndexSchema::builder()
            .with_granularity(Granularity::Duration(0))
            .build();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
