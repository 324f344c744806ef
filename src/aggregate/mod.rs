//! Aggregator contracts and row-scoped column views
//!
//! The index consumes aggregators through two traits: an
//! [`AggregatorFactory`] describing name, type and intermediate size, and
//! the [`BufferAggregator`] it produces, which keeps all running state
//! inside a caller-supplied byte region. Factories are handed a
//! [`ColumnSelectorFactory`] whose selectors read "the row currently being
//! ingested" from a thread-scoped slot, so aggregators bound at
//! construction time need no per-call row threading.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result, SchemaError};
use crate::types::{InputRow, RowValue, ValueKind};

pub mod builtin;
pub mod post;

thread_local! {
    /// The row currently being ingested on this thread, if any
    static CURRENT_ROW: RefCell<Option<Arc<dyn InputRow>>> = const { RefCell::new(None) };
}

/// RAII publication of the current row to this thread's slot
///
/// The slot is cleared on drop, covering every exit path out of the
/// aggregate loop.
pub(crate) struct RowGuard(());

impl RowGuard {
    pub(crate) fn publish(row: Arc<dyn InputRow>) -> Self {
        CURRENT_ROW.with(|slot| *slot.borrow_mut() = Some(row));
        RowGuard(())
    }
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        CURRENT_ROW.with(|slot| slot.borrow_mut().take());
    }
}

/// Run `f` against the thread's current row
///
/// # Panics
///
/// Panics if no row is published; selectors may only read during an
/// in-flight `add()` on the same thread.
fn with_current_row<T>(f: impl FnOnce(&dyn InputRow) -> T) -> T {
    CURRENT_ROW.with(|slot| {
        let slot = slot.borrow();
        match slot.as_ref() {
            Some(row) => f(row.as_ref()),
            None => panic!("column selectors may only read during an in-flight add()"),
        }
    })
}

/// Describes one aggregator of the schema
pub trait AggregatorFactory: Send + Sync {
    /// Output name; the index lowercases it
    fn name(&self) -> &str;

    /// Declared type name, `"float"` or a registered complex type
    fn type_name(&self) -> &str;

    /// Bytes of intermediate state one row slot must reserve
    fn max_intermediate_size(&self) -> usize;

    /// Produce the buffer aggregator, binding any selectors it needs
    ///
    /// Selector construction fails fast here when a complex type has no
    /// registered serde.
    fn factorize_buffered(
        &self,
        selectors: &dyn ColumnSelectorFactory,
    ) -> Result<Box<dyn BufferAggregator>>;
}

/// Aggregator whose running state lives in a caller-supplied byte region
///
/// Every call receives the region already sliced to this aggregator's
/// `max_intermediate_size`; implementations own its layout entirely.
pub trait BufferAggregator: Send {
    /// Write the initial state into a fresh region
    fn init(&mut self, region: &mut [u8]);

    /// Fold the thread-current row into the region
    fn aggregate(&mut self, region: &mut [u8]);

    /// Read the current result without mutating the region
    fn get(&self, region: &[u8]) -> RowValue;

    /// Release any resources held outside the region
    fn close(&mut self) {}
}

/// Supplies row-scoped selectors to aggregator factories
pub trait ColumnSelectorFactory {
    /// Selector over the current row's timestamp
    fn timestamp_selector(&self) -> TimestampSelector;

    /// Selector over a named float metric
    fn float_selector(&self, metric: &str) -> FloatSelector;

    /// Selector over a named column's raw or serde-extracted value
    fn object_selector(&self, column: &str) -> Result<ObjectSelector>;

    /// Selector over a named dimension's row-local values
    fn dimension_selector(&self, dimension: &str) -> DimensionSelector;
}

/// Reads the current row's epoch-millis timestamp
pub struct TimestampSelector(());

impl TimestampSelector {
    /// Timestamp of the row being ingested
    pub fn get(&self) -> i64 {
        with_current_row(|row| row.timestamp_millis())
    }
}

/// Reads a float metric off the current row
pub struct FloatSelector {
    metric: String,
}

impl FloatSelector {
    /// Float value of the bound metric on the row being ingested
    pub fn get(&self) -> f64 {
        with_current_row(|row| row.float_metric(&self.metric))
    }
}

/// Reads a raw or serde-extracted value off the current row
pub struct ObjectSelector {
    column: String,
    extractor: Option<Arc<dyn ComplexMetricExtractor>>,
}

impl ObjectSelector {
    /// Value of the bound column on the row being ingested
    pub fn get(&self) -> RowValue {
        with_current_row(|row| match &self.extractor {
            Some(extractor) => extractor.extract(row, &self.column),
            None => row.raw_value(&self.column),
        })
    }

    /// Kind of value this selector yields
    pub fn kind(&self) -> ValueKind {
        match &self.extractor {
            Some(extractor) => extractor.extracted_kind(),
            None => ValueKind::Complex,
        }
    }
}

/// Integer-indexed view over one dimension's values in the current row
///
/// Ids index the row-local value list, not any dictionary; cardinality is
/// unknowable while the index is still absorbing writes.
pub struct DimensionSelector {
    dimension: String,
}

impl DimensionSelector {
    /// Row-local indices for the bound dimension, `0..n`
    pub fn row(&self) -> RowIndices {
        with_current_row(|row| {
            let len = row.dimension_values(&self.dimension).len();
            RowIndices {
                ids: (0..len as u32).collect(),
            }
        })
    }

    /// Value at a row-local id
    pub fn lookup_name(&self, id: u32) -> Option<String> {
        with_current_row(|row| {
            row.dimension_values(&self.dimension)
                .get(id as usize)
                .cloned()
        })
    }

    /// Row-local id of a value
    pub fn lookup_id(&self, name: &str) -> Option<u32> {
        with_current_row(|row| {
            row.dimension_values(&self.dimension)
                .iter()
                .position(|value| value == name)
                .map(|position| position as u32)
        })
    }

    /// Always `None`: value cardinality is unknown in an incremental index
    pub fn value_cardinality(&self) -> Option<usize> {
        None
    }
}

/// Indices into one row's value list for a dimension
pub struct RowIndices {
    ids: Vec<u32>,
}

impl RowIndices {
    /// Number of values
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Check if the row carried no values
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Id at `index`
    pub fn get(&self, index: usize) -> Option<u32> {
        self.ids.get(index).copied()
    }

    /// Iterate over all ids
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.ids.iter().copied()
    }
}

/// Extracts a typed value from an input row for a complex metric type
pub trait ComplexMetricExtractor: Send + Sync {
    /// Kind of the extracted values
    fn extracted_kind(&self) -> ValueKind {
        ValueKind::Complex
    }

    /// Extract the typed value of `column` from `row`
    fn extract(&self, row: &dyn InputRow, column: &str) -> RowValue;
}

/// Registry of complex-metric serdes, keyed by declared type name
///
/// Cloning shares the registry, so a schema and the index it configures
/// observe the same registrations.
#[derive(Clone, Default)]
pub struct SerdeRegistry {
    serdes: Arc<RwLock<HashMap<String, Arc<dyn ComplexMetricExtractor>>>>,
}

impl SerdeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the extractor for a type name (lowercased)
    pub fn register(&self, type_name: &str, extractor: Arc<dyn ComplexMetricExtractor>) {
        self.serdes
            .write()
            .insert(type_name.to_lowercase(), extractor);
    }

    /// Extractor registered for a type name, if any
    pub fn serde_for(&self, type_name: &str) -> Option<Arc<dyn ComplexMetricExtractor>> {
        self.serdes.read().get(&type_name.to_lowercase()).cloned()
    }
}

/// The selector factory the index hands to aggregator factories
///
/// Carries the aggregator's declared type so object selectors know when
/// to consult the serde registry.
pub(crate) struct IngestSelectors<'a> {
    type_name: &'a str,
    deserialize_complex_metrics: bool,
    serdes: &'a SerdeRegistry,
}

impl<'a> IngestSelectors<'a> {
    pub(crate) fn new(
        type_name: &'a str,
        deserialize_complex_metrics: bool,
        serdes: &'a SerdeRegistry,
    ) -> Self {
        Self {
            type_name,
            deserialize_complex_metrics,
            serdes,
        }
    }
}

impl ColumnSelectorFactory for IngestSelectors<'_> {
    fn timestamp_selector(&self) -> TimestampSelector {
        TimestampSelector(())
    }

    fn float_selector(&self, metric: &str) -> FloatSelector {
        FloatSelector {
            metric: metric.to_lowercase(),
        }
    }

    fn object_selector(&self, column: &str) -> Result<ObjectSelector> {
        let column = column.to_lowercase();
        if !self.deserialize_complex_metrics || self.type_name.eq_ignore_ascii_case("float") {
            return Ok(ObjectSelector {
                column,
                extractor: None,
            });
        }
        let extractor = self.serdes.serde_for(self.type_name).ok_or_else(|| {
            Error::from(SchemaError::UnknownType {
                type_name: self.type_name.to_string(),
            })
        })?;
        Ok(ObjectSelector {
            column,
            extractor: Some(extractor),
        })
    }

    fn dimension_selector(&self, dimension: &str) -> DimensionSelector {
        DimensionSelector {
            dimension: dimension.to_lowercase(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MapRow;

    fn publish(row: MapRow) -> RowGuard {
        RowGuard::publish(Arc::new(row))
    }

    #[test]
    fn test_selectors_read_published_row() {
        let serdes = SerdeRegistry::new();
        let factory = IngestSelectors::new("float", true, &serdes);

        let _guard = publish(
            MapRow::new(1234)
                .with_dimension("tag", ["x", "y"])
                .with_metric("latency", 2.5),
        );

        assert_eq!(factory.timestamp_selector().get(), 1234);
        assert_eq!(factory.float_selector("LATENCY").get(), 2.5);
        assert_eq!(
            factory.object_selector("latency").unwrap().get(),
            RowValue::Float(2.5)
        );

        let dim = factory.dimension_selector("tag");
        let indices = dim.row();
        assert_eq!(indices.len(), 2);
        assert_eq!(indices.iter().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(dim.lookup_name(1).as_deref(), Some("y"));
        assert_eq!(dim.lookup_id("x"), Some(0));
        assert_eq!(dim.lookup_id("missing"), None);
        assert_eq!(dim.value_cardinality(), None);
    }

    #[test]
    fn test_row_guard_clears_slot() {
        {
            let _guard = publish(MapRow::new(1));
            assert_eq!(TimestampSelector(()).get(), 1);
        }
        let cleared = CURRENT_ROW.with(|slot| slot.borrow().is_none());
        assert!(cleared);
    }

    #[test]
    fn test_unknown_complex_type_fails_fast() {
        let serdes = SerdeRegistry::new();
        let factory = IngestSelectors::new("hyperUnique", true, &serdes);
        assert!(matches!(
            factory.object_selector("col"),
            Err(Error::Schema(SchemaError::UnknownType { .. }))
        ));
    }

    #[test]
    fn test_registered_serde_extracts() {
        struct FirstByte;
        impl ComplexMetricExtractor for FirstByte {
            fn extract(&self, row: &dyn InputRow, column: &str) -> RowValue {
                match row.raw_value(column) {
                    RowValue::String(s) => {
                        RowValue::Bytes(s.into_bytes().into_iter().take(1).collect())
                    }
                    other => other,
                }
            }
        }

        let serdes = SerdeRegistry::new();
        serdes.register("sketch", Arc::new(FirstByte));

        let factory = IngestSelectors::new("sketch", true, &serdes);
        let selector = factory.object_selector("payload").unwrap();

        let _guard = publish(
            MapRow::new(0).with_value("payload", RowValue::String("abc".to_string())),
        );
        assert_eq!(selector.get(), RowValue::Bytes(vec![b'a']));
    }

    #[test]
    fn test_raw_selector_when_deserialization_disabled() {
        let serdes = SerdeRegistry::new();
        // No serde registered, but deserialization is off: raw passthrough.
        let factory = IngestSelectors::new("sketch", false, &serdes);
        let selector = factory.object_selector("payload").unwrap();

        let _guard = publish(
            MapRow::new(0).with_value("payload", RowValue::Long(7)),
        );
        assert_eq!(selector.get(), RowValue::Long(7));
    }
}
