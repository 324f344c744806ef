//! The incremental index: ingestion, iteration and lifecycle
//!
//! [`IncrementalIndex`] is the mutable write-side tier of a column store.
//! It absorbs timestamped rows, merging rows that share a (truncated
//! timestamp, dimension-value tuple) key into one slot of a fixed-capacity
//! arena, where every aggregator keeps its intermediate state. Once the
//! arena fills up, the index is handed off for conversion into immutable
//! segments; readers can iterate it at any point to materialize aggregated
//! rows in key order.
//!
//! Locking is layered so the steady state stays parallel:
//! - the **registry mutex** is held only while resolving a row's
//!   dimensions (shape changes are rare after warm-up);
//! - the **insertion mutex** is held only around slot reservation;
//! - one **mutex per aggregator** serializes mutations of that metric's
//!   regions, letting different metrics of the same row proceed in
//!   parallel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, warn};

use crate::aggregate::post::PostAggregator;
use crate::aggregate::{AggregatorFactory, BufferAggregator, IngestSelectors, RowGuard};
use crate::config::{IndexSchema, RowTransform};
use crate::error::{IngestError, Result};
use crate::pool::{Arena, ArenaHolder, ArenaPool};
use crate::types::{
    ColumnCapabilities, Granularity, InputRow, Row, RowValue, TimeRange, ValueKind,
};

pub mod dictionary;
mod facts;
pub mod key;

use dictionary::{DimDict, DimensionHolder};
use facts::FactMap;
use key::TimeAndDims;

/// Ordered set of discovered dimension names
///
/// Append-only; positions are assigned in discovery order and never move.
#[derive(Default)]
struct DimensionRegistry {
    positions: HashMap<String, usize>,
    names: Vec<String>,
}

impl DimensionRegistry {
    fn len(&self) -> usize {
        self.names.len()
    }

    fn index_of(&self, dimension: &str) -> Option<usize> {
        self.positions.get(dimension).copied()
    }

    fn append(&mut self, dimension: String) -> usize {
        let position = self.names.len();
        self.positions.insert(dimension.clone(), position);
        self.names.push(dimension);
        position
    }
}

/// One aggregator bound into the index: its slot layout plus the lock that
/// serializes every touch of its regions
struct MetricBinding {
    name: String,
    type_name: String,
    offset: usize,
    size: usize,
    factory: Arc<dyn AggregatorFactory>,
    agg: Mutex<Box<dyn BufferAggregator>>,
}

/// Incremental, in-memory, column-oriented aggregation index
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use magma::aggregate::builtin::CountAggregatorFactory;
/// use magma::config::IndexSchema;
/// use magma::index::IncrementalIndex;
/// use magma::pool::ArenaPool;
/// use magma::types::{Granularity, MapRow, RowValue};
///
/// let schema = IndexSchema::builder()
///     .with_granularity(Granularity::minute())
///     .with_metric(Arc::new(CountAggregatorFactory::new("count")))
///     .build()
///     .unwrap();
/// let pool = ArenaPool::new(1024);
/// let index = IncrementalIndex::new(schema, &pool).unwrap();
///
/// index.add(Arc::new(MapRow::new(61_000).with_dimension("host", ["a"]))).unwrap();
/// index.add(Arc::new(MapRow::new(119_000).with_dimension("host", ["a"]))).unwrap();
///
/// let rows: Vec<_> = index.iter().collect();
/// assert_eq!(rows.len(), 1);
/// assert_eq!(rows[0].timestamp(), 60_000);
/// assert_eq!(rows[0].get("count"), Some(&RowValue::Long(2)));
/// ```
pub struct IncrementalIndex {
    min_timestamp: i64,
    granularity: Granularity,
    transforms: Vec<RowTransform>,
    metrics: Vec<MetricBinding>,
    metric_indexes: HashMap<String, usize>,
    stride: usize,
    registry: Mutex<DimensionRegistry>,
    capabilities: RwLock<HashMap<String, ColumnCapabilities>>,
    dim_values: DimensionHolder,
    facts: FactMap,
    holder: RwLock<ArenaHolder>,
    num_entries: AtomicUsize,
    insert_lock: Mutex<()>,
    closed: AtomicBool,
}

impl IncrementalIndex {
    /// Build an index from a schema, acquiring an arena from `pool`
    ///
    /// Binds every aggregator up front; a complex metric type without a
    /// registered serde fails here, not at first ingest.
    pub fn new(schema: IndexSchema, pool: &Arc<ArenaPool>) -> Result<Self> {
        let IndexSchema {
            min_timestamp,
            granularity,
            metrics,
            deserialize_complex_metrics,
            reclaimable_interning,
            serdes,
            transforms,
        } = schema;

        let mut bindings = Vec::with_capacity(metrics.len());
        let mut metric_indexes = HashMap::with_capacity(metrics.len());
        let mut capabilities = HashMap::new();
        let mut offset = 0;
        for (position, factory) in metrics.into_iter().enumerate() {
            let name = factory.name().to_lowercase();
            let type_name = factory.type_name().to_string();
            let agg = factory.factorize_buffered(&IngestSelectors::new(
                &type_name,
                deserialize_complex_metrics,
                &serdes,
            ))?;
            let size = factory.max_intermediate_size();

            let kind = if type_name.eq_ignore_ascii_case("float") {
                ValueKind::Float
            } else {
                ValueKind::Complex
            };
            capabilities.insert(name.clone(), ColumnCapabilities::metric(kind));
            metric_indexes.insert(name.clone(), position);
            bindings.push(MetricBinding {
                name,
                type_name,
                offset,
                size,
                factory,
                agg: Mutex::new(agg),
            });
            offset += size;
        }
        let stride = offset;

        let holder = pool.take();
        debug!(
            metrics = bindings.len(),
            stride,
            capacity = pool.arena_capacity(),
            "created incremental index"
        );

        Ok(Self {
            min_timestamp,
            granularity,
            transforms,
            metrics: bindings,
            metric_indexes,
            stride,
            registry: Mutex::new(DimensionRegistry::default()),
            capabilities: RwLock::new(capabilities),
            dim_values: DimensionHolder::new(reclaimable_interning),
            facts: FactMap::new(),
            holder: RwLock::new(holder),
            num_entries: AtomicUsize::new(0),
            insert_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Add a row, merging it into an existing slot when its key collides
    ///
    /// Thread-safe; returns the post-insert row count. Fails with
    /// [`IngestError::BelowMinTimestamp`] for rows before the minimum
    /// timestamp and [`IngestError::ArenaFull`] when no slot is left, in
    /// which case the tentative key has already been rolled back and the
    /// index stays usable.
    pub fn add(&self, row: Arc<dyn InputRow>) -> Result<usize> {
        let holder = self.holder.read();
        let Some(arena) = holder.arena() else {
            return Err(IngestError::IndexClosed.into());
        };

        let row = self.transform(row)?;
        let timestamp = row.timestamp_millis();
        if timestamp < self.min_timestamp {
            return Err(IngestError::BelowMinTimestamp {
                timestamp,
                min_timestamp: self.min_timestamp,
            }
            .into());
        }

        let dims = self.resolve_dimensions(row.as_ref())?;
        let key = TimeAndDims::new(
            self.granularity.truncate(timestamp).max(self.min_timestamp),
            dims,
        );

        let row_offset = self.reserve_slot(arena, key)?;

        // Publish the row for the selectors; the guard clears the slot on
        // every exit path.
        let _guard = RowGuard::publish(Arc::clone(&row));
        for (position, binding) in self.metrics.iter().enumerate() {
            let mut agg = binding.agg.lock();
            // Safety: this metric's regions are only ever touched under
            // its binding lock, held here; regions of other metrics are
            // disjoint by construction.
            let region = unsafe {
                arena.slice_at(self.metric_position(row_offset, position), binding.size)
            };
            agg.aggregate(region);
        }

        Ok(self.num_entries.load(Ordering::Acquire))
    }

    fn transform(&self, mut row: Arc<dyn InputRow>) -> Result<Arc<dyn InputRow>> {
        for transform in &self.transforms {
            row = transform(row).ok_or(IngestError::TransformerYieldedNull)?;
        }
        Ok(row)
    }

    /// Resolve the row's dimensions into a value tuple aligned to the
    /// registry, discovering new dimensions as they appear
    fn resolve_dimensions(&self, row: &dyn InputRow) -> Result<Vec<Option<Vec<Arc<str>>>>> {
        let row_dimensions = row.dimension_names();

        let mut overflow: Vec<Vec<Arc<str>>> = Vec::new();
        let mut dims;
        {
            let mut registry = self.registry.lock();
            dims = vec![None; registry.len()];
            for dimension in row_dimensions {
                let dimension = dimension.to_lowercase();
                let values = row.dimension_values(&dimension);

                {
                    let mut capabilities = self.capabilities.write();
                    let entry = capabilities
                        .entry(dimension.clone())
                        .or_insert_with(ColumnCapabilities::string);
                    if values.len() > 1 {
                        entry.has_multiple_values = true;
                    }
                }

                match registry.index_of(&dimension) {
                    Some(position) => {
                        if let Some(dict) = self.dim_values.get(&dimension) {
                            dims[position] = Some(normalized_values(&dict, &values));
                        }
                    }
                    None => {
                        registry.append(dimension.clone());
                        let dict = self.dim_values.add(&dimension)?;
                        debug!(dimension = %dimension, "discovered new dimension");
                        overflow.push(normalized_values(&dict, &values));
                    }
                }
            }
        }

        // New dimensions land on the tail, after the registry mutex is
        // released, in the same order they were appended above.
        dims.extend(overflow.into_iter().map(Some));
        Ok(dims)
    }

    /// Reserve the slot for `key`, initializing aggregators on a fresh
    /// insert; reuses the prior offset on a key collision
    fn reserve_slot(&self, arena: &Arena, key: TimeAndDims) -> Result<usize> {
        let _guard = self.insert_lock.lock();
        let tentative = self.stride * self.num_entries.load(Ordering::Acquire);
        match self.facts.put_if_absent(key.clone(), tentative) {
            Some(previous) => Ok(previous),
            None => {
                if tentative + self.stride > arena.capacity() {
                    self.facts.remove(&key);
                    let entries = self.num_entries.load(Ordering::Acquire);
                    warn!(entries, "arena full, rejecting row");
                    return Err(IngestError::ArenaFull { entries }.into());
                }
                self.num_entries.fetch_add(1, Ordering::AcqRel);
                for (position, binding) in self.metrics.iter().enumerate() {
                    let mut agg = binding.agg.lock();
                    // Safety: same discipline as the aggregate loop; the
                    // binding lock is held and this slot's regions belong
                    // to no other key.
                    let region = unsafe {
                        arena.slice_at(self.metric_position(tentative, position), binding.size)
                    };
                    agg.init(region);
                }
                Ok(tentative)
            }
        }
    }

    /// Number of distinct keys resident
    pub fn size(&self) -> usize {
        self.num_entries.load(Ordering::Acquire)
    }

    /// Check whether any row has been absorbed
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Minimum timestamp rows must reach to be accepted
    pub fn min_timestamp(&self) -> i64 {
        self.min_timestamp
    }

    /// Bucketing granularity
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Earliest bucket timestamp, absent when empty
    pub fn min_time_millis(&self) -> Option<i64> {
        self.facts.first_key().map(|key| key.timestamp())
    }

    /// Latest bucket timestamp, absent when empty
    pub fn max_time_millis(&self) -> Option<i64> {
        self.facts.last_key().map(|key| key.timestamp())
    }

    /// Earliest bucket time, absent when empty
    pub fn min_time(&self) -> Option<DateTime<Utc>> {
        self.min_time_millis().and_then(DateTime::from_timestamp_millis)
    }

    /// Latest bucket time, absent when empty
    pub fn max_time(&self) -> Option<DateTime<Utc>> {
        self.max_time_millis().and_then(DateTime::from_timestamp_millis)
    }

    /// Covered interval `[min_timestamp, granularity.next(max))`,
    /// degenerating to `[min_timestamp, min_timestamp)` when empty
    pub fn interval(&self) -> TimeRange {
        let end = match self.max_time_millis() {
            Some(max) => self.granularity.next(max),
            None => self.min_timestamp,
        };
        TimeRange {
            start: self.min_timestamp,
            end,
        }
    }

    /// Discovered dimension names in registry order
    pub fn dimensions(&self) -> Vec<String> {
        self.registry.lock().names.clone()
    }

    /// Registry position of a dimension, if discovered
    pub fn dimension_index(&self, dimension: &str) -> Option<usize> {
        self.registry.lock().index_of(&dimension.to_lowercase())
    }

    /// Dictionary of a discovered dimension
    pub fn dimension(&self, dimension: &str) -> Option<Arc<DimDict>> {
        self.dim_values.get(&dimension.to_lowercase())
    }

    /// Declared type name of a metric
    pub fn metric_type(&self, metric: &str) -> Option<String> {
        self.metric_indexes
            .get(&metric.to_lowercase())
            .map(|&position| self.metrics[position].type_name.clone())
    }

    /// Metric names in declaration order
    pub fn metric_names(&self) -> Vec<String> {
        self.metrics.iter().map(|binding| binding.name.clone()).collect()
    }

    /// Declaration position of a metric
    pub fn metric_index(&self, metric: &str) -> Option<usize> {
        self.metric_indexes.get(&metric.to_lowercase()).copied()
    }

    /// Factories of all bound aggregators, in declaration order
    pub fn metric_factories(&self) -> Vec<Arc<dyn AggregatorFactory>> {
        self.metrics
            .iter()
            .map(|binding| Arc::clone(&binding.factory))
            .collect()
    }

    /// Capabilities of a column, if the column is known
    pub fn capabilities(&self, column: &str) -> Option<ColumnCapabilities> {
        self.capabilities.read().get(&column.to_lowercase()).copied()
    }

    /// Byte position of metric `metric_index`'s region within the row
    /// slot at `row_offset`
    ///
    /// Pairs with the slot offsets handed out by [`facts`](Self::facts)
    /// when a slot is read back, e.g. during segment conversion.
    pub(crate) fn metric_position(&self, row_offset: usize, metric_index: usize) -> usize {
        row_offset + self.metrics[metric_index].offset
    }

    /// Ordered snapshot of all (key, slot offset) facts
    pub fn facts(&self) -> Vec<(TimeAndDims, usize)> {
        self.facts.snapshot()
    }

    /// Ordered snapshot of facts with keys in `[lo, hi)`
    pub fn sub_map(&self, lo: &TimeAndDims, hi: &TimeAndDims) -> Vec<(TimeAndDims, usize)> {
        self.facts.range(lo, hi)
    }

    /// Iterate materialized rows in key order
    pub fn iter(&self) -> RowIter<'_> {
        self.iter_with_post_aggs(Vec::new())
    }

    /// Iterate materialized rows, applying `post_aggs` in declared order
    /// to each row
    ///
    /// The iterator works off an ordered key snapshot taken here; rows
    /// added afterwards appear in the next iteration. Aggregator state is
    /// read, never mutated. The index cannot close while an iterator is
    /// alive.
    pub fn iter_with_post_aggs(&self, post_aggs: Vec<Arc<dyn PostAggregator>>) -> RowIter<'_> {
        let holder = self.holder.read();
        let entries = self.facts.snapshot();
        // Registry snapshot after the fact snapshot: every key in the
        // snapshot fits within these names.
        let dimensions = self.dimensions();
        RowIter {
            index: self,
            holder,
            dimensions,
            entries: entries.into_iter(),
            post_aggs,
        }
    }

    /// Release the arena and tear down the fact map and dictionaries
    ///
    /// Idempotent; succeeds on an empty index. Blocks until in-flight
    /// adds and live iterators finish.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(
            entries = self.size(),
            facts = self.facts.len(),
            "closing incremental index"
        );
        let mut holder = self.holder.write();
        self.facts.clear();
        self.dim_values.clear();
        holder.close();
        Ok(())
    }
}

impl Drop for IncrementalIndex {
    fn drop(&mut self) {
        if self.close().is_err() {
            warn!("failed to close incremental index on drop");
        }
    }
}

impl<'a> IntoIterator for &'a IncrementalIndex {
    type Item = Row;
    type IntoIter = RowIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Intern and sort one dimension's values
///
/// Interning adds unseen values first and canonicalizes against the
/// post-add state, so the tuple always holds the dictionary's own handles.
fn normalized_values(dict: &DimDict, values: &[String]) -> Vec<Arc<str>> {
    let mut canonical: Vec<Arc<str>> = values
        .iter()
        .map(|value| dict.add_if_absent(value).1)
        .collect();
    canonical.sort_unstable();
    canonical
}

/// Lazy key-ordered iterator over materialized rows
pub struct RowIter<'a> {
    index: &'a IncrementalIndex,
    holder: RwLockReadGuard<'a, ArenaHolder>,
    dimensions: Vec<String>,
    entries: std::vec::IntoIter<(TimeAndDims, usize)>,
    post_aggs: Vec<Arc<dyn PostAggregator>>,
}

impl RowIter<'_> {
    fn materialize(&self, arena: &Arena, key: &TimeAndDims, row_offset: usize) -> Row {
        let mut values = IndexMap::with_capacity(
            key.dims().len() + self.index.metrics.len() + self.post_aggs.len(),
        );

        for (position, tuple) in key.dims().iter().enumerate() {
            let Some(tuple) = tuple else { continue };
            if tuple.is_empty() {
                continue;
            }
            let Some(name) = self.dimensions.get(position) else {
                continue;
            };
            let value = if tuple.len() == 1 {
                RowValue::String(tuple[0].to_string())
            } else {
                RowValue::Strings(tuple.iter().map(|v| v.to_string()).collect())
            };
            values.insert(name.clone(), value);
        }

        for (position, binding) in self.index.metrics.iter().enumerate() {
            let agg = binding.agg.lock();
            // Safety: the binding lock is held, so no writer touches this
            // metric's regions while we read.
            let region = unsafe {
                arena.slice_at(self.index.metric_position(row_offset, position), binding.size)
            };
            values.insert(binding.name.clone(), agg.get(region));
        }

        for post in &self.post_aggs {
            let value = post.compute(&values);
            values.insert(post.name().to_string(), value);
        }

        Row::new(key.timestamp(), values)
    }
}

impl Iterator for RowIter<'_> {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        let (key, row_offset) = self.entries.next()?;
        let arena = self.holder.arena()?;
        Some(self.materialize(arena, &key, row_offset))
    }
}
