//! Reference buffer aggregators
//!
//! The minimal factory set shipped with the index: a row counter and
//! float sum/max folds. Each packs its running state as a little-endian
//! scalar at the start of its slot region.

use crate::error::Result;
use crate::types::RowValue;

use super::{AggregatorFactory, BufferAggregator, ColumnSelectorFactory, FloatSelector};

fn read_i64(region: &[u8]) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&region[..8]);
    i64::from_le_bytes(bytes)
}

fn read_f64(region: &[u8]) -> f64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&region[..8]);
    f64::from_le_bytes(bytes)
}

/// Counts ingested rows
#[derive(Debug, Clone)]
pub struct CountAggregatorFactory {
    name: String,
}

impl CountAggregatorFactory {
    /// Create a count aggregator emitting under `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl AggregatorFactory for CountAggregatorFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &str {
        "long"
    }

    fn max_intermediate_size(&self) -> usize {
        8
    }

    fn factorize_buffered(
        &self,
        _selectors: &dyn ColumnSelectorFactory,
    ) -> Result<Box<dyn BufferAggregator>> {
        Ok(Box::new(CountBufferAggregator))
    }
}

struct CountBufferAggregator;

impl BufferAggregator for CountBufferAggregator {
    fn init(&mut self, region: &mut [u8]) {
        region[..8].copy_from_slice(&0i64.to_le_bytes());
    }

    fn aggregate(&mut self, region: &mut [u8]) {
        let count = read_i64(region) + 1;
        region[..8].copy_from_slice(&count.to_le_bytes());
    }

    fn get(&self, region: &[u8]) -> RowValue {
        RowValue::Long(read_i64(region))
    }
}

/// Sums a float metric
#[derive(Debug, Clone)]
pub struct DoubleSumAggregatorFactory {
    name: String,
    field_name: String,
}

impl DoubleSumAggregatorFactory {
    /// Sum `field_name`, emitting under `name`
    pub fn new(name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_name: field_name.into(),
        }
    }
}

impl AggregatorFactory for DoubleSumAggregatorFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &str {
        "float"
    }

    fn max_intermediate_size(&self) -> usize {
        8
    }

    fn factorize_buffered(
        &self,
        selectors: &dyn ColumnSelectorFactory,
    ) -> Result<Box<dyn BufferAggregator>> {
        Ok(Box::new(DoubleSumBufferAggregator {
            selector: selectors.float_selector(&self.field_name),
        }))
    }
}

struct DoubleSumBufferAggregator {
    selector: FloatSelector,
}

impl BufferAggregator for DoubleSumBufferAggregator {
    fn init(&mut self, region: &mut [u8]) {
        region[..8].copy_from_slice(&0f64.to_le_bytes());
    }

    fn aggregate(&mut self, region: &mut [u8]) {
        let sum = read_f64(region) + self.selector.get();
        region[..8].copy_from_slice(&sum.to_le_bytes());
    }

    fn get(&self, region: &[u8]) -> RowValue {
        RowValue::Float(read_f64(region))
    }
}

/// Tracks the maximum of a float metric
#[derive(Debug, Clone)]
pub struct DoubleMaxAggregatorFactory {
    name: String,
    field_name: String,
}

impl DoubleMaxAggregatorFactory {
    /// Track the maximum of `field_name`, emitting under `name`
    pub fn new(name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_name: field_name.into(),
        }
    }
}

impl AggregatorFactory for DoubleMaxAggregatorFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &str {
        "float"
    }

    fn max_intermediate_size(&self) -> usize {
        8
    }

    fn factorize_buffered(
        &self,
        selectors: &dyn ColumnSelectorFactory,
    ) -> Result<Box<dyn BufferAggregator>> {
        Ok(Box::new(DoubleMaxBufferAggregator {
            selector: selectors.float_selector(&self.field_name),
        }))
    }
}

struct DoubleMaxBufferAggregator {
    selector: FloatSelector,
}

impl BufferAggregator for DoubleMaxBufferAggregator {
    fn init(&mut self, region: &mut [u8]) {
        region[..8].copy_from_slice(&f64::NEG_INFINITY.to_le_bytes());
    }

    fn aggregate(&mut self, region: &mut [u8]) {
        let max = read_f64(region).max(self.selector.get());
        region[..8].copy_from_slice(&max.to_le_bytes());
    }

    fn get(&self, region: &[u8]) -> RowValue {
        RowValue::Float(read_f64(region))
    }
}
