//! Post-aggregators applied during row iteration
//!
//! Post-aggregators compute over the already-materialized outputs of a
//! row; they never touch aggregator state. The index applies them in
//! declared order, so later ones can read earlier results.

use indexmap::IndexMap;

use crate::types::RowValue;

/// Computation over a materialized row's outputs
pub trait PostAggregator: Send + Sync {
    /// Name the result is inserted under
    fn name(&self) -> &str;

    /// Compute the result from the values materialized so far
    fn compute(&self, values: &IndexMap<String, RowValue>) -> RowValue;
}

/// Re-emits one field under a new name
pub struct FieldAccessPostAggregator {
    name: String,
    field: String,
}

impl FieldAccessPostAggregator {
    /// Emit `field` under `name`
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
        }
    }
}

impl PostAggregator for FieldAccessPostAggregator {
    fn name(&self) -> &str {
        &self.name
    }

    fn compute(&self, values: &IndexMap<String, RowValue>) -> RowValue {
        values.get(&self.field).cloned().unwrap_or(RowValue::Null)
    }
}

/// Arithmetic over the numeric views of named fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    /// Sum of all fields
    Add,
    /// First field minus the rest
    Subtract,
    /// Product of all fields
    Multiply,
    /// First field divided by the rest; division by zero yields 0.0
    Divide,
}

/// Folds the numeric values of `fields` with one arithmetic operator
pub struct ArithmeticPostAggregator {
    name: String,
    op: ArithmeticOp,
    fields: Vec<String>,
}

impl ArithmeticPostAggregator {
    /// Apply `op` across `fields`, emitting under `name`
    pub fn new(name: impl Into<String>, op: ArithmeticOp, fields: Vec<String>) -> Self {
        Self {
            name: name.into(),
            op,
            fields,
        }
    }
}

impl PostAggregator for ArithmeticPostAggregator {
    fn name(&self) -> &str {
        &self.name
    }

    fn compute(&self, values: &IndexMap<String, RowValue>) -> RowValue {
        let mut operands = self
            .fields
            .iter()
            .map(|field| values.get(field).and_then(RowValue::as_f64).unwrap_or(0.0));

        let Some(first) = operands.next() else {
            return RowValue::Null;
        };
        let result = operands.fold(first, |acc, operand| match self.op {
            ArithmeticOp::Add => acc + operand,
            ArithmeticOp::Subtract => acc - operand,
            ArithmeticOp::Multiply => acc * operand,
            ArithmeticOp::Divide => {
                if operand == 0.0 {
                    0.0
                } else {
                    acc / operand
                }
            }
        });
        RowValue::Float(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn materialized(entries: &[(&str, RowValue)]) -> IndexMap<String, RowValue> {
        entries
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_field_access() {
        let values = materialized(&[("count", RowValue::Long(3))]);
        let post = FieldAccessPostAggregator::new("rows", "count");
        assert_eq!(post.compute(&values), RowValue::Long(3));

        let missing = FieldAccessPostAggregator::new("rows", "absent");
        assert_eq!(missing.compute(&values), RowValue::Null);
    }

    #[test]
    fn test_arithmetic_average() {
        let values = materialized(&[
            ("total", RowValue::Float(6.0)),
            ("count", RowValue::Long(3)),
        ]);
        let avg = ArithmeticPostAggregator::new(
            "avg",
            ArithmeticOp::Divide,
            vec!["total".to_string(), "count".to_string()],
        );
        assert_eq!(avg.compute(&values), RowValue::Float(2.0));
    }

    #[test]
    fn test_divide_by_zero_yields_zero() {
        let values = materialized(&[
            ("total", RowValue::Float(6.0)),
            ("count", RowValue::Long(0)),
        ]);
        let avg = ArithmeticPostAggregator::new(
            "avg",
            ArithmeticOp::Divide,
            vec!["total".to_string(), "count".to_string()],
        );
        assert_eq!(avg.compute(&values), RowValue::Float(0.0));
    }

    #[test]
    fn test_empty_field_list() {
        let values = materialized(&[]);
        let post = ArithmeticPostAggregator::new("x", ArithmeticOp::Add, vec![]);
        assert_eq!(post.compute(&values), RowValue::Null);
    }
}
