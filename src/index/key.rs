//! Composite fact key: truncated timestamp plus per-dimension value tuples

use std::cmp::Ordering;
use std::sync::Arc;

/// Key identifying one merged row: a bucket timestamp and one value tuple
/// per discovered dimension
///
/// Positions align with the dimension registry. `None` means the row
/// carried no value for that dimension; tuples are sorted ascending by
/// string order at construction time. Keys built before later dimensions
/// were discovered are simply shorter; the ordering treats the missing
/// tail as absent.
///
/// The total order is the single source of truth for fact-map placement:
/// timestamp first, then tuple count, then position by position where an
/// absent tuple sorts before any present one, and present tuples compare
/// by (length, element-wise string order).
#[derive(Debug, Clone)]
pub struct TimeAndDims {
    timestamp: i64,
    dims: Vec<Option<Vec<Arc<str>>>>,
}

impl TimeAndDims {
    /// Build a key from a bucket timestamp and per-dimension tuples
    ///
    /// Callers are expected to pass tuples already sorted ascending;
    /// the ingestion path normalizes values before key construction.
    pub fn new(timestamp: i64, dims: Vec<Option<Vec<Arc<str>>>>) -> Self {
        Self { timestamp, dims }
    }

    /// Bucket timestamp in epoch millis
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Per-dimension value tuples, aligned to the dimension registry
    pub fn dims(&self) -> &[Option<Vec<Arc<str>>>] {
        &self.dims
    }
}

impl Ord for TimeAndDims {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.dims.len().cmp(&other.dims.len()))
            .then_with(|| {
                for (lhs, rhs) in self.dims.iter().zip(other.dims.iter()) {
                    let ord = match (lhs, rhs) {
                        (None, None) => Ordering::Equal,
                        (None, Some(_)) => Ordering::Less,
                        (Some(_), None) => Ordering::Greater,
                        (Some(lhs), Some(rhs)) => lhs
                            .len()
                            .cmp(&rhs.len())
                            .then_with(|| lhs.iter().cmp(rhs.iter())),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            })
    }
}

impl PartialOrd for TimeAndDims {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimeAndDims {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimeAndDims {}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(values: &[&str]) -> Option<Vec<Arc<str>>> {
        Some(values.iter().map(|v| Arc::from(*v)).collect())
    }

    #[test]
    fn test_timestamp_dominates() {
        let early = TimeAndDims::new(1000, vec![tuple(&["z"])]);
        let late = TimeAndDims::new(2000, vec![tuple(&["a"])]);
        assert!(early < late);
    }

    #[test]
    fn test_shorter_tuple_count_first() {
        let short = TimeAndDims::new(0, vec![tuple(&["z"])]);
        let long = TimeAndDims::new(0, vec![tuple(&["a"]), tuple(&["a"])]);
        assert!(short < long);
    }

    #[test]
    fn test_absent_before_present() {
        let absent = TimeAndDims::new(0, vec![None, tuple(&["a"])]);
        let present = TimeAndDims::new(0, vec![tuple(&["a"]), None]);
        assert!(absent < present);
    }

    #[test]
    fn test_tuple_length_before_contents() {
        let single = TimeAndDims::new(0, vec![tuple(&["z"])]);
        let double = TimeAndDims::new(0, vec![tuple(&["a", "b"])]);
        assert!(single < double);
    }

    #[test]
    fn test_lexicographic_values() {
        let a = TimeAndDims::new(0, vec![tuple(&["a", "b"])]);
        let b = TimeAndDims::new(0, vec![tuple(&["a", "c"])]);
        assert!(a < b);
    }

    #[test]
    fn test_equality_is_content_based() {
        let a = TimeAndDims::new(0, vec![tuple(&["a", "a", "b"])]);
        let b = TimeAndDims::new(0, vec![tuple(&["a", "a", "b"])]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_all_absent_positions_equal() {
        let a = TimeAndDims::new(0, vec![None, None]);
        let b = TimeAndDims::new(0, vec![None, None]);
        assert_eq!(a, b);
    }
}
