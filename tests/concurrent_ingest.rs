//! Concurrent ingestion scenarios
//!
//! Exercises the index under parallel writers: same-key merge, distinct
//! keys, dynamic dimension discovery from racing threads, and arena
//! exhaustion under contention.

use std::sync::Arc;
use std::thread;

use magma::aggregate::builtin::{CountAggregatorFactory, DoubleSumAggregatorFactory};
use magma::config::IndexSchema;
use magma::error::{Error, IngestError};
use magma::index::IncrementalIndex;
use magma::pool::ArenaPool;
use magma::types::{Granularity, MapRow, Row, RowValue};

fn count_index(capacity: usize) -> Arc<IncrementalIndex> {
    let schema = IndexSchema::builder()
        .with_granularity(Granularity::minute())
        .with_metric(Arc::new(CountAggregatorFactory::new("count")))
        .build()
        .unwrap();
    let pool = ArenaPool::new(capacity);
    Arc::new(IncrementalIndex::new(schema, &pool).unwrap())
}

#[test]
fn concurrent_same_key_merges_into_one_slot() {
    const THREADS: usize = 8;
    const ADDS_PER_THREAD: usize = 50;

    let index = count_index(1024);

    let mut handles = vec![];
    for _ in 0..THREADS {
        let index = Arc::clone(&index);
        handles.push(thread::spawn(move || {
            for _ in 0..ADDS_PER_THREAD {
                index
                    .add(Arc::new(
                        MapRow::new(61_000)
                            .with_dimension("host", ["web-01"])
                            .with_metric("count", 1.0),
                    ))
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(index.size(), 1);
    let rows: Vec<Row> = index.iter().collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].timestamp(), 60_000);
    assert_eq!(
        rows[0].get("count"),
        Some(&RowValue::Long((THREADS * ADDS_PER_THREAD) as i64))
    );
}

#[test]
fn concurrent_distinct_keys_each_get_a_slot() {
    const THREADS: usize = 8;

    let index = count_index(8 * THREADS * 8);

    let mut handles = vec![];
    for t in 0..THREADS {
        let index = Arc::clone(&index);
        handles.push(thread::spawn(move || {
            index
                .add(Arc::new(
                    MapRow::new(60_000).with_dimension("host", [format!("host-{}", t)]),
                ))
                .unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(index.size(), THREADS);

    // One slot per key, all within arena bounds, in key order.
    let facts = index.facts();
    assert_eq!(facts.len(), THREADS);
    let mut offsets: Vec<usize> = facts.iter().map(|(_, offset)| *offset).collect();
    offsets.sort_unstable();
    let expected: Vec<usize> = (0..THREADS).map(|i| i * 8).collect();
    assert_eq!(offsets, expected);
}

#[test]
fn concurrent_discovery_finds_the_same_dimension_set() {
    // Two permutations of the same rows must discover the same set of
    // dimensions, whatever the arrival order.
    let rows = |index: &Arc<IncrementalIndex>, reversed: bool| {
        let mut batch = vec![
            MapRow::new(60_000).with_dimension("a", ["1"]),
            MapRow::new(60_000).with_dimension("b", ["2"]),
            MapRow::new(60_000)
                .with_dimension("c", ["3"])
                .with_dimension("a", ["1"]),
        ];
        if reversed {
            batch.reverse();
        }
        for row in batch {
            index.add(Arc::new(row)).unwrap();
        }
    };

    let forward = count_index(1024);
    rows(&forward, false);
    let backward = count_index(1024);
    rows(&backward, true);

    let mut forward_dims = forward.dimensions();
    let mut backward_dims = backward.dimensions();
    forward_dims.sort();
    backward_dims.sort();
    assert_eq!(forward_dims, backward_dims);
    assert_eq!(forward_dims, vec!["a", "b", "c"]);

    // Positions depend on arrival order but are immutable once assigned.
    assert_eq!(forward.dimension_index("a"), Some(0));
    assert_eq!(backward.dimension_index("c"), Some(0));
}

#[test]
fn concurrent_discovery_under_racing_writers() {
    const THREADS: usize = 6;

    let index = count_index(64 * 1024);

    let mut handles = vec![];
    for t in 0..THREADS {
        let index = Arc::clone(&index);
        handles.push(thread::spawn(move || {
            for i in 0..20 {
                index
                    .add(Arc::new(
                        MapRow::new(60_000)
                            .with_dimension(&format!("dim-{}", t), [format!("v{}", i)])
                            .with_dimension("shared", ["x"]),
                    ))
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let mut dims = index.dimensions();
    dims.sort();
    let mut expected: Vec<String> = (0..THREADS).map(|t| format!("dim-{}", t)).collect();
    expected.push("shared".to_string());
    expected.sort();
    assert_eq!(dims, expected);

    // Every thread's dictionary saw its 20 values exactly once.
    for t in 0..THREADS {
        let dict = index.dimension(&format!("dim-{}", t)).unwrap();
        assert_eq!(dict.len(), 20);
    }
    assert_eq!(index.dimension("shared").unwrap().len(), 1);
}

#[test]
fn concurrent_adds_against_full_arena_never_leak_keys() {
    const THREADS: usize = 4;
    // Room for exactly two 8-byte slots.
    let index = count_index(16);

    let mut handles = vec![];
    for t in 0..THREADS {
        let index = Arc::clone(&index);
        handles.push(thread::spawn(move || {
            let mut rejected = 0;
            for i in 0..8 {
                let result = index.add(Arc::new(
                    MapRow::new(60_000).with_dimension("host", [format!("h-{}-{}", t, i)]),
                ));
                match result {
                    Ok(_) => {}
                    Err(Error::Ingest(IngestError::ArenaFull { .. })) => rejected += 1,
                    Err(other) => panic!("unexpected error: {}", other),
                }
            }
            rejected
        }));
    }
    let rejected: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(index.size(), 2);
    assert_eq!(index.facts().len(), 2);
    assert_eq!(rejected, THREADS * 8 - 2);
}

#[test]
fn writers_and_readers_interleave() {
    let schema = IndexSchema::builder()
        .with_granularity(Granularity::minute())
        .with_metric(Arc::new(CountAggregatorFactory::new("count")))
        .with_metric(Arc::new(DoubleSumAggregatorFactory::new("total", "value")))
        .build()
        .unwrap();
    let pool = ArenaPool::new(64 * 1024);
    let index = Arc::new(IncrementalIndex::new(schema, &pool).unwrap());

    let writer = {
        let index = Arc::clone(&index);
        thread::spawn(move || {
            for i in 0..200i64 {
                index
                    .add(Arc::new(
                        MapRow::new(60_000 * (i % 10))
                            .with_dimension("host", [format!("h{}", i % 5)])
                            .with_metric("value", 1.0),
                    ))
                    .unwrap();
            }
        })
    };

    let reader = {
        let index = Arc::clone(&index);
        thread::spawn(move || {
            for _ in 0..50 {
                let mut last = i64::MIN;
                for row in index.iter() {
                    // Keys always stream in order, mid-write or not.
                    assert!(row.timestamp() >= last);
                    last = row.timestamp();
                }
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();

    // After the writer returns, its contribution is fully visible.
    let total: f64 = index
        .iter()
        .map(|row| match row.get("total") {
            Some(RowValue::Float(v)) => *v,
            _ => 0.0,
        })
        .sum();
    assert_eq!(total, 200.0);
}
