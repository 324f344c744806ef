use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use magma::aggregate::builtin::{CountAggregatorFactory, DoubleSumAggregatorFactory};
use magma::config::IndexSchema;
use magma::index::IncrementalIndex;
use magma::pool::ArenaPool;
use magma::types::{Granularity, MapRow};

fn fresh_index(capacity: usize) -> IncrementalIndex {
    let schema = IndexSchema::builder()
        .with_granularity(Granularity::minute())
        .with_metric(Arc::new(CountAggregatorFactory::new("count")))
        .with_metric(Arc::new(DoubleSumAggregatorFactory::new("total", "value")))
        .build()
        .unwrap();
    let pool = ArenaPool::new(capacity);
    IncrementalIndex::new(schema, &pool).unwrap()
}

fn bench_ingestion(c: &mut Criterion) {
    c.bench_function("add_distinct_keys", |b| {
        let index = fresh_index(64 * 1024 * 1024);
        let mut i = 0i64;
        b.iter(|| {
            // Bounded key space keeps long runs inside the arena.
            i = (i + 1) % 500_000;
            index
                .add(Arc::new(
                    MapRow::new(60_000 * i)
                        .with_dimension("host", ["web-01"])
                        .with_metric("value", 1.0),
                ))
                .unwrap();
            black_box(index.size())
        });
    });

    c.bench_function("add_merging_key", |b| {
        let index = fresh_index(1024);
        b.iter(|| {
            index
                .add(Arc::new(
                    MapRow::new(60_000)
                        .with_dimension("host", ["web-01"])
                        .with_metric("value", 1.0),
                ))
                .unwrap();
            black_box(index.size())
        });
    });
}

criterion_group!(benches, bench_ingestion);
criterion_main!(benches);
