//! Trace replay throughput against the embedded engine
//!
//! Measures operations per second for an insert-heavy and a query-heavy
//! trace under each automatic compaction style.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use lsmtune_core::adapter::{configure_options, configure_table_options};
use lsmtune_core::params::{BenchConfig, CompactionStyle};
use lsmtune_core::workload::{Interpreter, KeyDistribution, QueryMix, TraceGenerator, TraceReader};
use lsmtune_engine::{Db, ReadOptions, WriteOptions};
use std::io::Cursor;
use std::time::Duration;
use tempfile::TempDir;

const INSERTS: u64 = 20_000;
const QUERIES: u64 = 20_000;

fn traces() -> (Vec<u8>, Vec<u8>) {
    let mut generator = TraceGenerator::new(8, 120, Some(42));
    let mut inserts = Vec::new();
    generator.write_insertions(&mut inserts, INSERTS).unwrap();

    let keys = TraceGenerator::load_keys(TraceReader::new(Cursor::new(inserts.clone()))).unwrap();
    let mix = QueryMix {
        point_queries: 80,
        updates: 10,
        range_scans: 10,
        ..Default::default()
    };
    let mut queries = inserts.clone();
    generator
        .write_queries(&mut queries, &keys, QUERIES, KeyDistribution::Zipf(0.9), mix)
        .unwrap();
    (inserts, queries)
}

fn small_config(style: CompactionStyle) -> BenchConfig {
    BenchConfig {
        entry_size: 128,
        entries_per_page: 32,
        buffer_size_in_pages: 64,
        size_ratio: 4.0,
        capacity: 8 * 1024 * 1024,
        compaction_style: style,
        ..Default::default()
    }
}

fn open_db(config: &BenchConfig) -> (TempDir, Db) {
    let dir = TempDir::new().unwrap();
    let mut options = configure_options(config);
    options.table = configure_table_options(config);
    let db = Db::open(dir.path().join("db"), options).unwrap();
    (dir, db)
}

fn replay(db: &Db, trace: &[u8]) {
    let mut reader = TraceReader::new(Cursor::new(trace));
    Interpreter::new(db, ReadOptions::default(), WriteOptions::default())
        .run(&mut reader)
        .unwrap();
}

fn bench_trace_replay(c: &mut Criterion) {
    let (inserts, queries) = traces();
    let mut group = c.benchmark_group("trace_replay");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(15));

    for style in [CompactionStyle::Level, CompactionStyle::Universal] {
        let config = small_config(style);

        group.throughput(Throughput::Elements(INSERTS));
        group.bench_function(BenchmarkId::new("inserts", style), |b| {
            b.iter_batched(
                || open_db(&config),
                |(_dir, db)| replay(&db, &inserts),
                BatchSize::PerIteration,
            )
        });

        group.throughput(Throughput::Elements(INSERTS + QUERIES));
        group.bench_function(BenchmarkId::new("mixed", style), |b| {
            b.iter_batched(
                || open_db(&config),
                |(_dir, db)| replay(&db, &queries),
                BatchSize::PerIteration,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_trace_replay);
criterion_main!(benches);
