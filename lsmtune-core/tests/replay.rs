//! Trace replay against the embedded engine

use lsmtune_core::barrier::{wait_for_compactions, BarrierState, CompactionSignal};
use lsmtune_core::workload::{Interpreter, TraceReader, WorkloadSummary};
use lsmtune_core::{LsmError, Result};
use lsmtune_engine::options::{DbOptions, FilterPolicy, ReadOptions, WriteOptions};
use lsmtune_engine::Db;
use std::io::Cursor as IoCursor;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn small_options() -> DbOptions {
    let mut options = DbOptions {
        create_if_missing: true,
        write_buffer_size: 4 * 1024,
        target_file_size_base: 4 * 1024,
        max_bytes_for_level_base: 16 * 1024,
        level0_file_num_compaction_trigger: 2,
        num_levels: 4,
        ..Default::default()
    };
    options.table.filter_policy = Some(FilterPolicy::bloom(10.0));
    options
}

fn replay(db: &Db, trace: &str) -> Result<WorkloadSummary> {
    let mut reader = TraceReader::new(IoCursor::new(trace.to_string()));
    Interpreter::new(db, ReadOptions::default(), WriteOptions::default()).run(&mut reader)
}

#[test]
fn test_last_write_wins() {
    let dir = TempDir::new().unwrap();
    let db = Db::open(dir.path(), small_options()).unwrap();

    let summary = replay(&db, "I a 1\nU a 2\nQ a\n").unwrap();
    assert_eq!(summary.point_hits, 1);
    assert_eq!(db.get("a", &ReadOptions::default()).unwrap(), Some("2".into()));
}

#[test]
fn test_range_scan_excludes_end_key() {
    let dir = TempDir::new().unwrap();
    let db = Db::open(dir.path(), small_options()).unwrap();

    let summary = replay(&db, "I b 1\nI c 1\nI d 1\nS b d\n").unwrap();
    assert_eq!(summary.range_scans, 1);
    assert_eq!(summary.scanned_keys, 2);

    let mut cursor = db.new_cursor(ReadOptions::default()).unwrap();
    cursor.seek("b");
    let mut seen = Vec::new();
    while cursor.valid() && cursor.key() < "d" {
        seen.push(cursor.key().to_string());
        cursor.next();
    }
    assert_eq!(seen, vec!["b", "c"]);
}

#[test]
fn test_delete_then_query_is_not_found() {
    let dir = TempDir::new().unwrap();
    let db = Db::open(dir.path(), small_options()).unwrap();

    let summary = replay(&db, "I a 1\nD a\nQ a\n").unwrap();
    assert_eq!(summary.point_misses, 1);
    assert_eq!(summary.point_hits, 0);
}

#[test]
fn test_unknown_opcode_does_not_abort() {
    let dir = TempDir::new().unwrap();
    let db = Db::open(dir.path(), small_options()).unwrap();

    let summary = replay(&db, "I a 1\nX a 2\nI b 2\nQ b\n").unwrap();
    assert_eq!(summary.unknown_ops, 1);
    assert_eq!(summary.inserts, 2);
    assert_eq!(db.get("b", &ReadOptions::default()).unwrap(), Some("2".into()));
}

#[test]
fn test_failure_stops_replay() {
    let dir = TempDir::new().unwrap();
    let db = Db::open(dir.path(), small_options()).unwrap();

    // Closing makes every later engine call fail
    let mut reader = TraceReader::new(IoCursor::new("I a 1\nI b 2\n".to_string()));
    let mut interpreter = Interpreter::new(&db, ReadOptions::default(), WriteOptions::default());
    let mut summary = WorkloadSummary::default();
    let first = reader.next_op().unwrap().unwrap();
    interpreter.apply(&first, &mut summary).unwrap();
    db.close().unwrap();

    let second = reader.next_op().unwrap().unwrap();
    let err = interpreter.apply(&second, &mut summary).unwrap_err();
    assert_eq!(err.line(), Some(2));
    assert!(matches!(err, LsmError::Workload { .. }));
    assert_eq!(summary.inserts, 1);
}

#[test]
fn test_barrier_drains_real_compactions() {
    let dir = TempDir::new().unwrap();
    let signal = Arc::new(CompactionSignal::new());
    let mut options = small_options();
    options.add_listener(signal.clone());
    let db = Db::open(dir.path(), options).unwrap();

    let trace: String = (0..3)
        .flat_map(|round| (0..400).map(move |i| format!("I key{:05} value-{}-{:040}\n", i, round, i)))
        .collect();
    let summary = replay(&db, &trace).unwrap();
    assert_eq!(summary.inserts, 1200);

    let outcome = wait_for_compactions(&db, &signal, Duration::from_millis(50));
    assert!(outcome.counters.is_quiescent());
    assert!(db.compaction_counters().is_quiescent());
    assert!(outcome.events > 0);
    assert_eq!(signal.state(), BarrierState::Drained);

    // Data survives compaction
    let read = ReadOptions::default();
    assert_eq!(
        db.get("key00007", &read).unwrap(),
        Some(format!("value-2-{:040}", 7))
    );
    db.close().unwrap();
}
