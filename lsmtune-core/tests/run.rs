//! Whole benchmark runs through the runner

use lsmtune_core::params::{BenchConfig, CompactionStyle};
use lsmtune_core::workload::{KeyDistribution, QueryMix, TraceGenerator, TraceReader};
use lsmtune_core::Runner;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn write_trace(path: &Path, inserts: u64, queries: u64) {
    let mut generator = TraceGenerator::new(8, 56, Some(5));
    {
        let mut out = BufWriter::new(File::create(path).unwrap());
        generator.write_insertions(&mut out, inserts).unwrap();
    }
    let keys = TraceGenerator::load_keys(TraceReader::open(path).unwrap()).unwrap();
    let mut out = BufWriter::new(fs::OpenOptions::new().append(true).open(path).unwrap());
    let mix = QueryMix {
        point_queries: 70,
        updates: 10,
        deletes: 10,
        range_scans: 10,
        scan_length: 8,
    };
    generator
        .write_queries(&mut out, &keys, queries, KeyDistribution::Zipf(0.8), mix)
        .unwrap();
}

fn config_in(dir: &TempDir) -> BenchConfig {
    let workload_path = dir.path().join("workload.txt");
    write_trace(&workload_path, 2000, 1000);
    BenchConfig {
        workload_path,
        output_path: dir.path().join("output.txt"),
        json_output_path: Some(dir.path().join("report.json")),
        db_path: dir.path().join("db"),
        clear_system_cache: false,
        log_interval: 500,
        entry_size: 64,
        entries_per_page: 8,
        buffer_size_in_pages: 16,
        size_ratio: 4.0,
        level0_file_num_compaction_trigger: 2,
        num_levels: 5,
        capacity: 256 * 1024,
        ..Default::default()
    }
}

#[test]
fn test_full_run_level_style() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let runner = Runner::new(config.clone()).with_poll_interval(Duration::from_millis(50));

    let mut console = Vec::new();
    let report = runner.run(&mut console).unwrap();

    assert_eq!(report.workload.operations, 3000);
    assert_eq!(report.workload.inserts, 2000);
    assert_eq!(
        report.workload.point_queries,
        report.workload.point_hits + report.workload.point_misses
    );
    assert!(report.barrier.counters.is_quiescent());
    assert!(report.levels.iter().map(|l| l.files).sum::<usize>() > 0);

    // 3000 operations, a mark every 500
    let console = String::from_utf8(console).unwrap();
    assert_eq!(console.matches('#').count(), 6);

    let text = fs::read_to_string(&config.output_path).unwrap();
    assert!(text.contains(&format!("block_size: {}", 8 * 64)));
    assert!(text.contains(&format!("max_bytes_for_level_base: {}", 16 * 8 * 64 * 4)));

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("report.json")).unwrap()).unwrap();
    assert_eq!(json["workload"]["operations"], 3000);
    assert_eq!(json["setup"]["buffer_size"], 16 * 8 * 64);
    assert!(json["statistics"]["tickers"].is_object());
}

#[test]
fn test_full_run_universal_style() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.compaction_style = CompactionStyle::Universal;
    config.json_output_path = None;

    let report = Runner::new(config)
        .with_poll_interval(Duration::from_millis(50))
        .run(&mut Vec::new())
        .unwrap();
    assert!(report.barrier.counters.is_quiescent());
    // Sorted runs live in L0 and the last level only
    let middle = &report.levels[1..report.levels.len() - 1];
    assert!(middle.iter().all(|l| l.files == 0));
}

#[test]
fn test_second_run_starts_from_scratch() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let runner = Runner::new(config.clone()).with_poll_interval(Duration::from_millis(50));

    let first = runner.run(&mut Vec::new()).unwrap();
    let second = runner.run(&mut Vec::new()).unwrap();
    assert_eq!(first.workload.operations, second.workload.operations);
    assert_eq!(first.workload.point_hits, second.workload.point_hits);
    assert_eq!(first.workload.scanned_keys, second.workload.scanned_keys);
    assert_eq!(second.barrier.events, runner.signal().events());
}

#[test]
fn test_bad_trace_operand_aborts_run() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    fs::write(&config.workload_path, "I a 1\nQ a\nS a\n").unwrap();
    config.json_output_path = None;

    let err = Runner::new(config.clone()).run(&mut Vec::new()).unwrap_err();
    assert_eq!(err.line(), Some(3));
    assert!(!config.output_path.exists());
}
