//! Run orchestration
//!
//! A run is strictly sequential:
//!
//! 1. open the trace (before any engine interaction)
//! 2. destroy prior database files, if configured
//! 3. ask the OS to drop its page cache, if configured
//! 4. build the engine options
//! 5. enable statistics, if configured
//! 6. attach the compaction listener and open the engine
//! 7. replay the trace
//! 8. wait for background compactions to drain
//! 9. close the engine
//! 10. write the reports
//!
//! The listener goes in with the options, so no completion can happen
//! before it is attached.

use crate::adapter::{
    configure_options, configure_read_options, configure_table_options, configure_write_options,
};
use crate::barrier::{wait_for_compactions, CompactionSignal, DEFAULT_POLL_INTERVAL};
use crate::params::BenchConfig;
use crate::report::{render_setup_table, RunReport, RunTimings, SetupSummary};
use crate::workload::{Interpreter, TraceReader};
use crate::{LsmError, Result};
use chrono::Utc;
use lsmtune_engine::statistics::Statistics;
use lsmtune_engine::{Db, EventListener};
use std::fs;
use std::io::Write;
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const DROP_CACHES_PATH: &str = "/proc/sys/vm/drop_caches";

/// Flush dirty pages, then drop the page cache, dentries and inodes.
/// Needs root.
pub fn drop_system_cache() -> Result<()> {
    let status = Command::new("sync").status()?;
    if !status.success() {
        return Err(LsmError::Internal(format!("sync exited with {}", status)));
    }
    fs::write(DROP_CACHES_PATH, "3")?;
    Ok(())
}

/// Drives benchmark runs for one configuration
pub struct Runner {
    config: BenchConfig,
    poll_interval: Duration,
    signal: Arc<CompactionSignal>,
}

impl Runner {
    pub fn new(config: BenchConfig) -> Self {
        Self {
            config,
            poll_interval: DEFAULT_POLL_INTERVAL,
            signal: Arc::new(CompactionSignal::new()),
        }
    }

    /// Upper bound between two compaction counter samples while draining
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Completion signal shared with the engine's listener
    pub fn signal(&self) -> &Arc<CompactionSignal> {
        &self.signal
    }

    /// Execute one run. The setup table and the `#` progress markers go to
    /// `console`; reports go to the configured output paths.
    pub fn run<W: Write>(&self, console: &mut W) -> Result<RunReport> {
        let config = &self.config;
        config.validate()?;
        let started_at = Utc::now();

        let mut trace = TraceReader::open(&config.workload_path)?;

        if config.destroy_database {
            Db::destroy(&config.db_path)?;
        }
        if config.clear_system_cache {
            if let Err(e) = drop_system_cache() {
                warn!(error = %e, "Failed to drop the system page cache, continuing");
            }
        }

        let mut options = configure_options(config);
        options.table = configure_table_options(config);
        let read = configure_read_options(config);
        let write = configure_write_options(config);

        let statistics = config.enable_statistics.then(|| Arc::new(Statistics::new()));
        options.statistics = statistics.clone();

        self.signal.reset();
        options.add_listener(Arc::clone(&self.signal) as Arc<dyn EventListener>);

        let db = Db::open(&config.db_path, options)?;

        console.write_all(render_setup_table(config).as_bytes())?;
        console.flush()?;

        // Markers stop at the first console failure; the replay goes on
        let mut console_ok = true;
        let replay_start = Instant::now();
        let workload = {
            let mut interpreter = Interpreter::new(&db, read, write)
                .with_log_interval(config.log_interval)
                .on_progress(|operations| {
                    if !console_ok {
                        return;
                    }
                    if let Err(e) = console.write_all(b"#").and_then(|()| console.flush()) {
                        warn!(
                            error = %e,
                            operations,
                            "Failed to write progress marker, disabling progress output"
                        );
                        console_ok = false;
                    }
                });
            interpreter.run(&mut trace)?
        };
        if config.log_interval > 0 && console_ok {
            writeln!(console)?;
        }
        let replay = replay_start.elapsed();

        let barrier = wait_for_compactions(&db, &self.signal, self.poll_interval);
        let levels = db.level_summary();

        let close_start = Instant::now();
        db.close()?;
        let close = close_start.elapsed();

        let report = RunReport {
            started_at,
            workload_path: config.workload_path.clone(),
            db_path: config.db_path.clone(),
            setup: SetupSummary::from_config(config),
            workload,
            timings: RunTimings {
                replay_ms: millis(replay),
                barrier_ms: millis(barrier.elapsed),
                close_ms: millis(close),
            },
            barrier,
            levels,
            statistics: statistics.as_deref().map(Statistics::snapshot),
        };

        report.write_text(&config.output_path)?;
        if let Some(path) = &config.json_output_path {
            report.write_json(path)?;
        }
        info!(
            operations = report.workload.operations,
            replay_ms = report.timings.replay_ms,
            barrier_ms = report.timings.barrier_ms,
            output = %config.output_path.display(),
            "Run finished"
        );
        Ok(report)
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
