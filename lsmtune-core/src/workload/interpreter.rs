//! Trace replay against a [`KvEngine`]

use super::{Operation, TraceOp, TraceReader};
use crate::{LsmError, Result};
use lsmtune_engine::{Cursor, KvEngine, ReadOptions, WriteOptions};
use serde::Serialize;
use std::io::BufRead;
use tracing::{debug, info, warn};

/// What a replay did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkloadSummary {
    /// Operations read from the trace, unknown ones included
    pub operations: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub point_queries: u64,
    pub point_hits: u64,
    pub point_misses: u64,
    pub range_scans: u64,
    /// Keys visited by all range scans
    pub scanned_keys: u64,
    pub unknown_ops: u64,
    /// Live table files once the replay was flushed
    pub live_files: usize,
    pub live_bytes: u64,
}

/// Applies trace operations one at a time, in order.
///
/// Any engine failure stops the replay and is reported with the trace line
/// that caused it. Unknown opcodes are logged and skipped.
pub struct Interpreter<'a, E: KvEngine> {
    engine: &'a E,
    read: ReadOptions,
    write: WriteOptions,
    log_interval: u64,
    progress: Option<Box<dyn FnMut(u64) + 'a>>,
    /// Reused by every scan, refreshed before each one
    cursor: Option<E::Cursor>,
}

impl<'a, E: KvEngine> Interpreter<'a, E> {
    pub fn new(engine: &'a E, read: ReadOptions, write: WriteOptions) -> Self {
        Self {
            engine,
            read,
            write,
            log_interval: 0,
            progress: None,
            cursor: None,
        }
    }

    /// Call the progress hook every `interval` operations; 0 disables it
    pub fn with_log_interval(mut self, interval: u64) -> Self {
        self.log_interval = interval;
        self
    }

    /// Hook receiving the operation count at each progress mark
    pub fn on_progress(mut self, hook: impl FnMut(u64) + 'a) -> Self {
        self.progress = Some(Box::new(hook));
        self
    }

    /// Replay the whole trace, then flush and list the live files
    pub fn run<R: BufRead>(&mut self, trace: &mut TraceReader<R>) -> Result<WorkloadSummary> {
        let mut summary = WorkloadSummary::default();
        while let Some(op) = trace.next_op()? {
            summary.operations += 1;
            if self.log_interval > 0 && summary.operations % self.log_interval == 0 {
                if let Some(hook) = self.progress.as_mut() {
                    hook(summary.operations);
                }
            }
            self.apply(&op, &mut summary)?;
        }
        self.cursor = None;

        // Flushing here can schedule more compactions for the barrier to see
        let live = self.engine.live_files(true)?;
        summary.live_files = live.files.len();
        summary.live_bytes = live.total_bytes;

        info!(
            operations = summary.operations,
            unknown = summary.unknown_ops,
            live_files = summary.live_files,
            "Workload replay finished"
        );
        Ok(summary)
    }

    /// Apply a single operation
    pub fn apply(&mut self, op: &TraceOp, summary: &mut WorkloadSummary) -> Result<()> {
        let line = op.line;
        match &op.op {
            Operation::Insert { key, value } => {
                self.engine
                    .put(key, value, &self.write)
                    .map_err(|e| LsmError::at_line(e, line))?;
                summary.inserts += 1;
            }
            Operation::Update { key, value } => {
                self.engine
                    .put(key, value, &self.write)
                    .map_err(|e| LsmError::at_line(e, line))?;
                summary.updates += 1;
            }
            Operation::Delete { key } => {
                self.engine
                    .delete(key, &self.write)
                    .map_err(|e| LsmError::at_line(e, line))?;
                summary.deletes += 1;
            }
            Operation::PointQuery { key } => {
                // The value only exercises the read path
                let found = self
                    .engine
                    .get(key, &self.read)
                    .map_err(|e| LsmError::at_line(e, line))?;
                summary.point_queries += 1;
                if found.is_some() {
                    summary.point_hits += 1;
                } else {
                    summary.point_misses += 1;
                }
            }
            Operation::RangeScan { start, end } => {
                let visited = self.scan(start, end).map_err(|e| LsmError::at_line(e, line))?;
                summary.range_scans += 1;
                summary.scanned_keys += visited;
            }
            Operation::Unknown { opcode } => {
                warn!(line, opcode = %opcode, "Unknown workload instruction, skipping line");
                summary.unknown_ops += 1;
            }
        }
        Ok(())
    }

    /// Visit every key in `[start, end)`
    fn scan(&mut self, start: &str, end: &str) -> lsmtune_engine::Result<u64> {
        let cursor = match self.cursor.take() {
            Some(mut cursor) => {
                cursor.refresh()?;
                cursor
            }
            None => self.engine.new_cursor(&self.read)?,
        };
        let cursor = self.cursor.insert(cursor);
        cursor.status()?;

        let mut visited = 0u64;
        cursor.seek(start);
        while cursor.valid() && cursor.key() < end {
            visited += 1;
            cursor.next();
        }
        cursor.status()?;
        debug!(start, end, visited, "Range scan");
        Ok(visited)
    }
}
