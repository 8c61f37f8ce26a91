//! The embedded LSM database
//!
//! ```text
//!   put/delete ──► WAL ──► memtable ──(full)──► immutable queue
//!                                                   │ flush job
//!                                                   ▼
//!                         L0 ──► L1 ──► ... ──► Ln   (compaction jobs)
//! ```
//!
//! Flushes and compactions run on `max_background_jobs` worker threads fed
//! by a job channel. All shared state lives behind one mutex; writers that
//! run out of memtables wait on its condition variable.

use super::engine::{LiveFile, LiveFiles};
use super::iterator::{DbIterator, EntryIterator, LevelIterator, MergingIterator};
use super::version::{LevelSummary, ManifestData, TableHandle, Version, VersionEdit, IDENTITY_FILE};
use crate::compaction::{
    CompactionCounters, CompactionJob, CompactionJobInfo, CompactionPicker, CompactionTask, JobOutput,
};
use crate::memtable::{MemTable, MemTableIterator};
use crate::options::{CompactionStyle, DbOptions, ReadOptions, WriteOptions};
use crate::sstable::{BuildOptions, TableBuilder, TableContext, TableMeta, TableReader};
use crate::statistics::{HistogramType, Statistics, StatsExt, Ticker};
use crate::types::{log_file_name, table_file_name, FileNumber};
use crate::wal::{WalReader, WalRecord, WalWriter};
use crate::{EngineError, Entry, Result, ValueEntry};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard};
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Work handed to background workers
enum Job {
    Flush,
    Compact(CompactionTask),
    Shutdown,
}

struct DbState {
    mem: Arc<MemTable>,
    wal: Option<Arc<WalWriter>>,
    /// Frozen memtables, oldest first
    imm: VecDeque<Arc<MemTable>>,
    version: Arc<Version>,
    picker: CompactionPicker,
    /// Files claimed by scheduled or running compactions
    busy: HashSet<FileNumber>,
    running_compactions: u64,
    flush_scheduled: bool,
    /// Some write skipped the WAL since open
    unlogged_writes: bool,
    bg_error: Option<String>,
    closed: bool,
}

/// Point-in-time view used by reads
struct Snapshot {
    mem: Arc<MemTable>,
    /// Newest first
    imm: Vec<Arc<MemTable>>,
    version: Arc<Version>,
}

struct DbInner {
    path: PathBuf,
    options: DbOptions,
    ctx: Arc<TableContext>,
    build: BuildOptions,
    max_write_buffers: usize,
    state: Mutex<DbState>,
    cond: Condvar,
    next_file_number: AtomicU64,
    next_job_id: AtomicU64,
    jobs: Sender<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Closes the database when the last user handle goes away. Workers hold
/// the inner state directly, so they do not keep the database open.
struct CloseOnDrop(Arc<DbInner>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if let Err(e) = self.0.close() {
            warn!("Failed to close database at {:?}: {}", self.0.path, e);
        }
    }
}

/// Handle to an open database. Clones share the same database.
#[derive(Clone)]
pub struct Db {
    inner: Arc<DbInner>,
    _guard: Arc<CloseOnDrop>,
}

impl Db {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>, options: DbOptions) -> Result<Self> {
        validate_options(&options)?;
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            if !options.create_if_missing {
                return Err(EngineError::InvalidArgument(format!(
                    "{}: does not exist (create_if_missing is false)",
                    path.display()
                )));
            }
            fs::create_dir_all(&path)?;
        }
        let identity = path.join(IDENTITY_FILE);
        if !identity.exists() {
            fs::write(&identity, Uuid::new_v4().to_string())?;
        }

        let ctx = Arc::new(TableContext::from_options(&options));
        let build = BuildOptions::from_options(&options);

        // Load live tables
        let mut next_file_number: FileNumber = 1;
        let mut version = Version::new(options.num_levels);
        if let Some(manifest) = ManifestData::load(&path)? {
            next_file_number = manifest.next_file_number;
            let mut edit = VersionEdit::default();
            for meta in manifest.files {
                if meta.level >= options.num_levels {
                    return Err(EngineError::Config(format!(
                        "table {} lives at level {} but num_levels is {}",
                        meta.number, meta.level, options.num_levels
                    )));
                }
                next_file_number = next_file_number.max(meta.number + 1);
                let reader = TableReader::open(
                    path.join(table_file_name(meta.number)),
                    meta.number,
                    meta.level,
                    Arc::clone(&ctx),
                )?;
                edit.add(TableHandle::new(meta, reader));
            }
            version = version.apply(&edit);
        }
        remove_orphan_tables(&path, &version)?;

        // Replay logs left by the previous session into one L0 table
        let wal_reader = WalReader::new(&path);
        let logs = wal_reader.list_logs()?;
        if let Some((number, _)) = logs.last() {
            next_file_number = next_file_number.max(number + 1);
        }
        if !logs.is_empty() {
            let recovered = MemTable::new(next_file_number);
            next_file_number += 1;
            for (_, log) in &logs {
                for record in wal_reader.read_log(log)? {
                    recovered.insert(record.into_entry());
                }
            }
            if !recovered.is_empty() {
                let number = next_file_number;
                next_file_number += 1;
                let meta = write_memtable(&path, number, &recovered, build)?;
                let reader = TableReader::open(path.join(table_file_name(number)), number, 0, Arc::clone(&ctx))?;
                let mut edit = VersionEdit::default();
                edit.add(TableHandle::new(meta, reader));
                version = version.apply(&edit);
                info!(
                    logs = logs.len(),
                    entries = recovered.len(),
                    table = number,
                    "Recovered write-ahead logs"
                );
            }
        }
        let epoch = next_file_number;
        next_file_number += 1;
        version.manifest(next_file_number).store(&path)?;
        for (_, log) in logs {
            fs::remove_file(log)?;
        }

        let wal = Arc::new(WalWriter::create(&path, epoch)?);
        let (jobs, receiver) = unbounded();
        let state = DbState {
            mem: Arc::new(MemTable::new(epoch)),
            wal: Some(wal),
            imm: VecDeque::new(),
            version: Arc::new(version),
            picker: CompactionPicker::new(&options),
            busy: HashSet::new(),
            running_compactions: 0,
            flush_scheduled: false,
            unlogged_writes: false,
            bg_error: None,
            closed: false,
        };
        let inner = Arc::new(DbInner {
            path,
            max_write_buffers: options.max_write_buffer_number.max(2),
            options,
            ctx,
            build,
            state: Mutex::new(state),
            cond: Condvar::new(),
            next_file_number: AtomicU64::new(next_file_number),
            next_job_id: AtomicU64::new(0),
            jobs,
            workers: Mutex::new(Vec::new()),
        });

        let num_workers = inner.options.max_background_jobs.max(1);
        for i in 0..num_workers {
            let worker = Arc::clone(&inner);
            let receiver: Receiver<Job> = receiver.clone();
            let spawned = thread::Builder::new()
                .name(format!("lsm-bg-{}", i))
                .spawn(move || worker.worker_loop(receiver));
            match spawned {
                Ok(handle) => inner.workers.lock().push(handle),
                Err(e) => {
                    let _ = inner.close();
                    return Err(e.into());
                }
            }
        }

        {
            let mut state = inner.state.lock();
            inner.maybe_schedule_compaction(&mut state);
            info!(
                path = %inner.path.display(),
                files = state.version.num_files(),
                style = ?inner.options.compaction_style,
                workers = num_workers,
                "Opened database"
            );
        }

        Ok(Self {
            _guard: Arc::new(CloseOnDrop(Arc::clone(&inner))),
            inner,
        })
    }

    /// Remove every engine file under `path`, then the directory if it
    /// ends up empty. A missing directory is not an error.
    pub fn destroy(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(());
        }
        let pattern = Regex::new(r"^(\d+\.(sst|log)|MANIFEST(\.tmp)?|IDENTITY)$")
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        let mut removed = 0usize;
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_str().is_some_and(|n| pattern.is_match(n)) {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        if fs::read_dir(path)?.next().is_none() {
            fs::remove_dir(path)?;
        }
        info!(path = %path.display(), removed, "Destroyed database");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn options(&self) -> &DbOptions {
        &self.inner.options
    }

    pub fn statistics(&self) -> &Option<Arc<Statistics>> {
        &self.inner.options.statistics
    }

    /// Insert or overwrite `key`
    pub fn put(&self, key: &str, value: &str, write: &WriteOptions) -> Result<()> {
        self.inner.write(Entry::put(key, value), write)
    }

    /// Delete `key`; deleting an absent key is not an error
    pub fn delete(&self, key: &str, write: &WriteOptions) -> Result<()> {
        self.inner.write(Entry::delete(key), write)
    }

    /// Latest live value of `key`
    pub fn get(&self, key: &str, read: &ReadOptions) -> Result<Option<String>> {
        self.inner.get(key, read)
    }

    /// Cursor over the current contents
    pub fn new_cursor(&self, read: ReadOptions) -> Result<DbIterator> {
        DbIterator::new(self.clone(), read)
    }

    /// Freeze the memtable and wait until every frozen memtable is on disk
    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    /// Live table files, optionally flushing memtables first
    pub fn live_files(&self, flush: bool) -> Result<LiveFiles> {
        if flush {
            self.inner.flush()?;
        }
        let version = self.inner.snapshot()?.version;
        let files = version
            .all_files()
            .map(|f| LiveFile {
                name: table_file_name(f.number()),
                level: f.meta.level,
                size: f.meta.file_size,
                entries: f.meta.entry_count,
                smallest_key: f.meta.smallest_key.clone(),
                largest_key: f.meta.largest_key.clone(),
            })
            .collect();
        Ok(LiveFiles {
            files,
            total_bytes: version.total_bytes(),
        })
    }

    /// Background compaction indicators
    pub fn compaction_counters(&self) -> CompactionCounters {
        self.inner.compaction_counters()
    }

    /// Files and bytes per level
    pub fn level_summary(&self) -> Vec<LevelSummary> {
        self.inner.state.lock().version.summary()
    }

    /// Stop background work and sync the WAL. Later calls are no-ops.
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }

    pub(crate) fn merged_sources(&self, read: ReadOptions) -> Result<MergingIterator> {
        let snapshot = self.inner.snapshot()?;
        let version = snapshot.version;
        let mut sources: Vec<Box<dyn EntryIterator>> = Vec::new();
        sources.push(Box::new(MemTableIterator::new(snapshot.mem)));
        for mem in snapshot.imm {
            sources.push(Box::new(MemTableIterator::new(mem)));
        }
        for file in version.files(0) {
            sources.push(Box::new(file.reader.iter(read)?));
        }
        for level in 1..version.num_levels() {
            let files = version.files(level);
            if !files.is_empty() {
                sources.push(Box::new(LevelIterator::new(files.to_vec(), read)));
            }
        }
        Ok(MergingIterator::new(sources))
    }
}

impl DbInner {
    fn alloc_file_number(&self) -> FileNumber {
        self.next_file_number.fetch_add(1, Ordering::SeqCst)
    }

    fn check_writable(&self, state: &DbState) -> Result<()> {
        if state.closed {
            return Err(EngineError::Closed);
        }
        match &state.bg_error {
            Some(e) => Err(EngineError::Internal(format!("Background error: {}", e))),
            None => Ok(()),
        }
    }

    fn snapshot(&self) -> Result<Snapshot> {
        let state = self.state.lock();
        if state.closed {
            return Err(EngineError::Closed);
        }
        Ok(Snapshot {
            mem: Arc::clone(&state.mem),
            imm: state.imm.iter().rev().cloned().collect(),
            version: Arc::clone(&state.version),
        })
    }

    fn write(&self, entry: Entry, write: &WriteOptions) -> Result<()> {
        let start = Instant::now();
        let stats = &self.options.statistics;
        let bytes = entry.size() as u64;
        let deleted = entry.value.is_tombstone();

        let mut state = self.state.lock();
        self.check_writable(&state)?;
        if write.disable_wal {
            state.unlogged_writes = true;
        } else if let Some(wal) = &state.wal {
            let record = match &entry.value {
                ValueEntry::Value(v) => WalRecord::put(&entry.key, v),
                ValueEntry::Tombstone => WalRecord::delete(&entry.key),
            };
            let written = wal.append(&record, write.sync)?;
            stats.tick(Ticker::WalFileBytes, written);
            if write.sync {
                stats.tick(Ticker::WalFileSynced, 1);
            }
        }
        state.mem.insert(entry);
        if state.mem.should_flush(self.options.write_buffer_size) {
            self.switch_memtable(&mut state)?;
        }
        drop(state);

        let ticker = if deleted {
            Ticker::NumberKeysDeleted
        } else {
            Ticker::NumberKeysWritten
        };
        stats.tick(ticker, 1);
        stats.tick(Ticker::BytesWritten, bytes);
        stats.observe(HistogramType::BytesPerWrite, bytes);
        stats.observe(HistogramType::DbWrite, start.elapsed().as_micros() as u64);
        Ok(())
    }

    /// Freeze the mutable memtable, stalling while the frozen queue is full
    fn switch_memtable(&self, state: &mut MutexGuard<'_, DbState>) -> Result<()> {
        let max_imm = self.max_write_buffers - 1;
        if state.imm.len() >= max_imm {
            let stall = Instant::now();
            while state.imm.len() >= max_imm {
                self.check_writable(state)?;
                self.cond.wait(state);
            }
            self.options
                .statistics
                .tick(Ticker::StallMicros, stall.elapsed().as_micros() as u64);
        }
        self.check_writable(state)?;

        let number = self.alloc_file_number();
        let wal = WalWriter::create(&self.path, number)?;
        state.wal = Some(Arc::new(wal));
        let frozen = std::mem::replace(&mut state.mem, Arc::new(MemTable::new(number)));
        debug!(
            epoch = frozen.epoch(),
            bytes = frozen.size(),
            entries = frozen.len(),
            "Memtable frozen"
        );
        state.imm.push_back(frozen);
        self.schedule_flush(state);
        Ok(())
    }

    fn schedule_flush(&self, state: &mut DbState) {
        if state.flush_scheduled || state.imm.is_empty() {
            return;
        }
        state.flush_scheduled = self.jobs.send(Job::Flush).is_ok();
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.check_writable(&state)?;
        if !state.mem.is_empty() {
            self.switch_memtable(&mut state)?;
        }
        while !state.imm.is_empty() {
            self.check_writable(&state)?;
            self.cond.wait(&mut state);
        }
        self.check_writable(&state)
    }

    fn get(&self, key: &str, read: &ReadOptions) -> Result<Option<String>> {
        let start = Instant::now();
        let stats = &self.options.statistics;
        let snapshot = self.snapshot()?;

        let value = match self.lookup(&snapshot, key, read)? {
            Some(ValueEntry::Value(v)) => Some(v),
            _ => None,
        };
        stats.tick(Ticker::NumberKeysRead, 1);
        if let Some(v) = &value {
            stats.tick(Ticker::BytesRead, v.len() as u64);
        }
        stats.observe(HistogramType::DbGet, start.elapsed().as_micros() as u64);
        Ok(value)
    }

    /// Newest entry for `key`: memtables, then L0 newest first, then one
    /// file per sorted level
    fn lookup(&self, snapshot: &Snapshot, key: &str, read: &ReadOptions) -> Result<Option<ValueEntry>> {
        let stats = &self.options.statistics;
        for mem in std::iter::once(&snapshot.mem).chain(snapshot.imm.iter()) {
            if let Some(entry) = mem.get(key) {
                stats.tick(Ticker::MemtableHit, 1);
                return Ok(Some(entry));
            }
        }
        stats.tick(Ticker::MemtableMiss, 1);

        let version = &snapshot.version;
        for file in version.files(0) {
            if !file.meta.may_contain_key(key) {
                continue;
            }
            if let Some(entry) = file.reader.get(key, read)? {
                stats.tick(Ticker::GetHitL0, 1);
                return Ok(Some(entry));
            }
        }
        for level in 1..version.num_levels() {
            let Some(file) = version.file_for_key(level, key) else {
                continue;
            };
            if let Some(entry) = file.reader.get(key, read)? {
                let ticker = if level == 1 {
                    Ticker::GetHitL1
                } else {
                    Ticker::GetHitL2AndUp
                };
                stats.tick(ticker, 1);
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    fn compaction_counters(&self) -> CompactionCounters {
        let state = self.state.lock();
        if state.closed || state.bg_error.is_some() {
            // Nothing further will be scheduled
            return CompactionCounters {
                running: state.running_compactions,
                ..Default::default()
            };
        }
        CompactionCounters {
            running: state.running_compactions,
            pending_bytes: state.picker.pending_bytes(&state.version),
            pending: state.picker.needs_compaction(&state.version),
        }
    }

    fn worker_loop(&self, jobs: Receiver<Job>) {
        while let Ok(job) = jobs.recv() {
            match job {
                Job::Flush => self.run_flush(),
                Job::Compact(task) => self.run_compaction(task),
                Job::Shutdown => break,
            }
        }
    }

    fn run_flush(&self) {
        loop {
            let mem = {
                let mut state = self.state.lock();
                match state.imm.front() {
                    Some(mem) if !state.closed => Arc::clone(mem),
                    _ => {
                        state.flush_scheduled = false;
                        self.cond.notify_all();
                        return;
                    }
                }
            };
            if let Err(e) = self.flush_memtable(&mem) {
                error!("Flush of memtable {} failed: {}", mem.epoch(), e);
                let mut state = self.state.lock();
                state.bg_error.get_or_insert_with(|| e.to_string());
                state.flush_scheduled = false;
                self.cond.notify_all();
                return;
            }
        }
    }

    /// Write the oldest frozen memtable to L0 and retire its log
    fn flush_memtable(&self, mem: &Arc<MemTable>) -> Result<()> {
        let start = Instant::now();
        let mut edit = VersionEdit::default();
        let mut written = 0;
        if !mem.is_empty() {
            let number = self.alloc_file_number();
            let meta = write_memtable(&self.path, number, mem, self.build)?;
            written = meta.file_size;
            let path = self.path.join(table_file_name(number));
            let reader = match TableReader::open(&path, number, 0, Arc::clone(&self.ctx)) {
                Ok(reader) => reader,
                Err(e) => {
                    let _ = fs::remove_file(&path);
                    return Err(e);
                }
            };
            edit.add(TableHandle::new(meta, reader));
        }

        {
            let mut state = self.state.lock();
            let version = Arc::new(state.version.apply(&edit));
            version
                .manifest(self.next_file_number.load(Ordering::SeqCst))
                .store(&self.path)?;
            state.version = version;
            state.imm.pop_front();
            self.cond.notify_all();
            self.maybe_schedule_compaction(&mut state);
        }

        let log = self.path.join(log_file_name(mem.log_number()));
        if let Err(e) = fs::remove_file(&log) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove log {:?}: {}", log, e);
            }
        }

        let stats = &self.options.statistics;
        stats.tick(Ticker::FlushWriteBytes, written);
        stats.observe(HistogramType::FlushTime, start.elapsed().as_micros() as u64);
        debug!(
            epoch = mem.epoch(),
            entries = mem.len(),
            bytes = written,
            "Flushed memtable to L0"
        );
        Ok(())
    }

    /// Hand picked compactions to the workers until the job limit is hit
    fn maybe_schedule_compaction(&self, state: &mut DbState) {
        if state.closed || state.bg_error.is_some() {
            return;
        }
        let limit = self.options.max_background_jobs.max(1) as u64;
        while state.running_compactions < limit {
            let version = Arc::clone(&state.version);
            let Some(task) = state.picker.pick(&version, &state.busy) else {
                break;
            };
            for file in task.input_files() {
                state.busy.insert(file.number());
            }
            state.running_compactions += 1;
            debug!(?task, "Scheduling compaction");

            if let Err(err) = self.jobs.send(Job::Compact(task)) {
                if let Job::Compact(task) = err.into_inner() {
                    release(state, &task);
                }
                break;
            }
        }
    }

    fn run_compaction(&self, task: CompactionTask) {
        let start = Instant::now();
        {
            let mut state = self.state.lock();
            if state.closed {
                release(&mut state, &task);
                self.cond.notify_all();
                return;
            }
        }
        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed) + 1;

        let result = CompactionJob::new(
            &task,
            &self.path,
            self.build,
            self.options.statistics.clone(),
        )
        .run(|| self.alloc_file_number())
        .and_then(|output| self.open_outputs(output));

        let mut state = self.state.lock();
        let installed = result.and_then(|(output, handles)| {
            self.install_compaction(&mut state, &task, handles)?;
            Ok(output)
        });
        release(&mut state, &task);
        let output = match installed {
            Ok(output) => output,
            Err(e) => {
                error!(job_id, ?task, "Compaction failed: {}", e);
                state.bg_error.get_or_insert_with(|| e.to_string());
                self.cond.notify_all();
                return;
            }
        };
        self.cond.notify_all();
        self.maybe_schedule_compaction(&mut state);
        drop(state);

        for file in task.input_files() {
            file.reader.evict_metadata();
            if let Err(e) = fs::remove_file(file.reader.path()) {
                warn!("Failed to remove compacted table {}: {}", file.number(), e);
            }
        }

        let elapsed = start.elapsed();
        self.options
            .statistics
            .observe(HistogramType::CompactionTime, elapsed.as_micros() as u64);
        let info = CompactionJobInfo {
            job_id,
            reason: task.reason,
            input_level: task.input_level,
            output_level: task.output_level,
            num_input_files: task.num_input_files(),
            num_output_files: output.tables.len(),
            bytes_read: output.bytes_read,
            bytes_written: output.bytes_written,
            num_dropped_keys: output.dropped_keys,
            elapsed,
        };
        info!(
            job_id,
            reason = %info.reason,
            from = info.input_level,
            to = info.output_level,
            inputs = info.num_input_files,
            outputs = info.num_output_files,
            bytes_written = info.bytes_written,
            "Compaction finished"
        );
        for listener in &self.options.listeners {
            listener.on_compaction_completed(&info);
        }
    }

    fn open_outputs(&self, output: JobOutput) -> Result<(JobOutput, Vec<Arc<TableHandle>>)> {
        let mut handles = Vec::with_capacity(output.tables.len());
        for meta in &output.tables {
            let path = self.path.join(table_file_name(meta.number));
            match TableReader::open(&path, meta.number, meta.level, Arc::clone(&self.ctx)) {
                Ok(reader) => handles.push(TableHandle::new(meta.clone(), reader)),
                Err(e) => {
                    for meta in &output.tables {
                        let _ = fs::remove_file(self.path.join(table_file_name(meta.number)));
                    }
                    return Err(e);
                }
            }
        }
        Ok((output, handles))
    }

    fn install_compaction(
        &self,
        state: &mut DbState,
        task: &CompactionTask,
        outputs: Vec<Arc<TableHandle>>,
    ) -> Result<()> {
        let mut edit = VersionEdit::default();
        for handle in outputs {
            edit.add(handle);
        }
        for file in task.input_files() {
            edit.delete(file.number());
        }
        let version = Arc::new(state.version.apply(&edit));
        version
            .manifest(self.next_file_number.load(Ordering::SeqCst))
            .store(&self.path)?;
        state.version = version;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut result = Ok(());
        let needs_flush = {
            let state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.unlogged_writes && state.bg_error.is_none()
        };
        // Writes that skipped the WAL exist only in memory
        if needs_flush {
            result = self.flush();
        }

        let wal = {
            let mut state = self.state.lock();
            if state.closed {
                return result;
            }
            state.closed = true;
            self.cond.notify_all();
            state.wal.clone()
        };

        let workers = std::mem::take(&mut *self.workers.lock());
        for _ in 0..workers.len() {
            let _ = self.jobs.send(Job::Shutdown);
        }
        for worker in workers {
            if worker.join().is_err() && result.is_ok() {
                result = Err(EngineError::Internal("background worker panicked".into()));
            }
        }
        if let Some(wal) = wal {
            if let Err(e) = wal.sync() {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        info!(path = %self.path.display(), "Closed database");
        result
    }
}

/// Return a task's files and job slot
fn release(state: &mut DbState, task: &CompactionTask) {
    for file in task.input_files() {
        state.busy.remove(&file.number());
    }
    state.running_compactions = state.running_compactions.saturating_sub(1);
}

fn write_memtable(dir: &Path, number: FileNumber, mem: &MemTable, build: BuildOptions) -> Result<TableMeta> {
    let mut builder = TableBuilder::new(dir.join(table_file_name(number)), number, build)?;
    for entry in mem.entries() {
        if let Err(e) = builder.add(entry) {
            let _ = builder.abandon();
            return Err(e);
        }
    }
    builder.finish(mem.epoch(), mem.epoch())
}

/// Delete tables a crashed flush or compaction left behind
fn remove_orphan_tables(dir: &Path, version: &Version) -> Result<()> {
    let live: HashSet<FileNumber> = version.all_files().map(|f| f.number()).collect();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let number = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(".sst"))
            .and_then(|n| n.parse::<FileNumber>().ok());
        if let Some(number) = number {
            if !live.contains(&number) {
                warn!("Removing orphaned table {:?}", path);
                fs::remove_file(&path)?;
            }
        }
    }
    Ok(())
}

fn validate_options(options: &DbOptions) -> Result<()> {
    let invalid = |message: String| Err(EngineError::Config(message));
    if options.num_levels == 0 {
        return invalid("num_levels must be at least 1".into());
    }
    if options.compaction_style == CompactionStyle::Level && options.num_levels < 2 {
        return invalid(format!(
            "level compaction requires num_levels >= 2, got {}",
            options.num_levels
        ));
    }
    if options.write_buffer_size == 0 {
        return invalid("write_buffer_size must be positive".into());
    }
    if options.table.block_size == 0 {
        return invalid("block_size must be positive".into());
    }
    if options.target_file_size_base == 0 {
        return invalid("target_file_size_base must be positive".into());
    }
    if options.max_bytes_for_level_base == 0 {
        return invalid("max_bytes_for_level_base must be positive".into());
    }
    if !(options.max_bytes_for_level_multiplier > 0.0) {
        return invalid(format!(
            "max_bytes_for_level_multiplier must be positive, got {}",
            options.max_bytes_for_level_multiplier
        ));
    }
    if let Some(policy) = &options.table.filter_policy {
        if !policy.bits_per_key.is_finite() || policy.bits_per_key < 0.0 {
            return invalid(format!("invalid bits_per_key {}", policy.bits_per_key));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::FilterPolicy;
    use crate::storage::EventListener;
    use std::sync::atomic::AtomicUsize;
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

    fn wait_quiescent(db: &Db) {
        let deadline = Instant::now() + Duration::from_secs(30);
        while !db.compaction_counters().is_quiescent() {
            assert!(Instant::now() < deadline, "compactions never drained");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[derive(Default)]
    struct CountingListener {
        calls: AtomicUsize,
    }

    impl EventListener for CountingListener {
        fn on_compaction_completed(&self, _info: &CompactionJobInfo) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(dir.path().join("db"), small_options()).unwrap();
        let write = WriteOptions::default();
        let read = ReadOptions::default();

        db.put("a", "1", &write).unwrap();
        db.put("a", "2", &write).unwrap();
        assert_eq!(db.get("a", &read).unwrap(), Some("2".to_string()));

        db.delete("a", &write).unwrap();
        db.delete("never-written", &write).unwrap();
        assert_eq!(db.get("a", &read).unwrap(), None);
        db.close().unwrap();
        db.close().unwrap();
        assert!(matches!(db.get("a", &read), Err(EngineError::Closed)));
    }

    #[test]
    fn test_compaction_keeps_latest_values() {
        let dir = TempDir::new().unwrap();
        let listener = Arc::new(CountingListener::default());
        let mut options = small_options();
        options.add_listener(listener.clone());
        let db = Db::open(dir.path(), options).unwrap();
        let write = WriteOptions::default();

        for round in 0..3 {
            for i in 0..300 {
                db.put(&format!("key{:04}", i), &format!("value{}-{}", round, i), &write)
                    .unwrap();
            }
        }
        for i in (0..300).step_by(3) {
            db.delete(&format!("key{:04}", i), &write).unwrap();
        }
        let live = db.live_files(true).unwrap();
        assert!(!live.files.is_empty());
        wait_quiescent(&db);

        assert!(listener.calls.load(Ordering::SeqCst) > 0);
        let read = ReadOptions::default();
        for i in 0..300 {
            let value = db.get(&format!("key{:04}", i), &read).unwrap();
            if i % 3 == 0 {
                assert_eq!(value, None);
            } else {
                assert_eq!(value, Some(format!("value2-{}", i)));
            }
        }
        let summary = db.level_summary();
        assert!(summary.iter().skip(1).any(|l| l.files > 0));
    }

    #[test]
    fn test_reopen_replays_wal() {
        let dir = TempDir::new().unwrap();
        {
            let db = Db::open(dir.path(), small_options()).unwrap();
            db.put("k1", "v1", &WriteOptions::default()).unwrap();
            db.delete("k0", &WriteOptions::default()).unwrap();
        }
        let db = Db::open(dir.path(), small_options()).unwrap();
        assert_eq!(
            db.get("k1", &ReadOptions::default()).unwrap(),
            Some("v1".to_string())
        );
        assert_eq!(db.level_summary()[0].files, 1);
    }

    #[test]
    fn test_unlogged_writes_flushed_on_close() {
        let dir = TempDir::new().unwrap();
        let write = WriteOptions {
            disable_wal: true,
            ..Default::default()
        };
        {
            let db = Db::open(dir.path(), small_options()).unwrap();
            db.put("k", "v", &write).unwrap();
            db.close().unwrap();
        }
        let db = Db::open(dir.path(), small_options()).unwrap();
        assert_eq!(
            db.get("k", &ReadOptions::default()).unwrap(),
            Some("v".to_string())
        );
    }

    #[test]
    fn test_invalid_options_rejected() {
        let dir = TempDir::new().unwrap();
        let options = DbOptions {
            num_levels: 1,
            ..small_options()
        };
        let err = Db::open(dir.path(), options).err().unwrap();
        assert!(err.is_config(), "{}", err);

        let missing = DbOptions {
            create_if_missing: false,
            ..small_options()
        };
        assert!(Db::open(dir.path().join("missing"), missing).is_err());
    }

    #[test]
    fn test_disabled_compactions_report_nothing_pending() {
        let dir = TempDir::new().unwrap();
        let options = DbOptions {
            disable_auto_compactions: true,
            ..small_options()
        };
        let db = Db::open(dir.path(), options).unwrap();
        for i in 0..500 {
            db.put(&format!("k{}", i), "0123456789", &WriteOptions::default())
                .unwrap();
        }
        db.live_files(true).unwrap();
        assert!(db.level_summary()[0].files >= 2);
        assert!(db.compaction_counters().is_quiescent());
    }

    #[test]
    fn test_destroy_removes_engine_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        {
            let db = Db::open(&path, small_options()).unwrap();
            db.put("k", "v", &WriteOptions::default()).unwrap();
            db.live_files(true).unwrap();
        }
        Db::destroy(&path).unwrap();
        assert!(!path.exists());
        Db::destroy(&path).unwrap();
    }
}
