//! LsmTune Core - parameterized trace replay for a tunable LSM engine
//!
//! A benchmark run turns a handful of sizing knobs into engine options,
//! replays a key-value trace against the engine, waits until background
//! compaction has drained, and reports what happened.
//!
//! # Architecture
//!
//! - **Parameter model** ([`params`]): the run configuration and the sizes
//!   derived from it
//! - **Configuration adapter** ([`adapter`]): configuration to engine options
//! - **Workload** ([`workload`]): trace parsing, replay and generation
//! - **Quiescence barrier** ([`barrier`]): waits for compactions to finish
//! - **Runner** ([`runner`]): sequences one run and writes the [`report`]
//!
//! The engine is the `lsmtune-engine` crate. Replay goes through its
//! `KvEngine` and `Cursor` traits, the barrier through `CompactionProbe`
//! and `EventListener`.

pub mod adapter;
pub mod barrier;
pub mod params;
pub mod report;
pub mod runner;
pub mod workload;

mod error;

pub use error::{LsmError, Result};

pub use barrier::{wait_for_compactions, CompactionSignal};
pub use params::BenchConfig;
pub use report::RunReport;
pub use runner::Runner;

/// LsmTune version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
