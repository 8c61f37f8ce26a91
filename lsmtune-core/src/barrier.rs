//! Quiescence barrier
//!
//! Compaction completions arrive as edge-triggered callbacks on engine
//! threads, and the engine's counters can read zero between two batches of
//! work. The barrier combines both: every completion wakes the waiter early,
//! and a bounded wait makes the waiter re-sample the counters at least once
//! per poll interval even when no callback arrives.
//!
//! ```text
//!   Armed ──(completion event)──► Signaled
//!     │                              │
//!     └──(all counters zero in one sample)──► Drained
//! ```

use lsmtune_engine::{CompactionCounters, CompactionJobInfo, CompactionProbe, EventListener};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::debug;

/// Upper bound on the time between two counter samples
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Barrier progress for the current run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierState {
    /// Listener attached, no completion seen yet
    Armed,
    /// At least one completion event observed
    Signaled,
    /// All background work observed finished
    Drained,
}

#[derive(Debug)]
struct SignalState {
    state: BarrierState,
    events: u64,
}

/// Completion signal shared by one waiter and the engine's listener
/// callbacks. Register it with the engine (it is an [`EventListener`]) and
/// pass the same object to [`wait_for_compactions`].
#[derive(Debug)]
pub struct CompactionSignal {
    inner: Mutex<SignalState>,
    cond: Condvar,
}

impl CompactionSignal {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SignalState {
                state: BarrierState::Armed,
                events: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Re-arm for a new run
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BarrierState::Armed;
        inner.events = 0;
    }

    /// Record a completion and wake the waiter
    pub fn notify(&self) {
        let mut inner = self.inner.lock();
        inner.events += 1;
        if inner.state == BarrierState::Armed {
            inner.state = BarrierState::Signaled;
        }
        self.cond.notify_all();
    }

    pub fn state(&self) -> BarrierState {
        self.inner.lock().state
    }

    /// Completion events seen since the last reset
    pub fn events(&self) -> u64 {
        self.inner.lock().events
    }
}

impl Default for CompactionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl EventListener for CompactionSignal {
    fn on_compaction_completed(&self, _info: &CompactionJobInfo) {
        self.notify();
    }
}

/// How the barrier resolved
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BarrierOutcome {
    /// Counter samples taken, the final one included
    pub polls: u64,
    /// Completion events seen during the run
    pub events: u64,
    pub elapsed: Duration,
    /// The all-zero sample that ended the wait
    pub counters: CompactionCounters,
}

/// Block until `probe` reports no running or pending compaction work.
///
/// The counters are sampled immediately, then after every completion event
/// and at least once per `poll_interval`. The wait ends on the first sample
/// in which all three counters are zero.
pub fn wait_for_compactions<P>(probe: &P, signal: &CompactionSignal, poll_interval: Duration) -> BarrierOutcome
where
    P: CompactionProbe + ?Sized,
{
    let start = Instant::now();
    let mut polls = 0u64;
    let mut inner = signal.inner.lock();
    loop {
        // Sampling under the lock means no event can slip in before the wait
        let counters = probe.compaction_counters();
        polls += 1;
        if counters.is_quiescent() {
            inner.state = BarrierState::Drained;
            let outcome = BarrierOutcome {
                polls,
                events: inner.events,
                elapsed: start.elapsed(),
                counters,
            };
            debug!(polls, events = outcome.events, "Compactions drained");
            return outcome;
        }
        debug!(%counters, state = ?inner.state, "Waiting for compactions");
        signal.cond.wait_for(&mut inner, poll_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    /// Replays a fixed sequence of samples, repeating the last one
    struct ScriptedProbe {
        samples: Mutex<VecDeque<CompactionCounters>>,
        taken: Mutex<u64>,
    }

    impl ScriptedProbe {
        fn new(samples: Vec<CompactionCounters>) -> Self {
            Self {
                samples: Mutex::new(samples.into()),
                taken: Mutex::new(0),
            }
        }
    }

    impl CompactionProbe for ScriptedProbe {
        fn compaction_counters(&self) -> CompactionCounters {
            *self.taken.lock() += 1;
            let mut samples = self.samples.lock();
            if samples.len() > 1 {
                samples.pop_front().unwrap_or_default()
            } else {
                samples.front().copied().unwrap_or_default()
            }
        }
    }

    /// Busy until `done` is set
    struct FlagProbe {
        done: AtomicBool,
    }

    impl CompactionProbe for FlagProbe {
        fn compaction_counters(&self) -> CompactionCounters {
            if self.done.load(Ordering::SeqCst) {
                CompactionCounters::default()
            } else {
                CompactionCounters {
                    running: 1,
                    ..Default::default()
                }
            }
        }
    }

    fn busy(pending_bytes: u64) -> CompactionCounters {
        CompactionCounters {
            pending_bytes,
            ..Default::default()
        }
    }

    #[test]
    fn test_waits_for_all_zero_sample() {
        let probe = ScriptedProbe::new(vec![
            busy(100),
            CompactionCounters {
                pending: true,
                ..Default::default()
            },
            CompactionCounters {
                running: 2,
                ..Default::default()
            },
            CompactionCounters::default(),
        ]);
        let signal = CompactionSignal::new();

        let outcome = wait_for_compactions(&probe, &signal, Duration::from_millis(5));
        assert_eq!(outcome.polls, 4);
        assert_eq!(*probe.taken.lock(), 4);
        assert!(outcome.counters.is_quiescent());
        assert_eq!(signal.state(), BarrierState::Drained);
    }

    #[test]
    fn test_already_quiescent_returns_immediately() {
        let probe = ScriptedProbe::new(vec![CompactionCounters::default()]);
        let signal = CompactionSignal::new();
        let outcome = wait_for_compactions(&probe, &signal, Duration::from_secs(60));
        assert_eq!(outcome.polls, 1);
        assert!(outcome.elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_signal_wakes_waiter_early() {
        let probe = Arc::new(FlagProbe {
            done: AtomicBool::new(false),
        });
        let signal = Arc::new(CompactionSignal::new());

        let handle = {
            let probe = Arc::clone(&probe);
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                probe.done.store(true, Ordering::SeqCst);
                signal.notify();
            })
        };

        let outcome = wait_for_compactions(probe.as_ref(), &signal, Duration::from_secs(60));
        handle.join().unwrap();
        assert!(outcome.elapsed < Duration::from_secs(30));
        assert_eq!(outcome.events, 1);
        assert_eq!(signal.state(), BarrierState::Drained);
    }

    #[test]
    fn test_missed_signal_bounded_by_poll_interval() {
        let probe = Arc::new(FlagProbe {
            done: AtomicBool::new(false),
        });
        let signal = CompactionSignal::new();

        let flip_after = Duration::from_millis(60);
        let flipper = {
            let probe = Arc::clone(&probe);
            thread::spawn(move || {
                thread::sleep(flip_after);
                probe.done.store(true, Ordering::SeqCst);
            })
        };

        let interval = Duration::from_millis(50);
        let outcome = wait_for_compactions(probe.as_ref(), &signal, interval);
        flipper.join().unwrap();
        assert!(outcome.polls >= 2);
        assert_eq!(outcome.events, 0);
        assert!(outcome.elapsed >= flip_after);
        // The first sample after the flip ends the wait; one extra
        // interval covers scheduler delay
        assert!(
            outcome.elapsed < flip_after + interval * 3,
            "waited {:?}",
            outcome.elapsed
        );
    }

    #[test]
    fn test_reset_rearms() {
        let signal = CompactionSignal::new();
        assert_eq!(signal.state(), BarrierState::Armed);
        signal.notify();
        signal.notify();
        assert_eq!(signal.state(), BarrierState::Signaled);
        assert_eq!(signal.events(), 2);
        signal.reset();
        assert_eq!(signal.state(), BarrierState::Armed);
        assert_eq!(signal.events(), 0);
    }
}
