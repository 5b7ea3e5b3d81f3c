// Scheduler module - drives the measurement session
//
// This module implements the collection loop: one sampling cycle at a
// fixed cadence until the session deadline passes or a stop is requested.
//
// # Architecture
// - A single task owns the sampler and the recorder; cycles never overlap
// - The sleep between cycles is the only suspension point and is raced
//   against the shutdown signal
// - A cycle that has started always completes and is recorded
// - Probe and persistence failures are logged and never stop the loop

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::sampler::Sampler;
use crate::session::Session;
use crate::storage::SessionRecorder;

/// Lifecycle of a collection loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Finished,
}

/// Why the loop finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Deadline,
    Cancelled,
}

/// Result of a completed run
#[derive(Debug)]
pub struct SessionOutcome {
    /// The finished, immutable session
    pub session: Session,

    pub cycles: usize,

    pub stop_reason: StopReason,

    /// Samples that could not be written to the session file
    pub unpersisted: usize,
}

/// Collection loop for one session
pub struct SessionScheduler {
    sampler: Sampler,

    recorder: SessionRecorder,

    /// Session length measured from the start of the first cycle
    duration: Duration,

    /// Time between cycle starts
    interval: Duration,

    state: LoopState,
}

impl SessionScheduler {
    /// Creates a scheduler in the `Idle` state
    ///
    /// # Arguments
    /// * `sampler` - Produces one Sample per cycle
    /// * `recorder` - Freshly created recorder for this session
    /// * `duration` - Session length; zero still yields one sample
    /// * `interval` - Cadence between cycle starts; must be non-zero
    pub fn new(sampler: Sampler, recorder: SessionRecorder, duration: Duration, interval: Duration) -> Self {
        SessionScheduler {
            sampler,
            recorder,
            duration,
            interval,
            state: LoopState::Idle,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> LoopState {
        self.state
    }

    fn transition(&mut self, next: LoopState) {
        debug!("Collection loop {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Runs the session to completion
    ///
    /// # Behavior
    /// - The deadline is checked before every cycle except the first, so
    ///   at least one sample is always collected
    /// - The next cycle starts `interval` after the previous one started,
    ///   or immediately when the previous cycle overran
    /// - When the next start would fall on or after the deadline the loop
    ///   finishes without waiting for it
    /// - `shutdown` turning `true` ends the loop after the in-flight cycle
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> SessionOutcome {
        self.transition(LoopState::Running);

        let started = Instant::now();
        // No representable deadline means the window never closes on its own
        let deadline = started.checked_add(self.duration);
        let mut cycles = 0usize;

        info!(
            "Starting collection loop: {} metric(s), every {}s for {}s",
            self.sampler.metric_ids().len(),
            self.interval.as_secs(),
            self.duration.as_secs()
        );

        let stop_reason = loop {
            let cycle_start = Instant::now();
            if cycles > 0 && deadline.is_some_and(|d| cycle_start >= d) {
                break StopReason::Deadline;
            }

            let sample = self.sampler.collect_one().await;
            let available = sample.readings.values().filter(|v| v.is_some()).count();
            let total = sample.readings.len();
            let timestamp = sample.timestamp;
            cycles += 1;

            match self.recorder.append(sample) {
                Ok(()) => info!(
                    "{} - Sample {} recorded ({}/{} readings available)",
                    timestamp.format("%Y-%m-%d %H:%M:%S"),
                    cycles,
                    available,
                    total
                ),
                Err(e) => error!(
                    "Failed to persist sample {} ({} pending, will retry): {}",
                    cycles,
                    self.recorder.pending(),
                    e
                ),
            }

            if *shutdown.borrow() {
                break StopReason::Cancelled;
            }

            let next_tick = match cycle_start.checked_add(self.interval) {
                Some(tick) if deadline.map_or(true, |d| tick < d) => tick,
                _ => break StopReason::Deadline,
            };

            tokio::select! {
                _ = sleep_until(next_tick) => {}
                _ = wait_for_shutdown(&mut shutdown) => break StopReason::Cancelled,
            }
        };

        if self.recorder.pending() > 0 {
            if let Err(e) = self.recorder.flush() {
                error!(
                    "{} sample(s) could not be persisted to {}: {}",
                    self.recorder.pending(),
                    self.recorder.path().display(),
                    e
                );
            }
        }

        self.transition(LoopState::Finished);

        match stop_reason {
            StopReason::Deadline => info!("Collection finished after {} cycle(s)", cycles),
            StopReason::Cancelled => warn!("Collection stopped early after {} cycle(s)", cycles),
        }

        let unpersisted = self.recorder.pending();
        SessionOutcome {
            session: self.recorder.into_session(),
            cycles,
            stop_reason,
            unpersisted,
        }
    }
}

/// Resolves once the shutdown flag is set
///
/// If the sender is gone no stop can arrive any more, so this never
/// resolves.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricSource, ProbeError};
    use crate::session::{Readings, SessionHeader};
    use crate::storage::SessionRecorder;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts its invocations and reports the count as latency
    struct CountingSource {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingSource {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(CountingSource {
                calls: AtomicUsize::new(0),
                delay,
            })
        }
    }

    #[async_trait]
    impl MetricSource for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        fn metric_ids(&self) -> Vec<String> {
            vec!["latency:test".to_string()]
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(30)
        }

        async fn probe(&self) -> Result<Readings, ProbeError> {
            tokio::time::sleep(self.delay).await;
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let mut readings = Readings::new();
            readings.insert("latency:test".to_string(), Some(n as f64));
            Ok(readings)
        }
    }

    fn scheduler(path: &Path, source: Arc<CountingSource>, duration: u64, interval: u64) -> SessionScheduler {
        let ids = vec!["latency:test".to_string(), "download".to_string()];
        let header = SessionHeader::new(
            "Test Site",
            Duration::from_secs(duration),
            Duration::from_secs(interval),
            Vec::new(),
        );
        let recorder = SessionRecorder::create(path, header).unwrap();
        let sources: Vec<Arc<dyn MetricSource>> = vec![source];

        SessionScheduler::new(
            Sampler::new(sources, ids),
            recorder,
            Duration::from_secs(duration),
            Duration::from_secs(interval),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_duration_collects_one_sample() {
        let dir = tempfile::tempdir().unwrap();
        let (_tx, rx) = watch::channel(false);
        let scheduler = scheduler(&dir.path().join("s.jsonl"), CountingSource::new(Duration::ZERO), 0, 5);
        assert_eq!(scheduler.state(), LoopState::Idle);

        let outcome = scheduler.run(rx).await;

        assert_eq!(outcome.cycles, 1);
        assert_eq!(outcome.session.len(), 1);
        assert_eq!(outcome.stop_reason, StopReason::Deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_window_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let (_tx, rx) = watch::channel(false);

        // Neither the deadline nor the second tick fits in an Instant
        let outcome = scheduler(
            &dir.path().join("s.jsonl"),
            CountingSource::new(Duration::ZERO),
            u64::MAX,
            u64::MAX,
        )
        .run(rx)
        .await;

        assert_eq!(outcome.cycles, 1);
        assert_eq!(outcome.stop_reason, StopReason::Deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_window_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            let _ = tx.send(true);
        });

        let outcome = scheduler(&dir.path().join("s.jsonl"), CountingSource::new(Duration::ZERO), u64::MAX, 5)
            .run(rx)
            .await;

        // Cycles at t=0, 5, 10
        assert_eq!(outcome.cycles, 3);
        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_count_for_duration_and_interval() {
        let dir = tempfile::tempdir().unwrap();
        let (_tx, rx) = watch::channel(false);
        let start = Instant::now();

        let outcome = scheduler(&dir.path().join("s.jsonl"), CountingSource::new(Duration::ZERO), 22, 5)
            .run(rx)
            .await;

        // Cycles at t=0, 5, 10, 15, 20
        assert_eq!(outcome.cycles, 5);
        assert_eq!(outcome.session.len(), 5);
        assert_eq!(outcome.stop_reason, StopReason::Deadline);
        assert!(start.elapsed() < Duration::from_secs(22));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_on_deadline_does_not_start_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (_tx, rx) = watch::channel(false);

        let outcome = scheduler(&dir.path().join("s.jsonl"), CountingSource::new(Duration::ZERO), 20, 5)
            .run(rx)
            .await;

        assert_eq!(outcome.cycles, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_shorter_than_interval() {
        let dir = tempfile::tempdir().unwrap();
        let (_tx, rx) = watch::channel(false);

        let outcome = scheduler(&dir.path().join("s.jsonl"), CountingSource::new(Duration::ZERO), 3, 5)
            .run(rx)
            .await;

        assert_eq!(outcome.cycles, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_cycles_start_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let (_tx, rx) = watch::channel(false);
        let source = CountingSource::new(Duration::from_secs(7));

        let outcome = scheduler(&dir.path().join("s.jsonl"), Arc::clone(&source), 22, 5)
            .run(rx)
            .await;

        // Cycles start at t=0, 7, 14, 21; the one ending at 28 is past the deadline
        assert_eq!(outcome.cycles, 4);
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_sleep() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            tx.send(true).unwrap();
        });

        let start = Instant::now();
        let outcome = scheduler(&dir.path().join("s.jsonl"), CountingSource::new(Duration::ZERO), 1000, 5)
            .run(rx)
            .await;

        assert_eq!(outcome.cycles, 3);
        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            tx.send(true).unwrap();
        });

        let outcome = scheduler(&path, CountingSource::new(Duration::from_secs(4)), 1000, 5)
            .run(rx)
            .await;

        // The stop arrives mid-cycle; that cycle still completes and is recorded
        assert_eq!(outcome.cycles, 1);
        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        assert_eq!(outcome.session.samples()[0].value("latency:test"), Some(1.0));
        assert_eq!(SessionRecorder::load(&path).unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_are_persisted_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        let (_tx, rx) = watch::channel(false);

        let outcome = scheduler(&path, CountingSource::new(Duration::ZERO), 12, 4).run(rx).await;

        let reloaded = SessionRecorder::load(&path).unwrap();
        assert_eq!(reloaded, outcome.session);
        assert_eq!(outcome.unpersisted, 0);

        let values: Vec<Option<f64>> = reloaded.samples().iter().map(|s| s.value("latency:test")).collect();
        assert_eq!(values, vec![Some(1.0), Some(2.0), Some(3.0)]);
        // Unsourced metrics are still present, as unavailable
        assert!(reloaded.samples().iter().all(|s| s.readings["download"].is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistence_failure_does_not_stop_loop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        let (_tx, rx) = watch::channel(false);
        let scheduler = scheduler(&path, CountingSource::new(Duration::ZERO), 10, 5);

        std::fs::remove_file(&path).unwrap();
        let outcome = scheduler.run(rx).await;

        assert_eq!(outcome.cycles, 2);
        assert_eq!(outcome.session.len(), 2);
        assert_eq!(outcome.unpersisted, 2);
    }
}
