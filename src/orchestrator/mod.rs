//! Orchestrator - Decision Cycle Loop
//!
//! ## Responsibilities
//!
//! - Drive capture -> detect -> compute -> persist on a fixed cadence
//! - Single and continuous run modes, cycle-count or stop-flag termination
//! - Convert recoverable failures into skipped cycles, never a dead run
//!
//! One sequential loop owns the decision stream: no two cycles ever
//! overlap, so the adaptive history stays deterministic. The external
//! stop flag is read only between cycles; a cycle always completes or
//! cleanly fails before the run ends, so no partial record is persisted.

use crate::capture_manager::{CaptureManager, FrameGrabber};
use crate::detector_client::Detector;
use crate::error::{Error, Result};
use crate::history_store::HistoryStore;
use crate::models::{CycleRecord, Frame, VehicleCounts};
use crate::timing_engine::{Algorithm, TimingEngine, TimingResult};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{Instant, MissedTickBehavior};

/// Cycle state machine phases, logged as structured transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Capturing,
    Detecting,
    ComputingTiming,
    Persisting,
    Sleeping,
    Terminated,
}

impl CyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Capturing => "capturing",
            CyclePhase::Detecting => "detecting",
            CyclePhase::ComputingTiming => "computing_timing",
            CyclePhase::Persisting => "persisting",
            CyclePhase::Sleeping => "sleeping",
            CyclePhase::Terminated => "terminated",
        }
    }
}

/// Run mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One traversal, report the timing, terminate
    Single,
    /// Loop until max_cycles or an external stop
    Continuous,
}

/// Why a cycle was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Capture,
    Detection,
    InvalidInput,
}

impl SkipReason {
    /// Classify a recoverable error; `None` means fatal to the run
    pub fn classify(error: &Error) -> Option<SkipReason> {
        match error {
            Error::SourceFailed { .. } | Error::AllSourcesExhausted { .. } => {
                Some(SkipReason::Capture)
            }
            Error::DetectionUnavailable(_) | Error::DetectionTimeout(_) => {
                Some(SkipReason::Detection)
            }
            Error::InvalidInput(_) => Some(SkipReason::InvalidInput),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Capture => "capture_failed",
            SkipReason::Detection => "detection_failed",
            SkipReason::InvalidInput => "invalid_input",
        }
    }
}

/// Transient result of one full cycle, owned by the orchestrator
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub counts: VehicleCounts,
    pub timing: TimingResult,
    pub camera: usize,
    pub processing_ms: u64,
}

impl CycleOutcome {
    /// Convert into the durable record form
    pub fn to_record(&self) -> CycleRecord {
        CycleRecord {
            timestamp: Utc::now(),
            vehicle_count: self.counts.total(),
            vehicle_stats: self.counts,
            weighted_count: self.timing.weighted_count,
            green_time: self.timing.green_time,
            yellow_time: self.timing.yellow_time,
            all_red_time: self.timing.all_red_time,
            total_cycle_time: self.timing.total_cycle_time,
            algorithm: self.timing.algorithm.as_str().to_string(),
            historical_mean: self.timing.historical_mean,
            processing_ms: Some(self.processing_ms),
        }
    }
}

/// Counters for one run
#[derive(Debug, Default, Clone)]
pub struct RunStats {
    pub completed: u64,
    pub skipped: u64,
    pub capture_failures: u64,
    pub detection_failures: u64,
    pub invalid_input: u64,
    /// Timing of the most recent completed cycle
    pub last_timing: Option<TimingResult>,
}

impl RunStats {
    pub fn attempts(&self) -> u64 {
        self.completed + self.skipped
    }

    fn record_skip(&mut self, reason: SkipReason) {
        self.skipped += 1;
        match reason {
            SkipReason::Capture => self.capture_failures += 1,
            SkipReason::Detection => self.detection_failures += 1,
            SkipReason::InvalidInput => self.invalid_input += 1,
        }
    }
}

/// Run options fixed for the lifetime of one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: RunMode,
    pub algorithm: Algorithm,
    /// Pin acquisition to one camera instead of failover order
    pub camera: Option<usize>,
    /// Time between cycle starts (not between end and next start)
    pub interval: Duration,
    /// Continuous mode terminates after this many attempts
    pub max_cycles: Option<u64>,
    /// Consume frames from the continuous-capture queue
    pub continuous_capture: bool,
    /// Bounded wait for a queued frame in continuous-capture mode
    pub queue_wait: Duration,
}

/// Handle for requesting a stop between cycles
#[derive(Clone)]
pub struct StopHandle {
    running: Arc<RwLock<bool>>,
}

impl StopHandle {
    pub async fn request_stop(&self) {
        let mut running = self.running.write().await;
        if *running {
            tracing::info!("stop requested, finishing current cycle");
        }
        *running = false;
    }
}

/// Orchestrator instance
pub struct Orchestrator<G: FrameGrabber, D: Detector> {
    capture: Arc<CaptureManager<G>>,
    detector: D,
    engine: TimingEngine,
    history: Arc<HistoryStore>,
    options: RunOptions,
    running: Arc<RwLock<bool>>,
}

impl<G: FrameGrabber, D: Detector> Orchestrator<G, D> {
    pub fn new(
        capture: Arc<CaptureManager<G>>,
        detector: D,
        engine: TimingEngine,
        history: Arc<HistoryStore>,
        options: RunOptions,
    ) -> Self {
        Self {
            capture,
            detector,
            engine,
            history,
            options,
            running: Arc::new(RwLock::new(true)),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: self.running.clone(),
        }
    }

    /// Execute the configured run to completion.
    ///
    /// Returns the run counters on graceful termination; a config-class
    /// or persistence failure propagates and terminates the run.
    pub async fn run(&self) -> Result<RunStats> {
        if self.options.continuous_capture {
            self.capture.start_continuous().await;
        }

        let result = match self.options.mode {
            RunMode::Single => self.run_single().await,
            RunMode::Continuous => self.run_continuous().await,
        };

        if self.options.continuous_capture {
            self.capture.stop_continuous().await;
        }

        self.enter(CyclePhase::Terminated);
        result
    }

    async fn run_single(&self) -> Result<RunStats> {
        let mut stats = RunStats::default();
        self.execute_attempt(1, &mut stats).await?;
        Ok(stats)
    }

    async fn run_continuous(&self) -> Result<RunStats> {
        tracing::info!(
            interval_sec = self.options.interval.as_secs(),
            max_cycles = self.options.max_cycles,
            algorithm = %self.options.algorithm,
            "starting continuous run"
        );

        let mut stats = RunStats::default();
        // ticks pace cycle starts; a long cycle compresses the idle gap
        // instead of pushing the next start back
        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            self.enter(CyclePhase::Sleeping);
            ticker.tick().await;

            // the stop flag is honored only here, between cycles
            if !*self.running.read().await {
                tracing::info!(
                    completed = stats.completed,
                    skipped = stats.skipped,
                    "run stopped by external signal"
                );
                break;
            }

            self.execute_attempt(stats.attempts() + 1, &mut stats).await?;

            if let Some(max) = self.options.max_cycles {
                if stats.attempts() >= max {
                    tracing::info!(max_cycles = max, "reached maximum cycles");
                    break;
                }
            }
        }

        Ok(stats)
    }

    /// Run one cycle and fold its outcome into the counters.
    ///
    /// Recoverable failures become a skipped cycle; anything else is
    /// fatal and propagates.
    async fn execute_attempt(&self, cycle: u64, stats: &mut RunStats) -> Result<()> {
        match self.run_cycle(cycle).await {
            Ok(outcome) => {
                stats.completed += 1;
                stats.last_timing = Some(outcome.timing);
                Ok(())
            }
            Err(e) => match SkipReason::classify(&e) {
                Some(reason) => {
                    stats.record_skip(reason);
                    tracing::warn!(
                        cycle,
                        reason = reason.as_str(),
                        error = %e,
                        "cycle skipped"
                    );
                    Ok(())
                }
                None => {
                    tracing::error!(cycle, error = %e, "fatal error, terminating run");
                    Err(e)
                }
            },
        }
    }

    /// One full traversal: Capturing -> Detecting -> ComputingTiming ->
    /// Persisting.
    async fn run_cycle(&self, cycle: u64) -> Result<CycleOutcome> {
        let started = Instant::now();
        tracing::info!(cycle, "starting cycle");

        self.enter(CyclePhase::Capturing);
        let frame = self.acquire_frame().await?;
        tracing::debug!(
            cycle,
            camera = frame.camera,
            frame_id = %frame.frame_id,
            size = frame.data.len(),
            "frame acquired"
        );

        self.enter(CyclePhase::Detecting);
        let counts = self.detector.detect(&frame).await?;
        tracing::info!(
            cycle,
            total = counts.total(),
            cars = counts.car,
            motorcycles = counts.motorcycle,
            buses = counts.bus,
            trucks = counts.truck,
            "vehicles detected"
        );

        self.enter(CyclePhase::ComputingTiming);
        let window = self
            .history
            .recent(self.engine.config().history_window)
            .await;
        let timing = self
            .engine
            .compute(&counts, &window, self.options.algorithm)?;

        let outcome = CycleOutcome {
            counts,
            timing,
            camera: frame.camera,
            processing_ms: started.elapsed().as_millis() as u64,
        };

        self.enter(CyclePhase::Persisting);
        self.history.append(&outcome.to_record()).await?;

        tracing::info!(
            cycle,
            green = outcome.timing.green_time,
            yellow = outcome.timing.yellow_time,
            all_red = outcome.timing.all_red_time,
            total_cycle = outcome.timing.total_cycle_time,
            algorithm = %outcome.timing.algorithm,
            processing_ms = outcome.processing_ms,
            "cycle completed"
        );
        Ok(outcome)
    }

    /// Capturing phase: direct acquisition, or the freshest queued frame
    /// when the continuous producer is feeding us
    async fn acquire_frame(&self) -> Result<Frame> {
        if self.options.continuous_capture {
            match self
                .capture
                .frame_queue()
                .pop_wait(self.options.queue_wait)
                .await
            {
                Some(frame) => Ok(frame),
                None => {
                    tracing::warn!(
                        wait_ms = self.options.queue_wait.as_millis() as u64,
                        "no frame arrived from continuous capture"
                    );
                    Err(Error::AllSourcesExhausted { tried: 0 })
                }
            }
        } else {
            self.capture.acquire(self.options.camera).await
        }
    }

    fn enter(&self, phase: CyclePhase) {
        tracing::debug!(phase = phase.as_str(), "phase transition");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CameraSourceConfig, CaptureConfig, TimingConfig};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct ScriptedGrabber {
        fail: AtomicBool,
    }

    impl FrameGrabber for ScriptedGrabber {
        async fn grab(&self, _source: &CameraSourceConfig) -> Result<Vec<u8>> {
            if self.fail.load(Ordering::SeqCst) {
                Err(Error::Io(std::io::Error::other("simulated camera fault")))
            } else {
                Ok(vec![0xFF, 0xD8])
            }
        }
    }

    /// Detector that fails every `fail_every`-th call
    struct ScriptedDetector {
        counts: VehicleCounts,
        calls: AtomicUsize,
        fail_every: usize,
    }

    impl ScriptedDetector {
        fn always(counts: VehicleCounts) -> Self {
            Self {
                counts,
                calls: AtomicUsize::new(0),
                fail_every: 0,
            }
        }
    }

    impl Detector for ScriptedDetector {
        async fn detect(&self, _frame: &Frame) -> Result<VehicleCounts> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_every > 0 && call % self.fail_every == 0 {
                Err(Error::DetectionUnavailable("simulated outage".into()))
            } else {
                Ok(self.counts)
            }
        }
    }

    fn capture_config() -> CaptureConfig {
        CaptureConfig {
            sources: vec![CameraSourceConfig {
                index: 0,
                snapshot_url: "http://cam0/snapshot".to_string(),
                width: 640,
                height: 480,
            }],
            max_retries: 1,
            retry_backoff: Duration::from_millis(0),
            attempt_timeout: Duration::from_secs(1),
            failure_threshold: 100,
            failed_cooldown: Duration::from_millis(0),
            queue_capacity: 4,
            capture_interval: Duration::from_millis(5),
            continuous_capture: false,
        }
    }

    fn options(mode: RunMode, max_cycles: Option<u64>) -> RunOptions {
        RunOptions {
            mode,
            algorithm: Algorithm::Linear,
            camera: None,
            interval: Duration::from_millis(5),
            max_cycles,
            continuous_capture: false,
            queue_wait: Duration::from_millis(50),
        }
    }

    async fn build(
        grabber_fails: bool,
        detector: ScriptedDetector,
        opts: RunOptions,
    ) -> (Orchestrator<ScriptedGrabber, ScriptedDetector>, Arc<HistoryStore>, tempfile::TempDir)
    {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(
            HistoryStore::open(dir.path().join("history.jsonl"), 100)
                .await
                .unwrap(),
        );
        let capture = Arc::new(CaptureManager::new(
            capture_config(),
            ScriptedGrabber {
                fail: AtomicBool::new(grabber_fails),
            },
        ));
        let engine = TimingEngine::new(TimingConfig::default()).unwrap();
        let orchestrator = Orchestrator::new(capture, detector, engine, history.clone(), opts);
        (orchestrator, history, dir)
    }

    #[test]
    fn test_sensor_errors_are_skips_and_config_errors_are_fatal() {
        assert_eq!(
            SkipReason::classify(&Error::AllSourcesExhausted { tried: 2 }),
            Some(SkipReason::Capture)
        );
        assert_eq!(
            SkipReason::classify(&Error::SourceFailed { camera: 0, attempts: 3 }),
            Some(SkipReason::Capture)
        );
        assert_eq!(
            SkipReason::classify(&Error::DetectionTimeout(5000)),
            Some(SkipReason::Detection)
        );
        assert_eq!(
            SkipReason::classify(&Error::DetectionUnavailable("refused".into())),
            Some(SkipReason::Detection)
        );
        assert_eq!(
            SkipReason::classify(&Error::InvalidInput("negative count".into())),
            Some(SkipReason::InvalidInput)
        );
        assert_eq!(SkipReason::classify(&Error::Config("bad".into())), None);
        assert_eq!(
            SkipReason::classify(&Error::from(std::io::Error::other("disk full"))),
            None
        );
    }

    #[tokio::test]
    async fn test_single_mode_persists_one_record() {
        let detector = ScriptedDetector::always(VehicleCounts::new(6, 1, 1, 0));
        let (orchestrator, history, _dir) =
            build(false, detector, options(RunMode::Single, None)).await;

        let stats = orchestrator.run().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.skipped, 0);
        assert_eq!(stats.last_timing.as_ref().unwrap().green_time, 47);
        assert_eq!(history.len().await, 1);
        assert_eq!(history.recent(1).await[0].green_time, 47);
    }

    #[tokio::test]
    async fn test_single_mode_capture_failure_is_skip_not_fatal() {
        let detector = ScriptedDetector::always(VehicleCounts::default());
        let (orchestrator, history, _dir) =
            build(true, detector, options(RunMode::Single, None)).await;

        let stats = orchestrator.run().await.unwrap();
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.capture_failures, 1);
        assert!(history.is_empty().await);
    }

    #[tokio::test]
    async fn test_continuous_max_cycles_counts_attempts() {
        // every capture fails, yet the run makes exactly 10 attempts and
        // terminates gracefully
        let detector = ScriptedDetector::always(VehicleCounts::default());
        let (orchestrator, history, _dir) =
            build(true, detector, options(RunMode::Continuous, Some(10))).await;

        let stats = orchestrator.run().await.unwrap();
        assert_eq!(stats.attempts(), 10);
        assert_eq!(stats.skipped, 10);
        assert_eq!(stats.capture_failures, 10);
        assert!(history.is_empty().await);
    }

    #[tokio::test]
    async fn test_detection_outage_skips_only_affected_cycles() {
        let detector = ScriptedDetector {
            counts: VehicleCounts::new(3, 0, 0, 0),
            calls: AtomicUsize::new(0),
            fail_every: 3,
        };
        let (orchestrator, history, _dir) =
            build(false, detector, options(RunMode::Continuous, Some(9))).await;

        let stats = orchestrator.run().await.unwrap();
        assert_eq!(stats.attempts(), 9);
        assert_eq!(stats.detection_failures, 3);
        assert_eq!(stats.completed, 6);
        assert_eq!(history.len().await, 6);
    }

    #[tokio::test]
    async fn test_stop_flag_terminates_between_cycles() {
        let detector = ScriptedDetector::always(VehicleCounts::new(1, 0, 0, 0));
        let (orchestrator, _history, _dir) =
            build(false, detector, options(RunMode::Continuous, None)).await;

        let stop = orchestrator.stop_handle();
        let run = tokio::spawn(async move { orchestrator.run().await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        stop.request_stop().await;

        let stats = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("run did not honor stop flag")
            .unwrap()
            .unwrap();
        assert!(stats.completed >= 1);
    }

    #[tokio::test]
    async fn test_continuous_capture_feeds_cycles_from_queue() {
        let detector = ScriptedDetector::always(VehicleCounts::new(2, 0, 1, 0));
        let mut opts = options(RunMode::Continuous, Some(3));
        opts.continuous_capture = true;
        opts.interval = Duration::from_millis(20);
        opts.queue_wait = Duration::from_millis(500);
        let (orchestrator, history, _dir) = build(false, detector, opts).await;

        let stats = orchestrator.run().await.unwrap();
        assert_eq!(stats.attempts(), 3);
        assert_eq!(stats.completed, 3);
        assert_eq!(history.len().await, 3);
    }

    #[tokio::test]
    async fn test_adaptive_history_flows_into_later_cycles() {
        let detector = ScriptedDetector::always(VehicleCounts::new(6, 1, 1, 0));
        let mut opts = options(RunMode::Continuous, Some(2));
        opts.algorithm = Algorithm::Adaptive;
        let (orchestrator, history, _dir) = build(false, detector, opts).await;

        let stats = orchestrator.run().await.unwrap();
        assert_eq!(stats.completed, 2);
        let records = history.recent(2).await;
        // first cycle had no history: pure linear, no mean recorded
        assert_eq!(records[0].historical_mean, None);
        assert_eq!(records[0].green_time, 47);
        // second cycle blends against the first green
        assert_eq!(records[1].historical_mean, Some(47.0));
        assert_eq!(records[1].green_time, 47);
    }
}
