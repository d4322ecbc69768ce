//! End-to-end orchestrator runs against fake camera and detector
//! implementations: full cycles, failover, skips, persistence, report.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use trafficctl::capture_manager::{CaptureManager, FrameGrabber, SourceHealth};
use trafficctl::config::{CameraSourceConfig, CaptureConfig, TimingConfig};
use trafficctl::detector_client::Detector;
use trafficctl::error::{Error, Result};
use trafficctl::history_store::HistoryStore;
use trafficctl::models::{Frame, VehicleCounts};
use trafficctl::orchestrator::{Orchestrator, RunMode, RunOptions};
use trafficctl::report;
use trafficctl::timing_engine::{Algorithm, TimingEngine};

/// Camera fleet where listed sources are dead
struct FleetGrabber {
    dead: Vec<usize>,
}

impl FrameGrabber for FleetGrabber {
    async fn grab(&self, source: &CameraSourceConfig) -> Result<Vec<u8>> {
        if self.dead.contains(&source.index) {
            Err(Error::Io(std::io::Error::other("camera unreachable")))
        } else {
            Ok(vec![0xFF, 0xD8, 0xFF, 0xD9])
        }
    }
}

/// Detector returning a fixed scene, with optional periodic outages
struct SceneDetector {
    counts: VehicleCounts,
    calls: AtomicUsize,
    fail_every: usize,
}

impl SceneDetector {
    fn steady(counts: VehicleCounts) -> Self {
        Self {
            counts,
            calls: AtomicUsize::new(0),
            fail_every: 0,
        }
    }
}

impl Detector for SceneDetector {
    async fn detect(&self, _frame: &Frame) -> Result<VehicleCounts> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_every > 0 && call % self.fail_every == 0 {
            return Err(Error::DetectionTimeout(100));
        }
        Ok(self.counts)
    }
}

fn fleet_config(n_sources: usize) -> CaptureConfig {
    CaptureConfig {
        sources: (0..n_sources)
            .map(|index| CameraSourceConfig {
                index,
                snapshot_url: format!("http://cam{}/snapshot", index),
                width: 1920,
                height: 1080,
            })
            .collect(),
        max_retries: 2,
        retry_backoff: Duration::from_millis(0),
        attempt_timeout: Duration::from_secs(1),
        failure_threshold: 3,
        failed_cooldown: Duration::from_secs(3600),
        queue_capacity: 5,
        capture_interval: Duration::from_millis(5),
        continuous_capture: false,
    }
}

fn run_options(mode: RunMode, algorithm: Algorithm, max_cycles: Option<u64>) -> RunOptions {
    RunOptions {
        mode,
        algorithm,
        camera: None,
        interval: Duration::from_millis(5),
        max_cycles,
        continuous_capture: false,
        queue_wait: Duration::from_millis(100),
    }
}

#[tokio::test]
async fn single_cycle_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let history_path = dir.path().join("history.jsonl");
    let history = Arc::new(HistoryStore::open(&history_path, 100).await.unwrap());
    let capture = Arc::new(CaptureManager::new(
        fleet_config(1),
        FleetGrabber { dead: vec![] },
    ));
    let engine = TimingEngine::new(TimingConfig::default()).unwrap();
    let detector = SceneDetector::steady(VehicleCounts::new(6, 1, 1, 0));

    let orchestrator = Orchestrator::new(
        capture,
        detector,
        engine,
        history.clone(),
        run_options(RunMode::Single, Algorithm::Linear, None),
    );

    let stats = orchestrator.run().await.unwrap();
    assert_eq!(stats.completed, 1);

    // the worked example: W = 8.5, green = 47, total = 52
    let timing = stats.last_timing.unwrap();
    assert_eq!(timing.green_time, 47);
    assert_eq!(timing.total_cycle_time, 52);

    // one JSON object on disk with the persistence-contract fields
    let contents = std::fs::read_to_string(&history_path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 1);
    let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(record["vehicle_count"], 8);
    assert_eq!(record["vehicle_stats"]["car"], 6);
    assert_eq!(record["green_time"], 47);
    assert_eq!(record["yellow_time"], 3);
    assert_eq!(record["all_red_time"], 2);
    assert_eq!(record["algorithm"], "linear");
}

#[tokio::test]
async fn failover_cycle_uses_backup_camera() {
    let dir = tempfile::tempdir().unwrap();
    let history = Arc::new(
        HistoryStore::open(dir.path().join("history.jsonl"), 100)
            .await
            .unwrap(),
    );
    let capture = Arc::new(CaptureManager::new(
        fleet_config(2),
        FleetGrabber { dead: vec![0] },
    ));
    let engine = TimingEngine::new(TimingConfig::default()).unwrap();
    let detector = SceneDetector::steady(VehicleCounts::new(3, 0, 0, 0));

    let orchestrator = Orchestrator::new(
        capture.clone(),
        detector,
        engine,
        history.clone(),
        run_options(RunMode::Single, Algorithm::Linear, None),
    );

    let stats = orchestrator.run().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(capture.source_health(0).await, Some(SourceHealth::Degraded));
    assert_eq!(capture.source_health(1).await, Some(SourceHealth::Healthy));
}

#[tokio::test]
async fn continuous_run_survives_outages_and_terminates() {
    let dir = tempfile::tempdir().unwrap();
    let history = Arc::new(
        HistoryStore::open(dir.path().join("history.jsonl"), 100)
            .await
            .unwrap(),
    );
    let capture = Arc::new(CaptureManager::new(
        fleet_config(1),
        FleetGrabber { dead: vec![] },
    ));
    let engine = TimingEngine::new(TimingConfig::default()).unwrap();
    let detector = SceneDetector {
        counts: VehicleCounts::new(4, 1, 0, 1),
        calls: AtomicUsize::new(0),
        fail_every: 5,
    };

    let orchestrator = Orchestrator::new(
        capture,
        detector,
        engine,
        history.clone(),
        run_options(RunMode::Continuous, Algorithm::Adaptive, Some(10)),
    );

    let stats = orchestrator.run().await.unwrap();
    assert_eq!(stats.attempts(), 10);
    assert_eq!(stats.detection_failures, 2);
    assert_eq!(stats.completed, 8);
    assert_eq!(history.len().await, 8);

    // adaptive records after the first carry the historical mean
    let records = history.recent(8).await;
    assert_eq!(records[0].historical_mean, None);
    assert!(records[1].historical_mean.is_some());

    // and the shutdown report reflects all completed cycles
    let report = report::build_report(&history, 30).await.unwrap();
    assert_eq!(report.system_info.total_cycles, 8);
    assert_eq!(report.traffic_statistics.total_vehicles_detected, 48);
}

#[tokio::test]
async fn dead_fleet_skips_every_cycle_but_run_completes() {
    let dir = tempfile::tempdir().unwrap();
    let history = Arc::new(
        HistoryStore::open(dir.path().join("history.jsonl"), 100)
            .await
            .unwrap(),
    );
    let capture = Arc::new(CaptureManager::new(
        fleet_config(2),
        FleetGrabber { dead: vec![0, 1] },
    ));
    let engine = TimingEngine::new(TimingConfig::default()).unwrap();
    let detector = SceneDetector::steady(VehicleCounts::default());

    let orchestrator = Orchestrator::new(
        capture,
        detector,
        engine,
        history.clone(),
        run_options(RunMode::Continuous, Algorithm::Linear, Some(4)),
    );

    let stats = orchestrator.run().await.unwrap();
    assert_eq!(stats.attempts(), 4);
    assert_eq!(stats.capture_failures, 4);
    assert_eq!(stats.completed, 0);
    assert!(history.is_empty().await);
    assert!(report::build_report(&history, 30).await.is_none());
}
