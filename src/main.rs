//! trafficctl - Adaptive Traffic Signal Controller
//!
//! Main entry point: CLI parsing, configuration, component wiring.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use trafficctl::capture_manager::{CaptureManager, HttpFrameGrabber};
use trafficctl::config::AppConfig;
use trafficctl::detector_client::HttpDetector;
use trafficctl::history_store::HistoryStore;
use trafficctl::orchestrator::{Orchestrator, RunMode, RunOptions};
use trafficctl::report;
use trafficctl::timing_engine::{Algorithm, TimingEngine};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "trafficctl")]
#[command(about = "Adaptive traffic signal controller")]
struct Args {
    /// Operation mode (single, continuous)
    #[arg(long, default_value = "single")]
    mode: String,

    /// Signal timing algorithm (linear, logarithmic, adaptive)
    #[arg(long, default_value = "adaptive")]
    algorithm: String,

    /// Seconds between cycle starts in continuous mode
    #[arg(long, default_value_t = 30)]
    interval: u64,

    /// Maximum number of cycles in continuous mode
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Pin acquisition to one camera index instead of failover order
    #[arg(long)]
    camera: Option<usize>,

    /// Print a report from existing history and exit
    #[arg(long)]
    report: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trafficctl=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("Starting trafficctl v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::from_env();
    tracing::info!(
        cameras = config.capture.sources.len(),
        detector_url = %config.detector.base_url,
        history_path = %config.history_path.display(),
        "configuration loaded"
    );

    let history = Arc::new(HistoryStore::open(&config.history_path, config.history_cache).await?);

    // Report mode: summarize existing history and exit
    if args.report {
        match report::build_report(&history, config.timing.base_green).await {
            Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            None => println!("No cycle history available"),
        }
        return Ok(());
    }

    let mode = match args.mode.as_str() {
        "single" => RunMode::Single,
        "continuous" => RunMode::Continuous,
        other => anyhow::bail!("unknown mode: {} (expected single or continuous)", other),
    };
    let algorithm: Algorithm = args.algorithm.parse()?;

    // Validates the timing invariants; a violation exits non-zero here
    let engine = TimingEngine::new(config.timing.clone())?;

    for source in &config.capture.sources {
        tracing::info!(
            camera = source.index,
            url = %source.snapshot_url,
            width = source.width,
            height = source.height,
            "camera source configured"
        );
    }

    let grabber = HttpFrameGrabber::new(config.capture.attempt_timeout);
    let capture = Arc::new(CaptureManager::new(config.capture.clone(), grabber));
    let detector = HttpDetector::new(config.detector.clone());

    let options = RunOptions {
        mode,
        algorithm,
        camera: args.camera,
        interval: Duration::from_secs(args.interval),
        max_cycles: args.max_cycles,
        continuous_capture: config.capture.continuous_capture,
        queue_wait: config.capture.attempt_timeout,
    };

    let orchestrator = Orchestrator::new(capture, detector, engine, history.clone(), options);

    // ctrl-c requests a stop, honored between cycles
    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.request_stop().await;
        }
    });

    let stats = orchestrator.run().await?;

    if mode == RunMode::Single {
        match &stats.last_timing {
            Some(timing) => {
                println!("Algorithm:   {}", timing.algorithm);
                println!("Weighted:    {:.1}", timing.weighted_count);
                println!("Green:       {}s", timing.green_time);
                println!("Yellow:      {}s", timing.yellow_time);
                println!("All-red:     {}s", timing.all_red_time);
                println!("Total cycle: {}s", timing.total_cycle_time);
            }
            None => tracing::warn!("cycle skipped, no timing computed"),
        }
    }

    tracing::info!(
        completed = stats.completed,
        skipped = stats.skipped,
        capture_failures = stats.capture_failures,
        detection_failures = stats.detection_failures,
        invalid_input = stats.invalid_input,
        "run finished"
    );

    // Final report on graceful shutdown
    if let Some(report) = report::build_report(&history, config.timing.base_green).await {
        report::write_report(&report, &config.report_dir).await?;
    }

    Ok(())
}
