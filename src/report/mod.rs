//! Report - History Summaries for Operators
//!
//! Thin assembly of the history aggregate into the report shape written
//! at shutdown and printed by `--report`. No rendering beyond JSON.

use crate::error::Result;
use crate::history_store::HistoryStore;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
pub struct SystemInfo {
    pub total_cycles: u64,
    pub recent_cycles: usize,
}

#[derive(Debug, Serialize)]
pub struct TrafficStatistics {
    pub total_vehicles_detected: u64,
    pub average_vehicles_per_cycle: f64,
    pub cars: u64,
    pub motorcycles: u64,
    pub buses: u64,
    pub trucks: u64,
}

#[derive(Debug, Serialize)]
pub struct TimingStatistics {
    pub average_green_time: f64,
    pub min_green_time: u32,
    pub max_green_time: u32,
    /// Seconds of green granted beyond the base interval
    pub total_time_extended: u64,
}

/// Operator-facing report over the retained history
#[derive(Debug, Serialize)]
pub struct Report {
    pub generated_at: chrono::DateTime<Utc>,
    pub system_info: SystemInfo,
    pub traffic_statistics: TrafficStatistics,
    pub timing_statistics: TimingStatistics,
}

/// Assemble a report from the history tail; `None` when no cycles exist
pub async fn build_report(history: &HistoryStore, base_green: u32) -> Option<Report> {
    let summary = history.aggregate(base_green).await?;
    Some(Report {
        generated_at: Utc::now(),
        system_info: SystemInfo {
            total_cycles: summary.total_cycles,
            recent_cycles: summary.recent_cycles,
        },
        traffic_statistics: TrafficStatistics {
            total_vehicles_detected: summary.total_vehicles,
            average_vehicles_per_cycle: summary.avg_vehicle_count,
            cars: summary.cars,
            motorcycles: summary.motorcycles,
            buses: summary.buses,
            trucks: summary.trucks,
        },
        timing_statistics: TimingStatistics {
            average_green_time: summary.avg_green_time,
            min_green_time: summary.min_green_time,
            max_green_time: summary.max_green_time,
            total_time_extended: summary.total_time_extended,
        },
    })
}

/// Write the report as `report_<timestamp>.json` under `dir`
pub async fn write_report(report: &Report, dir: impl AsRef<Path>) -> Result<PathBuf> {
    let dir = dir.as_ref();
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!(
        "report_{}.json",
        report.generated_at.format("%Y%m%d_%H%M%S")
    ));
    let body = serde_json::to_string_pretty(report)?;
    tokio::fs::write(&path, body).await?;
    tracing::info!(path = %path.display(), "report saved");
    Ok(path)
}
