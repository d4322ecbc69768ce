//! HistoryStore - Durable Cycle Record Log
//!
//! ## Responsibilities
//!
//! - Append-only persistence of cycle records (one JSON object per line)
//! - Bounded in-memory tail for the adaptive algorithm and reports
//! - Summary statistics over the retained tail
//!
//! Writers are serialized on a dedicated lock that covers the file
//! append; the in-memory tail is published under a separate brief write
//! lock, so readers never wait on disk I/O and always see a consistent
//! prefix of the log.

use crate::error::Result;
use crate::models::CycleRecord;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

/// Summary statistics over the retained history tail
#[derive(Debug, Clone, Serialize)]
pub struct HistorySummary {
    /// Records appended over the lifetime of the log
    pub total_cycles: u64,
    /// Records the summary below is computed from
    pub recent_cycles: usize,
    pub avg_green_time: f64,
    pub min_green_time: u32,
    pub max_green_time: u32,
    pub total_vehicles: u64,
    pub avg_vehicle_count: f64,
    pub cars: u64,
    pub motorcycles: u64,
    pub buses: u64,
    pub trucks: u64,
    /// Seconds of green granted beyond the base interval
    pub total_time_extended: u64,
}

/// In-memory tail of the log
struct Tail {
    records: VecDeque<CycleRecord>,
    total: u64,
}

impl Tail {
    fn push(&mut self, record: CycleRecord, capacity: usize) {
        if self.records.len() >= capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
        self.total += 1;
    }
}

/// HistoryStore instance
pub struct HistoryStore {
    path: PathBuf,
    tail: RwLock<Tail>,
    /// Serializes the durable file append across writers
    writer: Mutex<()>,
    cache_capacity: usize,
}

impl HistoryStore {
    /// Open (or create) the history log and load its tail into memory.
    ///
    /// Corrupt lines are logged and skipped rather than failing the load;
    /// a controller must come up even if a past run left a torn write.
    pub async fn open(path: impl AsRef<Path>, cache_capacity: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut tail = Tail {
            records: VecDeque::new(),
            total: 0,
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                for (line_no, line) in contents.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<CycleRecord>(line) {
                        Ok(record) => tail.push(record, cache_capacity),
                        Err(e) => {
                            tracing::warn!(
                                path = %path.display(),
                                line = line_no + 1,
                                error = %e,
                                "skipping corrupt history line"
                            );
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            path = %path.display(),
            loaded = tail.records.len(),
            total = tail.total,
            "history loaded"
        );

        Ok(Self {
            path,
            tail: RwLock::new(tail),
            writer: Mutex::new(()),
            cache_capacity,
        })
    }

    /// Durably append one record, then publish it to the in-memory tail
    pub async fn append(&self, record: &CycleRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _writer = self.writer.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        self.tail
            .write()
            .await
            .push(record.clone(), self.cache_capacity);

        tracing::debug!(
            path = %self.path.display(),
            green_time = record.green_time,
            algorithm = %record.algorithm,
            "cycle record appended"
        );
        Ok(())
    }

    /// The most recent `limit` records, oldest first (most recent last)
    pub async fn recent(&self, limit: usize) -> Vec<CycleRecord> {
        let tail = self.tail.read().await;
        let skip = tail.records.len().saturating_sub(limit);
        tail.records.iter().skip(skip).cloned().collect()
    }

    /// Records currently retained in memory
    pub async fn len(&self) -> usize {
        self.tail.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tail.read().await.records.is_empty()
    }

    /// Records appended over the lifetime of the log
    pub async fn total_cycles(&self) -> u64 {
        self.tail.read().await.total
    }

    /// Summary statistics over the retained tail; `None` when empty
    pub async fn aggregate(&self, base_green: u32) -> Option<HistorySummary> {
        let tail = self.tail.read().await;
        if tail.records.is_empty() {
            return None;
        }

        let n = tail.records.len();
        let mut green_sum = 0u64;
        let mut min_green = u32::MAX;
        let mut max_green = 0u32;
        let mut vehicles = 0u64;
        let (mut cars, mut motorcycles, mut buses, mut trucks) = (0u64, 0u64, 0u64, 0u64);
        let mut extended = 0u64;

        for r in tail.records.iter() {
            green_sum += u64::from(r.green_time);
            min_green = min_green.min(r.green_time);
            max_green = max_green.max(r.green_time);
            vehicles += u64::from(r.vehicle_count);
            cars += u64::from(r.vehicle_stats.car);
            motorcycles += u64::from(r.vehicle_stats.motorcycle);
            buses += u64::from(r.vehicle_stats.bus);
            trucks += u64::from(r.vehicle_stats.truck);
            if r.green_time > base_green {
                extended += u64::from(r.green_time - base_green);
            }
        }

        Some(HistorySummary {
            total_cycles: tail.total,
            recent_cycles: n,
            avg_green_time: green_sum as f64 / n as f64,
            min_green_time: min_green,
            max_green_time: max_green,
            total_vehicles: vehicles,
            avg_vehicle_count: vehicles as f64 / n as f64,
            cars,
            motorcycles,
            buses,
            trucks,
            total_time_extended: extended,
        })
    }
}
