//! Application configuration
//!
//! All configuration is loaded once at startup from the environment (a
//! `.env` file is honored) and passed explicitly into the components that
//! need it. There is no hot reload and no ambient global state.

use crate::error::{Error, Result};
use crate::models::VehicleType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Signal timing configuration
///
/// Immutable for the lifetime of the process. Validated once by
/// [`TimingConfig::validate`]; a violation is fatal to the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Minimum green time in seconds
    pub min_green: u32,
    /// Maximum green time in seconds
    pub max_green: u32,
    /// Base green time in seconds (the empty-intersection interval)
    pub base_green: u32,
    /// Additional seconds per weighted vehicle (linear algorithm)
    pub vehicle_multiplier: f64,
    /// Yellow phase duration in seconds
    pub yellow_time: u32,
    /// All-red clearance duration in seconds
    pub all_red_time: u32,
    /// Priority weight per vehicle type
    pub car_weight: f64,
    pub motorcycle_weight: f64,
    /// Buses get priority
    pub bus_weight: f64,
    pub truck_weight: f64,
    /// Blend factor for the adaptive algorithm: share of the linear
    /// estimate vs the historical mean (1.0 = pure linear)
    pub adaptive_blend: f64,
    /// How many recent records the adaptive algorithm may read
    pub history_window: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            min_green: 15,
            max_green: 120,
            base_green: 30,
            vehicle_multiplier: 2.0,
            yellow_time: 3,
            all_red_time: 2,
            car_weight: 1.0,
            motorcycle_weight: 0.5,
            bus_weight: 2.0,
            truck_weight: 1.5,
            adaptive_blend: 0.7,
            history_window: 20,
        }
    }
}

impl TimingConfig {
    /// Load timing configuration from the environment, falling back to the
    /// defaults above for anything unset.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            min_green: env_parse("MIN_GREEN_SEC", d.min_green),
            max_green: env_parse("MAX_GREEN_SEC", d.max_green),
            base_green: env_parse("BASE_GREEN_SEC", d.base_green),
            vehicle_multiplier: env_parse("VEHICLE_MULTIPLIER", d.vehicle_multiplier),
            yellow_time: env_parse("YELLOW_SEC", d.yellow_time),
            all_red_time: env_parse("ALL_RED_SEC", d.all_red_time),
            car_weight: env_parse("CAR_WEIGHT", d.car_weight),
            motorcycle_weight: env_parse("MOTORCYCLE_WEIGHT", d.motorcycle_weight),
            bus_weight: env_parse("BUS_WEIGHT", d.bus_weight),
            truck_weight: env_parse("TRUCK_WEIGHT", d.truck_weight),
            adaptive_blend: env_parse("ADAPTIVE_BLEND", d.adaptive_blend),
            history_window: env_parse("HISTORY_WINDOW", d.history_window),
        }
    }

    /// Weight for a vehicle type
    pub fn weight(&self, vehicle_type: VehicleType) -> f64 {
        match vehicle_type {
            VehicleType::Car => self.car_weight,
            VehicleType::Motorcycle => self.motorcycle_weight,
            VehicleType::Bus => self.bus_weight,
            VehicleType::Truck => self.truck_weight,
        }
    }

    /// Check the timing invariants: `0 < min_green <= base_green <= max_green`,
    /// all weights finite and non-negative, blend in `[0, 1]`, window >= 1.
    pub fn validate(&self) -> Result<()> {
        if self.min_green == 0 {
            return Err(Error::Config("min_green must be > 0".into()));
        }
        if self.min_green > self.base_green {
            return Err(Error::Config(format!(
                "min_green ({}) must be <= base_green ({})",
                self.min_green, self.base_green
            )));
        }
        if self.base_green > self.max_green {
            return Err(Error::Config(format!(
                "base_green ({}) must be <= max_green ({})",
                self.base_green, self.max_green
            )));
        }
        let weights = [
            ("car_weight", self.car_weight),
            ("motorcycle_weight", self.motorcycle_weight),
            ("bus_weight", self.bus_weight),
            ("truck_weight", self.truck_weight),
            ("vehicle_multiplier", self.vehicle_multiplier),
        ];
        for (name, value) in weights {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Config(format!(
                    "{} must be finite and >= 0 (got {})",
                    name, value
                )));
            }
        }
        if !self.adaptive_blend.is_finite() || !(0.0..=1.0).contains(&self.adaptive_blend) {
            return Err(Error::Config(format!(
                "adaptive_blend must be in [0, 1] (got {})",
                self.adaptive_blend
            )));
        }
        if self.history_window == 0 {
            return Err(Error::Config("history_window must be >= 1".into()));
        }
        Ok(())
    }
}

/// One configured camera source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraSourceConfig {
    /// Device index; also the failover priority (lower tries first)
    pub index: usize,
    /// HTTP snapshot URL returning one JPEG frame
    pub snapshot_url: String,
    /// Frame width reported by the source
    pub width: u32,
    /// Frame height reported by the source
    pub height: u32,
}

/// Capture tuning
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub sources: Vec<CameraSourceConfig>,
    /// Attempts per source per acquisition
    pub max_retries: u32,
    /// Sleep between attempts on the same source
    pub retry_backoff: Duration,
    /// Bounded wait for a single grab
    pub attempt_timeout: Duration,
    /// Consecutive exhausted acquisitions before a source is marked Failed
    pub failure_threshold: u32,
    /// How long a Failed source is skipped before being probed again
    pub failed_cooldown: Duration,
    /// Continuous-mode queue depth; the oldest frame is dropped when full
    pub queue_capacity: usize,
    /// Continuous-mode capture cadence
    pub capture_interval: Duration,
    /// Whether the orchestrator consumes from the continuous queue
    pub continuous_capture: bool,
}

impl CaptureConfig {
    pub fn from_env() -> Self {
        let urls = std::env::var("CAMERA_SNAPSHOT_URLS")
            .unwrap_or_else(|_| "http://127.0.0.1:8081/snapshot".to_string());
        let width = env_parse("FRAME_WIDTH", 1920u32);
        let height = env_parse("FRAME_HEIGHT", 1080u32);
        let sources = urls
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .enumerate()
            .map(|(index, url)| CameraSourceConfig {
                index,
                snapshot_url: url.to_string(),
                width,
                height,
            })
            .collect();

        Self {
            sources,
            max_retries: env_parse("CAPTURE_MAX_RETRIES", 3u32),
            retry_backoff: Duration::from_millis(env_parse("CAPTURE_RETRY_BACKOFF_MS", 500u64)),
            attempt_timeout: Duration::from_secs(env_parse("CAPTURE_TIMEOUT_SEC", 5u64)),
            failure_threshold: env_parse("CAPTURE_FAILURE_THRESHOLD", 3u32),
            failed_cooldown: Duration::from_secs(env_parse("CAPTURE_FAILED_COOLDOWN_SEC", 60u64)),
            queue_capacity: env_parse("CAPTURE_QUEUE_CAPACITY", 10usize),
            capture_interval: Duration::from_secs(env_parse("CAPTURE_INTERVAL_SEC", 5u64)),
            continuous_capture: env_parse("CAPTURE_CONTINUOUS", false),
        }
    }
}

/// Detector service tuning
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Detector service base URL
    pub base_url: String,
    /// Minimum confidence for detections, passed through unchanged
    pub confidence_threshold: f32,
    /// Non-maximum suppression threshold, passed through unchanged
    pub nms_threshold: f32,
    /// Bounded wait for one detection call
    pub timeout: Duration,
}

impl DetectorConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("DETECTOR_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9000".to_string()),
            confidence_threshold: env_parse("DETECTOR_CONFIDENCE", 0.5f32),
            nms_threshold: env_parse("DETECTOR_NMS_THRESHOLD", 0.4f32),
            timeout: Duration::from_secs(env_parse("DETECTOR_TIMEOUT_SEC", 10u64)),
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub timing: TimingConfig,
    pub capture: CaptureConfig,
    pub detector: DetectorConfig,
    /// Append-only cycle history (JSON lines)
    pub history_path: PathBuf,
    /// Directory for shutdown reports
    pub report_dir: PathBuf,
    /// In-memory history tail kept for the adaptive algorithm and reports
    pub history_cache: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            timing: TimingConfig::from_env(),
            capture: CaptureConfig::from_env(),
            detector: DetectorConfig::from_env(),
            history_path: std::env::var("HISTORY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("traffic_data/cycle_history.jsonl")),
            report_dir: std::env::var("REPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("traffic_data")),
            history_cache: env_parse("HISTORY_CACHE", 1000usize),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(TimingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_min_green_rejected() {
        let config = TimingConfig {
            min_green: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_min_above_base_rejected() {
        let config = TimingConfig {
            min_green: 40,
            base_green: 30,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_base_above_max_rejected() {
        let config = TimingConfig {
            base_green: 130,
            max_green: 120,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let config = TimingConfig {
            bus_weight: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_blend_out_of_range_rejected() {
        let config = TimingConfig {
            adaptive_blend: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
