//! TimingEngine - Green Duration Computation
//!
//! ## Responsibilities
//!
//! - Weighted vehicle count from per-type counts and priority weights
//! - Green duration via linear, logarithmic or adaptive algorithm
//! - Clamping, rounding and full phase derivation
//!
//! The engine is pure: identical inputs always produce identical output,
//! and nothing here mutates history or configuration.

use crate::config::TimingConfig;
use crate::error::{Error, Result};
use crate::models::{CycleRecord, VehicleCounts, VehicleType};
use serde::{Deserialize, Serialize};

/// Timing algorithm selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// `base + W * multiplier`
    Linear,
    /// `base + 15 * ln(W + 1)`; sub-linear growth under heavy load
    Logarithmic,
    /// Linear estimate blended with the recent historical mean
    Adaptive,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Linear => "linear",
            Algorithm::Logarithmic => "logarithmic",
            Algorithm::Adaptive => "adaptive",
        }
    }
}

impl std::str::FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(Algorithm::Linear),
            "logarithmic" => Ok(Algorithm::Logarithmic),
            "adaptive" => Ok(Algorithm::Adaptive),
            other => Err(Error::Config(format!("unknown algorithm: {}", other))),
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computed signal timing for one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingResult {
    pub green_time: u32,
    pub yellow_time: u32,
    pub all_red_time: u32,
    pub total_cycle_time: u32,
    pub weighted_count: f64,
    pub algorithm: Algorithm,
    /// Mean green of the history window the adaptive blend used
    pub historical_mean: Option<f64>,
}

/// TimingEngine instance
pub struct TimingEngine {
    config: TimingConfig,
}

impl TimingEngine {
    /// Create a new engine, validating the timing invariants once.
    pub fn new(config: TimingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TimingConfig {
        &self.config
    }

    /// Weighted count: each type scaled by its priority weight, so a bus
    /// contributes more than its raw count alone would suggest.
    pub fn weighted_count(&self, counts: &VehicleCounts) -> f64 {
        VehicleType::ALL
            .iter()
            .map(|&t| f64::from(counts.get(t)) * self.config.weight(t))
            .sum()
    }

    /// Compute the full phase sequence for one cycle.
    ///
    /// `history` is the recent tail of persisted records; only the adaptive
    /// algorithm reads it, and only the last `history_window` entries.
    pub fn compute(
        &self,
        counts: &VehicleCounts,
        history: &[CycleRecord],
        algorithm: Algorithm,
    ) -> Result<TimingResult> {
        let weighted = self.weighted_count(counts);
        if !weighted.is_finite() {
            return Err(Error::Config(format!(
                "weighted count is not finite ({})",
                weighted
            )));
        }

        let (raw_green, historical_mean) = match algorithm {
            Algorithm::Linear => (self.linear_green(weighted), None),
            Algorithm::Logarithmic => (self.logarithmic_green(weighted), None),
            Algorithm::Adaptive => self.adaptive_green(weighted, history),
        };

        let green_time = self.finalize_green(raw_green);
        let total_cycle_time = green_time + self.config.yellow_time + self.config.all_red_time;

        Ok(TimingResult {
            green_time,
            yellow_time: self.config.yellow_time,
            all_red_time: self.config.all_red_time,
            total_cycle_time,
            weighted_count: weighted,
            algorithm,
            historical_mean,
        })
    }

    fn linear_green(&self, weighted: f64) -> f64 {
        f64::from(self.config.base_green) + weighted * self.config.vehicle_multiplier
    }

    /// Sub-linear growth: ln(W + 1) is 0 at W = 0, so an empty intersection
    /// still gets the base interval rather than the bare minimum.
    fn logarithmic_green(&self, weighted: f64) -> f64 {
        f64::from(self.config.base_green) + 15.0 * (weighted + 1.0).ln()
    }

    /// Blend the linear estimate with the mean green of the last
    /// `history_window` records. With no history the blend degenerates to
    /// the pure linear estimate and no mean is reported.
    fn adaptive_green(&self, weighted: f64, history: &[CycleRecord]) -> (f64, Option<f64>) {
        let linear = self.linear_green(weighted);
        let window: Vec<f64> = history
            .iter()
            .rev()
            .take(self.config.history_window)
            .map(|r| f64::from(r.green_time))
            .collect();

        if window.is_empty() {
            return (linear, None);
        }

        let mean = window.iter().sum::<f64>() / window.len() as f64;
        let alpha = self.config.adaptive_blend;
        (alpha * linear + (1.0 - alpha) * mean, Some(mean))
    }

    /// Clamp to the configured bounds, then round half-up to whole seconds
    /// (the tie goes to the longer, safer green).
    fn finalize_green(&self, raw: f64) -> u32 {
        let clamped = raw
            .max(f64::from(self.config.min_green))
            .min(f64::from(self.config.max_green));
        clamped.round() as u32
    }
}
