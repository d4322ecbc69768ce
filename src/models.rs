//! Shared data types
//!
//! Types that cross component boundaries: vehicle counts produced by the
//! detection adapter, frames produced by the capture manager, and the
//! persisted cycle record.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Vehicle classes the detector reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    Car,
    Motorcycle,
    Bus,
    Truck,
}

impl VehicleType {
    pub const ALL: [VehicleType; 4] = [
        VehicleType::Car,
        VehicleType::Motorcycle,
        VehicleType::Bus,
        VehicleType::Truck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Car => "car",
            VehicleType::Motorcycle => "motorcycle",
            VehicleType::Bus => "bus",
            VehicleType::Truck => "truck",
        }
    }
}

/// Per-type vehicle counts for one frame
///
/// Immutable once produced by the detection adapter. Construct via
/// [`VehicleCounts::from_raw`] when the values come from outside the
/// process; negative counts are rejected, never silently zeroed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleCounts {
    pub car: u32,
    pub motorcycle: u32,
    pub bus: u32,
    pub truck: u32,
}

impl VehicleCounts {
    pub fn new(car: u32, motorcycle: u32, bus: u32, truck: u32) -> Self {
        Self {
            car,
            motorcycle,
            bus,
            truck,
        }
    }

    /// Validate raw detector counts
    pub fn from_raw(car: i64, motorcycle: i64, bus: i64, truck: i64) -> Result<Self> {
        let check = |name: &str, value: i64| -> Result<u32> {
            u32::try_from(value).map_err(|_| {
                Error::InvalidInput(format!("{} count must be non-negative (got {})", name, value))
            })
        };
        Ok(Self {
            car: check("car", car)?,
            motorcycle: check("motorcycle", motorcycle)?,
            bus: check("bus", bus)?,
            truck: check("truck", truck)?,
        })
    }

    pub fn get(&self, vehicle_type: VehicleType) -> u32 {
        match vehicle_type {
            VehicleType::Car => self.car,
            VehicleType::Motorcycle => self.motorcycle,
            VehicleType::Bus => self.bus,
            VehicleType::Truck => self.truck,
        }
    }

    /// Total vehicles across all types
    pub fn total(&self) -> u32 {
        self.car + self.motorcycle + self.bus + self.truck
    }
}

/// One captured frame
///
/// Raw JPEG bytes plus the dimensions the source is configured for.
/// Lifetime is one cycle (or its residency in the continuous queue).
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_id: Uuid,
    pub camera: usize,
    pub captured_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(camera: usize, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            frame_id: Uuid::new_v4(),
            camera,
            captured_at: Utc::now(),
            width,
            height,
            data,
        }
    }
}

/// One persisted decision cycle
///
/// Append-only; ordering is chronological by timestamp. This is the sole
/// input the adaptive algorithm may read besides the current counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    pub timestamp: DateTime<Utc>,
    /// Total vehicles detected
    pub vehicle_count: u32,
    /// Per-type breakdown
    pub vehicle_stats: VehicleCounts,
    /// Weighted count the timing was computed from
    pub weighted_count: f64,
    pub green_time: u32,
    pub yellow_time: u32,
    pub all_red_time: u32,
    pub total_cycle_time: u32,
    pub algorithm: String,
    /// Historical mean green the adaptive algorithm blended in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub historical_mean: Option<f64>,
    /// Wall-clock duration of the capture-to-persist traversal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_sums_all_types() {
        let counts = VehicleCounts::new(6, 1, 1, 0);
        assert_eq!(counts.total(), 8);
    }

    #[test]
    fn test_from_raw_accepts_non_negative() {
        let counts = VehicleCounts::from_raw(3, 0, 2, 1).unwrap();
        assert_eq!(counts, VehicleCounts::new(3, 0, 2, 1));
    }

    #[test]
    fn test_from_raw_rejects_negative() {
        let err = VehicleCounts::from_raw(3, -1, 0, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_vehicle_type_serde_lowercase() {
        assert_eq!(serde_json::to_string(&VehicleType::Bus).unwrap(), "\"bus\"");
    }

    #[test]
    fn test_cycle_record_roundtrip_keeps_stats() {
        let record = CycleRecord {
            timestamp: Utc::now(),
            vehicle_count: 8,
            vehicle_stats: VehicleCounts::new(6, 1, 1, 0),
            weighted_count: 8.5,
            green_time: 47,
            yellow_time: 3,
            all_red_time: 2,
            total_cycle_time: 52,
            algorithm: "linear".to_string(),
            historical_mean: None,
            processing_ms: Some(120),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"vehicle_stats\""));
        assert!(!json.contains("historical_mean"));
        let back: CycleRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.green_time, 47);
        assert_eq!(back.vehicle_stats.car, 6);
    }
}
