//! trafficctl - Adaptive Traffic Signal Controller
//!
//! ## Architecture (6 Components)
//!
//! 1. CaptureManager - frame acquisition with retry, failover and health
//! 2. DetectorClient - external vehicle-detection service adapter
//! 3. TimingEngine - green duration computation (linear/logarithmic/adaptive)
//! 4. Orchestrator - capture -> detect -> compute -> persist cycle loop
//! 5. HistoryStore - durable append-only cycle record log
//! 6. Report - history summaries for operators
//!
//! ## Design Principles
//!
//! - Configuration is loaded once at startup and passed explicitly
//! - One sequential decision stream: cycles never overlap
//! - Sensor failures skip a cycle; config failures end the run

pub mod capture_manager;
pub mod config;
pub mod detector_client;
pub mod error;
pub mod history_store;
pub mod models;
pub mod orchestrator;
pub mod report;
pub mod timing_engine;

pub use error::{Error, Result};
