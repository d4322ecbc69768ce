//! DetectorClient - Vehicle Detection Service Adapter
//!
//! ## Responsibilities
//!
//! - Send frames to the external detector service
//! - Parse and validate per-type vehicle counts
//! - Pass confidence / NMS thresholds through unchanged
//!
//! The detector's internals (model, NMS, image decoding) are not this
//! crate's concern; only the frame-in, counts-out contract is.

use crate::config::DetectorConfig;
use crate::error::{Error, Result};
use crate::models::{Frame, VehicleCounts};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::future::Future;

/// Detection seam: frame in, validated counts out
pub trait Detector: Send + Sync + 'static {
    fn detect(&self, frame: &Frame) -> impl Future<Output = Result<VehicleCounts>> + Send;
}

/// Raw counts as the detector reports them
///
/// Every field is required: a missing type is a malformed response, not
/// an implicit zero. Values are signed so that negative counts surface as
/// `InvalidInput` instead of a deserialization artifact.
#[derive(Debug, Deserialize)]
struct RawCounts {
    car: i64,
    motorcycle: i64,
    bus: i64,
    truck: i64,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    counts: RawCounts,
}

/// HTTP detector client
pub struct HttpDetector {
    client: reqwest::Client,
    config: DetectorConfig,
}

impl HttpDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/detect", self.config.base_url.trim_end_matches('/'))
    }

    fn validate(body: DetectResponse) -> Result<VehicleCounts> {
        VehicleCounts::from_raw(
            body.counts.car,
            body.counts.motorcycle,
            body.counts.bus,
            body.counts.truck,
        )
    }
}

impl Detector for HttpDetector {
    async fn detect(&self, frame: &Frame) -> Result<VehicleCounts> {
        let part = Part::bytes(frame.data.clone())
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| Error::DetectionUnavailable(format!("bad frame part: {}", e)))?;

        let form = Form::new()
            .part("frame", part)
            .text("camera", frame.camera.to_string())
            .text("captured_at", frame.captured_at.to_rfc3339())
            .text("width", frame.width.to_string())
            .text("height", frame.height.to_string())
            .text(
                "confidence_threshold",
                self.config.confidence_threshold.to_string(),
            )
            .text("nms_threshold", self.config.nms_threshold.to_string());

        let resp = self
            .client
            .post(self.endpoint())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::DetectionTimeout(self.config.timeout.as_millis() as u64)
                } else {
                    Error::DetectionUnavailable(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(Error::DetectionUnavailable(format!(
                "detector returned {}",
                resp.status()
            )));
        }

        let body: DetectResponse = resp
            .json()
            .await
            .map_err(|e| Error::InvalidInput(format!("malformed detector response: {}", e)))?;

        let counts = Self::validate(body)?;
        tracing::debug!(
            camera = frame.camera,
            frame_id = %frame.frame_id,
            total = counts.total(),
            "vehicle counts received"
        );
        Ok(counts)
    }
}
