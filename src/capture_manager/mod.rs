//! CaptureManager - Frame Acquisition from Camera Sources
//!
//! ## Responsibilities
//!
//! - Single-shot acquisition with per-source retry and failover
//! - Burst capture (N frames, no detection in between)
//! - Continuous background capture into a bounded drop-oldest queue
//! - Per-source health tracking (Healthy / Degraded / Failed)
//!
//! The continuous producer and single-shot `acquire` are mutually
//! exclusive per source: each source has its own lock, taken for the
//! duration of an acquisition against it.

use crate::config::{CameraSourceConfig, CaptureConfig};
use crate::error::{Error, Result};
use crate::models::Frame;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;

/// Camera source health
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceHealth {
    /// Responding normally
    Healthy,
    /// At least one exhausted acquisition since the last success
    Degraded,
    /// Too many consecutive exhausted acquisitions; skipped until the
    /// cooldown elapses
    Failed,
}

/// Per-source state, mutated only by the capture manager
#[derive(Debug, Clone)]
struct CameraSource {
    config: CameraSourceConfig,
    health: SourceHealth,
    consecutive_failures: u32,
    failed_at: Option<Instant>,
}

impl CameraSource {
    fn new(config: CameraSourceConfig) -> Self {
        Self {
            config,
            health: SourceHealth::Healthy,
            consecutive_failures: 0,
            failed_at: None,
        }
    }

    /// Whether an unspecified acquisition should try this source now
    fn is_eligible(&self, cooldown: Duration) -> bool {
        match self.health {
            SourceHealth::Healthy | SourceHealth::Degraded => true,
            SourceHealth::Failed => self
                .failed_at
                .map(|at| at.elapsed() >= cooldown)
                .unwrap_or(true),
        }
    }

    fn record_success(&mut self) {
        if self.health != SourceHealth::Healthy {
            tracing::info!(camera = self.config.index, "camera source recovered");
        }
        self.health = SourceHealth::Healthy;
        self.consecutive_failures = 0;
        self.failed_at = None;
    }

    fn record_exhausted(&mut self, threshold: u32) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= threshold {
            if self.health != SourceHealth::Failed {
                tracing::warn!(
                    camera = self.config.index,
                    consecutive_failures = self.consecutive_failures,
                    "camera source marked failed"
                );
            }
            self.health = SourceHealth::Failed;
            self.failed_at = Some(Instant::now());
        } else {
            self.health = SourceHealth::Degraded;
        }
    }
}

/// Frame producer seam
///
/// The real implementation pulls a JPEG over HTTP; tests substitute a
/// fake so the retry and failover logic runs without camera I/O.
pub trait FrameGrabber: Send + Sync + 'static {
    fn grab(
        &self,
        source: &CameraSourceConfig,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// HTTP snapshot grabber
pub struct HttpFrameGrabber {
    client: reqwest::Client,
}

impl HttpFrameGrabber {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

impl FrameGrabber for HttpFrameGrabber {
    async fn grab(&self, source: &CameraSourceConfig) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(&source.snapshot_url)
            .send()
            .await
            .map_err(|e| std::io::Error::other(format!("snapshot request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Io(std::io::Error::other(format!(
                "snapshot HTTP error: {}",
                resp.status()
            ))));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| std::io::Error::other(format!("snapshot read failed: {}", e)))?;

        if bytes.is_empty() {
            return Err(Error::Io(std::io::Error::other("snapshot returned empty body")));
        }

        Ok(bytes.to_vec())
    }
}

/// Bounded frame queue for continuous capture
///
/// When full, the oldest unconsumed frame is dropped: the consumer always
/// sees the freshest traffic, at the cost of completeness.
pub struct FrameQueue {
    frames: RwLock<VecDeque<Frame>>,
    capacity: usize,
    notify: Notify,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, frame: Frame) {
        let mut frames = self.frames.write().await;
        if frames.len() >= self.capacity {
            if let Some(dropped) = frames.pop_front() {
                tracing::debug!(
                    camera = dropped.camera,
                    frame_id = %dropped.frame_id,
                    "frame queue full, dropping oldest frame"
                );
            }
        }
        frames.push_back(frame);
        drop(frames);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> Option<Frame> {
        self.frames.write().await.pop_front()
    }

    /// Pop the next frame, waiting up to `wait` for one to arrive
    pub async fn pop_wait(&self, wait: Duration) -> Option<Frame> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(frame) = self.pop().await {
                return Some(frame);
            }
            let notified = self.notify.notified();
            // close the race between the empty check and registration
            if let Some(frame) = self.pop().await {
                return Some(frame);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.pop().await;
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.frames.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.frames.read().await.is_empty()
    }
}

/// CaptureManager instance
pub struct CaptureManager<G: FrameGrabber> {
    grabber: G,
    config: CaptureConfig,
    sources: RwLock<Vec<CameraSource>>,
    /// One lock per source; serializes the continuous producer against
    /// single-shot acquisition on the same camera
    locks: Vec<Arc<Mutex<()>>>,
    queue: Arc<FrameQueue>,
    running: Arc<RwLock<bool>>,
}

impl<G: FrameGrabber> CaptureManager<G> {
    pub fn new(config: CaptureConfig, grabber: G) -> Self {
        let sources = config
            .sources
            .iter()
            .cloned()
            .map(CameraSource::new)
            .collect::<Vec<_>>();
        let locks = (0..sources.len())
            .map(|_| Arc::new(Mutex::new(())))
            .collect();
        let queue = Arc::new(FrameQueue::new(config.queue_capacity));
        Self {
            grabber,
            config,
            sources: RwLock::new(sources),
            locks,
            queue,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Queue fed by the continuous producer
    pub fn frame_queue(&self) -> Arc<FrameQueue> {
        self.queue.clone()
    }

    pub fn source_count(&self) -> usize {
        self.locks.len()
    }

    /// Current health of a source (primarily for logs and tests)
    pub async fn source_health(&self, camera: usize) -> Option<SourceHealth> {
        self.sources.read().await.get(camera).map(|s| s.health)
    }

    /// Acquire one frame.
    ///
    /// With a pinned camera only that source is tried; exhausting its
    /// retry budget yields `SourceFailed`. Without one, sources are tried
    /// in index order, skipping Failed sources still in cooldown; if every
    /// candidate exhausts its budget the call fails with
    /// `AllSourcesExhausted`. Both are recoverable: the orchestrator turns
    /// them into a skipped cycle.
    pub async fn acquire(&self, camera: Option<usize>) -> Result<Frame> {
        let candidates = self.candidates(camera).await?;
        if candidates.is_empty() {
            tracing::error!(
                sources = self.locks.len(),
                "no camera source eligible (all failed and cooling down)"
            );
            return Err(Error::AllSourcesExhausted { tried: 0 });
        }

        let mut tried = 0usize;
        for source in &candidates {
            let index = source.index;
            let _lease = self.locks[index].lock().await;
            tried += 1;

            match self.try_source(source).await {
                Ok(frame) => {
                    self.sources.write().await[index].record_success();
                    return Ok(frame);
                }
                Err(e) => {
                    tracing::warn!(
                        camera = index,
                        attempts = self.config.max_retries,
                        error = %e,
                        "camera source exhausted retry budget"
                    );
                    self.sources.write().await[index]
                        .record_exhausted(self.config.failure_threshold);
                }
            }
        }

        if let Some(camera) = camera {
            return Err(Error::SourceFailed {
                camera,
                attempts: self.config.max_retries,
            });
        }

        tracing::error!(
            sources_tried = tried,
            "all camera sources exhausted"
        );
        Err(Error::AllSourcesExhausted { tried })
    }

    /// Burst capture: `count` frames in quick succession, no detection in
    /// between. Failed acquisitions are logged and skipped.
    pub async fn burst(&self, count: usize, spacing: Duration) -> Vec<Frame> {
        let mut frames = Vec::with_capacity(count);
        for i in 0..count {
            match self.acquire(None).await {
                Ok(frame) => frames.push(frame),
                Err(e) => {
                    tracing::warn!(burst_index = i, error = %e, "burst frame skipped");
                }
            }
            if i + 1 < count {
                tokio::time::sleep(spacing).await;
            }
        }
        tracing::info!(
            captured = frames.len(),
            requested = count,
            "burst capture complete"
        );
        frames
    }

    /// Start the continuous producer task.
    ///
    /// Captures at the configured interval and pushes into the bounded
    /// queue until `stop_continuous` is called. Acquisition failures are
    /// logged and the loop keeps going.
    pub async fn start_continuous(self: &Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("continuous capture already running");
                return;
            }
            *running = true;
        }

        tracing::info!(
            interval_sec = self.config.capture_interval.as_secs(),
            "starting continuous capture"
        );

        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.capture_interval);
            loop {
                ticker.tick().await;
                if !*manager.running.read().await {
                    break;
                }
                match manager.acquire(None).await {
                    Ok(frame) => {
                        tracing::debug!(
                            camera = frame.camera,
                            frame_id = %frame.frame_id,
                            size = frame.data.len(),
                            "continuous frame captured"
                        );
                        manager.queue.push(frame).await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "continuous capture attempt failed");
                    }
                }
            }
            tracing::info!("continuous capture stopped");
        });
    }

    /// Stop the continuous producer
    pub async fn stop_continuous(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    /// Snapshot the candidate sources for this acquisition
    async fn candidates(&self, camera: Option<usize>) -> Result<Vec<CameraSourceConfig>> {
        let sources = self.sources.read().await;
        match camera {
            Some(index) => {
                let source = sources.get(index).ok_or_else(|| {
                    Error::Config(format!(
                        "camera index {} out of range ({} configured)",
                        index,
                        sources.len()
                    ))
                })?;
                // a pinned camera is probed regardless of health
                Ok(vec![source.config.clone()])
            }
            None => Ok(sources
                .iter()
                .filter(|s| s.is_eligible(self.config.failed_cooldown))
                .map(|s| s.config.clone())
                .collect()),
        }
    }

    /// Run the retry loop against one source
    async fn try_source(&self, source: &CameraSourceConfig) -> Result<Frame> {
        let mut last_err = None;
        for attempt in 1..=self.config.max_retries {
            let grab = self.grabber.grab(source);
            match tokio::time::timeout(self.config.attempt_timeout, grab).await {
                Ok(Ok(data)) => {
                    tracing::debug!(
                        camera = source.index,
                        attempt,
                        size = data.len(),
                        "frame captured"
                    );
                    return Ok(Frame::new(source.index, source.width, source.height, data));
                }
                Ok(Err(e)) => {
                    tracing::debug!(camera = source.index, attempt, error = %e, "capture attempt failed");
                    last_err = Some(e);
                }
                Err(_) => {
                    tracing::debug!(
                        camera = source.index,
                        attempt,
                        timeout_ms = self.config.attempt_timeout.as_millis() as u64,
                        "capture attempt timed out"
                    );
                    last_err = Some(Error::Io(std::io::Error::other("capture attempt timed out")));
                }
            }
            if attempt < self.config.max_retries {
                tokio::time::sleep(self.config.retry_backoff).await;
            }
        }
        Err(last_err.unwrap_or_else(|| Error::SourceFailed {
            camera: source.index,
            attempts: self.config.max_retries,
        }))
    }
}
