//! Detection engine
//!
//! Wires capture, prediction, history, health polling and reconciliation behind one
//! facade owned by the composing application.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex};

use crate::capture::{
    CameraDevice, CameraError, CandidateFile, CaptureError, CaptureSession, CaptureSourceManager,
    ImageBlob, PreviewRegistry, ValidationError,
};
use crate::config::DetectorConfig;
use crate::database::DatabaseManager;
use crate::history::{
    ClearOutcome, DetectionRecord, HistoryError, HistoryRemote, HistoryStats, HistorySynchronizer,
    HttpHistoryClient, LoadOutcome, Reconciler,
};
use crate::inference::{
    HealthMonitor, HealthStatus, HttpInferenceClient, InferenceService, PipelineState,
    PredictionError, PredictionPipeline,
};
use crate::session::{SessionContext, SessionEvent};

#[derive(Debug, Error)]
pub enum EngineError {
    /// Acquisition is disabled while a submission is in flight
    #[error("A prediction is in progress")]
    Busy,
    #[error("No image is selected")]
    NothingStaged,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Prediction(#[from] PredictionError),
}

/// What the caller shows after a successful detection
#[derive(Debug, Serialize)]
pub struct DetectionOutcome {
    pub record: DetectionRecord,
    pub confidence: String,
    /// Set when the result could not be saved to the history service
    #[serde(skip)]
    pub history_advisory: Option<HistoryError>,
}

pub struct DetectionEngine {
    config: DetectorConfig,
    session: Arc<SessionContext>,
    capture: CaptureSourceManager,
    pipeline: PredictionPipeline,
    history: Arc<HistorySynchronizer>,
    health: Mutex<HealthMonitor>,
    health_status: watch::Receiver<HealthStatus>,
    reconciler: Mutex<Option<Reconciler>>,
}

impl DetectionEngine {
    pub fn new(
        config: DetectorConfig,
        session: Arc<SessionContext>,
        camera: Arc<dyn CameraDevice>,
        inference: Arc<dyn InferenceService>,
        remote: Arc<dyn HistoryRemote>,
        cache: Arc<DatabaseManager>,
    ) -> Self {
        let previews = Arc::new(PreviewRegistry::new());
        let history = Arc::new(HistorySynchronizer::new(
            remote,
            cache,
            session.clone(),
            previews.clone(),
        ));
        let pipeline = PredictionPipeline::new(
            inference.clone(),
            history.clone(),
            session.clone(),
            config.request_timeout,
        );

        let health = HealthMonitor::new(inference);
        let health_status = health.subscribe();

        Self {
            capture: CaptureSourceManager::new(camera, previews),
            health: Mutex::new(health),
            health_status,
            reconciler: Mutex::new(None),
            pipeline,
            history,
            session,
            config,
        }
    }

    /// Open the cache, apply persisted settings and build the HTTP clients
    pub fn from_config(
        mut config: DetectorConfig,
        session: Arc<SessionContext>,
        camera: Arc<dyn CameraDevice>,
    ) -> Result<Self> {
        let cache = DatabaseManager::new(config.cache_path.clone())
            .context("Failed to open detection cache")?;
        let settings = cache.load_all_settings().context("Failed to load settings")?;
        config.apply_settings(&settings);

        let inference = HttpInferenceClient::new(&config)
            .context("Failed to create inference client")?;
        let remote = HttpHistoryClient::new(config.history_url.clone(), config.request_timeout)
            .context("Failed to create history client")?;

        log::info!(
            "Detection engine using predict={} history={}",
            config.predict_url,
            config.history_url
        );

        Ok(Self::new(
            config,
            session,
            camera,
            Arc::new(inference),
            Arc::new(remote),
            Arc::new(cache),
        ))
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn session_events(&self) -> watch::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    /// Start health polling and the reconciliation loop
    pub async fn start_background(&self) {
        self.health
            .lock()
            .await
            .start_polling(self.config.health_poll_interval);

        let mut reconciler = self.reconciler.lock().await;
        if reconciler.is_none() {
            *reconciler = Some(Reconciler::start(
                self.history.clone(),
                self.config.reconcile_interval,
            ));
        }
    }

    pub async fn select_file(&self, candidate: CandidateFile) -> Result<ImageBlob, EngineError> {
        self.ensure_idle()?;
        let blob = self.capture.select_file(candidate).await?;
        self.pipeline.reset();
        Ok(blob)
    }

    pub async fn start_camera(&self) -> Result<(), EngineError> {
        self.ensure_idle()?;
        self.capture.start_camera().await?;
        Ok(())
    }

    pub async fn capture_photo(&self) -> Result<ImageBlob, EngineError> {
        self.ensure_idle()?;
        let blob = self.capture.capture_photo().await?;
        self.pipeline.reset();
        Ok(blob)
    }

    pub async fn stop_camera(&self) {
        self.capture.stop_camera().await;
    }

    pub async fn capture_session(&self) -> CaptureSession {
        self.capture.session().await
    }

    /// Submit the staged image. The prediction is returned even if saving it failed.
    pub async fn detect(&self) -> Result<DetectionOutcome, EngineError> {
        self.ensure_idle()?;
        let staged = self.capture.take_staged().await.ok_or(EngineError::NothingStaged)?;
        self.pipeline.reset();

        let detection = self.pipeline.submit(staged.blob, Some(staged.preview)).await?;
        Ok(DetectionOutcome {
            confidence: detection.record.confidence_percent(),
            record: detection.record,
            history_advisory: detection.history_error,
        })
    }

    pub fn prediction_state(&self) -> PipelineState {
        self.pipeline.state()
    }

    pub async fn load_history(&self) -> LoadOutcome {
        self.history.load().await
    }

    pub async fn history(&self) -> Vec<DetectionRecord> {
        self.history.records().await
    }

    pub async fn history_stats(&self) -> HistoryStats {
        HistoryStats::from_records(&self.history.records().await)
    }

    pub async fn delete_history_item(&self, id: &str) -> Result<(), HistoryError> {
        self.history.delete(id).await
    }

    pub async fn clear_history(&self) -> ClearOutcome {
        self.history.clear().await
    }

    pub fn image_url(&self, record: &DetectionRecord) -> Option<String> {
        record.image_url(&self.config.base_url)
    }

    pub fn health_status(&self) -> HealthStatus {
        *self.health_status.borrow()
    }

    pub async fn check_health(&self) -> HealthStatus {
        self.health.lock().await.check_now().await
    }

    /// Release the camera and previews and stop every background task
    pub async fn shutdown(&self) {
        self.capture.shutdown().await;
        self.health.lock().await.stop().await;
        if let Some(mut reconciler) = self.reconciler.lock().await.take() {
            reconciler.stop().await;
        }
        log::info!("Detection engine shut down");
    }

    fn ensure_idle(&self) -> Result<(), EngineError> {
        if self.pipeline.is_in_flight() {
            return Err(EngineError::Busy);
        }
        Ok(())
    }
}
