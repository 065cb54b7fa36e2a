//! Prediction pipeline
//!
//! `Idle -> Validating -> Submitting -> Success | Failed`, and back to `Idle` only through
//! [`PredictionPipeline::reset`]. At most one submission is in flight; a second one is
//! refused with [`PredictionError::NotIdle`] rather than queued.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::client::InferenceService;
use super::error::PredictionError;
use crate::capture::{validate_image, ImageBlob, PreviewUrl};
use crate::history::{DetectionRecord, HistoryError, HistorySynchronizer, ImageRef};
use crate::session::SessionContext;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    Idle,
    Validating,
    Submitting,
    Success(DetectionRecord),
    Failed(PredictionError),
}

impl PipelineState {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, PipelineState::Validating | PipelineState::Submitting)
    }
}

/// A successful prediction. `history_error` is advisory only.
#[derive(Debug)]
pub struct Detection {
    pub record: DetectionRecord,
    pub history_error: Option<HistoryError>,
}

pub struct PredictionPipeline {
    service: Arc<dyn InferenceService>,
    history: Arc<HistorySynchronizer>,
    session: Arc<SessionContext>,
    request_timeout: Duration,
    state: watch::Sender<PipelineState>,
}

impl PredictionPipeline {
    pub fn new(
        service: Arc<dyn InferenceService>,
        history: Arc<HistorySynchronizer>,
        session: Arc<SessionContext>,
        request_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        Self {
            service,
            history,
            session,
            request_timeout,
            state,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn is_in_flight(&self) -> bool {
        self.state.borrow().is_in_flight()
    }

    /// Return a terminal state to `Idle`; refused while a submission is in flight
    pub fn reset(&self) -> bool {
        self.state.send_if_modified(|state| match state {
            PipelineState::Success(_) | PipelineState::Failed(_) => {
                *state = PipelineState::Idle;
                true
            }
            _ => false,
        });
        !self.is_in_flight()
    }

    /// Validate, classify and record an image
    pub async fn submit(
        &self,
        image: ImageBlob,
        preview: Option<PreviewUrl>,
    ) -> Result<Detection, PredictionError> {
        let mut started = false;
        self.state.send_if_modified(|state| {
            if *state == PipelineState::Idle {
                *state = PipelineState::Validating;
                started = true;
            }
            started
        });
        if !started {
            log::warn!("Rejected submission of '{}': pipeline is not idle", image.name);
            return Err(PredictionError::NotIdle);
        }

        if let Err(e) = validate_image(&image.mime_type, image.len()) {
            return Err(self.fail(PredictionError::InvalidImage(e)));
        }

        self.state.send_replace(PipelineState::Submitting);
        log::info!("Submitting '{}' ({} bytes) for classification", image.name, image.len());

        let token = self.session.token();
        let classified = match tokio::time::timeout(
            self.request_timeout,
            self.service.classify(&image, token.as_deref()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PredictionError::Timeout),
        };

        let classification = match classified {
            Ok(c) => c,
            Err(PredictionError::Unauthorized) => {
                self.session.invalidate();
                self.history.purge_local().await;
                return Err(self.fail(PredictionError::Unauthorized));
            }
            Err(e) => return Err(self.fail(e)),
        };

        let image_ref = match preview {
            Some(url) => ImageRef::Local(url.to_string()),
            None => ImageRef::Local(image.name.clone()),
        };
        let record = DetectionRecord::new(classification.label, classification.confidence, image_ref);
        log::info!(
            "Detected '{}' with {} confidence",
            record.disease_class,
            record.confidence_percent()
        );

        // Success is visible before the history write starts
        self.state.send_replace(PipelineState::Success(record.clone()));

        let history_error = match self.history.record(&image, &record).await {
            Ok(()) => None,
            Err(e) => {
                log::warn!("Detection not saved to history: {}", e);
                Some(e)
            }
        };

        Ok(Detection {
            record,
            history_error,
        })
    }

    fn fail(&self, err: PredictionError) -> PredictionError {
        if err.is_fatal_to_session() {
            log::error!("Prediction failed: {}", err);
        } else {
            log::warn!("Prediction failed: {}", err);
        }
        self.state.send_replace(PipelineState::Failed(err.clone()));
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::remote::RemoteError;
    use crate::history::synchronizer::test_support::{harness, remote_record, Harness};
    use crate::inference::client::fake::FakeInference;
    use crate::session::SessionEvent;
    use std::sync::atomic::Ordering;

    fn pipeline(h: &Harness, service: Arc<FakeInference>) -> Arc<PredictionPipeline> {
        Arc::new(PredictionPipeline::new(
            service,
            h.history.clone(),
            h.session.clone(),
            Duration::from_secs(30),
        ))
    }

    fn leaf() -> ImageBlob {
        ImageBlob::new("leaf.jpg", "image/jpeg", vec![3u8; 64])
    }

    #[tokio::test]
    async fn test_successful_prediction() {
        let h = harness(Vec::new());
        let service = Arc::new(FakeInference::answering("Apple Scab", 0.873));
        let pipeline = pipeline(&h, service.clone());

        let before = chrono::Utc::now();
        let detection = pipeline.submit(leaf(), None).await.unwrap();

        assert_eq!(detection.record.disease_class, "Apple Scab");
        assert_eq!(detection.record.confidence, 0.873);
        assert!(detection.record.parsed_timestamp().unwrap() >= before - chrono::Duration::seconds(1));
        assert!(detection.history_error.is_none());
        assert_eq!(pipeline.state(), PipelineState::Success(detection.record.clone()));
        assert_eq!(service.last_token.lock().unwrap().as_deref(), Some("token"));
        assert_eq!(h.history.records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_history_failure_does_not_hide_prediction() {
        let h = harness(Vec::new());
        h.remote.set_create_error(Some(RemoteError::Transport("offline".into())));
        let pipeline = pipeline(&h, Arc::new(FakeInference::answering("Black Rot", 0.7)));

        let detection = pipeline.submit(leaf(), None).await.unwrap();

        assert!(matches!(detection.history_error, Some(HistoryError::RemoteUnavailable(_))));
        assert!(matches!(pipeline.state(), PipelineState::Success(_)));
        assert!(h.history.records().await[0].is_local_only());
    }

    #[tokio::test]
    async fn test_result_published_while_history_write_stalls() {
        let h = harness(Vec::new());
        let pipeline = pipeline(&h, Arc::new(FakeInference::answering("Black Rot", 0.7)));
        let mut states = pipeline.subscribe();

        let gate = h.remote.gate_next_create();
        let submit = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.submit(leaf(), None).await }
        });
        gate.entered.notified().await;

        match pipeline.state() {
            PipelineState::Success(record) => assert_eq!(record.disease_class, "Black Rot"),
            other => panic!("unexpected state {:?}", other),
        }
        assert!(!pipeline.is_in_flight());
        assert!(states.has_changed().unwrap());

        gate.release.notify_one();
        let detection = submit.await.unwrap().unwrap();
        assert!(detection.history_error.is_none());
        assert_eq!(h.history.records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_revokes_session() {
        let h = harness(vec![remote_record("1", "2024-01-01T00:00:00Z")]);
        h.history.load().await;
        let mut events = h.session.subscribe();
        let pipeline = pipeline(&h, Arc::new(FakeInference::with_result(Err(PredictionError::Unauthorized))));

        let err = pipeline.submit(leaf(), None).await.unwrap_err();

        assert_eq!(err, PredictionError::Unauthorized);
        assert!(h.session.token().is_none());
        events.changed().await.unwrap();
        assert_eq!(*events.borrow(), SessionEvent::ReauthenticationRequired);
        assert!(h.history.records().await.is_empty());
        assert!(h.cache.list_cached_detections().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_image_never_reaches_service() {
        let h = harness(Vec::new());
        let service = Arc::new(FakeInference::answering("Apple Scab", 0.9));
        let pipeline = pipeline(&h, service.clone());

        let gif = ImageBlob::new("leaf.gif", "image/gif", vec![0u8; 4]);
        let err = pipeline.submit(gif, None).await.unwrap_err();

        assert!(matches!(err, PredictionError::InvalidImage(_)));
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
        assert!(matches!(pipeline.state(), PipelineState::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let h = harness(Vec::new());
        let service = Arc::new(FakeInference::answering("Apple Scab", 0.9));
        *service.delay.lock().unwrap() = Duration::from_secs(31);
        let pipeline = pipeline(&h, service);

        let err = pipeline.submit(leaf(), None).await.unwrap_err();
        assert_eq!(err, PredictionError::Timeout);
        assert_eq!(pipeline.state(), PipelineState::Failed(PredictionError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_submission_is_refused() {
        let h = harness(Vec::new());
        let service = Arc::new(FakeInference::answering("Apple Scab", 0.9));
        *service.delay.lock().unwrap() = Duration::from_secs(5);
        let pipeline = pipeline(&h, service.clone());

        let first = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.submit(leaf(), None).await }
        });
        tokio::task::yield_now().await;
        while !pipeline.is_in_flight() {
            tokio::task::yield_now().await;
        }

        assert_eq!(pipeline.submit(leaf(), None).await.unwrap_err(), PredictionError::NotIdle);
        assert!(!pipeline.reset());

        first.await.unwrap().unwrap();
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reset_required_after_terminal_state() {
        let h = harness(Vec::new());
        let pipeline = pipeline(&h, Arc::new(FakeInference::answering("Apple Scab", 0.9)));

        pipeline.submit(leaf(), None).await.unwrap();
        assert_eq!(pipeline.submit(leaf(), None).await.unwrap_err(), PredictionError::NotIdle);

        assert!(pipeline.reset());
        assert_eq!(pipeline.state(), PipelineState::Idle);
        pipeline.submit(leaf(), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_errors_are_surfaced() {
        for err in [
            PredictionError::PayloadTooLarge,
            PredictionError::UnsupportedImage,
            PredictionError::ServerRejected("model crashed".into()),
            PredictionError::Unreachable,
            PredictionError::MalformedResponse("missing class label".into()),
        ] {
            let h = harness(Vec::new());
            let pipeline = pipeline(&h, Arc::new(FakeInference::with_result(Err(err.clone()))));

            assert_eq!(pipeline.submit(leaf(), None).await.unwrap_err(), err);
            assert!(h.session.is_authenticated());
        }
    }
}
