// Capture source manager
// Owns the file/camera acquisition session; the two modes are mutually exclusive

use std::sync::Arc;

use tokio::sync::Mutex;

use super::camera::{CameraConstraints, CameraDevice, StreamGuard};
use super::preview::{PreviewRegistry, PreviewUrl};
use super::types::{
    validate_image, CameraError, CandidateFile, CaptureError, CaptureSession, ImageBlob,
    ValidationError,
};
use crate::normalizer;

enum SessionState {
    None,
    FileSelected { blob: ImageBlob, preview: PreviewUrl },
    CameraLive(StreamGuard),
}

struct Inner {
    session: SessionState,
    /// Preview of the image last handed to submission, kept until superseded
    submitted_preview: Option<PreviewUrl>,
}

/// A staged image handed over for submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedImage {
    pub blob: ImageBlob,
    pub preview: PreviewUrl,
}

pub struct CaptureSourceManager {
    camera: Arc<dyn CameraDevice>,
    previews: Arc<PreviewRegistry>,
    constraints: CameraConstraints,
    inner: Mutex<Inner>,
}

impl CaptureSourceManager {
    pub fn new(camera: Arc<dyn CameraDevice>, previews: Arc<PreviewRegistry>) -> Self {
        Self {
            camera,
            previews,
            constraints: CameraConstraints::default(),
            inner: Mutex::new(Inner {
                session: SessionState::None,
                submitted_preview: None,
            }),
        }
    }

    pub fn with_constraints(mut self, constraints: CameraConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn previews(&self) -> &Arc<PreviewRegistry> {
        &self.previews
    }

    /// Validate and stage a dropped or picked file
    pub async fn select_file(&self, candidate: CandidateFile) -> Result<ImageBlob, ValidationError> {
        validate_image(&candidate.mime_type, candidate.bytes.len())?;

        let blob = ImageBlob::new(candidate.name, candidate.mime_type, candidate.bytes);
        let mut inner = self.inner.lock().await;
        self.stage(&mut inner, blob.clone());
        log::info!("Staged file '{}' ({} bytes)", blob.name, blob.len());
        Ok(blob)
    }

    /// Open the rear camera; any staged file is discarded first
    pub async fn start_camera(&self) -> Result<(), CameraError> {
        let mut inner = self.inner.lock().await;
        if matches!(inner.session, SessionState::CameraLive(_)) {
            return Ok(());
        }
        self.reset(&mut inner);

        match self.camera.open(&self.constraints).await {
            Ok(stream) => {
                let guard = StreamGuard::new(stream);
                log::info!("Camera started: {}", guard.label().unwrap_or_default());
                inner.session = SessionState::CameraLive(guard);
                Ok(())
            }
            Err(e) => {
                log::warn!("Failed to start camera: {}", e);
                Err(e)
            }
        }
    }

    /// Snapshot the live camera, normalize the frame and stage the result.
    /// The camera is stopped whether or not the capture succeeds.
    pub async fn capture_photo(&self) -> Result<ImageBlob, CaptureError> {
        let mut inner = self.inner.lock().await;
        let mut guard = match std::mem::replace(&mut inner.session, SessionState::None) {
            SessionState::CameraLive(guard) => guard,
            other => {
                inner.session = other;
                return Err(CaptureError::CameraNotActive);
            }
        };

        let frame = guard.grab_frame().await;
        guard.release();
        let frame = frame?;

        let blob = normalizer::normalize_async(frame)
            .await
            .map_err(|e| CaptureError::Encode(e.to_string()))?;
        validate_image(&blob.mime_type, blob.len())?;

        self.stage(&mut inner, blob.clone());
        log::info!("Captured photo ({} bytes)", blob.len());
        Ok(blob)
    }

    /// Release the camera; no-op when it is not running
    pub async fn stop_camera(&self) {
        let mut inner = self.inner.lock().await;
        if let SessionState::CameraLive(guard) = &mut inner.session {
            guard.release();
            inner.session = SessionState::None;
        }
    }

    pub async fn session(&self) -> CaptureSession {
        let inner = self.inner.lock().await;
        match &inner.session {
            SessionState::None => CaptureSession::None,
            SessionState::FileSelected { blob, preview } => CaptureSession::FileSelected {
                blob: blob.clone(),
                preview: preview.clone(),
            },
            SessionState::CameraLive(guard) => CaptureSession::CameraLive {
                stream_label: guard.label().unwrap_or_default(),
            },
        }
    }

    /// Hand the staged image over for submission, ending the session
    pub async fn take_staged(&self) -> Option<StagedImage> {
        let mut inner = self.inner.lock().await;
        match std::mem::replace(&mut inner.session, SessionState::None) {
            SessionState::FileSelected { blob, preview } => {
                if let Some(old) = inner.submitted_preview.replace(preview.clone()) {
                    self.previews.revoke(&old);
                }
                Some(StagedImage { blob, preview })
            }
            other => {
                inner.session = other;
                None
            }
        }
    }

    /// Discard any staged file and stop the camera
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        self.reset(&mut inner);
        if let Some(old) = inner.submitted_preview.take() {
            self.previews.revoke(&old);
        }
    }

    /// Teardown: release the camera and every outstanding preview
    pub async fn shutdown(&self) {
        self.clear().await;
        let revoked = self.previews.revoke_all();
        if revoked > 0 {
            log::debug!("Revoked {} outstanding previews on shutdown", revoked);
        }
    }

    fn stage(&self, inner: &mut Inner, blob: ImageBlob) {
        self.reset(inner);
        let preview = self.previews.create(&blob);
        inner.session = SessionState::FileSelected { blob, preview };
    }

    fn reset(&self, inner: &mut Inner) {
        match std::mem::replace(&mut inner.session, SessionState::None) {
            SessionState::None => {}
            SessionState::FileSelected { preview, .. } => {
                self.previews.revoke(&preview);
            }
            SessionState::CameraLive(mut guard) => {
                guard.release();
            }
        }
    }
}
