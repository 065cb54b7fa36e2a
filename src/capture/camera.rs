// Camera device abstraction
// Platform backends implement CameraDevice; the capture manager only sees these traits

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::{CameraError, CaptureError};
use crate::normalizer::RawFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    /// Rear camera, pointed at the subject
    Environment,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Stream request sent to the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConstraints {
    pub facing_mode: FacingMode,
    pub ideal: Resolution,
    pub max: Resolution,
    pub aspect_ratio: f64,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            facing_mode: FacingMode::Environment,
            ideal: Resolution { width: 1280, height: 720 },
            max: Resolution { width: 1920, height: 1080 },
            aspect_ratio: 16.0 / 9.0,
        }
    }
}

#[async_trait]
pub trait CameraDevice: Send + Sync {
    async fn open(&self, constraints: &CameraConstraints) -> Result<Box<dyn VideoStream>, CameraError>;
}

/// A live hardware stream. `stop` must be safe to call more than once.
#[async_trait]
pub trait VideoStream: Send + Sync {
    fn label(&self) -> String;
    async fn grab_frame(&mut self) -> Result<RawFrame, CaptureError>;
    fn stop(&mut self);
}

/// Owns a live stream and stops it when released or dropped
pub struct StreamGuard {
    stream: Option<Box<dyn VideoStream>>,
}

impl StreamGuard {
    pub fn new(stream: Box<dyn VideoStream>) -> Self {
        Self { stream: Some(stream) }
    }

    pub fn label(&self) -> Option<String> {
        self.stream.as_ref().map(|s| s.label())
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn grab_frame(&mut self) -> Result<RawFrame, CaptureError> {
        match self.stream.as_mut() {
            Some(stream) => stream.grab_frame().await,
            None => Err(CaptureError::CameraNotActive),
        }
    }

    /// Stop the hardware stream; returns false if it was already stopped
    pub fn release(&mut self) -> bool {
        match self.stream.take() {
            Some(mut stream) => {
                log::info!("Stopping camera stream '{}'", stream.label());
                stream.stop();
                true
            }
            None => false,
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Device for hosts without camera support
pub struct UnavailableCamera;

#[async_trait]
impl CameraDevice for UnavailableCamera {
    async fn open(&self, _constraints: &CameraConstraints) -> Result<Box<dyn VideoStream>, CameraError> {
        Err(CameraError::DeviceNotFound)
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeCamera;
    use super::*;

    #[test]
    fn test_default_constraints() {
        let constraints = CameraConstraints::default();
        assert_eq!(constraints.facing_mode, FacingMode::Environment);
        assert_eq!(constraints.ideal, Resolution { width: 1280, height: 720 });
        assert_eq!(constraints.max, Resolution { width: 1920, height: 1080 });
    }

    #[tokio::test]
    async fn test_guard_stops_on_drop() {
        let camera = FakeCamera::default();
        let stream = camera.open(&CameraConstraints::default()).await.unwrap();

        let guard = StreamGuard::new(stream);
        assert_eq!(camera.live_streams(), 1);
        drop(guard);
        assert_eq!(camera.live_streams(), 0);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let camera = FakeCamera::default();
        let mut guard = StreamGuard::new(camera.open(&CameraConstraints::default()).await.unwrap());

        assert!(guard.release());
        assert!(!guard.release());
        assert!(matches!(guard.grab_frame().await, Err(CaptureError::CameraNotActive)));
        assert_eq!(camera.stopped.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unavailable_camera() {
        let result = UnavailableCamera.open(&CameraConstraints::default()).await;
        assert!(matches!(result, Err(CameraError::DeviceNotFound)));
    }
}
