//! Types shared by the acquisition sources

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::preview::PreviewUrl;

/// Hard client-side ceiling for any image handed to the network layer (10 MiB)
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// MIME types accepted from file drops, the picker and the camera path
pub const ACCEPTED_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/jpg", "image/png"];

/// An encoded image ready for submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlob {
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl ImageBlob {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A file offered by drag-and-drop or the file picker, before validation
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl CandidateFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }
}

/// Reasons a candidate image is refused before any network call
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Please upload a valid image (JPEG, JPG, PNG); got '{0}'")]
    InvalidFormat(String),
    #[error("Image is {size} bytes; the limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },
}

/// Camera start failures, surfaced distinctly to the user
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CameraError {
    #[error("Camera permission was denied")]
    PermissionDenied,
    #[error("No camera device was found")]
    DeviceNotFound,
    #[error("The camera cannot satisfy the requested constraints")]
    ConstraintsUnsatisfiable,
    #[error("Camera error: {0}")]
    Unknown(String),
}

/// Failures while snapshotting the live camera
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("Camera is not running")]
    CameraNotActive,
    #[error("Failed to read a frame from the camera: {0}")]
    Frame(String),
    #[error("Failed to encode the captured frame: {0}")]
    Encode(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Which acquisition mode currently owns the capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureSessionKind {
    None,
    FileSelected,
    CameraLive,
}

/// Snapshot of the capture session for callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSession {
    None,
    FileSelected {
        blob: ImageBlob,
        preview: PreviewUrl,
    },
    CameraLive {
        stream_label: String,
    },
}

impl CaptureSession {
    pub fn kind(&self) -> CaptureSessionKind {
        match self {
            CaptureSession::None => CaptureSessionKind::None,
            CaptureSession::FileSelected { .. } => CaptureSessionKind::FileSelected,
            CaptureSession::CameraLive { .. } => CaptureSessionKind::CameraLive,
        }
    }
}

/// Check the MIME type and size ceiling of a blob
pub fn validate_image(mime_type: &str, size: usize) -> Result<(), ValidationError> {
    let mime = mime_type.trim().to_ascii_lowercase();
    if !ACCEPTED_MIME_TYPES.contains(&mime.as_str()) {
        return Err(ValidationError::InvalidFormat(mime_type.to_string()));
    }

    if size > MAX_IMAGE_BYTES {
        return Err(ValidationError::TooLarge {
            size,
            limit: MAX_IMAGE_BYTES,
        });
    }

    Ok(())
}
