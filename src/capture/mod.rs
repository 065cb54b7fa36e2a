// Capture module for leafcheck
// Image acquisition from dropped/picked files and the live camera

pub mod camera;
pub mod manager;
pub mod preview;
pub mod types;

pub use camera::{CameraConstraints, CameraDevice, FacingMode, Resolution, StreamGuard, UnavailableCamera, VideoStream};
pub use manager::{CaptureSourceManager, StagedImage};
pub use preview::{PreviewRegistry, PreviewUrl};
pub use types::{
    validate_image, CameraError, CandidateFile, CaptureError, CaptureSession, CaptureSessionKind,
    ImageBlob, ValidationError, ACCEPTED_MIME_TYPES, MAX_IMAGE_BYTES,
};
