// leafcheck - Leaf disease detection client
//
// Acquires a leaf photo (file or camera), sends it to a remote classifier and keeps a
// history of results in a remote store with a local SQLite fallback:
// - capture: file selection and live camera sessions
// - normalizer: resize/encode of camera frames
// - inference: classification pipeline and service health polling
// - history: remote-primary history with cache fallback and reconciliation

pub mod capture;
pub mod config;
pub mod database;
pub mod engine;
pub mod history;
pub mod inference;
pub mod normalizer;
pub mod session;

pub use capture::{CameraError, CandidateFile, CaptureError, CaptureSession, ImageBlob, ValidationError};
pub use config::DetectorConfig;
pub use engine::{DetectionEngine, DetectionOutcome, EngineError};
pub use history::{format_confidence, DetectionRecord, HistoryError};
pub use inference::{HealthStatus, PredictionError};
pub use session::{Credentials, SessionContext, SessionEvent};
