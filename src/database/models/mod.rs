// Database models - Re-exports the cache models
//
// - detection.rs: cached detection rows and pending uploads
// - settings.rs: configuration overrides

mod detection;
mod settings;

pub use detection::{CachedDetection, PendingUpload};
pub use settings::{AllSettings, Setting};
