// Database models - Cached detections
use serde::{Deserialize, Serialize};

/// A row of the local detection cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedDetection {
    pub id: String,
    pub disease_class: String,
    pub confidence: f64,
    pub timestamp: String,
    /// `local` or `server`
    pub image_ref_kind: String,
    pub image_ref: String,
    /// `remote` or `local`
    pub origin: String,
}

/// A local-only detection still waiting to reach the history service
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpload {
    pub detection: CachedDetection,
    pub image_name: String,
    pub image_mime: String,
    pub image_data: Vec<u8>,
}
