// Database models - Settings
use serde::{Deserialize, Serialize};

/// A single setting stored in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub value_type: String,
    pub updated_at: String,
}

/// Persisted configuration overrides, applied on top of defaults and environment
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AllSettings {
    pub predict_url: Option<String>,
    pub history_url: Option<String>,
    pub base_url: Option<String>,
    pub health_poll_interval_ms: Option<u64>,
}
