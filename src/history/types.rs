// History types for leafcheck
// Canonical detection records, as held in memory, the cache and the UI

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::database::CachedDetection;
use crate::history::remote::RemoteError;

/// Where a record's image can be displayed from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ImageRef {
    /// Ephemeral preview handle (`blob:<uuid>`) owned by this client
    Local(String),
    /// Server-relative path as returned by the history service
    Server(String),
}

impl ImageRef {
    pub fn kind(&self) -> &'static str {
        match self {
            ImageRef::Local(_) => "local",
            ImageRef::Server(_) => "server",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            ImageRef::Local(v) | ImageRef::Server(v) => v,
        }
    }

    pub fn from_parts(kind: &str, value: String) -> Self {
        match kind {
            "local" => ImageRef::Local(value),
            _ => ImageRef::Server(value),
        }
    }
}

/// Whether the authoritative store has seen this record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    Remote,
    LocalOnly,
    /// Accepted by the history service, but its server id is not known until a reload
    Unconfirmed,
}

impl RecordOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordOrigin::Remote => "remote",
            RecordOrigin::LocalOnly => "local",
            RecordOrigin::Unconfirmed => "unconfirmed",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "local" => RecordOrigin::LocalOnly,
            "unconfirmed" => RecordOrigin::Unconfirmed,
            _ => RecordOrigin::Remote,
        }
    }
}

/// One completed classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: String,
    pub disease_class: String,
    /// Raw value as reported; clamp with [`clamp_confidence`] before display
    pub confidence: f64,
    pub timestamp: String,
    pub image_ref: ImageRef,
    pub origin: RecordOrigin,
}

impl DetectionRecord {
    /// A fresh record stamped with the current time
    pub fn new(disease_class: impl Into<String>, confidence: f64, image_ref: ImageRef) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            disease_class: disease_class.into(),
            confidence,
            timestamp: Utc::now().to_rfc3339(),
            image_ref,
            origin: RecordOrigin::Remote,
        }
    }

    pub fn is_local_only(&self) -> bool {
        self.origin == RecordOrigin::LocalOnly
    }

    /// Whether `id` is the history service's own id for this record
    pub fn has_server_id(&self) -> bool {
        self.origin == RecordOrigin::Remote
    }

    pub fn confidence_percent(&self) -> String {
        format_confidence(self.confidence)
    }

    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }

    /// Displayable image location. Server paths resolve to
    /// `{base}/uploads/images/{filename}`; local previews are returned as-is.
    pub fn image_url(&self, base_url: &str) -> Option<String> {
        match &self.image_ref {
            ImageRef::Local(url) => Some(url.clone()),
            ImageRef::Server(path) => {
                let filename = path.rsplit(['/', '\\']).next().unwrap_or_default().trim();
                if filename.is_empty() {
                    return None;
                }
                Some(format!(
                    "{}/uploads/images/{}",
                    base_url.trim_end_matches('/'),
                    filename
                ))
            }
        }
    }
}

impl From<&DetectionRecord> for CachedDetection {
    fn from(record: &DetectionRecord) -> Self {
        CachedDetection {
            id: record.id.clone(),
            disease_class: record.disease_class.clone(),
            confidence: record.confidence,
            timestamp: record.timestamp.clone(),
            image_ref_kind: record.image_ref.kind().to_string(),
            image_ref: record.image_ref.value().to_string(),
            origin: record.origin.as_str().to_string(),
        }
    }
}

impl From<CachedDetection> for DetectionRecord {
    fn from(row: CachedDetection) -> Self {
        DetectionRecord {
            image_ref: ImageRef::from_parts(&row.image_ref_kind, row.image_ref),
            origin: RecordOrigin::parse(&row.origin),
            id: row.id,
            disease_class: row.disease_class,
            confidence: row.confidence,
            timestamp: row.timestamp,
        }
    }
}

/// Non-fatal failures of the persistence path
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History service unavailable, showing cached results: {0}")]
    RemoteUnavailable(#[source] RemoteError),
    #[error("Session expired while talking to the history service")]
    Unauthorized,
    #[error("Local history cache failed: {0}")]
    Cache(String),
}

impl HistoryError {
    pub fn cache(err: anyhow::Error) -> Self {
        HistoryError::Cache(format!("{:#}", err))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, HistoryError::Unauthorized)
    }
}

impl From<RemoteError> for HistoryError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unauthorized => HistoryError::Unauthorized,
            other => HistoryError::RemoteUnavailable(other),
        }
    }
}

/// Clamp to `[0, 1]`; NaN counts as zero
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        return 0.0;
    }
    confidence.clamp(0.0, 1.0)
}

/// Render a confidence as a percentage with two decimals, e.g. `87.30%`
pub fn format_confidence(confidence: f64) -> String {
    format!("{:.2}%", clamp_confidence(confidence) * 100.0)
}

/// Parse the timestamp shapes the history service and this client emit
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 3] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Order newest first; unparseable timestamps sink to the end
pub fn sort_newest_first(records: &mut [DetectionRecord]) {
    records.sort_by(|a, b| b.parsed_timestamp().cmp(&a.parsed_timestamp()));
}
