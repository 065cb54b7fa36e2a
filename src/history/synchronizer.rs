// History synchronizer
// Remote store is authoritative; the SQLite cache is consulted only when it is unreachable

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use super::remote::{HistoryRemote, RemoteError};
use super::types::{sort_newest_first, DetectionRecord, HistoryError, ImageRef, RecordOrigin};
use crate::capture::{ImageBlob, PreviewRegistry, PreviewUrl};
use crate::database::{CachedDetection, DatabaseManager, PendingUpload};
use crate::session::SessionContext;

/// Listings refetched when a delete lands while they are in flight
const MAX_LOAD_ATTEMPTS: usize = 3;

/// Result of [`HistorySynchronizer::load`]
#[derive(Debug)]
pub struct LoadOutcome {
    pub records: Vec<DetectionRecord>,
    /// Set when the listing came from the cache or the session was revoked
    pub advisory: Option<HistoryError>,
}

/// Result of [`HistorySynchronizer::clear`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClearOutcome {
    /// Remote deletions issued
    pub attempted: usize,
    /// Remote deletions that failed, plus those skipped after a 401
    pub failed: usize,
    pub unauthorized: bool,
}

pub struct HistorySynchronizer {
    pub(super) remote: Arc<dyn HistoryRemote>,
    pub(super) cache: Arc<DatabaseManager>,
    pub(super) session: Arc<SessionContext>,
    previews: Arc<PreviewRegistry>,
    records: RwLock<Vec<DetectionRecord>>,
    /// Bumped under the `records` write lock by every delete and purge
    generation: AtomicU64,
    /// Held while a local-only record is uploaded, and by delete/clear of local-only rows
    pub(super) upload_lock: Mutex<()>,
    /// Previews of local-only images, keyed by record id
    local_previews: std::sync::Mutex<HashMap<String, PreviewUrl>>,
}

impl HistorySynchronizer {
    pub fn new(
        remote: Arc<dyn HistoryRemote>,
        cache: Arc<DatabaseManager>,
        session: Arc<SessionContext>,
        previews: Arc<PreviewRegistry>,
    ) -> Self {
        Self {
            remote,
            cache,
            session,
            previews,
            records: RwLock::new(Vec::new()),
            generation: AtomicU64::new(0),
            upload_lock: Mutex::new(()),
            local_previews: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of the visible history, newest first
    pub async fn records(&self) -> Vec<DetectionRecord> {
        self.records.read().await.clone()
    }

    pub(super) fn token(&self) -> Result<String, RemoteError> {
        self.session.token().ok_or(RemoteError::Unauthorized)
    }

    /// Refresh from the remote store, falling back to the cache
    pub async fn load(&self) -> LoadOutcome {
        for attempt in 1..=MAX_LOAD_ATTEMPTS {
            let generation = self.generation.load(Ordering::SeqCst);
            let fetched = match self.token() {
                Ok(token) => self.remote.list(&token).await,
                Err(e) => Err(e),
            };

            match fetched {
                Ok(remote_records) => {
                    let mut current = self.records.write().await;
                    if self.generation.load(Ordering::SeqCst) != generation {
                        log::debug!("History changed during listing (attempt {}), fetching again", attempt);
                        continue;
                    }

                    let mirror: Vec<CachedDetection> =
                        remote_records.iter().map(CachedDetection::from).collect();
                    if let Err(e) = self.cache.replace_remote_mirror(&mirror) {
                        log::warn!("Failed to mirror history into cache: {:#}", e);
                    }

                    let mut merged = remote_records;
                    for pending in self.cached_local_only() {
                        if !merged.iter().any(|r| r.id == pending.id) {
                            merged.push(pending);
                        }
                    }
                    sort_newest_first(&mut merged);
                    self.release_previews_except(&merged);

                    log::info!("Loaded {} history records", merged.len());
                    *current = merged.clone();
                    return LoadOutcome {
                        records: merged,
                        advisory: None,
                    };
                }
                Err(RemoteError::Unauthorized) => {
                    self.escalate_unauthorized().await;
                    return LoadOutcome {
                        records: Vec::new(),
                        advisory: Some(HistoryError::Unauthorized),
                    };
                }
                Err(e) => {
                    log::warn!("Failed to load history from remote store: {}", e);
                    let mut current = self.records.write().await;
                    let mut cached: Vec<DetectionRecord> = match self.cache.list_cached_detections() {
                        Ok(rows) => rows
                            .into_iter()
                            .map(|row| self.with_local_preview(DetectionRecord::from(row)))
                            .collect(),
                        Err(err) => {
                            log::warn!("Failed to read history cache: {:#}", err);
                            Vec::new()
                        }
                    };
                    sort_newest_first(&mut cached);

                    if !cached.is_empty() {
                        self.release_previews_except(&cached);
                        *current = cached;
                    }
                    return LoadOutcome {
                        records: current.clone(),
                        advisory: Some(HistoryError::RemoteUnavailable(e)),
                    };
                }
            }
        }

        log::warn!("History kept changing while loading, keeping the visible list");
        LoadOutcome {
            records: self.records().await,
            advisory: None,
        }
    }

    /// Persist a detection remotely, then reload. On remote failure the detection is kept
    /// as a local-only record and the failure is returned for advisory display.
    pub async fn record(&self, image: &ImageBlob, detection: &DetectionRecord) -> Result<(), HistoryError> {
        let created = match self.token() {
            Ok(token) => {
                self.remote
                    .create(&token, image, &detection.disease_class, detection.confidence)
                    .await
            }
            Err(e) => Err(e),
        };

        match created {
            Ok(()) => {
                let outcome = self.load().await;
                match outcome.advisory {
                    None => Ok(()),
                    Some(HistoryError::Unauthorized) => Err(HistoryError::Unauthorized),
                    Some(advisory) => {
                        // Shown until a reload brings the server's copy and id
                        let mut copy = DetectionRecord {
                            origin: RecordOrigin::Unconfirmed,
                            ..detection.clone()
                        };
                        copy.image_ref = ImageRef::Local(self.register_preview(&copy.id, image).to_string());

                        let mut records = self.records.write().await;
                        if !records.iter().any(|r| r.id == copy.id) {
                            records.insert(0, copy);
                        }
                        Err(advisory)
                    }
                }
            }
            Err(RemoteError::Unauthorized) => {
                self.escalate_unauthorized().await;
                Err(HistoryError::Unauthorized)
            }
            Err(e) => {
                log::warn!("Failed to save detection remotely, keeping it locally: {}", e);
                let mut local = DetectionRecord {
                    id: format!("local-{}", uuid::Uuid::new_v4()),
                    origin: RecordOrigin::LocalOnly,
                    image_ref: ImageRef::Local(image.name.clone()),
                    ..detection.clone()
                };

                let pending = PendingUpload {
                    detection: CachedDetection::from(&local),
                    image_name: image.name.clone(),
                    image_mime: image.mime_type.clone(),
                    image_data: image.bytes.to_vec(),
                };
                if let Err(err) = self.cache.insert_local_only(&pending) {
                    log::warn!("Failed to cache local-only detection: {:#}", err);
                }

                local.image_ref = ImageRef::Local(self.register_preview(&local.id, image).to_string());
                self.records.write().await.insert(0, local);
                Err(HistoryError::RemoteUnavailable(e))
            }
        }
    }

    /// Remove a record. Local state is always updated; a remote failure is advisory.
    /// Deleting an id that is not present is a no-op.
    pub async fn delete(&self, id: &str) -> Result<(), HistoryError> {
        let existing = self.records.read().await.iter().find(|r| r.id == id).cloned();
        let Some(existing) = existing else {
            log::debug!("History item {} already absent", id);
            return Ok(());
        };

        let _upload = if existing.is_local_only() {
            let guard = self.upload_lock.lock().await;
            if matches!(self.cache.pending_upload(id), Ok(None)) {
                log::warn!("History item {} was uploaded before it could be deleted", id);
            }
            Some(guard)
        } else {
            None
        };

        let remote_result = if existing.has_server_id() {
            match self.token() {
                Ok(token) => self.remote.delete(&token, id).await,
                Err(e) => Err(e),
            }
        } else {
            Ok(())
        };

        {
            let mut records = self.records.write().await;
            records.retain(|r| r.id != id);
            if let Err(e) = self.cache.delete_cached_detection(id) {
                log::warn!("Failed to remove {} from history cache: {:#}", id, e);
            }
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        self.release_preview(id);

        match remote_result {
            Ok(()) => {
                log::info!("History item {} deleted", id);
                Ok(())
            }
            Err(RemoteError::Unauthorized) => {
                self.escalate_unauthorized().await;
                Err(HistoryError::Unauthorized)
            }
            Err(e) => {
                log::warn!("Failed to delete history item {} remotely, removed locally: {}", id, e);
                Err(HistoryError::RemoteUnavailable(e))
            }
        }
    }

    /// Delete every known record remotely, tolerating per-item failures, then empty
    /// local state and the cache unconditionally.
    pub async fn clear(&self) -> ClearOutcome {
        let _upload = self.upload_lock.lock().await;
        let snapshot = self.records().await;
        let mut outcome = ClearOutcome::default();
        let token = self.token();

        for record in snapshot.iter().filter(|r| r.has_server_id()) {
            let token = match &token {
                Ok(token) if !outcome.unauthorized => token,
                _ => {
                    outcome.unauthorized = true;
                    outcome.failed += 1;
                    continue;
                }
            };

            outcome.attempted += 1;
            match self.remote.delete(token, &record.id).await {
                Ok(()) => {}
                Err(RemoteError::Unauthorized) => {
                    outcome.unauthorized = true;
                    outcome.failed += 1;
                }
                Err(e) => {
                    log::warn!("Failed to delete history item {}: {}", record.id, e);
                    outcome.failed += 1;
                }
            }
        }

        self.purge_local().await;
        if outcome.unauthorized {
            self.escalate_unauthorized().await;
        }

        log::info!(
            "History cleared ({} remote deletions attempted, {} failed)",
            outcome.attempted,
            outcome.failed
        );
        outcome
    }

    /// Drop the in-memory list and the whole cache, used on credential teardown
    pub async fn purge_local(&self) {
        {
            let mut records = self.records.write().await;
            records.clear();
            if let Err(e) = self.cache.clear_detection_cache() {
                log::error!("Failed to clear history cache: {:#}", e);
            }
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        self.release_previews_except(&[]);
    }

    pub(super) async fn escalate_unauthorized(&self) {
        self.session.invalidate();
        self.purge_local().await;
    }

    pub(super) fn cached_local_only(&self) -> Vec<DetectionRecord> {
        match self.cache.list_cached_detections() {
            Ok(rows) => rows
                .into_iter()
                .map(DetectionRecord::from)
                .filter(DetectionRecord::is_local_only)
                .map(|record| self.with_local_preview(record))
                .collect(),
            Err(e) => {
                log::warn!("Failed to read local-only detections: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Point a local-only record at a live preview of its cached image
    fn with_local_preview(&self, mut record: DetectionRecord) -> DetectionRecord {
        if !record.is_local_only() {
            return record;
        }

        let mut previews = self.lock_local_previews();
        if let Some(url) = previews.get(&record.id) {
            if self.previews.resolve(url.as_str()).is_some() {
                record.image_ref = ImageRef::Local(url.to_string());
                return record;
            }
        }

        match self.cache.pending_upload(&record.id) {
            Ok(Some(upload)) => {
                let blob = ImageBlob::new(upload.image_name, upload.image_mime, upload.image_data);
                let url = self.previews.create(&blob);
                record.image_ref = ImageRef::Local(url.to_string());
                previews.insert(record.id.clone(), url);
            }
            Ok(None) => log::debug!("No cached image for local-only record {}", record.id),
            Err(e) => log::warn!("Failed to read cached image for {}: {:#}", record.id, e),
        }
        record
    }

    fn register_preview(&self, id: &str, image: &ImageBlob) -> PreviewUrl {
        let url = self.previews.create(image);
        if let Some(old) = self.lock_local_previews().insert(id.to_string(), url.clone()) {
            self.previews.revoke(&old);
        }
        url
    }

    fn release_preview(&self, id: &str) {
        if let Some(url) = self.lock_local_previews().remove(id) {
            self.previews.revoke(&url);
        }
    }

    fn release_previews_except(&self, keep: &[DetectionRecord]) {
        let mut previews = self.lock_local_previews();
        previews.retain(|id, url| {
            let kept = keep.iter().any(|r| &r.id == id);
            if !kept {
                self.previews.revoke(url);
            }
            kept
        });
    }

    fn lock_local_previews(&self) -> std::sync::MutexGuard<'_, HashMap<String, PreviewUrl>> {
        self.local_previews.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::history::remote::fake::FakeRemote;
    use crate::session::Credentials;
    use tempfile::{tempdir, TempDir};

    pub struct Harness {
        pub _dir: TempDir,
        pub remote: Arc<FakeRemote>,
        pub cache: Arc<DatabaseManager>,
        pub session: Arc<SessionContext>,
        pub previews: Arc<PreviewRegistry>,
        pub history: Arc<HistorySynchronizer>,
    }

    pub fn remote_record(id: &str, timestamp: &str) -> DetectionRecord {
        DetectionRecord {
            id: id.to_string(),
            disease_class: "Apple Scab".to_string(),
            confidence: 0.873,
            timestamp: timestamp.to_string(),
            image_ref: ImageRef::Server(format!("uploads/images/{}.jpg", id)),
            origin: RecordOrigin::Remote,
        }
    }

    pub fn harness(records: Vec<DetectionRecord>) -> Harness {
        let dir = tempdir().unwrap();
        let cache = Arc::new(DatabaseManager::new(dir.path().join("cache.db")).unwrap());
        let remote = Arc::new(FakeRemote::with_records(records));
        let session = SessionContext::with_credentials(Credentials::bearer("token"));
        let previews = Arc::new(PreviewRegistry::new());
        let history = Arc::new(HistorySynchronizer::new(
            remote.clone(),
            cache.clone(),
            session.clone(),
            previews.clone(),
        ));
        Harness {
            _dir: dir,
            remote,
            cache,
            session,
            previews,
            history,
        }
    }
}
