// Upload of local-only detections once the history service is reachable again

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::remote::RemoteError;
use super::synchronizer::HistorySynchronizer;
use super::types::HistoryError;
use crate::capture::ImageBlob;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileReport {
    pub uploaded: usize,
    pub remaining: usize,
}

impl HistorySynchronizer {
    /// Push every pending local-only detection to the remote store, oldest first.
    /// Stops at the first remote failure; whatever is left stays pending.
    /// Each upload holds the upload lock, so a record deleted meanwhile is skipped.
    pub async fn reconcile(&self) -> Result<ReconcileReport, HistoryError> {
        let pending = self.cache.pending_upload_ids().map_err(HistoryError::cache)?;
        if pending.is_empty() {
            return Ok(ReconcileReport::default());
        }

        let token = match self.token() {
            Ok(token) => token,
            Err(_) => {
                return Ok(ReconcileReport {
                    uploaded: 0,
                    remaining: pending.len(),
                })
            }
        };

        let mut uploaded = 0;
        for id in &pending {
            let _upload = self.upload_lock.lock().await;
            let Some(upload) = self.cache.pending_upload(id).map_err(HistoryError::cache)? else {
                log::debug!("Pending detection {} was removed before upload", id);
                continue;
            };

            let image = ImageBlob::new(upload.image_name, upload.image_mime, upload.image_data);
            let detection = &upload.detection;

            match self
                .remote
                .create(&token, &image, &detection.disease_class, detection.confidence)
                .await
            {
                Ok(()) => {
                    if let Err(e) = self.cache.delete_cached_detection(&detection.id) {
                        log::warn!("Uploaded {} but could not drop it from the cache: {:#}", detection.id, e);
                    }
                    uploaded += 1;
                }
                Err(RemoteError::Unauthorized) => {
                    self.escalate_unauthorized().await;
                    return Err(HistoryError::Unauthorized);
                }
                Err(e) => {
                    log::debug!("Reconciliation paused, history service unavailable: {}", e);
                    break;
                }
            }
        }

        if uploaded > 0 {
            log::info!("Uploaded {} pending detections", uploaded);
            if let Some(advisory) = self.load().await.advisory {
                log::warn!("Reload after reconciliation failed: {}", advisory);
            }
        }

        let remaining = self.cache.pending_upload_ids().map_err(HistoryError::cache)?.len();
        Ok(ReconcileReport { uploaded, remaining })
    }
}

/// Runs [`HistorySynchronizer::reconcile`] on a fixed interval until stopped
pub struct Reconciler {
    handle: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
}

impl Reconciler {
    pub fn start(history: Arc<HistorySynchronizer>, interval: Duration) -> Self {
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(reconcile_loop(history, interval, cancel_token.clone()));

        Self {
            handle: Some(handle),
            cancel_token,
        }
    }

    pub async fn stop(&mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                log::warn!("Reconciliation task failed to join: {}", e);
            }
        }
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn reconcile_loop(
    history: Arc<HistorySynchronizer>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match history.reconcile().await {
                    Ok(report) if report.remaining > 0 => {
                        log::debug!("{} detections still pending upload", report.remaining);
                    }
                    Ok(_) => {}
                    Err(HistoryError::Unauthorized) => {
                        log::warn!("Reconciliation stopped, session revoked");
                        break;
                    }
                    Err(e) => log::warn!("Reconciliation failed: {}", e),
                }
            }
            _ = cancel_token.cancelled() => {
                log::info!("Reconciliation loop shutting down");
                break;
            }
        }
    }
}
