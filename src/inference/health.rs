//! Health monitor
//!
//! Probes the inference service on its own timer and publishes a two-valued status.
//! The status is advisory: nothing in the submission path waits on it.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::client::InferenceService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Offline,
}

pub struct HealthMonitor {
    service: Arc<dyn InferenceService>,
    status: watch::Sender<HealthStatus>,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl HealthMonitor {
    pub fn new(service: Arc<dyn InferenceService>) -> Self {
        let (status, _) = watch::channel(HealthStatus::Offline);
        Self {
            service,
            status,
            handle: None,
            cancel_token: None,
        }
    }

    pub fn status(&self) -> HealthStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthStatus> {
        self.status.subscribe()
    }

    pub fn is_polling(&self) -> bool {
        self.handle.is_some()
    }

    /// Start the recurring probe; restarting replaces the previous schedule
    pub fn start_polling(&mut self, interval: Duration) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(polling_loop(
            self.service.clone(),
            self.status.clone(),
            interval,
            cancel_token.clone(),
        ));

        log::info!("Health polling started every {:?}", interval);
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
    }

    /// Single probe outside the schedule
    pub async fn check_now(&self) -> HealthStatus {
        let status = probe_status(self.service.as_ref()).await;
        publish(&self.status, status);
        status
    }

    pub async fn stop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                log::warn!("Health polling task failed to join: {}", e);
            }
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
    }
}

async fn probe_status(service: &dyn InferenceService) -> HealthStatus {
    match service.probe().await {
        Ok(()) => HealthStatus::Healthy,
        Err(e) => {
            log::debug!("Liveness probe failed: {}", e);
            HealthStatus::Offline
        }
    }
}

fn publish(status: &watch::Sender<HealthStatus>, next: HealthStatus) {
    let changed = status.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        *current = next;
        true
    });
    if changed {
        match next {
            HealthStatus::Healthy => log::info!("Inference service is healthy"),
            HealthStatus::Offline => log::warn!("Inference service is offline"),
        }
    }
}

async fn polling_loop(
    service: Arc<dyn InferenceService>,
    status: watch::Sender<HealthStatus>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let next = tokio::select! {
                    s = probe_status(service.as_ref()) => s,
                    _ = cancel_token.cancelled() => break,
                };
                publish(&status, next);
            }
            _ = cancel_token.cancelled() => {
                log::info!("Health polling shutting down");
                break;
            }
        }
    }
}
