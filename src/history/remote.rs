// History service client
// GET/POST <history>, DELETE <history>/{id}, all bearer-authenticated

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use thiserror::Error;

use super::types::{DetectionRecord, ImageRef, RecordOrigin};
use crate::capture::ImageBlob;
use crate::inference::error::error_detail;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("History service rejected the credentials")]
    Unauthorized,
    #[error("History service returned {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("History service unreachable: {0}")]
    Transport(String),
    #[error("Unexpected history payload: {0}")]
    Decode(String),
}

#[async_trait]
pub trait HistoryRemote: Send + Sync {
    /// Stored records, as ordered by the service
    async fn list(&self, token: &str) -> Result<Vec<DetectionRecord>, RemoteError>;

    async fn create(
        &self,
        token: &str,
        image: &ImageBlob,
        label: &str,
        confidence: f64,
    ) -> Result<(), RemoteError>;

    async fn delete(&self, token: &str, id: &str) -> Result<(), RemoteError>;
}

pub struct HttpHistoryClient {
    client: Client,
    history_url: String,
}

impl HttpHistoryClient {
    pub fn new(history_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            history_url: history_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn check(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(RemoteError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                detail: error_detail(&body, &status.to_string()),
            });
        }
        Ok(response)
    }
}

fn transport(err: reqwest::Error) -> RemoteError {
    RemoteError::Transport(err.to_string())
}

#[async_trait]
impl HistoryRemote for HttpHistoryClient {
    async fn list(&self, token: &str) -> Result<Vec<DetectionRecord>, RemoteError> {
        let response = self
            .client
            .get(&self.history_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport)?;

        let payload: Value = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;

        decode_history(&payload)
    }

    async fn create(
        &self,
        token: &str,
        image: &ImageBlob,
        label: &str,
        confidence: f64,
    ) -> Result<(), RemoteError> {
        let part = Part::bytes(image.bytes.to_vec())
            .file_name(image.name.clone())
            .mime_str(&image.mime_type)
            .map_err(|e| RemoteError::Decode(format!("Invalid MIME type: {}", e)))?;
        let form = Form::new()
            .part("file", part)
            .text("result", label.to_string())
            .text("confidence", confidence.to_string());

        let response = self
            .client
            .post(&self.history_url)
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;

        Self::check(response).await?;
        Ok(())
    }

    async fn delete(&self, token: &str, id: &str) -> Result<(), RemoteError> {
        let response = self
            .client
            .delete(format!("{}/{}", self.history_url, id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport)?;

        // Already gone on the server is the outcome the caller wanted
        if response.status() == StatusCode::NOT_FOUND {
            log::debug!("History item {} was already absent remotely", id);
            return Ok(());
        }

        Self::check(response).await?;
        Ok(())
    }
}

/// Decode a history listing; entries without an id are skipped
pub fn decode_history(payload: &Value) -> Result<Vec<DetectionRecord>, RemoteError> {
    let items = payload
        .as_array()
        .ok_or_else(|| RemoteError::Decode("expected a JSON array".to_string()))?;

    Ok(items
        .iter()
        .filter_map(|item| {
            let record = decode_record(item);
            if record.is_none() {
                log::warn!("Skipping history entry without an id: {}", item);
            }
            record
        })
        .collect())
}

fn decode_record(item: &Value) -> Option<DetectionRecord> {
    let id = match item.get("id")? {
        Value::Number(n) => n.to_string(),
        Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
        _ => return None,
    };

    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| item.get(*k).and_then(Value::as_str))
            .map(str::to_string)
    };

    let confidence = match item.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };

    Some(DetectionRecord {
        id,
        disease_class: text(&["disease_name", "class"]).unwrap_or_else(|| "Unknown".to_string()),
        confidence,
        timestamp: text(&["timestamp", "created_at"]).unwrap_or_default(),
        image_ref: ImageRef::Server(text(&["image_path"]).unwrap_or_default()),
        origin: RecordOrigin::Remote,
    })
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    /// Holds one call open until the test releases it
    #[derive(Default)]
    pub struct Gate {
        pub entered: Notify,
        pub release: Notify,
    }

    impl Gate {
        async fn pass(&self) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }

    /// In-memory history service with injectable failures
    #[derive(Default)]
    pub struct FakeRemote {
        pub records: Mutex<Vec<DetectionRecord>>,
        pub fail_list: Mutex<Option<RemoteError>>,
        pub fail_create: Mutex<Option<RemoteError>>,
        pub fail_delete: Mutex<HashMap<String, RemoteError>>,
        pub delete_calls: Mutex<Vec<String>>,
        pub created: Mutex<Vec<(String, String, f64)>>,
        list_gate: Mutex<Option<Arc<Gate>>>,
        create_gate: Mutex<Option<Arc<Gate>>>,
        next_id: AtomicUsize,
    }

    impl FakeRemote {
        pub fn with_records(records: Vec<DetectionRecord>) -> Self {
            let remote = Self::default();
            *remote.records.lock().unwrap() = records;
            remote
        }

        pub fn set_list_error(&self, err: Option<RemoteError>) {
            *self.fail_list.lock().unwrap() = err;
        }

        pub fn set_create_error(&self, err: Option<RemoteError>) {
            *self.fail_create.lock().unwrap() = err;
        }

        pub fn fail_delete_of(&self, id: &str, err: RemoteError) {
            self.fail_delete.lock().unwrap().insert(id.to_string(), err);
        }

        pub fn delete_calls(&self) -> Vec<String> {
            self.delete_calls.lock().unwrap().clone()
        }

        /// The next `list` snapshots the records, then waits on the gate
        pub fn gate_next_list(&self) -> Arc<Gate> {
            let gate = Arc::new(Gate::default());
            *self.list_gate.lock().unwrap() = Some(gate.clone());
            gate
        }

        /// The next `create` waits on the gate before storing anything
        pub fn gate_next_create(&self) -> Arc<Gate> {
            let gate = Arc::new(Gate::default());
            *self.create_gate.lock().unwrap() = Some(gate.clone());
            gate
        }
    }

    #[async_trait]
    impl HistoryRemote for FakeRemote {
        async fn list(&self, _token: &str) -> Result<Vec<DetectionRecord>, RemoteError> {
            if let Some(err) = self.fail_list.lock().unwrap().clone() {
                return Err(err);
            }
            let snapshot = self.records.lock().unwrap().clone();
            let gate = self.list_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                gate.pass().await;
            }
            Ok(snapshot)
        }

        async fn create(
            &self,
            _token: &str,
            image: &ImageBlob,
            label: &str,
            confidence: f64,
        ) -> Result<(), RemoteError> {
            let gate = self.create_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                gate.pass().await;
            }
            if let Some(err) = self.fail_create.lock().unwrap().clone() {
                return Err(err);
            }
            let id = 100 + self.next_id.fetch_add(1, Ordering::SeqCst);
            self.created
                .lock()
                .unwrap()
                .push((image.name.clone(), label.to_string(), confidence));
            self.records.lock().unwrap().insert(
                0,
                DetectionRecord {
                    id: id.to_string(),
                    disease_class: label.to_string(),
                    confidence,
                    timestamp: chrono::Utc::now().to_rfc3339(),
                    image_ref: ImageRef::Server(format!("uploads/images/{}", image.name)),
                    origin: RecordOrigin::Remote,
                },
            );
            Ok(())
        }

        async fn delete(&self, _token: &str, id: &str) -> Result<(), RemoteError> {
            self.delete_calls.lock().unwrap().push(id.to_string());
            if let Some(err) = self.fail_delete.lock().unwrap().get(id).cloned() {
                return Err(err);
            }
            self.records.lock().unwrap().retain(|r| r.id != id);
            Ok(())
        }
    }
}
