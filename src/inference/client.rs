//! Inference service client
//!
//! `POST <predict>` with a multipart `file` field, answered by `{ class, confidence }`,
//! and `GET <ping>` for liveness.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::{error_detail, PredictionError};
use crate::capture::ImageBlob;
use crate::config::DetectorConfig;

/// Label and confidence as reported by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub confidence: f64,
}

#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn classify(&self, image: &ImageBlob, token: Option<&str>) -> Result<Classification, PredictionError>;

    /// Lightweight liveness check; any error means offline
    async fn probe(&self) -> Result<(), PredictionError>;
}

pub struct HttpInferenceClient {
    client: Client,
    predict_url: String,
    liveness_url: String,
    probe_timeout: Duration,
}

impl HttpInferenceClient {
    pub fn new(config: &DetectorConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            predict_url: config.predict_url.clone(),
            liveness_url: config.liveness_url(),
            probe_timeout: config.probe_timeout,
        })
    }

    pub fn predict_url(&self) -> &str {
        &self.predict_url
    }
}

#[async_trait]
impl InferenceService for HttpInferenceClient {
    async fn classify(&self, image: &ImageBlob, token: Option<&str>) -> Result<Classification, PredictionError> {
        let part = Part::bytes(image.bytes.to_vec())
            .file_name(image.name.clone())
            .mime_str(&image.mime_type)
            .map_err(|e| PredictionError::Unknown(format!("Invalid MIME type: {}", e)))?;
        let form = Form::new().part("file", part);

        let mut request = self.client.post(&self.predict_url).multipart(form);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PredictionError::from_transport(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PredictionError::from_transport(&e))?;

        if !status.is_success() {
            return Err(PredictionError::from_status(
                status.as_u16(),
                error_detail(&body, &status.to_string()),
            ));
        }

        parse_classification(&body)
    }

    async fn probe(&self) -> Result<(), PredictionError> {
        let response = self
            .client
            .get(&self.liveness_url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| PredictionError::from_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PredictionError::from_status(status.as_u16(), status.to_string()));
        }
        Ok(())
    }
}

/// Accept only a non-empty `class` and a numeric `confidence`
pub fn parse_classification(body: &str) -> Result<Classification, PredictionError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| PredictionError::MalformedResponse(format!("not JSON: {}", e)))?;

    let label = value
        .get("class")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PredictionError::MalformedResponse("missing class label".into()))?;

    let confidence = value
        .get("confidence")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| PredictionError::MalformedResponse("missing numeric confidence".into()))?;

    Ok(Classification {
        label: label.to_string(),
        confidence,
    })
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted inference service
    pub struct FakeInference {
        pub result: Mutex<Result<Classification, PredictionError>>,
        pub delay: Mutex<Duration>,
        pub healthy: AtomicBool,
        pub calls: AtomicUsize,
        pub probes: AtomicUsize,
        pub last_token: Mutex<Option<String>>,
    }

    impl FakeInference {
        pub fn answering(label: &str, confidence: f64) -> Self {
            Self::with_result(Ok(Classification {
                label: label.to_string(),
                confidence,
            }))
        }

        pub fn with_result(result: Result<Classification, PredictionError>) -> Self {
            Self {
                result: Mutex::new(result),
                delay: Mutex::new(Duration::ZERO),
                healthy: AtomicBool::new(true),
                calls: AtomicUsize::new(0),
                probes: AtomicUsize::new(0),
                last_token: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl InferenceService for FakeInference {
        async fn classify(&self, _image: &ImageBlob, token: Option<&str>) -> Result<Classification, PredictionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_token.lock().unwrap() = token.map(str::to_string);
            let delay = *self.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.result.lock().unwrap().clone()
        }

        async fn probe(&self) -> Result<(), PredictionError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(PredictionError::Unreachable)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_classification() {
        let parsed = parse_classification(r#"{"class":"Apple Scab","confidence":0.873}"#).unwrap();
        assert_eq!(parsed.label, "Apple Scab");
        assert_eq!(parsed.confidence, 0.873);
    }

    #[test]
    fn test_parse_keeps_out_of_range_confidence() {
        let parsed = parse_classification(r#"{"class":"Healthy","confidence":1.3}"#).unwrap();
        assert_eq!(parsed.confidence, 1.3);
    }

    #[test]
    fn test_parse_rejects_incomplete_bodies() {
        for body in [
            r#"{"confidence":0.5}"#,
            r#"{"class":"","confidence":0.5}"#,
            r#"{"class":"Black Rot"}"#,
            r#"{"class":"Black Rot","confidence":"high"}"#,
            "<html>",
        ] {
            assert!(
                matches!(parse_classification(body), Err(PredictionError::MalformedResponse(_))),
                "accepted {}",
                body
            );
        }
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        let config = DetectorConfig {
            predict_url: "http://127.0.0.1:9/predict".to_string(),
            ..Default::default()
        };
        let client = HttpInferenceClient::new(&config).unwrap();
        let image = ImageBlob::new("leaf.png", "image/png", vec![1u8, 2, 3]);

        let result = client.classify(&image, None).await;
        assert!(matches!(
            result,
            Err(PredictionError::Unreachable) | Err(PredictionError::Timeout)
        ));
        assert!(client.probe().await.is_err());
    }
}
