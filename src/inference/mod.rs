//! Inference module: classification requests and service liveness
//!
//! - `client`: HTTP access to the inference service
//! - `pipeline`: one-at-a-time submission state machine
//! - `health`: background liveness polling

pub mod client;
pub mod error;
pub mod health;
pub mod pipeline;

pub use client::{Classification, HttpInferenceClient, InferenceService};
pub use error::PredictionError;
pub use health::{HealthMonitor, HealthStatus};
pub use pipeline::{Detection, PipelineState, PredictionPipeline};
