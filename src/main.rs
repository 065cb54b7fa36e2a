//! leafcheck command line
//!
//! ```text
//! leafcheck detect <image>   classify a JPEG/PNG leaf photo and save it to history
//! leafcheck history          list saved detections
//! leafcheck delete <id>      delete one saved detection
//! leafcheck clear            delete every saved detection
//! leafcheck ping             probe the inference service
//! ```
//!
//! The bearer token is read from `LEAFCHECK_TOKEN`; endpoints from `LEAFCHECK_*`.
//! Results go to stdout as JSON, logs to stderr.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::json;

use leafcheck::capture::UnavailableCamera;
use leafcheck::history::HistoryStats;
use leafcheck::{
    CandidateFile, Credentials, DetectionEngine, DetectorConfig, SessionContext, SessionEvent,
};

const USAGE: &str = "usage: leafcheck <detect <image> | history | delete <id> | clear | ping>";
const EXIT_REAUTHENTICATE: i32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).ok_or_else(|| anyhow!(USAGE))?;

    let session = SessionContext::new();
    match std::env::var("LEAFCHECK_TOKEN") {
        Ok(token) if !token.trim().is_empty() => session.sign_in(Credentials::bearer(token.trim())),
        _ => log::warn!("LEAFCHECK_TOKEN is not set; history calls will be rejected"),
    }

    let engine = DetectionEngine::from_config(
        DetectorConfig::from_env(),
        session.clone(),
        Arc::new(UnavailableCamera),
    )?;

    let result = run(&engine, command, &args[1..]).await;
    engine.shutdown().await;

    if session.current_event() == SessionEvent::ReauthenticationRequired {
        eprintln!("Session expired, sign in again and export a fresh LEAFCHECK_TOKEN");
        std::process::exit(EXIT_REAUTHENTICATE);
    }
    result
}

async fn run(engine: &DetectionEngine, command: &str, rest: &[String]) -> Result<()> {
    match (command, rest) {
        ("detect", [path]) => detect(engine, Path::new(path)).await,
        ("history", []) => history(engine).await,
        ("delete", [id]) => {
            engine.load_history().await;
            if let Err(e) = engine.delete_history_item(id).await {
                log::warn!("{}", e);
            }
            print_json(&json!({ "deleted": id, "remaining": engine.history().await.len() }))
        }
        ("clear", []) => {
            engine.load_history().await;
            let outcome = engine.clear_history().await;
            print_json(&json!({
                "attempted": outcome.attempted,
                "failed": outcome.failed,
            }))
        }
        ("ping", []) => {
            let status = engine.check_health().await;
            print_json(&json!({ "url": engine.config().liveness_url(), "status": status }))
        }
        _ => bail!(USAGE),
    }
}

async fn detect(engine: &DetectionEngine, path: &Path) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());

    engine
        .select_file(CandidateFile::new(name, mime_for(path), bytes))
        .await?;
    let outcome = engine.detect().await?;

    if let Some(advisory) = &outcome.history_advisory {
        log::warn!("{}", advisory);
    }
    print_json(&outcome)
}

async fn history(engine: &DetectionEngine) -> Result<()> {
    let loaded = engine.load_history().await;
    if let Some(advisory) = &loaded.advisory {
        log::warn!("{}", advisory);
    }

    let items: Vec<_> = loaded
        .records
        .iter()
        .map(|record| {
            json!({
                "id": record.id,
                "disease": record.disease_class,
                "confidence": record.confidence_percent(),
                "timestamp": record.timestamp,
                "image_url": engine.image_url(record),
                "pending_upload": record.is_local_only(),
            })
        })
        .collect();

    print_json(&json!({
        "stats": HistoryStats::from_records(&loaded.records),
        "records": items,
    }))
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", text);
    Ok(())
}
