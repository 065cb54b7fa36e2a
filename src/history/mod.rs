// History module for leafcheck
// Detection history kept in the remote store, mirrored to the local cache

pub mod reconcile;
pub mod remote;
pub mod stats;
pub mod synchronizer;
pub mod types;

pub use reconcile::{ReconcileReport, Reconciler};
pub use remote::{HistoryRemote, HttpHistoryClient, RemoteError};
pub use stats::HistoryStats;
pub use synchronizer::{ClearOutcome, HistorySynchronizer, LoadOutcome};
pub use types::{
    clamp_confidence, format_confidence, parse_timestamp, DetectionRecord, HistoryError, ImageRef,
    RecordOrigin,
};
