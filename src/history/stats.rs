// Summary counts over the visible history

use serde::{Deserialize, Serialize};

use super::types::DetectionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total: usize,
    pub healthy: usize,
    pub diseased: usize,
}

impl HistoryStats {
    pub fn from_records(records: &[DetectionRecord]) -> Self {
        let healthy = records
            .iter()
            .filter(|r| r.disease_class.to_lowercase().contains("healthy"))
            .count();

        Self {
            total: records.len(),
            healthy,
            diseased: records.len() - healthy,
        }
    }
}
