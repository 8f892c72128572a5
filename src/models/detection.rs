//! Detection event model

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

use super::prediction::PredictionResult;

/// Urgency tier of a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    #[serde(flatten)]
    pub prediction: PredictionResult,
    pub severity: Severity,
    /// Snapshot of identifying flow features (src/dst address)
    pub features: BTreeMap<String, String>,
}

/// One WebSocket text frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamFrame<E = DetectionEvent> {
    pub event: String,
    pub payload: E,
}

impl<E> StreamFrame<E> {
    pub fn detection(payload: E) -> Self {
        Self {
            event: "detection".to_string(),
            payload,
        }
    }
}
