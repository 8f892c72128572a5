//! Prediction model

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// Classification labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Label {
    Benign,
    DoS,
    PortScan,
    BruteForce,
}

impl Label {
    pub const ALL: [Label; 4] = [Label::Benign, Label::DoS, Label::PortScan, Label::BruteForce];
    pub const ATTACKS: [Label; 3] = [Label::DoS, Label::PortScan, Label::BruteForce];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Benign => "Benign",
            Label::DoS => "DoS",
            Label::PortScan => "PortScan",
            Label::BruteForce => "BruteForce",
        }
    }

    pub fn is_benign(&self) -> bool {
        matches!(self, Label::Benign)
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw output of a scoring backend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawScore {
    pub label: Label,
    pub confidence: f64,
}

impl RawScore {
    pub fn new(label: Label, confidence: f64) -> Self {
        Self { label, confidence }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub id: String,
    pub pred_label: Label,
    /// 0.0 - 1.0, equal to `probabilities[pred_label]`
    pub score: f64,
    pub probabilities: BTreeMap<Label, f64>,
    pub timestamp: DateTime<Utc>,
}

impl PredictionResult {
    pub fn probability_of(&self, label: Label) -> Option<f64> {
        self.probabilities.get(&label).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotError {
    pub kind: String,
    pub message: String,
}

/// Marker for a sample the backend failed to score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedPrediction {
    pub id: String,
    pub error: SlotError,
}

/// One entry of the predictions array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionSlot {
    Scored(PredictionResult),
    Failed(FailedPrediction),
}

impl PredictionSlot {
    pub fn failed(id: &str, message: impl Into<String>) -> Self {
        PredictionSlot::Failed(FailedPrediction {
            id: id.to_string(),
            error: SlotError {
                kind: "inference_error".to_string(),
                message: message.into(),
            },
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub predictions: Vec<PredictionSlot>,
    pub model: String,
}
