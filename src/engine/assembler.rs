//! Result Assembler
//!
//! Pure mapping from raw backend output to `PredictionResult` and
//! `DetectionEvent`.
//!
//! The probability mapping only covers the predicted class and Benign:
//! `{label: score, Benign: 1 - score}` for attacks, `{Benign: score}` otherwise.

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};

use crate::models::{DetectionEvent, Label, NormalizedSample, PredictionResult, RawScore, Severity};

/// Scores are reported with this many decimals
pub const SCORE_DECIMALS: i32 = 2;

/// Score above which a non-benign detection is `high`
pub const HIGH_SEVERITY_SCORE: f64 = 0.85;

/// Features copied into the detection snapshot
const SNAPSHOT_FEATURES: [&str; 2] = ["src_ip", "dst_ip"];

/// Clamp into [0, 1]; NaN maps to 0
pub fn clamp_score(raw: f64) -> f64 {
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, 1.0)
    }
}

fn round_score(value: f64) -> f64 {
    let factor = 10f64.powi(SCORE_DECIMALS);
    (value * factor).round() / factor
}

pub fn assemble(id: impl Into<String>, raw: RawScore, timestamp: DateTime<Utc>) -> PredictionResult {
    let score = round_score(clamp_score(raw.confidence));

    let mut probabilities = BTreeMap::new();
    probabilities.insert(raw.label, score);
    if !raw.label.is_benign() {
        probabilities.insert(Label::Benign, round_score(1.0 - score));
    }

    PredictionResult {
        id: id.into(),
        pred_label: raw.label,
        score,
        probabilities,
        timestamp,
    }
}

pub fn severity(label: Label, score: f64) -> Severity {
    match label {
        Label::Benign => Severity::Low,
        _ if score > HIGH_SEVERITY_SCORE => Severity::High,
        _ => Severity::Medium,
    }
}

pub fn detection_event(prediction: PredictionResult, sample: &NormalizedSample) -> DetectionEvent {
    let features = SNAPSHOT_FEATURES
        .iter()
        .filter_map(|name| sample.text(name).map(|v| (name.to_string(), v.to_string())))
        .collect();

    DetectionEvent {
        severity: severity(prediction.pred_label, prediction.score),
        prediction,
        features,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_attack_probabilities() {
        let result = assemble("p1", RawScore::new(Label::DoS, 0.9), ts());

        assert_eq!(result.pred_label, Label::DoS);
        assert_eq!(result.score, 0.9);
        assert_eq!(result.probability_of(Label::DoS), Some(result.score));
        assert_eq!(result.probability_of(Label::Benign), Some(0.1));
        assert_eq!(result.probabilities.len(), 2);
    }

    #[test]
    fn test_benign_probabilities() {
        let result = assemble("p2", RawScore::new(Label::Benign, 0.73), ts());

        assert_eq!(result.probabilities.len(), 1);
        assert_eq!(result.probability_of(Label::Benign), Some(0.73));
    }

    #[test]
    fn test_score_is_clamped() {
        assert_eq!(assemble("a", RawScore::new(Label::PortScan, 1.7), ts()).score, 1.0);
        assert_eq!(assemble("b", RawScore::new(Label::PortScan, -0.2), ts()).score, 0.0);
        assert_eq!(assemble("c", RawScore::new(Label::PortScan, f64::NAN), ts()).score, 0.0);
    }

    #[test]
    fn test_predicted_probability_matches_score() {
        for label in Label::ALL {
            for i in 0..=100 {
                let raw = i as f64 / 97.0;
                let result = assemble("x", RawScore::new(label, raw), ts());
                let total: f64 = result.probabilities.values().sum();

                assert_eq!(result.probability_of(label), Some(result.score));
                assert!((0.0..=1.0).contains(&result.score));
                if !label.is_benign() {
                    assert!((total - 1.0).abs() < 1e-9, "sum was {}", total);
                }
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let a = assemble("same", RawScore::new(Label::BruteForce, 0.876), ts());
        let b = assemble("same", RawScore::new(Label::BruteForce, 0.876), ts());
        assert_eq!(a, b);
    }

    #[test]
    fn test_severity_tiers() {
        assert_eq!(severity(Label::Benign, 0.99), Severity::Low);
        assert_eq!(severity(Label::DoS, 0.86), Severity::High);
        assert_eq!(severity(Label::DoS, 0.85), Severity::Medium);
        assert_eq!(severity(Label::PortScan, 0.1), Severity::Medium);
        assert_eq!(severity(Label::BruteForce, 1.0), Severity::High);
    }

    #[test]
    fn test_detection_event_snapshot() {
        let sample = NormalizedSample::new("pkt_9")
            .with("src_ip", "10.0.0.1")
            .with("dst_ip", "10.0.0.5")
            .with("flow_packets_per_sec", 42.0);
        let prediction = assemble("pkt_9", RawScore::new(Label::PortScan, 0.95), ts());

        let event = detection_event(prediction, &sample);
        assert_eq!(event.severity, Severity::High);
        assert_eq!(event.features.len(), 2);
        assert_eq!(event.features["src_ip"], "10.0.0.1");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["pred_label"], "PortScan");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["features"]["dst_ip"], "10.0.0.5");
    }
}
