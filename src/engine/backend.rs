//! Scoring backends
//!
//! The classifier is opaque to the rest of the engine: anything implementing
//! `ScoringBackend` can be plugged into the dispatcher.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::models::{Label, NormalizedSample, RawScore};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("cannot score sample: {0}")]
    InvalidInput(String),
}

/// Anything that can classify a normalized sample
pub trait ScoringBackend: Send + Sync + 'static {
    fn model_id(&self) -> &str;

    /// Score one normalized sample. Called on the blocking pool.
    fn score(&self, sample: &NormalizedSample) -> Result<RawScore, BackendError>;
}

/// Which backend to build at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Heuristic,
    Synthetic,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heuristic" | "rules" => Ok(BackendKind::Heuristic),
            "synthetic" | "random" | "demo" => Ok(BackendKind::Synthetic),
            other => Err(format!("unknown scoring backend '{}'", other)),
        }
    }
}

// ============================================================================
// HEURISTIC BACKEND
// ============================================================================

/// Per-label trigger levels for the heuristic backend
#[derive(Debug, Clone)]
pub struct HeuristicThresholds {
    pub dos_packets_per_sec: f64,
    pub port_scan_distinct_ports: f64,
    pub brute_force_failed_logins: f64,
}

impl Default for HeuristicThresholds {
    fn default() -> Self {
        Self {
            dos_packets_per_sec: 10_000.0,
            port_scan_distinct_ports: 50.0,
            brute_force_failed_logins: 10.0,
        }
    }
}

/// Rule-based scorer over flow features.
///
/// Each attack label has a trigger feature; the label whose feature exceeds
/// its threshold by the largest ratio wins. Confidence grows with the ratio.
pub struct HeuristicBackend {
    model_id: String,
    thresholds: HeuristicThresholds,
}

impl HeuristicBackend {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            thresholds: HeuristicThresholds::default(),
        }
    }

    fn ratios(&self, sample: &NormalizedSample) -> Result<[(Label, f64); 3], BackendError> {
        let t = &self.thresholds;
        let ratio = |feature: &str, threshold: f64| -> Result<f64, BackendError> {
            let value = sample.number(feature).unwrap_or(0.0);
            if !value.is_finite() || value < 0.0 {
                return Err(BackendError::InvalidInput(format!("{} = {}", feature, value)));
            }
            Ok(value / threshold)
        };

        Ok([
            (Label::DoS, ratio("flow_packets_per_sec", t.dos_packets_per_sec)?),
            (Label::PortScan, ratio("distinct_dst_ports", t.port_scan_distinct_ports)?),
            (Label::BruteForce, ratio("failed_logins", t.brute_force_failed_logins)?),
        ])
    }
}

impl ScoringBackend for HeuristicBackend {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn score(&self, sample: &NormalizedSample) -> Result<RawScore, BackendError> {
        let ratios = self.ratios(sample)?;
        let (label, ratio) = ratios
            .iter()
            .copied()
            .fold((Label::Benign, 0.0_f64), |best, cur| if cur.1 > best.1 { cur } else { best });

        if ratio >= 1.0 {
            // 0.5 at the threshold, approaching 0.99 as the ratio grows
            let confidence = (1.0 - 0.5 / ratio).min(0.99);
            Ok(RawScore::new(label, confidence))
        } else {
            Ok(RawScore::new(Label::Benign, (1.0 - 0.5 * ratio).min(0.99)))
        }
    }
}

// ============================================================================
// SYNTHETIC BACKEND
// ============================================================================

/// Random labels and scores, for demos and load testing.
///
/// Benign with probability 0.65, otherwise a uniformly chosen attack; score
/// uniform in [0.6, 0.99).
pub struct SyntheticBackend {
    model_id: String,
    rng: Mutex<StdRng>,
}

impl SyntheticBackend {
    pub fn new(model_id: impl Into<String>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            model_id: model_id.into(),
            rng: Mutex::new(rng),
        }
    }
}

impl ScoringBackend for SyntheticBackend {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn score(&self, _sample: &NormalizedSample) -> Result<RawScore, BackendError> {
        let mut rng = self.rng.lock();
        let label = if rng.gen::<f64>() > 0.35 {
            Label::Benign
        } else {
            *Label::ATTACKS.choose(&mut *rng).unwrap_or(&Label::DoS)
        };
        Ok(RawScore::new(label, rng.gen_range(0.6..0.99)))
    }
}

#[cfg(test)]
pub mod fakes {
    //! Backends with scripted behavior for dispatcher and handler tests

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    /// Always returns the same score; fails for ids starting with "bad",
    /// panics for ids starting with "panic".
    pub struct ScriptedBackend {
        pub raw: RawScore,
        pub delay: Duration,
        pub calls: AtomicUsize,
        pub peak: AtomicUsize,
        active: AtomicUsize,
    }

    impl ScriptedBackend {
        pub fn new(label: Label, confidence: f64) -> Self {
            Self {
                raw: RawScore::new(label, confidence),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
            }
        }

        pub fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    impl ScoringBackend for ScriptedBackend {
        fn model_id(&self) -> &str {
            "scripted-v0"
        }

        fn score(&self, sample: &NormalizedSample) -> Result<RawScore, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            if sample.id.starts_with("panic") {
                panic!("scripted backend crash");
            }
            if sample.id.starts_with("bad") {
                return Err(BackendError::Unavailable("scripted failure".to_string()));
            }
            Ok(self.raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(pps: f64, ports: f64, logins: f64) -> NormalizedSample {
        NormalizedSample::new("f")
            .with("flow_packets_per_sec", pps)
            .with("distinct_dst_ports", ports)
            .with("failed_logins", logins)
    }

    #[test]
    fn test_heuristic_benign_without_signals() {
        let backend = HeuristicBackend::new("h");
        let raw = backend.score(&NormalizedSample::new("empty")).unwrap();
        assert_eq!(raw.label, Label::Benign);
        assert_eq!(raw.confidence, 0.99);
    }

    #[test]
    fn test_heuristic_picks_strongest_signal() {
        let backend = HeuristicBackend::new("h");

        assert_eq!(backend.score(&flow(50_000.0, 60.0, 0.0)).unwrap().label, Label::DoS);
        assert_eq!(backend.score(&flow(100.0, 400.0, 12.0)).unwrap().label, Label::PortScan);
        assert_eq!(backend.score(&flow(100.0, 3.0, 80.0)).unwrap().label, Label::BruteForce);
    }

    #[test]
    fn test_heuristic_confidence_grows_with_ratio() {
        let backend = HeuristicBackend::new("h");
        let at_threshold = backend.score(&flow(10_000.0, 0.0, 0.0)).unwrap();
        let far_above = backend.score(&flow(100_000.0, 0.0, 0.0)).unwrap();

        assert_eq!(at_threshold.confidence, 0.5);
        assert!(far_above.confidence > 0.9);
        assert!(far_above.confidence <= 0.99);
    }

    #[test]
    fn test_heuristic_rejects_negative_counts() {
        let backend = HeuristicBackend::new("h");
        assert!(backend.score(&flow(-1.0, 0.0, 0.0)).is_err());
    }

    #[test]
    fn test_synthetic_is_reproducible_with_seed() {
        let a = SyntheticBackend::new("s", Some(7));
        let b = SyntheticBackend::new("s", Some(7));
        let sample = NormalizedSample::new("x");

        for _ in 0..50 {
            let ra = a.score(&sample).unwrap();
            let rb = b.score(&sample).unwrap();
            assert_eq!(ra, rb);
            assert!((0.6..0.99).contains(&ra.confidence));
        }
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("Synthetic".parse::<BackendKind>().unwrap(), BackendKind::Synthetic);
        assert_eq!("rules".parse::<BackendKind>().unwrap(), BackendKind::Heuristic);
        assert!("onnx".parse::<BackendKind>().is_err());
    }
}
