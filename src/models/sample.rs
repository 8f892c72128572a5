//! Sample model

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

/// Kind of a scalar feature value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    Number,
    String,
    Bool,
}

impl FeatureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKind::Number => "number",
            FeatureKind::String => "string",
            FeatureKind::Bool => "bool",
        }
    }
}

impl std::fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single scalar feature value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl FeatureValue {
    pub fn kind(&self) -> FeatureKind {
        match self {
            FeatureValue::Flag(_) => FeatureKind::Bool,
            FeatureValue::Number(_) => FeatureKind::Number,
            FeatureValue::Text(_) => FeatureKind::String,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FeatureValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Number(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        FeatureValue::Text(v.to_string())
    }
}

/// A validated sample with an assigned id.
///
/// Features are kept key-sorted so serialization is stable; the serialized
/// form is itself a valid request sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSample {
    pub id: String,
    pub features: BTreeMap<String, FeatureValue>,
}

impl NormalizedSample {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            features: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<FeatureValue>) -> Self {
        self.features.insert(name.to_string(), value.into());
        self
    }

    /// Numeric feature, `None` if absent or not a number
    pub fn number(&self, name: &str) -> Option<f64> {
        self.features.get(name).and_then(FeatureValue::as_f64)
    }

    /// Text feature, `None` if absent or not a string
    pub fn text(&self, name: &str) -> Option<&str> {
        self.features.get(name).and_then(FeatureValue::as_str)
    }
}

/// Body of `/api/v1/predict` and `/proxy/predict`.
///
/// Samples stay raw JSON here; shape checks happen in the normalizer so that
/// errors can point at the offending index and field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub samples: Vec<serde_json::Value>,
}
