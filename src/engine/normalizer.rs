//! Feature Batch Normalizer
//!
//! Validates raw sample records against a feature schema and shapes them into
//! `NormalizedSample`s. A batch is accepted or rejected as a whole.

use std::collections::BTreeMap;
use serde::Serialize;
use serde_json::Value;

use crate::models::{FeatureKind, FeatureValue, NormalizedSample};

/// Default upper bound on batch size
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10_000;

/// Key holding nested features in the wire form
const FEATURES_KEY: &str = "features";
const ID_KEY: &str = "id";

// ============================================================================
// ERRORS
// ============================================================================

/// A rejected batch, pointing at the first offending sample and field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    /// Index of the sample in the batch, `None` for batch-level problems
    pub index: Option<usize>,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn at(index: usize, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            index: Some(index),
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn batch(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            index: None,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.index {
            Some(i) if self.field.is_empty() => write!(f, "samples[{}]: {}", i, self.message),
            Some(i) => write!(f, "samples[{}].{}: {}", i, self.field, self.message),
            None => write!(f, "{}: {}", self.field, self.message),
        }
    }
}

impl std::error::Error for ValidationError {}

// ============================================================================
// SCHEMA
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FeatureKind,
    pub required: bool,
}

impl FieldSpec {
    pub fn optional(name: &str, kind: FeatureKind) -> Self {
        Self { name: name.to_string(), kind, required: false }
    }

    pub fn required(name: &str, kind: FeatureKind) -> Self {
        Self { name: name.to_string(), kind, required: true }
    }
}

/// Expected feature fields. Fields not listed are accepted as long as they
/// are scalars.
#[derive(Debug, Clone, Default)]
pub struct FeatureSchema {
    fields: Vec<FieldSpec>,
}

impl FeatureSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// Flow features understood by the heuristic backend, all optional
    pub fn flow_default() -> Self {
        Self::new(vec![
            FieldSpec::optional("src_ip", FeatureKind::String),
            FieldSpec::optional("dst_ip", FeatureKind::String),
            FieldSpec::optional("flow_duration", FeatureKind::Number),
            FieldSpec::optional("flow_packets_per_sec", FeatureKind::Number),
            FieldSpec::optional("flow_bytes_per_sec", FeatureKind::Number),
            FieldSpec::optional("distinct_dst_ports", FeatureKind::Number),
            FieldSpec::optional("failed_logins", FeatureKind::Number),
        ])
    }

    /// Mark `names` as required. Unknown names become required number fields.
    pub fn require<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            match self.fields.iter_mut().find(|f| f.name == name) {
                Some(field) => field.required = true,
                None => self.fields.push(FieldSpec::required(name, FeatureKind::Number)),
            }
        }
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

#[derive(Debug, Clone)]
pub struct Normalizer {
    schema: FeatureSchema,
    max_batch_size: usize,
}

impl Normalizer {
    pub fn new(schema: FeatureSchema, max_batch_size: usize) -> Self {
        Self { schema, max_batch_size }
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Normalize a batch, preserving input order
    pub fn normalize(&self, records: &[Value]) -> Result<Vec<NormalizedSample>, ValidationError> {
        if records.len() > self.max_batch_size {
            return Err(ValidationError::batch(
                "samples",
                format!("batch of {} exceeds the maximum of {}", records.len(), self.max_batch_size),
            ));
        }

        records
            .iter()
            .enumerate()
            .map(|(index, record)| self.normalize_record(index, record))
            .collect()
    }

    fn normalize_record(&self, index: usize, record: &Value) -> Result<NormalizedSample, ValidationError> {
        let object = record
            .as_object()
            .ok_or_else(|| ValidationError::at(index, "", "sample must be a JSON object"))?;

        let id = match object.get(ID_KEY) {
            None | Some(Value::Null) => format!("pkt_{}", index),
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(_) => return Err(ValidationError::at(index, ID_KEY, "id must be a non-empty string")),
        };

        let features = match object.get(FEATURES_KEY) {
            Some(Value::Object(nested)) => collect_features(index, nested.iter())?,
            Some(_) => {
                return Err(ValidationError::at(index, FEATURES_KEY, "features must be an object"));
            }
            // Flattened form: every key except the id is a feature
            None => collect_features(index, object.iter().filter(|(k, _)| k.as_str() != ID_KEY))?,
        };

        self.check_schema(index, &features)?;

        Ok(NormalizedSample { id, features })
    }

    fn check_schema(
        &self,
        index: usize,
        features: &BTreeMap<String, FeatureValue>,
    ) -> Result<(), ValidationError> {
        for spec in self.schema.fields() {
            let field = format!("{}.{}", FEATURES_KEY, spec.name);
            match features.get(&spec.name) {
                None if spec.required => {
                    return Err(ValidationError::at(index, field, "required feature is missing"));
                }
                Some(value) if value.kind() != spec.kind => {
                    return Err(ValidationError::at(
                        index,
                        field,
                        format!("expected {}, got {}", spec.kind, value.kind()),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(FeatureSchema::flow_default(), DEFAULT_MAX_BATCH_SIZE)
    }
}

fn collect_features<'a>(
    index: usize,
    entries: impl Iterator<Item = (&'a String, &'a Value)>,
) -> Result<BTreeMap<String, FeatureValue>, ValidationError> {
    let mut features = BTreeMap::new();
    for (name, value) in entries {
        let value = match value {
            // null means absent
            Value::Null => continue,
            Value::Bool(b) => FeatureValue::Flag(*b),
            Value::Number(n) => match n.as_f64() {
                Some(f) => FeatureValue::Number(f),
                None => {
                    return Err(ValidationError::at(
                        index,
                        format!("{}.{}", FEATURES_KEY, name),
                        "number is out of range",
                    ));
                }
            },
            Value::String(s) => FeatureValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => {
                return Err(ValidationError::at(
                    index,
                    format!("{}.{}", FEATURES_KEY, name),
                    "feature must be a number, string or bool",
                ));
            }
        };
        features.insert(name.clone(), value);
    }
    Ok(features)
}
