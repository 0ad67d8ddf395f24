pub mod aggregator;

pub use aggregator::FindingAggregator;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Finding severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// One step down, floored at `Info`.
    pub fn downgrade(self) -> Self {
        match self {
            Severity::Critical => Severity::High,
            Severity::High => Severity::Medium,
            Severity::Medium => Severity::Low,
            Severity::Low | Severity::Info => Severity::Info,
        }
    }
}

/// Per-observation verdict assigned by the probe that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Benign,
    Interesting,
    High,
    Critical,
}

impl From<Severity> for Classification {
    fn from(s: Severity) -> Self {
        match s {
            Severity::Critical => Classification::Critical,
            Severity::High => Classification::High,
            Severity::Medium | Severity::Low => Classification::Interesting,
            Severity::Info => Classification::Benign,
        }
    }
}

/// A finding-worthy fact carried by an observation. The aggregator folds
/// signals sharing `(kind, endpoint)` into one [`Finding`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub endpoint: String,
    pub description: String,
    pub impact: String,
    pub evidence: Value,
}

/// Aggregated, severity-tagged conclusion. The serialized keys are part of
/// the persisted report format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub count: usize,
    pub endpoint: String,
    pub description: String,
    pub impact: String,
    pub evidence: Vec<Value>,
}
