use serde::{Deserialize, Serialize};

use crate::findings::{Classification, Signal};
use crate::probe::{Extracted, Observation, ProbeKind};

/// One line of `observations.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub probe: String,
    pub candidate: String,
    pub url: Option<String>,
    pub depth: Option<usize>,
    pub status: u16,
    pub size: usize,
    pub response_ms: u64,
    pub classification: Classification,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub extracted: Option<ExtractedRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub signals: Vec<Signal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub forms: usize,
    pub params: Vec<String>,
    pub links: Vec<String>,
    pub xhr_endpoints: Vec<String>,
}

impl From<&Extracted> for ExtractedRecord {
    fn from(e: &Extracted) -> Self {
        Self {
            forms: e.forms.len(),
            params: e.params.clone(),
            links: e.links.iter().map(|u| u.to_string()).collect(),
            xhr_endpoints: e.xhr_endpoints.clone(),
        }
    }
}

impl From<&Observation> for ObservationRecord {
    fn from(obs: &Observation) -> Self {
        let extracted = matches!(ProbeKind::of(&obs.candidate), ProbeKind::Page).then(|| (&obs.extracted).into());
        Self {
            probe: format!("{:?}", ProbeKind::of(&obs.candidate)).to_lowercase(),
            candidate: obs.candidate.label(),
            url: obs.candidate.target_url().map(String::from),
            depth: obs.candidate.depth(),
            status: obs.status_code,
            size: obs.size,
            response_ms: obs.latency.as_millis() as u64,
            classification: obs.classification,
            extracted,
            signals: obs.signals.clone(),
        }
    }
}
