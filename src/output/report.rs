use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::findings::{Finding, Severity};

/// Severity buckets of a report. Key names are part of the report format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total_tests: usize,
    pub findings_count: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

/// Persisted result of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub mode: String,
    pub timestamp: String,
    pub findings: Vec<Finding>,
    pub summary: Summary,
}

impl SessionReport {
    pub fn new(session_id: &str, mode: &str, timestamp: String, findings: Vec<Finding>, total_tests: usize) -> Self {
        let at = |s: Severity| findings.iter().filter(|f| f.severity == s).count();
        let summary = Summary {
            total_tests,
            findings_count: findings.len(),
            critical: at(Severity::Critical),
            high: at(Severity::High),
            medium: at(Severity::Medium),
            low: at(Severity::Low),
        };
        Self {
            session_id: session_id.to_string(),
            mode: mode.to_string(),
            timestamp,
            findings,
            summary,
        }
    }

    /// `<dir>/<mode>_report.json`, pretty-printed.
    pub fn write_to(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let path = dir.join(format!("{}_report.json", self.mode));
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}
