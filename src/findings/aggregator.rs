use std::sync::Arc;

use parking_lot::Mutex;

use super::{Finding, Signal};

#[derive(Default)]
struct Inner {
    index: ahash::AHashMap<(String, String), usize>,
    findings: Vec<Finding>,
}

/// Folds signals into findings keyed by `(type, endpoint)`.
///
/// All mutation goes through a single `parking_lot::Mutex`, so workers may
/// submit concurrently. Findings keep first-seen order; `count` only grows.
#[derive(Clone)]
pub struct FindingAggregator {
    inner: Arc<Mutex<Inner>>,
    max_evidence: usize,
}

impl FindingAggregator {
    /// `max_evidence` bounds the evidence list per finding; `count` is never capped.
    pub fn new(max_evidence: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            max_evidence,
        }
    }

    pub fn submit(&self, signal: &Signal) {
        let mut inner = self.inner.lock();
        let key = (signal.kind.clone(), signal.endpoint.clone());

        if let Some(&idx) = inner.index.get(&key) {
            let finding = &mut inner.findings[idx];
            finding.count += 1;
            finding.severity = finding.severity.max(signal.severity);
            if finding.evidence.len() < self.max_evidence {
                finding.evidence.push(signal.evidence.clone());
            }
            return;
        }

        let evidence = if self.max_evidence > 0 { vec![signal.evidence.clone()] } else { Vec::new() };
        let idx = inner.findings.len();
        inner.findings.push(Finding {
            kind: signal.kind.clone(),
            severity: signal.severity,
            count: 1,
            endpoint: signal.endpoint.clone(),
            description: signal.description.clone(),
            impact: signal.impact.clone(),
            evidence,
        });
        inner.index.insert(key, idx);
    }

    pub fn submit_all<'a>(&self, signals: impl IntoIterator<Item = &'a Signal>) {
        for s in signals {
            self.submit(s);
        }
    }

    pub fn snapshot(&self) -> Vec<Finding> {
        self.inner.lock().findings.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FindingAggregator {
    fn default() -> Self {
        Self::new(20)
    }
}
