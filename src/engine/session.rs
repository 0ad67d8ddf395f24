use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;

use super::visited::VisitedSet;
use crate::errors::FailureClass;
use crate::findings::FindingAggregator;

/// Monotonic session counters. Every field is only ever incremented.
#[derive(Debug, Default)]
pub struct Stats {
    pub pages_crawled: AtomicUsize,
    pub candidates_tried: AtomicUsize,
    pub observations: AtomicUsize,
    pub succeeded: AtomicUsize,
    pub duplicates: AtomicUsize,
    pub out_of_scope: AtomicUsize,
    pub limit_reached: AtomicUsize,
    pub network_failures: AtomicUsize,
    pub tls_failures: AtomicUsize,
    pub logic_failures: AtomicUsize,
    pub throttled: AtomicUsize,
    pub retries: AtomicUsize,
    pub cancelled: AtomicUsize,
    token_attempts: AtomicUsize,
    token_latency_total_ms: AtomicU64,
    token_latency_min_ms: AtomicU64,
    token_latency_max_ms: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub pages_crawled: usize,
    pub candidates_tried: usize,
    pub observations: usize,
    pub succeeded: usize,
    pub duplicates: usize,
    pub out_of_scope: usize,
    pub limit_reached: usize,
    pub network_failures: usize,
    pub tls_failures: usize,
    pub logic_failures: usize,
    pub throttled: usize,
    pub retries: usize,
    pub cancelled: usize,
    pub token_latency_ms: Option<LatencySummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencySummary {
    pub attempts: usize,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
}

fn bump(c: &AtomicUsize) {
    c.fetch_add(1, Ordering::Relaxed);
}

impl Stats {
    pub fn new() -> Self {
        Self {
            token_latency_min_ms: AtomicU64::new(u64::MAX),
            ..Default::default()
        }
    }

    pub fn record_failure(&self, class: FailureClass) {
        match class {
            FailureClass::Network => bump(&self.network_failures),
            FailureClass::Tls => bump(&self.tls_failures),
            FailureClass::Logic => bump(&self.logic_failures),
        }
    }

    pub fn record_token_latency(&self, latency: Duration) {
        let ms = latency.as_millis() as u64;
        bump(&self.token_attempts);
        self.token_latency_total_ms.fetch_add(ms, Ordering::Relaxed);
        self.token_latency_min_ms.fetch_min(ms, Ordering::Relaxed);
        self.token_latency_max_ms.fetch_max(ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        let attempts = load(&self.token_attempts);
        let token_latency_ms = (attempts > 0).then(|| LatencySummary {
            attempts,
            min: self.token_latency_min_ms.load(Ordering::Relaxed),
            max: self.token_latency_max_ms.load(Ordering::Relaxed),
            mean: self.token_latency_total_ms.load(Ordering::Relaxed) as f64 / attempts as f64,
        });
        StatsSnapshot {
            pages_crawled: load(&self.pages_crawled),
            candidates_tried: load(&self.candidates_tried),
            observations: load(&self.observations),
            succeeded: load(&self.succeeded),
            duplicates: load(&self.duplicates),
            out_of_scope: load(&self.out_of_scope),
            limit_reached: load(&self.limit_reached),
            network_failures: load(&self.network_failures),
            tls_failures: load(&self.tls_failures),
            logic_failures: load(&self.logic_failures),
            throttled: load(&self.throttled),
            retries: load(&self.retries),
            cancelled: load(&self.cancelled),
            token_latency_ms,
        }
    }
}

/// Hands out timestamp-derived session ids, strictly increasing per issuer.
#[derive(Debug, Default)]
pub struct SessionIds {
    last: Mutex<String>,
}

impl SessionIds {
    pub fn next(&self, now: &DateTime<Local>) -> String {
        next_session_id(&mut self.last.lock(), now)
    }
}

fn next_session_id(last: &mut String, now: &DateTime<Local>) -> String {
    let base = now.format("%Y%m%d_%H%M%S").to_string();
    let mut id = base.clone();
    let mut n = 1;
    while id <= *last {
        id = format!("{base}_{n:03}");
        n += 1;
    }
    last.clone_from(&id);
    id
}

/// Root aggregate of one run.
pub struct Session {
    pub id: String,
    pub started: DateTime<Local>,
    pub visited: VisitedSet,
    pub findings: FindingAggregator,
    pub stats: Arc<Stats>,
}

impl Session {
    pub fn new(ids: &SessionIds, max_evidence: usize) -> Self {
        let started = Local::now();
        Self {
            id: ids.next(&started),
            started,
            visited: VisitedSet::new(),
            findings: FindingAggregator::new(max_evidence),
            stats: Arc::new(Stats::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_increase() {
        let ids = SessionIds::default();
        let a = Session::new(&ids, 20);
        let b = Session::new(&ids, 20);
        assert!(b.id > a.id, "{} !> {}", b.id, a.id);
    }

    #[test]
    fn same_second_ids_get_a_counter() {
        let now = Local::now();
        let mut last = String::new();
        let a = next_session_id(&mut last, &now);
        let b = next_session_id(&mut last, &now);
        let c = next_session_id(&mut last, &now);
        assert_eq!(b, format!("{a}_001"));
        assert_eq!(c, format!("{a}_002"));
    }

    #[test]
    fn token_latency_summary() {
        let s = Stats::new();
        assert!(s.snapshot().token_latency_ms.is_none());
        s.record_token_latency(Duration::from_millis(10));
        s.record_token_latency(Duration::from_millis(30));
        let l = s.snapshot().token_latency_ms.unwrap();
        assert_eq!((l.attempts, l.min, l.max), (2, 10, 30));
        assert!((l.mean - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn failure_classes_are_distinct() {
        let s = Stats::new();
        s.record_failure(FailureClass::Tls);
        s.record_failure(FailureClass::Network);
        s.record_failure(FailureClass::Network);
        let snap = s.snapshot();
        assert_eq!((snap.tls_failures, snap.network_failures, snap.logic_failures), (1, 2, 0));
    }
}
