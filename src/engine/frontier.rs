use std::sync::atomic::Ordering;

use ahash::{AHashMap, AHashSet};
use url::Url;

use super::candidate::{normalize_url, Candidate};
use super::session::Stats;
use crate::scope::{registered_domain, ScopeMatcher};

/// Breadth-first crawl frontier.
///
/// Links are collected into the next level while the current one is being
/// drained, so a level is only released once every page of the previous level
/// has produced its observation. Per-domain page budgets are keyed on the
/// registered domain, so `a.example.com` and `b.example.com` draw from one
/// budget. A budget slot is reserved when a link is accepted, which keeps the
/// total dispatched per domain at or under `max_pages_per_domain` regardless
/// of how the level is later scheduled.
pub struct Frontier {
    max_depth: usize,
    max_pages_per_domain: usize,
    seen: AHashSet<String>,
    pages_per_domain: AHashMap<String, usize>,
    next: Vec<Candidate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Enqueued,
    Duplicate,
    OutOfScope,
    LimitReached,
}

impl Frontier {
    pub fn new(max_depth: usize, max_pages_per_domain: usize) -> Self {
        Self {
            max_depth,
            max_pages_per_domain,
            seen: AHashSet::new(),
            pages_per_domain: AHashMap::new(),
            next: Vec::new(),
        }
    }

    /// Decide whether `url` at `depth` joins the next level. Rejections other
    /// than duplicates are counted in `stats`.
    pub fn offer(&mut self, url: Url, depth: usize, scope: &ScopeMatcher, stats: &Stats) -> Admission {
        if !self.seen.insert(normalize_url(&url)) {
            return Admission::Duplicate;
        }
        if !scope.allowed_url(&url) {
            stats.out_of_scope.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(url = %url, "link out of scope");
            return Admission::OutOfScope;
        }
        if depth >= self.max_depth {
            stats.limit_reached.fetch_add(1, Ordering::Relaxed);
            return Admission::LimitReached;
        }
        let domain = url.host_str().and_then(registered_domain).unwrap_or_default();
        let used = self.pages_per_domain.entry(domain).or_insert(0);
        if *used >= self.max_pages_per_domain {
            stats.limit_reached.fetch_add(1, Ordering::Relaxed);
            return Admission::LimitReached;
        }
        *used += 1;
        self.next.push(Candidate::page(url, depth));
        Admission::Enqueued
    }

    /// Hands out the accumulated level and starts a fresh one.
    pub fn take_level(&mut self) -> Vec<Candidate> {
        std::mem::take(&mut self.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> ScopeMatcher {
        ScopeMatcher::from_patterns(["example.com", "*.example.com"])
    }

    #[test]
    fn admission_rules() {
        let stats = Stats::new();
        let mut f = Frontier::new(2, 2);
        let u = |s: &str| Url::parse(s).unwrap();

        assert_eq!(f.offer(u("https://example.com/"), 0, &scope(), &stats), Admission::Enqueued);
        assert_eq!(f.offer(u("https://example.com/#top"), 0, &scope(), &stats), Admission::Duplicate);
        assert_eq!(f.offer(u("https://evil.org/"), 1, &scope(), &stats), Admission::OutOfScope);
        assert_eq!(f.offer(u("https://example.com/deep"), 2, &scope(), &stats), Admission::LimitReached);
        assert_eq!(f.offer(u("https://example.com/a"), 1, &scope(), &stats), Admission::Enqueued);
        assert_eq!(f.offer(u("https://example.com/b"), 1, &scope(), &stats), Admission::LimitReached);
        assert_eq!(f.take_level().len(), 2);
        assert!(f.take_level().is_empty());

        let snap = stats.snapshot();
        assert_eq!((snap.out_of_scope, snap.limit_reached), (1, 2));
    }

    #[test]
    fn subdomains_share_the_registered_domain_budget() {
        let stats = Stats::new();
        let mut f = Frontier::new(3, 2);
        let u = |s: &str| Url::parse(s).unwrap();

        assert_eq!(f.offer(u("https://example.com/"), 0, &scope(), &stats), Admission::Enqueued);
        assert_eq!(f.offer(u("https://api.example.com/"), 1, &scope(), &stats), Admission::Enqueued);
        assert_eq!(f.offer(u("https://www.example.com/"), 1, &scope(), &stats), Admission::LimitReached);
        assert_eq!(f.offer(u("https://deep.api.example.com/"), 1, &scope(), &stats), Admission::LimitReached);
        assert_eq!(f.take_level().len(), 2);
        assert_eq!(stats.snapshot().limit_reached, 2);
    }
}
