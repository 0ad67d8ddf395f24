//! Bounded concurrent probe engine: crawl and enumeration sessions over a
//! shared worker pool, with scope, pacing and finding aggregation.

pub mod candidate;
pub mod frontier;
pub mod pool;
pub mod sampler;
pub mod session;
pub mod visited;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use reqwest::Method;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::catalog::{ProbeCatalog, TargetDefinition, TestKind};
use crate::config::NetbearConfig;
use crate::errors::{ConfigError, EngineError};
use crate::output::{ObservationRecord, SessionReport};
use crate::probe::http_probe::ScopedHttp;
use crate::probe::{HttpRequest, Observation, ProbeContext, ProbeKind, ProbeRegistry, RateLimiter};
use crate::scope::ScopeMatcher;

use candidate::Candidate;
use frontier::Frontier;
use pool::{Dispatch, Outcome, WorkerPool};
use session::{Session, SessionIds, StatsSnapshot};

/// Report plus the final counters of one session.
#[derive(Debug, Clone)]
pub struct SessionOutput {
    pub report: SessionReport,
    pub stats: StatsSnapshot,
}

pub struct Engine {
    config: NetbearConfig,
    scope: Arc<ScopeMatcher>,
    ctx: ProbeContext,
    probes: ProbeRegistry,
    limiter: Arc<RateLimiter>,
    cancel: CancellationToken,
    sink: Option<mpsc::Sender<ObservationRecord>>,
    session_ids: SessionIds,
}

impl Engine {
    /// `ctx.http` is wrapped so that every request, redirect hops included,
    /// stays inside `scope`.
    pub fn new(config: NetbearConfig, scope: ScopeMatcher, mut ctx: ProbeContext) -> Result<Self, EngineError> {
        config.validate()?;
        if scope.is_empty() {
            tracing::warn!("scope has no rules; every candidate will be rejected");
        }
        let scope = Arc::new(scope);
        ctx.http = Arc::new(ScopedHttp::new(ctx.http, scope.clone()));
        let limiter = Arc::new(RateLimiter::from_config(&config));
        Ok(Self {
            config,
            scope,
            ctx,
            probes: ProbeRegistry::builtin(),
            limiter,
            cancel: CancellationToken::new(),
            sink: None,
            session_ids: SessionIds::default(),
        })
    }

    pub fn with_probes(mut self, probes: ProbeRegistry) -> Self {
        self.probes = probes;
        self
    }

    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Arc::new(limiter);
        self
    }

    /// Cancelling `token` winds down whatever session is running.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_observation_sink(mut self, sink: mpsc::Sender<ObservationRecord>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &NetbearConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn new_session(&self) -> Arc<Session> {
        Arc::new(Session::new(&self.session_ids, self.config.max_evidence))
    }

    pub async fn run_crawl(&self, targets: &[Url]) -> Result<SessionOutput, EngineError> {
        self.crawl(self.new_session(), targets).await
    }

    pub async fn run_enumeration(
        &self,
        tests: &[TestKind],
        target: &TargetDefinition,
    ) -> Result<SessionOutput, EngineError> {
        self.enumerate(self.new_session(), tests, target).await
    }

    /// Level-synchronous BFS from `targets`. Depth *d+1* is dispatched only
    /// after every depth-*d* page has produced its outcome.
    pub async fn crawl(&self, session: Arc<Session>, targets: &[Url]) -> Result<SessionOutput, EngineError> {
        let cancel = self.cancel.child_token();
        let mut frontier = Frontier::new(self.config.max_depth, self.config.max_pages_per_domain);
        for target in targets {
            frontier.offer(target.clone(), 0, &self.scope, &session.stats);
        }

        let mut pool = self.spawn_pool(&session, &cancel);
        let mut recorder = Recorder::new(&session, &self.limiter, &self.scope, &cancel);
        let mut level = frontier.take_level();
        let mut depth = 0;
        while !level.is_empty() && !cancel.is_cancelled() {
            tracing::info!(session = %session.id, depth, pages = level.len(), "crawling level");
            pool.run_batch(level, |outcome| {
                let Some(obs) = recorder.record(outcome) else { return };
                if let Candidate::Page(page) = &obs.candidate {
                    for link in &obs.extracted.links {
                        frontier.offer(link.clone(), page.depth + 1, &self.scope, &session.stats);
                    }
                }
            })
            .await;
            level = frontier.take_level();
            depth += 1;
        }
        pool.shutdown().await;

        let fatal = recorder.fatal.take();
        self.finish(&session, "crawl", targets.len(), fatal)
    }

    /// Samples candidates for `tests` from `target` and dispatches them all.
    /// Public-link tokens confirmed along the way feed a second phase of
    /// per-token checks. The upload collection exists only for the session.
    pub async fn enumerate(
        &self,
        session: Arc<Session>,
        tests: &[TestKind],
        target: &TargetDefinition,
    ) -> Result<SessionOutput, EngineError> {
        let mut tests = tests.to_vec();
        tests.sort();
        tests.dedup();
        if tests.is_empty() {
            return Err(ConfigError::Invalid("no test kinds selected".into()).into());
        }

        let cancel = self.cancel.child_token();
        self.preflight(target, &cancel).await?;

        let mut rng = sampler::session_rng(self.config.seed);
        let candidates = ProbeCatalog::new(target, &self.config).candidates(&tests, &mut rng);
        tracing::info!(
            session = %session.id,
            target = %target.base_url,
            tests = ?tests,
            candidates = candidates.len(),
            "starting enumeration"
        );

        let upload_dir = target.upload_base.as_ref().filter(|_| tests.contains(&TestKind::Upload));
        if let Some(dir) = upload_dir {
            self.create_collection(dir, &cancel).await?;
        }

        let mut pool = self.spawn_pool(&session, &cancel);
        let mut recorder = Recorder::new(&session, &self.limiter, &self.scope, &cancel);
        let mut tokens = Vec::new();
        pool.run_batch(candidates, |outcome| {
            if let Some(obs) = recorder.record(outcome) {
                tokens.extend(obs.extracted.tokens);
            }
        })
        .await;

        if tests.contains(&TestKind::PublicLinks) && recorder.fatal.is_none() && !cancel.is_cancelled() {
            tokens.sort();
            tokens.dedup();
            let followups = ProbeCatalog::new(target, &self.config).token_followups(&tokens);
            if !followups.is_empty() {
                tracing::info!(session = %session.id, tokens = tokens.len(), candidates = followups.len(), "share follow-ups");
                pool.run_batch(followups, |outcome| {
                    recorder.record(outcome);
                })
                .await;
            }
        }
        pool.shutdown().await;

        if let Some(dir) = upload_dir {
            self.remove_collection(dir).await;
        }

        let fatal = recorder.fatal.take();
        self.finish(&session, &target.name, tests.len(), fatal)
    }

    /// One credentialed request to the target's status path. A 401/403 here
    /// means the credentials are bad and nothing else should be sent.
    async fn preflight(&self, target: &TargetDefinition, cancel: &CancellationToken) -> Result<(), EngineError> {
        let Some(url) = target.status_url() else { return Ok(()) };
        if !self.scope.allowed_url(&url) {
            tracing::warn!(url = %url, "status endpoint out of scope, skipping credential check");
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            _ = self.limiter.acquire(0) => {}
        }

        let req = HttpRequest::get(url.clone()).headers(self.ctx.credentials.headers());
        match self.ctx.http.request(req).await {
            Ok(resp) if matches!(resp.status, 401 | 403) => {
                let reason = format!("credentials rejected by {url} (HTTP {})", resp.status);
                tracing::error!(%reason, "session-fatal");
                Err(EngineError::SessionFatal { reason })
            }
            Ok(resp) => {
                tracing::info!(url = %url, status = resp.status, "credential check passed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "credential check failed, continuing");
                Ok(())
            }
        }
    }

    /// WebDAV `MKCOL` for the upload collection. Already existing (405) is fine.
    async fn create_collection(&self, dir: &Url, cancel: &CancellationToken) -> Result<(), EngineError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            _ = self.limiter.acquire(0) => {}
        }
        let mkcol = match Method::from_bytes(b"MKCOL") {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "cannot build MKCOL request");
                return Ok(());
            }
        };
        let req = HttpRequest::new(mkcol, dir.clone()).headers(self.ctx.credentials.headers());
        match self.ctx.http.request(req).await {
            Ok(resp) if matches!(resp.status, 201 | 405) => {
                tracing::info!(url = %dir, status = resp.status, "upload collection ready");
            }
            Ok(resp) => tracing::warn!(url = %dir, status = resp.status, "could not create upload collection"),
            Err(e) => tracing::warn!(url = %dir, error = %e, "could not create upload collection"),
        }
        Ok(())
    }

    /// Removes the upload collection, also after a cancelled session.
    async fn remove_collection(&self, dir: &Url) {
        self.limiter.acquire(0).await;
        let req = HttpRequest::new(Method::DELETE, dir.clone()).headers(self.ctx.credentials.headers());
        match self.ctx.http.request(req).await {
            Ok(resp) if matches!(resp.status, 200 | 204 | 404) => tracing::debug!(url = %dir, "upload collection removed"),
            Ok(resp) => tracing::warn!(url = %dir, status = resp.status, "upload collection may not have been removed"),
            Err(e) => tracing::warn!(url = %dir, error = %e, "upload collection may not have been removed"),
        }
    }

    fn spawn_pool(&self, session: &Arc<Session>, cancel: &CancellationToken) -> WorkerPool {
        let dispatch = Dispatch {
            probes: self.probes.clone(),
            ctx: self.ctx.clone(),
            limiter: self.limiter.clone(),
            scope: self.scope.clone(),
            session: session.clone(),
            cancel: cancel.clone(),
            grace: self.config.cancel_grace(),
            max_attempts: self.config.max_attempts,
            sink: self.sink.clone(),
        };
        WorkerPool::spawn(Arc::new(dispatch), self.config.max_workers, self.config.queue_capacity)
    }

    fn finish(
        &self,
        session: &Session,
        mode: &str,
        total_tests: usize,
        fatal: Option<String>,
    ) -> Result<SessionOutput, EngineError> {
        if let Some(reason) = fatal {
            return Err(EngineError::SessionFatal { reason });
        }
        let timestamp = session.started.format("%Y-%m-%dT%H:%M:%S%.6f").to_string();
        let report = SessionReport::new(&session.id, mode, timestamp, session.findings.snapshot(), total_tests);
        let stats = session.stats.snapshot();
        tracing::info!(
            session = %session.id,
            mode,
            findings = report.summary.findings_count,
            tried = stats.candidates_tried,
            cancelled = stats.cancelled,
            "session finished"
        );
        Ok(SessionOutput { report, stats })
    }
}

/// Single consumer of worker outcomes: stats, backoff feedback, findings and
/// the session-fatal check all happen here.
struct Recorder<'a> {
    session: &'a Session,
    limiter: &'a RateLimiter,
    scope: &'a ScopeMatcher,
    cancel: &'a CancellationToken,
    fatal: Option<String>,
}

impl<'a> Recorder<'a> {
    fn new(
        session: &'a Session,
        limiter: &'a RateLimiter,
        scope: &'a ScopeMatcher,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self { session, limiter, scope, cancel, fatal: None }
    }

    /// Returns the observation when it is usable for discovery.
    fn record(&mut self, outcome: Outcome) -> Option<Observation> {
        let stats = &self.session.stats;
        match outcome {
            Outcome::Observed(obs) => {
                stats.observations.fetch_add(1, Ordering::Relaxed);
                if ProbeKind::of(&obs.candidate) == ProbeKind::Token {
                    stats.record_token_latency(obs.latency);
                }
                if obs.is_throttled() {
                    stats.throttled.fetch_add(1, Ordering::Relaxed);
                    self.limiter.record_throttle();
                    return None;
                }
                self.limiter.record_success();

                if obs.status_code == 401
                    && obs.candidate.is_authenticated()
                    && stats.succeeded.load(Ordering::Relaxed) == 0
                {
                    self.abort(format!("credentials rejected: HTTP 401 from {}", obs.candidate.label()));
                    return None;
                }
                // A browser can navigate anywhere; its content only counts inside scope.
                if let Some(landed) = obs.extracted.landed_on.as_ref().filter(|u| !self.scope.allowed_url(u)) {
                    stats.out_of_scope.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(candidate = %obs.candidate.label(), landed = %landed, "page left scope, content discarded");
                    return None;
                }
                stats.succeeded.fetch_add(1, Ordering::Relaxed);
                if matches!(obs.candidate, Candidate::Page(_)) {
                    stats.pages_crawled.fetch_add(1, Ordering::Relaxed);
                }
                self.session.findings.submit_all(&obs.signals);
                Some(obs)
            }
            Outcome::Duplicate(_) => {
                stats.duplicates.fetch_add(1, Ordering::Relaxed);
                None
            }
            Outcome::OutOfScope(c) => {
                stats.out_of_scope.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(candidate = %c.label(), "out of scope");
                None
            }
            Outcome::Failed(c, e) => {
                stats.record_failure(e.failure_class());
                tracing::warn!(candidate = %c.label(), error = %e, "probe failed");
                None
            }
            Outcome::Cancelled(_) => {
                stats.cancelled.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn abort(&mut self, reason: String) {
        if self.fatal.is_none() {
            tracing::error!(%reason, "session-fatal, halting dispatch");
            self.fatal = Some(reason);
        }
        self.cancel.cancel();
    }
}
