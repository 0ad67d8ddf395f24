//! Fixed-width worker pool over one bounded job queue.
//!
//! Every job sent into the queue produces exactly one [`Outcome`], which is
//! what lets [`WorkerPool::run_batch`] know when a batch is fully drained.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::candidate::Candidate;
use super::session::Session;
use crate::errors::ProbeError;
use crate::output::ObservationRecord;
use crate::probe::{Observation, ProbeContext, ProbeRegistry, RateLimiter};
use crate::scope::ScopeMatcher;

#[derive(Debug)]
pub enum Outcome {
    Observed(Observation),
    Duplicate(Candidate),
    OutOfScope(Candidate),
    Failed(Candidate, ProbeError),
    /// Skipped or dropped mid-flight because the session was cancelled.
    Cancelled(Candidate),
}

/// Everything a worker needs, shared read-only across the pool.
pub struct Dispatch {
    pub probes: ProbeRegistry,
    pub ctx: ProbeContext,
    pub limiter: Arc<RateLimiter>,
    pub scope: Arc<ScopeMatcher>,
    pub session: Arc<Session>,
    pub cancel: CancellationToken,
    pub grace: Duration,
    pub max_attempts: u32,
    /// Optional stream of every observation, e.g. to a JSONL writer.
    pub sink: Option<mpsc::Sender<ObservationRecord>>,
}

impl Dispatch {
    async fn handle(&self, worker: usize, candidate: Candidate) -> Outcome {
        if self.cancel.is_cancelled() {
            return Outcome::Cancelled(candidate);
        }
        match candidate.target_url() {
            Some(url) if self.scope.allowed_url(&url) => {}
            Some(_) => return Outcome::OutOfScope(candidate),
            None => {
                let err = ProbeError::InvalidCandidate(format!("cannot render {}", candidate.label()));
                return Outcome::Failed(candidate, err);
            }
        }
        if !self.session.visited.mark(candidate.visit_key()) {
            return Outcome::Duplicate(candidate);
        }
        self.session.stats.candidates_tried.fetch_add(1, Ordering::Relaxed);

        let probe = self.probes.for_candidate(&candidate);
        let mut attempt = 1;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Outcome::Cancelled(candidate),
                _ = self.limiter.acquire(worker) => {}
            }

            // In-flight probes get `grace` after cancellation, then are dropped.
            let result = {
                let fut = probe.probe(&candidate, &self.ctx);
                let deadline = async {
                    self.cancel.cancelled().await;
                    tokio::time::sleep(self.grace).await;
                };
                tokio::select! {
                    r = fut => Some(r),
                    _ = deadline => None,
                }
            };
            let Some(result) = result else {
                tracing::debug!(candidate = %candidate.label(), "probe abandoned after cancel grace");
                return Outcome::Cancelled(candidate);
            };

            match result {
                Ok(obs) => return Outcome::Observed(obs),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.limiter.base_interval() * 2u32.pow(attempt - 1);
                    self.session.stats.retries.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(candidate = %candidate.label(), attempt, error = %e, "retrying");
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Outcome::Cancelled(candidate),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Outcome::Failed(candidate, e),
            }
        }
    }
}

pub struct WorkerPool {
    jobs: mpsc::Sender<Candidate>,
    outcomes: mpsc::Receiver<Outcome>,
    workers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn spawn(dispatch: Arc<Dispatch>, width: usize, capacity: usize) -> Self {
        let (job_tx, job_rx) = mpsc::channel::<Candidate>(capacity.max(1));
        let (out_tx, out_rx) = mpsc::channel::<Outcome>(capacity.max(1));
        let job_rx = Arc::new(Mutex::new(job_rx));
        let cancel = dispatch.cancel.clone();

        let workers = (0..width.max(1))
            .map(|id| {
                let jobs = job_rx.clone();
                let out = out_tx.clone();
                let dispatch = dispatch.clone();
                tokio::spawn(async move {
                    loop {
                        let next = jobs.lock().await.recv().await;
                        let Some(candidate) = next else { break };
                        let outcome = dispatch.handle(id, candidate).await;
                        if let (Outcome::Observed(obs), Some(sink)) = (&outcome, &dispatch.sink) {
                            let _ = sink.send(ObservationRecord::from(obs)).await;
                        }
                        if out.send(outcome).await.is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();

        Self { jobs: job_tx, outcomes: out_rx, workers, cancel }
    }

    /// Feeds `batch` through the pool and hands each outcome to `on_outcome`
    /// until the batch is drained. The queue is bounded, so the producer side
    /// waits whenever workers fall behind. Returns the number of outcomes handled.
    pub async fn run_batch(&mut self, batch: Vec<Candidate>, mut on_outcome: impl FnMut(Outcome)) -> usize {
        let jobs = self.jobs.clone();
        let cancel = self.cancel.clone();
        let mut producer = tokio::spawn(async move {
            let mut sent = 0usize;
            for candidate in batch {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    res = jobs.send(candidate) => {
                        if res.is_err() {
                            break;
                        }
                        sent += 1;
                    }
                }
            }
            sent
        });

        let mut sent: Option<usize> = None;
        let mut received = 0usize;
        loop {
            if sent.is_some_and(|n| received >= n) {
                break;
            }
            tokio::select! {
                res = &mut producer, if sent.is_none() => {
                    sent = Some(res.unwrap_or_else(|e| {
                        tracing::error!(error = %e, "producer task failed");
                        0
                    }));
                }
                Some(outcome) = self.outcomes.recv() => {
                    received += 1;
                    on_outcome(outcome);
                }
                else => break,
            }
        }
        received
    }

    /// Closes the queue and waits for every worker to exit.
    pub async fn shutdown(self) {
        drop(self.jobs);
        drop(self.outcomes);
        for w in self.workers {
            let _ = w.await;
        }
    }
}
