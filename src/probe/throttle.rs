use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::time::{sleep_until, Instant};

use crate::config::{NetbearConfig, PacingMode};

/// Adaptive slowdown parameters applied on 429/503.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub factor: f64,
    /// Consecutive throttle signals needed before the interval is multiplied.
    pub threshold: u32,
    /// Quiet period after which the interval returns to baseline.
    pub cooldown: Duration,
    pub max_multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            factor: 2.0,
            threshold: 3,
            cooldown: Duration::from_secs(60),
            max_multiplier: 16.0,
        }
    }
}

#[derive(Debug)]
struct BackoffState {
    multiplier: f64,
    strikes: u32,
    last_signal: Option<Instant>,
}

/// Minimum spacing between outbound probes.
///
/// Each lane holds the next free slot; `acquire` reserves a slot under a short
/// lock and then sleeps outside it, so waiters never spin. The backoff
/// multiplier is session-wide and applies to every lane.
pub struct RateLimiter {
    base: Duration,
    lane_scale: u32,
    lanes: Vec<Mutex<Instant>>,
    backoff: Mutex<BackoffState>,
    policy: BackoffPolicy,
    jitter: Duration,
}

impl RateLimiter {
    /// A single limiter shared by all callers.
    pub fn shared(base: Duration, policy: BackoffPolicy) -> Self {
        Self::with_lanes(base, 1, 1, policy)
    }

    pub fn per_worker(base: Duration, workers: usize, mode: PacingMode, policy: BackoffPolicy) -> Self {
        let workers = workers.max(1);
        match mode {
            PacingMode::Shared => Self::shared(base, policy),
            PacingMode::PerWorkerAggregate => Self::with_lanes(base, workers, workers as u32, policy),
            PacingMode::PerWorkerIndependent => Self::with_lanes(base, workers, 1, policy),
        }
    }

    pub fn from_config(cfg: &NetbearConfig) -> Self {
        let policy = BackoffPolicy {
            factor: cfg.backoff_factor,
            threshold: cfg.backoff_threshold.max(1),
            cooldown: Duration::from_secs(cfg.backoff_cooldown_secs),
            max_multiplier: cfg.max_backoff_multiplier,
        };
        Self::per_worker(cfg.rate_interval(), cfg.max_workers, cfg.pacing, policy)
            .with_jitter(Duration::from_millis(cfg.jitter_ms))
    }

    fn with_lanes(base: Duration, lanes: usize, lane_scale: u32, policy: BackoffPolicy) -> Self {
        let now = Instant::now();
        Self {
            base,
            lane_scale,
            lanes: (0..lanes).map(|_| Mutex::new(now)).collect(),
            backoff: Mutex::new(BackoffState { multiplier: 1.0, strikes: 0, last_signal: None }),
            policy,
            jitter: Duration::ZERO,
        }
    }

    /// Adds up to `jitter` of random delay after each granted slot.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn base_interval(&self) -> Duration {
        self.base
    }

    pub fn lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Session-wide interval including any active backoff.
    pub fn current_interval(&self) -> Duration {
        let mut state = self.backoff.lock();
        if state.multiplier > 1.0 {
            if let Some(last) = state.last_signal {
                if last.elapsed() >= self.policy.cooldown {
                    state.multiplier = 1.0;
                    state.strikes = 0;
                    tracing::info!(interval_ms = self.base.as_millis() as u64, "rate limiter back to baseline");
                }
            }
        }
        if state.multiplier <= 1.0 {
            self.base
        } else {
            self.base.mul_f64(state.multiplier)
        }
    }

    /// Waits until this lane's next slot. `worker` picks the lane; shared
    /// limiters ignore it.
    pub async fn acquire(&self, worker: usize) {
        let interval = self.current_interval() * self.lane_scale;
        let slot = {
            let mut next = self.lanes[worker % self.lanes.len()].lock();
            let slot = (*next).max(Instant::now());
            *next = slot + interval;
            slot
        };
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64))
        };
        sleep_until(slot + jitter).await;
    }

    /// Called on a 429/503. After `threshold` consecutive signals the interval is multiplied.
    pub fn record_throttle(&self) {
        let mut state = self.backoff.lock();
        state.strikes += 1;
        state.last_signal = Some(Instant::now());
        if state.strikes >= self.policy.threshold {
            state.strikes = 0;
            let next = (state.multiplier * self.policy.factor).min(self.policy.max_multiplier);
            if next > state.multiplier {
                state.multiplier = next;
                tracing::warn!(
                    multiplier = state.multiplier,
                    interval_ms = self.base.mul_f64(state.multiplier).as_millis() as u64,
                    "target is throttling, slowing down"
                );
            }
        }
    }

    /// Any non-throttled response breaks a run of consecutive throttle signals.
    pub fn record_success(&self) {
        self.backoff.lock().strikes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn sequential_acquisitions_are_spaced() {
        let limiter = RateLimiter::shared(Duration::from_millis(500), BackoffPolicy::default());
        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire(0).await;
        }
        assert!(start.elapsed() >= Duration::from_millis(4500), "{:?}", start.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_schedule() {
        let limiter = std::sync::Arc::new(RateLimiter::shared(Duration::from_millis(100), BackoffPolicy::default()));
        let start = Instant::now();
        let handles: Vec<_> = (0..5)
            .map(|w| {
                let l = limiter.clone();
                tokio::spawn(async move { l.acquire(w).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn independent_lanes_do_not_wait_on_each_other() {
        let limiter = RateLimiter::per_worker(
            Duration::from_millis(500),
            4,
            PacingMode::PerWorkerIndependent,
            BackoffPolicy::default(),
        );
        let start = Instant::now();
        for w in 0..4 {
            limiter.acquire(w).await;
        }
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn aggregate_lanes_scale_interval() {
        let limiter =
            RateLimiter::per_worker(Duration::from_millis(100), 4, PacingMode::PerWorkerAggregate, BackoffPolicy::default());
        let start = Instant::now();
        limiter.acquire(1).await;
        limiter.acquire(1).await;
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn three_throttles_double_then_decay() {
        let base = Duration::from_millis(500);
        let limiter = RateLimiter::shared(base, BackoffPolicy::default());

        limiter.record_throttle();
        limiter.record_throttle();
        assert_eq!(limiter.current_interval(), base);
        limiter.record_throttle();
        assert_eq!(limiter.current_interval(), base * 2);

        advance(Duration::from_secs(59)).await;
        assert_eq!(limiter.current_interval(), base * 2);
        advance(Duration::from_secs(1)).await;
        assert_eq!(limiter.current_interval(), base);
    }

    #[tokio::test(start_paused = true)]
    async fn success_breaks_the_streak() {
        let base = Duration::from_millis(500);
        let limiter = RateLimiter::shared(base, BackoffPolicy::default());
        limiter.record_throttle();
        limiter.record_throttle();
        limiter.record_success();
        limiter.record_throttle();
        assert_eq!(limiter.current_interval(), base);
    }

    #[tokio::test(start_paused = true)]
    async fn multiplier_is_capped() {
        let base = Duration::from_millis(500);
        let policy = BackoffPolicy { max_multiplier: 4.0, threshold: 1, ..Default::default() };
        let limiter = RateLimiter::shared(base, policy);
        for _ in 0..10 {
            limiter.record_throttle();
        }
        assert_eq!(limiter.current_interval(), base * 4);
    }
}
