use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, timeout, Instant};
use tracing::warn;

use crate::config::EngineConfig;
use crate::records::PlaceComponents;

/// The external reverse-geocoding boundary: coordinates in, place names out.
#[async_trait]
pub trait ReverseGeocode: Send + Sync {
    async fn reverse(&self, lat: f64, lon: f64) -> Result<PlaceComponents, ResolveError>;
}

#[derive(Debug, Error)]
pub enum ResolveError {
    /// Timeout or transient network failure; worth retrying.
    #[error("transient resolver failure: {0}")]
    Transient(String),
    /// Malformed or rejected response; retrying cannot help.
    #[error("permanent resolver failure: {0}")]
    Permanent(String),
}

/// Delay strategy between retry attempts. `attempt` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    Linear(Duration),
    Exponential { base: Duration, cap: Duration },
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Linear(step) => step * attempt,
            Backoff::Exponential { base, cap } => {
                let exponent = (attempt - 1).min(6);
                (base * (1u32 << exponent)).min(cap)
            }
        }
    }
}

/// Decides which resolver failures are worth another attempt. The original
/// behavior retries everything; `TransientOnly` fails fast on permanent
/// errors instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClassifier {
    RetryAll,
    TransientOnly,
}

impl RetryClassifier {
    pub fn should_retry(&self, err: &ResolveError) -> bool {
        match self {
            RetryClassifier::RetryAll => true,
            RetryClassifier::TransientOnly => matches!(err, ResolveError::Transient(_)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub classifier: RetryClassifier,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff,
            classifier: config.retry_classifier,
            jitter: config.retry_jitter,
        }
    }
}

/// Outcome of one resolution, including everything that went wrong along
/// the way. Statistics ride the return value; the wrapper mutates no
/// shared counters.
#[derive(Debug, Clone, Default)]
pub struct ResolveReport {
    pub place: Option<PlaceComponents>,
    pub attempts: u32,
    pub errors: Vec<String>,
}

enum AttemptError {
    Resolver(ResolveError),
    /// The overall run deadline passed; stop retrying this coordinate.
    DeadlineExceeded,
}

/// Wraps a [`ReverseGeocode`] implementation with rate limiting, bounded
/// retries and an optional deadline. Exhausting retries is not fatal: the
/// report comes back with `place: None` and the failure messages, and the
/// affected image is simply excluded from aggregation.
pub struct RetryingResolver {
    inner: Arc<dyn ReverseGeocode>,
    policy: RetryPolicy,
    rate_limiter: RateLimiter,
    jitter_rng: Mutex<StdRng>,
}

impl RetryingResolver {
    pub fn new(inner: Arc<dyn ReverseGeocode>, policy: RetryPolicy, qps: u32) -> Self {
        Self {
            inner,
            policy,
            rate_limiter: RateLimiter::new(qps.max(1)),
            jitter_rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    #[cfg(test)]
    pub fn with_rng(inner: Arc<dyn ReverseGeocode>, policy: RetryPolicy, qps: u32, rng: StdRng) -> Self {
        Self {
            inner,
            policy,
            rate_limiter: RateLimiter::new(qps.max(1)),
            jitter_rng: Mutex::new(rng),
        }
    }

    /// Resolves `(lat, lon)`, retrying per the policy. `deadline`, when
    /// set, bounds every attempt; once it passes, the failure is recorded
    /// and no further attempts are made for this coordinate.
    pub async fn resolve(&self, lat: f64, lon: f64, deadline: Option<Instant>) -> ResolveReport {
        let mut report = ResolveReport::default();

        loop {
            report.attempts += 1;
            self.rate_limiter.wait().await;

            match self.attempt(lat, lon, deadline).await {
                Ok(place) => {
                    report.place = Some(place);
                    return report;
                }
                Err(AttemptError::DeadlineExceeded) => {
                    warn!(lat, lon, attempt = report.attempts, "run deadline exceeded");
                    report.errors.push(format!(
                        "({lat:.4}, {lon:.4}) attempt {}: run deadline exceeded",
                        report.attempts
                    ));
                    report.errors.push(format!(
                        "({lat:.4}, {lon:.4}): giving up after {} attempt(s)",
                        report.attempts
                    ));
                    return report;
                }
                Err(AttemptError::Resolver(err)) => {
                    warn!(
                        lat,
                        lon,
                        attempt = report.attempts,
                        %err,
                        "reverse geocode attempt failed"
                    );
                    report
                        .errors
                        .push(format!("({lat:.4}, {lon:.4}) attempt {}: {err}", report.attempts));

                    if report.attempts >= self.policy.max_attempts
                        || !self.policy.classifier.should_retry(&err)
                    {
                        report.errors.push(format!(
                            "({lat:.4}, {lon:.4}): giving up after {} attempt(s)",
                            report.attempts
                        ));
                        return report;
                    }
                }
            }

            sleep(self.next_delay(report.attempts)).await;
        }
    }

    async fn attempt(
        &self,
        lat: f64,
        lon: f64,
        deadline: Option<Instant>,
    ) -> Result<PlaceComponents, AttemptError> {
        let call = self.inner.reverse(lat, lon);
        match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(AttemptError::DeadlineExceeded);
                }
                timeout(remaining, call)
                    .await
                    .map_err(|_| AttemptError::DeadlineExceeded)?
                    .map_err(AttemptError::Resolver)
            }
            None => call.await.map_err(AttemptError::Resolver),
        }
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let mut delay = self.policy.backoff.delay(attempt);
        let jitter_ms = self.policy.jitter.as_millis() as u64;
        if jitter_ms > 0 {
            let mut rng = self.jitter_rng.lock();
            delay += Duration::from_millis(rng.gen_range(0..jitter_ms));
        }
        delay
    }
}

/// Minimum-interval rate limiter for resolver calls (Nominatim's usage
/// policy is one request per second).
pub struct RateLimiter {
    min_interval_ms: AtomicU64,
    last_tick: AsyncMutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(qps: u32) -> Self {
        Self {
            min_interval_ms: AtomicU64::new(Self::interval_ms(qps)),
            last_tick: AsyncMutex::new(None),
        }
    }

    pub fn set_qps(&self, qps: u32) {
        self.min_interval_ms
            .store(Self::interval_ms(qps), Ordering::SeqCst);
    }

    fn interval_ms(qps: u32) -> u64 {
        let safe_qps = qps.max(1);
        (1000_f64 / safe_qps as f64).ceil() as u64
    }

    async fn wait(&self) {
        let interval = Duration::from_millis(self.min_interval_ms.load(Ordering::SeqCst));
        let mut guard = self.last_tick.lock().await;
        if let Some(prev) = *guard {
            let elapsed = prev.elapsed();
            if elapsed < interval {
                sleep(interval - elapsed).await;
            }
        }
        *guard = Some(Instant::now());
    }
}
