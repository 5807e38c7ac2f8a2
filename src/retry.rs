//! Bounded polling with exponential backoff and jitter.
//!
//! Remote resources report "provisioning" states that settle asynchronously.
//! [`poll_with_backoff`] turns that into a synchronous decision: read until the
//! check yields a value or the step budget runs out.
//!
//! # Example
//!
//! ```ignore
//! use capv::retry::{poll_with_backoff, BackoffPolicy, PollOutcome};
//!
//! let outcome = poll_with_backoff(
//!     &BackoffPolicy::default(),
//!     "load balancer lb-x",
//!     || async {
//!         let r = cloud.retrieve(kind, &scope, id).await?;
//!         Ok(r.is_ready().then_some(r))
//!     },
//! ).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// Schedule for polling a resource until it reaches a ready state.
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Maximum number of reads
    pub steps: u32,
    /// Delay after the first unsuccessful read
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each read
    pub factor: f64,
    /// Fraction of the delay added at random (0.1 = up to +10%)
    pub jitter: f64,
    /// Upper bound for a single delay, before jitter
    pub max_delay: Option<Duration>,
    /// Upper bound for the whole poll, enforced by the caller
    pub deadline: Option<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            steps: 30,
            initial_delay: Duration::from_secs(1),
            factor: 1.25,
            jitter: 0.1,
            max_delay: None,
            deadline: None,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy with the default schedule but a different step budget
    pub fn with_steps(steps: u32) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }

    /// Base delay (no jitter) to wait after the given zero-based attempt
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.factor.powi(exp);
        let secs = match self.max_delay {
            Some(max) => secs.min(max.as_secs_f64()),
            None => secs,
        };
        Duration::from_secs_f64(secs)
    }

    /// Apply random jitter to a base delay: `base + base * jitter * [0, 1)`
    pub fn jittered(&self, base: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..1.0) * self.jitter;
        Duration::from_secs_f64(base.as_secs_f64() * (1.0 + extra))
    }
}

/// Result of a bounded poll
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The check passed on the given read
    Ready {
        /// Number of reads performed
        attempts: u32,
        /// What the passing read observed
        value: T,
    },
    /// Every read came back not-ready
    Exhausted {
        /// Number of reads performed
        attempts: u32,
    },
}

/// Run `check` until it returns `Ok(Some(_))` or `policy.steps` reads are spent.
///
/// There is no sleep after the final read. An `Err` from `check` ends the
/// poll immediately and is returned as-is; polling is for state-transition
/// latency, not for retrying broken transport.
pub async fn poll_with_backoff<F, Fut, T, E>(
    policy: &BackoffPolicy,
    operation_name: &str,
    mut check: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    for attempt in 1..=policy.steps {
        if let Some(value) = check().await? {
            debug!(operation = %operation_name, attempt, "poll condition met");
            return Ok(PollOutcome::Ready {
                attempts: attempt,
                value,
            });
        }

        if attempt == policy.steps {
            break;
        }

        let delay = policy.jittered(policy.base_delay(attempt - 1));
        debug!(
            operation = %operation_name,
            attempt,
            delay_ms = delay.as_millis(),
            "not ready, polling again"
        );
        tokio::time::sleep(delay).await;
    }

    warn!(
        operation = %operation_name,
        attempts = policy.steps,
        "poll budget exhausted"
    );
    Ok(PollOutcome::Exhausted {
        attempts: policy.steps,
    })
}
