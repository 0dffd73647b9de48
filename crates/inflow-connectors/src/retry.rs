//! Shared HTTP retry, backoff, and rate-limit plumbing for upstream clients.
//!
//! Every client funnels its requests through [`execute_with_retry`]:
//! a token bucket enforces the per-client rate ceiling, 429/5xx/network
//! failures retry with jittered exponential backoff honoring `Retry-After`,
//! and the final error carries the taxonomy the dispatcher routes on
//! (transient vs permanent vs gone).

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::header::RETRY_AFTER;
use reqwest::{RequestBuilder, Response, StatusCode};
use tokio::time::sleep;
use tracing::warn;

use inflow_core::{defaults, Error, Result};

/// Direct (non-keyed) token bucket shared by one client's requests.
pub type ClientRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Build the per-client token bucket.
pub fn rate_limiter(requests_per_sec: u32) -> ClientRateLimiter {
    let quota = Quota::per_second(
        NonZeroU32::new(requests_per_sec.max(1)).unwrap_or(NonZeroU32::MIN),
    );
    RateLimiter::direct(quota)
}

/// Retry policy for transient upstream failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::CLIENT_MAX_RETRIES,
            base: Duration::from_secs(defaults::BACKOFF_BASE_SECS),
            cap: Duration::from_secs(defaults::BACKOFF_CAP_SECS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): exponential from the
    /// base, capped, with `jitter` in `[0, 1)` scaling the result into the
    /// upper half of the window so synchronized clients spread out.
    pub fn backoff_delay(&self, attempt: u32, jitter: f64) -> Duration {
        let exp = self.base.as_secs_f64() * 2f64.powi(attempt.min(16) as i32);
        let capped = exp.min(self.cap.as_secs_f64());
        Duration::from_secs_f64(capped * (0.5 + jitter.clamp(0.0, 1.0) / 2.0))
    }
}

/// How a response status should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// 404: the entity no longer exists upstream.
    Gone,
    /// 429 or 5xx: retry with backoff.
    Transient,
    /// Any other 4xx: do not retry.
    Permanent,
}

/// Classify an HTTP status per the upstream error taxonomy.
pub fn classify_status(status: StatusCode) -> StatusClass {
    if status.is_success() {
        StatusClass::Success
    } else if status == StatusCode::NOT_FOUND {
        StatusClass::Gone
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        StatusClass::Transient
    } else {
        StatusClass::Permanent
    }
}

/// `Retry-After` in seconds, when the header carries a plain delay.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Send a request, retrying transient failures per `policy`.
///
/// `build` must produce a fresh `RequestBuilder` per attempt (reqwest
/// builders are consumed by `send`).
pub async fn execute_with_retry<F>(
    limiter: &ClientRateLimiter,
    policy: &RetryPolicy,
    label: &str,
    build: F,
) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt: u32 = 0;

    loop {
        limiter.until_ready().await;

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                match classify_status(status) {
                    StatusClass::Success => return Ok(response),
                    StatusClass::Gone => {
                        return Err(Error::Gone(format!("{label}: {status}")));
                    }
                    StatusClass::Transient => {
                        if attempt >= policy.max_retries {
                            return Err(Error::TransientUpstream(format!(
                                "{label}: {status} after {} retries",
                                policy.max_retries
                            )));
                        }
                        let delay = retry_after(&response)
                            .unwrap_or_else(|| policy.backoff_delay(attempt, rand::random()));
                        warn!(
                            op = "retry",
                            label,
                            status = status.as_u16(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Transient upstream status, backing off"
                        );
                        sleep(delay).await;
                        attempt += 1;
                    }
                    StatusClass::Permanent => {
                        let body = response.text().await.unwrap_or_default();
                        return Err(Error::PermanentUpstream(format!(
                            "{label}: {status}: {}",
                            body.chars().take(200).collect::<String>()
                        )));
                    }
                }
            }
            Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                if attempt >= policy.max_retries {
                    return Err(Error::TransientUpstream(format!(
                        "{label}: {e} after {} retries",
                        policy.max_retries
                    )));
                }
                let delay = policy.backoff_delay(attempt, rand::random());
                warn!(
                    op = "retry",
                    label,
                    error = %e,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Network error, backing off"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
