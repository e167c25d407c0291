pub mod community;
pub mod event_store;
pub mod llm;
pub mod orchestrator;
pub mod publisher;
pub mod registry;

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;

use crate::error::ClientError;

/// Remote health as reported by a client probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Down,
}

/// Retry policy for transient remote failures: jittered exponential
/// back-off starting at 2 s, capped at 10 s, 3 retries by default.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            base: Duration::from_secs(2),
            cap: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Fast policy for tests.
    #[cfg(test)]
    pub fn immediate(retries: u32) -> Self {
        Self {
            retries,
            base: Duration::from_millis(1),
            cap: Duration::from_millis(2),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        let secs = if attempt >= 2 {
            self.cap.as_secs_f64()
        } else {
            self.base.as_secs_f64() * 2f64.powi(attempt as i32)
        };
        let jitter = secs * 0.1 * rand::rng().random_range(0.0..1.0);
        Duration::from_secs_f64(secs + jitter)
    }
}

/// Run `f`, retrying on `TransientRemote` per the policy. Non-transient
/// errors (4xx and friends) are raised immediately; the remote calls here
/// are all read-only so a retry never violates at-most-once semantics.
pub(crate) async fn with_retry<T, F, Fut>(
    op: &str,
    policy: RetryPolicy,
    mut f: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < policy.retries => {
                let delay = policy.delay(attempt);
                attempt += 1;
                tracing::warn!(
                    "{op}: transient failure ({e}), retry {attempt}/{} in {delay:?}",
                    policy.retries
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Connection pools are bounded: 5 kept-alive per host, 10 s request cap.
pub(crate) fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(5)
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Classify an HTTP response status into the error taxonomy.
pub(crate) fn status_error(status: reqwest::StatusCode, what: &str) -> ClientError {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ClientError::TransientRemote(format!("{what} returned {status}"))
    } else if status == reqwest::StatusCode::NOT_FOUND {
        ClientError::NotFound(what.to_string())
    } else {
        ClientError::PermanentRemote(format!("{what} returned {status}"))
    }
}

/// Classify a transport-level reqwest failure. Connection and timeout
/// problems are worth retrying; everything else is not.
pub(crate) fn transport_error(e: reqwest::Error, what: &str) -> ClientError {
    if e.is_timeout() || e.is_connect() {
        ClientError::TransientRemote(format!("{what}: {e}"))
    } else if e.is_decode() {
        ClientError::Parse(format!("{what}: {e}"))
    } else {
        ClientError::TransientRemote(format!("{what}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_until_success() {
        let attempts = AtomicU32::new(0);
        let result = with_retry("test", RetryPolicy::immediate(3), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ClientError::TransientRemote("boom".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("test", RetryPolicy::immediate(3), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ClientError::PermanentRemote("bad request".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_policy_retries() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("test", RetryPolicy::immediate(3), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ClientError::TransientRemote("still down".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn delay_grows_then_hits_cap() {
        let policy = RetryPolicy::default();
        assert!(policy.delay(0) >= Duration::from_secs(2));
        assert!(policy.delay(1) >= Duration::from_secs(4));
        let third = policy.delay(2);
        assert!(third >= Duration::from_secs(10));
        assert!(third <= Duration::from_secs(11));
    }
}
