//! Bounded retry with backoff for external calls.
//!
//! Retries are infrastructure, not orchestrator business logic: every
//! Content/Knowledge/Publishing call site goes through [`call_with_retry`],
//! which applies a per-attempt timeout and exponential backoff. A call that
//! exhausts its attempts surfaces as a [`CallError`] and the run fails.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::Stage;

/// Retry policy for failed external calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    500
}
fn default_max_delay() -> u64 {
    10_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a specific attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// An external call that failed after exhausting its retries.
#[derive(Debug, Error)]
#[error("{service}.{operation} failed after {attempts} attempt(s): {source}")]
pub struct CallError {
    pub service: &'static str,
    pub operation: &'static str,
    pub attempts: u32,
    #[source]
    pub source: anyhow::Error,
}

/// Request key for one external call: `{run_id}:{stage}:{payload_hash16}`.
///
/// The key makes a retried call recognizable to an idempotent downstream
/// service; it also tags the retry logs.
pub fn request_key(run_id: &str, stage: Stage, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    let digest = hasher.finalize();
    format!("{}:{}:{}", run_id, stage.label(), hex::encode(&digest[..8]))
}

/// Run an external call with timeout, bounded retries, and backoff.
pub async fn call_with_retry<T, F, Fut>(
    service: &'static str,
    operation: &'static str,
    key: &str,
    policy: &RetryPolicy,
    call_timeout: Duration,
    call: F,
) -> Result<T, CallError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        debug!(service, operation, key, attempt, "external call");

        let result = match tokio::time::timeout(call_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "timed out after {}ms",
                call_timeout.as_millis()
            )),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(error) => {
                if policy.should_retry(attempt) {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        service,
                        operation,
                        key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "external call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }

                return Err(CallError {
                    service,
                    operation,
                    attempts: attempt,
                    source: error,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy {
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 5000,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(5000)); // Capped
    }

    #[test]
    fn test_request_key_format() {
        let key = request_key("run-1", Stage::Drafting, "payload");
        let parts: Vec<&str> = key.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "run-1");
        assert_eq!(parts[1], "drafting");
        assert_eq!(parts[2].len(), 16);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));

        // stable for identical payloads, distinct across stages
        assert_eq!(key, request_key("run-1", Stage::Drafting, "payload"));
        assert_ne!(key, request_key("run-1", Stage::Critique, "payload"));
    }

    #[tokio::test]
    async fn test_call_with_retry_recovers() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1,
            ..Default::default()
        };

        let result = call_with_retry(
            "content",
            "critique",
            "run-1:critique:abc",
            &policy,
            Duration::from_secs(1),
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("transient");
                }
                Ok(42u32)
            },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_call_with_retry_exhausts() {
        let policy = RetryPolicy {
            max_attempts: 2,
            initial_delay_ms: 1,
            ..Default::default()
        };

        let result: Result<u32, CallError> = call_with_retry(
            "knowledge",
            "upsert",
            "run-1:ingestion:abc",
            &policy,
            Duration::from_secs(1),
            || async { anyhow::bail!("down") },
        )
        .await;

        let error = result.unwrap_err();
        assert_eq!(error.attempts, 2);
        assert!(error.to_string().contains("knowledge.upsert"));
    }
}
