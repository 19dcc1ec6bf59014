//! Exponential backoff shared by every LLM and TTS call site.
//!
//! HTTP 429 / 503 errors from model and speech APIs are transient and
//! frequent under concurrent load. Exponential backoff
//! (`base_delay * 2^(attempt-1)`, capped at `max_delay`) avoids
//! thundering-herd: with 500 ms base and 3 retries the wait sequence is
//! 500 ms → 1 s → 2 s, totalling < 4 s of back-off per unit of work.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::LectureError;

/// Retry policy for a class of remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Retries after the first attempt (3 → up to 4 attempts total).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    /// Policy that never retries. Used by tests and the mock synthesizer.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`,
    /// saturating, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Outcome of [`with_backoff`]: the value plus how many retries it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub value: T,
    pub retries: u32,
}

/// Run `op` until it succeeds, the error is not retryable, or the policy is
/// exhausted. Returns the last error on exhaustion.
///
/// `label` names the unit of work in warn logs ("page 3", "block 7").
pub async fn with_backoff<T, F, Fut>(
    policy: &Backoff,
    label: &str,
    is_retryable: impl Fn(&LectureError) -> bool,
    mut op: F,
) -> Result<Attempted<T>, LectureError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LectureError>>,
{
    let mut last_err: Option<LectureError> = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.delay_for(attempt);
            warn!(
                "{}: retry {}/{} after {}ms",
                label,
                attempt,
                policy.max_retries,
                backoff.as_millis()
            );
            sleep(backoff).await;
        }

        match op().await {
            Ok(value) => {
                return Ok(Attempted {
                    value,
                    retries: attempt,
                })
            }
            Err(e) => {
                warn!("{}: attempt {} failed — {}", label, attempt + 1, e);
                if !is_retryable(&e) {
                    return Err(e);
                }
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| LectureError::Internal(format!("{label}: no attempts ran"))))
}

/// Retry classification for LLM calls: everything transient retries, but
/// auth and configuration problems never self-heal.
pub fn llm_retryable(err: &LectureError) -> bool {
    !matches!(
        err,
        LectureError::AuthError { .. }
            | LectureError::ProviderNotConfigured { .. }
            | LectureError::InvalidConfig(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> Backoff {
        Backoff {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let b = Backoff {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        };
        assert_eq!(b.delay_for(1), Duration::from_millis(500));
        assert_eq!(b.delay_for(2), Duration::from_millis(1000));
        assert_eq!(b.delay_for(3), Duration::from_millis(2000));
    }

    #[test]
    fn delay_caps_at_max() {
        let b = Backoff {
            max_retries: 10,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(15),
        };
        assert_eq!(b.delay_for(4), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let out = with_backoff(&fast(), "unit", |_| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(LectureError::LlmApiError {
                        message: "503".into(),
                    })
                } else {
                    Ok(42u32)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out.value, 42);
        assert_eq!(out.retries, 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let err = with_backoff(&fast(), "unit", |_| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(LectureError::LlmApiError {
                    message: "boom".into(),
                })
            }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(err, LectureError::LlmApiError { .. }));
    }

    #[tokio::test]
    async fn non_retryable_returns_immediately() {
        let calls = AtomicU32::new(0);
        let err = with_backoff(&fast(), "unit", llm_retryable, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(LectureError::AuthError {
                    provider: "openai".into(),
                    detail: "bad key".into(),
                })
            }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, LectureError::AuthError { .. }));
    }

    #[test]
    fn llm_retryable_classification() {
        assert!(llm_retryable(&LectureError::RateLimitExceeded {
            provider: "openai".into(),
            retry_after_secs: None,
        }));
        assert!(llm_retryable(&LectureError::InvalidModelReply {
            detail: "truncated".into(),
        }));
        assert!(!llm_retryable(&LectureError::ProviderNotConfigured {
            provider: "openai".into(),
            hint: "set OPENAI_API_KEY".into(),
        }));
    }
}
