use std::time::Duration;

use domain::engine::error::EngineError;

/// Configuration for retry with backoff around engine DDL.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: usize,
    /// Delays between attempts. The last entry repeats when there are
    /// fewer entries than retries.
    pub backoff_schedule: Vec<Duration>,
    /// Timeout per individual attempt.
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_schedule: vec![Duration::from_secs(2), Duration::from_secs(3)],
            timeout: Duration::from_secs(20),
        }
    }
}

impl RetryConfig {
    /// A schedule with near-zero delays, for tests.
    pub fn fast() -> Self {
        Self {
            max_retries: 2,
            backoff_schedule: vec![Duration::from_millis(1)],
            timeout: Duration::from_secs(1),
        }
    }

    fn backoff_for(&self, attempt: usize) -> Duration {
        self.backoff_schedule
            .get(attempt)
            .or_else(|| self.backoff_schedule.last())
            .copied()
            .unwrap_or(Duration::from_secs(1))
    }
}

/// Run `f` up to `1 + max_retries` times, each attempt under the per-attempt
/// timeout, sleeping the scheduled backoff between attempts. Returns the
/// first success or the last error.
pub async fn retry_with_backoff<T, F, Fut>(config: &RetryConfig, mut f: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, EngineError>>,
{
    let mut last_error = None;

    for attempt in 0..=config.max_retries {
        match tokio::time::timeout(config.timeout, f()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => last_error = Some(e),
            Err(_elapsed) => {
                last_error = Some(EngineError::Transient("attempt timed out".to_string()));
            }
        }

        if attempt < config.max_retries {
            tokio::time::sleep(config.backoff_for(attempt)).await;
        }
    }

    Err(last_error
        .unwrap_or_else(|| EngineError::Transient("all retries exhausted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn returns_value_on_first_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = retry_with_backoff(&RetryConfig::fast(), move || {
            counter.fetch_add(1, Ordering::Relaxed);
            async { Ok(42u32) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = retry_with_backoff(&RetryConfig::fast(), move || {
            let attempt = counter.fetch_add(1, Ordering::Relaxed);
            async move {
                if attempt < 2 {
                    Err(EngineError::Transient("blip".to_string()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn surfaces_last_error_when_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), _> = retry_with_backoff(&RetryConfig::fast(), move || {
            counter.fetch_add(1, Ordering::Relaxed);
            async { Err(EngineError::BadSql("still broken".to_string())) }
        })
        .await;
        assert!(result.unwrap_err().to_string().contains("still broken"));
        // initial attempt + 2 retries
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn per_attempt_timeout_counts_as_transient() {
        let config = RetryConfig {
            max_retries: 0,
            backoff_schedule: vec![Duration::from_millis(1)],
            timeout: Duration::from_millis(10),
        };
        let result: Result<(), _> = retry_with_backoff(&config, || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result.unwrap_err(), EngineError::Transient(_)));
    }
}
