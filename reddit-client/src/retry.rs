use deltabot_core::{CoreError, ErrorExt};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Base delay for exponential backoff (in milliseconds)
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Maximum jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn reddit() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 60000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Retry with exponential backoff
    Retry,
    /// Retry after the delay the server asked for
    RetryWithDelay(Duration),
    NoRetry,
}

pub fn get_retry_strategy(error: &CoreError) -> RetryStrategy {
    if !error.is_retryable() {
        return RetryStrategy::NoRetry;
    }
    match error.retry_after() {
        Some(delay) => RetryStrategy::RetryWithDelay(delay),
        None => RetryStrategy::Retry,
    }
}

/// Writes are resent only when Reddit cannot have acted on the first copy.
/// A timeout, a 5xx or an unreadable 200 may all follow a successful write.
pub fn get_write_retry_strategy(error: &CoreError) -> RetryStrategy {
    if error.is_safe_to_resend() {
        get_retry_strategy(error)
    } else {
        RetryStrategy::NoRetry
    }
}

/// Exponential backoff with jitter, capped at `max_delay_ms`.
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let max_delay = Duration::from_millis(config.max_delay_ms);
    let multiplier = config.backoff_multiplier.powi(attempt as i32);
    let delay_ms = ((config.base_delay_ms as f64 * multiplier) as u64).min(config.max_delay_ms);
    let exponential_delay = Duration::from_millis(delay_ms);

    let jitter_range = (exponential_delay.as_millis() as f64 * config.jitter_factor) as u64;
    let jitter = fastrand::u64(0..=jitter_range);
    (exponential_delay + Duration::from_millis(jitter)).min(max_delay)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryStats {
    pub total_retries: u64,
    pub successful_retries: u64,
    pub failed_operations: u64,
}

/// Wraps API operations with retry logic. The final error is returned as-is
/// so callers can still tell a missing resource from a transport failure.
#[derive(Debug)]
pub struct RetryExecutor {
    config: RetryConfig,
    stats: Mutex<RetryStats>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(RetryStats::default()),
        }
    }

    pub async fn execute<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        self.run(operation_name, get_retry_strategy, operation).await
    }

    /// Like [`execute`](Self::execute) for requests that change state on Reddit.
    pub async fn execute_write<F, Fut, T>(
        &self,
        operation_name: &str,
        operation: F,
    ) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        self.run(operation_name, get_write_retry_strategy, operation)
            .await
    }

    async fn run<F, Fut, T>(
        &self,
        operation_name: &str,
        classify: fn(&CoreError) -> RetryStrategy,
        operation: F,
    ) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        self.record(|stats| {
                            stats.total_retries += attempt as u64;
                            stats.successful_retries += 1;
                        });
                        info!("{} succeeded after {} retries", operation_name, attempt);
                    }
                    return Ok(result);
                }
                Err(error) => {
                    let can_retry = attempt + 1 < self.config.max_attempts;
                    let delay = match classify(&error) {
                        RetryStrategy::Retry if can_retry => calculate_delay(attempt, &self.config),
                        RetryStrategy::RetryWithDelay(delay) if can_retry => delay,
                        strategy => {
                            if strategy != RetryStrategy::NoRetry {
                                warn!(
                                    "{} failed after {} attempts: {}",
                                    operation_name,
                                    attempt + 1,
                                    error
                                );
                            } else {
                                debug!("Not retrying {}: {}", operation_name, error);
                            }
                            self.record(|stats| {
                                stats.total_retries += attempt as u64;
                                stats.failed_operations += 1;
                            });
                            return Err(error);
                        }
                    };

                    info!("Retrying {} in {:?} due to: {}", operation_name, delay, error);
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    pub fn stats(&self) -> RetryStats {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    fn record(&self, update: impl FnOnce(&mut RetryStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deltabot_core::RedditApiError;
    use std::sync::Arc;

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            ..Default::default()
        }
    }

    #[test]
    fn test_retry_config_reddit() {
        let config = RetryConfig::reddit();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 2000);
        assert!(config.jitter_factor <= 1.0);
    }

    #[test]
    fn test_retry_strategy_for_errors() {
        let rate_limited =
            CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 60 });
        assert_eq!(
            get_retry_strategy(&rate_limited),
            RetryStrategy::RetryWithDelay(Duration::from_secs(60))
        );

        let server_error = CoreError::RedditApi(RedditApiError::ServerError { status_code: 503 });
        assert_eq!(get_retry_strategy(&server_error), RetryStrategy::Retry);

        let auth_error = CoreError::RedditApi(RedditApiError::AuthenticationFailed {
            reason: "bad password".to_string(),
        });
        assert_eq!(get_retry_strategy(&auth_error), RetryStrategy::NoRetry);
        assert_eq!(
            get_retry_strategy(&CoreError::not_found("t1_gone")),
            RetryStrategy::NoRetry
        );
    }

    #[test]
    fn test_write_strategy_never_resends_after_server_contact() {
        for error in [
            RedditApiError::ServerError { status_code: 502 },
            RedditApiError::RequestTimeout,
            RedditApiError::InvalidResponse {
                details: "expected value at line 1".to_string(),
            },
        ] {
            let error = CoreError::RedditApi(error);
            assert_eq!(get_retry_strategy(&error), RetryStrategy::Retry);
            assert_eq!(get_write_retry_strategy(&error), RetryStrategy::NoRetry);
        }

        let rate_limited =
            CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 3 });
        assert_eq!(
            get_write_retry_strategy(&rate_limited),
            RetryStrategy::RetryWithDelay(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_exponential_backoff_calculation() {
        let config = RetryConfig {
            base_delay_ms: 1000,
            max_delay_ms: 10000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            ..Default::default()
        };

        assert_eq!(calculate_delay(0, &config), Duration::from_millis(1000));
        assert_eq!(calculate_delay(1, &config), Duration::from_millis(2000));
        assert_eq!(calculate_delay(3, &config), Duration::from_millis(8000));
        assert_eq!(calculate_delay(10, &config), Duration::from_millis(10000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = RetryConfig {
            base_delay_ms: 1000,
            max_delay_ms: 10000,
            jitter_factor: 0.5,
            ..Default::default()
        };
        for _ in 0..10 {
            let delay = calculate_delay(1, &config);
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay <= Duration::from_millis(3000));
        }
    }

    #[tokio::test]
    async fn test_success_after_retries() {
        let executor = RetryExecutor::new(fast_config());
        let attempts = Arc::new(std::sync::Mutex::new(0));

        let counter = attempts.clone();
        let result = executor
            .execute("flaky", move || {
                let counter = counter.clone();
                async move {
                    let mut count = counter.lock().unwrap();
                    *count += 1;
                    if *count < 3 {
                        Err(CoreError::RedditApi(RedditApiError::ServerError {
                            status_code: 502,
                        }))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        let stats = executor.stats();
        assert_eq!(stats.total_retries, 2);
        assert_eq!(stats.successful_retries, 1);
    }

    #[tokio::test]
    async fn test_not_found_is_returned_unchanged() {
        let executor = RetryExecutor::new(fast_config());
        let attempts = Arc::new(std::sync::Mutex::new(0));

        let counter = attempts.clone();
        let result = executor
            .execute("lookup", move || {
                let counter = counter.clone();
                async move {
                    *counter.lock().unwrap() += 1;
                    Err::<i32, CoreError>(CoreError::not_found("t1_gone"))
                }
            })
            .await;

        assert!(matches!(result, Err(CoreError::NotFound { .. })));
        assert_eq!(*attempts.lock().unwrap(), 1);
        assert_eq!(executor.stats().failed_operations, 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let executor = RetryExecutor::new(fast_config());
        let result = executor
            .execute("down", || async {
                Err::<i32, CoreError>(CoreError::RedditApi(RedditApiError::ServerError {
                    status_code: 500,
                }))
            })
            .await;

        assert!(matches!(
            result,
            Err(CoreError::RedditApi(RedditApiError::ServerError { status_code: 500 }))
        ));
        assert_eq!(executor.stats().total_retries, 2);
    }

    #[tokio::test]
    async fn test_write_is_sent_once_on_server_error() {
        let executor = RetryExecutor::new(fast_config());
        let attempts = Arc::new(std::sync::Mutex::new(0));

        let counter = attempts.clone();
        let result = executor
            .execute_write("reply", move || {
                let counter = counter.clone();
                async move {
                    *counter.lock().unwrap() += 1;
                    Err::<i32, CoreError>(CoreError::RedditApi(RedditApiError::ServerError {
                        status_code: 503,
                    }))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(*attempts.lock().unwrap(), 1);
        assert_eq!(executor.stats().total_retries, 0);
    }

    #[tokio::test]
    async fn test_write_waits_out_rate_limit() {
        let executor = RetryExecutor::new(fast_config());
        let attempts = Arc::new(std::sync::Mutex::new(0));

        let counter = attempts.clone();
        let result = executor
            .execute_write("reply", move || {
                let counter = counter.clone();
                async move {
                    let mut count = counter.lock().unwrap();
                    *count += 1;
                    if *count == 1 {
                        Err(CoreError::RedditApi(RedditApiError::RateLimitExceeded {
                            retry_after: 0,
                        }))
                    } else {
                        Ok("t1_new")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "t1_new");
        assert_eq!(*attempts.lock().unwrap(), 2);
    }
}
