use std::thread;
use std::time::Duration;

use log::warn;

use crate::error::AdapterError;

/// Fixed attempt count and fixed delay between attempts.
#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub sleep: Duration,
}

impl RetryConfig {
    pub const fn new(max_retries: usize, sleep: Duration) -> Self {
        Self { max_retries, sleep }
    }

    pub fn from_llm_config(config: &book_core::LlmConfig) -> Self {
        Self::new(config.max_retries, Duration::from_secs(config.retry_delay_secs))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            sleep: Duration::from_secs(5),
        }
    }
}

/// Calls `f` until it succeeds, fails with a non-transient error, or runs
/// out of attempts. Exhaustion wraps the last error in `RetryExhausted`.
pub fn call_with_retry<F, T>(mut f: F, config: &RetryConfig) -> Result<T, AdapterError>
where
    F: FnMut() -> Result<T, AdapterError>,
{
    let attempts = config.max_retries.max(1);
    let mut last_error: Option<AdapterError> = None;

    for attempt in 1..=attempts {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => {
                warn!(
                    "[call_with_retry] attempt {}/{} failed: {}",
                    attempt, attempts, err
                );
                if attempt < attempts {
                    thread::sleep(config.sleep);
                }
                last_error = Some(err);
            }
        }
    }

    let err = last_error.unwrap_or(AdapterError::EmptyResponse);
    Err(AdapterError::retry_exhausted(attempts, err))
}
