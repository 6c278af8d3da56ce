//! Bounded exponential backoff for transient failures.
//!
//! Only errors whose class is transient are retried:
//! - `SourceUnavailable`, `DownloadFailed`, `ExtractionFailed` → retry
//! - anything else → returned immediately
//! - Backoff: base, 2×base, 4×base, … (capped at 2^5 × base)

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::PipelineConfig;
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
}

/// Outcome of a retried operation: the final result and how many attempts
/// were made to reach it.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: Duration::from_millis(config.backoff_base_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.base * (1u32 << (attempt - 1).min(5))
    }

    /// Run `op` until it succeeds, fails non-transiently, or the retry
    /// budget (`max_retries` retries after the first attempt) is spent.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Attempted<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                tokio::time::sleep(self.delay(attempt)).await;
            }

            let result = op(attempt).await;
            match result {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        op = label,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "transient failure, backing off {:.1}s",
                        self.delay(attempt).as_secs_f64()
                    );
                }
                result => {
                    return Attempted {
                        result,
                        attempts: attempt + 1,
                    }
                }
            }
        }
    }
}
