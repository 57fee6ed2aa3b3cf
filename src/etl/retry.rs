//! Fixed-delay retry policy applied to every stage

use super::Stage;
use eyre::Result;
use std::future::Future;
use std::time::Duration;

/// Attempt ceiling and delay for one stage
///
/// A stage runs once and is retried up to `retries` times, sleeping `delay`
/// between attempts. Defaults: 3 retries, 5 minutes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_secs(5 * 60),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Run `op` until it succeeds or the attempt ceiling is reached
    ///
    /// The last error is returned wrapped with the stage id and the number of
    /// attempts made; the original error stays reachable through the chain.
    pub async fn run<T, F, Fut>(&self, stage: Stage, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            log::debug!("{} attempt {}/{}", stage, attempt, self.max_attempts());
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts() => {
                    log::warn!(
                        "{} failed (attempt {}/{}): {:#}; retrying in {:?}",
                        stage,
                        attempt,
                        self.max_attempts(),
                        err,
                        self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    log::error!("{} failed after {} attempt(s): {:#}", stage, attempt, err);
                    return Err(err.wrap_err(format!(
                        "{} failed after {} attempt(s)",
                        stage, attempt
                    )));
                }
            }
        }
    }
}
