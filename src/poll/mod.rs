/// Bounded availability polling
///
/// Everything in a launch that can take time, from an instance booting
/// to a mongod accepting its first connection, is waited on with the same
/// primitive: probe, sleep, probe again, up to a fixed attempt budget.
/// A probe that cannot reach its subject reports `false`; only an
/// exhausted budget is an error, and that error aborts the launch.
use std::future::Future;
use std::time::Duration;

use crate::error::{LanzaError, LanzaResult};

/// Default number of probe attempts before a subject is abandoned
pub const DEFAULT_MAX_ATTEMPTS: u32 = 240;

/// Default delay between probe attempts
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Attempt budget and inter-attempt delay for one polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Repeatedly evaluate `probe` until it reports true.
    ///
    /// Attempts are numbered from 1 and each one is logged against
    /// `subject`. Exhausting the budget is fatal: the whole launch is
    /// abandoned, nothing is rolled back.
    pub async fn wait_until<F, Fut>(&self, subject: &str, mut probe: F) -> LanzaResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for attempt in 1..=self.max_attempts {
            if probe().await {
                tracing::debug!("{} became available on attempt {}", subject, attempt);
                return Ok(());
            }
            tracing::info!(
                "waiting for {} to become available... {}/{}",
                subject,
                attempt,
                self.max_attempts
            );
            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        Err(LanzaError::connection(
            subject,
            format!(
                "did not become available within {} attempts. Abandoning setup.",
                self.max_attempts
            ),
        ))
    }
}
