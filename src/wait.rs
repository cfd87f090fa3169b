//! Bounded waiting for eventually-consistent state.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::error::{Error, Result};

/// Polls a check with exponential backoff until it yields a value or the
/// timeout elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsistencyWait {
    pub timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ConsistencyWait {
    fn default() -> Self {
        ConsistencyWait {
            timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(1000),
        }
    }
}

impl ConsistencyWait {
    pub fn new(timeout: Duration, initial_backoff: Duration) -> ConsistencyWait {
        ConsistencyWait {
            timeout,
            initial_backoff,
            max_backoff: initial_backoff.max(Duration::from_millis(1000)),
        }
    }

    /// Runs `check` until it returns `Some`. Errors from the check abort the
    /// wait immediately; running out of time yields [`Error::Timeout`].
    pub async fn until<T, F, Fut>(&self, what: &str, mut check: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut backoff = self.initial_backoff;
        loop {
            if let Some(value) = check().await? {
                return Ok(value);
            }
            if Instant::now() + backoff > deadline {
                return Err(Error::Timeout(what.to_string()));
            }
            debug!("{what} not ready, retrying in {backoff:?}");
            sleep(backoff).await;
            backoff = (backoff * 2).min(self.max_backoff);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_returns_once_check_succeeds() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let wait = ConsistencyWait::new(Duration::from_secs(5), Duration::from_millis(10));
        let value = wait
            .until("counter", move || async move {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                Ok((call >= 3).then_some(call))
            })
            .await
            .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let wait = ConsistencyWait::new(Duration::from_millis(100), Duration::from_millis(10));
        let result: Result<()> = wait.until("never", || async { Ok(None) }).await;
        assert!(matches!(result, Err(Error::Timeout(what)) if what == "never"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_error_aborts() {
        let wait = ConsistencyWait::default();
        let result: Result<()> = wait
            .until("broken", || async { Err(Error::NotFound("x".into())) })
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
