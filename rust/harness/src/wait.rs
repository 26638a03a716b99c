//! Poll-with-interval primitive.

use std::{future::Future, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::docker::HostError;

/// Repeatedly checks a condition, sleeping `interval` between checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poller {
    pub interval: Duration,
    /// Total time allowed before giving up. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Poller {
    #[must_use]
    pub fn new(interval: Duration, timeout: Option<Duration>) -> Self {
        Self { interval, timeout }
    }

    /// Poll `done` until it returns `true`. Returns the number of sleeps taken,
    /// so a condition that already holds costs zero sleeps.
    pub async fn until<F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut done: F,
    ) -> Result<u32, WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, HostError>>,
    {
        let start = Instant::now();
        let mut sleeps = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(WaitError::Cancelled);
            }

            if done().await? {
                return Ok(sleeps);
            }

            let nap = match self.timeout {
                Some(timeout) => {
                    let remaining = timeout.saturating_sub(start.elapsed());
                    if remaining.is_zero() {
                        return Err(WaitError::TimedOut(timeout));
                    }
                    remaining.min(self.interval)
                }
                None => self.interval,
            };

            tokio::select! {
                () = cancel.cancelled() => return Err(WaitError::Cancelled),
                () = tokio::time::sleep(nap) => {}
            }
            sleeps += 1;
        }
    }
}

/// Ways a wait can end without the condition holding.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("still waiting after {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("wait cancelled")]
    Cancelled,
    #[error(transparent)]
    Host(#[from] HostError),
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn poller(timeout: Option<u64>) -> Poller {
        Poller::new(Duration::from_secs(60), timeout.map(Duration::from_secs))
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_done_takes_no_sleeps() {
        let cancel = CancellationToken::new();
        let sleeps = poller(None)
            .until(&cancel, || async { Ok(true) })
            .await
            .unwrap();
        assert_eq!(sleeps, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_condition_holds() {
        let cancel = CancellationToken::new();
        let checks = AtomicU32::new(0);
        let counter = &checks;
        let start = Instant::now();

        let sleeps = poller(None)
            .until(&cancel, move || async move {
                Ok(counter.fetch_add(1, Ordering::SeqCst) + 1 >= 4)
            })
            .await
            .unwrap();

        assert_eq!(sleeps, 3);
        assert_eq!(checks.load(Ordering::SeqCst), 4);
        assert!(start.elapsed() >= Duration::from_secs(180));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let cancel = CancellationToken::new();
        let err = poller(Some(150))
            .until(&cancel, || async { Ok(false) })
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::TimedOut(t) if t == Duration::from_secs(150)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_sleeping() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(90)).await;
            trigger.cancel();
        });

        let err = poller(None)
            .until(&cancel, || async { Ok(false) })
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_error_propagates() {
        let cancel = CancellationToken::new();
        let err = poller(None)
            .until(&cancel, || async {
                Err(HostError::Engine("daemon not running".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Host(HostError::Engine(_))));
    }
}
