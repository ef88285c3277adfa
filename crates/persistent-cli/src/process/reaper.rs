//! Periodic background sweep.

use crate::Result;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Shortest sweep period the timer accepts.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);
/// Longest sweep period the timer accepts.
pub const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Runs a sweep on a fixed period until stopped.
///
/// The first sweep happens one full period after start. A sweep that returns
/// an error or panics is logged and the timer keeps running. The period is
/// clamped to [`MIN_PERIOD`]..=[`MAX_PERIOD`]. After
/// [`stop`](Self::stop) returns, no sweep is running and none will start.
#[derive(Debug)]
pub struct IdleReaper {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    period: Duration,
}

impl IdleReaper {
    /// Start the timer. Must be called inside a Tokio runtime.
    pub fn start<F, Fut>(period: Duration, mut sweep: F) -> Self
    where
        F: FnMut() -> Option<Fut> + Send + 'static,
        Fut: Future<Output = Result<usize>> + Send + 'static,
    {
        let period = period.clamp(MIN_PERIOD, MAX_PERIOD);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                // `None` means the owner is gone.
                let Some(fut) = sweep() else { break };

                match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(Ok(0)) => debug!("Idle sweep found nothing to evict"),
                    Ok(Ok(evicted)) => info!(evicted, "Idle sweep evicted processes"),
                    Ok(Err(e)) => error!("Idle sweep failed: {}", e),
                    Err(_) => error!("Idle sweep panicked"),
                }
            }
            debug!("Idle reaper stopped");
        });

        Self {
            cancel,
            handle: Some(handle),
            period,
        }
    }

    /// Sweep period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Whether the timer has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the timer and wait for an in-progress sweep to finish.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Idle reaper task failed: {}", e);
                }
            }
        }
    }
}

impl Drop for IdleReaper {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_full_period() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut reaper = IdleReaper::start(Duration::from_secs(300), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(async { Ok(0) })
        });

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        reaper.stop().await;
        assert!(reaper.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_and_panics_do_not_stop_timer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut reaper = IdleReaper::start(Duration::from_secs(10), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Some(async move {
                match n {
                    0 => Err(Error::protocol("boom")),
                    1 => panic!("sweep exploded"),
                    _ => Ok(1),
                }
            })
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        reaper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sweep_after_stop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut reaper = IdleReaper::start(Duration::from_secs(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(async { Ok(0) })
        });

        reaper.stop().await;
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_owner_gone_ends_task() {
        let mut reaper = IdleReaper::start(Duration::from_secs(1), || {
            None::<std::future::Ready<Result<usize>>>
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        reaper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_period_is_clamped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut reaper = IdleReaper::start(Duration::MAX, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(async { Ok(0) })
        });
        assert_eq!(reaper.period(), MAX_PERIOD);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        let handle = reaper.handle.as_ref().unwrap();
        assert!(!handle.is_finished());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        reaper.stop().await;
        assert!(reaper.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_is_clamped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut reaper = IdleReaper::start(Duration::ZERO, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(async { Ok(0) })
        });
        assert_eq!(reaper.period(), MIN_PERIOD);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(calls.load(Ordering::SeqCst) > 0);
        reaper.stop().await;
    }
}
