//! Countdown for the open poll.
//!
//! Ticks once per second on tokio's monotonic clock. The expiry future only
//! runs if the countdown reaches zero before `cancel` (or drop).

use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct PollTimer {
    cancel_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
    deadline: Instant,
}

impl PollTimer {
    /// Start counting down `seconds`; `on_expire` runs once when it hits zero
    pub fn start<F>(seconds: u32, on_expire: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let start = Instant::now();
        let deadline = start + TICK * seconds;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start + TICK, TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut remaining = seconds;

            while remaining > 0 {
                tokio::select! {
                    biased;
                    // Fires on explicit cancel and when the timer is dropped
                    _ = &mut cancel_rx => return,
                    _ = ticker.tick() => {
                        remaining -= 1;
                        tracing::trace!(remaining, "Poll timer tick");
                    }
                }
            }

            // Last chance: a cancel that raced the final tick wins
            if cancel_rx.try_recv() != Err(oneshot::error::TryRecvError::Empty) {
                return;
            }
            on_expire.await;
        });

        Self {
            cancel_tx: Some(cancel_tx),
            handle,
            deadline,
        }
    }

    /// Stop the countdown. Consumes the timer, so it can only happen once.
    /// Returns false if the countdown had already finished.
    pub fn cancel(mut self) -> bool {
        let finished = self.handle.is_finished();
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
        !finished
    }

    /// Whole seconds left, rounded up
    pub fn remaining_secs(&self) -> u64 {
        let left = self.deadline.saturating_duration_since(Instant::now());
        left.as_millis().div_ceil(1000) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicU32>, impl Future<Output = ()> + Send + 'static) {
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        (fired, async move {
            f.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_duration() {
        let (fired, on_expire) = counter();
        let timer = PollTimer::start(3, on_expire);
        assert_eq!(timer.remaining_secs(), 3);

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(timer.remaining_secs(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.remaining_secs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_expiry() {
        let (fired, on_expire) = counter();
        let timer = PollTimer::start(2, on_expire);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(timer.cancel());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let (fired, on_expire) = counter();
        let timer = PollTimer::start(1, on_expire);
        drop(timer);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
