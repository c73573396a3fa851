/// Cancellable scheduled tasks and the reconnect backoff schedule.
/// One mechanism serves typing debounce/expiry and the connection retry loop.
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// A single deferred action. Dropping the task cancels it, so replacing an
/// entry in a map resets the timer.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Run `fut` once after `delay` unless cancelled first
    pub fn once<F>(delay: Duration, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            fut.await;
        });
        Self { handle }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Bounded exponential backoff with half jitter
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// Attempts taken since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Next delay: doubles per attempt up to `max`, jittered into the
    /// upper half of the window so simultaneous clients spread out
    pub fn next_delay(&mut self) -> Duration {
        let shift = self.attempt.min(16);
        let ceiling = self
            .base
            .saturating_mul(1u32 << shift)
            .min(self.max)
            .max(self.base);
        self.attempt = self.attempt.saturating_add(1);

        let half = ceiling / 2;
        let jitter_ms = rand::thread_rng().gen_range(0..=half.as_millis() as u64);
        half + Duration::from_millis(jitter_ms)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
