//! Wall-clock implementation of the scheduler's [`Clock`].

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::application::scheduler::Clock;

/// Measures time since the Unix epoch and sleeps on the tokio timer.
///
/// Frame boundaries computed from this clock line up across processes and
/// restarts, since they are multiples of the period since 1970.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now_since_epoch(&self) -> Duration {
        // A clock set before 1970 reads as the epoch itself.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
