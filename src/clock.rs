//! Injectable sleeping for backoff and polling loops.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

/// Something that can wait for a duration.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Sleeper that returns immediately and remembers every requested delay.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    calls: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, in order.
    pub fn calls(&self) -> Vec<Duration> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Sum of all requested delays.
    pub fn total(&self) -> Duration {
        self.calls().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        match self.calls.lock() {
            Ok(mut calls) => calls.push(duration),
            Err(poisoned) => poisoned.into_inner().push(duration),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_sleeper_records_in_order() {
        let sleeper = RecordingSleeper::new();
        sleeper.sleep(Duration::from_millis(5)).await;
        sleeper.sleep(Duration::from_millis(10)).await;

        assert_eq!(
            sleeper.calls(),
            vec![Duration::from_millis(5), Duration::from_millis(10)]
        );
        assert_eq!(sleeper.total(), Duration::from_millis(15));
    }

    #[tokio::test]
    async fn test_tokio_sleeper_waits() {
        let start = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_millis(20)).await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
