//! Progress reporting from running commands.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A progress notification emitted by a running command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Completion percentage, always within `0..=100`
    pub percent: u8,

    /// What the command is currently doing
    pub description: Option<String>,

    /// Whether the operation can still be cancelled
    pub cancellable: bool,
}

impl ProgressUpdate {
    /// Create an update. Percentages above 100 are clamped.
    pub fn new(percent: u8) -> Self {
        Self {
            percent: percent.min(100),
            description: None,
            cancellable: true,
        }
    }

    /// Create an update from a completed/total pair.
    pub fn from_fraction(done: u64, total: u64) -> Self {
        let percent = if total == 0 {
            100
        } else {
            // u128 so large byte counts cannot overflow
            (u128::from(done.min(total)) * 100 / u128::from(total)) as u8
        };
        Self::new(percent)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn not_cancellable(mut self) -> Self {
        self.cancellable = false;
        self
    }
}

type ProgressFn = dyn Fn(ProgressUpdate) + Send + Sync;

/// Destination for progress updates.
///
/// Reporting never blocks and never fails; updates sent after the receiving
/// side has gone away are dropped.
#[derive(Clone)]
pub struct ProgressSink {
    inner: Arc<ProgressFn>,
}

impl ProgressSink {
    /// Create a sink from a callback.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Report an update.
    pub fn report(&self, update: ProgressUpdate) {
        (self.inner)(update);
    }

    /// Report a bare percentage.
    pub fn percent(&self, percent: u8) {
        self.report(ProgressUpdate::new(percent));
    }

    /// Build a sink that forwards every update to both `self` and `other`.
    pub fn tee(&self, other: ProgressSink) -> ProgressSink {
        let first = self.clone();
        ProgressSink::new(move |update: ProgressUpdate| {
            first.report(update.clone());
            other.report(update);
        })
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSink").finish_non_exhaustive()
    }
}

/// Receiving half of a progress channel.
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressUpdate>;

/// Create a progress channel: a sink for the command and a receiver for the caller.
pub fn channel() -> (ProgressSink, ProgressReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = ProgressSink::new(move |update| {
        let _ = tx.send(update);
    });
    (sink, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_percent_is_clamped() {
        assert_eq!(ProgressUpdate::new(250).percent, 100);
        assert_eq!(ProgressUpdate::from_fraction(1, 4).percent, 25);
        assert_eq!(ProgressUpdate::from_fraction(9, 4).percent, 100);
        assert_eq!(ProgressUpdate::from_fraction(0, 0).percent, 100);
        assert_eq!(ProgressUpdate::from_fraction(u64::MAX / 2, u64::MAX).percent, 49);
        assert_eq!(ProgressUpdate::from_fraction(u64::MAX, u64::MAX).percent, 100);
        assert_eq!(ProgressUpdate::from_fraction(u64::MAX, 10).percent, 100);
    }

    #[tokio::test]
    async fn test_channel_delivers_in_order() {
        let (sink, mut rx) = channel();
        sink.percent(10);
        sink.report(ProgressUpdate::new(50).with_description("Rendering"));
        drop(sink);

        assert_eq!(rx.recv().await.unwrap().percent, 10);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.description.as_deref(), Some("Rendering"));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_report_after_receiver_dropped() {
        let (sink, rx) = channel();
        drop(rx);
        sink.percent(42);
    }

    #[test]
    fn test_tee() {
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        let c2 = count.clone();
        let a = ProgressSink::new(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let b = ProgressSink::new(move |_| {
            c2.fetch_add(10, Ordering::SeqCst);
        });

        a.tee(b).percent(5);
        assert_eq!(count.load(Ordering::SeqCst), 11);
    }
}
