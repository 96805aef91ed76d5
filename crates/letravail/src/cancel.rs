//! Cancellation tokens and progress reporting

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Owner side of a cancellation signal
#[derive(Debug, Clone)]
pub struct CancellationSource {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationSource {
    /// Create a fresh, uncancelled source
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Token observing this source
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Request cancellation; every token observes it at its next checkpoint
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation signal
///
/// Cancellation is cooperative: holders poll [`CancellationToken::is_cancelled`] at their
/// own checkpoints or await [`CancellationToken::cancelled`] in a `select!`.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    rx: watch::Receiver<bool>,
}

impl CancellationToken {
    /// Token that is never cancelled
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested
    ///
    /// Pends forever if the source is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

type ProgressSink = dyn Fn(u8, &str) + Send + Sync;

/// Reports `current` (0-100) plus a message for a running job
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<ProgressSink>,
}

impl ProgressReporter {
    /// Reporter forwarding to a callback
    pub fn new(sink: impl Fn(u8, &str) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// Reporter that drops every update
    pub fn noop() -> Self {
        Self::new(|_, _| {})
    }

    /// Report progress; values above 100 are clamped
    pub fn report(&self, current: u8, message: &str) {
        (self.sink)(current.min(100), message);
    }

    /// Report `done` out of `total` units as a percentage
    pub fn report_fraction(&self, done: usize, total: usize, message: &str) {
        let current = if total == 0 {
            100
        } else {
            ((done.min(total) * 100) / total) as u8
        };
        self.report(current, message);
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter").finish_non_exhaustive()
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::noop()
    }
}
