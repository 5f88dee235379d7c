//! Stop signalling for running batches.
//!
//! A [`StopHandle`] is kept by whoever may stop the batch; the matching
//! [`StopSignal`] is passed to the orchestrator. The first stop wins.

use crate::error::CancellationError;
use std::sync::Arc;
use tokio::sync::watch;

/// Why a batch was stopped from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The caller asked to stop.
    Interrupted(String),
    /// An external dependency went away (e.g. the node is shutting down).
    Aborted(String),
}

impl From<StopReason> for CancellationError {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::Interrupted(msg) => CancellationError::Interrupted(msg),
            StopReason::Aborted(msg) => CancellationError::Aborted(msg),
        }
    }
}

/// Sending half, cheap to clone.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<Option<StopReason>>>,
}

impl StopHandle {
    /// Caller-initiated stop; reported as `Interrupted`.
    pub fn interrupt(&self, message: impl Into<String>) {
        self.stop(StopReason::Interrupted(message.into()));
    }

    /// Externally signalled stop; reported as `Aborted`.
    pub fn abort(&self, message: impl Into<String>) {
        self.stop(StopReason::Aborted(message.into()));
    }

    fn stop(&self, reason: StopReason) {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }
}

/// Receiving half, observed by every item of a batch.
#[derive(Clone)]
pub struct StopSignal {
    rx: watch::Receiver<Option<StopReason>>,
}

impl StopSignal {
    pub fn new() -> (StopHandle, StopSignal) {
        let (tx, rx) = watch::channel(None);
        (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
    }

    /// A signal that never fires.
    pub fn never() -> StopSignal {
        let (_handle, signal) = Self::new();
        signal
    }

    pub fn current(&self) -> Option<StopReason> {
        self.rx.borrow().clone()
    }

    /// Resolves once a stop was requested; pends forever if the handle is
    /// dropped without stopping.
    pub async fn stopped(&self) -> StopReason {
        let mut rx = self.rx.clone();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(current) => current.clone(),
            Err(_) => None,
        };
        match reason {
            Some(reason) => reason,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_stop_wins() {
        let (handle, signal) = StopSignal::new();
        assert_eq!(signal.current(), None);

        handle.abort("node shutting down");
        handle.interrupt("operator stop");

        assert_eq!(
            signal.current(),
            Some(StopReason::Aborted("node shutting down".to_string()))
        );
        assert_eq!(
            signal.stopped().await,
            StopReason::Aborted("node shutting down".to_string())
        );
    }

    #[tokio::test]
    async fn test_reason_maps_to_cancellation_kind() {
        let err: CancellationError = StopReason::Interrupted("stop".to_string()).into();
        assert_eq!(err, CancellationError::interrupted("stop"));
        let err: CancellationError = StopReason::Aborted("gone".to_string()).into();
        assert_eq!(err, CancellationError::aborted("gone"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_does_not_fire() {
        let signal = StopSignal::never();
        let fired = tokio::time::timeout(Duration::from_secs(60), signal.stopped()).await;
        assert!(fired.is_err());
        assert_eq!(signal.current(), None);
    }
}
