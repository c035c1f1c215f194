//! Handler-side types
//!
//! The per-request context passed into every capability handler, and the
//! cooperative cancellation token it carries.
//!
//! # Handler-authoring contract
//!
//! Cancellation is cooperative. The [`CancelToken`] is advisory: the engine
//! signals it when the client cancels the request or when the request
//! timeout fires, but a handler that never checks the token runs to
//! completion (or until the post-timeout grace period expires and its task
//! is abandoned). Long-running handlers should check
//! [`CancelToken::is_cancelled`] between steps, or `select!` against
//! [`CancelToken::cancelled`] at their suspension points.

use tokio::sync::watch;

use crate::notifications::NotificationCtx;
use crate::protocol::message::RequestId;

/// Advisory cancellation token observed voluntarily by handlers
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. If the request completes
    /// without ever being cancelled this future never resolves, so only
    /// `select!` against it rather than awaiting it alone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        // Sender dropped without firing: the request already completed
        std::future::pending::<()>().await;
    }
}

/// Engine-side trigger for a request's cancellation token
#[derive(Debug)]
pub(crate) struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub(crate) fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

pub(crate) fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// Context provided to every capability handler invocation
#[derive(Clone)]
pub struct RequestCtx {
    /// Session this request belongs to
    pub session_id: String,
    /// Correlation identifier of the request being served
    pub request_id: RequestId,
    /// Advisory cancellation token (see module docs for the contract)
    pub cancel: CancelToken,
    /// Out-of-band channel back to the client
    pub notifications: NotificationCtx,
}

impl RequestCtx {
    /// Report progress for this request. The correlation identifier rides
    /// inside the notification payload as the progress token; notifications
    /// never use the message id field.
    pub fn progress(&self, progress: f64, total: Option<f64>) {
        self.notifications
            .progress(self.request_id.clone(), progress, total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_starts_uncancelled() {
        let (handle, token) = cancel_pair();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancelled_future_is_pending_until_signal() {
        let (handle, token) = cancel_pair();
        let mut waiting = tokio_test::task::spawn(async move { token.cancelled().await });
        tokio_test::assert_pending!(waiting.poll());
        handle.cancel();
        assert!(waiting.is_woken());
        tokio_test::assert_ready!(waiting.poll());
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_signal() {
        let (handle, token) = cancel_pair();
        let waiter = tokio::spawn(async move {
            token.cancelled().await;
        });
        handle.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("cancelled() should resolve")
            .unwrap();
    }
}
