//! Cooperative cancellation
//!
//! A [`CancelSource`] hands out [`CancelToken`]s. Cancellation is advisory:
//! registry operations check the token between async steps and return "no
//! result" once it is set. Already-issued file system calls are not aborted.

use tokio::sync::watch;

/// Owner side of a cancellation signal
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl CancelSource {
    /// Create new, not yet cancelled source
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Hand out a token observing this source
    #[inline]
    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: Some(self.tx.subscribe()),
        }
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation was requested
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation signal
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// Token that is never cancelled
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self { rx: None }
    }

    /// Whether cancellation was requested
    #[inline]
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested
    ///
    /// Never resolves for [`CancelToken::none`] or when the source was dropped
    /// without cancelling.
    pub async fn requested(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
