//! Cooperative cancellation for a single run.
//!
//! A [`CancelToken`] fires when its [`CancelHandle`] is triggered or when an
//! optional deadline passes, whichever comes first. Every suspension point
//! of a run (service connection, strategy decision, capability invocation)
//! races its future against [`CancelToken::cancelled`].

use tokio::sync::watch;
use tokio::time::Instant;

/// Trigger side of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal cancellation to every token cloned from this pair.
    pub fn cancel(&self) {
        // send_replace never fails, even with no live receivers
        self.tx.send_replace(true);
    }
}

/// Observer side of a cancellation pair. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

/// Create a linked handle/token pair with no deadline.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx, deadline: None })
}

impl CancelToken {
    /// A token that never fires on its own (a deadline can still be added).
    pub fn never() -> Self {
        let (_, token) = cancel_pair();
        token
    }

    /// Add (or tighten) a deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Whether cancellation has already been requested or the deadline passed.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolve once the token fires. Pending forever for a token that never fires.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let signal = async move {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    // Handle dropped without cancelling.
                    std::future::pending::<()>().await;
                }
            }
        };

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = signal => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => signal.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_handle_cancels_token() {
        let (handle, token) = cancel_pair();
        assert!(!token.is_cancelled());

        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        handle.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("token should fire")
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_deadline_fires() {
        let token = CancelToken::never().with_deadline(Instant::now() + Duration::from_millis(20));
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("deadline should fire");
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_never_stays_pending() {
        let token = CancelToken::never();
        let result = tokio::time::timeout(Duration::from_millis(30), token.cancelled()).await;
        assert!(result.is_err());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_with_deadline_keeps_earliest() {
        let now = Instant::now();
        let early = now + Duration::from_secs(1);
        let late = now + Duration::from_secs(10);
        let token = CancelToken::never().with_deadline(early).with_deadline(late);
        assert_eq!(token.deadline, Some(early));
    }
}
