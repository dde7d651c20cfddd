//! One-shot readiness signal.
//!
//! The bridge flips to ready once it is authenticated, connected to the
//! server and listening for notifications. Anything that wants to wait
//! for that moment (health checks, tests) holds a [`Waiter`]. The signal
//! latches: once ready, always ready, and waiters subscribing after the
//! fact return immediately.

use tokio::sync::watch;

/// The sending half of the readiness signal.
#[derive(Debug)]
pub struct Readiness {
    tx: watch::Sender<bool>,
}

/// A handle that can wait for readiness.
#[derive(Clone, Debug)]
pub struct Waiter {
    rx: watch::Receiver<bool>,
}

impl Readiness {
    /// Creates the signal in the not-ready state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// A waiter on this signal. Can be called any number of times.
    #[must_use]
    pub fn waiter(&self) -> Waiter {
        Waiter {
            rx: self.tx.subscribe(),
        }
    }

    /// Marks the bridge as ready. Signalling twice is a no-op.
    pub fn signal(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the signal has fired.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

impl Waiter {
    /// Waits until the bridge is ready.
    ///
    /// Returns immediately when the signal already fired, even if this
    /// waiter subscribed after the fact. Also returns when the sending
    /// half is dropped, so a bridge that dies before becoming ready does
    /// not strand its waiters.
    pub async fn wait(&mut self) {
        // An error means the sender is gone; the latched value decides.
        let _ = self.rx.wait_for(|ready| *ready).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn waiters_unblock_on_signal() {
        let readiness = Readiness::new();
        assert!(!readiness.is_ready());

        let mut waiters: Vec<_> = (0..4).map(|_| readiness.waiter()).collect();
        readiness.signal();

        for waiter in &mut waiters {
            waiter.wait().await;
        }
        assert!(readiness.is_ready());
    }

    #[tokio::test]
    async fn late_subscriber_returns_immediately() {
        let readiness = Readiness::new();
        readiness.signal();

        let mut waiter = readiness.waiter();
        waiter.wait().await;
    }

    #[tokio::test]
    async fn double_signal_is_a_no_op() {
        let readiness = Readiness::new();
        readiness.signal();
        readiness.signal();

        let mut waiter = readiness.waiter();
        waiter.wait().await;
        assert!(readiness.is_ready());
    }
}
