//! Cancellation signals
//!
//! A signal is a `watch` channel of `bool`. Sending `true` requests a stop;
//! dropping the sender is treated the same way since nobody is left to keep
//! the task alive.

use tokio::sync::watch;

pub type ShutdownSignal = watch::Receiver<bool>;

pub fn channel() -> (watch::Sender<bool>, ShutdownSignal) {
    watch::channel(false)
}

/// Resolves once the signal has fired or its sender is gone
pub async fn cancelled(signal: &mut ShutdownSignal) {
    let _ = signal.wait_for(|stop| *stop).await;
}

pub fn is_cancelled(signal: &ShutdownSignal) -> bool {
    *signal.borrow() || signal.has_changed().is_err()
}
