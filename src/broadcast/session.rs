//! Per-connection delivery loop
//!
//! One session drains one subscriber queue onto one client transport. Every
//! exit path deregisters the subscription and releases the transport exactly
//! once.

use super::Subscription;
use crate::shutdown::{self, ShutdownSignal};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport closed")]
    Closed,

    #[error("transport write failed: {0}")]
    Write(String),
}

/// Client-facing side of a session: receives each payload as one text frame
#[async_trait]
pub trait PayloadSink: Send {
    async fn send_text(&mut self, payload: &str) -> Result<(), SessionError>;

    /// Release the transport. Called once, after the subscription is gone.
    async fn close(&mut self);
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The connection's own cancellation signal fired (client went away)
    Cancelled,
    /// The hub closed the queue
    QueueClosed,
    /// Writing to the client failed
    WriteFailed,
}

/// Drive one subscriber until cancellation, queue closure or write failure
pub async fn serve<S>(
    mut sink: S,
    mut subscription: Subscription,
    mut cancel: ShutdownSignal,
) -> SessionEnd
where
    S: PayloadSink,
{
    let subscriber_id = subscription.id();
    let mut delivered: u64 = 0;

    let end = loop {
        tokio::select! {
            biased;

            _ = shutdown::cancelled(&mut cancel) => break SessionEnd::Cancelled,

            next = subscription.recv() => {
                let Some(payload) = next else {
                    break SessionEnd::QueueClosed;
                };

                // A client that stops reading stalls the write; cancellation
                // must still win.
                let written = tokio::select! {
                    biased;
                    _ = shutdown::cancelled(&mut cancel) => break SessionEnd::Cancelled,
                    written = sink.send_text(&payload) => written,
                };

                if let Err(e) = written {
                    debug!(subscriber_id = %subscriber_id, error = %e, "Write to client failed");
                    break SessionEnd::WriteFailed;
                }
                delivered += 1;
            }
        }
    };

    subscription.unsubscribe();
    sink.close().await;

    info!(
        subscriber_id = %subscriber_id,
        reason = ?end,
        delivered,
        "Live-results subscriber disconnected"
    );

    end
}
