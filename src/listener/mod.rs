//! Notification listener
//!
//! Keeps one subscription to the storage backend's notification channel alive
//! for the whole process lifetime and hands every payload to the hub. Any
//! connection or protocol failure is logged and retried after a fixed delay;
//! only the shutdown signal ends the loop.

use crate::broadcast::BroadcastHub;
use crate::config::ListenerConfig;
use crate::metrics;
use crate::shutdown::{self, ShutdownSignal};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, trace, warn};

pub mod postgres;

pub use postgres::PgNotificationSource;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to connect to notification backend: {0}")]
    Connect(String),

    #[error("failed to LISTEN on channel {channel}: {reason}")]
    Listen { channel: String, reason: String },

    #[error("notification connection lost: {0}")]
    ConnectionLost(String),

    #[error("notification connection closed")]
    ConnectionClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Disconnected,
    Listening,
    Terminated,
}

impl ListenerState {
    fn as_gauge(self) -> i64 {
        match self {
            ListenerState::Disconnected => 0,
            ListenerState::Listening => 1,
            ListenerState::Terminated => 2,
        }
    }
}

/// A backend that can subscribe to a named notification channel
#[async_trait]
pub trait NotificationSource: Send + Sync {
    /// Acquire a connection and start listening on `channel`
    async fn listen(&self, channel: &str) -> Result<Box<dyn NotificationStream>, ListenerError>;
}

/// A live channel subscription. Dropping it releases the connection.
#[async_trait]
pub trait NotificationStream: Send {
    /// Wait for the next payload
    async fn next_notification(&mut self) -> Result<String, ListenerError>;
}

pub struct NotificationListener<S> {
    source: S,
    hub: BroadcastHub,
    channel: String,
    retry_delay: Duration,
    state: watch::Sender<ListenerState>,
}

impl<S: NotificationSource> NotificationListener<S> {
    pub fn new(source: S, hub: BroadcastHub, config: &ListenerConfig) -> Self {
        let (state, _) = watch::channel(ListenerState::Disconnected);
        Self {
            source,
            hub,
            channel: config.channel.clone(),
            retry_delay: config.retry_delay,
            state,
        }
    }

    /// Read-only view of the connection state
    pub fn state(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` fires. The connection is released on every exit path.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        info!(channel = %self.channel, "Notification listener starting");

        while !shutdown::is_cancelled(&shutdown) {
            let attempt = tokio::select! {
                biased;
                _ = shutdown::cancelled(&mut shutdown) => break,
                attempt = self.source.listen(&self.channel) => attempt,
            };

            match attempt {
                Ok(mut stream) => {
                    self.set_state(ListenerState::Listening);
                    info!(channel = %self.channel, "Listening for vote notifications");

                    let outcome = self.forward(&mut stream, &mut shutdown).await;
                    drop(stream);

                    match outcome {
                        Ok(()) => break,
                        Err(e) => error!(
                            channel = %self.channel,
                            error = %e,
                            retry_in_secs = self.retry_delay.as_secs_f64(),
                            "Notification listener disconnected, reconnecting"
                        ),
                    }
                }
                Err(e) => warn!(
                    channel = %self.channel,
                    error = %e,
                    retry_in_secs = self.retry_delay.as_secs_f64(),
                    "Failed to start listening, retrying"
                ),
            }

            self.set_state(ListenerState::Disconnected);
            metrics::LISTENER_RECONNECTS_TOTAL.inc();

            if !self.pause(&mut shutdown).await {
                break;
            }
        }

        self.set_state(ListenerState::Terminated);
        info!(channel = %self.channel, "Notification listener stopped");
    }

    /// Ok(()) on shutdown, Err on connection failure
    async fn forward(
        &self,
        stream: &mut Box<dyn NotificationStream>,
        shutdown: &mut ShutdownSignal,
    ) -> Result<(), ListenerError> {
        loop {
            tokio::select! {
                biased;
                _ = shutdown::cancelled(shutdown) => return Ok(()),
                next = stream.next_notification() => {
                    let payload = next?;
                    let report = self.hub.broadcast(payload);
                    trace!(
                        delivered = report.delivered,
                        dropped = report.dropped,
                        "Vote notification fanned out"
                    );
                }
            }
        }
    }

    /// Wait out the retry delay; false if shutdown fired first
    async fn pause(&self, shutdown: &mut ShutdownSignal) -> bool {
        tokio::select! {
            biased;
            _ = shutdown::cancelled(shutdown) => false,
            _ = tokio::time::sleep(self.retry_delay) => true,
        }
    }

    fn set_state(&self, state: ListenerState) {
        self.state.send_replace(state);
        metrics::LISTENER_STATE.set(state.as_gauge());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    type Feed = mpsc::UnboundedSender<Result<String, ListenerError>>;
    type FeedRx = mpsc::UnboundedReceiver<Result<String, ListenerError>>;

    enum Step {
        /// Connection refused
        Refuse,
        /// Connection acquired, then the LISTEN command fails
        RejectListen,
        /// Connected and listening; streams from the receiver
        Accept(FeedRx),
    }

    /// Each `listen` call consumes one script step; an empty script refuses.
    #[derive(Clone, Default)]
    struct ScriptedSource {
        attempts: Arc<AtomicUsize>,
        acquired: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
        script: Arc<Mutex<VecDeque<Step>>>,
    }

    impl ScriptedSource {
        fn outage(&self, times: usize) {
            let mut script = self.script.lock();
            for _ in 0..times {
                script.push_back(Step::Refuse);
            }
        }

        fn reject_listen(&self, times: usize) {
            let mut script = self.script.lock();
            for _ in 0..times {
                script.push_back(Step::RejectListen);
            }
        }

        fn connection(&self) -> Feed {
            let (tx, rx) = mpsc::unbounded_channel();
            self.script.lock().push_back(Step::Accept(rx));
            tx
        }

        fn lease(&self) -> Lease {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Lease(self.released.clone())
        }
    }

    /// A backend connection; counted as released when dropped
    struct Lease(Arc<AtomicUsize>);

    impl Drop for Lease {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ScriptedStream {
        rx: FeedRx,
        _lease: Lease,
    }

    #[async_trait]
    impl NotificationStream for ScriptedStream {
        async fn next_notification(&mut self) -> Result<String, ListenerError> {
            match self.rx.recv().await {
                Some(next) => next,
                None => Err(ListenerError::ConnectionClosed),
            }
        }
    }

    #[async_trait]
    impl NotificationSource for ScriptedSource {
        async fn listen(&self, channel: &str) -> Result<Box<dyn NotificationStream>, ListenerError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let step = self.script.lock().pop_front().unwrap_or(Step::Refuse);
            match step {
                Step::Refuse => Err(ListenerError::Connect("scripted outage".into())),
                Step::RejectListen => {
                    let _lease = self.lease();
                    Err(ListenerError::Listen {
                        channel: channel.to_string(),
                        reason: "permission denied".into(),
                    })
                }
                Step::Accept(rx) => Ok(Box::new(ScriptedStream {
                    rx,
                    _lease: self.lease(),
                })),
            }
        }
    }

    fn config(retry_secs: u64) -> ListenerConfig {
        ListenerConfig {
            channel: "votes_channel".into(),
            retry_delay: Duration::from_secs(retry_secs),
        }
    }

    async fn wait_for_state(rx: &mut watch::Receiver<ListenerState>, wanted: ListenerState) {
        tokio::time::timeout(Duration::from_secs(600), rx.wait_for(|s| *s == wanted))
            .await
            .expect("listener state not reached")
            .expect("listener dropped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_consecutive_failures() {
        let source = ScriptedSource::default();
        source.outage(4);
        let feed = source.connection();

        let hub = BroadcastHub::default();
        let mut subscriber = hub.subscribe();
        let listener = NotificationListener::new(source.clone(), hub.clone(), &config(3));
        let mut state = listener.state();
        let (shutdown_tx, shutdown_rx) = shutdown::channel();

        let started = Instant::now();
        let task = tokio::spawn(listener.run(shutdown_rx));

        wait_for_state(&mut state, ListenerState::Listening).await;
        assert_eq!(source.attempts.load(Ordering::SeqCst), 5);
        assert!(started.elapsed() >= Duration::from_secs(12));

        feed.send(Ok("vote:42".into())).unwrap();
        assert_eq!(subscriber.recv().await.as_deref(), Some("vote:42"));

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(*state.borrow(), ListenerState::Terminated);
        assert_eq!(source.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_connection_loss() {
        let source = ScriptedSource::default();
        let first = source.connection();
        let second = source.connection();

        let hub = BroadcastHub::default();
        let mut subscriber = hub.subscribe();
        let listener = NotificationListener::new(source.clone(), hub.clone(), &config(3));
        let mut state = listener.state();
        let (shutdown_tx, shutdown_rx) = shutdown::channel();
        let task = tokio::spawn(listener.run(shutdown_rx));

        wait_for_state(&mut state, ListenerState::Listening).await;
        first.send(Ok("vote:1".into())).unwrap();
        assert_eq!(subscriber.recv().await.as_deref(), Some("vote:1"));

        first
            .send(Err(ListenerError::ConnectionLost("server closed the connection".into())))
            .unwrap();
        wait_for_state(&mut state, ListenerState::Disconnected).await;
        wait_for_state(&mut state, ListenerState::Listening).await;

        second.send(Ok("vote:2".into())).unwrap();
        assert_eq!(subscriber.recv().await.as_deref(), Some("vote:2"));
        assert_eq!(source.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(source.released.load(Ordering::SeqCst), 1);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(source.released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_listen_releases_connection_and_retries() {
        let source = ScriptedSource::default();
        source.reject_listen(2);
        let feed = source.connection();

        let hub = BroadcastHub::default();
        let mut subscriber = hub.subscribe();
        let listener = NotificationListener::new(source.clone(), hub.clone(), &config(3));
        let mut state = listener.state();
        let (shutdown_tx, shutdown_rx) = shutdown::channel();

        let started = Instant::now();
        let task = tokio::spawn(listener.run(shutdown_rx));

        wait_for_state(&mut state, ListenerState::Listening).await;
        assert_eq!(source.attempts.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(6));
        // Both rejected attempts gave their connection back; the live one is held.
        assert_eq!(source.acquired.load(Ordering::SeqCst), 3);
        assert_eq!(source.released.load(Ordering::SeqCst), 2);

        feed.send(Ok("vote:9".into())).unwrap();
        assert_eq!(subscriber.recv().await.as_deref(), Some("vote:9"));

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(source.released.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_retry_delay() {
        let source = ScriptedSource::default();
        let hub = BroadcastHub::default();
        let listener = NotificationListener::new(source.clone(), hub, &config(3600));
        let state = listener.state();
        let (shutdown_tx, shutdown_rx) = shutdown::channel();
        let task = tokio::spawn(listener.run(shutdown_rx));

        // Let the first attempt fail and the listener enter its retry wait.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.attempts.load(Ordering::SeqCst), 1);

        let cancelled_at = Instant::now();
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("listener must stop without finishing the retry delay")
            .unwrap();

        assert!(cancelled_at.elapsed() < Duration::from_secs(1));
        assert_eq!(source.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(*state.borrow(), ListenerState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_listening_releases_connection() {
        let source = ScriptedSource::default();
        let _feed = source.connection();
        let listener = NotificationListener::new(source.clone(), BroadcastHub::default(), &config(3));
        let mut state = listener.state();
        let (shutdown_tx, shutdown_rx) = shutdown::channel();
        let task = tokio::spawn(listener.run(shutdown_rx));

        wait_for_state(&mut state, ListenerState::Listening).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(source.released.load(Ordering::SeqCst), 1);
        assert_eq!(*state.borrow(), ListenerState::Terminated);
    }

    #[tokio::test]
    async fn test_already_cancelled_never_connects() {
        let source = ScriptedSource::default();
        let listener = NotificationListener::new(source.clone(), BroadcastHub::default(), &config(3));
        let (shutdown_tx, shutdown_rx) = shutdown::channel();
        shutdown_tx.send(true).unwrap();

        listener.run(shutdown_rx).await;
        assert_eq!(source.attempts.load(Ordering::SeqCst), 0);
    }
}
