//! Postgres LISTEN/NOTIFY source
//!
//! Pooled clients cannot be used here: deadpool drives their connections
//! internally and discards asynchronous messages. Each `listen` call opens a
//! dedicated connection and drives it on its own task, forwarding
//! notifications to the stream.

use super::{ListenerError, NotificationSource, NotificationStream};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_postgres::{AsyncMessage, Client, Config, NoTls};
use tracing::debug;

const KEEPALIVE_IDLE: Duration = Duration::from_secs(30);

pub struct PgNotificationSource {
    config: Config,
}

impl PgNotificationSource {
    /// TCP keepalives are forced on so a silently dropped peer surfaces as an
    /// I/O error instead of an endless wait.
    pub fn new(mut config: Config) -> Self {
        config.keepalives(true).keepalives_idle(KEEPALIVE_IDLE);
        Self { config }
    }
}

/// Quote a channel name for use as an SQL identifier
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl NotificationSource for PgNotificationSource {
    async fn listen(&self, channel: &str) -> Result<Box<dyn NotificationStream>, ListenerError> {
        let (client, mut connection) = self
            .config
            .connect(NoTls)
            .await
            .map_err(|e| ListenerError::Connect(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let driver = ConnectionDriver(tokio::spawn(async move {
            let mut messages = stream::poll_fn(move |cx| connection.poll_message(cx));
            while let Some(message) = messages.next().await {
                match message {
                    Ok(AsyncMessage::Notification(notification)) => {
                        if tx.send(Ok(notification.payload().to_string())).is_err() {
                            break;
                        }
                    }
                    Ok(AsyncMessage::Notice(notice)) => {
                        debug!(notice = %notice, "Postgres notice on listener connection");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        }));

        // On failure the early return drops `driver` and with it the connection.
        if let Err(e) = client.batch_execute(&format!("LISTEN {}", quote_ident(channel))).await {
            return Err(ListenerError::Listen {
                channel: channel.to_string(),
                reason: e.to_string(),
            });
        }

        Ok(Box::new(PgNotificationStream {
            _client: client,
            notifications: rx,
            _driver: driver,
        }))
    }
}

struct PgNotificationStream {
    // Keeps the session open; the connection closes once both halves are gone.
    _client: Client,
    notifications: mpsc::UnboundedReceiver<Result<String, tokio_postgres::Error>>,
    _driver: ConnectionDriver,
}

/// Task polling the connection; aborted when dropped
struct ConnectionDriver(JoinHandle<()>);

impl Drop for ConnectionDriver {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[async_trait]
impl NotificationStream for PgNotificationStream {
    async fn next_notification(&mut self) -> Result<String, ListenerError> {
        match self.notifications.recv().await {
            Some(Ok(payload)) => Ok(payload),
            Some(Err(e)) => Err(ListenerError::ConnectionLost(e.to_string())),
            None => Err(ListenerError::ConnectionClosed),
        }
    }
}
