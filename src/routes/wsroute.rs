use crate::broadcast::{self, PayloadSink, SessionError};
use crate::config::WebSocketConfig;
use crate::shutdown;
use crate::state::AppState;
use actix_web::{get, http::header, rt, web, Error, HttpRequest, HttpResponse};
use actix_ws::{Message, MessageStream, Session};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, warn};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
impl PayloadSink for Session {
    async fn send_text(&mut self, payload: &str) -> Result<(), SessionError> {
        self.text(payload.to_owned())
            .await
            .map_err(|_| SessionError::Closed)
    }

    async fn close(&mut self) {
        // `Session::close` consumes the handle; the clone shares the same
        // underlying connection. A full outbound buffer must not park the
        // caller, hence the bound.
        let _ = timeout(CLOSE_TIMEOUT, Session::close(self.clone(), None)).await;
    }
}

/// Live results feed: every committed vote is pushed as one text frame
#[get("/ws/votes")]
pub async fn votes_live_result(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok());
    if !state.config.websocket.allowed_origins.allows(origin) {
        warn!(origin = ?origin, "Rejected live-results connection from disallowed origin");
        return Ok(HttpResponse::Forbidden().finish());
    }

    let (response, session, messages) = actix_ws::handle(&req, body)?;

    let subscription = state.hub.subscribe();
    debug!(
        subscriber_id = %subscription.id(),
        peer = ?req.peer_addr(),
        "Live-results subscriber connected"
    );

    let (cancel_tx, cancel_rx) = shutdown::channel();
    let ws_config = state.config.websocket.clone();

    rt::spawn(watch_client(
        session.clone(),
        messages,
        cancel_tx,
        ws_config,
    ));
    rt::spawn(broadcast::serve(session, subscription, cancel_rx));

    Ok(response)
}

/// Read side of the connection: answers pings, sends heartbeats and fires
/// `cancel` once the client is gone or unresponsive.
async fn watch_client(
    mut session: Session,
    mut messages: MessageStream,
    cancel: watch::Sender<bool>,
    config: WebSocketConfig,
) {
    let mut last_heard = Instant::now();
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    let write_limit = config.heartbeat_interval;

    loop {
        tokio::select! {
            msg = messages.next() => match msg {
                Some(Ok(Message::Ping(bytes))) => {
                    last_heard = Instant::now();
                    if !write_within(write_limit, session.pong(&bytes)).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(reason))) => {
                    debug!(reason = ?reason, "Client closed live-results connection");
                    break;
                }
                Some(Ok(_)) => last_heard = Instant::now(),
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket protocol error");
                    break;
                }
                None => break,
            },

            _ = heartbeat.tick() => {
                if last_heard.elapsed() > config.client_timeout {
                    warn!("WebSocket heartbeat failed, disconnecting");
                    break;
                }
                if !write_within(write_limit, session.ping(b"")).await {
                    warn!("Client stopped reading, disconnecting");
                    break;
                }
            }

            // Delivery loop ended on its own (write failure or queue closed)
            _ = cancel.closed() => break,
        }
    }

    let _ = cancel.send(true);
    // Tear the transport down even if the delivery side is wedged on a write.
    let _ = timeout(write_limit, Session::close(session, None)).await;
}

/// A control frame write that completed successfully before `limit`
async fn write_within<F, E>(limit: Duration, write: F) -> bool
where
    F: Future<Output = Result<(), E>>,
{
    matches!(timeout(limit, write).await, Ok(Ok(())))
}
