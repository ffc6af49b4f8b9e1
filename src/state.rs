use crate::{broadcast::BroadcastHub, config::Config, services::VoteRecordWriter};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// Live-results fan-out shared by the listener and every WebSocket session
    pub hub: BroadcastHub,
    pub votes: VoteRecordWriter,
    pub config: Arc<Config>,
}
