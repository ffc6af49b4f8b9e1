//! Live vote tally broadcast
//!
//! Committed votes raise a Postgres notification; one listener forwards each
//! payload into an in-process hub, which fans it out to every connected
//! results dashboard over WebSocket.

pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod listener;
pub mod logging;
pub mod metrics;
pub mod routes;
pub mod services;
pub mod shutdown;
pub mod state;
