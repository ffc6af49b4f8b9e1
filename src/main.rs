use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use vote_broadcast_service::{
    broadcast::BroadcastHub,
    config, db, error,
    listener::{NotificationListener, PgNotificationSource},
    logging, routes,
    services::VoteRecordWriter,
    shutdown,
    state::AppState,
};

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    // Only a malformed database config fails here; an unreachable database
    // is tolerated and the listener below keeps retrying until it is back.
    let db_cfg = db::db_config(&cfg.database_url);
    let pg_config = db_cfg.pg_config()?;
    let db = db::init_pool(db_cfg).await?;

    let hub = BroadcastHub::new(cfg.websocket.queue_capacity);

    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    let listener = NotificationListener::new(
        PgNotificationSource::new(pg_config),
        hub.clone(),
        &cfg.listener,
    );
    let listener_task = tokio::spawn(listener.run(shutdown_rx));

    let state = AppState {
        hub,
        votes: VoteRecordWriter::new(db),
        config: cfg.clone(),
    };

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, channel = %cfg.listener.channel, "Starting vote broadcast service");

    let server = HttpServer::new(move || {
        App::new()
            .wrap(tracing_actix_web::TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?
    .run();

    let result = server
        .await
        .map_err(|e| error::AppError::StartServer(format!("server: {e}")));

    tracing::info!("HTTP server stopped, shutting down notification listener");
    let _ = shutdown_tx.send(true);
    if let Err(e) = listener_task.await {
        tracing::error!(error = %e, "Notification listener task failed");
    }

    result
}
