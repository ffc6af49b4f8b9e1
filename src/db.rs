use db_pool::{
    build_pool, spawn_metrics_updater, verify_pool, DbConfig as DbPoolConfig, DbPoolError, PgPool,
};
use tracing::warn;

pub const SERVICE_NAME: &str = "vote-broadcast-service";

/// Pool settings from `DB_*` variables, always pointed at `database_url`
pub fn db_config(database_url: &str) -> DbPoolConfig {
    let mut cfg = DbPoolConfig::from_env(SERVICE_NAME).unwrap_or_default();
    cfg.service_name = SERVICE_NAME.to_string();
    cfg.database_url = database_url.to_string();
    cfg
}

/// Build and verify the pool
///
/// An unreachable database is not fatal: the service keeps serving live
/// results (the listener reconnects on its own) and queries fail until the
/// database comes back. Only a malformed configuration is an error.
pub async fn init_pool(cfg: DbPoolConfig) -> Result<PgPool, DbPoolError> {
    cfg.log_config();
    let pool = build_pool(&cfg)?;

    if let Err(e) = verify_pool(&pool, &cfg).await {
        warn!(
            error = %e,
            "Database unavailable at startup, continuing; queries fail until it recovers"
        );
    }

    spawn_metrics_updater(&pool, &cfg.service_name);
    Ok(pool)
}
