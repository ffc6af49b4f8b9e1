//! Prometheus metrics for the database connection pool

use deadpool_postgres::{Client, Pool, PoolError};
use once_cell::sync::Lazy;
use prometheus::{register_histogram_vec, register_int_gauge_vec, HistogramVec, IntGaugeVec};
use std::time::Instant;

/// Pool connections by state (idle/active/max)
static DB_POOL_CONNECTIONS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "db_pool_connections",
        "Database pool connection count by state",
        &["service", "state"]
    )
    .expect("failed to register db_pool_connections")
});

static DB_POOL_ACQUIRE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "db_pool_acquire_duration_seconds",
        "Time to acquire connection from pool",
        &["service", "outcome"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    )
    .expect("failed to register db_pool_acquire_duration_seconds")
});

pub(crate) fn update_pool_metrics(pool: &Pool, service: &str) {
    let status = pool.status();
    let size = status.size as i64;
    let idle = status.available as i64;

    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "idle"])
        .set(idle);
    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "active"])
        .set(size - idle);
    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "max"])
        .set(status.max_size as i64);
}

/// `pool.get()` with acquisition latency recorded per outcome
pub async fn acquire_with_metrics(pool: &Pool, service: &str) -> Result<Client, PoolError> {
    let start = Instant::now();
    let result = pool.get().await;
    let outcome = if result.is_ok() { "ok" } else { "error" };

    DB_POOL_ACQUIRE_DURATION
        .with_label_values(&[service, outcome])
        .observe(start.elapsed().as_secs_f64());

    if let Err(e) = &result {
        tracing::warn!(service = %service, error = %e, "Failed to acquire pooled connection");
    }

    result
}
