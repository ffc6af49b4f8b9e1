//! Prometheus metrics for the vote fan-out pipeline

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Opts, TextEncoder};

fn register<T>(metric: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    // Duplicate registration only happens when tests share a process.
    let _ = prometheus::default_registry().register(Box::new(metric.clone()));
    metric
}

pub static SUBSCRIBERS: Lazy<IntGauge> = Lazy::new(|| {
    register(
        IntGauge::with_opts(Opts::new(
            "vote_broadcast_subscribers",
            "Live-result subscribers currently registered with the hub",
        ))
        .expect("failed to create vote_broadcast_subscribers"),
    )
});

pub static PAYLOADS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register(
        IntCounter::with_opts(Opts::new(
            "vote_broadcast_payloads_total",
            "Notification payloads handed to the hub",
        ))
        .expect("failed to create vote_broadcast_payloads_total"),
    )
});

pub static DROPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register(
        IntCounter::with_opts(Opts::new(
            "vote_broadcast_dropped_total",
            "Payloads dropped for a subscriber whose queue was full",
        ))
        .expect("failed to create vote_broadcast_dropped_total"),
    )
});

pub static LISTENER_RECONNECTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register(
        IntCounter::with_opts(Opts::new(
            "vote_listener_reconnects_total",
            "Failed LISTEN attempts and lost notification connections",
        ))
        .expect("failed to create vote_listener_reconnects_total"),
    )
});

/// 0 = disconnected, 1 = listening, 2 = terminated
pub static LISTENER_STATE: Lazy<IntGauge> = Lazy::new(|| {
    register(
        IntGauge::with_opts(Opts::new(
            "vote_listener_state",
            "Notification listener state",
        ))
        .expect("failed to create vote_listener_state"),
    )
});

pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
