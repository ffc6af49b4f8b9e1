use crate::metrics::metrics_handler;
use actix_web::web;

pub mod votes;
pub mod wsroute;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(wsroute::votes_live_result)
        .service(votes::candidate_total)
        .route("/health", web::get().to(|| async { "OK" }))
        .route("/metrics", web::get().to(metrics_handler));
}
