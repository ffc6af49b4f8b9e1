use crate::error::AppResult;
use crate::state::AppState;
use actix_web::{get, web, HttpResponse};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct TotalVotesResponse {
    pub total_votes: i64,
}

/// Current tally for one candidate, used by dashboards to seed their view
/// before live updates arrive
#[get("/api/votes/{candidate_id}/total")]
pub async fn candidate_total(
    state: web::Data<AppState>,
    candidate_id: web::Path<i32>,
) -> AppResult<HttpResponse> {
    let total_votes = state.votes.total_votes(candidate_id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(TotalVotesResponse { total_votes }))
}
