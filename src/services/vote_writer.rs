use crate::db::SERVICE_NAME;
use crate::error::AppResult;
use chrono::{DateTime, Utc};
use db_pool::{acquire_with_metrics, PgPool};
use serde::Serialize;
use tracing::info;

/// A committed vote row
#[derive(Debug, Clone, Serialize)]
pub struct RecordedVote {
    pub id: i64,
    pub candidate_id: i32,
    pub created_at: DateTime<Utc>,
}

/// Persists votes. The insert trigger turns every commit into a notification
/// on the votes channel, which is what feeds the live-results hub.
#[derive(Clone)]
pub struct VoteRecordWriter {
    pool: PgPool,
}

impl VoteRecordWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert one vote in its own transaction
    ///
    /// Postgres delivers the trigger's NOTIFY only after commit, so listeners
    /// never observe a rolled-back vote.
    pub async fn record_vote(
        &self,
        candidate_id: i32,
        hashed_nim: &str,
    ) -> AppResult<RecordedVote> {
        let mut client = acquire_with_metrics(&self.pool, SERVICE_NAME).await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_one(
                "INSERT INTO votes (candidate_id, hashed_nim) VALUES ($1, $2) \
                 RETURNING id, candidate_id, created_at",
                &[&candidate_id, &hashed_nim],
            )
            .await?;

        let vote = RecordedVote {
            id: row.get("id"),
            candidate_id: row.get("candidate_id"),
            created_at: row.get("created_at"),
        };

        tx.commit().await?;

        info!(vote_id = vote.id, candidate_id, "Vote recorded");
        Ok(vote)
    }

    /// Number of votes cast for `candidate_id`
    pub async fn total_votes(&self, candidate_id: i32) -> AppResult<i64> {
        let client = acquire_with_metrics(&self.pool, SERVICE_NAME).await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) AS total FROM votes WHERE candidate_id = $1",
                &[&candidate_id],
            )
            .await?;
        Ok(row.get("total"))
    }
}
