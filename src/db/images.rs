use std::time::Duration;

use sqlx::PgPool;

use super::StoreError;
use crate::models::{ApprovalStatus, ClaimedImage, QueueItem};

/// Longest diagnostic persisted alongside a completion.
pub const MAX_DIAGNOSTIC_LEN: usize = 1024;

/// Insert a fresh, unclaimed image. This is what upstream producers do.
pub async fn enqueue(pool: &PgPool, download_url: &str) -> Result<QueueItem, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        "INSERT INTO images (download_url) VALUES ($1) RETURNING *",
    )
    .bind(download_url)
    .fetch_one(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>("SELECT * FROM images WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Claim the next eligible image using SELECT FOR UPDATE SKIP LOCKED.
///
/// Eligible rows are either fresh (never claimed, not flagged for review) or
/// stalled (claimed at least `lease` ago and never completed). Rows locked
/// by a concurrent claim are skipped, never waited on. Among several eligible
/// rows the lowest id wins.
pub async fn claim_next(
    pool: &PgPool,
    lease: Duration,
) -> Result<Option<ClaimedImage>, StoreError> {
    let mut tx = pool.begin().await?;

    let candidate = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM images
         WHERE completed_at IS NULL
           AND (
               (claimed_at IS NULL AND needs_review = false)
               OR claimed_at <= now() - make_interval(secs => $1::double precision)
           )
         ORDER BY id ASC
         LIMIT 1
         FOR UPDATE SKIP LOCKED",
    )
    .bind(lease.as_secs_f64())
    .fetch_optional(&mut *tx)
    .await?;

    let Some(id) = candidate else {
        tx.rollback().await?;
        return Ok(None);
    };

    let item = sqlx::query_as::<_, ClaimedImage>(
        "UPDATE images SET claimed_at = now() WHERE id = $1
         RETURNING id, download_url, claimed_at",
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(item))
}

/// Record the final outcome for a claimed image.
///
/// Completion is one-shot: a second call for the same id is rejected with
/// `StoreError::AlreadyCompleted` and leaves the stored outcome untouched.
pub async fn complete(
    pool: &PgPool,
    id: i64,
    approval_status: ApprovalStatus,
    needs_review: bool,
    diagnostic: Option<&str>,
) -> Result<(), StoreError> {
    let diagnostic = diagnostic.map(truncate_diagnostic);

    let result = sqlx::query(
        "UPDATE images
         SET approval_status = $2,
             needs_review = $3,
             last_error = $4,
             completed_at = now()
         WHERE id = $1 AND completed_at IS NULL",
    )
    .bind(id)
    .bind(approval_status)
    .bind(needs_review)
    .bind(diagnostic)
    .execute(pool)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM images WHERE id = $1)")
        .bind(id)
        .fetch_one(pool)
        .await?;

    if exists {
        Err(StoreError::AlreadyCompleted(id))
    } else {
        Err(StoreError::NotFound(id))
    }
}

fn truncate_diagnostic(diagnostic: &str) -> String {
    diagnostic.chars().take(MAX_DIAGNOSTIC_LEN).collect()
}
