use chrono::{DateTime, Utc};

/// Moderation outcome stored in `images.approval_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, sqlx::Type)]
#[repr(i16)]
pub enum ApprovalStatus {
    #[default]
    NotApproved = 0,
    Approved = 1,
    Rejected = 2,
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalStatus::NotApproved => write!(f, "not_approved"),
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// A row of the `images` table, which doubles as the work queue.
///
/// `approval_status`, `needs_review` and `last_error` only carry a final
/// meaning once `completed_at` is set.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueItem {
    pub id: i64,
    pub download_url: String,
    pub approval_status: ApprovalStatus,
    pub needs_review: bool,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// The part of a row a worker needs once it holds the claim.
///
/// Outcome columns are left out so a claim never depends on decoding them.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClaimedImage {
    pub id: i64,
    pub download_url: String,
    pub claimed_at: DateTime<Utc>,
}
