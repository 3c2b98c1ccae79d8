use crate::classifier::{Category, ClassificationError, Scores};
use crate::models::ApprovalStatus;

/// Highest NSFW score that is still approved automatically.
pub const DEFAULT_APPROVE_MAX: f64 = 0.30;

/// NSFW scores above this are rejected automatically.
pub const DEFAULT_REJECT_ABOVE: f64 = 0.75;

/// The outcome written back to the queue table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub status: ApprovalStatus,
    pub needs_review: bool,
}

impl Decision {
    /// Fail-safe outcome for anything uncertain or erroneous.
    pub const MANUAL_REVIEW: Decision = Decision {
        status: ApprovalStatus::NotApproved,
        needs_review: true,
    };

    pub const APPROVED: Decision = Decision {
        status: ApprovalStatus::Approved,
        needs_review: false,
    };

    pub const REJECTED: Decision = Decision {
        status: ApprovalStatus::Rejected,
        needs_review: false,
    };
}

/// Two-threshold policy over the worst of the porn, sexy and hentai scores.
///
/// `m <= approve_max` approves, `approve_max < m <= reject_above` routes to
/// manual review, `m > reject_above` rejects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionPolicy {
    approve_max: f64,
    reject_above: f64,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            approve_max: DEFAULT_APPROVE_MAX,
            reject_above: DEFAULT_REJECT_ABOVE,
        }
    }
}

impl DecisionPolicy {
    pub fn new(approve_max: f64, reject_above: f64) -> Result<Self, String> {
        if !(0.0..=1.0).contains(&approve_max) || !(0.0..=1.0).contains(&reject_above) {
            return Err(format!(
                "Thresholds must lie within [0, 1] (approve={approve_max}, reject={reject_above})"
            ));
        }
        if approve_max > reject_above {
            return Err(format!(
                "Approve threshold {approve_max} exceeds reject threshold {reject_above}"
            ));
        }
        Ok(Self {
            approve_max,
            reject_above,
        })
    }

    pub fn approve_max(&self) -> f64 {
        self.approve_max
    }

    pub fn reject_above(&self) -> f64 {
        self.reject_above
    }

    pub fn decide(&self, scores: &Scores) -> Result<Decision, ClassificationError> {
        let porn = scores.require(Category::Porn)?;
        let sexy = scores.require(Category::Sexy)?;
        let hentai = scores.require(Category::Hentai)?;

        let m = porn.max(sexy).max(hentai);

        Ok(if m <= self.approve_max {
            Decision::APPROVED
        } else if m <= self.reject_above {
            Decision::MANUAL_REVIEW
        } else {
            Decision::REJECTED
        })
    }
}
