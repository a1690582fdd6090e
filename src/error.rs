use super::deal::{DealId, Stage};
use super::guard::ActionKind;
use super::roles::Role;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is missing or blank")]
    MissingField(&'static str),
    #[error("Deal value must be greater than zero")]
    NonPositiveValue,
    #[error("{0} is outside the supported date range")]
    DateOutOfRange(&'static str),
    #[error("A peer reviewer cannot be the assigned salesman")]
    ReviewerIsSalesman,
    #[error("First and second reviewer must be different people")]
    DuplicateReviewer,
    #[error("Too many report attachments: {got} given, at most {max} allowed")]
    TooManyAttachments { max: usize, got: usize },
    #[error("Client username must be at least {min} characters")]
    UsernameTooShort { min: usize },
    #[error("Client username may only contain ASCII letters, digits, '.', '_' and '-'")]
    InvalidUsername,
    #[error("Client password must be at least {min} characters")]
    PasswordTooShort { min: usize },
    #[error("Unknown stage {0:?}")]
    UnknownStage(String),
}

/// Why the transition guard refused an action.
///
/// Each variant carries enough for a caller to explain the refusal: the
/// action, the stage the deal is in, and who could have done it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("{action} at {stage} requires one of {required:?}")]
    Unauthorized {
        action: ActionKind,
        stage: Stage,
        required: Vec<Role>,
    },
    #[error("{action} does not apply at {stage}; it applies at {applicable:?}")]
    InvalidStage {
        action: ActionKind,
        stage: Stage,
        applicable: Vec<Stage>,
    },
    #[error("{action} has already been satisfied at {stage}")]
    AlreadySatisfied { action: ActionKind, stage: Stage },
}

impl GuardError {
    pub fn stage(&self) -> Stage {
        match self {
            GuardError::Unauthorized { stage, .. }
            | GuardError::InvalidStage { stage, .. }
            | GuardError::AlreadySatisfied { stage, .. } => *stage,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("failed to encode deal: {0}")]
    Encode(#[from] minicbor::encode::Error<std::convert::Infallible>),
    #[error("failed to decode deal: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("deal {0} already exists")]
    AlreadyExists(DealId),
    #[error("deal store lock poisoned")]
    Poisoned,
}

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Deal {0} not found")]
    NotFound(DealId),
    #[error("Version conflict on deal {deal_id}: expected {expected}, found {actual:?}")]
    Conflict {
        deal_id: DealId,
        expected: u64,
        actual: Option<u64>,
    },
    #[error(transparent)]
    Rejected(#[from] GuardError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Role lookup failed for {actor}: {reason}")]
    RoleLookup { actor: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Failed to mint deal identifier: {0}")]
    Identifier(String),
}

/// Flat classification of [`EngineError`] for callers that only branch on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthorized,
    InvalidStage,
    AlreadySatisfied,
    Conflict,
    ValidationError,
    NotFound,
    Internal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Conflict { .. } => ErrorKind::Conflict,
            EngineError::Rejected(GuardError::Unauthorized { .. }) => ErrorKind::Unauthorized,
            EngineError::Rejected(GuardError::InvalidStage { .. }) => ErrorKind::InvalidStage,
            EngineError::Rejected(GuardError::AlreadySatisfied { .. }) => {
                ErrorKind::AlreadySatisfied
            }
            EngineError::Validation(_) => ErrorKind::ValidationError,
            EngineError::RoleLookup { .. }
            | EngineError::Store(_)
            | EngineError::Identifier(_) => ErrorKind::Internal,
        }
    }

    /// A rejected repeat of a review or credential submission; the caller may
    /// treat it as success. Approve/Reject never report this.
    pub fn is_idempotent_noop(&self) -> bool {
        matches!(
            self,
            EngineError::Rejected(GuardError::AlreadySatisfied {
                action: ActionKind::SubmitPeerReview(_) | ActionKind::SetClientCredentials,
                ..
            })
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deal::ReviewSlot;

    #[test]
    fn only_review_and_credential_repeats_are_noops() {
        let repeat_review = EngineError::Rejected(GuardError::AlreadySatisfied {
            action: ActionKind::SubmitPeerReview(ReviewSlot::Second),
            stage: Stage::Completed,
        });
        let repeat_approve = EngineError::Rejected(GuardError::AlreadySatisfied {
            action: ActionKind::Approve,
            stage: Stage::AwaitingSalesmanReport,
        });

        assert!(repeat_review.is_idempotent_noop());
        assert!(!repeat_approve.is_idempotent_noop());
        assert_eq!(repeat_approve.kind(), ErrorKind::AlreadySatisfied);
    }

    #[test]
    fn store_failures_are_internal() {
        let err = EngineError::from(StoreError::Poisoned);
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.is_conflict());
    }

    #[test]
    fn guard_refusal_reports_its_stage() {
        let err = GuardError::InvalidStage {
            action: ActionKind::SubmitSalesmanReport,
            stage: Stage::PendingApproval,
            applicable: vec![Stage::AwaitingSalesmanReport],
        };
        assert_eq!(err.stage(), Stage::PendingApproval);
        assert!(err.to_string().contains("AwaitingSalesmanReport"));
    }
}
