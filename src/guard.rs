//! Transition guard.
//!
//! Everything here is pure. [`decide`] looks only at the deal snapshot, the
//! caller's roles and the requested action, and answers with the stage the
//! deal should move to plus the fields the transition sets, or with the
//! reason it is refused. Authorization lives in one static table, [`RULES`],
//! which the work queue listing consults as well.
use super::deal::{Deal, Decision as ApprovalDecision, ReviewSlot, Stage};
use super::error::GuardError;
use super::roles::{Role, RoleSet};
use std::fmt;

/// Every kind of transition, external or automatic, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum ActionKind {
    #[n(0)]
    SubmitForApproval,
    #[n(1)]
    Approve,
    #[n(2)]
    Reject,
    #[n(3)]
    MarkClientAccountCreated,
    #[n(4)]
    SubmitSalesmanReport,
    #[n(5)]
    SubmitPeerReview(#[n(0)] ReviewSlot),
    #[n(6)]
    SetClientCredentials,
    #[n(7)]
    Promote,
    #[n(8)]
    Abort,
    #[n(9)]
    Create,
}

impl ActionKind {
    /// Taken by the engine itself, never requested by an actor.
    pub fn is_automatic(self) -> bool {
        matches!(self, ActionKind::SubmitForApproval | ActionKind::Promote)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::SubmitPeerReview(slot) => write!(f, "SubmitPeerReview({slot})"),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

/// An action requested by an actor, with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Approve { notes: String },
    Reject { notes: String },
    MarkClientAccountCreated,
    SubmitSalesmanReport {
        text: String,
        attachments: Vec<String>,
    },
    SubmitPeerReview { slot: ReviewSlot, text: String },
    SetClientCredentials { username: String },
    Abort { reason: String },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Approve { .. } => ActionKind::Approve,
            Action::Reject { .. } => ActionKind::Reject,
            Action::MarkClientAccountCreated => ActionKind::MarkClientAccountCreated,
            Action::SubmitSalesmanReport { .. } => ActionKind::SubmitSalesmanReport,
            Action::SubmitPeerReview { slot, .. } => ActionKind::SubmitPeerReview(*slot),
            Action::SetClientCredentials { .. } => ActionKind::SetClientCredentials,
            Action::Abort { .. } => ActionKind::Abort,
        }
    }
}

/// Fields a transition writes onto the deal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate {
    None,
    ApprovalResolved {
        decision: ApprovalDecision,
        notes: String,
    },
    ClientAccountCreated,
    SalesmanReport {
        text: String,
        attachments: Vec<String>,
    },
    PeerReview {
        slot: ReviewSlot,
        text: String,
    },
    ClientCredentials {
        username: String,
    },
    Aborted {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: ActionKind,
    pub from: Stage,
    pub next_stage: Stage,
    pub update: FieldUpdate,
}

/// One row of the authorization table.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub stage: Stage,
    pub action: ActionKind,
    pub roles: &'static [Role], // empty for automatic edges
    pub to: Stage,
}

const fn rule(stage: Stage, action: ActionKind, roles: &'static [Role], to: Stage) -> Rule {
    Rule {
        stage,
        action,
        roles,
        to,
    }
}

const APPROVER: &[Role] = &[Role::Approver];
const ACCOUNT_ADMIN: &[Role] = &[Role::AccountAdministrator];
const ENGINE: &[Role] = &[];

/// `(stage, action) -> roles, next stage`. The only authorization source.
pub static RULES: &[Rule] = &[
    rule(
        Stage::Created,
        ActionKind::SubmitForApproval,
        ENGINE,
        Stage::PendingApproval,
    ),
    rule(
        Stage::PendingApproval,
        ActionKind::Reject,
        APPROVER,
        Stage::Rejected,
    ),
    rule(
        Stage::PendingApproval,
        ActionKind::Approve,
        APPROVER,
        Stage::AwaitingClientAccountCreation,
    ),
    rule(
        Stage::AwaitingClientAccountCreation,
        ActionKind::MarkClientAccountCreated,
        ACCOUNT_ADMIN,
        Stage::AwaitingSalesmanReport,
    ),
    rule(
        Stage::AwaitingSalesmanReport,
        ActionKind::SubmitSalesmanReport,
        &[Role::AssignedSalesman],
        Stage::AwaitingReviewsAndCredentials,
    ),
    rule(
        Stage::AwaitingReviewsAndCredentials,
        ActionKind::SubmitPeerReview(ReviewSlot::First),
        &[Role::FirstReviewer],
        Stage::AwaitingReviewsAndCredentials,
    ),
    rule(
        Stage::AwaitingReviewsAndCredentials,
        ActionKind::SubmitPeerReview(ReviewSlot::Second),
        &[Role::SecondReviewer],
        Stage::AwaitingReviewsAndCredentials,
    ),
    rule(
        Stage::AwaitingReviewsAndCredentials,
        ActionKind::SetClientCredentials,
        ACCOUNT_ADMIN,
        Stage::AwaitingReviewsAndCredentials,
    ),
    rule(
        Stage::AwaitingReviewsAndCredentials,
        ActionKind::Promote,
        ENGINE,
        Stage::Completed,
    ),
    rule(Stage::Created, ActionKind::Abort, APPROVER, Stage::Failed),
    rule(
        Stage::PendingApproval,
        ActionKind::Abort,
        APPROVER,
        Stage::Failed,
    ),
    rule(
        Stage::AwaitingClientAccountCreation,
        ActionKind::Abort,
        APPROVER,
        Stage::Failed,
    ),
    rule(
        Stage::AwaitingSalesmanReport,
        ActionKind::Abort,
        APPROVER,
        Stage::Failed,
    ),
    rule(
        Stage::AwaitingReviewsAndCredentials,
        ActionKind::Abort,
        APPROVER,
        Stage::Failed,
    ),
];

/// Roles allowed to open a new deal.
pub const CREATORS: &[Role] = &[Role::SalesManager, Role::Salesman];

pub fn find_rule(stage: Stage, action: ActionKind) -> Option<&'static Rule> {
    RULES
        .iter()
        .find(|r| r.stage == stage && r.action == action)
}

/// True when some row of the table moves a deal from `from` to `to`.
pub fn is_legal_edge(from: Stage, to: Stage) -> bool {
    RULES.iter().any(|r| r.stage == from && r.to == to)
}

fn holds_any(roles: &RoleSet, required: &[Role]) -> bool {
    required.iter().any(|r| roles.contains(r))
}

/// Whether the field this action writes is already on the deal.
pub fn already_satisfied(deal: &Deal, action: ActionKind) -> bool {
    match action {
        ActionKind::SubmitForApproval => deal.stage != Stage::Created,
        ActionKind::Approve | ActionKind::Reject => deal.approval.is_some(),
        ActionKind::MarkClientAccountCreated => deal.client_account_created_at.is_some(),
        ActionKind::SubmitSalesmanReport => deal.salesman_report.is_some(),
        ActionKind::SubmitPeerReview(slot) => deal.review(slot).is_some(),
        ActionKind::SetClientCredentials => deal.client_credentials.is_some(),
        ActionKind::Promote => deal.stage == Stage::Completed,
        ActionKind::Abort => deal.abort.is_some(),
        ActionKind::Create => true,
    }
}

/// Opening a deal needs a sales role; there is no stage to check yet.
pub fn authorize_creation(roles: &RoleSet) -> Result<(), GuardError> {
    if holds_any(roles, CREATORS) {
        return Ok(());
    }
    Err(GuardError::Unauthorized {
        action: ActionKind::Create,
        stage: Stage::Created,
        required: CREATORS.to_vec(),
    })
}

/// Authorization and applicability of `action` for `roles` on `deal`,
/// answering with the stage the deal would move to.
pub fn check(deal: &Deal, roles: &RoleSet, action: ActionKind) -> Result<Stage, GuardError> {
    let stage = deal.stage;

    let Some(rule) = find_rule(stage, action) else {
        let rows: Vec<&Rule> = RULES.iter().filter(|r| r.action == action).collect();
        let mut required: Vec<Role> = rows.iter().flat_map(|r| r.roles.iter().copied()).collect();
        required.sort();
        required.dedup();

        if !holds_any(roles, &required) {
            return Err(GuardError::Unauthorized {
                action,
                stage,
                required,
            });
        }
        if already_satisfied(deal, action) {
            return Err(GuardError::AlreadySatisfied { action, stage });
        }
        return Err(GuardError::InvalidStage {
            action,
            stage,
            applicable: rows.iter().map(|r| r.stage).collect(),
        });
    };

    if !holds_any(roles, rule.roles) {
        return Err(GuardError::Unauthorized {
            action,
            stage,
            required: rule.roles.to_vec(),
        });
    }
    if already_satisfied(deal, action) {
        return Err(GuardError::AlreadySatisfied { action, stage });
    }

    Ok(rule.to)
}

/// Decide an actor's requested action against the deal snapshot.
pub fn decide(deal: &Deal, roles: &RoleSet, action: Action) -> Result<Decision, GuardError> {
    let kind = action.kind();
    let next_stage = check(deal, roles, kind)?;

    let update = match action {
        Action::Approve { notes } => FieldUpdate::ApprovalResolved {
            decision: ApprovalDecision::Approved,
            notes,
        },
        Action::Reject { notes } => FieldUpdate::ApprovalResolved {
            decision: ApprovalDecision::Rejected,
            notes,
        },
        Action::MarkClientAccountCreated => FieldUpdate::ClientAccountCreated,
        Action::SubmitSalesmanReport { text, attachments } => {
            FieldUpdate::SalesmanReport { text, attachments }
        }
        Action::SubmitPeerReview { slot, text } => FieldUpdate::PeerReview { slot, text },
        Action::SetClientCredentials { username } => FieldUpdate::ClientCredentials { username },
        Action::Abort { reason } => FieldUpdate::Aborted { reason },
    };

    Ok(Decision {
        action: kind,
        from: deal.stage,
        next_stage,
        update,
    })
}

/// The automatic edge the deal is ready to take, if any.
///
/// `Created` always moves on to approval; the review stage moves to
/// `Completed` once both reviews (or the only one) and the credentials are in.
pub fn next_automatic(deal: &Deal) -> Option<Decision> {
    let action = match deal.stage {
        Stage::Created => ActionKind::SubmitForApproval,
        Stage::AwaitingReviewsAndCredentials if deal.reviews_and_credentials_complete() => {
            ActionKind::Promote
        }
        _ => return None,
    };
    let rule = find_rule(deal.stage, action)?;

    Some(Decision {
        action,
        from: deal.stage,
        next_stage: rule.to,
        update: FieldUpdate::None,
    })
}

/// Actor-requestable actions `roles` could take on `deal` right now.
pub fn permitted_actions(deal: &Deal, roles: &RoleSet) -> Vec<ActionKind> {
    RULES
        .iter()
        .filter(|r| r.stage == deal.stage && !r.action.is_automatic())
        .filter(|r| check(deal, roles, r.action).is_ok())
        .map(|r| r.action)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deal::{ClientCredentials, DealDraft, DealId, PeerReview, TimeStamp};

    fn deal_at(stage: Stage) -> Deal {
        let (details, assignment) = DealDraft::new()
            .set_client("C1", "Acme Ltd")
            .set_deal_value(50_000)
            .set_expected_close_date(TimeStamp::new())
            .set_salesman("sam".into())
            .set_first_reviewer("rita".into())
            .set_second_reviewer("ravi".into())
            .validate_and_finalise()
            .unwrap();
        let mut deal = Deal::new(
            DealId::new("deal_x"),
            details,
            assignment,
            "mgr".into(),
            TimeStamp::new(),
        );
        deal.stage = stage;
        deal
    }

    fn roles(rs: &[Role]) -> RoleSet {
        rs.iter().copied().collect()
    }

    fn review(who: &str) -> PeerReview {
        PeerReview {
            reviewer_id: who.into(),
            text: "fine".into(),
            submitted_at: TimeStamp::new(),
        }
    }

    #[test]
    fn approver_can_approve_pending_deal() {
        let deal = deal_at(Stage::PendingApproval);
        let decision = decide(
            &deal,
            &roles(&[Role::Approver]),
            Action::Approve {
                notes: "looks good".into(),
            },
        )
        .unwrap();

        assert_eq!(decision.next_stage, Stage::AwaitingClientAccountCreation);
        assert_eq!(
            decision.update,
            FieldUpdate::ApprovalResolved {
                decision: ApprovalDecision::Approved,
                notes: "looks good".into()
            }
        );
    }

    #[test]
    fn any_held_role_is_enough() {
        let deal = deal_at(Stage::PendingApproval);
        let held = roles(&[Role::Salesman, Role::SalesManager, Role::Approver]);
        assert_eq!(
            check(&deal, &held, ActionKind::Reject).unwrap(),
            Stage::Rejected
        );
    }

    #[test]
    fn non_approver_is_unauthorized() {
        let deal = deal_at(Stage::PendingApproval);
        let err = check(&deal, &roles(&[Role::SalesManager]), ActionKind::Approve).unwrap_err();
        assert_eq!(
            err,
            GuardError::Unauthorized {
                action: ActionKind::Approve,
                stage: Stage::PendingApproval,
                required: vec![Role::Approver],
            }
        );
    }

    #[test]
    fn report_before_account_creation_is_invalid_stage() {
        let deal = deal_at(Stage::AwaitingClientAccountCreation);
        let err = check(
            &deal,
            &roles(&[Role::AssignedSalesman]),
            ActionKind::SubmitSalesmanReport,
        )
        .unwrap_err();
        assert_eq!(
            err,
            GuardError::InvalidStage {
                action: ActionKind::SubmitSalesmanReport,
                stage: Stage::AwaitingClientAccountCreation,
                applicable: vec![Stage::AwaitingSalesmanReport],
            }
        );
    }

    #[test]
    fn repeated_review_is_already_satisfied() {
        let mut deal = deal_at(Stage::AwaitingReviewsAndCredentials);
        deal.first_review = Some(review("rita"));

        let err = check(
            &deal,
            &roles(&[Role::FirstReviewer]),
            ActionKind::SubmitPeerReview(ReviewSlot::First),
        )
        .unwrap_err();
        assert!(matches!(err, GuardError::AlreadySatisfied { .. }));

        // the other slot is unaffected
        assert!(
            check(
                &deal,
                &roles(&[Role::SecondReviewer]),
                ActionKind::SubmitPeerReview(ReviewSlot::Second),
            )
            .is_ok()
        );
    }

    #[test]
    fn repeated_review_after_completion_is_still_already_satisfied() {
        let mut deal = deal_at(Stage::Completed);
        deal.first_review = Some(review("rita"));
        let err = check(
            &deal,
            &roles(&[Role::FirstReviewer]),
            ActionKind::SubmitPeerReview(ReviewSlot::First),
        )
        .unwrap_err();
        assert!(matches!(err, GuardError::AlreadySatisfied { .. }));
    }

    #[test]
    fn reviewer_cannot_fill_the_other_slot() {
        let deal = deal_at(Stage::AwaitingReviewsAndCredentials);
        let err = check(
            &deal,
            &roles(&[Role::FirstReviewer]),
            ActionKind::SubmitPeerReview(ReviewSlot::Second),
        )
        .unwrap_err();
        assert!(matches!(err, GuardError::Unauthorized { .. }));
    }

    #[test]
    fn automatic_edges_cannot_be_requested() {
        let deal = deal_at(Stage::Created);
        let everyone = roles(&[
            Role::SalesManager,
            Role::Salesman,
            Role::Approver,
            Role::AccountAdministrator,
        ]);
        assert!(matches!(
            check(&deal, &everyone, ActionKind::SubmitForApproval),
            Err(GuardError::Unauthorized { .. })
        ));
    }

    #[test]
    fn abort_applies_to_open_stages_only() {
        let approver = roles(&[Role::Approver]);
        for stage in Stage::ALL {
            let result = check(&deal_at(stage), &approver, ActionKind::Abort);
            if stage.is_terminal() {
                assert!(matches!(result, Err(GuardError::InvalidStage { .. })));
            } else {
                assert_eq!(result.unwrap(), Stage::Failed);
            }
        }
    }

    #[test]
    fn promotion_waits_for_every_gate() {
        let mut deal = deal_at(Stage::AwaitingReviewsAndCredentials);
        assert!(next_automatic(&deal).is_none());

        deal.first_review = Some(review("rita"));
        deal.client_credentials = Some(ClientCredentials {
            username: "acme".into(),
            set_at: TimeStamp::new(),
        });
        assert!(next_automatic(&deal).is_none());

        deal.second_review = Some(review("ravi"));
        let decision = next_automatic(&deal).unwrap();
        assert_eq!(decision.action, ActionKind::Promote);
        assert_eq!(decision.next_stage, Stage::Completed);
    }

    #[test]
    fn permitted_actions_follow_the_table() {
        let mut deal = deal_at(Stage::AwaitingReviewsAndCredentials);
        let admin = roles(&[Role::AccountAdministrator]);
        assert_eq!(
            permitted_actions(&deal, &admin),
            vec![ActionKind::SetClientCredentials]
        );

        deal.client_credentials = Some(ClientCredentials {
            username: "acme".into(),
            set_at: TimeStamp::new(),
        });
        assert!(permitted_actions(&deal, &admin).is_empty());
    }

    #[test]
    fn only_sales_roles_open_deals() {
        assert!(authorize_creation(&roles(&[Role::Salesman])).is_ok());
        assert!(authorize_creation(&roles(&[Role::SalesManager, Role::Approver])).is_ok());
        assert!(matches!(
            authorize_creation(&roles(&[Role::AccountAdministrator])),
            Err(GuardError::Unauthorized {
                action: ActionKind::Create,
                ..
            })
        ));
    }

    #[test]
    fn terminal_stages_have_no_outgoing_edges() {
        for from in Stage::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in Stage::ALL {
                assert!(!is_legal_edge(from, to));
            }
        }
    }
}
