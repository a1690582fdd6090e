//! Smoke Screen Unit tests for deal workflow components
//!
//! These test are unit tests that span the codebase, testing behavior in
//! isolation from integration scenarios. These are intended as smoke-screen
//! and generally test the happy-path.
//!

use chrono::{Datelike, Timelike, Utc};
use deal_workflow::{
    deal::{ActorId, Deal, DealDraft, DealId, ReviewSlot, Stage, TimeStamp},
    error::ValidationError,
    guard::{self, ActionKind},
    roles::{Actor, Role},
    utils::new_uuid_to_bech32,
    witness::Witness,
};

fn full_draft() -> DealDraft {
    DealDraft::new()
        .set_client("C1", "Acme Ltd")
        .set_deal_value(50_000)
        .set_description("annual support")
        .set_expected_close_date(TimeStamp::new())
        .set_salesman(ActorId::new("sam"))
        .set_first_reviewer(ActorId::new("rita"))
        .set_second_reviewer(ActorId::new("ravi"))
}

// UTILS MODULE TESTS
#[cfg(test)]
mod utils_tests {
    use super::*;

    /// Test that new_uuid_to_bech32 generates valid bech32-encoded strings
    /// with the correct human-readable prefix
    #[test]
    fn generates_valid_bech32_with_hrp() {
        let encoded = new_uuid_to_bech32("deal_").unwrap();
        assert!(encoded.starts_with("deal_1"));
        assert!(encoded.len() > 10);
    }

    /// Test that generated deal ids are unique
    #[test]
    fn generates_unique_deal_ids() {
        let id1 = DealId::generate().unwrap();
        let id2 = DealId::generate().unwrap();

        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("deal_"));
    }
}

// DEAL MODULE TESTS
#[cfg(test)]
mod deal_tests {
    use super::*;

    /// Test that TimeStamp::new_with creates the requested instant
    #[test]
    fn timestamp_new_with_creates_specific_time() {
        let ts = TimeStamp::new_with(2024, 6, 15, 10, 30, 0).unwrap();
        let dt = ts.to_datetime_utc();

        assert_eq!(dt.year(), 2024);
        assert_eq!(dt.month(), 6);
        assert_eq!(dt.day(), 15);
        assert_eq!(dt.hour(), 10);
        assert_eq!(dt.minute(), 30);
    }

    /// Test that impossible dates are refused rather than panicking
    #[test]
    fn timestamp_new_with_rejects_invalid_date() {
        assert!(TimeStamp::new_with(2024, 2, 30, 0, 0, 0).is_none());
    }

    /// Test that TimeStamp CBOR encoding/decoding round-trips correctly
    #[test]
    fn timestamp_cbor_roundtrip() {
        let original = TimeStamp::new();

        let encoded = minicbor::to_vec(&original).unwrap();
        let decoded: TimeStamp<Utc> = minicbor::decode(&encoded).unwrap();

        assert_eq!(original, decoded);
    }

    /// Test that a fully populated draft validates
    #[test]
    fn draft_builder_sets_fields() {
        let (details, assignment) = full_draft().validate_and_finalise().unwrap();

        assert_eq!(details.client_name, "Acme Ltd");
        assert_eq!(details.deal_value, 50_000);
        assert_eq!(assignment.salesman_id, ActorId::new("sam"));
        assert_eq!(assignment.second_reviewer_id, Some(ActorId::new("ravi")));
    }

    /// Test that the salesman cannot review their own deal
    #[test]
    fn draft_rejects_salesman_as_reviewer() {
        let err = full_draft()
            .set_first_reviewer(ActorId::new("sam"))
            .validate_and_finalise()
            .unwrap_err();

        assert_eq!(err, ValidationError::ReviewerIsSalesman);
    }

    /// Test that a missing salesman is reported by field name
    #[test]
    fn draft_rejects_missing_salesman() {
        let err = DealDraft::new()
            .set_client("C1", "Acme Ltd")
            .set_deal_value(1)
            .set_expected_close_date(TimeStamp::new())
            .set_first_reviewer(ActorId::new("rita"))
            .validate_and_finalise()
            .unwrap_err();

        assert!(matches!(err, ValidationError::MissingField(_)));
    }

    /// Test that legacy status strings land on the current stages
    #[test]
    fn stage_parsing_normalises_spelling() {
        assert_eq!(
            "pending_approval".parse::<Stage>().unwrap(),
            Stage::PendingApproval
        );
        assert_eq!(
            "PendingManagerApproval".parse::<Stage>().unwrap(),
            Stage::PendingApproval
        );
        assert_eq!(
            "awaiting-reviews-and-credentials".parse::<Stage>().unwrap(),
            Stage::AwaitingReviewsAndCredentials
        );
        assert!("archived".parse::<Stage>().is_err());

        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
    }

    /// Test that a deal round-trips through CBOR with its history
    #[test]
    fn deal_cbor_roundtrip() {
        let (details, assignment) = full_draft().validate_and_finalise().unwrap();
        let mut deal = Deal::new(
            DealId::new("deal_x"),
            details,
            assignment,
            ActorId::new("mgr"),
            TimeStamp::new(),
        );
        deal.history.push(Witness::new(
            1,
            None,
            Stage::Created,
            Stage::PendingApproval,
            ActionKind::SubmitForApproval,
            TimeStamp::new(),
        ));

        let encoded = minicbor::to_vec(&deal).unwrap();
        let decoded: Deal = minicbor::decode(&encoded).unwrap();
        assert_eq!(deal, decoded);
    }
}

// GUARD MODULE TESTS
#[cfg(test)]
mod guard_tests {
    use super::*;

    /// Test that every stage other than the terminal ones can be left
    #[test]
    fn only_terminal_stages_have_no_outgoing_edges() {
        for from in Stage::ALL {
            let leaves = Stage::ALL
                .iter()
                .any(|to| *to != from && guard::is_legal_edge(from, *to));
            assert_eq!(leaves, !from.is_terminal(), "stage {from}");
        }
    }

    /// Test that the review stage self-loops are part of the table
    #[test]
    fn review_stage_self_loops_are_legal() {
        assert!(guard::is_legal_edge(
            Stage::AwaitingReviewsAndCredentials,
            Stage::AwaitingReviewsAndCredentials
        ));
        assert!(!guard::is_legal_edge(Stage::PendingApproval, Stage::Completed));
    }

    /// Test that creation needs a sales role
    #[test]
    fn creation_needs_sales_role() {
        let manager = Actor::new(ActorId::new("mgr"), [Role::SalesManager]);
        let approver = Actor::new(ActorId::new("boss"), [Role::Approver]);

        assert!(guard::authorize_creation(&manager.roles).is_ok());
        assert!(guard::authorize_creation(&approver.roles).is_err());
    }

    /// Test that contextual roles come from the deal, not the directory
    #[test]
    fn contextual_roles_follow_the_assignment() {
        let (details, assignment) = full_draft().validate_and_finalise().unwrap();
        let deal = Deal::new(
            DealId::new("deal_x"),
            details,
            assignment,
            ActorId::new("mgr"),
            TimeStamp::new(),
        );

        // a directory cannot hand these out
        let ravi = Actor::new(ActorId::new("ravi"), [Role::FirstReviewer, Role::Salesman]);
        let roles = ravi.roles_for(&deal);

        assert!(roles.contains(&Role::SecondReviewer));
        assert!(!roles.contains(&Role::FirstReviewer));
        assert_eq!(deal.reviewer_for(ReviewSlot::Second), Some(&ravi.id));
    }
}

// WITNESS MODULE TESTS
#[cfg(test)]
mod witness_tests {
    use super::*;

    /// Test that engine-taken edges are marked as automatic
    #[test]
    fn witness_without_actor_is_automatic() {
        let w = Witness::new(
            8,
            None,
            Stage::AwaitingReviewsAndCredentials,
            Stage::Completed,
            ActionKind::Promote,
            TimeStamp::new(),
        );

        assert!(w.is_automatic());
        assert!(w.to_string().contains("engine"));
    }
}
