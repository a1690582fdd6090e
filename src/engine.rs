//! Workflow engine, the only writer of deal records.
//!
//! A transition is load, version check, guard, compute, one conditional
//! write. Nothing is retried here: a lost race comes back as
//! [`EngineError::Conflict`] and the caller decides whether to reload and try
//! again. Automatic edges (`Created -> PendingApproval` and the promotion to
//! `Completed`) are folded into the same write as the transition that makes
//! them due, each with its own version bump and witness.
use super::deal::{
    AbortRecord, ActorId, ApprovalRecord, ClientCredentials, Deal, DealDraft, DealId, PeerReview,
    ReviewSlot, SalesmanReport, Stage, TimeStamp,
};
use super::error::EngineError;
use super::guard::{self, Action, ActionKind, FieldUpdate};
use super::notify::{self, NotificationDispatcher};
use super::roles::Actor;
use super::store::{CasOutcome, DealStore};
use super::witness::Witness;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub struct WorkflowEngine {
    store: Arc<dyn DealStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn DealStore>, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub fn store(&self) -> &dyn DealStore {
        self.store.as_ref()
    }

    /// Fresh read of a deal. Never cached.
    pub fn load(&self, deal_id: &DealId) -> Result<Deal, EngineError> {
        self.store
            .get(deal_id)?
            .ok_or_else(|| EngineError::NotFound(deal_id.clone()))
    }

    /// Validate `draft`, store it as a new deal at version 0 and let it take
    /// its automatic edge to approval.
    #[instrument(skip_all, fields(actor = %creator.id))]
    pub fn create(&self, draft: DealDraft, creator: &Actor) -> Result<Deal, EngineError> {
        guard::authorize_creation(&creator.roles)?;
        let (details, assignment) = draft.validate_and_finalise()?;

        let id = DealId::generate().map_err(|e| EngineError::Identifier(format!("{e:#}")))?;
        let deal = Deal::new(
            id,
            details,
            assignment,
            creator.id.clone(),
            TimeStamp::new(),
        );
        self.store.insert_new(&deal)?;
        info!(deal_id = %deal.id, client = %deal.details.client_id, "deal created");

        self.commit(deal, None)
    }

    /// Apply an actor's action to the deal they last saw at `expected_version`.
    #[instrument(
        skip(self, action, actor),
        fields(action = %action.kind(), actor = %actor.id)
    )]
    pub fn apply_transition(
        &self,
        deal_id: &DealId,
        expected_version: u64,
        action: Action,
        actor: &Actor,
    ) -> Result<Deal, EngineError> {
        let current = self.load(deal_id)?;
        if current.version != expected_version {
            debug!(actual = current.version, "stale version");
            return Err(EngineError::Conflict {
                deal_id: deal_id.clone(),
                expected: expected_version,
                actual: Some(current.version),
            });
        }

        let roles = actor.roles_for(&current);
        let decision = guard::decide(&current, &roles, action).inspect_err(|err| {
            debug!(stage = %current.stage, "guard refused: {err}");
        })?;

        let mut next = current;
        let at = next_timestamp(&next);
        apply_update(&mut next, decision.update, &actor.id, &at);
        record(
            &mut next,
            decision.action,
            decision.next_stage,
            Some(actor.id.clone()),
            at,
        );

        self.commit(next, Some(expected_version))
    }

    /// Take any due automatic edges, then write `next` conditioned on
    /// `expected_version` (or on the freshly inserted version 0) and notify.
    fn commit(&self, mut next: Deal, expected_version: Option<u64>) -> Result<Deal, EngineError> {
        let base = expected_version.unwrap_or(next.version);
        while let Some(auto) = guard::next_automatic(&next) {
            let at = next_timestamp(&next);
            record(&mut next, auto.action, auto.next_stage, None, at);
        }
        if next.version == base {
            return Ok(next);
        }

        match self.store.cas_write(&next.id, base, &next)? {
            CasOutcome::Written => {}
            CasOutcome::VersionConflict { actual } => {
                debug!(deal_id = %next.id, expected = base, actual, "lost write race");
                return Err(EngineError::Conflict {
                    deal_id: next.id,
                    expected: base,
                    actual: Some(actual),
                });
            }
            CasOutcome::Missing => return Err(EngineError::NotFound(next.id)),
        }

        info!(
            deal_id = %next.id,
            version = next.version,
            stage = %next.stage,
            "transition committed"
        );
        self.announce(&next, base);
        Ok(next)
    }

    /// Best effort fan-out for every stage entered after `since_version`.
    fn announce(&self, deal: &Deal, since_version: u64) {
        for witness in deal.history.iter().filter(|w| w.version > since_version) {
            let events = notify::fan_out(witness.from, witness.to, witness.version, deal);
            notify::dispatch(self.dispatcher.as_ref(), &events);
        }
    }
}

/// "Now", but never earlier than anything already on the deal.
fn next_timestamp(deal: &Deal) -> TimeStamp<Utc> {
    std::cmp::max(TimeStamp::new(), deal.latest_timestamp().clone())
}

fn record(
    deal: &mut Deal,
    action: ActionKind,
    to: Stage,
    actor: Option<ActorId>,
    at: TimeStamp<Utc>,
) {
    let from = deal.stage;
    deal.version += 1;
    deal.stage = to;
    deal.history
        .push(Witness::new(deal.version, actor, from, to, action, at));
}

fn apply_update(deal: &mut Deal, update: FieldUpdate, actor: &ActorId, at: &TimeStamp<Utc>) {
    match update {
        FieldUpdate::None => {}
        FieldUpdate::ApprovalResolved { decision, notes } => {
            deal.approval = Some(ApprovalRecord {
                approver_id: actor.clone(),
                decision,
                notes,
                decided_at: at.clone(),
            });
        }
        FieldUpdate::ClientAccountCreated => {
            deal.client_account_created_at = Some(at.clone());
        }
        FieldUpdate::SalesmanReport { text, attachments } => {
            deal.salesman_report = Some(SalesmanReport {
                text,
                attachments,
                submitted_at: at.clone(),
            });
        }
        FieldUpdate::PeerReview { slot, text } => {
            let review = Some(PeerReview {
                reviewer_id: actor.clone(),
                text,
                submitted_at: at.clone(),
            });
            match slot {
                ReviewSlot::First => deal.first_review = review,
                ReviewSlot::Second => deal.second_review = review,
            }
        }
        FieldUpdate::ClientCredentials { username } => {
            deal.client_credentials = Some(ClientCredentials {
                username,
                set_at: at.clone(),
            });
        }
        FieldUpdate::Aborted { reason } => {
            deal.abort = Some(AbortRecord {
                aborted_by: actor.clone(),
                reason,
                aborted_at: at.clone(),
            });
        }
    }
}
