//! Role scoped work queues.
//!
//! A deal shows up for an actor only if the guard would let that actor do
//! something to it right now. This is a convenience for building queues; the
//! guard still has the final word when the action is attempted.
use super::deal::{Deal, DealId, Stage};
use super::error::StoreError;
use super::guard::{self, ActionKind};
use super::roles::Actor;
use super::store::DealStore;
use chrono::{TimeDelta, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealSummary {
    pub id: DealId,
    pub client_id: String,
    pub client_name: String,
    pub deal_value: u64,
    pub stage: Stage,
    pub version: u64,
    pub age: TimeDelta,
    /// What the actor can do to the deal at this version.
    pub actions: Vec<ActionKind>,
}

impl DealSummary {
    fn from_deal(deal: &Deal, actions: Vec<ActionKind>) -> Self {
        Self {
            id: deal.id.clone(),
            client_id: deal.details.client_id.clone(),
            client_name: deal.details.client_name.clone(),
            deal_value: deal.details.deal_value,
            stage: deal.stage,
            version: deal.version,
            age: Utc::now() - deal.created_at.to_datetime_utc(),
            actions,
        }
    }
}

/// Deals `actor` can act on, oldest first, optionally limited to one stage.
pub fn list_for_actor(
    store: &dyn DealStore,
    actor: &Actor,
    stage_filter: Option<Stage>,
) -> Result<Vec<DealSummary>, StoreError> {
    let mut queue: Vec<DealSummary> = store
        .scan()?
        .iter()
        .filter(|deal| stage_filter.is_none_or(|stage| deal.stage == stage))
        .filter_map(|deal| {
            let actions = guard::permitted_actions(deal, &actor.roles_for(deal));
            (!actions.is_empty()).then(|| DealSummary::from_deal(deal, actions))
        })
        .collect();

    queue.sort_by(|a, b| b.age.cmp(&a.age).then_with(|| a.id.cmp(&b.id)));
    Ok(queue)
}
