//! Per-deal transition history.
//!
//! Every accepted transition appends exactly one [`Witness`] to the deal. The
//! witness set is the audit trail for terminal deals and is what the property
//! tests walk to check that only legal edges were ever taken.
use super::deal::{ActorId, Stage, TimeStamp};
use super::guard::ActionKind;
use chrono::Utc;
use std::fmt;

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct Witness {
    #[n(0)]
    pub version: u64, // version of the deal after this transition
    #[n(1)]
    pub actor: Option<ActorId>, // None for automatic transitions
    #[n(2)]
    pub from: Stage,
    #[n(3)]
    pub to: Stage,
    #[n(4)]
    pub action: ActionKind,
    #[n(5)]
    pub timestamp_utc: TimeStamp<Utc>,
}

impl Witness {
    pub fn new(
        version: u64,
        actor: Option<ActorId>,
        from: Stage,
        to: Stage,
        action: ActionKind,
        timestamp_utc: TimeStamp<Utc>,
    ) -> Self {
        Self {
            version,
            actor,
            from,
            to,
            action,
            timestamp_utc,
        }
    }

    pub fn is_automatic(&self) -> bool {
        self.actor.is_none()
    }
}

impl fmt::Display for Witness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let actor = self.actor.as_ref().map(ActorId::as_str).unwrap_or("engine");
        write!(
            f,
            "v{} {} -> {} {} by {} at {}",
            self.version,
            self.from,
            self.to,
            self.action,
            actor,
            self.timestamp_utc.to_datetime_utc().to_rfc3339()
        )
    }
}
