//! Notification fan-out.
//!
//! Who hears about a transition depends only on the stage the deal entered,
//! so the mapping is a static table ([`FAN_OUT`]) resolved against the deal's
//! assignment. Delivery is best effort: a failed send is logged and dropped,
//! it never undoes a committed transition.
use super::deal::{ActorId, Deal, DealId, Stage};
use super::roles::Role;
use std::fmt;
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Recipient {
    Role(Role),
    User(ActorId),
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Role(role) => write!(f, "role:{role}"),
            Recipient::User(id) => write!(f, "user:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealEvent {
    /// Stable across redeliveries so consumers can drop duplicates.
    pub event_id: String,
    pub deal_id: DealId,
    pub version: u64,
    pub from: Stage,
    pub to: Stage,
    pub client_name: String,
    pub deal_value: u64,
}

/// Outbound notification collaborator. Fire and forget from the engine's
/// point of view; an error only gets logged.
pub trait NotificationDispatcher: Send + Sync {
    fn notify(&self, recipient: &Recipient, event: &DealEvent) -> anyhow::Result<()>;
}

/// Audience entries in the fan-out table, resolved per deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Role(Role),
    Creator,
    AssignedSalesman,
    Reviewers,
}

pub static FAN_OUT: &[(Stage, &[Audience])] = &[
    (Stage::PendingApproval, &[Audience::Role(Role::Approver)]),
    (
        Stage::Rejected,
        &[Audience::Creator, Audience::AssignedSalesman],
    ),
    (
        Stage::AwaitingClientAccountCreation,
        &[
            Audience::Role(Role::AccountAdministrator),
            Audience::Creator,
        ],
    ),
    (Stage::AwaitingSalesmanReport, &[Audience::AssignedSalesman]),
    (
        Stage::AwaitingReviewsAndCredentials,
        &[
            Audience::Reviewers,
            Audience::Role(Role::AccountAdministrator),
        ],
    ),
    (
        Stage::Completed,
        &[Audience::Creator, Audience::AssignedSalesman],
    ),
    (Stage::Failed, &[Audience::Creator]),
];

/// Recipients for a deal entering `stage`, without duplicates.
pub fn recipients_for(stage: Stage, deal: &Deal) -> Vec<Recipient> {
    let audiences = FAN_OUT
        .iter()
        .find(|(s, _)| *s == stage)
        .map(|(_, a)| *a)
        .unwrap_or(&[]);

    let mut recipients = Vec::new();
    for audience in audiences {
        match audience {
            Audience::Role(role) => recipients.push(Recipient::Role(*role)),
            Audience::Creator => recipients.push(Recipient::User(deal.created_by.clone())),
            Audience::AssignedSalesman => {
                recipients.push(Recipient::User(deal.assignment.salesman_id.clone()))
            }
            Audience::Reviewers => {
                recipients.push(Recipient::User(deal.assignment.first_reviewer_id.clone()));
                if let Some(second) = &deal.assignment.second_reviewer_id {
                    recipients.push(Recipient::User(second.clone()));
                }
            }
        }
    }

    let mut seen = std::collections::HashSet::new();
    recipients.retain(|r| seen.insert(r.clone()));
    recipients
}

/// Events for the move `old -> new` that produced `version` of `deal`.
/// Self-loops enter no new stage and produce nothing.
pub fn fan_out(old: Stage, new: Stage, version: u64, deal: &Deal) -> Vec<(Recipient, DealEvent)> {
    if old == new {
        return vec![];
    }

    recipients_for(new, deal)
        .into_iter()
        .map(|recipient| {
            let event_id = sha256::digest(format!("{}/{}/{}", deal.id, version, recipient));
            let event = DealEvent {
                event_id,
                deal_id: deal.id.clone(),
                version,
                from: old,
                to: new,
                client_name: deal.details.client_name.clone(),
                deal_value: deal.details.deal_value,
            };
            (recipient, event)
        })
        .collect()
}

/// Send every event, logging failures. Returns how many were accepted.
pub fn dispatch(
    dispatcher: &dyn NotificationDispatcher,
    events: &[(Recipient, DealEvent)],
) -> usize {
    let mut sent = 0;
    for (recipient, event) in events {
        match dispatcher.notify(recipient, event) {
            Ok(()) => sent += 1,
            Err(err) => warn!(
                deal_id = %event.deal_id,
                version = event.version,
                %recipient,
                "notification dropped: {err:#}"
            ),
        }
    }
    sent
}

/// Dispatcher that only writes each notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    fn notify(&self, recipient: &Recipient, event: &DealEvent) -> anyhow::Result<()> {
        info!(
            %recipient,
            deal_id = %event.deal_id,
            stage = %event.to,
            event_id = %event.event_id,
            "deal notification"
        );
        Ok(())
    }
}

/// Dispatcher that keeps everything it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<(Recipient, DealEvent)>>,
    failing: bool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher whose every send fails.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            failing: true,
        }
    }

    pub fn sent(&self) -> Vec<(Recipient, DealEvent)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn notify(&self, recipient: &Recipient, event: &DealEvent) -> anyhow::Result<()> {
        if self.failing {
            anyhow::bail!("notification channel unavailable");
        }
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("recording dispatcher lock poisoned"))?
            .push((recipient.clone(), event.clone()));
        Ok(())
    }
}
