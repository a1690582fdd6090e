//! Service layer API for deal workflow commands
//!
//! One method per command. Each resolves the caller's roles once, checks the
//! payload, and hands the action to the [`WorkflowEngine`]. Errors come back
//! as they are; a `Conflict` means reload and decide again, which
//! [`DealService::with_fresh_version`] does for callers that want it.
use super::config::WorkflowConfig;
use super::credentials::{ClientPassword, CredentialDelivery};
use super::deal::{ActorId, Deal, DealDraft, DealId, ReviewSlot, Stage};
use super::engine::WorkflowEngine;
use super::error::{EngineError, ValidationError};
use super::guard::Action;
use super::notify::NotificationDispatcher;
use super::query::{self, DealSummary};
use super::roles::{Actor, RoleProvider};
use super::store::{DealStore, SledDealStore};
use super::utils;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Approver's verdict on a pending deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approved,
    Rejected,
}

/// What a successful credential issuance hands back, exactly once.
#[derive(Debug)]
pub struct CredentialIssue {
    pub deal: Deal,
    pub username: String,
    pub password: ClientPassword,
    /// False when the delivery channel failed; the credentials are set either way.
    pub delivered: bool,
}

pub struct DealService {
    engine: WorkflowEngine,
    roles: Arc<dyn RoleProvider>,
    delivery: Arc<dyn CredentialDelivery>,
    config: WorkflowConfig,
}

impl DealService {
    pub fn new(
        store: Arc<dyn DealStore>,
        roles: Arc<dyn RoleProvider>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        delivery: Arc<dyn CredentialDelivery>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            engine: WorkflowEngine::new(store, dispatcher),
            roles,
            delivery,
            config,
        }
    }

    /// Service over the sled database at `config.db_path`.
    pub fn open(
        config: WorkflowConfig,
        roles: Arc<dyn RoleProvider>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        delivery: Arc<dyn CredentialDelivery>,
    ) -> Result<Self, EngineError> {
        let store = SledDealStore::open(&config.db_path)?;
        Ok(Self::new(
            Arc::new(store),
            roles,
            dispatcher,
            delivery,
            config,
        ))
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Look the caller up with the identity provider. Once per command.
    fn actor(&self, actor_id: &ActorId) -> Result<Actor, EngineError> {
        let roles = self
            .roles
            .roles_of(actor_id)
            .map_err(|e| EngineError::RoleLookup {
                actor: actor_id.to_string(),
                reason: format!("{e:#}"),
            })?;
        Ok(Actor::new(actor_id.clone(), roles))
    }

    pub fn get_deal(&self, deal_id: &DealId) -> Result<Deal, EngineError> {
        self.engine.load(deal_id)
    }

    pub fn create_deal(&self, actor_id: &ActorId, draft: DealDraft) -> Result<Deal, EngineError> {
        let actor = self.actor(actor_id)?;
        self.engine.create(draft, &actor)
    }

    pub fn submit_approval(
        &self,
        deal_id: &DealId,
        actor_id: &ActorId,
        expected_version: u64,
        verdict: Verdict,
        notes: &str,
    ) -> Result<Deal, EngineError> {
        let actor = self.actor(actor_id)?;
        let notes = notes.trim().to_owned();
        let action = match verdict {
            Verdict::Approved => Action::Approve { notes },
            Verdict::Rejected => {
                // a rejection has to say why
                if notes.is_empty() {
                    return Err(ValidationError::MissingField("notes").into());
                }
                Action::Reject { notes }
            }
        };
        self.engine
            .apply_transition(deal_id, expected_version, action, &actor)
    }

    pub fn mark_client_account_created(
        &self,
        deal_id: &DealId,
        actor_id: &ActorId,
        expected_version: u64,
    ) -> Result<Deal, EngineError> {
        let actor = self.actor(actor_id)?;
        self.engine.apply_transition(
            deal_id,
            expected_version,
            Action::MarkClientAccountCreated,
            &actor,
        )
    }

    pub fn submit_salesman_report(
        &self,
        deal_id: &DealId,
        actor_id: &ActorId,
        expected_version: u64,
        text: &str,
        attachments: Vec<String>,
    ) -> Result<Deal, EngineError> {
        let actor = self.actor(actor_id)?;
        let text = required_text(text, "report_text")?;
        if attachments.len() > self.config.max_report_attachments {
            return Err(ValidationError::TooManyAttachments {
                max: self.config.max_report_attachments,
                got: attachments.len(),
            }
            .into());
        }
        if attachments.iter().any(|a| a.trim().is_empty()) {
            return Err(ValidationError::MissingField("attachment").into());
        }

        self.engine.apply_transition(
            deal_id,
            expected_version,
            Action::SubmitSalesmanReport { text, attachments },
            &actor,
        )
    }

    pub fn submit_peer_review(
        &self,
        deal_id: &DealId,
        actor_id: &ActorId,
        expected_version: u64,
        slot: ReviewSlot,
        text: &str,
    ) -> Result<Deal, EngineError> {
        let actor = self.actor(actor_id)?;
        let text = required_text(text, "review_text")?;
        self.engine.apply_transition(
            deal_id,
            expected_version,
            Action::SubmitPeerReview { slot, text },
            &actor,
        )
    }

    /// Issue the client's login. When `password` is `None` one is generated.
    /// The password is delivered out of band after the transition commits and
    /// returned here once; it is never stored.
    pub fn set_client_credentials(
        &self,
        deal_id: &DealId,
        actor_id: &ActorId,
        expected_version: u64,
        username: &str,
        password: Option<String>,
    ) -> Result<CredentialIssue, EngineError> {
        let actor = self.actor(actor_id)?;
        let username = self.validate_username(username)?;
        let password = match password.map(ClientPassword::new) {
            Some(p) if p.len() < self.config.min_password_length => {
                return Err(ValidationError::PasswordTooShort {
                    min: self.config.min_password_length,
                }
                .into());
            }
            Some(p) => p,
            None => ClientPassword::new(utils::generate_password(
                self.config.generated_password_length,
            )),
        };

        let deal = self.engine.apply_transition(
            deal_id,
            expected_version,
            Action::SetClientCredentials {
                username: username.clone(),
            },
            &actor,
        )?;

        let delivered = match self.delivery.deliver(&deal.id, &username, &password) {
            Ok(()) => true,
            Err(err) => {
                warn!(deal_id = %deal.id, "credential delivery failed: {err:#}");
                false
            }
        };
        info!(deal_id = %deal.id, %username, delivered, "client credentials issued");

        Ok(CredentialIssue {
            deal,
            username,
            password,
            delivered,
        })
    }

    /// Move an open deal to `Failed`.
    pub fn abort_deal(
        &self,
        deal_id: &DealId,
        actor_id: &ActorId,
        expected_version: u64,
        reason: &str,
    ) -> Result<Deal, EngineError> {
        let actor = self.actor(actor_id)?;
        let reason = required_text(reason, "reason")?;
        self.engine
            .apply_transition(deal_id, expected_version, Action::Abort { reason }, &actor)
    }

    pub fn list_deals_for_actor(
        &self,
        actor_id: &ActorId,
        stage_filter: Option<Stage>,
    ) -> Result<Vec<DealSummary>, EngineError> {
        let actor = self.actor(actor_id)?;
        Ok(query::list_for_actor(
            self.engine.store(),
            &actor,
            stage_filter,
        )?)
    }

    /// Caller-side read-decide-write loop: reload the deal, run `attempt`
    /// against it, and go round again on `Conflict`, up to
    /// `max_conflict_retries` extra times. Nothing is cached between rounds.
    pub fn with_fresh_version<T>(
        &self,
        deal_id: &DealId,
        mut attempt: impl FnMut(&Deal) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut retries = 0;
        loop {
            let deal = self.engine.load(deal_id)?;
            match attempt(&deal) {
                Err(err) if err.is_conflict() && retries < self.config.max_conflict_retries => {
                    retries += 1;
                    debug!(%deal_id, retries, "conflict, reloading");
                }
                other => return other,
            }
        }
    }

    fn validate_username(&self, username: &str) -> Result<String, ValidationError> {
        let username = username.trim();
        if username.len() < self.config.min_username_length {
            return Err(ValidationError::UsernameTooShort {
                min: self.config.min_username_length,
            });
        }
        let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
        if !username.chars().all(allowed) {
            return Err(ValidationError::InvalidUsername);
        }
        Ok(username.to_owned())
    }
}

fn required_text(text: &str, field: &'static str) -> Result<String, ValidationError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(text.to_owned())
}
