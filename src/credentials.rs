//! Client credential hand-off.
//!
//! The engine only ever stores the client username. The password exists in
//! memory long enough to be handed to the delivery channel and returned to
//! the caller once, and is wiped when dropped.
use super::deal::DealId;
use std::fmt;
use std::sync::Mutex;
use tracing::info;
use zeroize::Zeroizing;

#[derive(Clone, PartialEq, Eq)]
pub struct ClientPassword(Zeroizing<String>);

impl ClientPassword {
    pub fn new(password: String) -> Self {
        Self(Zeroizing::new(password))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ClientPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientPassword(***)")
    }
}

/// Out-of-band channel that gets the client's login to the client.
pub trait CredentialDelivery: Send + Sync {
    fn deliver(
        &self,
        deal_id: &DealId,
        username: &str,
        password: &ClientPassword,
    ) -> anyhow::Result<()>;
}

/// Delivery that records the hand-off in the log without the password.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDelivery;

impl CredentialDelivery for LogDelivery {
    fn deliver(
        &self,
        deal_id: &DealId,
        username: &str,
        _password: &ClientPassword,
    ) -> anyhow::Result<()> {
        info!(%deal_id, username, "client credentials handed to delivery");
        Ok(())
    }
}

/// Delivery that keeps what it was given, for tests and embedding.
#[derive(Debug, Default)]
pub struct RecordingDelivery {
    delivered: Mutex<Vec<(DealId, String, ClientPassword)>>,
    failing: bool,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            delivered: Mutex::default(),
            failing: true,
        }
    }

    pub fn delivered(&self) -> Vec<(DealId, String, ClientPassword)> {
        self.delivered.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

impl CredentialDelivery for RecordingDelivery {
    fn deliver(
        &self,
        deal_id: &DealId,
        username: &str,
        password: &ClientPassword,
    ) -> anyhow::Result<()> {
        if self.failing {
            anyhow::bail!("credential channel unavailable");
        }
        self.delivered
            .lock()
            .map_err(|_| anyhow::anyhow!("recording delivery lock poisoned"))?
            .push((deal_id.clone(), username.to_owned(), password.clone()));
        Ok(())
    }
}
