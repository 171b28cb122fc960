use std::sync::Arc;

use anyhow::{Context, Result};
use shared::protocol::{CredentialsUpdate, TransportEvent};
use storage::{Session, SessionStore};
use tracing::{debug, warn};

use crate::event_source::Subscription;

/// Keeps the live session in step with credential rotation and persists it.
pub struct CredentialRotation {
    store: Arc<dyn SessionStore>,
    session: Session,
}

impl CredentialRotation {
    pub fn new(store: Arc<dyn SessionStore>, session: Session) -> Self {
        Self { store, session }
    }

    pub async fn apply(&mut self, update: &CredentialsUpdate) -> Result<()> {
        self.session.apply(update);
        self.store
            .save_credentials(&self.session.credentials)
            .await
            .context("failed to persist rotated credentials")?;
        self.store
            .save_keys(&update.keys)
            .await
            .context("failed to persist rotated keys")?;
        debug!(
            keys = update.keys.len(),
            registered = self.session.registered,
            "rotation: credentials persisted"
        );
        Ok(())
    }

    /// Runs until the subscription ends. Persistence failures are logged and
    /// never stop the loop.
    pub async fn run(mut self, mut subscription: Subscription) {
        while let Some(event) = subscription.recv().await {
            let TransportEvent::CredentialsUpdate(update) = event else {
                continue;
            };
            if let Err(err) = self.apply(&update).await {
                warn!("rotation: {err:#}");
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/rotation_tests.rs"]
mod tests;
