//! Token → actor resolution and token ownership.

use chrono::Utc;
use thiserror::Error;

use tillguard_auth::{Actor, CredentialToken, GroupRegistry, TokenRecord};
use tillguard_core::UserId;

use crate::store::{Persistence, StoreError};

/// Why a credential did not produce an actor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("User token '{0}' not recognised.")]
    Unrecognized(String),

    #[error("User '{0}' is not active.")]
    InactiveActor(String),

    #[error("unknown user {0}")]
    UnknownUser(UserId),

    #[error(transparent)]
    Persistence(#[from] StoreError),
}

/// Credential operations over a persistence backend.
///
/// Each call opens its own session and releases it before returning.
#[derive(Clone, Copy)]
pub struct CredentialStore<'a> {
    store: &'a dyn Persistence,
    groups: &'a GroupRegistry,
}

impl<'a> CredentialStore<'a> {
    pub fn new(store: &'a dyn Persistence, groups: &'a GroupRegistry) -> Self {
        Self { store, groups }
    }

    /// Resolve a presented token to a fresh persisted actor.
    ///
    /// A known token has its `last_seen` stamped even when the owner turns
    /// out to be disabled.
    pub fn resolve(&self, token: &CredentialToken) -> Result<Actor, CredentialError> {
        let mut session = self.store.session()?;
        let Some((mut record, owner)) = session.token_with_owner(token.as_str())? else {
            tracing::debug!(token = %token, "unrecognised token");
            return Err(CredentialError::Unrecognized(token.as_str().to_string()));
        };

        record.last_seen = Some(Utc::now());
        session.save_token(&record)?;
        session.commit()?;

        if !owner.enabled {
            return Err(CredentialError::InactiveActor(owner.full_name));
        }
        Ok(Actor::persisted(&owner, self.groups))
    }

    /// Give `token` to `user_id`, creating it or moving it from its previous owner.
    ///
    /// When moving an existing token a blank description keeps the old one.
    pub fn assign(
        &self,
        token: &CredentialToken,
        user_id: UserId,
        description: &str,
    ) -> Result<TokenRecord, CredentialError> {
        let mut session = self.store.session()?;
        if session.user(user_id)?.is_none() {
            return Err(CredentialError::UnknownUser(user_id));
        }

        let description = description.trim();
        let record = match session.token(token.as_str())? {
            Some(mut existing) => {
                if existing.user_id != user_id {
                    tracing::info!(
                        token = %token,
                        from = %existing.user_id,
                        to = %user_id,
                        "token reassigned"
                    );
                }
                existing.user_id = user_id;
                if !description.is_empty() {
                    existing.description = description.to_string();
                }
                existing
            }
            None => {
                tracing::info!(token = %token, user = %user_id, "token assigned");
                TokenRecord::new(token.as_str(), user_id, description)
            }
        };

        session.save_token(&record)?;
        session.commit()?;
        Ok(record)
    }

    /// Delete a token; `false` if it did not exist.
    pub fn revoke(&self, token: &CredentialToken) -> Result<bool, CredentialError> {
        let mut session = self.store.session()?;
        let removed = session.delete_token(token.as_str())?;
        session.commit()?;
        if removed {
            tracing::info!(token = %token, "token revoked");
        }
        Ok(removed)
    }

    /// A persisted actor by id; `None` if absent or disabled.
    pub fn load_user(&self, user_id: UserId) -> Result<Option<Actor>, CredentialError> {
        let mut session = self.store.session()?;
        Ok(session
            .user(user_id)?
            .filter(|user| user.enabled)
            .map(|user| Actor::persisted(&user, self.groups)))
    }
}

impl core::fmt::Debug for CredentialStore<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}
