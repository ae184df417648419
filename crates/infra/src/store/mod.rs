//! Persistence backends for users and tokens.
//!
//! Every access goes through a [`StoreSession`]: acquired from a
//! [`Persistence`] backend, used, and released within one synchronous call.
//! Changes become visible only on [`StoreSession::commit`]; dropping a
//! session without committing discards them.

pub mod in_memory;
pub mod sqlite;

use thiserror::Error;

use tillguard_auth::{TokenRecord, UserRecord};
use tillguard_core::UserId;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Persistence failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No session could be opened (backend down, file unreadable, ...).
    #[error("persistence unavailable: {0}")]
    Unavailable(String),

    /// A referenced record does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A uniqueness or referential constraint was violated.
    #[error("constraint violated: {0}")]
    Conflict(String),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

/// A source of scoped persistence sessions.
pub trait Persistence: Send + Sync {
    fn session(&self) -> Result<Box<dyn StoreSession + '_>, StoreError>;
}

impl<P> Persistence for std::sync::Arc<P>
where
    P: Persistence + ?Sized,
{
    fn session(&self) -> Result<Box<dyn StoreSession + '_>, StoreError> {
        (**self).session()
    }
}

/// One unit of work against the backend.
pub trait StoreSession {
    fn user(&mut self, id: UserId) -> Result<Option<UserRecord>, StoreError>;

    /// Users ordered by id; disabled users only when asked for.
    fn users(&mut self, include_disabled: bool) -> Result<Vec<UserRecord>, StoreError>;

    /// Insert or replace a user, including its permission list.
    fn save_user(&mut self, user: &UserRecord) -> Result<(), StoreError>;

    fn token(&mut self, token: &str) -> Result<Option<TokenRecord>, StoreError>;

    /// Tokens owned by `user`, ordered by token value.
    fn tokens_for(&mut self, user: UserId) -> Result<Vec<TokenRecord>, StoreError>;

    /// Insert or replace a token row; the owner must exist.
    fn save_token(&mut self, token: &TokenRecord) -> Result<(), StoreError>;

    /// Delete a token row; `false` if there was none.
    fn delete_token(&mut self, token: &str) -> Result<bool, StoreError>;

    /// Make this session's changes durable.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// A token together with its owner, loaded in one go.
    fn token_with_owner(
        &mut self,
        token: &str,
    ) -> Result<Option<(TokenRecord, UserRecord)>, StoreError> {
        let Some(record) = self.token(token)? else {
            return Ok(None);
        };
        match self.user(record.user_id)? {
            Some(owner) => Ok(Some((record, owner))),
            None => Err(StoreError::NotFound(format!(
                "owner {} of token '{}'",
                record.user_id, record.token
            ))),
        }
    }
}
