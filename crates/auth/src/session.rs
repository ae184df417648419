//! The current-actor context.

use std::sync::{Arc, PoisonError, RwLock};

use tillguard_core::UserId;

use crate::actor::Actor;

/// Who is interacting with the till right now.
///
/// Holds zero or one actor. Only credential resolution and the host session
/// layer (login/logout) write it; everything else reads. One context per
/// interactive session; hosts running several sessions keep one each.
#[derive(Debug, Default)]
pub struct SessionContext {
    current: RwLock<Option<Arc<Actor>>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that starts with `actor` logged in.
    pub fn with_actor(actor: impl Into<Arc<Actor>>) -> Self {
        Self {
            current: RwLock::new(Some(actor.into())),
        }
    }

    pub fn current(&self) -> Option<Arc<Actor>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The stored user behind the current actor, if there is one.
    pub fn current_user_id(&self) -> Option<UserId> {
        self.current().and_then(|a| a.user_id())
    }

    /// Install `actor` as current; returns whoever it replaced.
    pub fn login(&self, actor: impl Into<Arc<Actor>>) -> Option<Arc<Actor>> {
        let actor = actor.into();
        tracing::info!(actor = actor.full_name(), "actor logged in");
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(actor)
    }

    /// Clear the current actor; returns whoever was logged in.
    pub fn logout(&self) -> Option<Arc<Actor>> {
        let previous = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(actor) = &previous {
            tracing::info!(actor = actor.full_name(), "actor logged out");
        }
        previous
    }

    pub fn is_active(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
