//! Enforcement: guarded operations and guarded construction.
//!
//! Every check happens strictly before the protected work runs. A denial is
//! reported through the host's [`Notices`] sink and never propagates as a
//! hard failure out of [`Enforcer::guard`].

use std::sync::Arc;

use thiserror::Error;

use crate::action::{ActionId, ActionRegistry};
use crate::actor::{Actor, allowed};
use crate::session::SessionContext;

/// Title used for every denial notice.
pub const DENIAL_TITLE: &str = "Not allowed";

/// User-visible notices, supplied by the UI layer.
pub trait Notices {
    /// A blocking popup explaining why something was refused.
    fn show_denial(&self, message: &str, title: &str);

    /// A transient message.
    fn toast(&self, message: &str);
}

/// The current actor (or the absence of one) lacks a required action.
///
/// `Display` is the exact text shown to the user.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PermissionDenied {
    #[error("{actor} does not have the '{action}' permission which is required for this operation.")]
    MissingPermission { actor: String, action: ActionId },

    #[error("This operation needs the '{action}' permission, but there is no current user.")]
    NoCurrentUser { action: ActionId },
}

impl PermissionDenied {
    pub fn action(&self) -> &ActionId {
        match self {
            Self::MissingPermission { action, .. } | Self::NoCurrentUser { action } => action,
        }
    }
}

/// Check `actor` against `action`, producing the denial on failure.
pub fn check(actor: Option<&Actor>, action: &ActionId) -> Result<(), PermissionDenied> {
    match actor {
        _ if allowed(actor, action.as_str()) => Ok(()),
        Some(actor) => Err(PermissionDenied::MissingPermission {
            actor: actor.full_name().to_string(),
            action: action.clone(),
        }),
        None => Err(PermissionDenied::NoCurrentUser {
            action: action.clone(),
        }),
    }
}

/// A declared requirement for one action.
///
/// Creating one registers the action's description, mirroring a decorator
/// applied where the protected function is defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRequired {
    action: ActionId,
}

impl PermissionRequired {
    pub fn new(
        actions: &ActionRegistry,
        action: impl Into<ActionId>,
        description: Option<&str>,
    ) -> Self {
        let action = action.into();
        actions.register(action.clone(), description);
        Self { action }
    }

    pub fn action(&self) -> &ActionId {
        &self.action
    }

    pub fn allowed(&self, actor: Option<&Actor>) -> bool {
        allowed(actor, self.action.as_str())
    }
}

/// Implemented by types whose construction performs privileged work.
///
/// Build such types only through [`Enforcer::try_construct`] or after
/// [`Enforcer::authorize`] succeeds.
pub trait PermissionChecked {
    const ACTION: &'static str;
    const DESCRIPTION: &'static str;

    /// Could `actor` construct this type?
    fn allowed(actor: Option<&Actor>) -> bool {
        allowed(actor, Self::ACTION)
    }
}

/// The enforcement layer, wired to the registries and the host UI.
#[derive(Clone, Copy)]
pub struct Enforcer<'a> {
    actions: &'a ActionRegistry,
    session: &'a SessionContext,
    notices: &'a dyn Notices,
}

impl<'a> Enforcer<'a> {
    pub fn new(
        actions: &'a ActionRegistry,
        session: &'a SessionContext,
        notices: &'a dyn Notices,
    ) -> Self {
        Self {
            actions,
            session,
            notices,
        }
    }

    pub fn actions(&self) -> &'a ActionRegistry {
        self.actions
    }

    pub fn session(&self) -> &'a SessionContext {
        self.session
    }

    pub fn notices(&self) -> &'a dyn Notices {
        self.notices
    }

    /// Register the description of a guarded type ahead of first use.
    pub fn declare<T: PermissionChecked>(&self) {
        self.actions.register(T::ACTION, Some(T::DESCRIPTION));
    }

    /// Run `op` only if the current actor may perform `action`.
    ///
    /// Returns `None` (after showing the denial) when refused.
    pub fn guard<T>(
        &self,
        action: impl Into<ActionId>,
        description: &str,
        op: impl FnOnce() -> T,
    ) -> Option<T> {
        let required = PermissionRequired::new(self.actions, action, Some(description));
        self.run(&required, |_| op())
    }

    /// Run `op` with the permitted current actor, or report the denial.
    pub fn run<T>(
        &self,
        required: &PermissionRequired,
        op: impl FnOnce(&Arc<Actor>) -> T,
    ) -> Option<T> {
        match self.require(required.action()) {
            Ok(actor) => Some(op(&actor)),
            Err(_) => None,
        }
    }

    /// Check the current actor for `action`; on refusal show the notice.
    pub fn require(&self, action: &ActionId) -> Result<Arc<Actor>, PermissionDenied> {
        let current = self.session.current();
        match check(current.as_deref(), action) {
            Ok(()) => match current {
                Some(actor) => Ok(actor),
                None => Err(self.deny(PermissionDenied::NoCurrentUser {
                    action: action.clone(),
                })),
            },
            Err(denied) => Err(self.deny(denied)),
        }
    }

    /// The permission gate for a [`PermissionChecked`] type.
    ///
    /// Factories call this first and construct nothing on `Err`.
    pub fn authorize<T: PermissionChecked>(&self) -> Result<Arc<Actor>, PermissionDenied> {
        self.declare::<T>();
        self.require(&ActionId::from(T::ACTION))
    }

    /// Construct `T` only if the current actor may; `build` never runs otherwise.
    pub fn try_construct<T: PermissionChecked>(
        &self,
        build: impl FnOnce(&Arc<Actor>) -> T,
    ) -> Result<T, PermissionDenied> {
        let actor = self.authorize::<T>()?;
        Ok(build(&actor))
    }

    /// Report a refusal that is not a plain missing permission.
    pub fn refuse(&self, message: &str) {
        tracing::warn!(reason = message, "operation refused");
        self.notices.show_denial(message, DENIAL_TITLE);
    }

    fn deny(&self, denied: PermissionDenied) -> PermissionDenied {
        tracing::warn!(action = %denied.action(), "permission denied");
        self.notices.show_denial(&denied.to_string(), DENIAL_TITLE);
        denied
    }
}

impl core::fmt::Debug for Enforcer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Enforcer")
            .field("actions", &self.actions.len())
            .field("session_active", &self.session.is_active())
            .finish()
    }
}
