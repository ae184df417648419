//! User and token administration.
//!
//! [`UserAdmin`] and [`TokenAdmin`] can only be constructed by an actor
//! holding their permission; every method then works as that actor.

use std::sync::Arc;

use thiserror::Error;

use tillguard_auth::{
    ActionId, Actor, CredentialToken, Enforcer, GroupRegistry, PermissionChecked,
    PermissionDenied, TokenRecord, UserRecord, grantable_permissions,
};
use tillguard_core::{DomainError, UserId};

use crate::credentials::{CredentialError, CredentialStore};
use crate::store::{Persistence, StoreError, StoreSession};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Denied(#[from] PermissionDenied),

    #[error("You can't edit {0} because that user has the superuser bit set and you do not.")]
    SuperuserProtected(String),

    #[error("Only a superuser can remove the superuser bit.")]
    SuperuserRequired,

    #[error("You can't grant the '{0}' permission.")]
    NotGrantable(ActionId),

    #[error("In use by {0}")]
    TokenInUse(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

pub type AdminResult<T> = Result<T, AdminError>;

/// Editable fields of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDetails {
    pub full_name: String,
    pub short_name: String,
    /// Blank means "no web login".
    pub web_user: Option<String>,
    pub enabled: bool,
}

impl From<&UserRecord> for UserDetails {
    fn from(user: &UserRecord) -> Self {
        Self {
            full_name: user.full_name.clone(),
            short_name: user.short_name.clone(),
            web_user: user.web_user.clone(),
            enabled: user.enabled,
        }
    }
}

fn required_names(full_name: &str, short_name: &str) -> Result<(String, String), DomainError> {
    let (full_name, short_name) = (full_name.trim(), short_name.trim());
    if full_name.is_empty() || short_name.is_empty() {
        return Err(DomainError::validation(
            "You must provide both a full name and a short name.",
        ));
    }
    Ok((full_name.to_string(), short_name.to_string()))
}

fn load_user(session: &mut dyn StoreSession, id: UserId) -> AdminResult<UserRecord> {
    session
        .user(id)?
        .ok_or_else(|| DomainError::not_found(format!("user {}", id)).into())
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

/// Create and edit users, their permissions and their tokens.
pub struct UserAdmin<'a> {
    enforcer: Enforcer<'a>,
    store: &'a dyn Persistence,
    groups: &'a GroupRegistry,
    editor: Arc<Actor>,
}

impl PermissionChecked for UserAdmin<'_> {
    const ACTION: &'static str = "edit-user";
    const DESCRIPTION: &'static str = "Edit a user";
}

impl<'a> UserAdmin<'a> {
    /// Open the editor as the current actor, or show the denial.
    pub fn open(
        enforcer: Enforcer<'a>,
        store: &'a dyn Persistence,
        groups: &'a GroupRegistry,
    ) -> Result<Self, PermissionDenied> {
        enforcer.try_construct::<Self>(|editor| Self {
            enforcer,
            store,
            groups,
            editor: Arc::clone(editor),
        })
    }

    pub fn editor(&self) -> &Actor {
        &self.editor
    }

    pub fn add_user(&self, full_name: &str, short_name: &str) -> AdminResult<UserRecord> {
        let (full_name, short_name) = required_names(full_name, short_name)?;
        let user = UserRecord::new(full_name, short_name);

        let mut session = self.store.session()?;
        session.save_user(&user)?;
        session.commit()?;
        tracing::info!(user = %user.id, editor = self.editor.full_name(), "user added");
        Ok(user)
    }

    /// Load a user for editing. Superusers can only be edited by superusers.
    pub fn edit(&self, user_id: UserId) -> AdminResult<UserRecord> {
        let mut session = self.store.session()?;
        let user = load_user(session.as_mut(), user_id)?;
        self.check_editable(&user)?;
        Ok(user)
    }

    fn check_editable(&self, user: &UserRecord) -> AdminResult<()> {
        if user.superuser && !self.editor.is_superuser() {
            let err = AdminError::SuperuserProtected(user.full_name.clone());
            self.enforcer.refuse(&err.to_string());
            return Err(err);
        }
        Ok(())
    }

    /// Apply edited details to a user.
    pub fn save(&self, user_id: UserId, details: &UserDetails) -> AdminResult<UserRecord> {
        let (full_name, short_name) = required_names(&details.full_name, &details.short_name)?;

        let mut session = self.store.session()?;
        let mut user = load_user(session.as_mut(), user_id)?;
        self.check_editable(&user)?;

        user.full_name = full_name;
        user.short_name = short_name;
        user.web_user = details
            .web_user
            .as_deref()
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(str::to_string);
        user.enabled = details.enabled;

        session.save_user(&user)?;
        session.commit()?;
        tracing::info!(user = %user.id, enabled = user.enabled, "user details saved");
        Ok(user)
    }

    pub fn remove_superuser(&self, user_id: UserId) -> AdminResult<UserRecord> {
        if !self.editor.is_superuser() {
            let err = AdminError::SuperuserRequired;
            self.enforcer.refuse(&err.to_string());
            return Err(err);
        }

        let mut session = self.store.session()?;
        let mut user = load_user(session.as_mut(), user_id)?;
        user.superuser = false;
        session.save_user(&user)?;
        session.commit()?;
        tracing::info!(user = %user.id, "superuser bit removed");
        Ok(user)
    }

    pub fn tokens(&self, user_id: UserId) -> AdminResult<Vec<TokenRecord>> {
        let mut session = self.store.session()?;
        let user = load_user(session.as_mut(), user_id)?;
        self.check_editable(&user)?;
        Ok(session.tokens_for(user_id)?)
    }

    /// Give a user a new token. Both fields are required and the token must be unused.
    pub fn add_token(&self, user_id: UserId, description: &str, token: &str) -> AdminResult<TokenRecord> {
        let description = description.trim();
        let token = CredentialToken::new(token)
            .filter(|_| !description.is_empty())
            .ok_or_else(|| DomainError::validation("You must fill in both fields."))?;

        let mut session = self.store.session()?;
        let user = load_user(session.as_mut(), user_id)?;
        self.check_editable(&user)?;

        if let Some((_, owner)) = session.token_with_owner(token.as_str())? {
            return Err(AdminError::TokenInUse(owner.full_name));
        }

        let record = TokenRecord::new(token.as_str(), user_id, description);
        session.save_token(&record)?;
        session.commit()?;
        tracing::info!(user = %user_id, token = %token, "token added");
        Ok(record)
    }

    pub fn remove_token(&self, token: &str) -> AdminResult<bool> {
        let mut session = self.store.session()?;
        let Some((_, owner)) = session.token_with_owner(token)? else {
            return Ok(false);
        };
        self.check_editable(&owner)?;
        let removed = session.delete_token(token)?;
        session.commit()?;
        tracing::info!(user = %owner.id, token, "token removed");
        Ok(removed)
    }

    /// What the editor may add to `user_id`'s permissions.
    pub fn grantable(&self, user_id: UserId) -> AdminResult<Vec<ActionId>> {
        let mut session = self.store.session()?;
        let user = load_user(session.as_mut(), user_id)?;
        Ok(grantable_permissions(
            &self.editor,
            &user.permissions,
            self.enforcer.actions(),
            self.groups,
        ))
    }

    pub fn add_permission(&self, user_id: UserId, permission: &str) -> AdminResult<UserRecord> {
        let permission = ActionId::from(permission.trim().to_string());

        let mut session = self.store.session()?;
        let mut user = load_user(session.as_mut(), user_id)?;
        self.check_editable(&user)?;

        let grantable = grantable_permissions(
            &self.editor,
            &user.permissions,
            self.enforcer.actions(),
            self.groups,
        );
        if !grantable.contains(&permission) {
            return Err(AdminError::NotGrantable(permission));
        }

        tracing::info!(user = %user.id, %permission, "permission granted");
        user.permissions.push(permission);
        session.save_user(&user)?;
        session.commit()?;
        Ok(user)
    }

    /// Returns whether the user held `permission`.
    pub fn remove_permission(&self, user_id: UserId, permission: &str) -> AdminResult<bool> {
        let mut session = self.store.session()?;
        let mut user = load_user(session.as_mut(), user_id)?;
        self.check_editable(&user)?;

        let before = user.permissions.len();
        user.permissions.retain(|p| p.as_str() != permission.trim());
        if user.permissions.len() == before {
            return Ok(false);
        }
        session.save_user(&user)?;
        session.commit()?;
        tracing::info!(user = %user.id, permission, "permission removed");
        Ok(true)
    }
}

impl core::fmt::Debug for UserAdmin<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UserAdmin")
            .field("editor", &self.editor.full_name())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tokens
// ─────────────────────────────────────────────────────────────────────────────

/// Look up, move and forget tokens regardless of owner.
pub struct TokenAdmin<'a> {
    store: &'a dyn Persistence,
    groups: &'a GroupRegistry,
}

impl PermissionChecked for TokenAdmin<'_> {
    const ACTION: &'static str = "manage-tokens";
    const DESCRIPTION: &'static str = "Manage user login tokens";
}

impl<'a> TokenAdmin<'a> {
    pub fn open(
        enforcer: Enforcer<'a>,
        store: &'a dyn Persistence,
        groups: &'a GroupRegistry,
    ) -> Result<Self, PermissionDenied> {
        enforcer.try_construct::<Self>(|_| Self { store, groups })
    }

    fn credentials(&self) -> CredentialStore<'a> {
        CredentialStore::new(self.store, self.groups)
    }

    /// A token and its owner.
    pub fn inspect(&self, token: &str) -> AdminResult<Option<(TokenRecord, UserRecord)>> {
        let mut session = self.store.session()?;
        Ok(session.token_with_owner(token.trim())?)
    }

    /// Enabled users the token could be moved to.
    pub fn assign_candidates(&self, token: &str) -> AdminResult<Vec<UserRecord>> {
        let mut session = self.store.session()?;
        let owner = session.token(token.trim())?.map(|t| t.user_id);
        Ok(session
            .users(false)?
            .into_iter()
            .filter(|u| Some(u.id) != owner)
            .collect())
    }

    /// Move a token to another enabled user, keeping its description.
    pub fn assign(&self, token: &str, user_id: UserId) -> AdminResult<TokenRecord> {
        let token = CredentialToken::new(token)
            .ok_or_else(|| DomainError::validation("A token is required."))?;
        {
            let mut session = self.store.session()?;
            let user = load_user(session.as_mut(), user_id)?;
            if !user.enabled {
                return Err(DomainError::validation(format!(
                    "{} is not an active user.",
                    user.full_name
                ))
                .into());
            }
        }
        Ok(self.credentials().assign(&token, user_id, "")?)
    }

    pub fn forget(&self, token: &str) -> AdminResult<bool> {
        match CredentialToken::new(token) {
            Some(token) => Ok(self.credentials().revoke(&token)?),
            None => Ok(false),
        }
    }

    pub fn set_description(&self, token: &str, description: &str) -> AdminResult<TokenRecord> {
        let description = description.trim();
        if description.is_empty() {
            return Err(DomainError::validation("A description is required.").into());
        }
        let mut session = self.store.session()?;
        let mut record = session
            .token(token.trim())?
            .ok_or_else(|| DomainError::not_found(format!("token '{}'", token.trim())))?;
        record.description = description.to_string();
        session.save_token(&record)?;
        session.commit()?;
        Ok(record)
    }
}

impl core::fmt::Debug for TokenAdmin<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenAdmin").finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Listing and bootstrap
// ─────────────────────────────────────────────────────────────────────────────

/// Result of [`list_users`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserListing {
    pub users: Vec<UserRecord>,
    /// Whether the current actor could open a user for editing.
    pub may_edit: bool,
}

/// Users by full name, as the current actor may see them; `Ok(None)` when refused.
pub fn list_users(
    enforcer: &Enforcer<'_>,
    store: &dyn Persistence,
    include_disabled: bool,
) -> Result<Option<UserListing>, StoreError> {
    enforcer
        .guard("list-users", "List till users", || -> Result<UserListing, StoreError> {
            let mut session = store.session()?;
            let mut users = session.users(include_disabled)?;
            users.sort_by(|a, b| a.full_name.cmp(&b.full_name));
            let current = enforcer.session().current();
            Ok(UserListing {
                users,
                may_edit: UserAdmin::allowed(current.as_deref()),
            })
        })
        .transpose()
}

/// Enabled users ordered by id, without any permission check.
pub fn enabled_users(store: &dyn Persistence) -> Result<Vec<UserRecord>, StoreError> {
    store.session()?.users(false)
}

/// Create an enabled superuser holding `token`, for first-time setup.
pub fn bootstrap_superuser(
    store: &dyn Persistence,
    full_name: &str,
    short_name: &str,
    token: &str,
) -> AdminResult<UserRecord> {
    let (full_name, short_name) = required_names(full_name, short_name)?;
    let token = CredentialToken::new(token)
        .ok_or_else(|| DomainError::validation("A user token is required."))?;

    let mut session = store.session()?;
    if let Some((_, owner)) = session.token_with_owner(token.as_str())? {
        return Err(AdminError::TokenInUse(owner.full_name));
    }

    let mut user = UserRecord::new(full_name, short_name);
    user.superuser = true;
    session.save_user(&user)?;
    session.save_token(&TokenRecord::new(token.as_str(), user.id, user.full_name.as_str()))?;
    session.commit()?;
    tracing::info!(user = %user.id, "superuser created");
    Ok(user)
}
