//! `tillguard-auth`: the access-control model of the till.
//!
//! Actions, groups, actors, the current-actor context and the enforcement
//! layer. No IO and no async: persistence and the network listener live in
//! `tillguard-infra`.

pub mod action;
pub mod actor;
pub mod defaults;
pub mod grant;
pub mod group;
pub mod guard;
pub mod record;
pub mod session;
pub mod token;

pub use action::{ActionId, ActionRegistry, UNDEFINED_DESCRIPTION};
pub use actor::{Actor, ActorOrigin, allowed};
pub use defaults::install_default_groups;
pub use grant::grantable_permissions;
pub use group::{Group, GroupRegistry};
pub use guard::{
    DENIAL_TITLE, Enforcer, Notices, PermissionChecked, PermissionDenied, PermissionRequired,
    check,
};
pub use record::{TokenRecord, UserRecord};
pub use session::SessionContext;
pub use token::CredentialToken;
