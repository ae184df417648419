//! Persisted authorization records.
//!
//! These are the rows a persistence backend hands back; they carry no
//! behavior beyond construction helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tillguard_core::UserId;

use crate::ActionId;

/// A till user as stored by the persistence backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub full_name: String,
    pub short_name: String,
    pub web_user: Option<String>,
    pub enabled: bool,
    pub superuser: bool,
    /// Granted actions and group names, in grant order.
    pub permissions: Vec<ActionId>,
}

impl UserRecord {
    /// A new enabled, non-superuser record with no permissions.
    pub fn new(full_name: impl Into<String>, short_name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            full_name: full_name.into(),
            short_name: short_name.into(),
            web_user: None,
            enabled: true,
            superuser: false,
            permissions: Vec::new(),
        }
    }
}

/// A bearer token owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token: String,
    pub description: String,
    pub user_id: UserId,
    pub last_seen: Option<DateTime<Utc>>,
}

impl TokenRecord {
    pub fn new(token: impl Into<String>, user_id: UserId, description: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            description: description.into(),
            user_id,
            last_seen: None,
        }
    }
}
