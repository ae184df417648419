//! Protected actions and the registry of their human-readable descriptions.

use std::borrow::{Borrow, Cow};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Description returned for actions nobody has described.
pub const UNDEFINED_DESCRIPTION: &str = "undefined";

/// Identifier of one discrete privileged operation (e.g. "edit-user").
///
/// Action identifiers are opaque strings; group names share the same
/// namespace because a group can be granted wherever an action can.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(Cow<'static, str>);

impl ActionId {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ActionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for ActionId {
    fn from(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }
}

impl From<String> for ActionId {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

impl From<&String> for ActionId {
    fn from(value: &String) -> Self {
        Self(Cow::Owned(value.clone()))
    }
}

impl From<&ActionId> for ActionId {
    fn from(value: &ActionId) -> Self {
        value.clone()
    }
}

impl core::fmt::Display for ActionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Append-only table of action descriptions.
///
/// The first non-empty description recorded for an action wins; later
/// registrations for the same action are ignored. Descriptions coming from
/// code are registered before any loaded from storage, so code wins.
#[derive(Debug, Default)]
pub struct ActionRegistry {
    descriptions: RwLock<BTreeMap<ActionId, String>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `description` for `action` unless one is already known.
    ///
    /// Returns `true` when the description was stored.
    pub fn register(&self, action: impl Into<ActionId>, description: Option<&str>) -> bool {
        let Some(description) = description.filter(|d| !d.trim().is_empty()) else {
            return false;
        };
        let action = action.into();
        let mut map = self
            .descriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(&action) {
            return false;
        }
        tracing::trace!(action = %action, "registered action description");
        map.insert(action, description.to_string());
        true
    }

    /// The stored description, or [`UNDEFINED_DESCRIPTION`].
    pub fn describe(&self, action: &str) -> String {
        let map = self
            .descriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        map.get(action)
            .cloned()
            .unwrap_or_else(|| UNDEFINED_DESCRIPTION.to_string())
    }

    pub fn is_registered(&self, action: &str) -> bool {
        let map = self
            .descriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        map.contains_key(action)
    }

    /// Every described action, sorted.
    pub fn actions(&self) -> Vec<ActionId> {
        let map = self
            .descriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        map.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.descriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
