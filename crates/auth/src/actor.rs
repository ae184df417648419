//! Actors: the parties whose permissions gate operations.

use std::collections::BTreeSet;

use serde::Serialize;

use tillguard_core::UserId;

use crate::action::{ActionId, ActionRegistry};
use crate::group::GroupRegistry;
use crate::record::UserRecord;

/// Where an actor came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ActorOrigin {
    /// Defined in the site configuration; lives for the whole process.
    Configured,
    /// Loaded from the persistence backend for one lookup.
    Persisted { user_id: UserId },
}

/// An authenticated party.
///
/// The explicit permission list is kept as supplied; the flattened set is
/// computed once, at construction, from the groups known at that moment.
/// Persisted actors are never cached, so new grants apply on the next lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Actor {
    full_name: String,
    short_name: String,
    permissions: Vec<ActionId>,
    flattened: BTreeSet<ActionId>,
    superuser: bool,
    origin: ActorOrigin,
}

impl Actor {
    /// An actor defined by static configuration.
    pub fn configured(
        full_name: impl Into<String>,
        short_name: impl Into<String>,
        permissions: Vec<ActionId>,
        superuser: bool,
        groups: &GroupRegistry,
    ) -> Self {
        let flattened = groups.expand(&permissions);
        Self {
            full_name: full_name.into(),
            short_name: short_name.into(),
            permissions,
            flattened,
            superuser,
            origin: ActorOrigin::Configured,
        }
    }

    /// An actor built from a stored user record.
    pub fn persisted(record: &UserRecord, groups: &GroupRegistry) -> Self {
        Self {
            full_name: record.full_name.clone(),
            short_name: record.short_name.clone(),
            permissions: record.permissions.clone(),
            flattened: groups.expand(&record.permissions),
            superuser: record.superuser,
            origin: ActorOrigin::Persisted { user_id: record.id },
        }
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn is_superuser(&self) -> bool {
        self.superuser
    }

    pub fn origin(&self) -> ActorOrigin {
        self.origin
    }

    /// The stored user behind this actor, if any.
    pub fn user_id(&self) -> Option<UserId> {
        match self.origin {
            ActorOrigin::Persisted { user_id } => Some(user_id),
            ActorOrigin::Configured => None,
        }
    }

    /// The permission list as supplied (actions and group names).
    pub fn permissions(&self) -> &[ActionId] {
        &self.permissions
    }

    /// The flattened action set.
    pub fn all_permissions(&self) -> &BTreeSet<ActionId> {
        &self.flattened
    }

    /// May this actor perform `action`? Superusers may do anything.
    pub fn may(&self, action: &str) -> bool {
        self.superuser || self.flattened.contains(action)
    }

    /// Does the flattened set contain `action`? Ignores the superuser flag.
    pub fn has_permission(&self, action: &str) -> bool {
        self.flattened.contains(action)
    }

    /// Lines describing this actor for an information popup.
    pub fn info_lines(&self, actions: &ActionRegistry) -> Vec<String> {
        let mut info = vec![
            format!("Full name: {}", self.full_name),
            format!("Short name: {}", self.short_name),
            String::new(),
        ];
        if self.superuser {
            info.push("Has all permissions.".to_string());
        } else {
            info.push("Explicit permissions:".to_string());
            info.extend(permission_lines(self.permissions.iter(), actions));
            info.push(String::new());
            info.push("All permissions:".to_string());
            info.extend(permission_lines(self.flattened.iter(), actions));
        }
        info
    }
}

fn permission_lines<'a>(
    permissions: impl Iterator<Item = &'a ActionId>,
    actions: &ActionRegistry,
) -> Vec<String> {
    let sorted: BTreeSet<&ActionId> = permissions.collect();
    if sorted.is_empty() {
        return vec!["  (None)".to_string()];
    }
    sorted
        .into_iter()
        .map(|p| format!("  {} ({})", p, actions.describe(p.as_str())))
        .collect()
}

/// Capability check against an optional actor.
///
/// - no actor: never allowed
/// - superuser: always allowed
/// - otherwise: `action` must be in the flattened set
pub fn allowed(actor: Option<&Actor>, action: &str) -> bool {
    actor.is_some_and(|a| a.may(action))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn skilled_groups() -> (ActionRegistry, GroupRegistry) {
        let actions = ActionRegistry::new();
        let groups = GroupRegistry::new();
        groups.define(&actions, "basic", "Basic", ["sell-stock", "take-payment"]);
        groups.define(&actions, "skilled", "Skilled", ["basic", "void-trans"]);
        (actions, groups)
    }

    #[test]
    fn skilled_actor_may_sell_but_not_unknown() {
        let (_, groups) = skilled_groups();
        let actor = Actor::configured("Till", "T", vec!["skilled".into()], false, &groups);

        assert!(allowed(Some(&actor), "sell-stock"));
        assert!(allowed(Some(&actor), "void-trans"));
        assert!(!allowed(Some(&actor), "unknown-action"));
        // The group name itself is not a concrete action.
        assert!(!actor.has_permission("skilled"));
    }

    #[test]
    fn no_actor_is_never_allowed() {
        assert!(!allowed(None, "sell-stock"));
    }

    #[test]
    fn has_permission_ignores_superuser() {
        let groups = GroupRegistry::new();
        let root = Actor::configured("Root", "R", vec![], true, &groups);
        assert!(root.may("edit-user"));
        assert!(!root.has_permission("edit-user"));
    }

    #[test]
    fn persisted_actor_flattens_at_load_time() {
        let (actions, groups) = skilled_groups();
        let mut record = UserRecord::new("Alice Smith", "Alice");
        record.permissions = vec!["basic".into()];

        let before = Actor::persisted(&record, &groups);
        record.permissions.push("nosale".into());
        let after = Actor::persisted(&record, &groups);

        assert!(!before.may("nosale"));
        assert!(after.may("nosale"));
        assert_eq!(after.user_id(), Some(record.id));
        assert_eq!(actions.describe("basic"), "Basic");
    }

    #[test]
    fn info_lines_list_explicit_and_flattened_permissions() {
        let (actions, groups) = skilled_groups();
        actions.register("sell-stock", Some("Sell stock"));
        let actor = Actor::configured("Bob Jones", "Bob", vec!["basic".into()], false, &groups);

        let info = actor.info_lines(&actions);
        assert_eq!(info[0], "Full name: Bob Jones");
        assert_eq!(info[1], "Short name: Bob");
        assert!(info.contains(&"  basic (Basic)".to_string()));
        assert!(info.contains(&"  sell-stock (Sell stock)".to_string()));
        assert!(info.contains(&"  take-payment (undefined)".to_string()));
    }

    #[test]
    fn info_lines_for_superuser_and_empty_actor() {
        let actions = ActionRegistry::new();
        let groups = GroupRegistry::new();
        let root = Actor::configured("Root", "R", vec!["x".into()], true, &groups);
        assert!(root.info_lines(&actions).contains(&"Has all permissions.".to_string()));

        let nobody = Actor::configured("Nobody", "N", vec![], false, &groups);
        let info = nobody.info_lines(&actions);
        assert_eq!(info.iter().filter(|l| *l == "  (None)").count(), 2);
    }

    #[test]
    fn origin_serializes_with_kind_tag() {
        let record = UserRecord::new("Alice Smith", "Alice");
        let actor = Actor::persisted(&record, &GroupRegistry::new());

        let json = serde_json::to_value(actor.origin()).unwrap();
        assert_eq!(json["kind"], "persisted");
        assert_eq!(json["user_id"], record.id.to_string());

        let configured = serde_json::to_value(ActorOrigin::Configured).unwrap();
        assert_eq!(configured, serde_json::json!({ "kind": "configured" }));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: a superuser is allowed every action whatever it was granted.
        #[test]
        fn superuser_is_allowed_everything(
            granted in prop::collection::vec("[a-z-]{1,12}", 0..8),
            action in "[a-z-]{1,16}",
        ) {
            let groups = GroupRegistry::new();
            let permissions = granted.into_iter().map(ActionId::from).collect();
            let actor = Actor::configured("Root", "R", permissions, true, &groups);
            prop_assert!(allowed(Some(&actor), &action));
        }

        /// Property: without the superuser flag, allowed == membership.
        #[test]
        fn ordinary_actor_allowed_iff_granted(
            granted in prop::collection::vec("[a-z-]{1,12}", 0..8),
            action in "[a-z-]{1,16}",
        ) {
            let groups = GroupRegistry::new();
            let expected = granted.iter().any(|g| g == &action);
            let permissions = granted.into_iter().map(ActionId::from).collect();
            let actor = Actor::configured("Till", "T", permissions, false, &groups);
            prop_assert_eq!(allowed(Some(&actor), &action), expected);
        }
    }
}
