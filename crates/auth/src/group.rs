//! Permission groups.
//!
//! A group is a named bundle of actions. Members naming another group are
//! expanded into that group's members when the group is defined, so a
//! group's content is frozen at definition time: grants added later to a
//! referenced group do not show up in groups defined before them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use crate::action::{ActionId, ActionRegistry};

/// A named, flattened set of actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    name: ActionId,
    members: BTreeSet<ActionId>,
}

impl Group {
    pub fn name(&self) -> &ActionId {
        &self.name
    }

    /// The concrete actions this group grants.
    pub fn members(&self) -> &BTreeSet<ActionId> {
        &self.members
    }

    pub fn contains(&self, action: &str) -> bool {
        self.members.contains(action)
    }
}

/// Table of groups keyed by name.
///
/// Get-or-create semantics: defining a name that already exists hands back
/// the existing group and ignores the members supplied the second time.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: RwLock<BTreeMap<ActionId, Arc<Group>>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or fetch) the group `name`.
    ///
    /// The description is registered in `actions` so the group can be
    /// offered and displayed like any other grantable action.
    pub fn define<I, M>(
        &self,
        actions: &ActionRegistry,
        name: impl Into<ActionId>,
        description: &str,
        members: I,
    ) -> Arc<Group>
    where
        I: IntoIterator<Item = M>,
        M: Into<ActionId>,
    {
        let name = name.into();
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = groups.get(&name) {
            tracing::debug!(group = %name, "group already defined; keeping existing members");
            return existing.clone();
        }

        actions.register(name.clone(), Some(description));

        let mut flattened = BTreeSet::new();
        for member in members {
            let member = member.into();
            match groups.get(&member) {
                Some(nested) => flattened.extend(nested.members.iter().cloned()),
                None => {
                    flattened.insert(member);
                }
            }
        }

        let group = Arc::new(Group {
            name: name.clone(),
            members: flattened,
        });
        groups.insert(name, group.clone());
        group
    }

    pub fn get(&self, name: &str) -> Option<Arc<Group>> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// The frozen member set of `name`, if it is a group.
    pub fn flatten(&self, name: &str) -> Option<BTreeSet<ActionId>> {
        self.get(name).map(|g| g.members.clone())
    }

    /// All groups, sorted by name.
    pub fn all(&self) -> Vec<Arc<Group>> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Replace every entry naming a known group with that group's members;
    /// keep every other entry as a literal action.
    pub fn expand<'a, I>(&self, entries: I) -> BTreeSet<ActionId>
    where
        I: IntoIterator<Item = &'a ActionId>,
    {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        let mut flattened = BTreeSet::new();
        for entry in entries {
            match groups.get(entry) {
                Some(group) => flattened.extend(group.members.iter().cloned()),
                None => {
                    flattened.insert(entry.clone());
                }
            }
        }
        flattened
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&'static str]) -> BTreeSet<ActionId> {
        items.iter().map(|s| ActionId::from(*s)).collect()
    }

    #[test]
    fn nested_group_is_flattened() {
        let actions = ActionRegistry::new();
        let groups = GroupRegistry::new();
        groups.define(&actions, "basic", "Basic", ["sell-stock", "take-payment"]);
        groups.define(&actions, "skilled", "Skilled", ["basic", "void-trans"]);

        assert_eq!(
            groups.flatten("skilled").unwrap(),
            set(&["sell-stock", "take-payment", "void-trans"])
        );
    }

    #[test]
    fn redefinition_returns_original_and_ignores_members() {
        let actions = ActionRegistry::new();
        let groups = GroupRegistry::new();
        let first = groups.define(&actions, "basic", "Basic", ["sell-stock"]);
        let second = groups.define(&actions, "basic", "Different", ["nosale"]);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(groups.flatten("basic").unwrap(), set(&["sell-stock"]));
        assert_eq!(actions.describe("basic"), "Basic");
    }

    #[test]
    fn referenced_group_is_captured_at_definition_time() {
        let actions = ActionRegistry::new();
        let groups = GroupRegistry::new();
        groups.define(&actions, "base", "Base", ["sell-stock"]);
        groups.define(&actions, "derived", "Derived", ["base", "nosale"]);

        // A later definition under the same name cannot widen "base", and a
        // group defined afterwards that mentions "derived" sees only its
        // frozen content.
        groups.define(&actions, "base", "Base", ["exit"]);
        let derived = groups.flatten("derived").unwrap();
        let base = groups.flatten("base").unwrap();
        assert!(derived.is_superset(&base));
        assert!(!derived.contains("exit"));
    }

    #[test]
    fn group_defined_before_its_reference_is_a_literal() {
        let actions = ActionRegistry::new();
        let groups = GroupRegistry::new();
        groups.define(&actions, "early", "Early", ["later"]);
        groups.define(&actions, "later", "Later", ["sell-stock"]);

        assert_eq!(groups.flatten("early").unwrap(), set(&["later"]));
    }

    #[test]
    fn expand_mixes_groups_and_literals() {
        let actions = ActionRegistry::new();
        let groups = GroupRegistry::new();
        groups.define(&actions, "basic", "Basic", ["sell-stock", "take-payment"]);

        let entries = vec![ActionId::from("basic"), ActionId::from("nosale")];
        assert_eq!(
            groups.expand(&entries),
            set(&["nosale", "sell-stock", "take-payment"])
        );
    }

    #[test]
    fn unknown_group_flattens_to_none() {
        let groups = GroupRegistry::new();
        assert!(groups.flatten("nobody").is_none());
        assert!(!groups.contains("nobody"));
    }
}
