//! Which permissions an actor may hand to another user.

use std::collections::BTreeSet;

use crate::action::{ActionId, ActionRegistry};
use crate::actor::Actor;
use crate::group::GroupRegistry;

/// Permissions `granter` may give to a user already holding `existing`.
///
/// A superuser may grant every described action; anybody else only what
/// they hold themselves. Any group whose members are all grantable is
/// offered too. Permissions the target already has are left out. Groups
/// sort first because most users are given group permissions.
pub fn grantable_permissions(
    granter: &Actor,
    existing: &[ActionId],
    actions: &ActionRegistry,
    groups: &GroupRegistry,
) -> Vec<ActionId> {
    let mut grantable: BTreeSet<ActionId> = if granter.is_superuser() {
        actions.actions().into_iter().collect()
    } else {
        granter.all_permissions().clone()
    };

    let complete_groups: Vec<ActionId> = groups
        .all()
        .iter()
        .filter(|g| g.members().iter().all(|m| grantable.contains(m)))
        .map(|g| g.name().clone())
        .collect();
    grantable.extend(complete_groups);

    for held in existing {
        grantable.remove(held);
    }

    let mut list: Vec<ActionId> = grantable.into_iter().collect();
    list.sort_by_key(|p| !groups.contains(p.as_str()));
    list
}
