//! Standard group definitions shipped with the till.
//!
//! Sites can use these as they are or define their own on top.

use crate::action::ActionRegistry;
use crate::group::GroupRegistry;

pub const BASIC_USER: &str = "basic-user";
pub const SKILLED_USER: &str = "skilled-user";
pub const MANAGER: &str = "manager";

const BASIC_USER_ACTIONS: &[&str] = &[
    "sell-stock",
    "sell-plu",
    "sell-dept",
    "take-payment",
    "cancel-line-in-open-transaction",
    "print-receipt",
    "recall-trans",
    "record-waste",
    "current-session-summary",
    "version",
    "netinfo",
    "kitchen-message",
    "kitchen-order",
    "edit-transaction-note",
    "price-check",
];

const SKILLED_USER_ACTIONS: &[&str] = &[
    BASIC_USER,
    "drink-in",
    "nosale",
    "merge-trans",
    "split-trans",
    "void-from-closed-transaction",
    "stock-check",
    "stock-level-check",
    "twitter",
    "use-stock",
    "restock",
    "auto-allocate",
    "manage-stockline-associations",
    "annotate",
];

const MANAGER_ACTIONS: &[&str] = &[
    SKILLED_USER,
    "print-receipt-by-number",
    "restore-deferred",
    "exit",
    "deliveries",
    "edit-supplier",
    "start-session",
    "end-session",
    "record-takings",
    "session-summary",
    "list-users",
    "edit-user",
    "manage-tokens",
    "override-price",
    "reprice-stock",
    "defer-trans",
    "edit-keycaps",
    "finish-unconnected-stock",
    "stock-history",
    "update-supplier",
    "purge-finished-stock",
    "alter-stocktype",
    "add-custom-transline",
    "reprint-stocklabel",
    "print-stocklist",
    "add-best-before",
    "create-stockline",
    "alter-stockline",
    "create-plu",
    "alter-plu",
    "alter-modifier",
    "return-finished-item",
    "recall-any-trans",
    "apply-discount",
];

/// Define `basic-user`, `skilled-user` and `manager`, in dependency order.
pub fn install_default_groups(groups: &GroupRegistry, actions: &ActionRegistry) {
    groups.define(actions, BASIC_USER, "Basic till user", BASIC_USER_ACTIONS.iter().copied());
    groups.define(actions, SKILLED_USER, "Skilled till user", SKILLED_USER_ACTIONS.iter().copied());
    groups.define(actions, MANAGER, "Till manager", MANAGER_ACTIONS.iter().copied());
}
