//! Site configuration loaded from TOML.
//!
//! ```toml
//! default_groups = true
//!
//! [database]
//! url = "sqlite://tillguard.db"
//!
//! [listener]
//! address = "127.0.0.1:8455"
//!
//! [[groups]]
//! name = "supervisor"
//! description = "Supervisor"
//! members = ["skilled-user", "void-from-closed-transaction"]
//!
//! [[users]]
//! full_name = "Manager page"
//! short_name = "Mgr"
//! permissions = ["manager"]
//! ```
//!
//! Construct via [`TillConfig::from_toml_str`] or [`TillConfig::from_file`];
//! both validate before returning, so a loaded config always installs cleanly.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use tillguard_auth::defaults::{BASIC_USER, MANAGER, SKILLED_USER};
use tillguard_auth::{ActionId, ActionRegistry, Actor, GroupRegistry, install_default_groups};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://tillguard.db";

/// The configuration cannot be used; fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("group #{index} has an empty name")]
    EmptyGroupName { index: usize },

    #[error("group '{group}' refers to itself")]
    SelfReference { group: String },

    #[error("group '{group}' refers to group '{member}' which is only defined later")]
    ForwardReference { group: String, member: String },

    #[error("group '{0}' is defined more than once with different members")]
    DuplicateGroup(String),

    #[error("user #{index} needs both a full name and a short name")]
    EmptyActorName { index: usize },

    #[error("'{owner}' lists a blank permission")]
    BlankPermission { owner: String },

    #[error("invalid listener address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TillConfig {
    /// Install the standard `basic-user` / `skilled-user` / `manager` groups first.
    #[serde(default)]
    pub default_groups: bool,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub listener: Option<ListenerConfig>,

    #[serde(default)]
    pub groups: Vec<GroupConfig>,

    #[serde(default)]
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    pub address: String,
    #[serde(default)]
    pub address_v6: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub members: Vec<String>,
}

/// An actor defined by the site rather than stored in the database.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    pub full_name: String,
    pub short_name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub superuser: bool,
}

impl TillConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: TillConfig = toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_groups()?;

        for (index, user) in self.users.iter().enumerate() {
            if user.full_name.trim().is_empty() || user.short_name.trim().is_empty() {
                return Err(ConfigError::EmptyActorName { index });
            }
            if user.permissions.iter().any(|p| p.trim().is_empty()) {
                return Err(ConfigError::BlankPermission {
                    owner: user.full_name.clone(),
                });
            }
        }

        self.listener_addresses()?;
        Ok(())
    }

    fn validate_groups(&self) -> Result<(), ConfigError> {
        let mut position: BTreeMap<&str, usize> = BTreeMap::new();
        let mut members: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let defaults = [BASIC_USER, SKILLED_USER, MANAGER];

        for (index, group) in self.groups.iter().enumerate() {
            let name = group.name.trim();
            if name.is_empty() {
                return Err(ConfigError::EmptyGroupName { index });
            }
            if self.default_groups && defaults.contains(&name) {
                return Err(ConfigError::DuplicateGroup(name.to_string()));
            }

            let set: BTreeSet<&str> = group.members.iter().map(|m| m.trim()).collect();
            match members.get(name) {
                Some(previous) if *previous != set => {
                    return Err(ConfigError::DuplicateGroup(name.to_string()));
                }
                Some(_) => {}
                None => {
                    position.insert(name, index);
                    members.insert(name, set);
                }
            }
        }

        for (index, group) in self.groups.iter().enumerate() {
            let name = group.name.trim();
            for member in group.members.iter().map(|m| m.trim()) {
                if member.is_empty() {
                    return Err(ConfigError::BlankPermission {
                        owner: name.to_string(),
                    });
                }
                if member == name {
                    return Err(ConfigError::SelfReference {
                        group: name.to_string(),
                    });
                }
                if position.get(member).is_some_and(|&defined| defined > index) {
                    return Err(ConfigError::ForwardReference {
                        group: name.to_string(),
                        member: member.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Addresses to listen on, IPv4 first. Empty when no listener is configured.
    pub fn listener_addresses(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        let Some(listener) = &self.listener else {
            return Ok(Vec::new());
        };

        let mut addresses = vec![parse_address(&listener.address)?];
        if let Some(v6) = &listener.address_v6 {
            let addr = parse_address(v6)?;
            if !addr.is_ipv6() {
                return Err(ConfigError::InvalidAddress {
                    address: v6.clone(),
                    reason: "address_v6 must be an IPv6 address".to_string(),
                });
            }
            addresses.push(addr);
        }
        Ok(addresses)
    }

    /// Define the configured groups (defaults first) and build the configured actors.
    pub fn install(&self, actions: &ActionRegistry, groups: &GroupRegistry) -> Vec<Actor> {
        if self.default_groups {
            install_default_groups(groups, actions);
        }

        for group in &self.groups {
            groups.define(
                actions,
                group.name.trim().to_string(),
                group.description.trim(),
                group.members.iter().map(|m| m.trim().to_string()),
            );
        }
        tracing::debug!(groups = self.groups.len(), "configured groups installed");

        self.users
            .iter()
            .map(|user| {
                let permissions: Vec<ActionId> = user
                    .permissions
                    .iter()
                    .map(|p| ActionId::from(p.trim().to_string()))
                    .collect();
                Actor::configured(
                    user.full_name.trim(),
                    user.short_name.trim(),
                    permissions,
                    user.superuser,
                    groups,
                )
            })
            .collect()
    }
}

fn parse_address(raw: &str) -> Result<SocketAddr, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|e: std::net::AddrParseError| ConfigError::InvalidAddress {
            address: raw.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        default_groups = true

        [database]
        url = "sqlite::memory:"

        [listener]
        address = "127.0.0.1:8455"
        address_v6 = "[::1]:8455"

        [[groups]]
        name = "supervisor"
        description = "Supervisor"
        members = ["skilled-user", "void-from-closed-transaction"]

        [[users]]
        full_name = "Manager page"
        short_name = "Mgr"
        permissions = ["supervisor"]
    "#;

    #[test]
    fn sample_config_loads_and_installs() {
        let config = TillConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.listener_addresses().unwrap().len(), 2);

        let actions = ActionRegistry::new();
        let groups = GroupRegistry::new();
        let actors = config.install(&actions, &groups);

        assert_eq!(actors.len(), 1);
        assert!(actors[0].may("void-from-closed-transaction"));
        assert!(actors[0].may("sell-stock"));
        assert!(!actors[0].may("edit-user"));
        assert_eq!(actions.describe("supervisor"), "Supervisor");
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = TillConfig::from_toml_str("").unwrap();
        assert_eq!(config.database.url, DEFAULT_DATABASE_URL);
        assert!(config.listener_addresses().unwrap().is_empty());
        assert!(!config.default_groups);
    }

    #[test]
    fn group_referring_to_itself_is_rejected() {
        let err = TillConfig::from_toml_str(
            r#"
            [[groups]]
            name = "loop"
            members = ["loop"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::SelfReference { group } if group == "loop"));
    }

    #[test]
    fn forward_reference_is_rejected() {
        let err = TillConfig::from_toml_str(
            r#"
            [[groups]]
            name = "a"
            members = ["b"]

            [[groups]]
            name = "b"
            members = ["a"]
            "#,
        )
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::ForwardReference { group, member } if group == "a" && member == "b")
        );
    }

    #[test]
    fn conflicting_redefinition_is_rejected() {
        let err = TillConfig::from_toml_str(
            r#"
            [[groups]]
            name = "a"
            members = ["x"]

            [[groups]]
            name = "a"
            members = ["y"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateGroup(name) if name == "a"));
    }

    #[test]
    fn identical_redefinition_is_accepted() {
        TillConfig::from_toml_str(
            r#"
            [[groups]]
            name = "a"
            members = ["x", "y"]

            [[groups]]
            name = "a"
            members = ["y", "x"]
            "#,
        )
        .unwrap();
    }

    #[test]
    fn default_group_names_are_reserved_when_installed() {
        let err = TillConfig::from_toml_str(
            r#"
            default_groups = true

            [[groups]]
            name = "manager"
            members = ["x"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateGroup(_)));
    }

    #[test]
    fn blank_names_and_permissions_are_rejected() {
        let err = TillConfig::from_toml_str(
            r#"
            [[users]]
            full_name = "  "
            short_name = "X"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyActorName { index: 0 }));

        let err = TillConfig::from_toml_str(
            r#"
            [[groups]]
            name = "g"
            members = ["ok", " "]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::BlankPermission { .. }));
    }

    #[test]
    fn listener_addresses_are_checked() {
        let err = TillConfig::from_toml_str(
            r#"
            [listener]
            address = "not-an-address"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress { .. }));

        let err = TillConfig::from_toml_str(
            r#"
            [listener]
            address = "127.0.0.1:1"
            address_v6 = "127.0.0.1:2"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress { .. }));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = TillConfig::from_file(Path::new("/nonexistent/tillguard.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tillguard.toml"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            TillConfig::from_toml_str("default_groups = ["),
            Err(ConfigError::Parse(_))
        ));
    }
}
