//! Infrastructure layer: persistence, configuration, the token listener and
//! administration services.

pub mod admin;
pub mod config;
pub mod credentials;
pub mod event_loop;
pub mod listener;
pub mod store;

pub use admin::{
    AdminError, AdminResult, TokenAdmin, UserAdmin, UserDetails, UserListing, bootstrap_superuser,
    enabled_users, list_users,
};
pub use config::{ConfigError, TillConfig};
pub use credentials::{CredentialError, CredentialStore};
pub use event_loop::TokioEventLoop;
pub use listener::{
    CredentialListener, EventLoop, ListenerContext, ListenerHooks, ListenerState, NoHooks,
    Readiness,
};
pub use store::{InMemoryStore, Persistence, SqliteStore, StoreError, StoreSession};
