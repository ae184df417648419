use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use tillguard_auth::{TokenRecord, UserRecord};
use tillguard_core::UserId;

use super::{Persistence, StoreError, StoreSession};

#[derive(Debug, Clone, Default)]
struct Tables {
    users: BTreeMap<UserId, UserRecord>,
    tokens: BTreeMap<String, TokenRecord>,
}

/// One write made in a session.
#[derive(Debug, Clone)]
enum Change {
    SaveUser(UserRecord),
    SaveToken(TokenRecord),
    DeleteToken(String),
}

impl Tables {
    fn apply(&mut self, change: Change) {
        match change {
            Change::SaveUser(user) => {
                self.users.insert(user.id, user);
            }
            Change::SaveToken(token) => {
                self.tokens.insert(token.token.clone(), token);
            }
            Change::DeleteToken(token) => {
                self.tokens.remove(&token);
            }
        }
    }
}

/// In-memory backend for tests/dev.
///
/// A session reads from a private copy of the tables and records its writes;
/// commit replays those writes onto the shared tables, so overlapping
/// sessions keep each other's committed changes and an abandoned session
/// leaves no trace.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a backend outage: `session()` fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Seed a user outside any session.
    pub fn insert_user(&self, user: UserRecord) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.users.insert(user.id, user);
    }

    /// Seed a token outside any session.
    pub fn insert_token(&self, token: TokenRecord) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.tokens.insert(token.token.clone(), token);
    }

    /// Read a token outside any session.
    pub fn peek_token(&self, token: &str) -> Option<TokenRecord> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.tokens.get(token).cloned()
    }
}

impl Persistence for InMemoryStore {
    fn session(&self) -> Result<Box<dyn StoreSession + '_>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("in-memory store is offline"));
        }
        let staged = self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(Box::new(InMemorySession {
            store: self,
            staged,
            changes: Vec::new(),
        }))
    }
}

struct InMemorySession<'a> {
    store: &'a InMemoryStore,
    staged: Tables,
    changes: Vec<Change>,
}

impl InMemorySession<'_> {
    fn record(&mut self, change: Change) {
        self.staged.apply(change.clone());
        self.changes.push(change);
    }
}

impl StoreSession for InMemorySession<'_> {
    fn user(&mut self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.staged.users.get(&id).cloned())
    }

    fn users(&mut self, include_disabled: bool) -> Result<Vec<UserRecord>, StoreError> {
        Ok(self
            .staged
            .users
            .values()
            .filter(|u| include_disabled || u.enabled)
            .cloned()
            .collect())
    }

    fn save_user(&mut self, user: &UserRecord) -> Result<(), StoreError> {
        if let Some(web_user) = &user.web_user {
            let taken = self
                .staged
                .users
                .values()
                .any(|u| u.id != user.id && u.web_user.as_ref() == Some(web_user));
            if taken {
                return Err(StoreError::Conflict(format!("web user '{}' is taken", web_user)));
            }
        }
        self.record(Change::SaveUser(user.clone()));
        Ok(())
    }

    fn token(&mut self, token: &str) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.staged.tokens.get(token).cloned())
    }

    fn tokens_for(&mut self, user: UserId) -> Result<Vec<TokenRecord>, StoreError> {
        Ok(self
            .staged
            .tokens
            .values()
            .filter(|t| t.user_id == user)
            .cloned()
            .collect())
    }

    fn save_token(&mut self, token: &TokenRecord) -> Result<(), StoreError> {
        if !self.staged.users.contains_key(&token.user_id) {
            return Err(StoreError::NotFound(format!("user {}", token.user_id)));
        }
        self.record(Change::SaveToken(token.clone()));
        Ok(())
    }

    fn delete_token(&mut self, token: &str) -> Result<bool, StoreError> {
        let existed = self.staged.tokens.contains_key(token);
        if existed {
            self.record(Change::DeleteToken(token.to_string()));
        }
        Ok(existed)
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemorySession { store, changes, .. } = *self;
        let mut tables = store.tables.write().unwrap_or_else(PoisonError::into_inner);
        for change in changes {
            tables.apply(change);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncommitted_session_is_discarded() {
        let store = InMemoryStore::new();
        let user = UserRecord::new("Alice Smith", "Alice");
        {
            let mut session = store.session().unwrap();
            session.save_user(&user).unwrap();
            assert!(session.user(user.id).unwrap().is_some());
        }
        let mut session = store.session().unwrap();
        assert!(session.user(user.id).unwrap().is_none());
    }

    #[test]
    fn committed_changes_are_visible_to_later_sessions() {
        let store = InMemoryStore::new();
        let user = UserRecord::new("Bob Jones", "Bob");
        let mut session = store.session().unwrap();
        session.save_user(&user).unwrap();
        session
            .save_token(&TokenRecord::new("T1", user.id, "Bob's badge"))
            .unwrap();
        session.commit().unwrap();

        let mut session = store.session().unwrap();
        let (token, owner) = session.token_with_owner("T1").unwrap().unwrap();
        assert_eq!(token.description, "Bob's badge");
        assert_eq!(owner.full_name, "Bob Jones");
    }

    #[test]
    fn overlapping_sessions_keep_both_commits() {
        let store = InMemoryStore::new();
        let alice = UserRecord::new("Alice Smith", "Alice");
        let bob = UserRecord::new("Bob Jones", "Bob");
        store.insert_user(alice.clone());
        store.insert_user(bob.clone());

        let mut first = store.session().unwrap();
        let mut second = store.session().unwrap();
        first
            .save_token(&TokenRecord::new("A1", alice.id, "Alice's badge"))
            .unwrap();
        second
            .save_token(&TokenRecord::new("B1", bob.id, "Bob's badge"))
            .unwrap();
        first.commit().unwrap();
        second.commit().unwrap();

        assert_eq!(store.peek_token("A1").unwrap().user_id, alice.id);
        assert_eq!(store.peek_token("B1").unwrap().user_id, bob.id);
    }

    #[test]
    fn token_requires_existing_owner() {
        let store = InMemoryStore::new();
        let mut session = store.session().unwrap();
        let err = session
            .save_token(&TokenRecord::new("T1", UserId::new(), "orphan"))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn listing_hides_disabled_users_unless_asked() {
        let store = InMemoryStore::new();
        let mut disabled = UserRecord::new("Old Hand", "Old");
        disabled.enabled = false;
        store.insert_user(UserRecord::new("New Hand", "New"));
        store.insert_user(disabled);

        let mut session = store.session().unwrap();
        assert_eq!(session.users(false).unwrap().len(), 1);
        assert_eq!(session.users(true).unwrap().len(), 2);
    }

    #[test]
    fn offline_store_refuses_sessions() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.session(), Err(StoreError::Unavailable(_))));
    }
}
