//! The token listener driven over real loopback UDP.

use std::cell::RefCell;
use std::net::UdpSocket;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

use tillguard_auth::{Actor, GroupRegistry, Notices, SessionContext, TokenRecord, UserRecord};
use tillguard_infra::{
    CredentialListener, EventLoop, InMemoryStore, ListenerContext, ListenerHooks, ListenerState,
    Persistence, Readiness, SqliteStore, TillConfig,
};

/// Calls every callback until it reports drained, like one pass of a real loop.
#[derive(Default)]
struct ManualLoop {
    callbacks: Vec<Box<dyn FnMut() -> Readiness>>,
}

impl EventLoop for ManualLoop {
    fn add_fd(&mut self, _fd: RawFd, callback: Box<dyn FnMut() -> Readiness>, _description: &str) {
        self.callbacks.push(callback);
    }
}

impl ManualLoop {
    fn pump(&mut self) {
        for callback in &mut self.callbacks {
            while callback() == Readiness::Pending {}
        }
    }

    /// Pump until `done` holds; loopback delivery is fast but not synchronous.
    fn pump_until(&mut self, done: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            self.pump();
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

#[derive(Default)]
struct Toasts(RefCell<Vec<String>>);

impl Notices for Toasts {
    fn show_denial(&self, _message: &str, _title: &str) {}

    fn toast(&self, message: &str) {
        self.0.borrow_mut().push(message.to_string());
    }
}

#[derive(Default)]
struct Screen {
    unblanked: RefCell<usize>,
    arrived: RefCell<Vec<String>>,
}

impl ListenerHooks for Screen {
    fn unblank_screen(&self) {
        *self.unblanked.borrow_mut() += 1;
    }

    fn credential_arrived(&self, actor: &Arc<Actor>) {
        self.arrived.borrow_mut().push(actor.full_name().to_string());
    }
}

struct Harness {
    session: Arc<SessionContext>,
    toasts: Arc<Toasts>,
    screen: Arc<Screen>,
    listener: CredentialListener,
    event_loop: ManualLoop,
    sender: UdpSocket,
}

impl Harness {
    fn new(store: Arc<dyn Persistence>, groups: Arc<GroupRegistry>) -> Self {
        let session = Arc::new(SessionContext::new());
        let toasts = Arc::new(Toasts::default());
        let screen = Arc::new(Screen::default());
        let ctx = ListenerContext {
            store,
            groups,
            session: Arc::clone(&session),
            notices: Arc::clone(&toasts) as Arc<dyn Notices>,
            hooks: Arc::clone(&screen) as Arc<dyn ListenerHooks>,
        };
        let listener = CredentialListener::bind("127.0.0.1:0".parse().unwrap(), ctx).unwrap();
        let mut event_loop = ManualLoop::default();
        listener.register(&mut event_loop);
        Self {
            session,
            toasts,
            screen,
            listener,
            event_loop,
            sender: UdpSocket::bind("127.0.0.1:0").unwrap(),
        }
    }

    fn send(&self, payload: &[u8]) {
        self.sender.send_to(payload, self.listener.local_addr()).unwrap();
    }
}

fn alice_with_token(store: &InMemoryStore, token: &str) -> UserRecord {
    let mut alice = UserRecord::new("Alice Smith", "Alice");
    alice.permissions = vec!["basic-user".into()];
    store.insert_user(alice.clone());
    store.insert_token(TokenRecord::new(token, alice.id, "badge"));
    alice
}

#[test]
fn padded_token_logs_its_owner_in() {
    let store = Arc::new(InMemoryStore::new());
    let alice = alice_with_token(&store, "ABC123");
    let mut h = Harness::new(store.clone(), Arc::new(GroupRegistry::new()));
    assert_eq!(h.listener.state(), ListenerState::Listening);

    h.send(b"  ABC123  \n");
    let session = Arc::clone(&h.session);
    assert!(h.event_loop.pump_until(|| session.is_active()));

    assert_eq!(h.session.current_user_id(), Some(alice.id));
    assert_eq!(*h.screen.unblanked.borrow(), 1);
    assert_eq!(*h.screen.arrived.borrow(), vec!["Alice Smith".to_string()]);
    assert!(store.peek_token("ABC123").unwrap().last_seen.is_some());
    assert!(h.toasts.0.borrow().is_empty());
}

#[test]
fn unknown_and_inactive_tokens_only_toast() {
    let store = Arc::new(InMemoryStore::new());
    let mut bob = UserRecord::new("Bob Jones", "Bob");
    bob.enabled = false;
    store.insert_user(bob.clone());
    store.insert_token(TokenRecord::new("BOB", bob.id, "badge"));
    let mut h = Harness::new(store, Arc::new(GroupRegistry::new()));

    h.send(b"NOBODY");
    h.send(b"BOB");
    let toasts = Arc::clone(&h.toasts);
    assert!(h.event_loop.pump_until(|| toasts.0.borrow().len() == 2));

    assert_eq!(
        *h.toasts.0.borrow(),
        vec![
            "User token 'NOBODY' not recognised.".to_string(),
            "User 'Bob Jones' is not active.".to_string(),
        ]
    );
    assert!(!h.session.is_active());
}

#[test]
fn blank_datagram_is_ignored_and_listener_keeps_going() {
    let store = Arc::new(InMemoryStore::new());
    let alice = alice_with_token(&store, "T1");
    let mut h = Harness::new(store, Arc::new(GroupRegistry::new()));

    h.send(b"   ");
    h.send(b"T1");
    let session = Arc::clone(&h.session);
    assert!(h.event_loop.pump_until(|| session.is_active()));

    assert_eq!(h.session.current_user_id(), Some(alice.id));
    assert_eq!(*h.screen.unblanked.borrow(), 1);
    assert!(h.toasts.0.borrow().is_empty());
}

#[test]
fn closed_listener_asks_to_be_dropped() {
    let store = Arc::new(InMemoryStore::new());
    let mut h = Harness::new(store, Arc::new(GroupRegistry::new()));

    h.listener.close();
    assert_eq!(h.listener.state(), ListenerState::Closed);
    assert_eq!((h.event_loop.callbacks[0])(), Readiness::Closed);
}

#[test]
fn configured_site_with_sqlite_backend() {
    let config = TillConfig::from_toml_str(
        r#"
        default_groups = true

        [database]
        url = "sqlite::memory:"

        [listener]
        address = "127.0.0.1:0"
        "#,
    )
    .unwrap();

    let actions = tillguard_auth::ActionRegistry::new();
    let groups = Arc::new(GroupRegistry::new());
    config.install(&actions, &groups);

    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let user =
        tillguard_infra::bootstrap_superuser(store.as_ref(), "Till Admin", "Admin", "ROOT1").unwrap();
    let mut clerk = UserRecord::new("Carol King", "Carol");
    clerk.permissions = vec!["skilled-user".into()];
    {
        let mut session = store.session().unwrap();
        session.save_user(&clerk).unwrap();
        session.save_token(&TokenRecord::new("CAROL", clerk.id, "badge")).unwrap();
        session.commit().unwrap();
    }

    let mut h = Harness::new(store.clone(), groups);
    h.send(b"CAROL");
    let session = Arc::clone(&h.session);
    assert!(h.event_loop.pump_until(|| session.is_active()));

    let current = h.session.current().unwrap();
    assert_eq!(current.user_id(), Some(clerk.id));
    assert!(current.may("sell-stock"));
    assert!(current.may("nosale"));
    assert!(!current.may("apply-discount"));
    assert!(!current.may("edit-user"));

    h.send(b"ROOT1");
    let session = Arc::clone(&h.session);
    assert!(h.event_loop.pump_until(|| session.current_user_id() == Some(user.id)));
    assert!(h.session.current().unwrap().may("edit-user"));
}
