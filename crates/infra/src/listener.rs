//! Network credential listener.
//!
//! A UDP socket registered with the host event loop. Each datagram carries
//! one token; a recognised token installs its owner as the current actor.

use std::cell::Cell;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;
use std::sync::Arc;

use tillguard_auth::{Actor, CredentialToken, GroupRegistry, Notices, SessionContext};

use crate::credentials::{CredentialError, CredentialStore};
use crate::store::Persistence;

/// Largest datagram read in one receive.
pub const MAX_DATAGRAM: usize = 1024;

/// What a readiness callback tells the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// More may be waiting; call again.
    Pending,
    /// Nothing left until the fd becomes readable again.
    Drained,
    /// Stop watching this fd.
    Closed,
}

/// The host's event loop, as far as the listener is concerned.
pub trait EventLoop {
    /// Call `callback` whenever `fd` becomes readable.
    fn add_fd(&mut self, fd: RawFd, callback: Box<dyn FnMut() -> Readiness>, description: &str);
}

/// UI reactions to an arriving token.
pub trait ListenerHooks {
    /// Wake the display before anything else happens.
    fn unblank_screen(&self) {}

    /// A token resolved to `actor`, who is now the current actor.
    fn credential_arrived(&self, _actor: &Arc<Actor>) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl ListenerHooks for NoHooks {}

/// Everything a listener needs to turn a token into a login.
#[derive(Clone)]
pub struct ListenerContext {
    pub store: Arc<dyn Persistence>,
    pub groups: Arc<GroupRegistry>,
    pub session: Arc<SessionContext>,
    pub notices: Arc<dyn Notices>,
    pub hooks: Arc<dyn ListenerHooks>,
}

/// Where datagrams are read from; a bound UDP socket outside tests.
trait DatagramSource: AsRawFd {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

impl DatagramSource for UdpSocket {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Listening,
    Closed,
}

/// A bound token listener.
///
/// Cloning shares the socket; the event loop holds one clone inside its
/// callback.
#[derive(Clone)]
pub struct CredentialListener {
    inner: Rc<ListenerInner>,
}

struct ListenerInner {
    source: Box<dyn DatagramSource>,
    local_addr: SocketAddr,
    state: Cell<ListenerState>,
    ctx: ListenerContext,
}

impl CredentialListener {
    pub fn bind(address: SocketAddr, ctx: ListenerContext) -> io::Result<Self> {
        let socket = UdpSocket::bind(address)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;
        tracing::info!(address = %local_addr, "token listener bound");
        Ok(Self::from_source(Box::new(socket), local_addr, ctx))
    }

    fn from_source(
        source: Box<dyn DatagramSource>,
        local_addr: SocketAddr,
        ctx: ListenerContext,
    ) -> Self {
        Self {
            inner: Rc::new(ListenerInner {
                source,
                local_addr,
                state: Cell::new(ListenerState::Idle),
                ctx,
            }),
        }
    }

    /// Hand the socket to `event_loop`. Only an idle listener registers.
    pub fn register(&self, event_loop: &mut dyn EventLoop) {
        if self.inner.state.get() != ListenerState::Idle {
            return;
        }
        let inner = Rc::clone(&self.inner);
        event_loop.add_fd(
            self.inner.source.as_raw_fd(),
            Box::new(move || inner.poll_once()),
            "token listener",
        );
        self.inner.state.set(ListenerState::Listening);
    }

    /// One non-blocking receive and its handling.
    pub fn poll_once(&self) -> Readiness {
        self.inner.poll_once()
    }

    /// Stop handling datagrams; the event loop drops the fd on its next callback.
    pub fn close(&self) {
        self.inner.state.set(ListenerState::Closed);
    }

    pub fn state(&self) -> ListenerState {
        self.inner.state.get()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }
}

impl core::fmt::Debug for CredentialListener {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CredentialListener")
            .field("local_addr", &self.inner.local_addr)
            .field("state", &self.inner.state.get())
            .finish()
    }
}

impl ListenerInner {
    fn poll_once(&self) -> Readiness {
        if self.state.get() == ListenerState::Closed {
            return Readiness::Closed;
        }

        let mut buf = [0u8; MAX_DATAGRAM];
        match self.source.recv_from(&mut buf) {
            Ok((len, peer)) => {
                self.handle(&buf[..len], peer);
                Readiness::Pending
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Readiness::Drained,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Readiness::Pending,
            Err(err) => {
                tracing::warn!(error = %err, address = %self.local_addr, "token listener closed");
                self.state.set(ListenerState::Closed);
                Readiness::Closed
            }
        }
    }

    fn handle(&self, payload: &[u8], peer: SocketAddr) {
        let token = match CredentialToken::from_datagram(payload) {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::debug!(%peer, "empty datagram ignored");
                return;
            }
            Err(err) => {
                tracing::debug!(%peer, error = %err, "undecodable datagram ignored");
                return;
            }
        };
        tracing::debug!(%peer, token = %token, "token received");

        self.ctx.hooks.unblank_screen();
        let credentials = CredentialStore::new(self.ctx.store.as_ref(), &self.ctx.groups);
        match credentials.resolve(&token) {
            Ok(actor) => {
                let actor = Arc::new(actor);
                self.ctx.session.login(Arc::clone(&actor));
                self.ctx.hooks.credential_arrived(&actor);
            }
            Err(err @ (CredentialError::Unrecognized(_) | CredentialError::InactiveActor(_))) => {
                self.ctx.notices.toast(&err.to_string());
            }
            Err(err) => {
                tracing::warn!(error = %err, token = %token, "token lookup failed");
                self.ctx
                    .notices
                    .toast(&format!("Could not check user token '{}': {}", token, err));
            }
        }
    }
}
