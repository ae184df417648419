//! A tokio-backed [`EventLoop`] for the `tillguard` binary.
//!
//! Single-threaded: a current-thread runtime driving a `LocalSet`, so
//! callbacks need not be `Send`.

use std::future::Future;
use std::io;
use std::os::fd::{AsRawFd, RawFd};

use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tokio::runtime::Runtime;
use tokio::task::LocalSet;

use crate::listener::{EventLoop, Readiness};

/// Borrowed fd; the callback's owner keeps the real socket alive.
struct RawSource(RawFd);

impl AsRawFd for RawSource {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

pub struct TokioEventLoop {
    // Dropped before the runtime so watchers deregister while the reactor is alive.
    local: LocalSet,
    runtime: Runtime,
    watched: usize,
}

impl TokioEventLoop {
    pub fn new() -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            local: LocalSet::new(),
            runtime,
            watched: 0,
        })
    }

    /// Number of fds handed to the loop so far.
    pub fn watched(&self) -> usize {
        self.watched
    }

    /// Drive every registered callback until `shutdown` completes.
    pub fn run_until<F: Future>(&mut self, shutdown: F) -> F::Output {
        self.runtime.block_on(self.local.run_until(shutdown))
    }
}

impl EventLoop for TokioEventLoop {
    fn add_fd(&mut self, fd: RawFd, callback: Box<dyn FnMut() -> Readiness>, description: &str) {
        tracing::debug!(fd, description, "watching fd");
        self.watched += 1;
        self.local.spawn_local(watch(fd, callback, description.to_string()));
    }
}

impl core::fmt::Debug for TokioEventLoop {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokioEventLoop")
            .field("watched", &self.watched)
            .finish()
    }
}

async fn watch(fd: RawFd, mut callback: Box<dyn FnMut() -> Readiness>, description: String) {
    // Declared after `callback` so it deregisters before the socket can close.
    let source = match AsyncFd::with_interest(RawSource(fd), Interest::READABLE) {
        Ok(source) => source,
        Err(err) => {
            tracing::warn!(error = %err, description = %description, "cannot watch fd");
            return;
        }
    };

    loop {
        let mut guard = match source.readable().await {
            Ok(guard) => guard,
            Err(err) => {
                tracing::warn!(error = %err, description = %description, "fd watch failed");
                return;
            }
        };
        match callback() {
            Readiness::Pending => {
                // Readiness is kept; let other tasks run before the next receive.
                drop(guard);
                tokio::task::yield_now().await;
            }
            Readiness::Drained => guard.clear_ready(),
            Readiness::Closed => {
                tracing::debug!(description = %description, "fd closed");
                return;
            }
        }
    }
}
