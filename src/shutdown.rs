//! Graceful shutdown coordination.
//!
//! A watch channel broadcasts the shutdown signal to every live stream
//! session; an atomic counter plus `Notify` lets the server wait for the
//! sessions to drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};

use crate::metrics;

/// Shutdown coordinator shared by the server and its sessions.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<ShutdownInner>,
}

struct ShutdownInner {
    shutdown_tx: watch::Sender<bool>,
    active_sessions: AtomicU64,
    drain_notify: Notify,
    next_session_id: AtomicU64,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ShutdownInner {
                shutdown_tx,
                active_sessions: AtomicU64::new(0),
                drain_notify: Notify::new(),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Signal shutdown to the server and all sessions.
    pub fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    /// Get a receiver to watch for shutdown.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.shutdown_tx.subscribe()
    }

    /// Resolves once shutdown has been signaled.
    pub async fn signalled(&self) {
        let mut rx = self.subscribe();
        // Err means the sender is gone, which only happens once `self` is dropped.
        let _ = rx.wait_for(|stop| *stop).await;
    }

    pub fn active_sessions(&self) -> u64 {
        self.inner.active_sessions.load(Ordering::Relaxed)
    }

    /// Register a new session and return a guard that unregisters it on drop.
    pub fn register_session(&self) -> SessionGuard {
        let id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);
        let count = self.inner.active_sessions.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_active_sessions(count);

        SessionGuard {
            coordinator: self.clone(),
            id,
        }
    }

    /// Wait for all sessions to drain.
    pub async fn wait_for_drain(&self) {
        loop {
            // Arm the notification before reading the count so a release in between is not lost.
            let notified = self.inner.drain_notify.notified();
            if self.inner.active_sessions.load(Ordering::Relaxed) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn unregister_session(&self) {
        let result = self.inner.active_sessions.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |curr| curr.checked_sub(1),
        );

        match result {
            Ok(prev) => {
                let count = prev - 1;
                metrics::set_active_sessions(count);
                if count == 0 {
                    self.inner.drain_notify.notify_waiters();
                }
            }
            Err(_) => {
                tracing::error!("unregister_session called with no active sessions");
                metrics::set_active_sessions(0);
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one stream session.
pub struct SessionGuard {
    coordinator: ShutdownCoordinator,
    id: u64,
}

impl SessionGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get a receiver to watch for shutdown.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.coordinator.subscribe()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.coordinator.unregister_session();
    }
}
