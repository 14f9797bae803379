//! Registry of live sessions
//!
//! Owned by the server. Each entry holds the session's cancellation token,
//! its statistics receiver and the task running it, so shutdown can stop
//! and join every session deterministically.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::stats::SessionStats;

/// Handle to one running session
#[derive(Debug)]
pub struct SessionHandle {
    pub peer_addr: SocketAddr,
    cancel: CancellationToken,
    stats: watch::Receiver<SessionStats>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn new(
        peer_addr: SocketAddr,
        cancel: CancellationToken,
        stats: watch::Receiver<SessionStats>,
    ) -> Self {
        Self {
            peer_addr,
            cancel,
            stats,
            task: None,
        }
    }

    /// Latest statistics published by the session
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }

    /// Ask the session to stop
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the session task to finish
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Session task failed");
            }
        }
    }
}

/// Live sessions keyed by session ID
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<u64, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a session before its task starts
    pub fn insert(&self, session_id: u64, handle: SessionHandle) {
        self.lock().insert(session_id, handle);
    }

    /// Attach the task running a registered session.
    ///
    /// If the session already finished and removed itself, the task is
    /// dropped (detached); it has nothing left to do.
    pub fn attach(&self, session_id: u64, task: JoinHandle<()>) {
        if let Some(handle) = self.lock().get_mut(&session_id) {
            handle.task = Some(task);
        }
    }

    /// Remove a session from the active set
    pub fn remove(&self, session_id: u64) -> Option<SessionHandle> {
        self.lock().remove(&session_id)
    }

    /// Stop one session. Returns false if no such session is live.
    pub fn disconnect(&self, session_id: u64) -> bool {
        match self.lock().get(&session_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Statistics for every live session, ordered by session ID
    pub fn snapshots(&self) -> Vec<SessionStats> {
        let mut stats: Vec<SessionStats> = self.lock().values().map(SessionHandle::stats).collect();
        stats.sort_by_key(|s| s.session_id);
        stats
    }

    /// Take every handle out of the registry
    pub fn drain(&self) -> Vec<SessionHandle> {
        self.lock().drain().map(|(_, handle)| handle).collect()
    }
}
