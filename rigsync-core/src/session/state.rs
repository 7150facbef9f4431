//! Observable session state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::fingerprint::Fingerprint;

/// Connection lifecycle of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Polling,
    Syncing,
    Error,
}

impl SessionState {
    /// True once the server has answered and until the session is torn down.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Polling | SessionState::Syncing
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Polling => write!(f, "polling"),
            SessionState::Syncing => write!(f, "syncing"),
            SessionState::Error => write!(f, "error"),
        }
    }
}

/// Read-only snapshot of a session, published after every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub port: u16,
    pub armature: Option<String>,
    pub fingerprint: Option<Fingerprint>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub live_sync: bool,
    /// Set when the reconnect budget ran out; cleared by a reset.
    pub exhausted: bool,
    /// Armatures from the last successful listing.
    pub armatures: Vec<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Identifies the current session epoch. Changes on every reset.
    pub epoch: Uuid,
}

/// Discrete things that happened in a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    ArmaturesListed(Vec<String>),
    AnimationImported {
        armature: String,
        fingerprint: Option<Fingerprint>,
    },
    AnimationExported {
        armature: Option<String>,
    },
    SyncFailed {
        message: String,
    },
    ReconnectExhausted {
        attempts: u32,
    },
}

/// A live subscription to [`SessionEvent`]s.
///
/// Dropping it or calling [`Subscription::unsubscribe`] detaches it from the
/// session.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<SessionEvent>,
    closed: CancellationToken,
}

impl Subscription {
    /// `closed` is cancelled when the session task stops.
    pub(crate) fn new(rx: broadcast::Receiver<SessionEvent>, closed: CancellationToken) -> Self {
        Self { rx, closed }
    }

    /// Waits for the next event. Returns `None` once the session task has
    /// stopped and every event it sent has been delivered, even while
    /// [`Session`](super::Session) handles are still alive.
    ///
    /// A subscriber that falls behind skips the events it missed.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        loop {
            tokio::select! {
                biased;
                result = self.rx.recv() => match result {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Session subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
                _ = self.closed.cancelled() => return None,
            }
        }
    }

    /// Returns the next event if one is already queued.
    pub fn try_next(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}
