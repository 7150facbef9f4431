//! The mutable session record.
//!
//! [`SyncSession`] is owned by exactly one actor task. It knows nothing about
//! I/O; the actor drives it and publishes [`SessionStatus`] snapshots.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::state::{SessionState, SessionStatus};
use crate::fingerprint::Fingerprint;
use crate::settings::SessionSettings;

/// One generation of a session. Work started in an epoch carries its token;
/// once the epoch ends the token is cancelled and late results are ignored.
#[derive(Debug)]
pub(crate) struct Epoch {
    id: Uuid,
    token: CancellationToken,
}

impl Epoch {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            token: CancellationToken::new(),
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for Epoch {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[derive(Debug)]
pub(crate) struct SyncSession {
    state: SessionState,
    port: u16,
    armature: Option<String>,
    fingerprint: Option<Fingerprint>,
    attempts: u32,
    max_attempts: u32,
    live_sync: bool,
    exhausted: bool,
    armatures: Vec<String>,
    last_synced_at: Option<chrono::DateTime<Utc>>,
    last_error: Option<String>,
    epoch: Epoch,
}

impl SyncSession {
    pub(crate) fn new(settings: &SessionSettings) -> Self {
        Self {
            state: SessionState::Disconnected,
            port: settings.port,
            armature: None,
            fingerprint: None,
            attempts: 0,
            max_attempts: settings.max_reconnect_attempts,
            live_sync: settings.live_sync_enabled,
            exhausted: false,
            armatures: Vec::new(),
            last_synced_at: None,
            last_error: None,
            epoch: Epoch::new(),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    /// Moves to `to`, returning the transition if the state actually changed.
    pub(crate) fn set_state(&mut self, to: SessionState) -> Option<(SessionState, SessionState)> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        tracing::debug!(epoch = %self.epoch.id, %from, %to, "Session state changed");
        Some((from, to))
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    pub(crate) fn armature(&self) -> Option<&str> {
        self.armature.as_deref()
    }

    pub(crate) fn set_armature(&mut self, armature: Option<String>) {
        self.armature = armature;
    }

    pub(crate) fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn live_sync(&self) -> bool {
        self.live_sync
    }

    pub(crate) fn set_live_sync(&mut self, enabled: bool) {
        self.live_sync = enabled;
    }

    pub(crate) fn epoch_id(&self) -> Uuid {
        self.epoch.id()
    }

    pub(crate) fn epoch_token(&self) -> CancellationToken {
        self.epoch.token()
    }

    /// True while another connection attempt fits in the budget.
    pub(crate) fn can_attempt(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Counts a connection attempt. Returns false, without counting, when the
    /// budget is already spent.
    pub(crate) fn begin_attempt(&mut self) -> bool {
        if !self.can_attempt() {
            return false;
        }
        self.attempts += 1;
        true
    }

    pub(crate) fn connected(&mut self, armatures: Vec<String>) {
        self.attempts = 0;
        self.exhausted = false;
        self.last_error = None;
        self.armatures = armatures;
    }

    /// Marks the budget as spent. Returns false if it was already marked.
    pub(crate) fn exhaust(&mut self) -> bool {
        let first = !self.exhausted;
        self.exhausted = true;
        first
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Clears the attempt budget so connecting is allowed again.
    pub(crate) fn reset_attempts(&mut self) {
        self.attempts = 0;
        self.exhausted = false;
    }

    /// Live polling runs only with live sync on and a rig selected.
    pub(crate) fn should_poll(&self) -> bool {
        self.live_sync && self.armature.is_some()
    }

    pub(crate) fn synced(&mut self, fingerprint: Option<Fingerprint>) {
        if let Some(fingerprint) = fingerprint {
            self.fingerprint = Some(fingerprint);
        }
        self.last_synced_at = Some(Utc::now());
        self.last_error = None;
    }

    pub(crate) fn set_last_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    /// Ends the current epoch without touching connection state.
    ///
    /// Anything in flight becomes stale and the fingerprint is forgotten.
    pub(crate) fn new_epoch(&mut self) {
        self.epoch = Epoch::new();
        self.fingerprint = None;
    }

    /// Full teardown back to a fresh, disconnected session.
    ///
    /// Keeps port, armature selection and the live flag; the caller decides
    /// which of those to change.
    pub(crate) fn reset(&mut self) {
        self.new_epoch();
        self.attempts = 0;
        self.exhausted = false;
        self.armatures.clear();
    }

    pub(crate) fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            port: self.port,
            armature: self.armature.clone(),
            fingerprint: self.fingerprint.clone(),
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            live_sync: self.live_sync,
            exhausted: self.exhausted,
            armatures: self.armatures.clone(),
            last_synced_at: self.last_synced_at,
            last_error: self.last_error.clone(),
            epoch: self.epoch.id(),
        }
    }
}
