//! Session actor: the only place a [`SyncSession`] is mutated.
//!
//! The actor reacts to three sources: commands from [`Session`] handles,
//! results of background requests, and a single timer (poll tick or
//! reconnect backoff). At most one request is in flight at any time, so
//! polls, live syncs and manual imports/exports against a session are
//! strictly serialized.
//!
//! [`Session`]: super::Session

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::error::SyncError;
use super::machine::SyncSession;
use super::state::{SessionEvent, SessionState, SessionStatus};
use super::Command;
use crate::codec::{AnimationCodec, AnimationSink};
use crate::fingerprint::{self, Fingerprint};
use crate::notify::{Notifier, Severity};
use crate::settings::SessionSettings;
use crate::transport::{AnimationStatus, Transport, TransportError};

pub(crate) type Reply<T> = oneshot::Sender<Result<T, SyncError>>;

/// Result of a background request.
#[derive(Debug)]
pub(crate) enum Outcome {
    Listed(Result<Vec<String>, TransportError>),
    Status(Option<AnimationStatus>),
    Fetched(Result<Vec<u8>, TransportError>),
    Sent(Result<(), TransportError>),
}

/// An outcome tagged with the epoch it was started in.
#[derive(Debug)]
pub(crate) struct Tagged {
    pub(crate) token: CancellationToken,
    pub(crate) outcome: Outcome,
}

/// The request currently awaiting a result.
#[derive(Debug)]
pub(crate) enum InFlight {
    Connect,
    Poll,
    LiveSync {
        armature: String,
        hash: Fingerprint,
    },
    Import {
        armature: String,
        reply: Reply<()>,
    },
    Export {
        target: Option<String>,
        reply: Reply<()>,
    },
}

impl InFlight {
    fn cancel(self) {
        match self {
            InFlight::Import { reply, .. } | InFlight::Export { reply, .. } => {
                let _ = reply.send(Err(SyncError::Cancelled));
            }
            _ => {}
        }
    }
}

/// A manual request waiting for the session to go idle.
#[derive(Debug)]
pub(crate) enum ManualOp {
    Import {
        armature: String,
        reply: Reply<()>,
    },
    Export {
        payload: Vec<u8>,
        target: Option<String>,
        reply: Reply<()>,
    },
}

impl ManualOp {
    fn cancel(self) {
        match self {
            ManualOp::Import { reply, .. } | ManualOp::Export { reply, .. } => {
                let _ = reply.send(Err(SyncError::Cancelled));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Timer {
    Poll,
    Reconnect,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub(crate) struct SessionActor<T, C>
where
    C: AnimationCodec,
{
    session: SyncSession,
    settings: SessionSettings,
    transport: T,
    codec: C,
    sink: Box<dyn AnimationSink<C::Animation>>,
    notifier: Arc<dyn Notifier>,
    commands: mpsc::UnboundedReceiver<Command<C::Animation>>,
    outcomes_tx: mpsc::UnboundedSender<Tagged>,
    outcomes_rx: mpsc::UnboundedReceiver<Tagged>,
    status_tx: watch::Sender<SessionStatus>,
    events: broadcast::Sender<SessionEvent>,
    in_flight: Option<InFlight>,
    queue: VecDeque<ManualOp>,
    waiters: Vec<Reply<SessionStatus>>,
    timer: Option<(Instant, Timer)>,
}

impl<T, C> SessionActor<T, C>
where
    T: Transport,
    C: AnimationCodec,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        session: SyncSession,
        settings: SessionSettings,
        transport: T,
        codec: C,
        sink: Box<dyn AnimationSink<C::Animation>>,
        notifier: Arc<dyn Notifier>,
        commands: mpsc::UnboundedReceiver<Command<C::Animation>>,
        status_tx: watch::Sender<SessionStatus>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        Self {
            session,
            settings,
            transport,
            codec,
            sink,
            notifier,
            commands,
            outcomes_tx,
            outcomes_rx,
            status_tx,
            events,
            in_flight: None,
            queue: VecDeque::new(),
            waiters: Vec::new(),
            timer: None,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::debug!(port = self.session.port(), "Sync session started");

        if self.settings.auto_connect {
            self.connect();
        }
        self.settle();
        self.publish();

        loop {
            let deadline = self.timer.map(|(at, _)| at);

            let flow = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        self.teardown();
                        Flow::Stop
                    }
                },
                Some(tagged) = self.outcomes_rx.recv() => {
                    self.handle_outcome(tagged);
                    Flow::Continue
                }
                _ = sleep_until(deadline), if deadline.is_some() => {
                    self.fire_timer();
                    Flow::Continue
                }
            };

            if flow == Flow::Stop {
                break;
            }
            self.settle();
            self.publish();
        }

        self.publish();
        tracing::debug!("Sync session stopped");
    }

    fn handle_command(&mut self, command: Command<C::Animation>) -> Flow {
        match command {
            Command::ToggleConnection => {
                if self.session.state() == SessionState::Disconnected {
                    self.connect();
                } else {
                    self.disconnect();
                }
            }
            Command::Connect => self.connect(),
            Command::ConnectAndWait { reply } => {
                if self.session.state().is_connected() {
                    let _ = reply.send(Ok(self.session.status()));
                } else {
                    self.waiters.push(reply);
                    self.connect();
                }
            }
            Command::Disconnect => self.disconnect(),
            Command::ResetAttempts => {
                if !self.session.state().is_connected() {
                    self.session.reset_attempts();
                }
            }
            Command::SetPort(port) => {
                if port != self.session.port() {
                    self.disconnect();
                    self.session.set_port(port);
                }
            }
            Command::SelectArmature(armature) => self.select_armature(armature),
            Command::SetLiveSync(enabled) => self.set_live_sync(enabled),
            Command::Import { reply } => {
                let Some(armature) = self.session.armature().map(str::to_string) else {
                    let _ = reply.send(Err(SyncError::NoArmature));
                    return Flow::Continue;
                };
                self.request_manual(ManualOp::Import { armature, reply });
            }
            Command::Export {
                animation,
                target,
                reply,
            } => {
                let target = target.or_else(|| self.session.armature().map(str::to_string));
                match self.codec.encode(&animation) {
                    Ok(payload) => self.request_manual(ManualOp::Export {
                        payload,
                        target,
                        reply,
                    }),
                    Err(e) => {
                        let err = SyncError::from(e);
                        self.sync_failed(format!("Export failed: {}", err));
                        let _ = reply.send(Err(err));
                    }
                }
            }
            Command::Shutdown { reply } => {
                self.teardown();
                let _ = reply.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    pub(crate) fn handle_outcome(&mut self, tagged: Tagged) {
        if tagged.token.is_cancelled() {
            tracing::debug!(
                epoch = %self.session.epoch_id(),
                "Discarding result from a cancelled session epoch"
            );
            return;
        }

        let Some(in_flight) = self.in_flight.take() else {
            tracing::debug!("Discarding result with no request in flight");
            return;
        };

        match (in_flight, tagged.outcome) {
            (InFlight::Connect, Outcome::Listed(result)) => self.on_listed(result),
            (InFlight::Poll, Outcome::Status(status)) => self.on_status(status),
            (InFlight::LiveSync { armature, hash }, Outcome::Fetched(result)) => {
                self.on_live_fetch(armature, hash, result)
            }
            (InFlight::Import { armature, reply }, Outcome::Fetched(result)) => {
                self.on_manual_import(armature, reply, result)
            }
            (InFlight::Export { target, reply }, Outcome::Sent(result)) => {
                self.on_export(target, reply, result)
            }
            (in_flight, outcome) => {
                tracing::warn!(?in_flight, ?outcome, "Result does not match request in flight");
                in_flight.cancel();
            }
        }
    }

    fn fire_timer(&mut self) {
        let Some((_, timer)) = self.timer.take() else {
            return;
        };

        match timer {
            Timer::Reconnect => {
                if self.session.state() == SessionState::Error {
                    self.attempt_connect();
                }
            }
            Timer::Poll => self.tick(),
        }
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    fn connect(&mut self) {
        if self.session.state() != SessionState::Disconnected {
            return;
        }
        if !self.session.can_attempt() {
            tracing::debug!(
                attempts = self.session.attempts(),
                "Reconnect budget spent; ignoring connect request"
            );
            self.exhaust();
            return;
        }
        self.attempt_connect();
    }

    fn attempt_connect(&mut self) {
        if !self.session.begin_attempt() {
            self.exhaust();
            return;
        }
        self.transition(SessionState::Connecting);

        let port = self.session.port();
        tracing::debug!(port, attempt = self.session.attempts(), "Connecting to server");
        let transport = self.transport.clone();
        self.start(InFlight::Connect, async move {
            Outcome::Listed(transport.list_armatures(port).await)
        });
    }

    fn on_listed(&mut self, result: Result<Vec<String>, TransportError>) {
        match result {
            Ok(armatures) => {
                tracing::info!(
                    port = self.session.port(),
                    count = armatures.len(),
                    "Connected to server"
                );
                self.session.connected(armatures.clone());
                self.transition(SessionState::Connected);
                self.emit(SessionEvent::ArmaturesListed(armatures));

                let status = self.session.status();
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Ok(status.clone()));
                }
            }
            Err(e) => {
                self.session.set_last_error(e.to_string());
                self.transition(SessionState::Error);

                if self.session.can_attempt() {
                    let delay = self.settings.reconnect_delay(self.session.attempts());
                    tracing::debug!(?delay, "Retrying connection after backoff");
                    self.timer = Some((Instant::now() + delay, Timer::Reconnect));
                } else {
                    self.exhaust();
                }
            }
        }
    }

    fn exhaust(&mut self) {
        self.timer = None;
        self.transition(SessionState::Disconnected);

        let attempts = self.session.attempts();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(SyncError::Exhausted { attempts }));
        }

        if self.session.exhaust() {
            let message = format!(
                "Could not connect to the server on port {} after {} attempt(s). \
                 Make sure it is running, then connect again.",
                self.session.port(),
                attempts
            );
            tracing::warn!(attempts, "Reconnect budget exhausted");
            self.notifier.notify(Severity::Warning, &message);
            self.emit(SessionEvent::ReconnectExhausted { attempts });
        }
    }

    /// Cancels everything and returns to a fresh disconnected session.
    fn disconnect(&mut self) {
        self.cancel_requests();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(SyncError::Cancelled));
        }
        self.session.reset();
        self.timer = None;
        self.transition(SessionState::Disconnected);
    }

    fn teardown(&mut self) {
        self.disconnect();
        self.session.set_armature(None);
    }

    /// Ends the epoch: in-flight results become stale and waiters are told so.
    fn cancel_requests(&mut self) {
        self.session.new_epoch();
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.cancel();
        }
        for op in self.queue.drain(..) {
            op.cancel();
        }
        if matches!(self.timer, Some((_, Timer::Poll))) {
            self.timer = None;
        }
    }

    fn select_armature(&mut self, armature: Option<String>) {
        if armature.as_deref() == self.session.armature() {
            return;
        }

        match armature {
            None => {
                self.disconnect();
                self.session.set_armature(None);
            }
            Some(name) => {
                // A pending connect keeps running; only rig-bound work is dropped.
                if self.session.state().is_connected() {
                    self.cancel_requests();
                    self.transition(SessionState::Connected);
                }
                tracing::debug!(armature = %name, "Armature selected");
                self.session.set_armature(Some(name));
            }
        }
    }

    fn set_live_sync(&mut self, enabled: bool) {
        if enabled {
            // Settings may have seeded the flag without connecting.
            self.session.set_live_sync(true);
            if self.session.state() == SessionState::Disconnected {
                self.connect();
            }
        } else if self.session.live_sync() {
            self.session.set_live_sync(false);
            self.disconnect();
        }
    }

    // ------------------------------------------------------------------
    // Polling and syncing
    // ------------------------------------------------------------------

    /// Starts queued work or schedules the next poll once nothing is in flight.
    fn settle(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        let state = self.session.state();
        if !state.is_connected() {
            return;
        }

        if let Some(op) = self.queue.pop_front() {
            self.start_manual(op);
            return;
        }

        if self.session.should_poll() {
            if state != SessionState::Polling {
                let delay = if state == SessionState::Connected {
                    Duration::ZERO
                } else {
                    self.settings.poll_interval()
                };
                self.transition(SessionState::Polling);
                self.timer = Some((Instant::now() + delay, Timer::Poll));
            } else if self.timer.is_none() {
                self.timer = Some((Instant::now() + self.settings.poll_interval(), Timer::Poll));
            }
        } else {
            if matches!(self.timer, Some((_, Timer::Poll))) {
                self.timer = None;
            }
            self.transition(SessionState::Connected);
        }
    }

    fn tick(&mut self) {
        if self.in_flight.is_some() || self.session.state() != SessionState::Polling {
            return;
        }
        let Some(armature) = self.session.armature().map(str::to_string) else {
            return;
        };

        let port = self.session.port();
        let last = self.session.fingerprint().cloned();
        let transport = self.transport.clone();
        self.start(InFlight::Poll, async move {
            Outcome::Status(
                transport
                    .check_animation_status(port, &armature, last.as_ref())
                    .await,
            )
        });
    }

    fn on_status(&mut self, status: Option<AnimationStatus>) {
        // Failed polls are expected while the counterpart is busy; the next
        // tick tries again.
        let Some(status) = status else {
            return;
        };
        let Some(armature) = self.session.armature().map(str::to_string) else {
            return;
        };

        if !status.has_changed && !fingerprint::has_changed(self.session.fingerprint(), &status.hash)
        {
            return;
        }

        tracing::debug!(%armature, hash = %status.hash, "Animation changed on server");
        self.transition(SessionState::Syncing);

        let port = self.session.port();
        let transport = self.transport.clone();
        let name = armature.clone();
        self.start(
            InFlight::LiveSync {
                armature,
                hash: status.hash,
            },
            async move { Outcome::Fetched(transport.import_animation(port, &name).await) },
        );
    }

    fn on_live_fetch(
        &mut self,
        armature: String,
        hash: Fingerprint,
        result: Result<Vec<u8>, TransportError>,
    ) {
        match self.apply_payload(&armature, result) {
            Ok(()) => {
                tracing::info!(%armature, %hash, "Live sync applied animation");
                self.session.synced(Some(hash.clone()));
                self.emit(SessionEvent::AnimationImported {
                    armature,
                    fingerprint: Some(hash),
                });
            }
            Err(e) => {
                self.sync_failed(format!("Live sync of '{}' failed: {}", armature, e));
            }
        }
    }

    // ------------------------------------------------------------------
    // Manual import/export
    // ------------------------------------------------------------------

    fn request_manual(&mut self, op: ManualOp) {
        if !self.session.state().is_connected() {
            let reply = match op {
                ManualOp::Import { reply, .. } | ManualOp::Export { reply, .. } => reply,
            };
            let _ = reply.send(Err(SyncError::NotConnected));
            return;
        }
        // Started by `settle` as soon as nothing else is in flight.
        self.queue.push_back(op);
    }

    fn start_manual(&mut self, op: ManualOp) {
        self.transition(SessionState::Syncing);
        let port = self.session.port();
        let transport = self.transport.clone();

        match op {
            ManualOp::Import { armature, reply } => {
                let name = armature.clone();
                self.start(InFlight::Import { armature, reply }, async move {
                    Outcome::Fetched(transport.import_animation(port, &name).await)
                });
            }
            ManualOp::Export {
                payload,
                target,
                reply,
            } => {
                let name = target.clone();
                self.start(InFlight::Export { target, reply }, async move {
                    Outcome::Sent(
                        transport
                            .export_animation(port, payload, name.as_deref())
                            .await,
                    )
                });
            }
        }
    }

    fn on_manual_import(
        &mut self,
        armature: String,
        reply: Reply<()>,
        result: Result<Vec<u8>, TransportError>,
    ) {
        match self.apply_payload(&armature, result) {
            Ok(()) => {
                tracing::info!(%armature, "Imported animation");
                self.session.synced(None);
                self.emit(SessionEvent::AnimationImported {
                    armature,
                    fingerprint: None,
                });
                let _ = reply.send(Ok(()));
            }
            Err(e) => {
                self.sync_failed(format!("Import of '{}' failed: {}", armature, e));
                let _ = reply.send(Err(e));
            }
        }
    }

    fn on_export(
        &mut self,
        target: Option<String>,
        reply: Reply<()>,
        result: Result<(), TransportError>,
    ) {
        match result {
            Ok(()) => {
                tracing::info!(?target, "Exported animation");
                self.session.synced(None);
                self.emit(SessionEvent::AnimationExported { armature: target });
                let _ = reply.send(Ok(()));
            }
            Err(e) => {
                self.sync_failed(format!("Export failed: {}", e));
                let _ = reply.send(Err(e.into()));
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn apply_payload(
        &mut self,
        armature: &str,
        result: Result<Vec<u8>, TransportError>,
    ) -> Result<(), SyncError> {
        let bytes = result?;
        let animation = self.codec.decode(&bytes)?;
        self.sink.apply(armature, animation)?;
        Ok(())
    }

    /// Surfaces a failed import/export to the user.
    fn sync_failed(&mut self, message: String) {
        self.session.set_last_error(message.clone());
        self.notifier.notify(Severity::Warning, &message);
        self.emit(SessionEvent::SyncFailed { message });
    }

    /// Spawns `request` in the current epoch and marks it in flight.
    ///
    /// The task gives up as soon as the epoch is cancelled; a result that
    /// still slips through is rejected in `handle_outcome`.
    fn start<F>(&mut self, in_flight: InFlight, request: F)
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        let token = self.session.epoch_token();
        let tx = self.outcomes_tx.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => return,
                outcome = request => outcome,
            };
            let _ = tx.send(Tagged { token, outcome });
        });
        self.in_flight = Some(in_flight);
    }

    fn transition(&mut self, to: SessionState) {
        if let Some((from, to)) = self.session.set_state(to) {
            self.emit(SessionEvent::StateChanged { from, to });
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        let status = self.session.status();
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn session_mut(&mut self) -> &mut SyncSession {
        &mut self.session
    }

    #[cfg(test)]
    pub(crate) fn set_in_flight(&mut self, in_flight: InFlight) {
        self.in_flight = Some(in_flight);
    }

    #[cfg(test)]
    pub(crate) fn status(&self) -> SessionStatus {
        self.session.status()
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
