//! The live sync session.
//!
//! A session is a single task that owns the connection state machine. Callers
//! talk to it through a cloneable [`Session`] handle:
//!
//! ```text
//!   Disconnected ──connect──▶ Connecting ──ok──▶ Connected ◀──▶ Polling ⇄ Syncing
//!        ▲                        │                                 │
//!        │                      fail                          reset/disable
//!        │                        ▼                                 │
//!        └──── budget spent ──── Error ──backoff──▶ Connecting      ▼
//!                                                              Disconnected
//! ```
//!
//! State is observable through [`Session::status`] and [`Session::watch`];
//! discrete happenings are delivered to [`Session::subscribe`]rs.

mod actor;
mod error;
mod machine;
mod state;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::{AnimationCodec, AnimationSink};
use crate::notify::Notifier;
use crate::settings::SessionSettings;
use crate::transport::Transport;

pub use error::SyncError;
pub use state::{SessionEvent, SessionState, SessionStatus, Subscription};

use actor::{Reply, SessionActor};
use machine::SyncSession;

const EVENT_CAPACITY: usize = 64;

/// Requests a [`Session`] handle sends to its actor.
#[derive(Debug)]
pub(crate) enum Command<A> {
    ToggleConnection,
    Connect,
    ConnectAndWait {
        reply: Reply<SessionStatus>,
    },
    Disconnect,
    ResetAttempts,
    SetPort(u16),
    SelectArmature(Option<String>),
    SetLiveSync(bool),
    Import {
        reply: Reply<()>,
    },
    Export {
        animation: A,
        target: Option<String>,
        reply: Reply<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running sync session.
///
/// All handles refer to the same session. Once the session has shut down
/// every method fails with [`SyncError::SessionClosed`].
pub struct Session<A> {
    commands: mpsc::UnboundedSender<Command<A>>,
    status: watch::Receiver<SessionStatus>,
    events: broadcast::Sender<SessionEvent>,
    closed: CancellationToken,
}

impl<A> Clone for Session<A> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            status: self.status.clone(),
            events: self.events.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<A: Send + 'static> Session<A> {
    /// Starts a session task on the current runtime.
    ///
    /// The session begins disconnected unless `settings.auto_connect` is set.
    pub fn spawn<T, C, S>(
        transport: T,
        codec: C,
        sink: S,
        notifier: Arc<dyn Notifier>,
        settings: SessionSettings,
    ) -> (Self, JoinHandle<()>)
    where
        T: Transport,
        C: AnimationCodec<Animation = A>,
        S: AnimationSink<A>,
    {
        let session = SyncSession::new(&settings);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(session.status());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let actor = SessionActor::new(
            session,
            settings,
            transport,
            codec,
            Box::new(sink),
            notifier,
            commands_rx,
            status_tx,
            events_tx.clone(),
        );
        let closed = CancellationToken::new();
        let guard = closed.clone().drop_guard();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            actor.run().await;
        });

        (
            Self {
                commands: commands_tx,
                status: status_rx,
                events: events_tx,
                closed,
            },
            handle,
        )
    }

    fn send(&self, command: Command<A>) -> Result<(), SyncError> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::SessionClosed)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command<A>,
    ) -> Result<T, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx))?;
        rx.await.map_err(|_| SyncError::SessionClosed)?
    }

    /// Connects when disconnected, otherwise tears the session down.
    ///
    /// Does nothing while the reconnect budget is spent; call
    /// [`Session::reset`] first.
    pub fn toggle_server_connection(&self) -> Result<(), SyncError> {
        self.send(Command::ToggleConnection)
    }

    /// Starts connecting if currently disconnected.
    pub fn connect(&self) -> Result<(), SyncError> {
        self.send(Command::Connect)
    }

    /// Connects and waits until the session is connected or gives up.
    ///
    /// Resolves immediately when already connected. Fails with
    /// [`SyncError::Exhausted`] once the reconnect budget runs out.
    pub async fn connect_and_wait(&self) -> Result<SessionStatus, SyncError> {
        self.request(|reply| Command::ConnectAndWait { reply }).await
    }

    /// Tears the session down to `Disconnected` and clears the attempt budget.
    pub fn disconnect(&self) -> Result<(), SyncError> {
        self.send(Command::Disconnect)
    }

    /// Clears a spent reconnect budget without connecting.
    pub fn reset(&self) -> Result<(), SyncError> {
        self.send(Command::ResetAttempts)
    }

    /// Changes the server port. A connected session is torn down first.
    pub fn set_port(&self, port: u16) -> Result<(), SyncError> {
        self.send(Command::SetPort(port))
    }

    /// Selects the rig to sync, or clears the selection.
    ///
    /// Clearing it resets the session. Switching rigs cancels rig-bound work
    /// and forgets the fingerprint but keeps the connection.
    pub fn select_armature(&self, armature: Option<String>) -> Result<(), SyncError> {
        self.send(Command::SelectArmature(armature))
    }

    /// Turns live sync on or off. Turning it off resets the session.
    pub fn set_live_sync(&self, enabled: bool) -> Result<(), SyncError> {
        self.send(Command::SetLiveSync(enabled))
    }

    /// Fetches the selected rig's animation and hands it to the sink.
    ///
    /// Waits behind any request already in flight.
    pub async fn import_now(&self) -> Result<(), SyncError> {
        self.request(|reply| Command::Import { reply }).await
    }

    /// Sends `animation` to the server.
    ///
    /// `target` defaults to the selected rig. Waits behind any request
    /// already in flight.
    pub async fn export_now(&self, animation: A, target: Option<String>) -> Result<(), SyncError> {
        self.request(|reply| Command::Export {
            animation,
            target,
            reply,
        })
        .await
    }

    /// Latest published snapshot.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// A receiver that is notified whenever the snapshot changes.
    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription::new(self.events.subscribe(), self.closed.clone())
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Stops the session, cancelling anything in flight.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply: tx })?;
        rx.await.map_err(|_| SyncError::SessionClosed)
    }
}
