//! Rigsync Core Library
//!
//! Live animation sync between a 3D tool and a game IDE: the HTTP transport,
//! change detection and the sync session state machine.

pub mod codec;
pub mod fingerprint;
pub mod notify;
pub mod session;
pub mod settings;
pub mod transport;

pub use codec::{Animation, AnimationCodec, AnimationSink, CodecError, JsonCodec, Keyframe, SinkError};
pub use fingerprint::{has_changed, Fingerprint};
pub use notify::{Notifier, RecordingNotifier, Severity, TracingNotifier};
pub use session::{Session, SessionEvent, SessionState, SessionStatus, Subscription, SyncError};
pub use settings::{SessionSettings, DEFAULT_PORT};
pub use transport::{AnimationStatus, BoneRest, Transport, TransportClient, TransportError};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
