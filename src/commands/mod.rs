mod animation_cmd;
mod armature_cmd;
mod config_cmd;
mod live_cmd;

pub use animation_cmd::{ExportArgs, ImportArgs, StatusArgs};
pub use armature_cmd::{ArmaturesArgs, BonesArgs};
pub use config_cmd::ConfigCommand;
pub use live_cmd::LiveArgs;

use std::path::PathBuf;
use std::sync::Arc;

use clap::ValueEnum;
use rigsync_core::{
    Animation, CodecError, JsonCodec, Session, SyncError, TransportClient, TransportError,
};

use crate::config::Config;
use crate::sink::{ConsoleNotifier, FileSink};

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Builds the HTTP client from the configured timeout.
fn client(config: &Config) -> Result<TransportClient, CommandError> {
    Ok(TransportClient::new(config.session.request_timeout())?)
}

/// Picks the armature named on the command line, falling back to the config.
fn resolve_armature(arg: Option<&String>, config: &Config) -> Result<String, CommandError> {
    arg.cloned()
        .or_else(|| config.armature.value.clone())
        .ok_or(CommandError::NoArmature)
}

/// Starts a session that hands imports to `sink`.
fn spawn_session(
    config: &Config,
    sink: FileSink,
) -> Result<(Session<Animation>, tokio::task::JoinHandle<()>), CommandError> {
    Ok(Session::spawn(
        client(config)?,
        JsonCodec,
        sink,
        Arc::new(ConsoleNotifier),
        config.session_settings(),
    ))
}

/// Errors from CLI commands
#[derive(Debug)]
pub enum CommandError {
    Transport(TransportError),
    Sync(SyncError),
    Codec(CodecError),
    Io(PathBuf, std::io::Error),
    Json(serde_json::Error),
    NoArmature,
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Transport(e) => write!(f, "{}", e),
            CommandError::Sync(e) => write!(f, "{}", e),
            CommandError::Codec(e) => write!(f, "{}", e),
            CommandError::Io(path, e) => write!(f, "{}: {}", path.display(), e),
            CommandError::Json(e) => write!(f, "{}", e),
            CommandError::NoArmature => write!(
                f,
                "No armature given. Pass one or set `armature` in the config file."
            ),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::Transport(e) => Some(e),
            CommandError::Sync(e) => Some(e),
            CommandError::Codec(e) => Some(e),
            CommandError::Io(_, e) => Some(e),
            CommandError::Json(e) => Some(e),
            CommandError::NoArmature => None,
        }
    }
}

impl From<TransportError> for CommandError {
    fn from(e: TransportError) -> Self {
        CommandError::Transport(e)
    }
}

impl From<SyncError> for CommandError {
    fn from(e: SyncError) -> Self {
        CommandError::Sync(e)
    }
}

impl From<CodecError> for CommandError {
    fn from(e: CodecError) -> Self {
        CommandError::Codec(e)
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(e: serde_json::Error) -> Self {
        CommandError::Json(e)
    }
}
