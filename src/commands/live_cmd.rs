use clap::Args;
use rigsync_core::{SessionEvent, SessionState, SyncError};

use super::{resolve_armature, spawn_session, CommandError};
use crate::config::Config;
use crate::sink::FileSink;

/// Follow an armature's animation and write every change to disk
#[derive(Args)]
pub struct LiveArgs {
    /// Armature name (defaults to the configured armature)
    armature: Option<String>,
}

impl LiveArgs {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        let armature = resolve_armature(self.armature.as_ref(), config)?;
        let out_dir = &config.out_dir.value;

        let (session, handle) = spawn_session(config, FileSink::new(out_dir))?;
        let mut events = session.subscribe();

        println!(
            "Live sync of '{}' on port {} -> {}",
            armature,
            config.port.value,
            out_dir.display()
        );
        println!("Press Ctrl-C to stop.");
        println!();

        session.select_armature(Some(armature.clone()))?;
        session.set_live_sync(true)?;

        let result = loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break Ok(()),
                event = events.next() => match event {
                    Some(event) => {
                        if let Some(result) = report(&armature, event) {
                            break result;
                        }
                    }
                    None => break Err(SyncError::SessionClosed),
                },
            }
        };

        events.unsubscribe();
        session.shutdown().await?;
        let _ = handle.await;
        println!("Stopped.");
        Ok(result?)
    }
}

/// Prints a session event. Returns a result when the run should end.
fn report(armature: &str, event: SessionEvent) -> Option<Result<(), SyncError>> {
    match event {
        SessionEvent::StateChanged { to, .. } => match to {
            SessionState::Connecting => println!("Connecting..."),
            SessionState::Error => println!("Connection failed, retrying..."),
            SessionState::Polling => println!("Watching for changes."),
            _ => {}
        },
        SessionEvent::ArmaturesListed(armatures) => {
            println!("Connected ({} armature(s)).", armatures.len());
            if !armatures.iter().any(|a| a == armature) {
                eprintln!("Warning: '{}' is not in the open scene", armature);
            }
        }
        SessionEvent::ReconnectExhausted { attempts } => {
            return Some(Err(SyncError::Exhausted { attempts }));
        }
        // The sink and the notifier already print these.
        SessionEvent::AnimationImported { .. }
        | SessionEvent::AnimationExported { .. }
        | SessionEvent::SyncFailed { .. } => {}
    }
    None
}
