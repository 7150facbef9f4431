use std::path::PathBuf;

use clap::Args;
use rigsync_core::{AnimationCodec, Fingerprint, JsonCodec, Transport};

use super::{client, resolve_armature, spawn_session, CommandError, OutputFormat};
use crate::config::Config;
use crate::sink::FileSink;

/// Check whether an armature's animation changed
#[derive(Args)]
pub struct StatusArgs {
    /// Armature name (defaults to the configured armature)
    armature: Option<String>,

    /// Last known hash to compare against
    #[arg(long)]
    hash: Option<String>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl StatusArgs {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        let armature = resolve_armature(self.armature.as_ref(), config)?;
        let last_known = self.hash.as_deref().map(Fingerprint::new);

        let Some(status) = client(config)?
            .check_animation_status(config.port.value, &armature, last_known.as_ref())
            .await
        else {
            eprintln!(
                "Status unavailable for '{}' (is the server running on port {}?)",
                armature, config.port.value
            );
            return Ok(());
        };

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            OutputFormat::Text => {
                println!("armature: {}", armature);
                println!("hash:     {}", status.hash);
                println!(
                    "changed:  {}",
                    if status.has_changed { "yes" } else { "no" }
                );
            }
        }
        Ok(())
    }
}

/// Import an armature's animation from the server
#[derive(Args)]
pub struct ImportArgs {
    /// Armature name (defaults to the configured armature)
    armature: Option<String>,

    /// Write to this file instead of the output directory
    #[arg(long, short)]
    out: Option<PathBuf>,
}

impl ImportArgs {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        let armature = resolve_armature(self.armature.as_ref(), config)?;
        let sink = match &self.out {
            Some(path) => FileSink::to_file(path),
            None => FileSink::new(&config.out_dir.value),
        };

        let (session, handle) = spawn_session(config, sink)?;
        let result = async {
            session.connect_and_wait().await?;
            session.select_armature(Some(armature))?;
            session.import_now().await
        }
        .await;

        session.shutdown().await?;
        let _ = handle.await;
        Ok(result?)
    }
}

/// Export an animation file to the server
#[derive(Args)]
pub struct ExportArgs {
    /// Animation JSON file
    file: PathBuf,

    /// Target armature (defaults to the configured armature, then the
    /// server's choice)
    #[arg(long, short)]
    armature: Option<String>,
}

impl ExportArgs {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        let bytes =
            std::fs::read(&self.file).map_err(|e| CommandError::Io(self.file.clone(), e))?;
        let animation = JsonCodec.decode(&bytes)?;
        let name = animation.name.clone();
        let target = self
            .armature
            .clone()
            .or_else(|| config.armature.value.clone());

        let (session, handle) = spawn_session(config, FileSink::new(&config.out_dir.value))?;
        let result = async {
            session.connect_and_wait().await?;
            session.export_now(animation, target.clone()).await
        }
        .await;

        session.shutdown().await?;
        let _ = handle.await;
        result?;

        match target {
            Some(armature) => println!("Exported '{}' to {}", name, armature),
            None => println!("Exported '{}'", name),
        }
        Ok(())
    }
}
