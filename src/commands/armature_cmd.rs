use clap::Args;
use rigsync_core::Transport;

use super::{client, resolve_armature, CommandError, OutputFormat};
use crate::config::Config;

/// List armatures in the open scene
#[derive(Args)]
pub struct ArmaturesArgs {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl ArmaturesArgs {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        let armatures = client(config)?.list_armatures(config.port.value).await?;

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&armatures)?);
            }
            OutputFormat::Text => {
                if armatures.is_empty() {
                    println!("No armatures found.");
                    return Ok(());
                }
                for name in &armatures {
                    let marker = if config.armature.value.as_deref() == Some(name.as_str()) {
                        " (default)"
                    } else {
                        ""
                    };
                    println!("{}{}", name, marker);
                }
            }
        }
        Ok(())
    }
}

/// Show bone rest poses of an armature
#[derive(Args)]
pub struct BonesArgs {
    /// Armature name (defaults to the configured armature)
    armature: Option<String>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl BonesArgs {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        let armature = resolve_armature(self.armature.as_ref(), config)?;
        let bones = client(config)?
            .get_bone_rest(config.port.value, &armature)
            .await?;

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&bones)?);
            }
            OutputFormat::Text => {
                println!("{} ({} bones)", armature, bones.len());
                for (bone, rest) in &bones {
                    println!("  {}: {}", bone, rest);
                }
            }
        }
        Ok(())
    }
}
