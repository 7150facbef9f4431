use std::path::PathBuf;

use clap::{Args, Subcommand};

use super::OutputFormat;
use crate::config::Config;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub fn run(
        &self,
        config: &Config,
        config_path: Option<PathBuf>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => print_text(config),
                }
                Ok(())
            }
            ConfigSubcommand::Init { force } => {
                let path = config_path.unwrap_or_else(Config::default_config_path);
                Config::write_template(&path, *force)?;
                println!("Wrote {}", path.display());
                Ok(())
            }
        }
    }
}

fn print_text(config: &Config) {
    println!("Configuration");
    println!("=============\n");

    if let Some(path) = &config.config_file {
        println!("Config file: {}", path.display());
    } else {
        println!(
            "Config file: {} (not found)",
            Config::default_config_path().display()
        );
    }
    println!();

    println!("port: {}", config.port.value);
    println!("  source: {}", config.port.source);
    println!();

    println!("out_dir: {}", config.out_dir.value.display());
    println!("  source: {}", config.out_dir.source);
    println!();

    println!(
        "armature: {}",
        config.armature.value.as_deref().unwrap_or("(none)")
    );
    println!("  source: {}", config.armature.source);
    println!();

    let session = &config.session;
    println!("session:");
    println!("  auto_connect: {}", session.auto_connect);
    println!("  live_sync_enabled: {}", session.live_sync_enabled);
    println!("  poll_interval_ms: {}", session.poll_interval_ms);
    println!("  reconnect_delay_ms: {}", session.reconnect_delay_ms);
    println!("  max_reconnect_delay_ms: {}", session.max_reconnect_delay_ms);
    println!("  max_reconnect_attempts: {}", session.max_reconnect_attempts);
    println!("  request_timeout_ms: {}", session.request_timeout_ms);
}
