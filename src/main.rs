use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod sink;

use commands::{
    ArmaturesArgs, BonesArgs, ConfigCommand, ExportArgs, ImportArgs, LiveArgs, StatusArgs,
};
use config::Config;

#[derive(Parser)]
#[command(name = "rigsync")]
#[command(version)]
#[command(about = "Live animation sync with a running 3D tool", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Port of the 3D tool's sync server
    #[arg(long, short, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List armatures in the open scene
    Armatures(ArmaturesArgs),

    /// Show bone rest poses of an armature
    Bones(BonesArgs),

    /// Check whether an armature's animation changed
    Status(StatusArgs),

    /// Import an armature's animation once
    Import(ImportArgs),

    /// Export an animation file once
    Export(ExportArgs),

    /// Follow an armature and import every change
    Live(LiveArgs),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rigsync=info,rigsync_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(cli.config.clone())?;
    if let Some(port) = cli.port {
        config.set_port(port);
    }

    match cli.command {
        Some(Commands::Armatures(cmd)) => cmd.run(&config).await?,
        Some(Commands::Bones(cmd)) => cmd.run(&config).await?,
        Some(Commands::Status(cmd)) => cmd.run(&config).await?,
        Some(Commands::Import(cmd)) => cmd.run(&config).await?,
        Some(Commands::Export(cmd)) => cmd.run(&config).await?,
        Some(Commands::Live(cmd)) => cmd.run(&config).await?,
        Some(Commands::Config(cmd)) => cmd.run(&config, cli.config)?,
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
