//! Rigsync Reference Server
//!
//! Serves animations from a data directory over the same HTTP protocol the
//! 3D tool speaks, so the sync session can be developed and tested without
//! the tool running.
//!
//! # Configuration
//!
//! Environment variables:
//! - `RIGSYNC_SERVER_PORT`: Port to listen on (default: 31337)
//! - `RIGSYNC_SERVER_DATA_DIR`: Directory holding animations (default: ~/.local/share/rigsync-server)
//!
//! # Data Directory Layout
//!
//! ```text
//! Hero.anim.json   animation payload for armature "Hero"
//! Hero.rest.json   bone rest poses for "Hero" (optional)
//! ```
//!
//! # Endpoints
//!
//! - `GET /health`: Health check
//! - `GET /list_armatures`
//! - `GET /export_animation/{armature}`
//! - `POST /import_animation?armature=`
//! - `GET /animation_status?armature=&last_known_hash=`
//! - `GET /get_bone_rest/{armature}`

use std::net::SocketAddr;
use std::path::PathBuf;

use rigsync::server::{router, AnimationStore};
use rigsync_core::DEFAULT_PORT;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Server configuration
#[derive(Debug, Clone)]
struct Config {
    /// Port to listen on
    port: u16,
    /// Directory holding animation files
    data_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let port = std::env::var("RIGSYNC_SERVER_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let data_dir = std::env::var("RIGSYNC_SERVER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("rigsync-server")
            });

        Self { port, data_dir }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rigsync_server=info,rigsync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(Config::from_env()).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.data_dir)
        .map_err(|e| format!("Failed to create data directory: {}", e))?;

    tracing::info!("Data directory: {}", config.data_dir.display());

    let store = AnimationStore::new(config.data_dir);
    let app = router(store).layer(TraceLayer::new_for_http());

    // Both ends run on the same machine
    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
