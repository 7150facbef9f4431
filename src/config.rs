use rigsync_core::{SessionSettings, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
    Argument,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
            ConfigSource::Argument => write!(f, "argument"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Port of the counterpart server
    pub port: ConfigValue<u16>,
    /// Directory where imported animations are written
    pub out_dir: ConfigValue<PathBuf>,
    /// Armature to use when a command does not name one
    pub armature: ConfigValue<Option<String>>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    /// Session tunables
    pub session: SessionSettings,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    port: Option<u16>,
    out_dir: Option<PathBuf>,
    armature: Option<String>,
    session: Option<SessionSettings>,
}

/// Written by `rigsync config init`.
pub const CONFIG_TEMPLATE: &str = "\
# rigsync configuration

# Port the 3D tool's sync server listens on
port: 31337

# Where `rigsync import` and `rigsync live` write animations
# out_dir: ~/.local/share/rigsync/animations

# Armature to use when a command does not name one
# armature: Hero

session:
  auto_connect: false
  live_sync_enabled: false
  poll_interval_ms: 500
  reconnect_delay_ms: 1000
  max_reconnect_delay_ms: 8000
  max_reconnect_attempts: 3
  request_timeout_ms: 5000
";

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        Self::load_with_env(config_path, |key| std::env::var(key).ok())
    }

    /// Like [`Config::load`], reading environment variables through `env`.
    pub fn load_with_env(
        config_path: Option<PathBuf>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        // Start with defaults
        let mut port = ConfigValue::new(DEFAULT_PORT, ConfigSource::Default);
        let mut out_dir = ConfigValue::new(Self::default_out_dir(), ConfigSource::Default);
        let mut armature = ConfigValue::new(None, ConfigSource::Default);
        let mut config_file = None;
        let mut session = SessionSettings::default();

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(settings) = file_config.session {
                session = settings;
            }
            if let Some(p) = file_config.port {
                port = ConfigValue::new(p, ConfigSource::File);
            }
            if let Some(dir) = file_config.out_dir {
                // Resolve relative paths against config file's directory
                let resolved = if dir.is_relative() {
                    path.parent().map(|p| p.join(&dir)).unwrap_or(dir)
                } else {
                    dir
                };
                out_dir = ConfigValue::new(resolved, ConfigSource::File);
            }
            if let Some(name) = file_config.armature {
                armature = ConfigValue::new(Some(name), ConfigSource::File);
            }
        }

        // Apply environment variable overrides
        if let Some(value) = env("RIGSYNC_PORT") {
            let p = value
                .parse()
                .map_err(|_| ConfigError::InvalidValue("RIGSYNC_PORT", value.clone()))?;
            port = ConfigValue::new(p, ConfigSource::Environment);
        }
        if let Some(dir) = env("RIGSYNC_OUT_DIR") {
            out_dir = ConfigValue::new(PathBuf::from(dir), ConfigSource::Environment);
        }
        if let Some(name) = env("RIGSYNC_ARMATURE") {
            armature = ConfigValue::new(Some(name), ConfigSource::Environment);
        }
        if let Some(value) = env("RIGSYNC_LIVE_SYNC") {
            session.live_sync_enabled = parse_flag("RIGSYNC_LIVE_SYNC", &value)?;
        }
        if let Some(value) = env("RIGSYNC_AUTO_CONNECT") {
            session.auto_connect = parse_flag("RIGSYNC_AUTO_CONNECT", &value)?;
        }

        session.port = port.value;

        Ok(Self {
            port,
            out_dir,
            armature,
            config_file,
            session,
        })
    }

    /// Overrides the port from a command-line argument.
    pub fn set_port(&mut self, port: u16) {
        self.port = ConfigValue::new(port, ConfigSource::Argument);
        self.session.port = port;
    }

    /// Session settings with the effective port applied.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            port: self.port.value,
            ..self.session.clone()
        }
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/rigsync/
    /// - macOS: ~/Library/Application Support/rigsync/
    /// - Windows: %APPDATA%/rigsync/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rigsync")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/rigsync/
    /// - macOS: ~/Library/Application Support/rigsync/
    /// - Windows: %APPDATA%/rigsync/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rigsync")
    }

    pub fn default_out_dir() -> PathBuf {
        Self::default_data_dir().join("animations")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }

    /// Writes [`CONFIG_TEMPLATE`] to `path`, refusing to overwrite unless `force`.
    pub fn write_template(path: &Path, force: bool) -> Result<(), ConfigError> {
        if path.exists() && !force {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteError(parent.to_path_buf(), e))?;
        }
        std::fs::write(path, CONFIG_TEMPLATE)
            .map_err(|e| ConfigError::WriteError(path.to_path_buf(), e))
    }
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(var, value.to_string())),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    WriteError(PathBuf, std::io::Error),
    AlreadyExists(PathBuf),
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::WriteError(path, e) => {
                write!(f, "Failed to write '{}': {}", path.display(), e)
            }
            ConfigError::AlreadyExists(path) => {
                write!(
                    f,
                    "Config file '{}' already exists (use --force to overwrite)",
                    path.display()
                )
            }
            ConfigError::InvalidValue(var, value) => {
                write!(f, "Invalid value for {}: '{}'", var, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
