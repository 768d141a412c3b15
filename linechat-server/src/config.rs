//! Configuration system for the `LineChat` server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/linechat-server/config.toml`)
//! 4. Compiled defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::server::DEFAULT_GRACE_PERIOD;

/// Lowest port the server accepts.
pub const MIN_PORT: u16 = 1024;

/// Port used when nothing else is configured.
pub const DEFAULT_PORT: u16 = 12345;

/// Errors that can occur when loading server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The port is outside 1024-65535.
    #[error("port {0} is out of range (must be {MIN_PORT}-65535)")]
    InvalidPort(u16),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the server.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerConfigFile {
    server: ServerFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    port: Option<u16>,
    db_path: Option<PathBuf>,
    grace_period_ms: Option<u64>,
    log_level: Option<String>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the chat server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "LineChat server")]
pub struct ServerCliArgs {
    /// Port to listen on, also the key all history is stored under.
    #[arg(short, long, env = "LINECHAT_PORT", global = true)]
    pub port: Option<u16>,

    /// Chat database path (default: `<data dir>/linechat-server/chat.db`).
    #[arg(long, env = "LINECHAT_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Path to config file (default: `~/.config/linechat-server/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Milliseconds between the shutdown notice and closing connections.
    #[arg(long)]
    pub grace_period_ms: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, env = "LINECHAT_LOG", global = true)]
    pub log_level: Option<String>,

    /// What to do; serves chat when omitted.
    #[command(subcommand)]
    pub command: Option<ServerCommand>,
}

/// Server subcommands. All but `serve` work on the stored history of the
/// configured port and exit.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    /// Accept clients until Ctrl-C.
    Serve,
    /// Write a plain-text history report.
    Export {
        /// Output file.
        #[arg(short, long)]
        output: PathBuf,
        /// Only include messages containing this keyword.
        #[arg(short, long)]
        keyword: Option<String>,
        /// Omit the original/encrypted lines under each message.
        #[arg(long)]
        no_cipher: bool,
    },
    /// Print message and connection totals plus per-user statistics.
    Stats,
    /// Print messages matching a keyword.
    Search {
        /// Case-insensitive keyword.
        keyword: String,
    },
    /// Print the most recent messages, newest first.
    Recent {
        /// Number of messages.
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Delete everything stored for the port.
    Purge {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listening port.
    pub port: u16,
    /// Chat database file.
    pub db_path: PathBuf,
    /// Pause between the shutdown notice and closing connections.
    pub grace_period: Duration,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            db_path: default_db_path(),
            grace_period: DEFAULT_GRACE_PERIOD,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and a missing
    /// file is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read or
    /// parsed, or the resolved port is below 1024.
    pub fn load(cli: &ServerCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ServerConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &ServerCliArgs, file: &ServerConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = validate_port(cli.port.or(file.server.port).unwrap_or(defaults.port))?;
        Ok(Self {
            port,
            db_path: cli
                .db
                .clone()
                .or_else(|| file.server.db_path.clone())
                .unwrap_or(defaults.db_path),
            grace_period: cli
                .grace_period_ms
                .or(file.server.grace_period_ms)
                .map_or(defaults.grace_period, Duration::from_millis),
            log_level: cli
                .log_level
                .clone()
                .or_else(|| file.server.log_level.clone())
                .unwrap_or(defaults.log_level),
        })
    }
}

/// Checks that `port` is in 1024-65535.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidPort`] for privileged ports and `0`.
pub fn validate_port(port: u16) -> Result<u16, ConfigError> {
    if port < MIN_PORT {
        Err(ConfigError::InvalidPort(port))
    } else {
        Ok(port)
    }
}

/// `<data dir>/linechat-server/chat.db`, or `chat.db` in the working
/// directory when the platform has no data dir.
#[must_use]
pub fn default_db_path() -> PathBuf {
    dirs::data_dir().map_or_else(
        || PathBuf::from("chat.db"),
        |dir| dir.join("linechat-server").join("chat.db"),
    )
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the server.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ServerConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ServerConfigFile::default());
        };
        config_dir.join("linechat-server").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.grace_period, Duration::from_millis(250));
        assert_eq!(config.log_level, "info");
        assert!(config.db_path.ends_with("chat.db"));
    }

    #[test]
    fn toml_parsing_full() {
        let toml_str = r#"
[server]
port = 6000
db_path = "/tmp/linechat/test.db"
grace_period_ms = 500
log_level = "debug"
"#;
        let file: ServerConfigFile = toml::from_str(toml_str).unwrap();
        let config = ServerConfig::resolve(&ServerCliArgs::default(), &file).unwrap();

        assert_eq!(config.port, 6000);
        assert_eq!(config.db_path, PathBuf::from("/tmp/linechat/test.db"));
        assert_eq!(config.grace_period, Duration::from_millis(500));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn toml_parsing_partial() {
        let file: ServerConfigFile = toml::from_str("[server]\nport = 7000\n").unwrap();
        let config = ServerConfig::resolve(&ServerCliArgs::default(), &file).unwrap();

        assert_eq!(config.port, 7000);
        assert_eq!(config.grace_period, DEFAULT_GRACE_PERIOD); // default
        assert_eq!(config.log_level, "info"); // default
    }

    #[test]
    fn cli_overrides_file() {
        let file: ServerConfigFile =
            toml::from_str("[server]\nport = 7000\ngrace_period_ms = 900\n").unwrap();
        let cli = ServerCliArgs {
            port: Some(8000),
            ..Default::default()
        };
        let config = ServerConfig::resolve(&cli, &file).unwrap();

        assert_eq!(config.port, 8000); // from CLI
        assert_eq!(config.grace_period, Duration::from_millis(900)); // from file
    }

    #[test]
    fn privileged_port_is_rejected() {
        let cli = ServerCliArgs {
            port: Some(80),
            ..Default::default()
        };
        let err = ServerConfig::resolve(&cli, &ServerConfigFile::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(80)));

        assert!(validate_port(0).is_err());
        assert!(validate_port(1023).is_err());
        assert_eq!(validate_port(1024).unwrap(), 1024);
        assert_eq!(validate_port(65535).unwrap(), 65535);
    }

    #[test]
    fn subcommands_parse() {
        let cli = ServerCliArgs::try_parse_from(["linechat-server", "-p", "5000", "stats"]).unwrap();
        assert_eq!(cli.port, Some(5000));
        assert_eq!(cli.command, Some(ServerCommand::Stats));

        let cli = ServerCliArgs::try_parse_from([
            "linechat-server",
            "export",
            "--output",
            "out.txt",
            "--keyword",
            "hello",
            "--port",
            "5001",
        ])
        .unwrap();
        assert_eq!(cli.port, Some(5001));
        assert_eq!(
            cli.command,
            Some(ServerCommand::Export {
                output: PathBuf::from("out.txt"),
                keyword: Some("hello".into()),
                no_cipher: false,
            })
        );

        let cli = ServerCliArgs::try_parse_from(["linechat-server"]).unwrap();
        assert_eq!(cli.command, None);
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = load_config_file(None);
        assert!(result.is_ok());
    }

    #[test]
    fn explicit_missing_config_file_returns_error() {
        let result = load_config_file(Some(Path::new("/nonexistent/config.toml")));
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
