//! Configuration system for the `LineChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/linechat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::{Path, PathBuf};

/// Lowest server port the client will connect to.
pub const MIN_PORT: u16 = 1024;

/// Errors that can occur when loading configuration.
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

    /// The server port is outside 1024-65535.
    #[error("port {0} is out of range (must be {MIN_PORT}-65535)")]
    InvalidPort(u16),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    user: UserFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    host: Option<String>,
    port: Option<u16>,
}

/// `[user]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UserFileConfig {
    username: Option<String>,
    auth_db_path: Option<PathBuf>,
}

/// Fully resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Username to announce; prompted for when absent.
    pub username: Option<String>,
    /// Local account database.
    pub auth_db_path: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 12345,
            username: None,
            auth_db_path: default_auth_db_path(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or the resolved port is below 1024.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = cli.port.or(file.server.port).unwrap_or(defaults.port);
        if port < MIN_PORT {
            return Err(ConfigError::InvalidPort(port));
        }

        Ok(Self {
            host: cli
                .host
                .clone()
                .or_else(|| file.server.host.clone())
                .unwrap_or(defaults.host),
            port,
            username: cli
                .username
                .clone()
                .or_else(|| file.user.username.clone()),
            auth_db_path: cli
                .auth_db
                .clone()
                .or_else(|| file.user.auth_db_path.clone())
                .unwrap_or(defaults.auth_db_path),
        })
    }

    /// `host:port` of the server.
    #[must_use]
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `<data dir>/linechat/auth.db`, or `auth.db` in the working directory
/// when the platform has no data dir.
#[must_use]
pub fn default_auth_db_path() -> PathBuf {
    dirs::data_dir().map_or_else(
        || PathBuf::from("auth.db"),
        |dir| dir.join("linechat").join("auth.db"),
    )
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "LineChat terminal client")]
pub struct CliArgs {
    /// Server host.
    #[arg(long, env = "LINECHAT_HOST", global = true)]
    pub host: Option<String>,

    /// Server port.
    #[arg(short, long, env = "LINECHAT_PORT", global = true)]
    pub port: Option<u16>,

    /// Username to join as.
    #[arg(short, long, env = "LINECHAT_USER", global = true)]
    pub username: Option<String>,

    /// Check this password against the local account store before
    /// connecting; also the password for `register`.
    #[arg(long, env = "LINECHAT_PASSWORD", global = true)]
    pub password: Option<String>,

    /// Local account database (default: `<data dir>/linechat/auth.db`).
    #[arg(long, global = true)]
    pub auth_db: Option<PathBuf>,

    /// Path to config file (default: `~/.config/linechat/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "LINECHAT_LOG", global = true)]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/linechat.log`).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// What to do; connects when omitted.
    #[command(subcommand)]
    pub command: Option<ClientCommand>,
}

/// Client subcommands.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Join the chat and relay stdin lines.
    Connect,
    /// Create a local account from `--username` and `--password`.
    Register,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("linechat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.server_addr(), "127.0.0.1:12345");
        assert_eq!(config.username, None);
        assert!(config.auth_db_path.ends_with("auth.db"));
    }

    #[test]
    fn toml_parsing_full() {
        let toml_str = r#"
[server]
host = "chat.example.org"
port = 6000

[user]
username = "alice"
auth_db_path = "/tmp/linechat/auth.db"
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let config = ClientConfig::resolve(&CliArgs::default(), &file).unwrap();

        assert_eq!(config.server_addr(), "chat.example.org:6000");
        assert_eq!(config.username.as_deref(), Some("alice"));
        assert_eq!(config.auth_db_path, PathBuf::from("/tmp/linechat/auth.db"));
    }

    #[test]
    fn toml_parsing_empty() {
        let file: ConfigFile = toml::from_str("").unwrap();
        let config = ClientConfig::resolve(&CliArgs::default(), &file).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 12345);
    }

    #[test]
    fn cli_overrides_file() {
        let file: ConfigFile =
            toml::from_str("[server]\nhost = \"a\"\nport = 6000\n[user]\nusername = \"x\"\n")
                .unwrap();
        let cli = CliArgs {
            port: Some(7000),
            username: Some("bob".to_string()),
            ..Default::default()
        };
        let config = ClientConfig::resolve(&cli, &file).unwrap();

        assert_eq!(config.host, "a"); // from file
        assert_eq!(config.port, 7000); // from CLI
        assert_eq!(config.username.as_deref(), Some("bob")); // from CLI
    }

    #[test]
    fn privileged_port_is_rejected() {
        let cli = CliArgs {
            port: Some(22),
            ..Default::default()
        };
        assert!(matches!(
            ClientConfig::resolve(&cli, &ConfigFile::default()),
            Err(ConfigError::InvalidPort(22))
        ));
    }

    #[test]
    fn register_subcommand_parses() {
        let cli = CliArgs::try_parse_from([
            "linechat",
            "register",
            "--username",
            "alice",
            "--password",
            "pw",
        ])
        .unwrap();
        assert_eq!(cli.command, Some(ClientCommand::Register));
        assert_eq!(cli.username.as_deref(), Some("alice"));
        assert_eq!(cli.password.as_deref(), Some("pw"));
    }

    #[test]
    fn explicit_missing_config_file_returns_error() {
        let result = load_config_file(Some(Path::new("/nonexistent/config.toml")));
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
