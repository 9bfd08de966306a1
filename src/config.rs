//! Configuration management
//!
//! Defaults, then the TOML file, then `DBAGENT_*` environment overrides.
//! CLI flags are applied last by the binary. Once the server starts the
//! config is frozen behind an `Arc`.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "/usr/local/etc/dbagent/dbagent.toml";

/// Default session lifetime (4 hours)
pub const DEFAULT_SESSION_TTL_SECS: u64 = 4 * 3600;

/// Longest accepted session lifetime (one year)
pub const MAX_SESSION_TTL_SECS: u64 = 366 * 24 * 3600;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Where this config was read from and where `-write` puts it
    #[serde(skip)]
    pub config_path: PathBuf,

    /// TLS listen port
    pub port: u16,

    /// Debug mode (request/response audit, verbose logs)
    pub debug: bool,

    /// Devel mode (serve frontend from `lib_dir/public` instead of the bundle)
    pub devel: bool,

    /// Unprivileged user to run as
    pub user: String,

    pub pid_path: PathBuf,
    pub message_log_path: PathBuf,
    pub access_log_path: PathBuf,

    /// Data store root
    pub store_dir: PathBuf,

    /// Shared files root; live assets are served from `lib_dir/public`
    pub lib_dir: PathBuf,

    pub cert_path: PathBuf,
    pub key_path: PathBuf,

    /// SQLite password store
    pub password_path: PathBuf,

    /// Cookie signing secret (random per start when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_secret: Option<String>,

    /// Session lifetime in seconds
    pub session_ttl_secs: u64,

    // Downstream database connection, opaque to the front door
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_pass: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            port: 7143,
            debug: false,
            devel: false,
            user: "dbagent".to_string(),
            pid_path: PathBuf::from("/var/run/dbagent/dbagent.pid"),
            message_log_path: PathBuf::from("/var/log/dbagent/message.log"),
            access_log_path: PathBuf::from("/var/log/dbagent/access.log"),
            store_dir: PathBuf::from("/var/db/dbagent"),
            lib_dir: PathBuf::from("/usr/local/share/dbagent"),
            cert_path: PathBuf::from("/usr/local/etc/dbagent/dbagent.crt"),
            key_path: PathBuf::from("/usr/local/etc/dbagent/dbagent.key"),
            password_path: PathBuf::from("/var/db/dbagent/users.db"),
            session_secret: None,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            db_host: "localhost".to_string(),
            db_port: 5432,
            db_user: "postgres".to_string(),
            db_pass: String::new(),
        }
    }
}

impl ServerConfig {
    /// Resolve the config path: explicit flag, then `DBAGENT_CONFIG`, then default
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("DBAGENT_CONFIG").map(PathBuf::from).ok())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load configuration from `path` (if present) and the environment
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read configuration {}", path.display()))?;
            toml::from_str::<Self>(&text)
                .with_context(|| format!("parse configuration {}", path.display()))?
        } else {
            Self::default()
        };
        config.config_path = path.to_path_buf();
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.session_ttl_secs == 0 || self.session_ttl_secs > MAX_SESSION_TTL_SECS {
            bail!(
                "session_ttl_secs must be between 1 and {}, got {}",
                MAX_SESSION_TTL_SECS,
                self.session_ttl_secs
            );
        }
        Ok(())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(port) = env_parse("DBAGENT_PORT") {
            self.port = port;
        }
        if let Ok(val) = std::env::var("DBAGENT_DEBUG") {
            self.debug = val == "true" || val == "1";
        }
        if let Ok(val) = std::env::var("DBAGENT_DEVEL") {
            self.devel = val == "true" || val == "1";
        }
        if let Ok(user) = std::env::var("DBAGENT_USER") {
            self.user = user;
        }
        if let Ok(dir) = std::env::var("DBAGENT_LIB_DIR") {
            self.lib_dir = PathBuf::from(dir);
        }
        if let Ok(secret) = std::env::var("DBAGENT_SESSION_SECRET") {
            self.session_secret = Some(secret);
        }
        if let Some(ttl) = env_parse("DBAGENT_SESSION_TTL") {
            self.session_ttl_secs = ttl;
        }
        if let Ok(pass) = std::env::var("DBAGENT_DB_PASS") {
            self.db_pass = pass;
        }
        self
    }

    /// Serialize the effective configuration to `config_path`
    pub fn write(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let text = toml::to_string_pretty(self).context("serialize configuration")?;
        std::fs::write(&self.config_path, text)
            .with_context(|| format!("write {}", self.config_path.display()))?;
        Ok(())
    }

    /// Root of the live asset tree
    pub fn public_dir(&self) -> PathBuf {
        self.lib_dir.join("public")
    }

    /// Session lifetime, clamped to [`MAX_SESSION_TTL_SECS`]
    pub fn session_ttl(&self) -> chrono::Duration {
        let secs = self.session_ttl_secs.min(MAX_SESSION_TTL_SECS);
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.session_ttl_secs, 14400);
        assert!(!config.debug);
        assert_eq!(config.public_dir(), PathBuf::from("/usr/local/share/dbagent/public"));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.config_path, path);
        assert_eq!(config.store_dir, PathBuf::from("/var/db/dbagent"));
    }

    #[test]
    fn test_written_config_is_readable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("etc").join("dbagent.toml");

        let mut config = ServerConfig::default();
        config.config_path = path.clone();
        config.port = 9443;
        config.user = "www".to_string();
        config.write().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: ServerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.port, 9443);
        assert_eq!(parsed.user, "www");
    }

    #[test]
    fn test_out_of_range_session_ttl_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dbagent.toml");

        std::fs::write(&path, "session_ttl_secs = 10000000000000000\n").unwrap();
        let err = ServerConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("session_ttl_secs"), "{}", err);

        std::fs::write(&path, "session_ttl_secs = 0\n").unwrap();
        assert!(ServerConfig::load(&path).is_err());

        std::fs::write(&path, "session_ttl_secs = 3600\n").unwrap();
        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.session_ttl(), chrono::Duration::hours(1));
    }

    #[test]
    fn test_session_ttl_never_overflows() {
        let config = ServerConfig {
            session_ttl_secs: u64::MAX,
            ..ServerConfig::default()
        };
        assert_eq!(
            config.session_ttl().num_seconds(),
            MAX_SESSION_TTL_SECS as i64
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dbagent.toml");
        std::fs::write(&path, "port = 8443\ndevel = true\n").unwrap();

        let parsed: ServerConfig = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.port, 8443);
        assert!(parsed.devel);
        assert_eq!(parsed.user, "dbagent");
    }
}
