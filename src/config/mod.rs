//! Configuration management
//!
//! Configuration is read from `config.yml` and may be overridden with
//! `FLOCK_*` environment variables. Every value has a default, so a missing
//! or empty file yields a runnable configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Avatar upload settings
    #[serde(default)]
    pub upload: UploadConfig,
    /// Outgoing mail settings
    #[serde(default)]
    pub mail: MailConfig,
    /// Session and password reset settings
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origin; cookies are sent cross-origin so this must be exact
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub driver: DatabaseDriver,
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_url() -> String {
    "data/flock.db".to_string()
}

fn default_max_connections() -> u32 {
    10
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    #[default]
    Sqlite,
    Mysql,
}

/// Upload configuration for profile avatars
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Directory avatars are written to and served from under `/uploads`
    #[serde(default = "default_upload_path")]
    pub path: PathBuf,
    /// Maximum avatar size in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            path: default_upload_path(),
            max_file_size: default_max_file_size(),
            allowed_types: default_allowed_types(),
        }
    }
}

fn default_upload_path() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_max_file_size() -> u64 {
    5 * 1024 * 1024
}

fn default_allowed_types() -> Vec<String> {
    vec![
        "image/jpeg".to_string(),
        "image/png".to_string(),
        "image/gif".to_string(),
        "image/webp".to_string(),
    ]
}

impl UploadConfig {
    pub fn is_type_allowed(&self, mime_type: &str) -> bool {
        self.allowed_types.iter().any(|t| t == mime_type)
    }

    /// File extension used when storing an upload of the given MIME type
    pub fn extension_for(&self, mime_type: &str) -> &'static str {
        match mime_type {
            "image/jpeg" => "jpg",
            "image/png" => "png",
            "image/gif" => "gif",
            "image/webp" => "webp",
            _ => "bin",
        }
    }
}

/// SMTP settings. An empty `smtp_host` disables delivery and reset links are
/// only written to the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: String,
    #[serde(default)]
    pub smtp_password: String,
    #[serde(default = "default_mail_from")]
    pub from: String,
    #[serde(default = "default_mail_from_name")]
    pub from_name: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            smtp_username: String::new(),
            smtp_password: String::new(),
            from: default_mail_from(),
            from_name: default_mail_from_name(),
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_mail_from() -> String {
    "no-reply@flock.local".to_string()
}

fn default_mail_from_name() -> String {
    "Flock".to_string()
}

impl MailConfig {
    pub fn is_configured(&self) -> bool {
        !self.smtp_host.trim().is_empty()
    }
}

/// Session lifetime and password reset settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_session_days")]
    pub session_days: i64,
    /// Frontend base URL; reset links are `<client_url>/reset/<token>`
    #[serde(default = "default_client_url")]
    pub client_url: String,
    #[serde(default = "default_reset_token_hours")]
    pub reset_token_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_days: default_session_days(),
            client_url: default_client_url(),
            reset_token_hours: default_reset_token_hours(),
        }
    }
}

fn default_session_days() -> i64 {
    7
}

fn default_client_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_reset_token_hours() -> i64 {
    24
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// A missing or empty file yields the defaults; malformed YAML is an
    /// error that names the offending line and column.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            })?;

        Ok(config)
    }

    /// Load configuration and apply `FLOCK_*` environment overrides.
    ///
    /// Recognised variables: `FLOCK_SERVER_HOST`, `FLOCK_SERVER_PORT`,
    /// `FLOCK_SERVER_CORS_ORIGIN`, `FLOCK_DATABASE_DRIVER`, `FLOCK_DATABASE_URL`,
    /// `FLOCK_UPLOAD_PATH`, `FLOCK_MAIL_SMTP_HOST`, `FLOCK_MAIL_SMTP_PORT`,
    /// `FLOCK_MAIL_SMTP_USERNAME`, `FLOCK_MAIL_SMTP_PASSWORD`, `FLOCK_MAIL_FROM`,
    /// `FLOCK_AUTH_CLIENT_URL`.
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("FLOCK_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("FLOCK_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(origin) = std::env::var("FLOCK_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = origin;
        }

        if let Ok(driver) = std::env::var("FLOCK_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => tracing::warn!("Ignoring unknown FLOCK_DATABASE_DRIVER: {}", driver),
            }
        }
        if let Ok(url) = std::env::var("FLOCK_DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(path) = std::env::var("FLOCK_UPLOAD_PATH") {
            self.upload.path = PathBuf::from(path);
        }

        if let Ok(host) = std::env::var("FLOCK_MAIL_SMTP_HOST") {
            self.mail.smtp_host = host;
        }
        if let Ok(port) = std::env::var("FLOCK_MAIL_SMTP_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.mail.smtp_port = port;
            }
        }
        if let Ok(username) = std::env::var("FLOCK_MAIL_SMTP_USERNAME") {
            self.mail.smtp_username = username;
        }
        if let Ok(password) = std::env::var("FLOCK_MAIL_SMTP_PASSWORD") {
            self.mail.smtp_password = password;
        }
        if let Ok(from) = std::env::var("FLOCK_MAIL_FROM") {
            self.mail.from = from;
        }

        if let Ok(url) = std::env::var("FLOCK_AUTH_CLIENT_URL") {
            self.auth.client_url = url;
        }
    }
}

fn format_yaml_error(e: &serde_yaml::Error) -> String {
    match e.location() {
        Some(location) => format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        ),
        None => e.to_string(),
    }
}

#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const ENV_KEYS: &[&str] = &[
        "FLOCK_SERVER_HOST",
        "FLOCK_SERVER_PORT",
        "FLOCK_SERVER_CORS_ORIGIN",
        "FLOCK_DATABASE_DRIVER",
        "FLOCK_DATABASE_URL",
        "FLOCK_UPLOAD_PATH",
        "FLOCK_MAIL_SMTP_HOST",
        "FLOCK_MAIL_SMTP_PORT",
        "FLOCK_MAIL_SMTP_USERNAME",
        "FLOCK_MAIL_SMTP_PASSWORD",
        "FLOCK_MAIL_FROM",
        "FLOCK_AUTH_CLIENT_URL",
    ];

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        let guard = super::CONFIG_ENV_MUTEX
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
        guard
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let config = Config::load(std::path::Path::new("does_not_exist.yml")).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.driver, DatabaseDriver::Sqlite);
        assert_eq!(config.database.url, "data/flock.db");
        assert_eq!(config.upload.path, PathBuf::from("uploads"));
        assert!(!config.mail.is_configured());
        assert_eq!(config.auth.reset_token_hours, 24);
        assert_eq!(config.auth.session_days, 7);
    }

    #[test]
    fn test_load_empty_file_returns_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "   \n").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_load_partial_config_fills_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "mail:\n  smtp_host: smtp.example.com\nauth:\n  client_url: https://flock.example\n"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();

        assert!(config.mail.is_configured());
        assert_eq!(config.mail.smtp_port, 587);
        assert_eq!(config.mail.from_name, "Flock");
        assert_eq!(config.auth.client_url, "https://flock.example");
        assert_eq!(config.auth.reset_token_hours, 24);
    }

    #[test]
    fn test_load_invalid_yaml_reports_location() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  port: not_a_number\n").unwrap();

        let err = Config::load(file.path()).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
        assert!(err.contains("line"));
    }

    #[test]
    fn test_upload_extension_lookup() {
        let upload = UploadConfig::default();
        assert!(upload.is_type_allowed("image/png"));
        assert!(!upload.is_type_allowed("application/pdf"));
        assert_eq!(upload.extension_for("image/jpeg"), "jpg");
        assert_eq!(upload.extension_for("text/plain"), "bin");
    }

    #[test]
    fn test_env_overrides_apply() {
        let _guard = lock_env();
        let file = NamedTempFile::new().unwrap();

        std::env::set_var("FLOCK_SERVER_PORT", "9001");
        std::env::set_var("FLOCK_DATABASE_DRIVER", "mysql");
        std::env::set_var("FLOCK_MAIL_SMTP_HOST", "mail.internal");
        std::env::set_var("FLOCK_AUTH_CLIENT_URL", "https://app.flock.test");

        let config = Config::load_with_env(file.path()).unwrap();

        assert_eq!(config.server.port, 9001);
        assert_eq!(config.database.driver, DatabaseDriver::Mysql);
        assert_eq!(config.mail.smtp_host, "mail.internal");
        assert_eq!(config.auth.client_url, "https://app.flock.test");

        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_env_override_invalid_values_ignored() {
        let _guard = lock_env();
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  port: 3000\n").unwrap();

        std::env::set_var("FLOCK_SERVER_PORT", "eighty");
        std::env::set_var("FLOCK_DATABASE_DRIVER", "postgres");

        let config = Config::load_with_env(file.path()).unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.database.driver, DatabaseDriver::Sqlite);

        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }
}
