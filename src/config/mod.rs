//! Configuration management
//!
//! YAML-based configuration with:
//! - Environment variable overrides
//! - Multiple configuration file locations
//! - Default values for all settings
//! - Startup validation (invalid configuration aborts startup)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::services::maintenance::validate_cron_expression;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub audit: AuditSettings,
    #[serde(default)]
    pub tokens: TokenSettings,
    #[serde(default)]
    pub maintenance: MaintenanceSettings,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// TLS/HTTPS configuration (if not set, server runs HTTP)
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    /// Page unauthenticated HTML visitors are redirected to
    #[serde(default = "default_login_path")]
    pub login_path: String,
    /// Page HTML visitors are redirected to when access is denied
    #[serde(default = "default_access_denied_path")]
    pub access_denied_path: String,
    /// Browser origins allowed to call the API cross-origin (none when empty)
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

/// TLS/HTTPS configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to TLS certificate file (PEM format)
    pub cert_file: PathBuf,
    /// Path to TLS private key file (PEM format)
    pub key_file: PathBuf,
    /// Minimum TLS version (1.2 or 1.3)
    #[serde(default = "default_min_tls_version")]
    pub min_version: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_access_denied_path() -> String {
    "/access-denied".to_string()
}

fn default_min_tls_version() -> String {
    "1.3".to_string()
}

/// Session (account login) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Secret used to sign session tokens
    pub secret: String,
    #[serde(default = "default_session_expiry")]
    pub expiry_hours: u64,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

fn default_session_expiry() -> u64 {
    12
}

fn default_cookie_name() -> String {
    "gateway_session".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Log output target
    #[serde(default = "default_log_target")]
    pub target: LogTarget,
    /// Directory for log files (used when target is "file" or "both")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Log file name prefix
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    /// Enable daily log rotation
    #[serde(default = "default_log_rotation")]
    pub daily_rotation: bool,
}

/// Log output target
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Log to console (stdout/stderr) - default for development
    #[default]
    Console,
    /// Log to file with optional rotation - recommended for production
    File,
    /// Log to both console and file
    Both,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_log_target() -> LogTarget {
    LogTarget::Console
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/approval-gateway")
}

fn default_log_prefix() -> String {
    "approval-gateway".to_string()
}

fn default_log_rotation() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: default_log_target(),
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            daily_rotation: default_log_rotation(),
        }
    }
}

/// Base parameters of one fixed-window limit
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WindowLimit {
    pub max_attempts: u32,
    pub window_secs: u64,
}

/// Per-address flood guard for credential endpoints (token bucket)
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FloodGuardConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitSettings {
    /// General API limit
    #[serde(default = "default_api_limit")]
    pub api: WindowLimit,
    /// Limit on magic-link validation attempts per address and token prefix
    #[serde(default = "default_token_validation_limit")]
    pub token_validation: WindowLimit,
    /// Flood guard for the login endpoint
    #[serde(default = "default_login_flood_guard")]
    pub login: FloodGuardConfig,
    /// Deadline for bucket store operations; a timeout allows the request
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// How often expired buckets are swept
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_api_limit() -> WindowLimit {
    WindowLimit {
        max_attempts: 60,
        window_secs: 60,
    }
}

fn default_token_validation_limit() -> WindowLimit {
    WindowLimit {
        max_attempts: 5,
        window_secs: 15 * 60,
    }
}

fn default_login_flood_guard() -> FloodGuardConfig {
    FloodGuardConfig {
        requests_per_second: 1,
        burst_size: 5,
    }
}

fn default_store_timeout_ms() -> u64 {
    10
}

fn default_sweep_interval() -> u64 {
    300
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            api: default_api_limit(),
            token_validation: default_token_validation_limit(),
            login: default_login_flood_guard(),
            store_timeout_ms: default_store_timeout_ms(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// What to do with the request when a mandatory audit event cannot be stored
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditFailureMode {
    /// Log the event to the fallback channel and let the request continue
    #[default]
    AllowAndLog,
    /// Reject the request with 503
    Deny,
}

/// Audit configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditSettings {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_audit_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default)]
    pub on_mandatory_failure: AuditFailureMode,
}

fn default_retention_days() -> u32 {
    90
}

fn default_audit_timeout_ms() -> u64 {
    100
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            store_timeout_ms: default_audit_timeout_ms(),
            on_mandatory_failure: AuditFailureMode::default(),
        }
    }
}

/// Magic-link token configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenSettings {
    /// Lifetime of a token when the creator does not pick one
    #[serde(default = "default_token_ttl")]
    pub default_ttl_hours: u64,
    /// Upper bound on requested lifetimes
    #[serde(default = "default_max_token_ttl")]
    pub max_ttl_hours: u64,
    /// Expired or revoked tokens older than this are purged (0 disables purging)
    #[serde(default = "default_purge_after_days")]
    pub purge_after_days: u32,
}

fn default_token_ttl() -> u64 {
    24 * 7
}

fn default_max_token_ttl() -> u64 {
    24 * 90
}

fn default_purge_after_days() -> u32 {
    30
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            default_ttl_hours: default_token_ttl(),
            max_ttl_hours: default_max_token_ttl(),
            purge_after_days: default_purge_after_days(),
        }
    }
}

/// Background maintenance configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaintenanceSettings {
    #[serde(default = "default_maintenance_enabled")]
    pub enabled: bool,
    /// Cron expression (with seconds) for audit retention and token purge
    #[serde(default = "default_maintenance_schedule")]
    pub schedule: String,
}

fn default_maintenance_enabled() -> bool {
    true
}

fn default_maintenance_schedule() -> String {
    "0 15 3 * * *".to_string()
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            enabled: default_maintenance_enabled(),
            schedule: default_maintenance_schedule(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                tls: None,
                login_path: default_login_path(),
                access_denied_path: default_access_denied_path(),
                cors_allowed_origins: Vec::new(),
            },
            session: SessionConfig {
                secret: "change-me-in-production-minimum-32-characters-long".to_string(),
                expiry_hours: default_session_expiry(),
                cookie_name: default_cookie_name(),
            },
            database: DatabaseConfig {
                url: "sqlite://./data/gateway.db".to_string(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            logging: LoggingConfig::default(),
            rate_limit: RateLimitSettings::default(),
            audit: AuditSettings::default(),
            tokens: TokenSettings::default(),
            maintenance: MaintenanceSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values
    /// 2. Configuration file (YAML)
    /// 3. Environment variables
    pub fn load() -> Result<Self> {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();

        let config_path = std::env::var("GATEWAY_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(Self::find_config_file);

        let mut config = match config_path {
            Some(ref path) if path.exists() => {
                eprintln!("[CONFIG] Loading configuration from: {:?}", path);
                Self::from_file(path)?
            }
            Some(ref path) => {
                eprintln!("[CONFIG] Config file not found: {:?}, using defaults", path);
                AppConfig::default()
            }
            None => {
                eprintln!("[CONFIG] No config file found, using defaults");
                AppConfig::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parse a YAML configuration file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_norway::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Find the configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            PathBuf::from("config.yaml"),
            PathBuf::from("config/config.yaml"),
            PathBuf::from("/etc/approval-gateway/config.yaml"),
            dirs::config_dir()
                .map(|p| p.join("approval-gateway/config.yaml"))
                .unwrap_or_default(),
        ];

        paths.into_iter().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("GATEWAY_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("GATEWAY_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(secret) = std::env::var("SESSION_SECRET") {
            self.session.secret = secret;
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("GATEWAY_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }

        if let Ok(mode) = std::env::var("AUDIT_FAILURE_MODE") {
            self.audit.on_mandatory_failure = match mode.to_lowercase().as_str() {
                "deny" => AuditFailureMode::Deny,
                _ => AuditFailureMode::AllowAndLog,
            };
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.session.secret.len() < 32 {
            anyhow::bail!("Session secret must be at least 32 characters long");
        }

        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        for (name, limit) in [
            ("rate_limit.api", &self.rate_limit.api),
            ("rate_limit.token_validation", &self.rate_limit.token_validation),
        ] {
            if limit.max_attempts == 0 {
                anyhow::bail!("{}.max_attempts must be greater than 0", name);
            }
            if limit.window_secs == 0 {
                anyhow::bail!("{}.window_secs must be greater than 0", name);
            }
        }

        if self.rate_limit.login.requests_per_second == 0 || self.rate_limit.login.burst_size == 0
        {
            anyhow::bail!("rate_limit.login values must be greater than 0");
        }

        if self.audit.retention_days == 0 {
            anyhow::bail!("audit.retention_days must be greater than 0");
        }

        if self.tokens.default_ttl_hours == 0
            || self.tokens.default_ttl_hours > self.tokens.max_ttl_hours
        {
            anyhow::bail!("tokens.default_ttl_hours must be between 1 and tokens.max_ttl_hours");
        }

        validate_cron_expression(&self.maintenance.schedule)
            .map_err(|e| anyhow::anyhow!("maintenance.schedule: {}", e))?;

        if let Some(ref tls) = self.server.tls {
            if !tls.cert_file.exists() {
                anyhow::bail!("TLS certificate file not found: {:?}", tls.cert_file);
            }
            if !tls.key_file.exists() {
                anyhow::bail!("TLS key file not found: {:?}", tls.key_file);
            }
        }

        Ok(())
    }
}
