//! Configuration management
//!
//! This module provides YAML-based configuration management with support for:
//! - Environment variable overrides
//! - Multiple configuration file locations
//! - Default values for all settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::models::Certificate;
use crate::utils::pem;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub vice: ViceConfig,
    #[serde(default)]
    pub certificates: CertificatesConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Symantec VICE API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ViceConfig {
    /// Base URL of the VICE REST services
    #[serde(default = "default_vice_url")]
    pub url: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Client certificate used to authenticate against the API
    #[serde(default)]
    pub cert: Option<PathBuf>,
    /// Private key of the client certificate
    #[serde(default)]
    pub key: Option<PathBuf>,
    /// Additional CA bundle for the API endpoint
    #[serde(default)]
    pub ca_bundle: Option<PathBuf>,
    /// Subject and contact details sent with every request
    #[serde(default)]
    pub subject: SubjectConfig,
    /// Challenge phrase for new enrollments
    #[serde(default = "default_challenge")]
    pub default_challenge: String,
    /// Certificate validity in years
    #[serde(default = "default_validity_years")]
    pub validity_years: u8,
    #[serde(default = "default_certificate_product_type")]
    pub certificate_product_type: String,
    #[serde(default = "default_server_type")]
    pub server_type: String,
    #[serde(default = "default_signature_algorithm")]
    pub signature_algorithm: String,
}

/// Organization fields of the CSR subject and the enrollment contact
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SubjectConfig {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub province: String,
    #[serde(default)]
    pub locality: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub organizational_unit: String,
}

fn default_vice_url() -> String {
    "https://certmanager-webservices.websecurity.symantec.com/vswebservices/rest/services"
        .to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_challenge() -> String {
    "vice-president".to_string()
}

fn default_validity_years() -> u8 {
    1
}

fn default_certificate_product_type() -> String {
    "Server".to_string()
}

fn default_server_type() -> String {
    "OpenSSL".to_string()
}

fn default_signature_algorithm() -> String {
    "sha256WithRSAEncryption".to_string()
}

impl Default for ViceConfig {
    fn default() -> Self {
        Self {
            url: default_vice_url(),
            timeout_secs: default_timeout(),
            cert: None,
            key: None,
            ca_bundle: None,
            subject: SubjectConfig::default(),
            default_challenge: default_challenge(),
            validity_years: default_validity_years(),
            certificate_product_type: default_certificate_product_type(),
            server_type: default_server_type(),
            signature_algorithm: default_signature_algorithm(),
        }
    }
}

/// Certificate policy configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CertificatesConfig {
    /// Renew certificates expiring within this many days
    #[serde(default = "default_min_validity_days")]
    pub min_validity_days: u32,
    /// Intermediate certificate appended to every issued chain
    #[serde(default)]
    pub intermediate_certificate: Option<PathBuf>,
    /// Trusted root certificates
    #[serde(default)]
    pub root_certificates: Vec<PathBuf>,
    /// Directory caching downloaded issuer certificates
    #[serde(default = "default_issuer_cache_dir")]
    pub issuer_cache_dir: PathBuf,
    /// Compare stored certificates with the ones served by the hosts
    #[serde(default)]
    pub validate_remote: bool,
    /// Port dialed for the remote comparison
    #[serde(default = "default_remote_port")]
    pub remote_port: u16,
    /// Common names of load balancer placeholder certificates
    #[serde(default = "default_placeholder_common_names")]
    pub placeholder_common_names: Vec<String>,
    /// Requeue interval for hosts in steady state
    #[serde(default = "default_resync_period")]
    pub resync_period_secs: u64,
    /// Requeue interval while a CA transaction is pending
    #[serde(default = "default_pending_retry")]
    pub pending_retry_secs: u64,
}

fn default_min_validity_days() -> u32 {
    30
}

fn default_issuer_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|p| p.join("vice-president"))
        .unwrap_or_else(|| std::env::temp_dir().join("vice-president"))
}

fn default_remote_port() -> u16 {
    443
}

fn default_placeholder_common_names() -> Vec<String> {
    vec!["Kubernetes Ingress Controller Fake Certificate".to_string()]
}

fn default_resync_period() -> u64 {
    300
}

fn default_pending_retry() -> u64 {
    60
}

impl Default for CertificatesConfig {
    fn default() -> Self {
        Self {
            min_validity_days: default_min_validity_days(),
            intermediate_certificate: None,
            root_certificates: Vec::new(),
            issuer_cache_dir: default_issuer_cache_dir(),
            validate_remote: false,
            remote_port: default_remote_port(),
            placeholder_common_names: default_placeholder_common_names(),
            resync_period_secs: default_resync_period(),
            pending_retry_secs: default_pending_retry(),
        }
    }
}

impl CertificatesConfig {
    /// Read the configured intermediate certificate
    pub fn load_intermediate_certificate(&self) -> Result<Option<Certificate>> {
        self.intermediate_certificate
            .as_deref()
            .map(read_certificate)
            .transpose()
    }

    /// Read all configured root certificates
    pub fn load_root_certificates(&self) -> Result<Vec<Certificate>> {
        self.root_certificates
            .iter()
            .map(|path| read_certificate(path))
            .collect()
    }
}

fn read_certificate(path: &Path) -> Result<Certificate> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read certificate file: {:?}", path))?;
    let der = pem::certificates_from_pem(&bytes)
        .with_context(|| format!("Failed to parse certificate file: {:?}", path))?;
    Certificate::from_der(&der[0])
        .with_context(|| format!("Failed to parse certificate file: {:?}", path))
}

/// Rate limiting of CA requests
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// New certificate requests allowed per host and hour (0 = unlimited).
    /// Approve and pickup polls are not counted.
    #[serde(default = "default_requests_per_hour")]
    pub requests_per_hour_per_host: u32,
}

fn default_requests_per_hour() -> u32 {
    5
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_hour_per_host: default_requests_per_hour(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Log output target (console or file)
    #[serde(default = "default_log_target")]
    pub target: LogTarget,
    /// Directory for log files (used when target is "file")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Log file name prefix (default: "vice-president")
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
    /// Log to console (stdout/stderr)
    #[default]
    Console,
    /// Log to file with optional rotation
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
    PathBuf::from("/var/log/vice-president")
}

fn default_log_prefix() -> String {
    "vice-president".to_string()
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

        let config_path = std::env::var("VICE_PRESIDENT_CONFIG")
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

    /// Parse a configuration file without applying overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_norway::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Find the configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            // Current directory
            PathBuf::from("config.yaml"),
            PathBuf::from("config/config.yaml"),
            // System config directory
            PathBuf::from("/etc/vice-president/config.yaml"),
            // User config directory
            dirs::config_dir()
                .map(|p| p.join("vice-president/config.yaml"))
                .unwrap_or_default(),
        ];

        paths.into_iter().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // VICE overrides
        if let Some(url) = var("VICE_URL") {
            self.vice.url = url;
        }
        if let Some(cert) = var("VICE_CERT") {
            self.vice.cert = Some(PathBuf::from(cert));
        }
        if let Some(key) = var("VICE_KEY") {
            self.vice.key = Some(PathBuf::from(key));
        }

        // Certificate policy overrides
        if let Some(days) = var("VICE_PRESIDENT_MIN_VALIDITY_DAYS") {
            if let Ok(days) = days.parse() {
                self.certificates.min_validity_days = days;
            }
        }

        // Logging overrides
        if let Some(level) = var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Some(format) = var("VICE_PRESIDENT_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.vice.url)
            .with_context(|| format!("Invalid VICE URL: {}", self.vice.url))?;
        if url.scheme() != "https" && url.scheme() != "http" {
            anyhow::bail!("VICE URL must use http or https: {}", self.vice.url);
        }

        if self.vice.timeout_secs == 0 {
            anyhow::bail!("VICE timeout cannot be 0");
        }

        if self.vice.validity_years == 0 {
            anyhow::bail!("Certificate validity must be at least one year");
        }

        match (&self.vice.cert, &self.vice.key) {
            (Some(cert), Some(key)) => {
                if !cert.exists() {
                    anyhow::bail!("VICE client certificate not found: {:?}", cert);
                }
                if !key.exists() {
                    anyhow::bail!("VICE client key not found: {:?}", key);
                }
            }
            (None, None) => {
                tracing::warn!("No VICE client certificate configured, CA requests will be unauthenticated");
            }
            _ => anyhow::bail!("VICE client certificate and key must be set together"),
        }

        if self.certificates.min_validity_days >= 365 * u32::from(self.vice.validity_years) {
            anyhow::bail!(
                "min_validity_days ({}) must be shorter than the certificate validity",
                self.certificates.min_validity_days
            );
        }

        if let Some(ref path) = self.certificates.intermediate_certificate {
            if !path.exists() {
                anyhow::bail!("Intermediate certificate not found: {:?}", path);
            }
        }

        for path in &self.certificates.root_certificates {
            if !path.exists() {
                anyhow::bail!("Root certificate not found: {:?}", path);
            }
        }

        if self.certificates.pending_retry_secs == 0 || self.certificates.resync_period_secs == 0 {
            anyhow::bail!("Requeue intervals cannot be 0");
        }

        Ok(())
    }

    /// Create a default configuration file
    pub fn create_default_config(path: &PathBuf) -> Result<()> {
        let config = AppConfig::default();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let yaml = serde_norway::to_string(&config)?;
        std::fs::write(path, yaml)?;

        Ok(())
    }
}
