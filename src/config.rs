//! Configuration management

use std::{
    env,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Deployment environment
    pub environment: Environment,
    /// Server configuration
    pub server: ServerConfig,
    /// TLS listener configuration
    pub tls: TlsConfig,
    /// Certificate authority used to sign client certificates
    pub ca: CaConfig,
    /// Revocation ledger configuration
    pub revocation: RevocationConfig,
    /// User directory configuration
    pub users: UsersConfig,
    /// Registration limits
    pub registration: RegistrationConfig,
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Development: listens on all interfaces, echoes error detail
    Dev,
    /// Pre-production
    Beta,
    /// Production
    #[default]
    Prod,
}

impl Environment {
    /// Default bind address
    #[must_use]
    pub fn default_host(self) -> &'static str {
        match self {
            Self::Dev => "0.0.0.0",
            Self::Beta | Self::Prod => "127.0.0.1",
        }
    }

    /// Default port
    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Self::Dev => 17241,
            Self::Beta => 17242,
            Self::Prod => 17243,
        }
    }

    /// Whether error responses may carry the internal error string
    #[must_use]
    pub fn echoes_error_detail(self) -> bool {
        matches!(self, Self::Dev)
    }

    /// Lower-case name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Beta => "beta",
            Self::Prod => "prod",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to (defaults per environment)
    pub host: Option<String>,
    /// Port to listen on (defaults per environment)
    pub port: Option<u16>,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 64 * 1024,
        }
    }
}

/// TLS listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Serve HTTPS. Authenticated routes reject plaintext requests.
    pub enabled: bool,
    /// Server certificate chain (PEM)
    pub cert: PathBuf,
    /// Server private key (PEM)
    pub key: PathBuf,
    /// Trust anchors for client certificates (PEM); defaults to `ca.cert`
    pub clients_ca: Option<PathBuf>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cert: PathBuf::from("certs/server.cert"),
            key: PathBuf::from("certs/server.key"),
            clients_ca: None,
        }
    }
}

/// Certificate authority configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaConfig {
    /// CA certificate (PEM)
    pub cert: PathBuf,
    /// CA private key (PEM, optionally encrypted PKCS#8)
    pub key: PathBuf,
    /// Key password (literal or `env:VAR_NAME`)
    pub key_password: Option<String>,
    /// Lifetime of issued client certificates
    #[serde(with = "humantime_serde")]
    pub certificate_validity: Duration,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            cert: PathBuf::from("certs/ca.cert"),
            key: PathBuf::from("certs/ca.key"),
            key_password: None,
            certificate_validity: crate::pki::DEFAULT_CERTIFICATE_VALIDITY,
        }
    }
}

impl CaConfig {
    /// Resolve the key password (expand `env:VAR_NAME`)
    ///
    /// # Errors
    ///
    /// Returns an error if the referenced environment variable is unset.
    pub fn resolve_key_password(&self) -> Result<Option<String>> {
        match self.key_password.as_deref() {
            None | Some("") => Ok(None),
            Some(value) => match value.strip_prefix("env:") {
                Some(var_name) => env::var(var_name).map(Some).map_err(|_| {
                    Error::Config(format!(
                        "CA key password variable {var_name} is not set"
                    ))
                }),
                None => Ok(Some(value.to_string())),
            },
        }
    }
}

/// Revocation ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RevocationConfig {
    /// Append-only ledger file
    pub ledger_path: PathBuf,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            ledger_path: PathBuf::from("certs/revoked.info"),
        }
    }
}

/// User directory backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserProvider {
    /// Process memory; users vanish on restart
    Memory,
    /// One JSON document on disk
    #[default]
    File,
}

/// User directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsersConfig {
    /// Backend
    pub provider: UserProvider,
    /// JSON file for the `file` provider
    pub path: PathBuf,
}

impl Default for UsersConfig {
    fn default() -> Self {
        Self {
            provider: UserProvider::File,
            path: PathBuf::from("data/users.json"),
        }
    }
}

/// Registration limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Smallest `Content-Length` accepted for a CSR upload
    pub min_csr_length: u64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            min_csr_length: 210,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (NEBULO_ prefix)
        figment = figment.merge(Env::prefixed("NEBULO_").split("__").ignore(&["config"]));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before secret resolution)
        config.load_env_files();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Effective bind host
    #[must_use]
    pub fn host(&self) -> &str {
        self.server
            .host
            .as_deref()
            .unwrap_or(self.environment.default_host())
    }

    /// Effective port
    #[must_use]
    pub fn port(&self) -> u16 {
        self.server
            .port
            .unwrap_or(self.environment.default_port())
    }

    /// Socket address to listen on
    ///
    /// # Errors
    ///
    /// Returns an error if the host is not an IP address.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let host: IpAddr = self
            .host()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid host '{}': {e}", self.host())))?;
        Ok(SocketAddr::new(host, self.port()))
    }

    /// Trust anchors for client certificates
    #[must_use]
    pub fn clients_ca(&self) -> &Path {
        self.tls.clients_ca.as_deref().unwrap_or(&self.ca.cert)
    }

    /// Render as YAML
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Config(format!("Cannot render config: {e}")))
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    /// Serialize Duration to the largest whole unit (e.g., "7d", "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(*duration))
    }

    /// Deserialize human-readable duration string (e.g., "100ms", "30s", "5m", "1h", "7d")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse "100ms", "30s", "5m", "1h", "7d" or bare seconds
    ///
    /// # Errors
    ///
    /// Returns a message if the string is not a duration.
    pub fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let number = |digits: &str| {
            digits
                .trim()
                .parse::<u64>()
                .map_err(|e| format!("invalid duration '{s}': {e}"))
        };
        let scaled = |digits: &str, unit: u64| {
            number(digits)?
                .checked_mul(unit)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("duration '{s}' is too large"))
        };

        if let Some(ms) = s.strip_suffix("ms") {
            number(ms).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            scaled(secs, 1)
        } else if let Some(mins) = s.strip_suffix('m') {
            scaled(mins, MINUTE)
        } else if let Some(hours) = s.strip_suffix('h') {
            scaled(hours, HOUR)
        } else if let Some(days) = s.strip_suffix('d') {
            scaled(days, DAY)
        } else {
            // Assume seconds
            scaled(s, 1)
        }
    }

    fn format(duration: Duration) -> String {
        if duration.subsec_nanos() != 0 {
            return format!("{}ms", duration.as_millis());
        }
        let secs = duration.as_secs();
        match secs {
            0 => "0s".to_string(),
            s if s % DAY == 0 => format!("{}d", s / DAY),
            s if s % HOUR == 0 => format!("{}h", s / HOUR),
            s if s % MINUTE == 0 => format!("{}m", s / MINUTE),
            s => format!("{s}s"),
        }
    }
}
