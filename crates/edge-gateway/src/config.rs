//! Gateway configuration with layered loading and environment variable interpolation.

use figment::{
    providers::{Env, Format, Toml},
    value::{Dict, Map, Value},
    Error as FigmentError, Figment, Metadata, Profile, Provider,
};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "gateway.toml";

/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_PATH_ENV: &str = "GATEWAY_CONFIG";

/// Errors that can occur when loading or parsing gateway configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error from the Figment configuration library.
    #[error("Configuration error: {0}")]
    Figment(Box<FigmentError>),

    /// The specified configuration file was not found.
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    /// The configuration is invalid or malformed.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<FigmentError> for ConfigError {
    fn from(err: FigmentError) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// HTTP server settings (bind address, TLS, shutdown timeout).
    #[serde(default)]
    pub server: ServerConfig,

    /// Base URLs of the backend services.
    #[serde(default)]
    pub backends: BackendsConfig,

    /// Bearer token verification and issuance.
    pub auth: AuthConfig,

    /// Per-client rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Request timeouts and size limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Toggles for the deprecated v1 surface.
    #[serde(default)]
    pub legacy: LegacyConfig,

    /// Prometheus metrics.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl GatewayConfig {
    /// Loads configuration from `GATEWAY_CONFIG` or `gateway.toml`.
    ///
    /// When the default file is absent, only `GATEWAY_` environment variables
    /// are used. An explicitly configured path must exist.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load_from(path),
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::load_from(DEFAULT_CONFIG_PATH)
            }
            Err(_) => Self::from_env(),
        }
    }

    /// Loads configuration from the specified file path.
    ///
    /// Environment variables prefixed with `GATEWAY_` override file settings.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let figment = Figment::new()
            .merge(InterpolatingToml::file(path)?)
            .merge(env_provider());

        Self::extract(&figment)
    }

    /// Builds configuration from `GATEWAY_` environment variables alone.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::extract(&Figment::new().merge(env_provider()))
    }

    /// Parses configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new().merge(InterpolatingToml::string(content));
        Self::extract(&figment)
    }

    fn extract(figment: &Figment) -> Result<Self, ConfigError> {
        let config = figment.extract::<Self>()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.secret.trim().is_empty() {
            return Err(ConfigError::Invalid("auth.secret must not be empty".into()));
        }
        if self.rate_limit.requests_per_second == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.requests_per_second must be at least 1".into(),
            ));
        }
        for (name, url) in self.backends.iter() {
            validate_backend_url(url)
                .map_err(|reason| ConfigError::Invalid(format!("backends.{name}: {reason}")))?;
        }
        Ok(())
    }
}

fn env_provider() -> Env {
    Env::prefixed("GATEWAY_")
        .ignore(&["CONFIG"])
        .split("__")
}

fn validate_backend_url(url: &str) -> Result<(), String> {
    let uri: http::Uri = url.parse().map_err(|e| format!("invalid URL {url:?}: {e}"))?;
    match uri.scheme_str() {
        Some("http") => {}
        Some(other) => return Err(format!("unsupported scheme {other:?}")),
        None => return Err(format!("missing scheme in {url:?}")),
    }
    if uri.host().is_none() {
        return Err(format!("missing host in {url:?}"));
    }
    Ok(())
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address and port to bind the server to.
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Time to wait for in-flight requests during shutdown.
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    /// TLS configuration (if HTTPS is enabled).
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            shutdown_timeout: default_shutdown_timeout(),
            tls: None,
        }
    }
}

/// TLS/HTTPS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format).
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format).
    pub key_path: PathBuf,
}

const fn default_bind_address() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080)
}

const fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Base URLs of the services the gateway forwards to.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendsConfig {
    #[serde(default = "default_users_url")]
    pub users: String,
    #[serde(default = "default_orders_url")]
    pub orders: String,
    #[serde(default = "default_payments_url")]
    pub payments: String,
    #[serde(default = "default_notifications_url")]
    pub notifications: String,
}

impl BackendsConfig {
    /// Iterates `(name, base_url)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("users", self.users.as_str()),
            ("orders", self.orders.as_str()),
            ("payments", self.payments.as_str()),
            ("notifications", self.notifications.as_str()),
        ]
        .into_iter()
    }
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            users: default_users_url(),
            orders: default_orders_url(),
            payments: default_payments_url(),
            notifications: default_notifications_url(),
        }
    }
}

fn default_users_url() -> String {
    "http://localhost:8081".to_owned()
}

fn default_orders_url() -> String {
    "http://localhost:8082".to_owned()
}

fn default_payments_url() -> String {
    "http://localhost:8083".to_owned()
}

fn default_notifications_url() -> String {
    "http://localhost:8084".to_owned()
}

/// Bearer token configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Secret key for HMAC signature verification.
    pub secret: String,

    /// HMAC algorithm to use for verification.
    #[serde(default = "default_auth_algorithm")]
    pub algorithm: AuthAlgorithm,

    /// Expected token issuer (`iss` claim).
    #[serde(default)]
    pub issuer: Option<String>,

    /// Expected token audience (`aud` claim).
    #[serde(default)]
    pub audience: Option<String>,

    /// Lifetime of tokens issued by the gateway.
    #[serde(
        default = "default_token_ttl",
        deserialize_with = "deserialize_duration"
    )]
    pub token_ttl: Duration,

    /// Expose `POST /auth/login`, which issues tokens without checking credentials.
    #[serde(default)]
    pub enable_login: bool,
}

/// JWT signing algorithm.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthAlgorithm {
    /// HMAC with SHA-256.
    #[default]
    HS256,
    /// HMAC with SHA-384.
    HS384,
    /// HMAC with SHA-512.
    HS512,
}

const fn default_auth_algorithm() -> AuthAlgorithm {
    AuthAlgorithm::HS256
}

const fn default_token_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

/// Per-client token bucket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket capacity and per-second refill amount.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// How often idle buckets are swept.
    #[serde(
        default = "default_sweep_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub sweep_interval: Duration,

    /// Buckets untouched for longer than this are removed by the sweep.
    #[serde(
        default = "default_idle_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub idle_timeout: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            sweep_interval: default_sweep_interval(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

const fn default_requests_per_second() -> u32 {
    100
}

const fn default_sweep_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

const fn default_idle_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}

/// Request limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum time for a complete backend call.
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub request_timeout: Duration,

    /// Maximum time to establish a backend connection.
    #[serde(
        default = "default_connect_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub connect_timeout: Duration,

    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            max_body_size: default_max_body_size(),
        }
    }
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_max_body_size() -> usize {
    10 * 1024 * 1024 // 10MB
}

/// Settings for the deprecated v1 calling convention.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyConfig {
    /// Register the `/api/v1/...` routes.
    #[serde(default = "default_true")]
    pub enable_v1_api: bool,

    /// Register `POST /auth/login/legacy`.
    #[serde(default)]
    pub enable_legacy_login: bool,

    /// Path prefixes that skip identity resolution entirely.
    #[serde(default)]
    pub auth_bypass_paths: Vec<String>,

    /// Value for the `X-API-Sunset` header on v1 responses.
    #[serde(default)]
    pub sunset_date: Option<String>,
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            enable_v1_api: default_true(),
            enable_legacy_login: false,
            auth_bypass_paths: Vec::new(),
            sunset_date: None,
        }
    }
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder and serve `/metrics`.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

const fn default_true() -> bool {
    true
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
    }
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Some(stripped) = s.strip_suffix("ms") {
        let ms: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| format!("Invalid duration: {s}"))?;
        Ok(Duration::from_millis(ms))
    } else if let Some(stripped) = s.strip_suffix('s') {
        let secs: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| format!("Invalid duration: {s}"))?;
        Ok(Duration::from_secs(secs))
    } else if let Some(stripped) = s.strip_suffix('m') {
        let mins: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| format!("Invalid duration: {s}"))?;
        Ok(Duration::from_secs(mins * 60))
    } else if let Some(stripped) = s.strip_suffix('h') {
        let hours: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| format!("Invalid duration: {s}"))?;
        Ok(Duration::from_secs(hours * 60 * 60))
    } else {
        let secs: u64 = s.parse().map_err(|_| format!("Invalid duration: {s}"))?;
        Ok(Duration::from_secs(secs))
    }
}

struct EnvVarInterpolator;

impl EnvVarInterpolator {
    fn interpolate_value(value: Value) -> Value {
        match value {
            Value::String(_, s) => {
                let interpolated = Self::interpolate_string(&s);
                Value::from(interpolated)
            }
            Value::Dict(tag, dict) => {
                let new_dict: Dict = dict
                    .into_iter()
                    .map(|(k, v)| (k, Self::interpolate_value(v)))
                    .collect();
                Value::Dict(tag, new_dict)
            }
            Value::Array(tag, arr) => {
                let new_arr: Vec<Value> = arr.into_iter().map(Self::interpolate_value).collect();
                Value::Array(tag, new_arr)
            }
            other => other,
        }
    }

    fn interpolate_string(s: &str) -> String {
        let mut result = String::with_capacity(s.len());
        let mut chars = s.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next();
                let mut var_name = String::new();

                for ch in chars.by_ref() {
                    if ch == '}' {
                        break;
                    }
                    var_name.push(ch);
                }

                if let Ok(val) = std::env::var(&var_name) {
                    result.push_str(&val);
                }
            } else {
                result.push(c);
            }
        }

        result
    }
}

/// TOML configuration provider with environment variable interpolation.
///
/// Supports `${VAR_NAME}` syntax, so backend URLs and the signing secret can
/// come from the deployment environment (`secret = "${JWT_SECRET}"`).
pub struct InterpolatingToml {
    content: String,
}

impl InterpolatingToml {
    /// Creates an interpolating TOML provider from a file path.
    pub fn file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|_| ConfigError::FileNotFound(path.as_ref().display().to_string()))?;
        Ok(Self { content })
    }

    /// Creates an interpolating TOML provider from a string.
    pub fn string(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl Provider for InterpolatingToml {
    fn metadata(&self) -> Metadata {
        Metadata::named("Interpolating TOML")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, FigmentError> {
        let base = Toml::string(&self.content);
        let base_data = base.data()?;

        let interpolated: Map<Profile, Dict> = base_data
            .into_iter()
            .map(|(profile, dict)| {
                let new_dict: Dict = dict
                    .into_iter()
                    .map(|(k, v)| (k, EnvVarInterpolator::interpolate_value(v)))
                    .collect();
                (profile, new_dict)
            })
            .collect();

        Ok(interpolated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [auth]
        secret = "test-secret"
    "#;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("60").unwrap(), Duration::from_secs(60));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("1.5s").is_err());
    }

    #[test]
    fn config_defaults() {
        let config = GatewayConfig::parse(MINIMAL).unwrap();

        assert_eq!(config.server.bind_address, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.backends.users, "http://localhost:8081");
        assert_eq!(config.backends.orders, "http://localhost:8082");
        assert_eq!(config.backends.payments, "http://localhost:8083");
        assert_eq!(config.backends.notifications, "http://localhost:8084");
        assert_eq!(config.auth.algorithm, AuthAlgorithm::HS256);
        assert_eq!(config.auth.token_ttl, Duration::from_secs(86_400));
        assert!(!config.auth.enable_login);
        assert_eq!(config.rate_limit.requests_per_second, 100);
        assert_eq!(config.rate_limit.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.rate_limit.idle_timeout, Duration::from_secs(600));
        assert_eq!(config.limits.request_timeout, Duration::from_secs(30));
        assert!(config.legacy.enable_v1_api);
        assert!(!config.legacy.enable_legacy_login);
        assert!(config.legacy.auth_bypass_paths.is_empty());
        assert!(config.metrics.enabled);
        assert!(config.server.tls.is_none());
    }

    #[test]
    fn config_from_string() {
        let config_str = r#"
            [server]
            bind_address = "127.0.0.1:9000"
            shutdown_timeout = "60s"

            [backends]
            users = "http://users.internal:9001"
            orders = "http://orders.internal"

            [auth]
            secret = "my-secret-key"
            algorithm = "HS384"
            issuer = "acme"
            token_ttl = "1h"
            enable_login = true

            [rate_limit]
            requests_per_second = 5
            sweep_interval = "1m"
            idle_timeout = "2m"

            [limits]
            request_timeout = "10s"
            max_body_size = 1024

            [legacy]
            enable_v1_api = false
            enable_legacy_login = true
            auth_bypass_paths = ["/internal/legacy/health"]
            sunset_date = "2024-06-01"
        "#;

        let config = GatewayConfig::parse(config_str).unwrap();

        assert_eq!(config.server.bind_address, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.server.shutdown_timeout, Duration::from_secs(60));
        assert_eq!(config.backends.users, "http://users.internal:9001");
        assert_eq!(config.backends.orders, "http://orders.internal");
        assert_eq!(config.backends.payments, "http://localhost:8083");
        assert_eq!(config.auth.algorithm, AuthAlgorithm::HS384);
        assert_eq!(config.auth.issuer.as_deref(), Some("acme"));
        assert_eq!(config.auth.token_ttl, Duration::from_secs(3600));
        assert!(config.auth.enable_login);
        assert_eq!(config.rate_limit.requests_per_second, 5);
        assert_eq!(config.rate_limit.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.limits.request_timeout, Duration::from_secs(10));
        assert_eq!(config.limits.max_body_size, 1024);
        assert!(!config.legacy.enable_v1_api);
        assert!(config.legacy.enable_legacy_login);
        assert_eq!(
            config.legacy.auth_bypass_paths,
            vec!["/internal/legacy/health".to_owned()]
        );
        assert_eq!(config.legacy.sunset_date.as_deref(), Some("2024-06-01"));
    }

    #[test]
    fn config_requires_auth_section() {
        assert!(GatewayConfig::parse("[server]\nbind_address = \"127.0.0.1:1\"").is_err());
    }

    #[test]
    fn config_rejects_empty_secret() {
        let err = GatewayConfig::parse("[auth]\nsecret = \"  \"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn config_rejects_zero_rps() {
        let config_str = r#"
            [auth]
            secret = "s"

            [rate_limit]
            requests_per_second = 0
        "#;

        let err = GatewayConfig::parse(config_str).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn config_rejects_non_http_backend() {
        let config_str = r#"
            [auth]
            secret = "s"

            [backends]
            payments = "https://payments.internal"
        "#;

        let err = GatewayConfig::parse(config_str).unwrap_err();
        assert!(err.to_string().contains("backends.payments"));
    }

    #[test]
    fn config_tls() {
        let config_str = r#"
            [server.tls]
            cert_path = "/etc/ssl/certs/server.crt"
            key_path = "/etc/ssl/private/server.key"

            [auth]
            secret = "s"
        "#;

        let config = GatewayConfig::parse(config_str).unwrap();
        let tls = config.server.tls.expect("TLS should be configured");
        assert_eq!(tls.cert_path.to_str().unwrap(), "/etc/ssl/certs/server.crt");
        assert_eq!(
            tls.key_path.to_str().unwrap(),
            "/etc/ssl/private/server.key"
        );
    }

    #[test]
    fn interpolates_environment_variables() {
        std::env::set_var("EDGE_GATEWAY_TEST_ORDERS_URL", "http://orders.test:7000");

        let config_str = r#"
            [backends]
            orders = "${EDGE_GATEWAY_TEST_ORDERS_URL}"

            [auth]
            secret = "s"
        "#;

        let config = GatewayConfig::parse(config_str).unwrap();
        assert_eq!(config.backends.orders, "http://orders.test:7000");
    }

    #[test]
    fn load_from_missing_file() {
        let err = GatewayConfig::load_from("/nonexistent/gateway.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
