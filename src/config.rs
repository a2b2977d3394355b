//! # Server Configuration
//!
//! [`ServerConfig`] is an immutable value produced by [`ServerConfigBuilder::build`] (or loaded
//! from a YAML/TOML file). Validation happens once, eagerly, at construction: an invalid port,
//! an empty API-key list or an unknown JWT algorithm never reaches the dispatcher.
//!
//! ## Projection
//!
//! [`ServerConfig::to_boundary`] produces the map handed to the execution engine. Keys are
//! snake_case. Sub-configurations that are not configured (or explicitly disabled, for `cors`
//! and `openapi`) are absent; `static_files` is always present.
//!
//! ## Example
//!
//! ```rust,ignore
//! use brrtdispatch::config::{ServerConfig, RateLimitConfig};
//!
//! let config = ServerConfig::builder()
//!     .host("0.0.0.0")
//!     .port(8080)
//!     .workers(4)
//!     .rate_limit(RateLimitConfig::new(100, 200))
//!     .build()?;
//! let projected = config.to_boundary();
//! ```
//!
//! ## File format
//!
//! ```yaml
//! host: 0.0.0.0
//! port: 8080
//! compression:
//!   gzip: true
//!   brotli: false
//!   min_size: 512
//!   quality: 4
//! static_files:
//!   - directory: ./public
//!     route_prefix: /static
//! ```

use crate::value::{BoundaryValue, ProjectionError};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Default maximum request body size (10 MiB).
pub const DEFAULT_MAX_BODY_SIZE: u64 = 10 * 1024 * 1024;

/// JWT algorithms accepted by [`JwtConfig`].
pub const JWT_ALGORITHMS: &[&str] = &[
    "HS256", "HS384", "HS512", "RS256", "RS384", "RS512", "ES256", "ES384", "PS256", "PS384",
    "PS512",
];

/// Configuration error raised at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidPort(u16),
    InvalidWorkers(usize),
    /// Compression quality outside 0..=11
    InvalidCompressionQuality(u32),
    InvalidRateLimit { field: &'static str },
    EmptyApiKeys,
    InvalidJwtAlgorithm(String),
    EmptyJwtSecret,
    InvalidTimeout { field: &'static str },
    InvalidStaticFiles { route_prefix: String },
    /// Wildcard origin combined with credentials
    CorsWildcardWithCredentials,
    /// A parameter declares both a literal default and a default factory
    ConflictingDefaults { parameter: String },
    InvalidSchema { context: String, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort(port) => {
                write!(f, "Invalid port {port}: must be between 1 and 65535")
            }
            ConfigError::InvalidWorkers(n) => write!(f, "Invalid workers {n}: must be at least 1"),
            ConfigError::InvalidCompressionQuality(q) => {
                write!(f, "Invalid compression quality {q}: must be between 0 and 11")
            }
            ConfigError::InvalidRateLimit { field } => {
                write!(f, "Invalid rate limit: {field} must be greater than 0")
            }
            ConfigError::EmptyApiKeys => write!(f, "API key auth requires at least one key"),
            ConfigError::InvalidJwtAlgorithm(alg) => write!(
                f,
                "Invalid JWT algorithm '{alg}': expected one of {}",
                JWT_ALGORITHMS.join(", ")
            ),
            ConfigError::EmptyJwtSecret => write!(f, "JWT auth requires a non-empty secret"),
            ConfigError::InvalidTimeout { field } => {
                write!(f, "Invalid {field}: must be at least 1 second")
            }
            ConfigError::InvalidStaticFiles { route_prefix } => write!(
                f,
                "Invalid static files route prefix '{route_prefix}': must start with '/'"
            ),
            ConfigError::CorsWildcardWithCredentials => write!(
                f,
                "CORS configuration error: Cannot use wildcard origin (*) with credentials"
            ),
            ConfigError::ConflictingDefaults { parameter } => write!(
                f,
                "Parameter '{parameter}' declares both a default value and a default factory"
            ),
            ConfigError::InvalidSchema { context, message } => {
                write!(f, "Invalid schema for {context}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub gzip: bool,
    pub brotli: bool,
    /// Minimum response size in bytes before compressing
    pub min_size: u64,
    pub quality: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            gzip: true,
            brotli: true,
            min_size: 1024,
            quality: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub per_second: u64,
    pub burst: u64,
    #[serde(default = "default_true")]
    pub ip_based: bool,
}

impl RateLimitConfig {
    #[must_use]
    pub fn new(per_second: u64, burst: u64) -> Self {
        Self {
            per_second,
            burst,
            ip_based: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,
    #[serde(default)]
    pub audience: Option<Vec<String>>,
    #[serde(default)]
    pub issuer: Option<String>,
    /// Clock leeway in seconds for exp/nbf/iat
    #[serde(default)]
    pub leeway: u64,
}

impl JwtConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            algorithm: default_jwt_algorithm(),
            audience: None,
            issuer: None,
            leeway: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub keys: Vec<String>,
    #[serde(default = "default_api_key_header")]
    pub header_name: String,
}

impl ApiKeyConfig {
    #[must_use]
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            header_name: default_api_key_header(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Disabled CORS is dropped from the projection
    #[serde(skip_serializing)]
    pub enabled: bool,
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub max_age: Option<u64>,
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allowed_headers: Vec::new(),
            expose_headers: Vec::new(),
            max_age: None,
            allow_credentials: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticFilesConfig {
    pub directory: String,
    pub route_prefix: String,
    #[serde(default = "default_true")]
    pub index_file: bool,
    #[serde(default)]
    pub cache_control: Option<String>,
}

impl StaticFilesConfig {
    pub fn new(directory: impl Into<String>, route_prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            route_prefix: route_prefix.into(),
            index_file: true,
            cache_control: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenApiConfig {
    /// Disabled OpenAPI is dropped from the projection
    #[serde(skip_serializing)]
    pub enabled: bool,
    pub title: String,
    pub version: String,
    pub description: Option<String>,
    pub swagger_ui_path: String,
    pub redoc_path: String,
    pub openapi_json_path: String,
}

impl Default for OpenApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            title: "API".to_string(),
            version: "1.0.0".to_string(),
            description: None,
            swagger_ui_path: "/docs".to_string(),
            redoc_path: "/redoc".to_string(),
            openapi_json_path: "/openapi.json".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

/// Immutable server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub enable_request_id: bool,
    /// `None` means unlimited
    pub max_body_size: Option<u64>,
    /// Seconds; `None` disables the timeout
    pub request_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_auth: Option<JwtConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_auth: Option<ApiKeyConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors: Option<CorsConfig>,
    pub static_files: Vec<StaticFilesConfig>,
    pub graceful_shutdown: bool,
    pub shutdown_timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openapi: Option<OpenApiConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            workers: 1,
            enable_request_id: true,
            max_body_size: Some(DEFAULT_MAX_BODY_SIZE),
            request_timeout: Some(30),
            compression: Some(CompressionConfig::default()),
            rate_limit: None,
            jwt_auth: None,
            api_key_auth: None,
            cors: None,
            static_files: Vec::new(),
            graceful_shutdown: true,
            shutdown_timeout: 30,
            openapi: None,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Snake_case map projection for the execution engine.
    pub fn to_boundary(&self) -> Result<BoundaryValue, ProjectionError> {
        BoundaryValue::from_serialize(self)
    }

    /// Parse YAML and validate.
    pub fn from_yaml_str(source: &str) -> anyhow::Result<Self> {
        let parsed: ServerConfig =
            serde_yaml::from_str(source).context("failed to parse YAML server config")?;
        Ok(parsed.normalized().validated()?)
    }

    /// Parse TOML and validate.
    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        let parsed: ServerConfig =
            toml::from_str(source).context("failed to parse TOML server config")?;
        Ok(parsed.normalized().validated()?)
    }

    /// Load from a `.yaml`/`.yml` or `.toml` file.
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&source),
            _ => Self::from_yaml_str(&source),
        }
    }

    fn normalized(mut self) -> Self {
        if self.max_body_size == Some(0) {
            self.max_body_size = None;
        }
        if self.cors.as_ref().is_some_and(|c| !c.enabled) {
            self.cors = None;
        }
        if self.openapi.as_ref().is_some_and(|o| !o.enabled) {
            self.openapi = None;
        }
        self
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }
        if self.workers == 0 {
            return Err(ConfigError::InvalidWorkers(self.workers));
        }
        if self.request_timeout == Some(0) {
            return Err(ConfigError::InvalidTimeout {
                field: "request_timeout",
            });
        }
        if self.graceful_shutdown && self.shutdown_timeout == 0 {
            return Err(ConfigError::InvalidTimeout {
                field: "shutdown_timeout",
            });
        }
        if let Some(c) = &self.compression {
            if c.quality > 11 {
                return Err(ConfigError::InvalidCompressionQuality(c.quality));
            }
        }
        if let Some(r) = &self.rate_limit {
            if r.per_second == 0 {
                return Err(ConfigError::InvalidRateLimit {
                    field: "per_second",
                });
            }
            if r.burst == 0 {
                return Err(ConfigError::InvalidRateLimit { field: "burst" });
            }
        }
        if let Some(j) = &self.jwt_auth {
            if j.secret.is_empty() {
                return Err(ConfigError::EmptyJwtSecret);
            }
            if !JWT_ALGORITHMS.contains(&j.algorithm.as_str()) {
                return Err(ConfigError::InvalidJwtAlgorithm(j.algorithm.clone()));
            }
        }
        if let Some(a) = &self.api_key_auth {
            if a.keys.is_empty() || a.keys.iter().any(String::is_empty) {
                return Err(ConfigError::EmptyApiKeys);
            }
        }
        if let Some(c) = &self.cors {
            if c.allow_credentials && c.allowed_origins.iter().any(|o| o == "*") {
                return Err(ConfigError::CorsWildcardWithCredentials);
            }
        }
        for s in &self.static_files {
            if !s.route_prefix.starts_with('/') {
                return Err(ConfigError::InvalidStaticFiles {
                    route_prefix: s.route_prefix.clone(),
                });
            }
        }
        Ok(self)
    }
}

/// Accumulates settings; every setter returns a new builder value.
#[derive(Debug, Clone, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    #[must_use]
    pub fn enable_request_id(mut self, enabled: bool) -> Self {
        self.config.enable_request_id = enabled;
        self
    }

    /// `None` or `Some(0)` means unlimited.
    #[must_use]
    pub fn max_body_size(mut self, bytes: Option<u64>) -> Self {
        self.config.max_body_size = bytes;
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, seconds: Option<u64>) -> Self {
        self.config.request_timeout = seconds;
        self
    }

    #[must_use]
    pub fn compression(mut self, compression: Option<CompressionConfig>) -> Self {
        self.config.compression = compression;
        self
    }

    #[must_use]
    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.rate_limit = Some(rate_limit);
        self
    }

    #[must_use]
    pub fn jwt_auth(mut self, jwt: JwtConfig) -> Self {
        self.config.jwt_auth = Some(jwt);
        self
    }

    #[must_use]
    pub fn api_key_auth(mut self, api_key: ApiKeyConfig) -> Self {
        self.config.api_key_auth = Some(api_key);
        self
    }

    #[must_use]
    pub fn cors(mut self, cors: CorsConfig) -> Self {
        self.config.cors = Some(cors);
        self
    }

    #[must_use]
    pub fn static_files(mut self, static_files: StaticFilesConfig) -> Self {
        self.config.static_files.push(static_files);
        self
    }

    #[must_use]
    pub fn graceful_shutdown(mut self, enabled: bool) -> Self {
        self.config.graceful_shutdown = enabled;
        self
    }

    #[must_use]
    pub fn shutdown_timeout(mut self, seconds: u64) -> Self {
        self.config.shutdown_timeout = seconds;
        self
    }

    #[must_use]
    pub fn openapi(mut self, openapi: OpenApiConfig) -> Self {
        self.config.openapi = Some(openapi);
        self
    }

    /// Validate and produce the immutable config.
    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        self.config.normalized().validated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_projection_keys() {
        let config = ServerConfig::builder().build().unwrap();
        let v = config.to_boundary().unwrap();
        let map = v.as_map().unwrap();
        for key in [
            "host",
            "port",
            "workers",
            "enable_request_id",
            "max_body_size",
            "request_timeout",
            "compression",
            "static_files",
            "graceful_shutdown",
            "shutdown_timeout",
        ] {
            assert!(map.contains_key(key), "missing {key}");
        }
        for key in ["rate_limit", "jwt_auth", "api_key_auth", "cors", "openapi"] {
            assert!(!map.contains_key(key), "unexpected {key}");
        }
        assert_eq!(map.get("static_files"), Some(&BoundaryValue::List(vec![])));
        assert_eq!(
            map.get("max_body_size"),
            Some(&BoundaryValue::Int(10_485_760))
        );
    }

    #[test]
    fn disabled_cors_and_openapi_are_absent() {
        let config = ServerConfig::builder()
            .cors(CorsConfig {
                enabled: false,
                ..CorsConfig::default()
            })
            .openapi(OpenApiConfig {
                enabled: false,
                ..OpenApiConfig::default()
            })
            .build()
            .unwrap();
        let v = config.to_boundary().unwrap();
        assert!(v.get("cors").is_none());
        assert!(v.get("openapi").is_none());
    }

    #[test]
    fn enabled_cors_projects_without_enabled_flag() {
        let v = ServerConfig::builder()
            .cors(CorsConfig::default())
            .build()
            .unwrap()
            .to_boundary()
            .unwrap();
        let cors = v.get("cors").unwrap();
        assert!(cors.get("enabled").is_none());
        assert!(cors.get("allowed_origins").is_some());
    }

    #[test]
    fn validation_errors() {
        assert_eq!(
            ServerConfig::builder().port(0).build(),
            Err(ConfigError::InvalidPort(0))
        );
        assert_eq!(
            ServerConfig::builder().workers(0).build(),
            Err(ConfigError::InvalidWorkers(0))
        );
        assert_eq!(
            ServerConfig::builder()
                .compression(Some(CompressionConfig {
                    quality: 12,
                    ..CompressionConfig::default()
                }))
                .build(),
            Err(ConfigError::InvalidCompressionQuality(12))
        );
        assert_eq!(
            ServerConfig::builder()
                .rate_limit(RateLimitConfig::new(0, 10))
                .build(),
            Err(ConfigError::InvalidRateLimit {
                field: "per_second"
            })
        );
        assert_eq!(
            ServerConfig::builder()
                .api_key_auth(ApiKeyConfig::new(vec![]))
                .build(),
            Err(ConfigError::EmptyApiKeys)
        );
        let mut jwt = JwtConfig::new("s3cret");
        jwt.algorithm = "none".into();
        assert_eq!(
            ServerConfig::builder().jwt_auth(jwt).build(),
            Err(ConfigError::InvalidJwtAlgorithm("none".into()))
        );
    }

    #[test]
    fn zero_body_size_means_unlimited() {
        let config = ServerConfig::builder()
            .max_body_size(Some(0))
            .build()
            .unwrap();
        assert_eq!(config.max_body_size, None);
    }

    #[test]
    fn yaml_round_trip() {
        let config = ServerConfig::from_yaml_str(
            "port: 9000\nrate_limit:\n  per_second: 10\n  burst: 20\nstatic_files:\n  - directory: ./public\n    route_prefix: /static\n",
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "127.0.0.1");
        assert!(config.rate_limit.as_ref().unwrap().ip_based);
        assert!(config.static_files[0].index_file);
    }

    #[test]
    fn toml_is_validated() {
        let err = ServerConfig::from_toml_str("workers = 0\n").unwrap_err();
        assert!(err.to_string().contains("workers"));
    }
}
