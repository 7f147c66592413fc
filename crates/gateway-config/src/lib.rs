//! Gateway Configuration
//!
//! Centralized, validated configuration for the connection-and-routing
//! plane. Single source of truth for every setting the core reads from its
//! environment.
//!
//! Design patterns:
//! - Builder pattern for runtime construction
//! - Type-safe configuration with validation
//! - Environment-aware (sandbox/live) defaults

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════
//                    CONFIGURATION ROOT
// ═══════════════════════════════════════════════════════════════

/// Root configuration - single source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Deployment mode (sandbox/live)
    pub mode: DeploymentMode,
    /// Process identifier; defaults to a random value.
    pub node_id: String,
    /// Backbone bus connection
    pub backbone: BackboneConfig,
    /// Cross-node connection registry
    pub registry: RegistryConfig,
    /// Credential verification
    pub security: SecurityConfig,
    /// Out-of-scope CRUD plane endpoints this core reads from
    pub external: ExternalConfig,
    /// HTTP/WebSocket API surface
    pub api: ApiConfig,
    /// Feature flags
    pub features: FeatureFlags,
    /// Logging configuration
    pub logging: LoggingConfig,
}

// ═══════════════════════════════════════════════════════════════
//                    DEPLOYMENT MODE
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    #[default]
    Sandbox,
    Live,
}

impl DeploymentMode {
    pub fn is_sandbox(&self) -> bool {
        matches!(self, Self::Sandbox)
    }
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

// ═══════════════════════════════════════════════════════════════
//                    BACKBONE CONFIG
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackboneConfig {
    /// Comma-separated NATS server URLs
    pub urls: Vec<String>,
    /// Optional NATS credentials file path
    pub creds_path: Option<String>,
    /// Fixed backoff between reconnect attempts (seconds)
    pub reconnect_backoff_secs: u64,
    /// Deadline for a single publish before it is surfaced as an error
    pub publish_deadline_secs: u64,
}

impl BackboneConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let urls = std::env::var("GATEWAY_BACKBONE_URLS")
            .map_err(|_| ConfigError::MissingField("GATEWAY_BACKBONE_URLS".to_string()))?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        if urls.is_empty() {
            return Err(ConfigError::MissingField(
                "GATEWAY_BACKBONE_URLS".to_string(),
            ));
        }
        Ok(Self {
            urls,
            creds_path: std::env::var("GATEWAY_BACKBONE_CREDS").ok(),
            reconnect_backoff_secs: gateway_protocol::constants::BACKBONE_RECONNECT_BACKOFF_SECS,
            publish_deadline_secs: gateway_protocol::constants::DEFAULT_PUBLISH_DEADLINE_SECS,
        })
    }
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self::from_env().unwrap_or_else(|_| Self {
            urls: vec!["nats://127.0.0.1:4222".to_string()],
            creds_path: None,
            reconnect_backoff_secs: gateway_protocol::constants::BACKBONE_RECONNECT_BACKOFF_SECS,
            publish_deadline_secs: gateway_protocol::constants::DEFAULT_PUBLISH_DEADLINE_SECS,
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//                    REGISTRY CONFIG
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Redis URL backing the cross-node registry; absent means in-memory
    /// (single-node) registry is used instead.
    pub redis_url: Option<String>,
    pub connection_ttl_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
    pub write_deadline_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            redis_url: std::env::var("GATEWAY_REDIS_URL").ok(),
            connection_ttl_secs: gateway_protocol::constants::DEFAULT_CONNECTION_TTL_SECS,
            heartbeat_timeout_secs: gateway_protocol::constants::DEFAULT_HEARTBEAT_TIMEOUT_SECS,
            cleanup_interval_secs: gateway_protocol::constants::DEFAULT_CLEANUP_INTERVAL_SECS,
            write_deadline_secs: gateway_protocol::constants::DEFAULT_REGISTRY_DEADLINE_SECS,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//                    SECURITY CONFIG
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Symmetric secret for HMAC dashboard tokens, if configured.
    pub jwt_hmac_secret: Option<String>,
    /// JWKS URL for asymmetric (RS256/ES256) dashboard tokens.
    pub jwks_url: Option<String>,
    /// Algorithms accepted for dashboard bearer tokens (explicit allowlist).
    pub allowed_algorithms: Vec<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// How long a fetched JWKS document is cached.
    pub jwks_cache_ttl_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_hmac_secret: std::env::var("GATEWAY_JWT_HMAC_SECRET").ok(),
            jwks_url: std::env::var("GATEWAY_JWKS_URL").ok(),
            allowed_algorithms: vec![
                "HS256".to_string(),
                "RS256".to_string(),
                "ES256".to_string(),
            ],
            issuer: std::env::var("GATEWAY_JWT_ISSUER").ok(),
            audience: std::env::var("GATEWAY_JWT_AUDIENCE").ok(),
            jwks_cache_ttl_secs: gateway_protocol::constants::JWKS_CACHE_TTL_SECS,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//                    EXTERNAL CRUD PLANE
// ═══════════════════════════════════════════════════════════════

/// Base URLs for the tenant-and-quota directory and the agent-key-and-nonce
/// store; both live in a separate service the core only reads from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalConfig {
    pub tenant_directory_url: String,
    pub principal_directory_url: String,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            tenant_directory_url: std::env::var("GATEWAY_TENANT_DIRECTORY_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8090".to_string()),
            principal_directory_url: std::env::var("GATEWAY_PRINCIPAL_DIRECTORY_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8090".to_string()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//                    API CONFIG
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 11190,
            cors_origins: vec!["*".to_string()],
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//                    FEATURE FLAGS
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub presence_plane: bool,
    pub metrics: bool,
}

impl FeatureFlags {
    pub fn sandbox() -> Self {
        Self {
            presence_plane: true,
            metrics: true,
        }
    }

    pub fn live() -> Self {
        Self {
            presence_plane: true,
            metrics: true,
        }
    }
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self::sandbox()
    }
}

// ═══════════════════════════════════════════════════════════════
//                    LOGGING CONFIG
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LoggingConfig {
    pub fn sandbox() -> Self {
        Self {
            level: LogLevel::Debug,
            format: LogFormat::Pretty,
        }
    }

    pub fn live() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Json,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::sandbox()
    }
}

// ═══════════════════════════════════════════════════════════════
//                    CONFIG BUILDER
// ═══════════════════════════════════════════════════════════════

/// Builder for `GatewayConfig` with validation.
pub struct ConfigBuilder {
    mode: DeploymentMode,
    node_id: Option<String>,
    backbone: Option<BackboneConfig>,
    registry: Option<RegistryConfig>,
    security: Option<SecurityConfig>,
    external: Option<ExternalConfig>,
    api: Option<ApiConfig>,
    features: Option<FeatureFlags>,
    logging: Option<LoggingConfig>,
}

impl ConfigBuilder {
    pub fn new(mode: DeploymentMode) -> Self {
        Self {
            mode,
            node_id: None,
            backbone: None,
            registry: None,
            security: None,
            external: None,
            api: None,
            features: None,
            logging: None,
        }
    }

    pub fn sandbox() -> Self {
        Self::new(DeploymentMode::Sandbox)
    }

    pub fn live() -> Self {
        Self::new(DeploymentMode::Live)
    }

    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn backbone(mut self, config: BackboneConfig) -> Self {
        self.backbone = Some(config);
        self
    }

    pub fn registry(mut self, config: RegistryConfig) -> Self {
        self.registry = Some(config);
        self
    }

    pub fn security(mut self, config: SecurityConfig) -> Self {
        self.security = Some(config);
        self
    }

    pub fn external(mut self, config: ExternalConfig) -> Self {
        self.external = Some(config);
        self
    }

    pub fn api(mut self, config: ApiConfig) -> Self {
        self.api = Some(config);
        self
    }

    pub fn features(mut self, config: FeatureFlags) -> Self {
        self.features = Some(config);
        self
    }

    pub fn logging(mut self, config: LoggingConfig) -> Self {
        self.logging = Some(config);
        self
    }

    /// Build with validation.
    pub fn build(self) -> Result<GatewayConfig, ConfigError> {
        let (features, logging) = match self.mode {
            DeploymentMode::Sandbox => (
                self.features.unwrap_or_else(FeatureFlags::sandbox),
                self.logging.unwrap_or_else(LoggingConfig::sandbox),
            ),
            DeploymentMode::Live => (
                self.features.unwrap_or_else(FeatureFlags::live),
                self.logging.unwrap_or_else(LoggingConfig::live),
            ),
        };

        let config = GatewayConfig {
            mode: self.mode,
            node_id: self
                .node_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            backbone: self.backbone.unwrap_or_default(),
            registry: self.registry.unwrap_or_default(),
            security: self.security.unwrap_or_default(),
            external: self.external.unwrap_or_default(),
            api: self.api.unwrap_or_default(),
            features,
            logging,
        };

        config.validate()?;
        Ok(config)
    }
}

// ═══════════════════════════════════════════════════════════════
//                    CONFIG IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════

impl GatewayConfig {
    /// Load from environment with sandbox/live defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mode = std::env::var("GATEWAY_MODE")
            .map(|m| match m.to_lowercase().as_str() {
                "live" | "production" | "prod" => DeploymentMode::Live,
                _ => DeploymentMode::Sandbox,
            })
            .unwrap_or(DeploymentMode::Sandbox);

        let node_id =
            std::env::var("GATEWAY_NODE_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

        ConfigBuilder::new(mode).node_id(node_id).build()
    }

    /// Load from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: GatewayConfig =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backbone.urls.is_empty() {
            return Err(ConfigError::Validation(
                "backbone.urls must not be empty".to_string(),
            ));
        }

        if self.api.port == 0 {
            return Err(ConfigError::Validation(
                "api.port must be nonzero".to_string(),
            ));
        }

        if let Some(secret) = &self.security.jwt_hmac_secret {
            if secret.is_empty() {
                return Err(ConfigError::Validation(
                    "jwt_hmac_secret, if set, must not be empty".to_string(),
                ));
            }
        }

        if self.security.jwt_hmac_secret.is_none() && self.security.jwks_url.is_none() {
            return Err(ConfigError::Validation(
                "at least one of jwt_hmac_secret or jwks_url must be configured".to_string(),
            ));
        }

        for alg in &self.security.allowed_algorithms {
            if ![
                "HS256", "HS384", "HS512", "RS256", "RS384", "RS512", "ES256", "ES384",
            ]
            .contains(&alg.as_str())
            {
                return Err(ConfigError::Validation(format!(
                    "unsupported JWT algorithm in allowlist: {alg}"
                )));
            }
        }

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//                    ERRORS
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

// ═══════════════════════════════════════════════════════════════
//                    TESTS
// ═══════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn security_with_secret() -> SecurityConfig {
        SecurityConfig {
            jwt_hmac_secret: Some("test-secret".to_string()),
            jwks_url: None,
            allowed_algorithms: vec!["HS256".to_string()],
            issuer: None,
            audience: None,
            jwks_cache_ttl_secs: 3600,
        }
    }

    #[test]
    fn sandbox_config_builds_with_explicit_security() {
        let config = ConfigBuilder::sandbox()
            .security(security_with_secret())
            .build()
            .unwrap();
        assert!(config.mode.is_sandbox());
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn live_config_builds_with_explicit_security() {
        let config = ConfigBuilder::live()
            .security(security_with_secret())
            .build()
            .unwrap();
        assert!(config.mode.is_live());
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn rejects_missing_credential_source() {
        let config = ConfigBuilder::sandbox()
            .security(SecurityConfig {
                jwt_hmac_secret: None,
                jwks_url: None,
                allowed_algorithms: vec!["HS256".to_string()],
                issuer: None,
                audience: None,
                jwks_cache_ttl_secs: 3600,
            })
            .build();
        assert!(config.is_err());
    }

    #[test]
    fn rejects_empty_backbone_urls() {
        let config = ConfigBuilder::sandbox()
            .security(security_with_secret())
            .backbone(BackboneConfig {
                urls: vec![],
                creds_path: None,
                reconnect_backoff_secs: 2,
                publish_deadline_secs: 5,
            })
            .build();
        assert!(config.is_err());
    }

    #[test]
    fn rejects_unknown_algorithm_in_allowlist() {
        let config = ConfigBuilder::sandbox()
            .security(SecurityConfig {
                allowed_algorithms: vec!["none".to_string()],
                ..security_with_secret()
            })
            .build();
        assert!(config.is_err());
    }

    #[test]
    fn config_serializes_with_mode_tag() {
        let config = ConfigBuilder::sandbox()
            .security(security_with_secret())
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("sandbox"));
    }
}
