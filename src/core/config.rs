//! Configuration management for the gateway.
//!
//! This module provides a centralized configuration structure populated
//! from environment variables (prefixed `GATEWAY_`) with sensible
//! defaults. Out-of-range values are normalized with a warning rather
//! than rejected, so a misconfigured deployment degrades instead of
//! refusing to start.

use super::transport::TransportConfig;
use crate::domains::resilience::retry::BackoffStrategy;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Main configuration structure for the gateway.
///
/// Organized by domain: server identity, auth, the capability registry,
/// sessions, the resilience policies and the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server identification and metadata.
    pub server: ServerConfig,

    /// Caller authentication configuration.
    pub auth: AuthConfig,

    /// Capability registry configuration.
    pub registry: RegistryConfig,

    /// Session lifecycle configuration.
    pub session: SessionConfig,

    /// Circuit breaker configuration (applied per downstream service).
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry/backoff configuration.
    pub retry: RetrySettings,

    /// Idempotency record configuration.
    pub idempotency: IdempotencySettings,

    /// Bounded-execution configuration.
    pub execution: ExecutionSettings,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Transport configuration.
    pub transport: TransportConfig,
}

/// Server identification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The name of the server as reported to clients.
    pub name: String,

    /// The version of the server.
    pub version: String,
}

/// Caller authentication configuration.
///
/// When no bearer token accompanies a call, the configured default
/// principal is used (single-operator stdio deployments); HTTP callers
/// are expected to authenticate per request.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Static bearer token accepted in addition to self-describing
    /// tokens. Redacted from Debug output.
    pub bearer_token: Option<String>,

    /// Principal id assumed for unauthenticated local callers.
    pub default_principal: String,

    /// Scopes granted to the default principal.
    pub default_scopes: Vec<String>,

    /// Default tenant for the default principal.
    pub default_tenant: Option<String>,
}

/// Custom Debug implementation to redact secrets from logs.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "[REDACTED]"))
            .field("default_principal", &self.default_principal)
            .field("default_scopes", &self.default_scopes)
            .field("default_tenant", &self.default_tenant)
            .finish()
    }
}

/// Capability registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Whether the loaded catalog is cached between calls.
    pub cache_enabled: bool,

    /// How long a cached catalog stays valid.
    pub cache_ttl_secs: u64,
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sliding liveness window; any session operation resets it.
    pub ttl_secs: u64,

    /// Calls arriving within this much of expiry carry a warning.
    pub expiry_warning_secs: u64,
}

/// Circuit breaker configuration, applied to every per-service breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Master switch; disabled breakers pass every call through.
    pub enabled: bool,

    /// Consecutive transient failures that open the circuit.
    pub failure_threshold: u32,

    /// How long an open circuit fails fast before allowing a trial.
    pub open_timeout_secs: u64,

    /// Consecutive trial successes required to close again.
    pub half_open_success_threshold: u32,
}

/// Retry/backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Master switch; disabled means a single attempt.
    pub enabled: bool,

    /// Total attempts including the first.
    pub max_attempts: u32,

    /// Delay growth strategy.
    pub backoff: BackoffStrategy,

    /// Base delay and lower clamp, in milliseconds.
    pub min_delay_ms: u64,

    /// Upper clamp, in milliseconds.
    pub max_delay_ms: u64,

    /// Whether to spread delays with jitter.
    pub jitter: bool,
}

/// Idempotency record configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencySettings {
    /// How long a settled record replays before aging out.
    pub record_ttl_secs: u64,
}

/// Bounded-execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Hard wall-clock bound on a single capability execution.
    pub timeout_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "trace").
    pub level: String,

    /// Whether to include timestamps in log output.
    pub with_timestamps: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "gateway-mcp-server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bearer_token: None,
            default_principal: "local-operator".to_string(),
            default_scopes: vec![
                "teams.read".to_string(),
                "teams.write".to_string(),
                "checkins.read".to_string(),
                "checkins.write".to_string(),
                "communications.send".to_string(),
            ],
            default_tenant: None,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl_secs: 300,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 1800,
            expiry_warning_secs: 120,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 3,
            open_timeout_secs: 30,
            half_open_success_threshold: 2,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential,
            min_delay_ms: 100,
            max_delay_ms: 5000,
            jitter: true,
        }
    }
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            record_ttl_secs: 600,
        }
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_timestamps: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            registry: RegistryConfig::default(),
            session: SessionConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetrySettings::default(),
            idempotency: IdempotencySettings::default(),
            execution: ExecutionSettings::default(),
            logging: LoggingConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables are expected to be prefixed with `GATEWAY_`.
    /// For example: `GATEWAY_SERVER_NAME`, `GATEWAY_LOG_LEVEL`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(name) = std::env::var("GATEWAY_SERVER_NAME") {
            config.server.name = name;
        }

        if let Ok(level) = std::env::var("GATEWAY_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Ok(token) = std::env::var("GATEWAY_BEARER_TOKEN") {
            config.auth.bearer_token = Some(token);
            info!("Static bearer token loaded from environment");
        }
        if let Ok(principal) = std::env::var("GATEWAY_DEFAULT_PRINCIPAL") {
            config.auth.default_principal = principal;
        }
        if let Ok(scopes) = std::env::var("GATEWAY_DEFAULT_SCOPES") {
            config.auth.default_scopes = scopes
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(tenant) = std::env::var("GATEWAY_DEFAULT_TENANT") {
            config.auth.default_tenant = Some(tenant);
        }

        if let Some(secs) = env_u64("GATEWAY_REGISTRY_CACHE_TTL_SECS") {
            config.registry.cache_ttl_secs = secs;
        }
        if let Some(enabled) = env_bool("GATEWAY_REGISTRY_CACHE") {
            config.registry.cache_enabled = enabled;
        }

        if let Some(secs) = env_u64("GATEWAY_SESSION_TTL_SECS") {
            config.session.ttl_secs = secs.max(1);
        }
        if let Some(secs) = env_u64("GATEWAY_SESSION_EXPIRY_WARNING_SECS") {
            config.session.expiry_warning_secs = secs;
        }

        if let Some(enabled) = env_bool("GATEWAY_BREAKER_ENABLED") {
            config.circuit_breaker.enabled = enabled;
        }
        if let Some(threshold) = env_u64("GATEWAY_BREAKER_FAILURE_THRESHOLD") {
            config.circuit_breaker.failure_threshold = normalize_min(
                "GATEWAY_BREAKER_FAILURE_THRESHOLD",
                threshold as u32,
                1,
            );
        }
        if let Some(secs) = env_u64("GATEWAY_BREAKER_OPEN_TIMEOUT_SECS") {
            config.circuit_breaker.open_timeout_secs = secs;
        }
        if let Some(threshold) = env_u64("GATEWAY_BREAKER_SUCCESS_THRESHOLD") {
            config.circuit_breaker.half_open_success_threshold = normalize_min(
                "GATEWAY_BREAKER_SUCCESS_THRESHOLD",
                threshold as u32,
                1,
            );
        }

        if let Some(enabled) = env_bool("GATEWAY_RETRY_ENABLED") {
            config.retry.enabled = enabled;
        }
        if let Some(attempts) = env_u64("GATEWAY_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts =
                normalize_min("GATEWAY_RETRY_MAX_ATTEMPTS", attempts as u32, 1);
        }
        if let Ok(backoff) = std::env::var("GATEWAY_RETRY_BACKOFF") {
            match backoff.parse() {
                Ok(strategy) => config.retry.backoff = strategy,
                Err(e) => warn!("GATEWAY_RETRY_BACKOFF ignored: {}", e),
            }
        }
        if let Some(ms) = env_u64("GATEWAY_RETRY_MIN_DELAY_MS") {
            config.retry.min_delay_ms = ms;
        }
        if let Some(ms) = env_u64("GATEWAY_RETRY_MAX_DELAY_MS") {
            config.retry.max_delay_ms = ms;
        }
        if config.retry.max_delay_ms < config.retry.min_delay_ms {
            warn!(
                "GATEWAY_RETRY_MAX_DELAY_MS below min delay; raising to {}",
                config.retry.min_delay_ms
            );
            config.retry.max_delay_ms = config.retry.min_delay_ms;
        }
        if let Some(jitter) = env_bool("GATEWAY_RETRY_JITTER") {
            config.retry.jitter = jitter;
        }

        if let Some(secs) = env_u64("GATEWAY_IDEMPOTENCY_TTL_SECS") {
            config.idempotency.record_ttl_secs = secs;
        }
        if let Some(ms) = env_u64("GATEWAY_EXECUTION_TIMEOUT_MS") {
            config.execution.timeout_ms = normalize_min("GATEWAY_EXECUTION_TIMEOUT_MS", ms, 1);
        }

        config.transport = TransportConfig::from_env();

        config
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("{} is not a number ({:?}); ignoring", name, raw);
            None
        }
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("{} is not a boolean ({:?}); ignoring", name, raw);
            None
        }
    }
}

fn normalize_min<T: PartialOrd + Copy + std::fmt::Display>(name: &str, value: T, min: T) -> T {
    if value < min {
        warn!("{} below minimum {}; using {}", name, min, min);
        min
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests run serially
    static ENV_TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_bearer_token_from_env() {
        let _lock = ENV_TEST_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("GATEWAY_BEARER_TOKEN", "test_token_12345");
        }
        let config = Config::from_env();
        assert_eq!(config.auth.bearer_token.as_deref(), Some("test_token_12345"));
        unsafe {
            std::env::remove_var("GATEWAY_BEARER_TOKEN");
        }
    }

    #[test]
    fn test_bearer_token_redacted_in_debug() {
        let auth = AuthConfig {
            bearer_token: Some("super_secret_token".to_string()),
            ..AuthConfig::default()
        };
        let debug_str = format!("{:?}", auth);
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("super_secret_token"));
    }

    #[test]
    fn test_scopes_parsed_from_csv() {
        let _lock = ENV_TEST_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("GATEWAY_DEFAULT_SCOPES", "teams.read, admin ,");
        }
        let config = Config::from_env();
        assert_eq!(config.auth.default_scopes, vec!["teams.read", "admin"]);
        unsafe {
            std::env::remove_var("GATEWAY_DEFAULT_SCOPES");
        }
    }

    #[test]
    fn test_out_of_range_values_normalized() {
        let _lock = ENV_TEST_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("GATEWAY_RETRY_MAX_ATTEMPTS", "0");
            std::env::set_var("GATEWAY_RETRY_MIN_DELAY_MS", "500");
            std::env::set_var("GATEWAY_RETRY_MAX_DELAY_MS", "100");
        }
        let config = Config::from_env();
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.retry.max_delay_ms, 500);
        unsafe {
            std::env::remove_var("GATEWAY_RETRY_MAX_ATTEMPTS");
            std::env::remove_var("GATEWAY_RETRY_MIN_DELAY_MS");
            std::env::remove_var("GATEWAY_RETRY_MAX_DELAY_MS");
        }
    }

    #[test]
    fn test_defaults_match_documented_policies() {
        let config = Config::default();
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert!(config.retry.enabled);
        assert_eq!(config.session.ttl_secs, 1800);
    }
}
