//! Validated startup configuration.
//!
//! Loaded from a TOML file with environment-variable overrides (`dotenv`
//! for local dev), validated once before the composition root is built.
//! A validation failure is a fatal config error (process exit code 2).

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub local_size: usize,
    pub default_ttl_secs: u64,
    pub class_ttls: std::collections::HashMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let mut class_ttls = std::collections::HashMap::new();
        class_ttls.insert("balance".to_string(), 60);
        class_ttls.insert("rates".to_string(), 900);
        class_ttls.insert("static".to_string(), 3600);
        Self {
            local_size: 10_000,
            default_ttl_secs: 300,
            class_ttls,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            half_open_max_calls: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    pub batch_size: usize,
    pub batch_timeout_millis: u64,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_timeout_millis: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitRule {
    pub limit: u64,
    pub period_secs: u64,
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self { limit: 100, period_secs: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub anomaly_weight: f64,
    pub low_threshold: f64,
    pub medium_threshold: f64,
    pub high_threshold: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            anomaly_weight: 0.4,
            low_threshold: 0.3,
            medium_threshold: 0.6,
            high_threshold: 0.8,
        }
    }
}

impl RiskConfig {
    pub fn supervised_weight(&self) -> f64 {
        1.0 - self.anomaly_weight
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub base_lifetime_secs: u64,
    pub lockout_duration_secs: u64,
    pub lockout_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_lifetime_secs: 8 * 3600,
            lockout_duration_secs: 30 * 60,
            lockout_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceConfig {
    pub sca_low_value_eur_minor: i64,
    pub ctr_threshold_usd_minor: i64,
    pub structuring_band_low_usd_minor: i64,
    pub structuring_band_high_usd_minor: i64,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            sca_low_value_eur_minor: 3_000,
            ctr_threshold_usd_minor: 1_000_000,
            structuring_band_low_usd_minor: 900_000,
            structuring_band_high_usd_minor: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    pub log_level: String,
    pub cache: CacheConfig,
    pub breaker: BreakerConfig,
    pub batcher: BatcherConfig,
    pub rate_limit_default: RateLimitRule,
    pub risk: RiskConfig,
    pub session: SessionConfig,
    pub compliance: ComplianceConfig,
    pub jwt_secret: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            log_level: "info".to_string(),
            cache: CacheConfig::default(),
            breaker: BreakerConfig::default(),
            batcher: BatcherConfig::default(),
            rate_limit_default: RateLimitRule::default(),
            risk: RiskConfig::default(),
            session: SessionConfig::default(),
            compliance: ComplianceConfig::default(),
            jwt_secret: "dev-secret-change-me".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("GATEWAY_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Ok(level) = std::env::var("GATEWAY_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Ok(secret) = std::env::var("GATEWAY_JWT_SECRET") {
            self.jwt_secret = secret;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.local_size == 0 {
            return Err(ConfigError::Invalid("cache.local_size must be > 0".into()));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid("breaker.failure_threshold must be > 0".into()));
        }
        if self.batcher.batch_size == 0 {
            return Err(ConfigError::Invalid("batcher.batch_size must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.risk.anomaly_weight) {
            return Err(ConfigError::Invalid("risk.anomaly_weight must be in [0,1]".into()));
        }
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::Invalid("jwt_secret must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_local_size() {
        let mut config = Config::default();
        config.cache.local_size = 0;
        assert!(config.validate().is_err());
    }
}
