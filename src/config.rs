//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use serde::Deserialize;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Error, Debug)]
#[allow(dead_code)]
pub enum ConfigError {
    #[error("Failed to load environment variables: {0}")]
    EnvLoad(#[from] dotenvy::Error),

    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0),
            port: 3000,
        }
    }
}

/// Endpoints and credentials for the external agents the pipeline talks to
#[derive(Debug, Clone, Deserialize)]
pub struct AgentEndpoints {
    /// Plan-generation agent (Architect)
    pub architect_url: String,
    /// Scoring agent (Auditor)
    pub auditor_url: String,
    /// Vector similarity store (memory)
    pub memory_url: String,
    /// Collection name inside the vector store
    pub memory_collection: String,
    /// Optional API key sent to the vector store
    pub memory_api_key: Option<String>,
    /// Downstream execution gateway
    pub gateway_url: String,
    /// Shared secret for the gateway signature header
    pub gateway_secret: String,
    /// Alerting webhook; alerts are skipped when unset
    pub alert_webhook_url: Option<String>,
}

impl Default for AgentEndpoints {
    fn default() -> Self {
        Self {
            architect_url: "http://localhost:8081/analyze".to_string(),
            auditor_url: "http://localhost:8083/audit".to_string(),
            memory_url: "http://localhost:6333".to_string(),
            memory_collection: "audit-history".to_string(),
            memory_api_key: None,
            gateway_url: "http://localhost:8085/gateway".to_string(),
            gateway_secret: "dev-secret".to_string(),
            alert_webhook_url: None,
        }
    }
}

/// Cost and rate governance configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GovernanceConfig {
    /// Default ceiling for a new day's cost record
    pub daily_limit_usd: f64,
    /// Maximum pipelines in flight at once
    pub max_concurrent_pipelines: usize,
    /// Maximum accepted requests per rolling minute
    pub requests_per_minute: usize,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            daily_limit_usd: 5.0,
            max_concurrent_pipelines: 8,
            requests_per_minute: 60,
        }
    }
}

/// Timeouts, attempt counts and size ceilings for pipeline stages
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Prompt size ceiling in bytes, checked before any external call
    pub max_prompt_bytes: usize,
    pub architect_timeout_secs: u64,
    /// Attempts allowed when the architect times out
    pub architect_max_attempts: u32,
    pub auditor_timeout_secs: u64,
    pub gateway_timeout_secs: u64,
    /// Dispatch attempts before the job goes to EXECUTION_FAILED
    pub gateway_max_attempts: u32,
    /// Plan schema version stamped onto jobs
    pub schema_version: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_prompt_bytes: 100_000,
            architect_timeout_secs: 20,
            architect_max_attempts: 2,
            auditor_timeout_secs: 30,
            gateway_timeout_secs: 15,
            gateway_max_attempts: 3,
            schema_version: "1.0.0".to_string(),
        }
    }
}

/// Memory retrieval tuning
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    pub top_k: usize,
    /// Cosine similarity floor below which matches are ignored
    pub similarity_threshold: f32,
    /// Character budget for the concatenated advisory string
    pub char_budget: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            similarity_threshold: 0.85,
            char_budget: 2000,
        }
    }
}

/// Drift detector tuning
#[derive(Debug, Clone, Deserialize)]
pub struct DriftConfig {
    /// Rolling window size over audit scores
    pub window: usize,
    /// Alert when the window mean falls below this
    pub min_mean: f64,
    /// Alert when the window std-dev rises above this
    pub max_std_dev: f64,
    /// Seconds between repeated drift alerts
    pub alert_cooldown_secs: u64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            window: 20,
            min_mean: 70.0,
            max_std_dev: 15.0,
            alert_cooldown_secs: 3600,
        }
    }
}

/// Supervisor (crash-loop) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Consecutive rapid crashes tolerated before fail-stop
    pub max_restarts: u32,
    /// Fixed delay before respawning the child
    pub restart_delay_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: 10,
            restart_delay_secs: 3,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub server: ServerConfig,
    pub agents: AgentEndpoints,
    pub governance: GovernanceConfig,
    pub pipeline: PipelineConfig,
    pub memory: MemoryConfig,
    pub drift: DriftConfig,
    pub supervisor: SupervisorConfig,
    pub cors: CorsConfig,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let server_default = ServerConfig::default();
        let server = ServerConfig {
            host: env_or("HOST", server_default.host),
            port: env_or("PORT", server_default.port),
        };

        let agent_default = AgentEndpoints::default();
        let agents = AgentEndpoints {
            architect_url: env_string("ARCHITECT_URL", &agent_default.architect_url),
            auditor_url: env_string("AUDITOR_URL", &agent_default.auditor_url),
            memory_url: env_string("MEMORY_URL", &agent_default.memory_url),
            memory_collection: env_string("MEMORY_COLLECTION", &agent_default.memory_collection),
            memory_api_key: std::env::var("MEMORY_API_KEY").ok(),
            gateway_url: env_string("GATEWAY_URL", &agent_default.gateway_url),
            gateway_secret: env_string("GATEWAY_SECRET", &agent_default.gateway_secret),
            alert_webhook_url: std::env::var("ALERT_WEBHOOK_URL").ok(),
        };

        let gov_default = GovernanceConfig::default();
        let governance = GovernanceConfig {
            daily_limit_usd: env_or("DAILY_LIMIT_USD", gov_default.daily_limit_usd),
            max_concurrent_pipelines: env_or(
                "MAX_CONCURRENT_PIPELINES",
                gov_default.max_concurrent_pipelines,
            ),
            requests_per_minute: env_or("REQUESTS_PER_MINUTE", gov_default.requests_per_minute),
        };

        let pipe_default = PipelineConfig::default();
        let pipeline = PipelineConfig {
            max_prompt_bytes: env_or("MAX_PROMPT_BYTES", pipe_default.max_prompt_bytes),
            architect_timeout_secs: env_or(
                "ARCHITECT_TIMEOUT_SECS",
                pipe_default.architect_timeout_secs,
            ),
            architect_max_attempts: env_or(
                "ARCHITECT_MAX_ATTEMPTS",
                pipe_default.architect_max_attempts,
            ),
            auditor_timeout_secs: env_or("AUDITOR_TIMEOUT_SECS", pipe_default.auditor_timeout_secs),
            gateway_timeout_secs: env_or("GATEWAY_TIMEOUT_SECS", pipe_default.gateway_timeout_secs),
            gateway_max_attempts: env_or("GATEWAY_MAX_ATTEMPTS", pipe_default.gateway_max_attempts),
            schema_version: env_string("SCHEMA_VERSION", &pipe_default.schema_version),
        };

        let mem_default = MemoryConfig::default();
        let memory = MemoryConfig {
            top_k: env_or("MEMORY_TOP_K", mem_default.top_k),
            similarity_threshold: env_or(
                "MEMORY_SIMILARITY_THRESHOLD",
                mem_default.similarity_threshold,
            ),
            char_budget: env_or("MEMORY_CHAR_BUDGET", mem_default.char_budget),
        };

        let drift_default = DriftConfig::default();
        let drift = DriftConfig {
            window: env_or("DRIFT_WINDOW", drift_default.window),
            min_mean: env_or("DRIFT_MIN_MEAN", drift_default.min_mean),
            max_std_dev: env_or("DRIFT_MAX_STD_DEV", drift_default.max_std_dev),
            alert_cooldown_secs: env_or(
                "DRIFT_ALERT_COOLDOWN_SECS",
                drift_default.alert_cooldown_secs,
            ),
        };

        let sup_default = SupervisorConfig::default();
        let supervisor = SupervisorConfig {
            max_restarts: env_or("MAX_RESTARTS", sup_default.max_restarts),
            restart_delay_secs: env_or("RESTART_DELAY_SECS", sup_default.restart_delay_secs),
        };

        let cors = CorsConfig {
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        let settings = Self {
            server,
            agents,
            governance,
            pipeline,
            memory,
            drift,
            supervisor,
            cors,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.governance.daily_limit_usd <= 0.0 {
            return Err(ConfigError::InvalidValue(
                "DAILY_LIMIT_USD must be positive".to_string(),
            ));
        }
        if self.pipeline.max_prompt_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_PROMPT_BYTES must be non-zero".to_string(),
            ));
        }
        if self.pipeline.architect_max_attempts == 0 || self.pipeline.gateway_max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "attempt counts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, Ipv4Addr::new(0, 0, 0, 0));
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_default_pipeline_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_prompt_bytes, 100_000);
        assert_eq!(config.architect_max_attempts, 2);
    }

    #[test]
    fn test_validate_rejects_zero_limit() {
        let mut settings = Settings::default();
        settings.governance.daily_limit_usd = 0.0;
        assert!(settings.validate().is_err());
    }
}
