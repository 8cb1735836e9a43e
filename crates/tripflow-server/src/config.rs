//! Configuration management
//!
//! Loaded once in `main` and shared read-only afterwards.

use serde::{Deserialize, Serialize};

use crate::dispatch::launcher::split_args;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Placeholder token shipped in examples; accepted but warned about.
pub const PLACEHOLDER_WEBHOOK_TOKEN: &str = "change-me";

// ============================================================================
// Job Launch Constants
// ============================================================================

/// Default job binary.
pub const DEFAULT_JOB_BIN: &str = "tripflow-ingest";

/// Default master endpoint handed to the job.
pub const DEFAULT_JOB_MASTER: &str = "local[*]";

/// Default driver memory handed to the job.
pub const DEFAULT_JOB_DRIVER_MEMORY: &str = "6g";

/// Default job entry point.
pub const DEFAULT_JOB_ENTRY: &str = "run";

/// Default scheme for the `--input` object URI.
pub const DEFAULT_JOB_INPUT_SCHEME: &str = "s3";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
    pub job: JobConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Shared-secret authentication for the intake endpoint
#[derive(Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub token: String,
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Command surface for dispatched jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Executable to spawn
    pub binary: String,
    /// Value of `--master`
    pub master: String,
    /// Value of `--driver-memory`
    pub driver_memory: String,
    /// Extra arguments placed before the entry point
    pub extra_args: Vec<String>,
    /// Job entry point (script path or subcommand)
    pub entry: String,
    /// Scheme of the `--input` URI (`s3`, `s3a`)
    pub input_scheme: String,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let env_or = |name: &str, default: &str| {
            std::env::var(name).unwrap_or_else(|_| default.to_string())
        };

        let extra_args = match std::env::var("JOB_EXTRA_ARGS") {
            Ok(raw) => split_args(&raw)
                .map_err(|e| anyhow::anyhow!("Invalid JOB_EXTRA_ARGS: {}", e))?,
            Err(_) => Vec::new(),
        };

        let config = Config {
            server: ServerConfig {
                host: env_or("TRIPFLOW_HOST", DEFAULT_SERVER_HOST),
                port: std::env::var("TRIPFLOW_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: std::env::var("TRIPFLOW_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            },
            webhook: WebhookConfig {
                token: env_or("WEBHOOK_TOKEN", PLACEHOLDER_WEBHOOK_TOKEN),
            },
            job: JobConfig {
                binary: env_or("JOB_BIN", DEFAULT_JOB_BIN),
                master: env_or("JOB_MASTER", DEFAULT_JOB_MASTER),
                driver_memory: env_or("JOB_DRIVER_MEMORY", DEFAULT_JOB_DRIVER_MEMORY),
                extra_args,
                entry: env_or("JOB_ENTRY", DEFAULT_JOB_ENTRY),
                input_scheme: env_or("JOB_INPUT_SCHEME", DEFAULT_JOB_INPUT_SCHEME),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.webhook.token.is_empty() {
            anyhow::bail!("WEBHOOK_TOKEN cannot be empty");
        }

        if self.webhook.token == PLACEHOLDER_WEBHOOK_TOKEN {
            tracing::warn!("WEBHOOK_TOKEN is the placeholder value - set a real secret");
        }

        if self.job.binary.trim().is_empty() {
            anyhow::bail!("JOB_BIN cannot be empty");
        }

        if self.job.entry.trim().is_empty() {
            anyhow::bail!("JOB_ENTRY cannot be empty");
        }

        if !matches!(self.job.input_scheme.as_str(), "s3" | "s3a") {
            anyhow::bail!(
                "JOB_INPUT_SCHEME must be 's3' or 's3a', got '{}'",
                self.job.input_scheme
            );
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            webhook: WebhookConfig {
                token: PLACEHOLDER_WEBHOOK_TOKEN.to_string(),
            },
            job: JobConfig::default(),
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            binary: DEFAULT_JOB_BIN.to_string(),
            master: DEFAULT_JOB_MASTER.to_string(),
            driver_memory: DEFAULT_JOB_DRIVER_MEMORY.to_string(),
            extra_args: Vec::new(),
            entry: DEFAULT_JOB_ENTRY.to_string(),
            input_scheme: DEFAULT_JOB_INPUT_SCHEME.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, DEFAULT_SERVER_PORT);
        assert_eq!(config.job.binary, DEFAULT_JOB_BIN);
    }

    #[test]
    fn test_validate_rejects_empty_token() {
        let mut config = Config::default();
        config.webhook.token = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_scheme() {
        let mut config = Config::default();
        config.job.input_scheme = "gs".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_token_is_redacted_in_debug() {
        let webhook = WebhookConfig {
            token: "super-secret".to_string(),
        };
        assert!(!format!("{:?}", webhook).contains("super-secret"));
    }
}
