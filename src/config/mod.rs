//! Service configuration loaded from environment variables.
//!
//! The workflow configuration document (workflows, tenants, policies) is a
//! separate JSON file referenced by `AEGIS_WORKFLOW_CONFIG`; this module
//! covers the process-level settings.

use crate::{AegisError, Result};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub policy: PolicyConfig,
    pub orchestrator: OrchestratorConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub base_url: String,
    pub default_path: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Path to the workflow configuration document; built-ins when absent.
    pub workflow_config_path: Option<String>,
    pub output_dir: String,
    pub performance_mode: bool,
    pub max_concurrent_scans: usize,
    pub cache_ttl_seconds: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub slack_webhook_url: Option<String>,
    pub webhook_url: Option<String>,
    pub email_gateway_url: Option<String>,
    pub email_recipient: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn load() -> Result<Self> {
        match dotenv() {
            Ok(path) => tracing::info!("Loaded .env file from: {:?}", path),
            Err(_) => tracing::debug!("No .env file found"),
        }

        let base_url = env_or("AEGIS_POLICY_BASE_URL", "http://localhost:8181");
        // Fail fast on an unparseable policy endpoint rather than at the
        // first evaluation.
        Url::parse(&base_url).map_err(|e| {
            AegisError::ConfigurationError(format!(
                "AEGIS_POLICY_BASE_URL is not a valid URL ({base_url}): {e}"
            ))
        })?;

        let default_path = env_or("AEGIS_POLICY_DEFAULT_PATH", "/v1/data/aegis/scan");
        if !default_path.starts_with('/') {
            return Err(AegisError::ConfigurationError(
                "AEGIS_POLICY_DEFAULT_PATH must start with '/'".to_string(),
            ));
        }

        let default_concurrency = std::thread::available_parallelism()
            .map(|n| n.get() * 2)
            .unwrap_or(8);
        let max_concurrent_scans = env_parse("AEGIS_MAX_CONCURRENT_SCANS", default_concurrency);
        if max_concurrent_scans == 0 {
            return Err(AegisError::ConfigurationError(
                "AEGIS_MAX_CONCURRENT_SCANS must be positive".to_string(),
            ));
        }

        let workflow_config_path = env::var("AEGIS_WORKFLOW_CONFIG").ok().filter(|p| !p.is_empty());

        let email_gateway_url = env::var("AEGIS_EMAIL_GATEWAY_URL").ok();
        let email_recipient = env::var("AEGIS_EMAIL_RECIPIENT").ok();
        if email_gateway_url.is_some() && email_recipient.is_none() {
            return Err(AegisError::ConfigurationError(
                "AEGIS_EMAIL_RECIPIENT is required when AEGIS_EMAIL_GATEWAY_URL is set".to_string(),
            ));
        }

        Ok(Self {
            policy: PolicyConfig {
                base_url,
                default_path,
                timeout_seconds: env_parse(
                    "AEGIS_POLICY_TIMEOUT_SECS",
                    crate::constants::POLICY_CLIENT_TIMEOUT_SECS,
                ),
            },
            orchestrator: OrchestratorConfig {
                workflow_config_path,
                output_dir: env_or("AEGIS_OUTPUT_DIR", "./scan-output"),
                performance_mode: env_parse("AEGIS_PERFORMANCE_MODE", true),
                max_concurrent_scans,
                cache_ttl_seconds: env_parse(
                    "AEGIS_CACHE_TTL_SECS",
                    crate::constants::RESULT_CACHE_TTL_SECS,
                ),
                max_retries: env_parse("AEGIS_MAX_RETRIES", crate::constants::DEFAULT_MAX_RETRIES),
            },
            notifications: NotificationConfig {
                slack_webhook_url: env::var("AEGIS_SLACK_WEBHOOK_URL").ok(),
                webhook_url: env::var("AEGIS_WEBHOOK_URL").ok(),
                email_gateway_url,
                email_recipient,
            },
        })
    }
}
