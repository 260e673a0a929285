//! Violation notifications.
//!
//! Non-allow policy decisions fan out to the tenant's configured channels.
//! Channel failures are isolated: one channel erroring never short-circuits
//! the others, and notification errors never change the job status.

use crate::constants::NOTIFY_CLIENT_TIMEOUT_SECS;
use crate::models::{JobResult, SeveritySummary};
use crate::{AegisError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Payload delivered to every channel on a non-allow decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationNotification {
    pub job_id: String,
    pub tenant_id: String,
    pub artifact_id: String,
    pub workflow: String,
    pub action: String,
    pub reason: String,
    pub violations: Vec<serde_json::Value>,
    pub summary: Option<SeveritySummary>,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
}

impl ViolationNotification {
    /// Builds the notification from a finished job; the decision's reason is
    /// carried verbatim.
    pub fn from_job(result: &JobResult) -> Option<Self> {
        let decision = result.decision.as_ref()?;
        Some(Self {
            job_id: result.job.job_id.clone(),
            tenant_id: result.job.tenant_id.clone(),
            artifact_id: result.job.artifact_id.clone(),
            workflow: result.workflow_id.clone().unwrap_or_default(),
            action: decision.action.clone(),
            reason: decision.reason.clone(),
            violations: decision.violations.clone(),
            summary: result.aggregated.as_ref().map(|a| a.summary.clone()),
            occurred_at: chrono::Utc::now(),
        })
    }
}

/// One delivery target (slack, email, webhook)
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, notification: &ViolationNotification) -> Result<()>;
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(NOTIFY_CLIENT_TIMEOUT_SECS))
        .build()
        .unwrap_or_default()
}

/// Slack incoming-webhook channel
pub struct SlackChannel {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackChannel {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            client: http_client(),
        }
    }

    fn format_message(notification: &ViolationNotification) -> String {
        let summary = notification
            .summary
            .as_ref()
            .map(|s| {
                format!(
                    " ({} critical, {} high, {} medium, {} low)",
                    s.critical, s.high, s.medium, s.low
                )
            })
            .unwrap_or_default();
        format!(
            ":rotating_light: Scan {} for artifact `{}` (tenant `{}`) resulted in *{}*: {}{}",
            notification.job_id,
            notification.artifact_id,
            notification.tenant_id,
            notification.action,
            notification.reason,
            summary
        )
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    async fn send(&self, notification: &ViolationNotification) -> Result<()> {
        let body = serde_json::json!({ "text": Self::format_message(notification) });
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AegisError::Notification {
                channel: "slack".to_string(),
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(AegisError::Notification {
                channel: "slack".to_string(),
                message: format!("webhook answered {}", response.status()),
            });
        }
        Ok(())
    }
}

/// Generic webhook channel posting the raw notification JSON
pub struct WebhookChannel {
    endpoint: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: http_client(),
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, notification: &ViolationNotification) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(notification)
            .send()
            .await
            .map_err(|e| AegisError::Notification {
                channel: "webhook".to_string(),
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(AegisError::Notification {
                channel: "webhook".to_string(),
                message: format!("endpoint answered {}", response.status()),
            });
        }
        Ok(())
    }
}

/// Email delivery via an HTTP mail gateway
pub struct EmailChannel {
    gateway_url: String,
    recipient: String,
    client: reqwest::Client,
}

impl EmailChannel {
    pub fn new(gateway_url: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            recipient: recipient.into(),
            client: http_client(),
        }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, notification: &ViolationNotification) -> Result<()> {
        let body = serde_json::json!({
            "to": self.recipient,
            "subject": format!(
                "[scan:{}] {} for artifact {}",
                notification.tenant_id, notification.action, notification.artifact_id
            ),
            "body": serde_json::to_string_pretty(notification)?,
        });
        let response = self
            .client
            .post(&self.gateway_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AegisError::Notification {
                channel: "email".to_string(),
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(AegisError::Notification {
                channel: "email".to_string(),
                message: format!("gateway answered {}", response.status()),
            });
        }
        Ok(())
    }
}

/// Dispatches notifications to named channels with per-channel isolation.
#[derive(Default)]
pub struct NotificationService {
    channels: HashMap<String, Arc<dyn NotificationChannel>>,
}

impl NotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, channel: Arc<dyn NotificationChannel>) {
        self.channels.insert(channel.name().to_string(), channel);
    }

    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Delivers to each named channel; returns the per-channel errors.
    ///
    /// Unconfigured channel names are reported as errors but do not affect
    /// the remaining channels.
    pub async fn dispatch(
        &self,
        notification: &ViolationNotification,
        channel_names: &[String],
    ) -> Vec<String> {
        let mut errors = Vec::new();
        for name in channel_names {
            match self.channels.get(name) {
                Some(channel) => match channel.send(notification).await {
                    Ok(()) => {
                        info!(
                            "Violation notification for job {} delivered via {}",
                            notification.job_id, name
                        );
                    }
                    Err(e) => {
                        warn!("Notification via {} failed: {}", name, e);
                        errors.push(format!("notification via {name} failed: {e}"));
                    }
                },
                None => {
                    warn!("Notification channel {} not configured", name);
                    errors.push(format!("notification channel {name} not configured"));
                }
            }
        }
        errors
    }
}
