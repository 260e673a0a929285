//! Policy service client.
//!
//! The policy engine is queried as a remote decision service over HTTP:
//! `POST <base_url><policy_path>` with `{"input": ...}`, answering
//! `{"result": {"allow", "action", "reason", "violations"}}`. Transport or
//! decode failures surface as policy errors and are never masked as allow.

use crate::constants::POLICY_CLIENT_TIMEOUT_SECS;
use crate::models::{AggregatedResult, Finding, PolicyDecision, SeveritySummary};
use crate::{AegisError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

/// Everything the policy engine sees about one evaluated job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyInput {
    pub artifact_id: String,
    pub artifact_type: String,
    pub artifact_path: String,
    pub tenant_id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub job_id: String,
    pub aggregated_result: AggregatedResult,
    pub vulnerabilities: Vec<Finding>,
    pub summary: SeveritySummary,
    pub scanners_used: Vec<String>,
    pub scan_timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PolicyInput {
    /// Builds the policy input from an aggregated scan result.
    pub fn from_aggregated(
        job: &crate::models::ScanJob,
        workflow_id: &str,
        workflow_name: &str,
        aggregated: &AggregatedResult,
    ) -> Self {
        Self {
            artifact_id: job.artifact_id.clone(),
            artifact_type: job.artifact_kind.clone(),
            artifact_path: job.artifact_path.clone(),
            tenant_id: job.tenant_id.clone(),
            workflow_id: workflow_id.to_string(),
            workflow_name: workflow_name.to_string(),
            job_id: job.job_id.clone(),
            vulnerabilities: aggregated.findings.clone(),
            summary: aggregated.summary.clone(),
            scanners_used: aggregated
                .scanner_results
                .iter()
                .map(|r| r.scanner.clone())
                .collect(),
            scan_timestamp: aggregated.timestamp,
            metadata: job.metadata.clone(),
            aggregated_result: aggregated.clone(),
        }
    }
}

/// Policy evaluation contract; the HTTP client is the production
/// implementation, the static client serves tests and local runs.
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    async fn evaluate(&self, policy_path: &str, input: &PolicyInput) -> Result<PolicyDecision>;
}

#[derive(Serialize)]
struct EvaluateRequest<'a> {
    input: &'a PolicyInput,
}

#[derive(Deserialize)]
struct EvaluateResponse {
    result: PolicyDecision,
}

#[derive(Debug)]
pub struct HttpPolicyClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpPolicyClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            AegisError::ConfigurationError(format!("invalid policy base url {base_url}: {e}"))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLICY_CLIENT_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, base_url })
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            AegisError::ConfigurationError(format!("invalid policy base url {base_url}: {e}"))
        })?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl PolicyEvaluator for HttpPolicyClient {
    async fn evaluate(&self, policy_path: &str, input: &PolicyInput) -> Result<PolicyDecision> {
        let endpoint = format!(
            "{}{}",
            self.base_url.as_str().trim_end_matches('/'),
            policy_path
        );
        debug!("Evaluating policy {} for job {}", endpoint, input.job_id);

        let response = self
            .client
            .post(&endpoint)
            .json(&EvaluateRequest { input })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!("Policy service answered {} for {}", status, endpoint);
            return Err(AegisError::PolicyEvaluation(format!(
                "policy service answered {status}"
            )));
        }

        let decoded: EvaluateResponse = response
            .json()
            .await
            .map_err(|e| AegisError::PolicyEvaluation(format!("undecodable decision: {e}")))?;
        Ok(decoded.result)
    }
}

/// Scripted evaluator for tests and policy-less local runs.
pub struct StaticPolicyClient {
    decision: RwLock<Result<PolicyDecision>>,
}

impl StaticPolicyClient {
    pub fn allowing() -> Self {
        Self::with_decision(PolicyDecision {
            allow: true,
            action: "allow".to_string(),
            reason: String::new(),
            violations: vec![],
        })
    }

    pub fn with_decision(decision: PolicyDecision) -> Self {
        Self {
            decision: RwLock::new(Ok(decision)),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            decision: RwLock::new(Err(AegisError::PolicyEvaluation(message.into()))),
        }
    }

    pub async fn set_decision(&self, decision: PolicyDecision) {
        let mut current = self.decision.write().await;
        *current = Ok(decision);
    }
}

#[async_trait]
impl PolicyEvaluator for StaticPolicyClient {
    async fn evaluate(&self, _policy_path: &str, _input: &PolicyInput) -> Result<PolicyDecision> {
        let decision = self.decision.read().await;
        match &*decision {
            Ok(d) => Ok(d.clone()),
            Err(e) => Err(AegisError::PolicyEvaluation(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScanJob;

    fn sample_input() -> PolicyInput {
        let job = ScanJob::new("default", "img-1", "/a/img.tar", "docker");
        let aggregated = AggregatedResult {
            artifact_path: job.artifact_path.clone(),
            artifact_kind: job.artifact_kind.clone(),
            workflow: "DockerWorkflow".to_string(),
            findings: vec![],
            summary: SeveritySummary::default(),
            scanner_results: vec![],
            total_scanners: 1,
            successful_scanners: 1,
            failed_scanners: 0,
            total_duration_seconds: 1.0,
            timestamp: chrono::Utc::now(),
        };
        PolicyInput::from_aggregated(&job, "docker-workflow", "DockerWorkflow", &aggregated)
    }

    #[tokio::test]
    async fn decodes_successful_decision() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/data/policies/docker")
            .match_header("content-type", "application/json")
            .with_status(200)
            .with_body(
                r#"{"result": {"allow": false, "action": "quarantine", "reason": "license GPL-3.0", "violations": [{"rule": "license"}]}}"#,
            )
            .create_async()
            .await;

        let client = HttpPolicyClient::new(&server.url()).unwrap();
        let decision = client
            .evaluate("/v1/data/policies/docker", &sample_input())
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(!decision.allow);
        assert_eq!(decision.action, "quarantine");
        assert_eq!(decision.reason, "license GPL-3.0");
        assert_eq!(decision.violations.len(), 1);
    }

    #[tokio::test]
    async fn non_200_is_policy_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/data/policies/docker")
            .with_status(500)
            .create_async()
            .await;

        let client = HttpPolicyClient::new(&server.url()).unwrap();
        let err = client
            .evaluate("/v1/data/policies/docker", &sample_input())
            .await
            .unwrap_err();
        assert!(matches!(err, AegisError::PolicyEvaluation(_)));
    }

    #[tokio::test]
    async fn undecodable_body_is_policy_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/data/policies/docker")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = HttpPolicyClient::new(&server.url()).unwrap();
        let err = client
            .evaluate("/v1/data/policies/docker", &sample_input())
            .await
            .unwrap_err();
        assert!(matches!(err, AegisError::PolicyEvaluation(_)));
    }

    #[test]
    fn invalid_base_url_is_configuration_error() {
        let err = HttpPolicyClient::new("not a url").unwrap_err();
        assert!(matches!(err, AegisError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn static_client_replays_configured_decision() {
        let client = StaticPolicyClient::allowing();
        let decision = client.evaluate("/any", &sample_input()).await.unwrap();
        assert_eq!(decision.action, "allow");

        client
            .set_decision(PolicyDecision {
                allow: false,
                action: "block".to_string(),
                reason: "critical findings".to_string(),
                violations: vec![],
            })
            .await;
        let decision = client.evaluate("/any", &sample_input()).await.unwrap();
        assert_eq!(decision.action, "block");
    }
}
