//! Stage condition evaluation.
//!
//! Conditions gate stage execution against the request (artifact kind, file
//! size), earlier stage results (dotted-path extraction), or a named custom
//! evaluator registered on the engine.

use super::{StageResult, WorkflowRequest};
use crate::{AegisError, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    ArtifactType,
    FileSize,
    PreviousResult,
    Custom,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    Matches,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCondition {
    pub kind: ConditionKind,
    /// Meaning depends on `kind`: unused for artifact_type / file_size, a
    /// `stage.dotted.path` for previous_result, an evaluator name for custom.
    #[serde(default)]
    pub param: String,
    pub operator: ConditionOperator,
    pub value: serde_json::Value,
}

/// Custom evaluator plugged into the engine by name
#[async_trait]
pub trait ConditionEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        condition: &StageCondition,
        request: &WorkflowRequest,
    ) -> Result<bool>;
}

/// Applies an operator to an observed value.
fn apply(operator: ConditionOperator, observed: &serde_json::Value, expected: &serde_json::Value) -> Result<bool> {
    match operator {
        ConditionOperator::Equals => Ok(observed == expected),
        ConditionOperator::NotEquals => Ok(observed != expected),
        ConditionOperator::GreaterThan | ConditionOperator::LessThan => {
            let left = observed.as_f64().ok_or_else(|| {
                AegisError::Validation(format!("non-numeric operand for comparison: {observed}"))
            })?;
            let right = expected.as_f64().ok_or_else(|| {
                AegisError::Validation(format!("non-numeric operand for comparison: {expected}"))
            })?;
            Ok(if operator == ConditionOperator::GreaterThan {
                left > right
            } else {
                left < right
            })
        }
        ConditionOperator::Contains => {
            let haystack = value_as_string(observed);
            let needle = value_as_string(expected);
            Ok(haystack.contains(&needle))
        }
        ConditionOperator::Matches => {
            let haystack = value_as_string(observed);
            let pattern = value_as_string(expected);
            let regex = Regex::new(&pattern)
                .map_err(|e| AegisError::Validation(format!("bad condition pattern: {e}")))?;
            Ok(regex.is_match(&haystack))
        }
    }
}

fn value_as_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Extracts a dotted path from a JSON value.
fn extract_path<'a>(root: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Evaluates a single stage condition.
pub async fn evaluate(
    condition: &StageCondition,
    request: &WorkflowRequest,
    stage_results: &HashMap<String, StageResult>,
    evaluators: &HashMap<String, std::sync::Arc<dyn ConditionEvaluator>>,
) -> Result<bool> {
    let outcome = match condition.kind {
        ConditionKind::ArtifactType => {
            let observed = serde_json::Value::String(request.artifact_kind.clone());
            apply(condition.operator, &observed, &condition.value)?
        }
        ConditionKind::FileSize => {
            let metadata = tokio::fs::metadata(&request.artifact_path)
                .await
                .map_err(|e| {
                    AegisError::Validation(format!(
                        "cannot stat artifact {}: {e}",
                        request.artifact_path
                    ))
                })?;
            let observed = serde_json::Value::from(metadata.len());
            apply(condition.operator, &observed, &condition.value)?
        }
        ConditionKind::PreviousResult => {
            // param = "<stage>.<dotted.path into the stage result>"
            let (stage_name, path) = condition
                .param
                .split_once('.')
                .unwrap_or((condition.param.as_str(), ""));
            let Some(result) = stage_results.get(stage_name) else {
                debug!("previous_result condition references unrecorded stage {stage_name}");
                return Ok(false);
            };
            let as_value = serde_json::to_value(result)?;
            let observed = if path.is_empty() {
                &as_value
            } else {
                match extract_path(&as_value, path) {
                    Some(v) => v,
                    None => return Ok(false),
                }
            };
            apply(condition.operator, observed, &condition.value)?
        }
        ConditionKind::Custom => {
            let evaluator = evaluators.get(&condition.param).ok_or_else(|| {
                AegisError::ConfigurationError(format!(
                    "unknown condition evaluator: {}",
                    condition.param
                ))
            })?;
            evaluator.evaluate(condition, request).await?
        }
    };
    Ok(outcome)
}
