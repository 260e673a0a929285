use thiserror::Error;

/// Convenience type alias for Results with AegisError
pub type Result<T> = std::result::Result<T, AegisError>;

/// Main error type for the scanning service
///
/// This enum represents all possible errors that can occur within
/// the orchestration pipeline, providing detailed error context for
/// debugging and error handling. Per-invocation scanner failures use
/// [`crate::scanners::ScannerError`] and stay confined to their stage.
#[derive(Error, Debug)]
pub enum AegisError {
    #[error("Policy service transport error: {0}")]
    PolicyTransport(#[from] reqwest::Error),

    #[error("Policy evaluation error: {0}")]
    PolicyEvaluation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("No workflow matches artifact kind: {0}")]
    NoWorkflow(String),

    #[error("Workflow execution failed: {workflow} - {message}")]
    WorkflowExecution { workflow: String, message: String },

    #[error("Workflow disabled for tenant: {tenant}/{workflow}")]
    TenantDisabled { tenant: String, workflow: String },

    #[error("circuit breaker is open for {key}")]
    CircuitOpen { key: String },

    #[error("Cancelled: {message}")]
    Cancelled { message: String },

    #[error("Timeout error: {message}")]
    Timeout { message: String },

    #[error("Notification error: {channel} - {message}")]
    Notification { channel: String, message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Validation error: {0}")]
    Validation(String),
}
