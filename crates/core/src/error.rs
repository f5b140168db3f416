//! Error types for Codexec.

use thiserror::Error;

/// Result type alias using Codexec's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Codexec.
///
/// Note that `Sandbox::run` never surfaces this type; execution failures are
/// folded into `ExecutionResult`. This enum covers the remaining fallible
/// surfaces: context updates, construction, teardown, and tool dispatch.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Sandbox Errors
    // =========================================================================
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Invalid context payload: {0}")]
    Context(String),

    #[error("Worker process error: {0}")]
    Worker(String),

    #[error("Remote kernel error: {0}")]
    RemoteKernel(String),

    // =========================================================================
    // Tool Errors
    // =========================================================================
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a sandbox error.
    pub fn sandbox(msg: impl Into<String>) -> Self {
        Self::Sandbox(msg.into())
    }

    /// Create a context payload error.
    pub fn context(msg: impl Into<String>) -> Self {
        Self::Context(msg.into())
    }

    /// Create a worker process error.
    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }

    /// Create a remote kernel error.
    pub fn remote_kernel(msg: impl Into<String>) -> Self {
        Self::RemoteKernel(msg.into())
    }

    /// Create a tool not found error.
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound(name.into())
    }

    /// Create a tool execution error.
    pub fn tool_execution(msg: impl Into<String>) -> Self {
        Self::ToolExecution(msg.into())
    }

    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
