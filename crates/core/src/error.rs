//! Error types for the Companion domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Companion operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Persistence errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A required collaborator (usually the remote connection) was never assigned.
    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Side channel error: {0}")]
    SideChannel(String),

    #[error("Orchestrator has not been initialized")]
    NotInitialized,

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool {0} not found")]
    NotFound(String),

    #[error("Tool {tool} error: invalid argument '{argument}': {reason}")]
    InvalidArgument {
        tool: String,
        argument: String,
        reason: String,
    },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool {tool} error: {reason}")]
    ExecutionFailed { tool: String, reason: String },
}

impl ToolError {
    /// Shorthand for a tool's own execution failure.
    pub fn failed(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Render the error as a `tool_output` the model can read and react to.
    pub fn to_output(&self, tool: &str) -> String {
        match self {
            Self::NotFound(_) | Self::InvalidArgument { .. } | Self::ExecutionFailed { .. } => {
                self.to_string()
            }
            Self::InvalidArguments(reason) => format!("Tool {tool} error: {reason}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}
