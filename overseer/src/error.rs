//! Unified error types for the overseer runtime.
//!
//! All module-specific errors convert into the crate-level [`Error`]. Call
//! sites that only care about the error's *kind* (is this approval-required,
//! is this transient) should match on [`Error::kind`] rather than the
//! concrete variant, since the same [`ErrorKind::ToolExecutionError`] kind
//! can originate from an in-process tool, an MCP call, or an executor
//! plugin.

use std::fmt;

/// The seven error kinds the agent loop and scheduler branch on.
///
/// A `ToolExecutionError` from an in-process tool, a failed MCP call, and a
/// non-zero executor plugin exit all map to the same kind: callers act on
/// "did this turn fail because the tool failed", not on which subsystem
/// produced the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input failed a validation check (size gate, malformed arguments).
    ValidationError,
    /// A `Policy` field rejected the action before execution was attempted.
    PolicyBlock,
    /// The action requires a pending [`crate::domain::ActionApproval`].
    ApprovalRequired,
    /// A tool, MCP call, or executor plugin returned a failure.
    ToolExecutionError,
    /// A remote dependency (LLM, MCP transport, webhook) failed in a way
    /// that may succeed on retry.
    TransientRemoteError,
    /// A unique constraint (most often `run_key`) was violated.
    IdempotencyConflict,
    /// No executor plugin registered for the requested action type.
    PluginNotFound,
    /// Anything else: configuration, storage corruption, I/O.
    Fatal,
}

/// The main error type for overseer operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Message bus error.
    #[error("bus: {0}")]
    Bus(#[from] BusError),

    /// Channel error.
    #[error("channel: {0}")]
    Channel(#[from] ChannelError),

    /// Agent loop error.
    #[error("agent: {0}")]
    Agent(#[from] AgentError),

    /// Configuration error.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// Storage error (non-SQL persistence paths).
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    /// SQLite store error.
    #[error("store: {0}")]
    Store(#[from] rusqlite::Error),

    /// Error from an `overseer-core` model/tool/MCP abstraction.
    #[error("core: {0}")]
    Core(#[from] overseer_core::Error),

    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// A policy field rejected the request.
    #[error("blocked by policy: {0}")]
    PolicyBlock(String),

    /// The action needs a pending approval before it can run.
    #[error("approval required: {0}")]
    ApprovalRequired(String),

    /// A unique-key conflict (e.g. `run_key` already exists).
    #[error("idempotency conflict: {0}")]
    IdempotencyConflict(String),

    /// No executor plugin is registered for the requested action type.
    #[error("no executor plugin for action type: {0}")]
    PluginNotFound(String),

    /// Input failed validation.
    #[error("validation: {0}")]
    Validation(String),

    /// Background task join error.
    #[error("task: {0}")]
    Task(String),

    /// Generic internal/fatal error.
    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Classify this error into one of the seven kinds call sites branch on.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::PolicyBlock(_) => ErrorKind::PolicyBlock,
            Self::ApprovalRequired(_) => ErrorKind::ApprovalRequired,
            Self::IdempotencyConflict(_) => ErrorKind::IdempotencyConflict,
            Self::PluginNotFound(_) => ErrorKind::PluginNotFound,
            Self::Agent(AgentError::Tool(_) | AgentError::MaxIterations(_)) => {
                ErrorKind::ToolExecutionError
            }
            Self::Agent(AgentError::Model(_) | AgentError::Timeout(_)) | Self::Channel(_) => {
                ErrorKind::TransientRemoteError
            }
            Self::Core(overseer_core::Error::Mcp(_)) => ErrorKind::TransientRemoteError,
            Self::Core(overseer_core::Error::Tool(_) | overseer_core::Error::ToolSet(_)) => {
                ErrorKind::ToolExecutionError
            }
            Self::Store(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ErrorKind::IdempotencyConflict
            }
            _ => ErrorKind::Fatal,
        }
    }

    /// Create an agent error from a string.
    #[inline]
    pub fn agent(msg: impl Into<String>) -> Self {
        Self::Agent(AgentError::Execution(msg.into()))
    }

    /// Create a config error from a string.
    #[inline]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::Invalid(msg.into()))
    }

    /// Create an internal/fatal error.
    #[inline]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a policy-block error.
    #[inline]
    pub fn policy_block(msg: impl Into<String>) -> Self {
        Self::PolicyBlock(msg.into())
    }

    /// Create an approval-required error.
    #[inline]
    pub fn approval_required(msg: impl Into<String>) -> Self {
        Self::ApprovalRequired(msg.into())
    }

    /// Create a plugin-not-found error.
    #[inline]
    pub fn plugin_not_found(action_type: impl Into<String>) -> Self {
        Self::PluginNotFound(action_type.into())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// Result type alias for overseer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for message bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Failed to send inbound message.
    #[error("inbound channel closed")]
    InboundClosed,
    /// Failed to send outbound message.
    #[error("outbound channel closed")]
    OutboundClosed,
    /// Failed to receive message.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
    /// Channel not found.
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
}

/// Result type for message bus operations.
pub type BusResult<T> = std::result::Result<T, BusError>;

/// Error type for channel (connector) operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Failed to start the channel.
    #[error("start failed: {0}")]
    StartFailed(String),
    /// Failed to stop the channel.
    #[error("stop failed: {0}")]
    StopFailed(String),
    /// Failed to send message.
    #[error("send failed: {0}")]
    SendFailed(String),
    /// Configuration error.
    #[error("config: {0}")]
    Config(String),
    /// Authentication failed.
    #[error("auth failed: {0}")]
    AuthFailed(String),
    /// Rate limited.
    #[error("rate limited: retry after {0}s")]
    RateLimited(u64),
    /// Channel is not connected.
    #[error("not connected")]
    NotConnected,
    /// Internal error.
    #[error("{0}")]
    Internal(String),
}

impl ChannelError {
    /// Create a start-failed error.
    #[inline]
    pub fn start(msg: impl Into<String>) -> Self {
        Self::StartFailed(msg.into())
    }

    /// Create a send-failed error.
    #[inline]
    pub fn send(msg: impl Into<String>) -> Self {
        Self::SendFailed(msg.into())
    }

    /// Create an internal error.
    #[inline]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type for channel operations.
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

/// Error type for agent loop operations.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Model/API error.
    #[error("model: {0}")]
    Model(String),
    /// Tool execution error.
    #[error("tool: {0}")]
    Tool(String),
    /// Generic execution error.
    #[error("{0}")]
    Execution(String),
    /// Timeout.
    #[error("timeout after {0}s")]
    Timeout(u64),
    /// Max loop steps reached.
    #[error("max loop steps ({0}) reached")]
    MaxIterations(usize),
}

impl AgentError {
    /// Create a model error.
    #[inline]
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    /// Create a tool error.
    #[inline]
    pub fn tool(msg: impl Into<String>) -> Self {
        Self::Tool(msg.into())
    }
}

/// Result type for agent operations.
pub type AgentResult<T> = std::result::Result<T, AgentError>;

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parse error.
    #[error("parse: {0}")]
    Parse(String),
    /// Missing required field.
    #[error("missing: {0}")]
    Missing(String),
    /// Invalid value.
    #[error("invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create a missing-field error.
    #[inline]
    pub fn missing(field: impl Into<String>) -> Self {
        Self::Missing(field.into())
    }

    /// Create an invalid-value error.
    #[inline]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Error type for non-SQL storage operations (pairing token files, etc).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    /// Item not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Item already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),
}

impl StorageError {
    /// Create a not-found error.
    #[inline]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
    /// Add context using a closure (lazy evaluation).
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ErrorContext<T> for std::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            Error::Internal(format!("{}: {}", msg.into(), err))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            Error::Internal(format!("{}: {}", f(), err))
        })
    }
}

/// A wrapper that displays errors in a user-friendly format, suitable for
/// relaying to a connector.
#[derive(Debug)]
pub struct DisplayError<'a>(pub &'a Error);

impl fmt::Display for DisplayError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Error::Agent(e) => write!(f, "Agent error: {e}"),
            Error::Config(e) => write!(f, "Configuration error: {e}"),
            Error::Channel(e) => write!(f, "Channel error: {e}"),
            Error::Bus(e) => write!(f, "Message bus error: {e}"),
            Error::Storage(e) => write!(f, "Storage error: {e}"),
            Error::Store(e) => write!(f, "Store error: {e}"),
            Error::Core(e) => write!(f, "Core error: {e}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Json(e) => write!(f, "JSON error: {e}"),
            Error::PolicyBlock(e) => write!(f, "Blocked by policy: {e}"),
            Error::ApprovalRequired(e) => write!(f, "Approval required: {e}"),
            Error::IdempotencyConflict(e) => write!(f, "Idempotency conflict: {e}"),
            Error::PluginNotFound(e) => write!(f, "No executor plugin for: {e}"),
            Error::Validation(e) => write!(f, "Validation error: {e}"),
            Error::Task(e) => write!(f, "Task error: {e}"),
            Error::Internal(e) => write!(f, "Internal error: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_conversions() {
        let bus_err = BusError::InboundClosed;
        let err: Error = bus_err.into();
        assert!(matches!(err, Error::Bus(_)));

        let channel_err = ChannelError::NotConnected;
        let err: Error = channel_err.into();
        assert!(matches!(err, Error::Channel(_)));
    }

    #[test]
    fn error_helpers() {
        let err = Error::agent("test error");
        assert!(matches!(err, Error::Agent(_)));

        let err = Error::config("invalid value");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn error_kind_classification() {
        assert_eq!(
            Error::policy_block("no").kind(),
            ErrorKind::PolicyBlock
        );
        assert_eq!(
            Error::approval_required("ask").kind(),
            ErrorKind::ApprovalRequired
        );
        assert_eq!(
            Error::IdempotencyConflict("dup".into()).kind(),
            ErrorKind::IdempotencyConflict
        );
        assert_eq!(Error::Validation("bad".into()).kind(), ErrorKind::ValidationError);
        assert_eq!(
            Error::Agent(AgentError::tool("boom")).kind(),
            ErrorKind::ToolExecutionError
        );
        assert_eq!(
            Error::Agent(AgentError::model("timeout")).kind(),
            ErrorKind::TransientRemoteError
        );
        assert_eq!(Error::internal("oops").kind(), ErrorKind::Fatal);
        assert_eq!(
            Error::plugin_not_found("webhook").kind(),
            ErrorKind::PluginNotFound
        );
    }

    #[test]
    fn channel_error_helpers() {
        let err = ChannelError::send("failed");
        assert!(matches!(err, ChannelError::SendFailed(_)));
    }
}
