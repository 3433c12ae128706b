/// Unified error handling for the pasarela client
///
/// This module provides the error taxonomy surfaced to callers. Transient
/// node failures and single token expiries are absorbed by the dispatcher;
/// only what survives its bounded retry envelope reaches this type.
use std::fmt;
use thiserror::Error;

use crate::safety::Capability;

/// Main error type for pasarela operations
#[derive(Debug, Error)]
pub enum PasarelaError {
    /// The configured endpoint list is empty
    #[error("No cluster nodes configured")]
    NoNodesConfigured,

    /// Credentials (or a renewed token) were rejected by the backend
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    /// A destructive operation was blocked locally by the safety policy
    #[error("Operation forbidden: {capability} is disabled")]
    OperationForbidden { capability: Capability },

    /// Every configured node failed for this call
    #[error("Cluster unavailable after {attempts} node attempts")]
    ClusterUnavailable { attempts: usize },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(ConfigError),

    /// Transport-level errors that escaped the retry envelope
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The backend answered, but not with a status the caller expected
    #[error("Backend error ({status}): {message}")]
    Backend { status: u16, message: String },

    /// Request or response body could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// The endpoint list is empty once blank entries are dropped
    #[error("No cluster nodes configured")]
    NoNodesConfigured,
}

/// Failures of a single request against a single node
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request to {node} timed out")]
    Timeout { node: String },

    #[error("connection to {node} refused")]
    ConnectionRefused { node: String },

    #[error("network error talking to {node}: {message}")]
    Network { node: String, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for pasarela operations
pub type PasarelaResult<T> = Result<T, PasarelaError>;

impl From<ConfigError> for PasarelaError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoNodesConfigured => PasarelaError::NoNodesConfigured,
            other => PasarelaError::Config(other),
        }
    }
}

impl From<serde_json::Error> for PasarelaError {
    fn from(err: serde_json::Error) -> Self {
        PasarelaError::Serialization(err.to_string())
    }
}

impl PasarelaError {
    /// Create an authentication failure
    pub fn auth_failed<S: Into<String>>(reason: S) -> Self {
        PasarelaError::AuthenticationFailed {
            reason: reason.into(),
        }
    }

    /// Create a backend error
    pub fn backend<S: Into<String>>(status: u16, message: S) -> Self {
        PasarelaError::Backend {
            status,
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        PasarelaError::Internal {
            message: message.into(),
        }
    }

    /// Whether the caller may reasonably retry the same call later.
    /// The client itself never retries across calls.
    pub fn is_recoverable(&self) -> bool {
        match self {
            PasarelaError::ClusterUnavailable { .. } => true,
            PasarelaError::Transport(_) => true,
            PasarelaError::Backend { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// True when the failure is a local policy denial rather than anything
    /// reported by the backend
    pub fn is_policy_denial(&self) -> bool {
        matches!(self, PasarelaError::OperationForbidden { .. })
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PasarelaError::NoNodesConfigured => ErrorSeverity::Critical,
            PasarelaError::Config(_) => ErrorSeverity::Critical,
            PasarelaError::Internal { .. } => ErrorSeverity::Critical,
            PasarelaError::AuthenticationFailed { .. } => ErrorSeverity::Error,
            PasarelaError::ClusterUnavailable { .. } => ErrorSeverity::Error,
            PasarelaError::Transport(_) => ErrorSeverity::Warning,
            PasarelaError::OperationForbidden { .. } => ErrorSeverity::Info,
            _ => ErrorSeverity::Error,
        }
    }
}

impl TransportError {
    /// Node the failure was observed against, if any
    pub fn node(&self) -> Option<&str> {
        match self {
            TransportError::Timeout { node }
            | TransportError::ConnectionRefused { node }
            | TransportError::Network { node, .. } => Some(node),
            TransportError::InvalidRequest(_) => None,
        }
    }

    /// Whether this failure says something about the node's health.
    /// A malformed request fails the same way on every node.
    pub fn is_node_failure(&self) -> bool {
        !matches!(self, TransportError::InvalidRequest(_))
    }
}

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that affect functionality but don't crash the system
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational messages about recoverable issues
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}
