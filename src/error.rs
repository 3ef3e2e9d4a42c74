//! Error types for the OceanStor backend plugin
//!
//! Provides structured error types for session handling, metadata queries,
//! configuration loading and provisioning-parameter validation.

use thiserror::Error;

/// Unified error type for the plugin
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // Session Errors
    // =========================================================================
    #[error("Authentication failed at {endpoint}: {reason}")]
    Authentication { endpoint: String, reason: String },

    // =========================================================================
    // Query Errors
    // =========================================================================
    #[error("Query {operation} failed: {reason}")]
    Query { operation: String, reason: String },

    #[error("Unrecognized product version: {0}")]
    ProductVersionParse(String),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unsupported QoS parameter {field}: {reason}")]
    UnsupportedQos { field: String, reason: String },

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used by the orchestration layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed configuration
    Config,
    /// Login or logout failure
    Auth,
    /// Remote metadata fetch or parse failure
    Query,
    /// Malformed provisioning parameter or QoS profile
    Validation,
    /// Everything else
    Internal,
}

impl Error {
    /// Build a query error for the named remote operation
    pub fn query(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Query {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Build an authentication error for the given endpoint
    pub fn auth(endpoint: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Authentication {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    /// Determine the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) | Error::YamlParse(_) => ErrorKind::Config,

            Error::Authentication { .. } => ErrorKind::Auth,

            // Product version parsing is a query failure subtype
            Error::Query { .. }
            | Error::ProductVersionParse(_)
            | Error::Http(_)
            | Error::JsonParse(_) => ErrorKind::Query,

            Error::Validation(_) | Error::UnsupportedQos { .. } => ErrorKind::Validation,

            Error::Internal(_) | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Check if the orchestration layer may retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Auth | ErrorKind::Query)
            && !matches!(self, Error::ProductVersionParse(_))
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::Query { .. } => true,
            _ => false,
        }
    }
}

/// Result type alias for the plugin
pub type Result<T> = std::result::Result<T, Error>;
