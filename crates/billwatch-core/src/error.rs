//! Error types for billwatch operations.
//!
//! [`BillingError`] covers every failure the reporting and monitoring paths
//! can hit. Nothing in billwatch retries: errors are surfaced to the caller
//! and, at the top level, logged before the process exits.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`BillingError`].
pub type Result<T> = std::result::Result<T, BillingError>;

/// Error type shared by all billwatch crates.
#[derive(Debug, Error)]
pub enum BillingError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration file not found
    #[error("Configuration not found at {path}")]
    ConfigNotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Configuration file is invalid YAML
    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    /// Missing required configuration field
    #[error("Missing required config field: {field}")]
    ConfigMissingField { field: String },

    /// Directory creation failed
    #[error("Failed to create directory: {path}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // =========================================================================
    // Data Errors
    // =========================================================================
    /// A required column is absent or holds values of the wrong shape
    #[error("Schema error: {message}")]
    Schema { message: String },

    /// Grand total of a percentage column is zero
    #[error("Cannot compute percentages of {column}: grand total is zero")]
    DivideByZero { column: String },

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// Query was rejected before being sent
    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    /// Query executor call failed
    #[error("Remote query failed: {message}")]
    RemoteQuery {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Notification sink call failed
    #[error("Failed to deliver notification to {channel}: {message}")]
    NotificationDelivery { channel: String, message: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (bug in billwatch)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BillingError {
    /// Create a ConfigNotFound error
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Self::ConfigNotFound {
            path: path.into(),
            source: None,
        }
    }

    /// Create a ConfigNotFound error with source
    pub fn config_not_found_with_source(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ConfigNotFound {
            path: path.into(),
            source: Some(source),
        }
    }

    /// Create a Schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a Schema error for an absent column
    pub fn missing_column(column: &str) -> Self {
        Self::Schema {
            message: format!("column {column:?} not in table"),
        }
    }

    /// Create an InvalidQuery error
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Create a RemoteQuery error without an underlying source
    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteQuery {
            message: message.into(),
            source: None,
        }
    }

    /// Create a RemoteQuery error wrapping a transport error
    pub fn remote_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::RemoteQuery {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a NotificationDelivery error
    pub fn notification(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotificationDelivery {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    // =========================================================================
    // Error classification helpers
    // =========================================================================

    /// Returns true if the error came from a remote boundary
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::RemoteQuery { .. } | Self::NotificationDelivery { .. }
        )
    }

    /// Returns true if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound { .. } | Self::ConfigInvalid { .. } | Self::ConfigMissingField { .. }
        )
    }

    /// Returns actionable guidance for the user
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            Self::ConfigNotFound { .. } => {
                Some("Set GCLOUD_CONFIG_FILE or pass --config with the path to a YAML config")
            }
            Self::ConfigInvalid { .. } => Some("Check YAML syntax of the configuration file"),
            Self::ConfigMissingField { .. } => {
                Some("Add the missing field to the configuration file")
            }
            Self::RemoteQuery { .. } => {
                Some("Check the access token, project id and billing table name")
            }
            Self::NotificationDelivery { .. } => Some("Check the Slack api_key and channel"),
            _ => None,
        }
    }

    /// User-facing one-line description, with guidance when available.
    pub fn friendly_message(&self) -> String {
        match self.guidance() {
            Some(hint) => format!("{self}. {hint}"),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_not_found_error() {
        let err = BillingError::config_not_found("/home/user/.config/billwatch/config.yaml");
        assert!(err.to_string().contains("Configuration not found"));
        assert!(err.is_config_error());
        assert!(!err.is_remote());
        assert!(err.guidance().is_some());
    }

    #[test]
    fn test_missing_column_message() {
        let err = BillingError::missing_column("usage_end_time");
        assert_eq!(
            err.to_string(),
            "Schema error: column \"usage_end_time\" not in table"
        );
    }

    #[test]
    fn test_remote_classification() {
        assert!(BillingError::remote("503").is_remote());
        assert!(BillingError::notification("#notifications", "channel_not_found").is_remote());
        assert!(!BillingError::schema("bad").is_remote());
    }

    #[test]
    fn test_remote_with_source_keeps_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = BillingError::remote_with_source("connection dropped", io);
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "reset");
    }

    #[test]
    fn test_friendly_message_appends_guidance() {
        let err = BillingError::notification("#alerts", "invalid_auth");
        let msg = err.friendly_message();
        assert!(msg.starts_with("Failed to deliver notification to #alerts: invalid_auth"));
        assert!(msg.contains("Slack api_key"));

        let err = BillingError::DivideByZero {
            column: "cost_sum".into(),
        };
        assert_eq!(err.friendly_message(), err.to_string());
    }
}
