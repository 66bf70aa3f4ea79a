//! Error types for the leaf topology service
//!
//! Provides structured error types for the keyed state manager, the
//! topology fan-out and the configuration/API collaborators around them.

use thiserror::Error;

/// Unified error type for the crate
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

    #[error("Failed to read config file {path}: {reason}")]
    ConfigFile { path: String, reason: String },

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Invalid target address: {address}")]
    InvalidAddress { address: String },

    // =========================================================================
    // Keyed State Errors
    // =========================================================================
    #[error("Account not found: {account_id}")]
    AccountNotFound { account_id: String },

    #[error("Account already exists: {account_id}")]
    AccountAlreadyExists { account_id: String },

    #[error("Invalid amount: {amount}")]
    InvalidAmount { amount: u64 },

    // =========================================================================
    // Topology Errors
    // =========================================================================
    #[error("Graph invariant violated: {0}")]
    GraphInvariant(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad classification of an error, used to decide how far it travels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Isolated to one remote target; absorbed into the round
    Transient,
    /// A business rule or lookup rejected one request
    Precondition,
    /// Bad or missing configuration; fatal before any fan-out
    Configuration,
    /// Anything else
    Internal,
}

impl Error {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Http(_) => ErrorClass::Transient,

            Error::AccountNotFound { .. }
            | Error::AccountAlreadyExists { .. }
            | Error::InvalidAmount { .. } => ErrorClass::Precondition,

            Error::Configuration(_)
            | Error::ConfigFile { .. }
            | Error::YamlParse(_)
            | Error::InvalidAddress { .. } => ErrorClass::Configuration,

            Error::Internal(_)
            | Error::GraphInvariant(_)
            | Error::JsonParse(_)
            | Error::Io(_) => ErrorClass::Internal,
        }
    }

    /// Configuration faults abort the whole run
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Configuration
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let err = Error::Configuration("no servers".into());
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert!(err.is_fatal());

        let err = Error::AccountNotFound {
            account_id: "User1".into(),
        };
        assert_eq!(err.class(), ErrorClass::Precondition);
        assert!(!err.is_fatal());
        assert!(!err.is_transient());

        let err = Error::InvalidAddress {
            address: "::::".into(),
        };
        assert!(err.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = Error::InvalidAmount { amount: 0 };
        assert_eq!(err.to_string(), "Invalid amount: 0");

        let err = Error::ConfigFile {
            path: "/etc/servers.yaml".into(),
            reason: "not found".into(),
        };
        assert!(err.to_string().contains("/etc/servers.yaml"));
    }
}
