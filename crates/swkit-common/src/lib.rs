//! # SWKit Common
//!
//! Shared error type, logging setup and timeout helpers for the SWKit
//! request-interception layer.
//!
//! ## Features
//!
//! - Unified error type with backtrace support for internal faults
//! - Logging configuration on top of `tracing-subscriber`
//! - Timeout wrapper for network and install operations
//! - `ResultExt::context` for wrapping foreign errors

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod timeout;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use timeout::with_timeout;

/// Unified error type for SWKit.
#[derive(Error, Debug)]
pub enum SwKitError {
    /// Network-related errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Cache storage errors.
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Worker lifecycle errors (install/activate).
    #[error("Lifecycle error: {message}")]
    Lifecycle {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout errors.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        backtrace: Option<backtrace::Backtrace>,
    },
}

impl SwKitError {
    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a lifecycle error.
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether the failure is transient (the next request may succeed).
    ///
    /// Nothing in SWKit retries on its own; callers use this to decide
    /// whether falling back to a cached copy makes sense.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SwKitError::Network { .. } | SwKitError::Timeout(_) | SwKitError::Io(_)
        )
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            SwKitError::Network { .. } => "network",
            SwKitError::Storage { .. } => "storage",
            SwKitError::Lifecycle { .. } => "lifecycle",
            SwKitError::Config { .. } => "config",
            SwKitError::Io(_) => "io",
            SwKitError::Timeout(_) => "timeout",
            SwKitError::NotFound(_) => "not_found",
            SwKitError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for SWKit operations.
pub type Result<T> = std::result::Result<T, SwKitError>;

/// Extension trait for Result.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| SwKitError::Internal {
            message: format!("{}: {}", message.into(), e),
            backtrace: Some(backtrace::Backtrace::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refused() -> SwKitError {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        SwKitError::network_with_source("fetch failed", io)
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(SwKitError::storage("full").category(), "storage");
        assert_eq!(refused().category(), "network");
        assert_eq!(
            SwKitError::Timeout(Duration::from_secs(1)).category(),
            "timeout"
        );
    }

    #[test]
    fn test_transient() {
        assert!(refused().is_transient());
        assert!(SwKitError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!SwKitError::config("bad json").is_transient());
        assert!(!SwKitError::lifecycle("install failed").is_transient());
    }

    #[test]
    fn test_context_wraps_message() {
        let err: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        let wrapped = err.context("reading cache index").unwrap_err();
        assert_eq!(wrapped.category(), "internal");
        assert!(wrapped.to_string().contains("reading cache index: missing"));
    }
}
