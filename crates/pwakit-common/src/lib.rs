//! # PWAKit Common
//!
//! Configuration, error types, and logging setup shared by the PWAKit crates.
//!
//! ## Features
//!
//! - Unified top-level error type with categories for logging
//! - JSON configuration with policy profiles
//! - Logging configuration and setup
//! - Timeout helper for async operations

use std::time::Duration;
use thiserror::Error;

pub mod config;
pub mod logging;
pub mod timeout;

pub use config::{
    NetworkSettings, PolicyProfile, PwaConfig, RegistrationSettings, SiteConfig, StoreBackendKind,
    StoreSettings, WorkerPolicy,
};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use timeout::with_timeout;

/// Unified error type for PWAKit.
#[derive(Error, Debug)]
pub enum PwaKitError {
    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
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

    /// Network-related errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Service worker lifecycle errors.
    #[error("Worker error: {message}")]
    Worker {
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
}

impl PwaKitError {
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

    /// Create a storage error with source.
    pub fn storage_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

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

    /// Create a worker error with source.
    pub fn worker_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Worker {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PwaKitError::Network { .. }
                | PwaKitError::Storage { .. }
                | PwaKitError::Timeout(_)
                | PwaKitError::Io(_)
        )
    }

    /// Get the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            PwaKitError::Config { .. } => "config",
            PwaKitError::Storage { .. } => "storage",
            PwaKitError::Network { .. } => "network",
            PwaKitError::Worker { .. } => "worker",
            PwaKitError::Io(_) => "io",
            PwaKitError::Timeout(_) => "timeout",
            PwaKitError::NotFound(_) => "not_found",
        }
    }
}

/// Result type alias for PWAKit operations.
pub type Result<T> = std::result::Result<T, PwaKitError>;

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| PwaKitError::NotFound(resource.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(PwaKitError::config("bad").category(), "config");
        assert_eq!(PwaKitError::NotFound("active worker".into()).category(), "not_found");
        assert_eq!(
            PwaKitError::Timeout(Duration::from_secs(1)).category(),
            "timeout"
        );
    }

    #[test]
    fn test_retryable() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert!(PwaKitError::storage_with_source("write failed", io).is_retryable());
        assert!(PwaKitError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!PwaKitError::config("bad").is_retryable());
        assert!(!PwaKitError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn test_option_ext() {
        let some: Option<i32> = Some(42);
        assert_eq!(some.ok_or_not_found("test").unwrap(), 42);

        let none: Option<i32> = None;
        assert!(matches!(
            none.ok_or_not_found("test"),
            Err(PwaKitError::NotFound(_))
        ));
    }
}
