//! # PWAKit Service Workers
//!
//! Offline caching layer for a website, modelled on the browser Service Worker.
//!
//! ## Features
//!
//! - **Registration**: `navigator.serviceWorker.register()` with a settle delay
//! - **Lifecycle**: install, waiting, skip-waiting, activate, client claim
//! - **Fetch Interception**: bypass list, then an ordered strategy rule table
//! - **Strategies**: network-first for documents, cache-first for static assets
//! - **Messages**: `SKIP_WAITING`, `GET_CACHE_INFO`
//! - **Background sync and push**: outbox replay, notification descriptions
//!
//! ## Architecture
//!
//! ```text
//! RegistrationController (page side, owns PageSession)
//!     │
//!     └── ServiceWorkerContainer (navigator.serviceWorker)
//!             ├── ServiceWorkerRegistration
//!             │       ├── installing (ServiceWorker)
//!             │       ├── waiting (ServiceWorker)
//!             │       └── active (ServiceWorker)
//!             └── clients
//!
//! ServiceWorker
//!     ├── Interceptor (method → bypass → RuleTable)
//!     ├── Strategy (NetworkFirst | CacheFirst)
//!     └── CacheStorage "{prefix}-v{version}"
//! ```

use std::time::Duration;

use pwakit_net::NetError;
use pwakit_store::StoreError;
use thiserror::Error;

pub mod container;
pub mod controller;
pub mod intercept;
pub mod lifecycle;
pub mod message;
pub mod notification;
pub mod strategy;
pub mod sync;
pub mod worker;

pub use container::{
    Client, ContainerEvent, RegistrationSnapshot, ScriptSource, ServiceWorkerContainer,
    UpdateOutcome, WorkerInfo,
};
pub use controller::{
    PageHost, PageSession, RegistrationController, RegistrationHandle, UpdateCheck, UpdatePrompt,
};
pub use intercept::{Interceptor, PassthroughReason, Route};
pub use lifecycle::{ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState};
pub use message::{CacheInfo, WorkerMessage};
pub use notification::{ClientAction, Notification, NotificationAction};
pub use strategy::{Predicate, Rule, RuleTable, Strategy};
pub use sync::Outbox;
pub use worker::{EventOutcome, ServiceWorker, WorkerEvent};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Install failed for {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request to {url} deferred to background sync tag '{tag}'")]
    Deferred { url: String, tag: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cache error: {0}")]
    Storage(#[from] StoreError),

    #[error("Network error: {0}")]
    Network(#[from] NetError),
}

pub type Result<T> = std::result::Result<T, ServiceWorkerError>;

impl From<ServiceWorkerError> for pwakit_common::PwaKitError {
    fn from(err: ServiceWorkerError) -> Self {
        match err {
            ServiceWorkerError::Storage(e) => Self::storage_with_source("Cache store failed", e),
            ServiceWorkerError::Network(e) => {
                Self::network_with_source("Network request failed", e)
            }
            ServiceWorkerError::Timeout(d) => Self::Timeout(d),
            ServiceWorkerError::NotFound(what) => Self::NotFound(what),
            other => Self::worker_with_source("Service worker failed", other),
        }
    }
}
