//! # Kalakar SW
//!
//! Offline caching worker for the ChitraKalakar web application.
//!
//! ## Features
//!
//! - Precaching of the application shell on install
//! - Versioned cache namespaces, with stale versions removed on activation
//! - Stale-while-revalidate for same-origin GET requests
//! - Offline navigation fallback to the cached shell
//! - `SKIP_WAITING` control messages
//! - Push notifications and notification click routing
//!
//! ## Architecture
//!
//! ```text
//! WorkerHost (per origin)
//!     ├── CacheStorage
//!     ├── Clients
//!     ├── Notifications
//!     └── ServiceWorkerRegistration
//!             └── ServiceWorker (per version)
//!                     ├── FetchInterceptor
//!                     └── TaskSet (background revalidation)
//! ```

pub mod cache;
pub mod clients;
pub mod config;
pub mod fetch;
pub mod install;
pub mod lifecycle;
pub mod message;
pub mod push;
pub mod task;
pub mod worker;

use thiserror::Error;

pub use cache::{CacheEntry, CacheOps, CacheStorage, RequestKey};
pub use clients::{Client, ClientType, Clients};
pub use config::{NotificationDefaults, WorkerConfig, CACHE_PREFIX, CACHE_VERSION, STATIC_ASSETS};
pub use fetch::{BypassReason, FetchEvent, FetchInterceptor, FetchOutcome, ResponseSource};
pub use install::{Activator, Installer};
pub use lifecycle::{ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState};
pub use message::{ControlMessage, MessageEvent, MessageOutcome};
pub use push::{
    ClickOutcome, Notification, NotificationAction, NotificationClickEvent, NotificationId,
    Notifications, PushEvent,
};
pub use task::TaskSet;
pub use worker::{
    EventKind, EventOutcome, InstallOutcome, ServiceWorker, ServiceWorkerEvent, WorkerEvent,
    WorkerHost,
};

/// Errors that can occur in the worker.
#[derive(Error, Debug, Clone)]
pub enum ServiceWorkerError {
    #[error("Install failed for {path}: {reason}")]
    InstallFailed { path: String, reason: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Security error: {0}")]
    SecurityError(String),

    #[error("Invalid state: {0}")]
    StateError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}
