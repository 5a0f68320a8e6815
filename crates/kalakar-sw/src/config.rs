//! Worker configuration.
//!
//! Cache namespace names are derived from a prefix and a version string.
//! Bumping the version is the only way to invalidate previously cached
//! content: the next activation deletes every namespace of older versions.

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::ServiceWorkerError;

/// Prefix shared by every cache namespace this application owns.
pub const CACHE_PREFIX: &str = "chitrakalakar";

/// Cache generation, overridable at build time with `KALAKAR_CACHE_VERSION`.
pub const CACHE_VERSION: &str = match option_env!("KALAKAR_CACHE_VERSION") {
    Some(version) => version,
    None => "v3",
};

/// Offline shell precached at install.
pub const STATIC_ASSETS: &[&str] = &[
    "/",
    "/index.html",
    "/manifest.json",
    "/logo.png",
    "/logo192.png",
    "/logo512.png",
    "/offline.html",
];

/// Requests under this path prefix always go straight to the network.
pub const API_PREFIX: &str = "/api/";

/// Document served to navigations when the network is unavailable.
pub const FALLBACK_DOCUMENT: &str = "/";

/// Defaults applied to push payload fields that are absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub url: String,
    pub icon: String,
    pub badge: String,
    /// Vibration pattern in milliseconds.
    pub vibrate: Vec<u32>,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "ChitraKalakar".to_string(),
            body: "New update from ChitraKalakar".to_string(),
            url: "/".to_string(),
            icon: "/logo192.png".to_string(),
            badge: "/logo192.png".to_string(),
            vibrate: vec![100, 50, 100],
        }
    }
}

fn default_prefix() -> String {
    CACHE_PREFIX.to_string()
}

fn default_version() -> String {
    CACHE_VERSION.to_string()
}

fn default_assets() -> Vec<String> {
    STATIC_ASSETS.iter().map(|s| s.to_string()).collect()
}

fn default_api_prefix() -> String {
    API_PREFIX.to_string()
}

fn default_fallback() -> String {
    FALLBACK_DOCUMENT.to_string()
}

/// Configuration of one worker version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Origin (and scope) the worker serves, e.g. `https://chitrakalakar.com/`.
    pub scope: Url,

    #[serde(default = "default_prefix")]
    pub cache_prefix: String,

    #[serde(default = "default_version")]
    pub cache_version: String,

    /// Root-relative paths precached at install.
    #[serde(default = "default_assets")]
    pub static_assets: Vec<String>,

    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    #[serde(default = "default_fallback")]
    pub fallback_document: String,

    #[serde(default)]
    pub notification: NotificationDefaults,
}

impl WorkerConfig {
    /// Create a configuration with the built-in defaults for `scope`.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            cache_prefix: default_prefix(),
            cache_version: default_version(),
            static_assets: default_assets(),
            api_prefix: default_api_prefix(),
            fallback_document: default_fallback(),
            notification: NotificationDefaults::default(),
        }
    }

    /// Replace the cache version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.cache_version = version.into();
        self
    }

    /// Replace the precache manifest.
    pub fn with_static_assets<I, S>(mut self, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_assets = assets.into_iter().map(Into::into).collect();
        self
    }

    /// Parse a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ServiceWorkerError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ServiceWorkerError::Config(format!("invalid worker config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self, ServiceWorkerError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            ServiceWorkerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Check the configuration for values the worker cannot operate with.
    pub fn validate(&self) -> Result<(), ServiceWorkerError> {
        if !matches!(self.scope.scheme(), "http" | "https") {
            return Err(ServiceWorkerError::Config(format!(
                "scope must be http(s), got {}",
                self.scope
            )));
        }
        if self.cache_prefix.is_empty() || self.cache_version.is_empty() {
            return Err(ServiceWorkerError::Config(
                "cache prefix and version must not be empty".to_string(),
            ));
        }
        let paths = self
            .static_assets
            .iter()
            .chain([&self.api_prefix, &self.fallback_document]);
        for path in paths {
            if !path.starts_with('/') {
                return Err(ServiceWorkerError::Config(format!(
                    "path must be root-relative: {path:?}"
                )));
            }
        }
        Ok(())
    }

    /// Name of the namespace precached at install.
    pub fn static_cache_name(&self) -> String {
        format!("{}-static-{}", self.cache_prefix, self.cache_version)
    }

    /// Name of the namespace filled at runtime.
    pub fn dynamic_cache_name(&self) -> String {
        format!("{}-dynamic-{}", self.cache_prefix, self.cache_version)
    }

    /// Combined name used by earlier releases, still treated as current.
    pub fn legacy_cache_name(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.cache_version)
    }

    /// Whether a namespace belongs to this application, whatever its version.
    pub fn owns_cache(&self, name: &str) -> bool {
        name.strip_prefix(self.cache_prefix.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// Whether a namespace is one of the current version's.
    pub fn is_current_cache(&self, name: &str) -> bool {
        name == self.static_cache_name()
            || name == self.dynamic_cache_name()
            || name == self.legacy_cache_name()
    }

    /// Resolve a root-relative path against the scope.
    pub fn resolve(&self, path: &str) -> Result<Url, ServiceWorkerError> {
        self.scope
            .join(path)
            .map_err(|e| ServiceWorkerError::InvalidUrl(format!("{path}: {e}")))
    }

    /// Whether `url` shares the worker's origin.
    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.scope.origin()
    }

    /// Whether `url` is application data that must never be cached.
    pub fn is_api_path(&self, url: &Url) -> bool {
        url.path().starts_with(self.api_prefix.as_str())
    }
}
