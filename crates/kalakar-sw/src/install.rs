//! Install and activate steps.

use futures::future::try_join_all;
use http::StatusCode;
use kalakar_net::{Fetcher, Request};
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheStorage, RequestKey};
use crate::config::WorkerConfig;
use crate::ServiceWorkerError;

/// Precaches the offline shell.
pub struct Installer;

impl Installer {
    /// Fetch every manifest path and store them in the static namespace.
    ///
    /// All or nothing: if any fetch fails or returns a status other than
    /// 200, the namespace is not created and the first failure is returned.
    pub async fn run(
        caches: &CacheStorage,
        fetcher: &dyn Fetcher,
        config: &WorkerConfig,
    ) -> Result<usize, ServiceWorkerError> {
        let cache_name = config.static_cache_name();
        info!(cache = %cache_name, assets = config.static_assets.len(), "Caching static assets");

        let fetches = config.static_assets.iter().map(|path| async move {
            let url = config.resolve(path)?;
            let response = fetcher
                .fetch(Request::get(url.clone()))
                .await
                .map_err(|e| ServiceWorkerError::InstallFailed {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;

            if response.status != StatusCode::OK {
                return Err(ServiceWorkerError::InstallFailed {
                    path: path.clone(),
                    reason: format!("status {}", response.status),
                });
            }

            debug!(%url, bytes = response.body.len(), "Fetched static asset");
            let entry = CacheEntry::from_response(&response);
            Ok::<_, ServiceWorkerError>((RequestKey::get(&url), entry))
        });

        let entries = match try_join_all(fetches).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(cache = %cache_name, error = %e, "Precache failed");
                return Err(e);
            }
        };

        let count = entries.len();
        caches.put_all(&cache_name, entries).await;
        Ok(count)
    }
}

/// Removes namespaces left behind by earlier versions.
pub struct Activator;

impl Activator {
    /// Delete every namespace owned by this application that is not one of
    /// the current version's. Returns the deleted names.
    pub async fn run(caches: &CacheStorage, config: &WorkerConfig) -> Vec<String> {
        let mut deleted = Vec::new();
        for name in caches.keys().await {
            if config.owns_cache(&name) && !config.is_current_cache(&name) {
                info!(cache = %name, "Deleting old cache");
                caches.delete(&name).await;
                deleted.push(name);
            }
        }
        deleted
    }
}
