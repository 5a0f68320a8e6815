//! Fetch interception: stale-while-revalidate for same-origin GETs.
//!
//! ```text
//! request ──► serving? ──no──► Passthrough
//!               │yes
//!               ▼
//!            bypass? ──yes──► Passthrough (network only, no cache access)
//!               │no
//!               ▼
//!          cache hit? ──yes──► cached response + detached revalidation
//!               │no
//!               ▼
//!            network ──200──► store in dynamic, respond
//!               │  └─other──► respond, uncached
//!               ▼ error
//!          navigate? ──yes──► offline shell (if cached)
//!               │no
//!               ▼
//!             Empty
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http::{Method, StatusCode};
use kalakar_net::{Fetcher, NetError, Request, Response};
use tracing::{debug, trace};

use crate::cache::{CacheEntry, CacheStorage, RequestKey};
use crate::config::WorkerConfig;
use crate::task::TaskSet;

/// A fetch event.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub request: Request,
    /// Client that issued the request.
    pub client_id: Option<String>,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            client_id: None,
        }
    }
}

/// Why a request skipped the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    /// The worker is not the activated version.
    NotServing,
    NotGet,
    Api,
    CrossOrigin,
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
    OfflineFallback,
}

/// Result of handling a fetch event.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The worker did not respond; the request goes to the network as is.
    Passthrough(BypassReason),
    /// The worker responded.
    Respond {
        response: Response,
        source: ResponseSource,
    },
    /// The network failed and there is nothing to fall back to.
    Empty,
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Respond { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn source(&self) -> Option<ResponseSource> {
        match self {
            FetchOutcome::Respond { source, .. } => Some(*source),
            _ => None,
        }
    }
}

/// The worker's fetch policy.
pub struct FetchInterceptor {
    config: Arc<WorkerConfig>,
    caches: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    tasks: TaskSet,
    serving: Arc<AtomicBool>,
}

impl FetchInterceptor {
    pub fn new(
        config: Arc<WorkerConfig>,
        caches: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
        tasks: TaskSet,
        serving: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            caches,
            fetcher,
            tasks,
            serving,
        }
    }

    /// Requests the worker must leave alone.
    pub fn bypass_reason(&self, request: &Request) -> Option<BypassReason> {
        if request.method != Method::GET {
            Some(BypassReason::NotGet)
        } else if !self.config.is_same_origin(&request.url) {
            Some(BypassReason::CrossOrigin)
        } else if self.config.is_api_path(&request.url) {
            Some(BypassReason::Api)
        } else {
            None
        }
    }

    pub async fn handle(&self, event: FetchEvent) -> FetchOutcome {
        let request = event.request;

        if !self.serving.load(Ordering::Acquire) {
            trace!(url = %request.url, "Worker not serving, passing through");
            return FetchOutcome::Passthrough(BypassReason::NotServing);
        }

        if let Some(reason) = self.bypass_reason(&request) {
            trace!(url = %request.url, ?reason, "Bypassing worker");
            return FetchOutcome::Passthrough(reason);
        }

        let key = RequestKey::for_request(&request);
        let static_name = self.config.static_cache_name();
        let dynamic_name = self.config.dynamic_cache_name();

        if let Some(entry) = self
            .caches
            .match_in(&[dynamic_name.as_str(), static_name.as_str()], &key)
            .await
        {
            debug!(url = %request.url, "Cache hit, revalidating in background");
            self.revalidate(request, key, dynamic_name);
            return FetchOutcome::Respond {
                response: entry.to_response(),
                source: ResponseSource::Cache,
            };
        }

        let is_navigation = request.is_navigation();
        match self.fetcher.fetch(request).await {
            Ok(response) if response.status == StatusCode::OK => {
                debug!(url = %response.url, "Cache miss, storing network response");
                self.caches
                    .put_if(
                        &self.serving,
                        &dynamic_name,
                        key,
                        CacheEntry::from_response(&response),
                    )
                    .await;
                FetchOutcome::Respond {
                    response,
                    source: ResponseSource::Network,
                }
            }
            Ok(response) => {
                debug!(url = %response.url, status = %response.status, "Not caching response");
                FetchOutcome::Respond {
                    response,
                    source: ResponseSource::Network,
                }
            }
            Err(e) => {
                debug!(url = %key.url(), error = %e, "Network failed on cache miss");
                if is_navigation {
                    if let Some(shell) = self.offline_shell().await {
                        return FetchOutcome::Respond {
                            response: shell,
                            source: ResponseSource::OfflineFallback,
                        };
                    }
                }
                FetchOutcome::Empty
            }
        }
    }

    /// Refresh the dynamic entry for `key` without blocking the caller.
    fn revalidate(&self, request: Request, key: RequestKey, cache_name: String) {
        let caches = self.caches.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let serving = Arc::clone(&self.serving);

        self.tasks.spawn_detached("revalidate", async move {
            let response = fetcher.fetch(request).await?;
            if response.status != StatusCode::OK {
                return Ok(());
            }
            let entry = CacheEntry::from_response(&response);
            if caches.put_if(&serving, &cache_name, key, entry).await {
                trace!(url = %response.url, "Revalidated cache entry");
            } else {
                debug!(url = %response.url, "Worker retired, dropping revalidated entry");
            }
            Ok::<(), NetError>(())
        });
    }

    async fn offline_shell(&self) -> Option<Response> {
        let url = self.config.resolve(&self.config.fallback_document).ok()?;
        let static_name = self.config.static_cache_name();
        let dynamic_name = self.config.dynamic_cache_name();
        self.caches
            .match_in(
                &[dynamic_name.as_str(), static_name.as_str()],
                &RequestKey::get(&url),
            )
            .await
            .map(|entry| entry.to_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kalakar_net::FetchFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    /// Always fails, counting attempts.
    #[derive(Default)]
    struct Offline {
        calls: AtomicUsize,
    }

    impl Fetcher for Offline {
        fn fetch(&self, request: Request) -> FetchFuture<'_> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Err(NetError::Offline(request.url.to_string())) })
        }
    }

    fn interceptor_with(
        fetcher: Arc<dyn Fetcher>,
        serving: bool,
    ) -> (FetchInterceptor, CacheStorage) {
        let config = Arc::new(WorkerConfig::new(
            Url::parse("https://chitrakalakar.com/").unwrap(),
        ));
        let caches = CacheStorage::new();
        let interceptor = FetchInterceptor::new(
            config,
            caches.clone(),
            fetcher,
            TaskSet::new(),
            Arc::new(AtomicBool::new(serving)),
        );
        (interceptor, caches)
    }

    fn interceptor(fetcher: Arc<dyn Fetcher>) -> (FetchInterceptor, CacheStorage) {
        interceptor_with(fetcher, true)
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_bypass_rules() {
        let (interceptor, _) = interceptor(Arc::new(Offline::default()));

        let post = Request::post(url("https://chitrakalakar.com/paintings"), Default::default());
        assert_eq!(interceptor.bypass_reason(&post), Some(BypassReason::NotGet));

        let api = Request::get(url("https://chitrakalakar.com/api/widgets"));
        assert_eq!(interceptor.bypass_reason(&api), Some(BypassReason::Api));

        let cdn = Request::get(url("https://cdn.example.com/logo.png"));
        assert_eq!(
            interceptor.bypass_reason(&cdn),
            Some(BypassReason::CrossOrigin)
        );

        let ext = Request::get(url("chrome-extension://abc/script.js"));
        assert_eq!(
            interceptor.bypass_reason(&ext),
            Some(BypassReason::CrossOrigin)
        );

        let page = Request::get(url("https://chitrakalakar.com/artists"));
        assert_eq!(interceptor.bypass_reason(&page), None);
    }

    #[tokio::test]
    async fn test_non_navigation_miss_offline_is_empty() {
        let offline = Arc::new(Offline::default());
        let (interceptor, caches) = interceptor(offline.clone());

        let event = FetchEvent::new(Request::get(url("https://chitrakalakar.com/app.js")));
        assert!(matches!(
            interceptor.handle(event).await,
            FetchOutcome::Empty
        ));
        assert_eq!(offline.calls.load(Ordering::SeqCst), 1);
        assert_eq!(caches.ops().writes, 0);
    }

    #[tokio::test]
    async fn test_not_serving_passes_everything_through() {
        let offline = Arc::new(Offline::default());
        let (interceptor, caches) = interceptor_with(offline.clone(), false);

        let event = FetchEvent::new(Request::navigate(url("https://chitrakalakar.com/")));
        assert!(matches!(
            interceptor.handle(event).await,
            FetchOutcome::Passthrough(BypassReason::NotServing)
        ));
        assert_eq!(offline.calls.load(Ordering::SeqCst), 0);
        assert_eq!(caches.ops(), Default::default());
    }

    #[tokio::test]
    async fn test_navigation_without_shell_is_empty() {
        let (interceptor, _) = interceptor(Arc::new(Offline::default()));
        let event = FetchEvent::new(Request::navigate(url("https://chitrakalakar.com/about")));
        assert!(matches!(
            interceptor.handle(event).await,
            FetchOutcome::Empty
        ));
    }
}
