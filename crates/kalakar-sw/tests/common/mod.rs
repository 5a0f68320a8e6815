//! Shared fixtures for worker integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, StatusCode};
use kalakar_net::{FetchFuture, Fetcher, NetError, Request, Response};
use kalakar_sw::{ServiceWorker, WorkerConfig, WorkerEvent, WorkerHost, STATIC_ASSETS};
use tokio::sync::Semaphore;
use url::Url;

pub const ORIGIN: &str = "https://chitrakalakar.com/";

pub fn scope() -> Url {
    Url::parse(ORIGIN).unwrap()
}

pub fn url(path: &str) -> Url {
    scope().join(path).unwrap()
}

#[derive(Clone)]
struct Route {
    status: StatusCode,
    content_type: &'static str,
    body: Bytes,
}

/// In-memory origin server.
///
/// Serves every static asset by default. Can be switched offline, and can
/// stall requests (all of them, or chosen paths) until released.
pub struct MockSite {
    routes: Mutex<HashMap<String, Route>>,
    offline: AtomicBool,
    stalled: AtomicBool,
    stalled_paths: Mutex<Vec<String>>,
    gate: Semaphore,
    calls: Mutex<Vec<(Method, String)>>,
}

impl MockSite {
    pub fn new() -> Arc<Self> {
        let site = Self {
            routes: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
            stalled_paths: Mutex::new(Vec::new()),
            gate: Semaphore::new(0),
            calls: Mutex::new(Vec::new()),
        };
        for path in STATIC_ASSETS {
            let content_type = if path.ends_with(".png") {
                "image/png"
            } else if path.ends_with(".json") {
                "application/json"
            } else {
                "text/html"
            };
            site.serve(path, content_type, format!("{path} v1"));
        }
        Arc::new(site)
    }

    pub fn serve(&self, path: &str, content_type: &'static str, body: impl Into<Bytes>) {
        self.serve_status(path, StatusCode::OK, content_type, body);
    }

    pub fn serve_status(
        &self,
        path: &str,
        status: StatusCode,
        content_type: &'static str,
        body: impl Into<Bytes>,
    ) {
        self.routes.lock().unwrap().insert(
            path.to_string(),
            Route {
                status,
                content_type,
                body: body.into(),
            },
        );
    }

    pub fn remove(&self, path: &str) {
        self.routes.lock().unwrap().remove(path);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Hold every request until [`MockSite::release`].
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    /// Hold requests for `path` until [`MockSite::release`].
    pub fn stall_path(&self, path: &str) {
        self.stalled_paths.lock().unwrap().push(path.to_string());
    }

    pub fn release(&self) {
        self.stalled.store(false, Ordering::SeqCst);
        self.stalled_paths.lock().unwrap().clear();
        self.gate.add_permits(64);
    }

    pub fn calls(&self) -> Vec<(Method, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Fetcher for MockSite {
    fn fetch(&self, request: Request) -> FetchFuture<'_> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push((request.method.clone(), request.url.to_string()));

            let path_stalled = self
                .stalled_paths
                .lock()
                .unwrap()
                .iter()
                .any(|p| p == request.url.path());
            if path_stalled || self.stalled.load(Ordering::SeqCst) {
                let _permit = self.gate.acquire().await;
            }
            if self.offline.load(Ordering::SeqCst) {
                return Err(NetError::Offline(request.url.to_string()));
            }

            let route = self.routes.lock().unwrap().get(request.url.path()).cloned();
            let response = match route {
                Some(route) => Response::new(request.url, route.status)
                    .with_header(CONTENT_TYPE, HeaderValue::from_static(route.content_type))
                    .with_body(route.body),
                None => Response::new(request.url, StatusCode::NOT_FOUND).with_body("not found"),
            };
            Ok(response)
        })
    }
}

/// A host with one installed and activated worker.
pub async fn installed(version: &str) -> (WorkerHost, ServiceWorker, Arc<MockSite>) {
    let site = MockSite::new();
    let (host, _events) = WorkerHost::new(scope());
    let worker = new_worker(&host, version, &site).await;
    worker.dispatch(WorkerEvent::Install).await.unwrap();
    (host, worker, site)
}

pub async fn new_worker(host: &WorkerHost, version: &str, site: &Arc<MockSite>) -> ServiceWorker {
    let fetcher: Arc<dyn Fetcher> = site.clone();
    ServiceWorker::new(host, WorkerConfig::new(scope()).with_version(version), fetcher)
        .await
        .unwrap()
}
