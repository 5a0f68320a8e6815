//! Cache API: named namespaces of request/response pairs.
//!
//! ```text
//! CacheStorage (caches)
//!     └── Cache (namespace)
//!             └── RequestKey → CacheEntry
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, Method, StatusCode};
use kalakar_net::{Request, Response};
use tokio::sync::RwLock;
use url::Url;

/// Key of a cached request: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    method: Method,
    url: String,
}

impl RequestKey {
    pub fn new(method: Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method,
            url: url.into(),
        }
    }

    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn for_request(request: &Request) -> Self {
        Self::new(request.method.clone(), &request.url)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// A cached response snapshot.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Stored at (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response. The body is shared, not copied.
    pub fn from_response(response: &Response) -> Self {
        Self {
            url: response.url.clone(),
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild a response for the page.
    pub fn to_response(&self) -> Response {
        Response {
            url: self.url.clone(),
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A single cache namespace.
#[derive(Debug, Default)]
pub struct Cache {
    name: String,
    entries: HashMap<RequestKey, CacheEntry>,
}

impl Cache {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Match a request.
    pub fn match_request(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Insert or overwrite an entry.
    pub fn put(&mut self, key: RequestKey, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    pub fn delete(&mut self, key: &RequestKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<&RequestKey> {
        self.entries.keys().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read/write counters across all namespaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheOps {
    pub reads: u64,
    pub writes: u64,
}

#[derive(Debug, Default)]
struct OpCounters {
    reads: AtomicU64,
    writes: AtomicU64,
}

/// Cache storage (`caches` global) for one origin.
///
/// Cloning yields another handle to the same storage.
#[derive(Debug, Clone, Default)]
pub struct CacheStorage {
    caches: Arc<RwLock<HashMap<String, Cache>>>,
    ops: Arc<OpCounters>,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a namespace, creating it if missing.
    pub async fn open(&self, name: &str) {
        let mut caches = self.caches.write().await;
        caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name));
    }

    pub async fn has(&self, name: &str) -> bool {
        self.caches.read().await.contains_key(name)
    }

    /// Delete a namespace and everything in it.
    pub async fn delete(&self, name: &str) -> bool {
        self.caches.write().await.remove(name).is_some()
    }

    /// All namespace names, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of entries in a namespace (0 if it does not exist).
    pub async fn len(&self, name: &str) -> usize {
        self.caches.read().await.get(name).map_or(0, Cache::len)
    }

    /// Look `key` up in `names`, in order; first hit wins.
    pub async fn match_in(&self, names: &[&str], key: &RequestKey) -> Option<CacheEntry> {
        self.ops.reads.fetch_add(1, Ordering::Relaxed);
        let caches = self.caches.read().await;
        names
            .iter()
            .filter_map(|name| caches.get(*name))
            .find_map(|cache| cache.match_request(key))
            .cloned()
    }

    /// Store one entry, creating the namespace if needed.
    pub async fn put(&self, name: &str, key: RequestKey, entry: CacheEntry) {
        self.put_all(name, vec![(key, entry)]).await;
    }

    /// Store several entries under a single write lock.
    pub async fn put_all(&self, name: &str, entries: Vec<(RequestKey, CacheEntry)>) {
        self.ops.writes.fetch_add(1, Ordering::Relaxed);
        let mut caches = self.caches.write().await;
        let cache = caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name));
        for (key, entry) in entries {
            cache.put(key, entry);
        }
    }

    /// Store one entry only while `allowed` is set.
    ///
    /// The flag is read under the storage write lock, so a namespace deleted
    /// after the flag was cleared stays deleted. Returns whether the entry
    /// was stored.
    pub async fn put_if(
        &self,
        allowed: &AtomicBool,
        name: &str,
        key: RequestKey,
        entry: CacheEntry,
    ) -> bool {
        let mut caches = self.caches.write().await;
        if !allowed.load(Ordering::Acquire) {
            return false;
        }
        self.ops.writes.fetch_add(1, Ordering::Relaxed);
        caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
            .put(key, entry);
        true
    }

    /// Snapshot of the read/write counters.
    pub fn ops(&self) -> CacheOps {
        CacheOps {
            reads: self.ops.reads.load(Ordering::Relaxed),
            writes: self.ops.writes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(path: &str) -> Url {
        Url::parse("https://chitrakalakar.com/").unwrap().join(path).unwrap()
    }

    fn entry(path: &str, body: &'static str) -> CacheEntry {
        CacheEntry::from_response(&Response::new(url(path), StatusCode::OK).with_body(body))
    }

    #[test]
    fn test_request_key_ignores_fragment() {
        let a = RequestKey::get(&url("/paintings#top"));
        let b = RequestKey::get(&url("/paintings"));
        assert_eq!(a, b);
        assert_eq!(a.url(), "https://chitrakalakar.com/paintings");
    }

    #[test]
    fn test_request_key_distinguishes_method() {
        let get = RequestKey::get(&url("/a"));
        let head = RequestKey::new(Method::HEAD, &url("/a"));
        assert_ne!(get, head);
    }

    #[test]
    fn test_cache_put_and_delete() {
        let mut cache = Cache::new("v1");
        let key = RequestKey::get(&url("/style.css"));

        cache.put(key.clone(), entry("/style.css", "body{}"));
        assert!(cache.match_request(&key).is_some());
        assert_eq!(cache.len(), 1);

        assert!(cache.delete(&key));
        assert!(cache.match_request(&key).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_storage_open_is_idempotent() {
        let storage = CacheStorage::new();
        storage.open("a").await;
        storage
            .put("a", RequestKey::get(&url("/x")), entry("/x", "x"))
            .await;
        storage.open("a").await;

        assert!(storage.has("a").await);
        assert_eq!(storage.len("a").await, 1);
    }

    #[tokio::test]
    async fn test_storage_delete_and_keys() {
        let storage = CacheStorage::new();
        storage.open("b").await;
        storage.open("a").await;
        assert_eq!(storage.keys().await, vec!["a", "b"]);

        assert!(storage.delete("a").await);
        assert!(!storage.delete("a").await);
        assert_eq!(storage.keys().await, vec!["b"]);
    }

    #[tokio::test]
    async fn test_match_in_respects_order() {
        let storage = CacheStorage::new();
        let key = RequestKey::get(&url("/"));
        storage.put("static", key.clone(), entry("/", "old")).await;
        storage.put("dynamic", key.clone(), entry("/", "new")).await;

        let hit = storage.match_in(&["dynamic", "static"], &key).await.unwrap();
        assert_eq!(hit.body, "new");

        let hit = storage.match_in(&["missing", "static"], &key).await.unwrap();
        assert_eq!(hit.body, "old");

        assert!(storage
            .match_in(&["dynamic"], &RequestKey::get(&url("/other")))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_ops_are_counted() {
        let storage = CacheStorage::new();
        let key = RequestKey::get(&url("/"));
        storage.put("a", key.clone(), entry("/", "x")).await;
        storage.match_in(&["a"], &key).await;
        storage.match_in(&["a"], &key).await;

        assert_eq!(storage.ops(), CacheOps { reads: 2, writes: 1 });
    }

    #[tokio::test]
    async fn test_put_if_respects_flag() {
        let storage = CacheStorage::new();
        let allowed = AtomicBool::new(false);
        let key = RequestKey::get(&url("/"));

        assert!(!storage.put_if(&allowed, "a", key.clone(), entry("/", "x")).await);
        assert!(!storage.has("a").await);
        assert_eq!(storage.ops().writes, 0);

        allowed.store(true, Ordering::Release);
        assert!(storage.put_if(&allowed, "a", key, entry("/", "x")).await);
        assert_eq!(storage.len("a").await, 1);
    }

    #[test]
    fn test_entry_round_trips_to_response() {
        let original = Response::new(url("/logo.png"), StatusCode::OK).with_body("png-bytes");
        let restored = CacheEntry::from_response(&original).to_response();
        assert_eq!(restored.body, original.body);
        assert_eq!(restored.status, StatusCode::OK);
        assert_eq!(restored.url, original.url);
    }
}
