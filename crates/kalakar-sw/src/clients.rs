//! Clients API: the pages a worker can see and control.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use url::Url;

use crate::lifecycle::ServiceWorkerId;
use crate::ServiceWorkerError;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
}

/// A client (open page or worker).
#[derive(Debug, Clone, PartialEq)]
pub struct Client {
    pub id: String,
    pub url: Url,
    pub client_type: ClientType,
    pub focused: bool,
    /// Worker currently serving this client's fetches.
    pub controller: Option<ServiceWorkerId>,
}

impl Client {
    /// A new, unfocused, uncontrolled window client.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controller: None,
        }
    }

    pub fn is_window(&self) -> bool {
        self.client_type == ClientType::Window
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Shared handle to the clients of an origin, in the order they were opened.
#[derive(Debug, Clone, Default)]
pub struct Clients {
    clients: Arc<RwLock<Vec<Client>>>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, client: Client) {
        self.clients.write().await.push(client);
    }

    pub async fn remove(&self, id: &str) -> Option<Client> {
        let mut clients = self.clients.write().await;
        let index = clients.iter().position(|c| c.id == id)?;
        Some(clients.remove(index))
    }

    pub async fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().await.iter().find(|c| c.id == id).cloned()
    }

    /// All clients, optionally restricted to one type.
    pub async fn match_all(&self, client_type: Option<ClientType>) -> Vec<Client> {
        self.clients
            .read()
            .await
            .iter()
            .filter(|c| client_type.map_or(true, |t| c.client_type == t))
            .cloned()
            .collect()
    }

    /// First window client on the same origin as `origin`.
    pub async fn find_window(&self, origin: &Url) -> Option<Client> {
        self.clients
            .read()
            .await
            .iter()
            .find(|c| c.is_window() && c.url.origin() == origin.origin())
            .cloned()
    }

    /// Open a new focused window client at `url`.
    pub async fn open_window(&self, url: Url) -> Client {
        let client = Client {
            focused: true,
            ..Client::window(url)
        };
        self.add(client.clone()).await;
        client
    }

    /// Navigate a window client to `url`.
    pub async fn navigate(&self, id: &str, url: Url) -> Result<Client, ServiceWorkerError> {
        self.update_window(id, |client| client.url = url).await
    }

    /// Focus a window client; every other client loses focus.
    pub async fn focus(&self, id: &str) -> Result<Client, ServiceWorkerError> {
        let client = self.update_window(id, |client| client.focused = true).await?;
        for other in self.clients.write().await.iter_mut() {
            if other.id != id {
                other.focused = false;
            }
        }
        Ok(client)
    }

    async fn update_window(
        &self,
        id: &str,
        update: impl FnOnce(&mut Client),
    ) -> Result<Client, ServiceWorkerError> {
        let mut clients = self.clients.write().await;
        let client = clients
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {id}")))?;
        if !client.is_window() {
            return Err(ServiceWorkerError::StateError(
                "Only window clients can be navigated or focused".to_string(),
            ));
        }
        update(client);
        Ok(client.clone())
    }

    /// Make `worker` the controller of every client on `origin`.
    ///
    /// Returns the ids of clients whose controller changed.
    pub async fn claim(&self, worker: ServiceWorkerId, origin: &Url) -> Vec<String> {
        let mut claimed = Vec::new();
        for client in self.clients.write().await.iter_mut() {
            if client.url.origin() == origin.origin() && client.controller != Some(worker) {
                client.controller = Some(worker);
                claimed.push(client.id.clone());
            }
        }
        claimed
    }

    /// Number of clients controlled by a worker other than `worker`.
    pub async fn controlled_by_others(&self, worker: ServiceWorkerId) -> usize {
        self.clients
            .read()
            .await
            .iter()
            .filter(|c| c.controller.is_some_and(|id| id != worker))
            .count()
    }
}
