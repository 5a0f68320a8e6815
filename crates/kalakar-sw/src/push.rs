//! Push messages and system notifications.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::cache::now_millis;
use crate::clients::Clients;
use crate::config::WorkerConfig;
use crate::ServiceWorkerError;

/// Action id that only dismisses the notification.
pub const ACTION_CLOSE: &str = "close";
/// Action id that opens the notification's target.
pub const ACTION_EXPLORE: &str = "explore";

/// A push event.
#[derive(Debug, Clone, Default)]
pub struct PushEvent {
    pub data: Option<Bytes>,
}

impl PushEvent {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: Some(data.into()),
        }
    }

    /// A push without payload.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Debug, Default, Deserialize)]
struct PushPayload {
    title: Option<String>,
    body: Option<String>,
    url: Option<String>,
}

/// Unique identifier for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationId(u64);

impl NotificationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// A notification shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    /// Where a click takes the user.
    pub url: String,
    /// Arrival time (ms since epoch).
    pub arrived_at: u64,
    pub actions: Vec<NotificationAction>,
}

/// Notifications currently on screen.
#[derive(Debug, Clone, Default)]
pub struct Notifications {
    open: Arc<RwLock<Vec<Notification>>>,
    shown: Arc<AtomicU64>,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn show(&self, notification: Notification) {
        self.shown.fetch_add(1, Ordering::Relaxed);
        self.open.write().await.push(notification);
    }

    pub async fn close(&self, id: NotificationId) -> bool {
        let mut open = self.open.write().await;
        let before = open.len();
        open.retain(|n| n.id != id);
        open.len() != before
    }

    pub async fn open(&self) -> Vec<Notification> {
        self.open.read().await.clone()
    }

    /// Total notifications ever shown.
    pub fn shown_count(&self) -> u64 {
        self.shown.load(Ordering::Relaxed)
    }
}

/// Show a notification for `event`. Pushes without a JSON object payload
/// are dropped.
pub async fn handle_push(
    config: &WorkerConfig,
    notifications: &Notifications,
    event: PushEvent,
) -> Option<Notification> {
    let Some(data) = event.data else {
        debug!("Push without payload, ignoring");
        return None;
    };
    let payload: PushPayload = match serde_json::from_slice(&data) {
        Ok(payload) => payload,
        Err(e) => {
            debug!(error = %e, "Malformed push payload, ignoring");
            return None;
        }
    };

    let defaults = &config.notification;
    let notification = Notification {
        id: NotificationId::new(),
        title: payload.title.unwrap_or_else(|| defaults.title.clone()),
        body: payload.body.unwrap_or_else(|| defaults.body.clone()),
        icon: defaults.icon.clone(),
        badge: defaults.badge.clone(),
        vibrate: defaults.vibrate.clone(),
        url: payload.url.unwrap_or_else(|| defaults.url.clone()),
        arrived_at: now_millis(),
        actions: vec![
            NotificationAction {
                action: ACTION_EXPLORE.to_string(),
                title: "View Now".to_string(),
            },
            NotificationAction {
                action: ACTION_CLOSE.to_string(),
                title: "Close".to_string(),
            },
        ],
    };

    info!(title = %notification.title, url = %notification.url, "Showing notification");
    notifications.show(notification.clone()).await;
    Some(notification)
}

/// A click on a notification or one of its actions.
#[derive(Debug, Clone)]
pub struct NotificationClickEvent {
    pub notification: Notification,
    /// Action id, `None` for a click on the body.
    pub action: Option<String>,
}

/// What a notification click did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Dismissed,
    /// An open page was navigated and focused.
    Navigated { client_id: String, url: Url },
    /// A new page was opened.
    Opened { client_id: String, url: Url },
}

/// Close the notification, then route the user to its target.
pub async fn handle_notification_click(
    config: &WorkerConfig,
    notifications: &Notifications,
    clients: &Clients,
    event: NotificationClickEvent,
) -> Result<ClickOutcome, ServiceWorkerError> {
    notifications.close(event.notification.id).await;

    if event.action.as_deref() == Some(ACTION_CLOSE) {
        return Ok(ClickOutcome::Dismissed);
    }

    let url = config.resolve(&event.notification.url)?;

    if let Some(client) = clients.find_window(&config.scope).await {
        clients.navigate(&client.id, url.clone()).await?;
        clients.focus(&client.id).await?;
        debug!(client = %client.id, %url, "Focused existing client");
        return Ok(ClickOutcome::Navigated {
            client_id: client.id,
            url,
        });
    }

    let client = clients.open_window(url.clone()).await;
    debug!(client = %client.id, %url, "Opened new client");
    Ok(ClickOutcome::Opened {
        client_id: client.id,
        url,
    })
}
