//! The worker runtime: lifecycle driving and event dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kalakar_net::{Fetcher, NetError, Request, Response};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::clients::Clients;
use crate::config::WorkerConfig;
use crate::fetch::{FetchEvent, FetchInterceptor, FetchOutcome};
use crate::install::{Activator, Installer};
use crate::lifecycle::{ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState, WorkerVersion};
use crate::message::{ControlMessage, MessageEvent, MessageOutcome};
use crate::push::{self, ClickOutcome, Notification, NotificationClickEvent, Notifications, PushEvent};
use crate::task::TaskSet;
use crate::ServiceWorkerError;

/// Lifecycle notifications published to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    ControllerChange {
        client_id: String,
        worker_id: ServiceWorkerId,
    },
}

/// Platform state shared by every worker version of one origin.
#[derive(Clone)]
pub struct WorkerHost {
    pub caches: CacheStorage,
    pub clients: Clients,
    pub notifications: Notifications,
    registration: Arc<RwLock<ServiceWorkerRegistration>>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl WorkerHost {
    pub fn new(scope: Url) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let host = Self {
            caches: CacheStorage::new(),
            clients: Clients::new(),
            notifications: Notifications::new(),
            registration: Arc::new(RwLock::new(ServiceWorkerRegistration::new(scope))),
            event_tx,
        };
        (host, event_rx)
    }

    pub async fn scope(&self) -> Url {
        self.registration.read().await.scope.clone()
    }

    pub async fn active_worker(&self) -> Option<ServiceWorkerId> {
        self.registration.read().await.active_id()
    }

    pub async fn state_of(&self, id: ServiceWorkerId) -> Option<ServiceWorkerState> {
        self.registration.read().await.state_of(id)
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        // The host may have dropped the receiver; events are advisory.
        let _ = self.event_tx.send(event);
    }

    fn emit_state(&self, worker_id: ServiceWorkerId, new_state: ServiceWorkerState) {
        debug!(worker = worker_id.raw(), state = ?new_state, "Worker state changed");
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id,
            new_state,
        });
    }
}

/// Events delivered to a worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(FetchEvent),
    Message(MessageEvent),
    Push(PushEvent),
    NotificationClick(NotificationClickEvent),
}

/// Event kind, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Message,
    Push,
    NotificationClick,
}

impl WorkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WorkerEvent::Install => EventKind::Install,
            WorkerEvent::Activate => EventKind::Activate,
            WorkerEvent::Fetch(_) => EventKind::Fetch,
            WorkerEvent::Message(_) => EventKind::Message,
            WorkerEvent::Push(_) => EventKind::Push,
            WorkerEvent::NotificationClick(_) => EventKind::NotificationClick,
        }
    }
}

/// Result of a successful install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallOutcome {
    pub precached: usize,
    /// Whether the worker went on to activate immediately.
    pub activated: bool,
}

/// Result of handling a [`WorkerEvent`].
#[derive(Debug, Clone)]
pub enum EventOutcome {
    Installed(InstallOutcome),
    Activated { deleted: Vec<String> },
    Fetch(FetchOutcome),
    Message(MessageOutcome),
    Push(Option<Notification>),
    NotificationClick(ClickOutcome),
}

/// One version of the offline worker.
///
/// Cloning yields another handle to the same worker.
#[derive(Clone)]
pub struct ServiceWorker {
    id: ServiceWorkerId,
    config: Arc<WorkerConfig>,
    host: WorkerHost,
    fetcher: Arc<dyn Fetcher>,
    interceptor: Arc<FetchInterceptor>,
    tasks: TaskSet,
    skip_waiting: Arc<AtomicBool>,
    /// Set by the registration while this version is activated.
    serving: Arc<AtomicBool>,
}

impl ServiceWorker {
    /// Create a worker version for `host`. The config scope must share the
    /// host's origin.
    pub async fn new(
        host: &WorkerHost,
        config: WorkerConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, ServiceWorkerError> {
        config.validate()?;
        let scope = host.scope().await;
        if config.scope.origin() != scope.origin() {
            return Err(ServiceWorkerError::SecurityError(format!(
                "worker scope {} is outside registration {}",
                config.scope, scope
            )));
        }

        let config = Arc::new(config);
        let tasks = TaskSet::new();
        let serving = Arc::new(AtomicBool::new(false));
        let interceptor = Arc::new(FetchInterceptor::new(
            Arc::clone(&config),
            host.caches.clone(),
            Arc::clone(&fetcher),
            tasks.clone(),
            Arc::clone(&serving),
        ));

        Ok(Self {
            id: ServiceWorkerId::new(),
            config,
            host: host.clone(),
            fetcher,
            interceptor,
            tasks,
            skip_waiting: Arc::new(AtomicBool::new(false)),
            serving,
        })
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Background work started by this worker.
    pub fn tasks(&self) -> &TaskSet {
        &self.tasks
    }

    pub async fn state(&self) -> ServiceWorkerState {
        self.host
            .state_of(self.id)
            .await
            .unwrap_or(ServiceWorkerState::Parsed)
    }

    /// Route an event to its handler.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome, ServiceWorkerError> {
        debug!(worker = self.id.raw(), kind = ?event.kind(), "Dispatching event");
        match event {
            WorkerEvent::Install => self.on_install().await.map(EventOutcome::Installed),
            WorkerEvent::Activate => self
                .activate_waiting()
                .await?
                .map(|deleted| EventOutcome::Activated { deleted })
                .ok_or_else(|| ServiceWorkerError::StateError("worker is not waiting".to_string())),
            WorkerEvent::Fetch(event) => Ok(EventOutcome::Fetch(self.interceptor.handle(event).await)),
            WorkerEvent::Message(event) => self.on_message(event).await.map(EventOutcome::Message),
            WorkerEvent::Push(event) => Ok(EventOutcome::Push(
                push::handle_push(&self.config, &self.host.notifications, event).await,
            )),
            WorkerEvent::NotificationClick(event) => push::handle_notification_click(
                &self.config,
                &self.host.notifications,
                &self.host.clients,
                event,
            )
            .await
            .map(EventOutcome::NotificationClick),
        }
    }

    /// Precache, then activate right away if nothing holds the worker back.
    async fn on_install(&self) -> Result<InstallOutcome, ServiceWorkerError> {
        info!(worker = self.id.raw(), version = %self.config.cache_version, "Installing");
        self.host
            .registration
            .write()
            .await
            .begin_install(
                WorkerVersion::new(self.id, self.config.cache_version.clone())
                    .with_serving_flag(Arc::clone(&self.serving)),
            );
        self.host.emit_state(self.id, ServiceWorkerState::Installing);

        let precached =
            match Installer::run(&self.host.caches, self.fetcher.as_ref(), &self.config).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(worker = self.id.raw(), error = %e, "Install failed, keeping previous worker");
                    self.host.registration.write().await.install_failed(self.id);
                    self.host.emit_state(self.id, ServiceWorkerState::Redundant);
                    return Err(e);
                }
            };

        if !self.host.registration.write().await.install_complete(self.id) {
            return Err(ServiceWorkerError::StateError(
                "install superseded by a newer worker".to_string(),
            ));
        }
        self.host.emit_state(self.id, ServiceWorkerState::Installed);

        let activated = self.try_activate().await?;
        Ok(InstallOutcome {
            precached,
            activated,
        })
    }

    /// Activate if waiting and either `SKIP_WAITING` was received or no
    /// client is controlled by another worker.
    pub async fn try_activate(&self) -> Result<bool, ServiceWorkerError> {
        if self.state().await != ServiceWorkerState::Installed {
            return Ok(false);
        }
        let skip = self.skip_waiting.load(Ordering::Acquire);
        if !skip && self.host.clients.controlled_by_others(self.id).await > 0 {
            debug!(worker = self.id.raw(), "Waiting for controlled clients to close");
            return Ok(false);
        }
        Ok(self.activate_waiting().await?.is_some())
    }

    /// Delete stale caches and claim clients. `None` if not waiting.
    async fn activate_waiting(&self) -> Result<Option<Vec<String>>, ServiceWorkerError> {
        if !self.host.registration.write().await.begin_activate(self.id) {
            return Ok(None);
        }
        info!(worker = self.id.raw(), version = %self.config.cache_version, "Activating");
        self.host.emit_state(self.id, ServiceWorkerState::Activating);

        let deleted = Activator::run(&self.host.caches, &self.config).await;

        self.host.registration.write().await.activate_complete(self.id);
        self.host.emit_state(self.id, ServiceWorkerState::Activated);

        for client_id in self.host.clients.claim(self.id, &self.config.scope).await {
            self.host.emit(ServiceWorkerEvent::ControllerChange {
                client_id,
                worker_id: self.id,
            });
        }

        Ok(Some(deleted))
    }

    async fn on_message(&self, event: MessageEvent) -> Result<MessageOutcome, ServiceWorkerError> {
        match ControlMessage::parse(&event.data) {
            Some(ControlMessage::SkipWaiting) => {
                self.skip_waiting.store(true, Ordering::Release);
                let activated = self.activate_waiting().await?.is_some();
                if !activated {
                    debug!(worker = self.id.raw(), "Skip waiting recorded until install finishes");
                }
                Ok(MessageOutcome::SkipWaiting { activated })
            }
            None => Ok(MessageOutcome::Ignored),
        }
    }

    /// What the page receives for `request`: the worker's response, or a
    /// plain network fetch when the worker passes the request through.
    ///
    /// `Ok(None)` is the empty result of a failed non-navigation request.
    pub async fn page_response(&self, request: Request) -> Result<Option<Response>, NetError> {
        let outcome = self.interceptor.handle(FetchEvent::new(request.clone())).await;
        match outcome {
            FetchOutcome::Passthrough(_) => self.fetcher.fetch(request).await.map(Some),
            FetchOutcome::Respond { response, .. } => Ok(Some(response)),
            FetchOutcome::Empty => Ok(None),
        }
    }
}
