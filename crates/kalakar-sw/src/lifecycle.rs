//! Worker lifecycle states and the registration that tracks them.
//!
//! ```text
//! ServiceWorkerRegistration
//!     ├── installing (WorkerVersion)
//!     ├── waiting (WorkerVersion)
//!     └── active (WorkerVersion)
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use url::Url;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Created, not yet installing.
    #[default]
    Parsed,
    /// Install event running.
    Installing,
    /// Installed, waiting for activation.
    Installed,
    /// Activate event running.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced or install failed.
    Redundant,
}

/// One version of the worker as seen by the registration.
#[derive(Debug, Clone)]
pub struct WorkerVersion {
    pub id: ServiceWorkerId,
    pub cache_version: String,
    pub state: ServiceWorkerState,
    pub state_changed_at: Instant,
    /// Set while this version is the activated worker. Shared with the
    /// worker's cache writers.
    serving: Arc<AtomicBool>,
}

impl WorkerVersion {
    pub fn new(id: ServiceWorkerId, cache_version: impl Into<String>) -> Self {
        Self {
            id,
            cache_version: cache_version.into(),
            state: ServiceWorkerState::Parsed,
            state_changed_at: Instant::now(),
            serving: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use `flag` as the serving flag.
    pub fn with_serving_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.serving = flag;
        self
    }

    pub fn is_serving(&self) -> bool {
        self.serving.load(Ordering::Acquire)
    }

    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }
}

/// Registration state for a scope.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    pub scope: Url,
    pub installing: Option<WorkerVersion>,
    pub waiting: Option<WorkerVersion>,
    pub active: Option<WorkerVersion>,
    /// Workers that are gone, with their final state.
    retired: Vec<WorkerVersion>,
}

impl ServiceWorkerRegistration {
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            retired: Vec::new(),
        }
    }

    fn retire(&mut self, mut worker: WorkerVersion) {
        worker.set_state(ServiceWorkerState::Redundant);
        worker.serving.store(false, Ordering::Release);
        self.retired.push(worker);
    }

    /// Start installing `worker`, replacing any other installing worker.
    pub fn begin_install(&mut self, mut worker: WorkerVersion) {
        worker.set_state(ServiceWorkerState::Installing);
        if let Some(previous) = self.installing.replace(worker) {
            self.retire(previous);
        }
    }

    /// Move the installing worker `id` to waiting. Returns false if `id`
    /// is not the installing worker.
    pub fn install_complete(&mut self, id: ServiceWorkerId) -> bool {
        match self.installing.take() {
            Some(mut worker) if worker.id == id => {
                worker.set_state(ServiceWorkerState::Installed);
                if let Some(previous) = self.waiting.replace(worker) {
                    self.retire(previous);
                }
                true
            }
            other => {
                self.installing = other;
                false
            }
        }
    }

    /// Make the installing worker `id` redundant. The active worker keeps control.
    pub fn install_failed(&mut self, id: ServiceWorkerId) {
        match self.installing.take() {
            Some(worker) if worker.id == id => self.retire(worker),
            other => self.installing = other,
        }
    }

    /// Move the waiting worker `id` to activating. Returns false if `id`
    /// is not waiting.
    pub fn begin_activate(&mut self, id: ServiceWorkerId) -> bool {
        match self.waiting.take() {
            Some(mut worker) if worker.id == id => {
                worker.set_state(ServiceWorkerState::Activating);
                if let Some(previous) = self.active.replace(worker) {
                    self.retire(previous);
                }
                true
            }
            other => {
                self.waiting = other;
                false
            }
        }
    }

    /// Finish activating the active worker `id`.
    pub fn activate_complete(&mut self, id: ServiceWorkerId) {
        if let Some(worker) = self.active.as_mut().filter(|w| w.id == id) {
            worker.set_state(ServiceWorkerState::Activated);
            worker.serving.store(true, Ordering::Release);
        }
    }

    /// Current state of worker `id`, if the registration has seen it.
    pub fn state_of(&self, id: ServiceWorkerId) -> Option<ServiceWorkerState> {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .flatten()
            .chain(self.retired.iter())
            .find(|w| w.id == id)
            .map(|w| w.state)
    }

    pub fn active_id(&self) -> Option<ServiceWorkerId> {
        self.active.as_ref().map(|w| w.id)
    }
}
