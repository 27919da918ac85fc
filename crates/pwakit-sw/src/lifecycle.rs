//! Worker states and the installing/waiting/active slots of a registration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::worker::ServiceWorker;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceWorkerState {
    /// Initial state, script being parsed.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

impl ServiceWorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceWorkerState::Parsed => "parsed",
            ServiceWorkerState::Installing => "installing",
            ServiceWorkerState::Installed => "installed",
            ServiceWorkerState::Activating => "activating",
            ServiceWorkerState::Activated => "activated",
            ServiceWorkerState::Redundant => "redundant",
        }
    }
}

/// A worker placed in one of the registration slots.
#[derive(Debug, Clone)]
pub struct WorkerSlot {
    pub worker: Arc<ServiceWorker>,
    pub state: ServiceWorkerState,
    pub state_changed_at: Instant,
    /// Skip-waiting was signalled before the worker finished installing.
    pub skip_waiting: bool,
}

impl WorkerSlot {
    pub fn new(worker: Arc<ServiceWorker>) -> Self {
        Self {
            worker,
            state: ServiceWorkerState::Parsed,
            state_changed_at: Instant::now(),
            skip_waiting: false,
        }
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.worker.id()
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        debug!(
            worker = %self.id(),
            from = self.state.as_str(),
            to = state.as_str(),
            "Worker state change"
        );
        self.state = state;
        self.state_changed_at = Instant::now();
    }
}

/// A service worker registration.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Script URL the workers were loaded from.
    pub script_url: Url,

    /// Installing worker.
    pub installing: Option<WorkerSlot>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<WorkerSlot>,

    /// Active worker.
    pub active: Option<WorkerSlot>,

    /// Last update check time.
    pub last_update_check: Option<Instant>,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url, script_url: Url) -> Self {
        Self {
            scope,
            script_url,
            installing: None,
            waiting: None,
            active: None,
            last_update_check: None,
        }
    }

    /// Most recent worker in any slot.
    pub fn newest(&self) -> Option<&WorkerSlot> {
        self.installing
            .as_ref()
            .or(self.waiting.as_ref())
            .or(self.active.as_ref())
    }

    /// Find a worker by ID in any slot.
    pub fn slot_mut(&mut self, id: ServiceWorkerId) -> Option<&mut WorkerSlot> {
        [&mut self.installing, &mut self.waiting, &mut self.active]
            .into_iter()
            .filter_map(|slot| slot.as_mut())
            .find(|slot| slot.id() == id)
    }

    /// Start installing a new worker. Any worker already installing is superseded.
    pub fn begin_install(&mut self, worker: Arc<ServiceWorker>) -> Option<WorkerSlot> {
        let mut slot = WorkerSlot::new(worker);
        slot.set_state(ServiceWorkerState::Installing);
        self.last_update_check = Some(Instant::now());

        let superseded = self.installing.replace(slot);
        superseded.map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        })
    }

    /// Transition installing to waiting. Returns a previously waiting worker it replaced.
    pub fn install_complete(&mut self) -> Option<WorkerSlot> {
        let mut worker = self.installing.take()?;
        worker.set_state(ServiceWorkerState::Installed);
        let replaced = self.waiting.replace(worker);
        replaced.map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        })
    }

    /// Drop the installing worker after a failed install.
    pub fn install_failed(&mut self) -> Option<WorkerSlot> {
        self.installing.take().map(|mut worker| {
            worker.set_state(ServiceWorkerState::Redundant);
            worker
        })
    }

    /// Move the waiting worker into the active slot in the Activating state.
    ///
    /// Returns the worker now activating and the one it replaced, if any.
    pub fn promote_waiting(&mut self) -> Option<(Arc<ServiceWorker>, Option<WorkerSlot>)> {
        let mut worker = self.waiting.take()?;
        worker.set_state(ServiceWorkerState::Activating);
        let activating = Arc::clone(&worker.worker);

        let replaced = self.active.replace(worker).map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        });
        Some((activating, replaced))
    }

    /// Finish activation of the worker in the active slot.
    pub fn activation_complete(&mut self) {
        if let Some(ref mut worker) = self.active {
            worker.set_state(ServiceWorkerState::Activated);
        }
    }

    /// Install a worker straight into the active slot, e.g. when restoring after a restart.
    pub fn restore_active(&mut self, worker: Arc<ServiceWorker>) {
        let mut slot = WorkerSlot::new(worker);
        slot.set_state(ServiceWorkerState::Activated);
        self.active = Some(slot);
    }
}
