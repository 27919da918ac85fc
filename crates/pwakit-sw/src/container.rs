//! Service worker container (`navigator.serviceWorker`).
//!
//! Owns the registration, the open clients and the store, and drives workers through
//! install → waiting → activate. State changes are reported over an unbounded channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use pwakit_common::{SiteConfig, WorkerPolicy};
use pwakit_net::{Fetcher, NetError, Request, Response};
use pwakit_store::CacheStorage;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::lifecycle::{ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState, WorkerSlot};
use crate::message::CacheInfo;
use crate::worker::{EventOutcome, ServiceWorker, WorkerEvent};
use crate::{Result, ServiceWorkerError};

/// Where the container loads the policy of the latest worker version from.
#[async_trait]
pub trait ScriptSource: Send + Sync {
    async fn load(&self, script_url: &Url) -> Result<WorkerPolicy>;
}

/// A fixed policy, never updated.
#[async_trait]
impl ScriptSource for WorkerPolicy {
    async fn load(&self, _script_url: &Url) -> Result<WorkerPolicy> {
        Ok(self.clone())
    }
}

/// A policy that can be replaced to deploy a new version.
#[async_trait]
impl ScriptSource for RwLock<WorkerPolicy> {
    async fn load(&self, _script_url: &Url) -> Result<WorkerPolicy> {
        Ok(self.read().await.clone())
    }
}

static NEXT_CLIENT: AtomicU64 = AtomicU64::new(1);

/// A page controlled (or not) by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub url: Url,
    pub controller: Option<ServiceWorkerId>,
}

/// Container events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEvent {
    /// A worker changed state.
    StateChange {
        worker_id: ServiceWorkerId,
        version: String,
        state: ServiceWorkerState,
    },
    /// A new worker started installing.
    UpdateFound {
        worker_id: ServiceWorkerId,
        version: String,
    },
    /// A client is now controlled by a different worker.
    ControllerChange {
        client_id: String,
        worker_id: ServiceWorkerId,
    },
}

/// Public view of a worker slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: ServiceWorkerId,
    pub version: String,
    pub namespace: String,
    pub state: ServiceWorkerState,
}

impl From<&WorkerSlot> for WorkerInfo {
    fn from(slot: &WorkerSlot) -> Self {
        Self {
            id: slot.id(),
            version: slot.worker.version().to_string(),
            namespace: slot.worker.namespace().to_string(),
            state: slot.state,
        }
    }
}

/// Public view of the registration.
#[derive(Debug, Clone)]
pub struct RegistrationSnapshot {
    pub scope: Url,
    pub script_url: Url,
    pub installing: Option<WorkerInfo>,
    pub waiting: Option<WorkerInfo>,
    pub active: Option<WorkerInfo>,
    pub last_update_check: Option<Instant>,
}

impl From<&ServiceWorkerRegistration> for RegistrationSnapshot {
    fn from(registration: &ServiceWorkerRegistration) -> Self {
        Self {
            scope: registration.scope.clone(),
            script_url: registration.script_url.clone(),
            installing: registration.installing.as_ref().map(WorkerInfo::from),
            waiting: registration.waiting.as_ref().map(WorkerInfo::from),
            active: registration.active.as_ref().map(WorkerInfo::from),
            last_update_check: registration.last_update_check,
        }
    }
}

/// Result of an update check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The newest worker already runs this version.
    UpToDate,
    /// A new version installed; `activated` tells whether it took over immediately.
    Installed {
        worker_id: ServiceWorkerId,
        version: String,
        activated: bool,
    },
}

/// Service worker container (navigator.serviceWorker).
pub struct ServiceWorkerContainer {
    site: SiteConfig,
    caches: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    source: Arc<dyn ScriptSource>,

    /// The single registration, once registered.
    registration: RwLock<Option<ServiceWorkerRegistration>>,

    /// Clients by ID.
    clients: RwLock<HashMap<String, Client>>,

    /// Serializes install and activation.
    lifecycle: Mutex<()>,

    /// Event sender for state changes.
    event_tx: mpsc::UnboundedSender<ContainerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a new container.
    pub fn new(
        site: SiteConfig,
        caches: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
        source: Arc<dyn ScriptSource>,
    ) -> (Self, mpsc::UnboundedReceiver<ContainerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                site,
                caches,
                fetcher,
                source,
                registration: RwLock::new(None),
                clients: RwLock::new(HashMap::new()),
                lifecycle: Mutex::new(()),
                event_tx,
            },
            event_rx,
        )
    }

    pub fn caches(&self) -> &CacheStorage {
        &self.caches
    }

    pub fn site(&self) -> &SiteConfig {
        &self.site
    }

    fn emit(&self, event: ContainerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_state(&self, slot: &WorkerSlot) {
        self.emit(ContainerEvent::StateChange {
            worker_id: slot.id(),
            version: slot.worker.version().to_string(),
            state: slot.state,
        });
    }

    fn resolve(&self, path: &str) -> Result<Url> {
        self.site
            .origin
            .join(path)
            .map_err(|e| ServiceWorkerError::RegistrationFailed(format!("{path}: {e}")))
    }

    async fn ensure_registration(&self, script_url: &str, scope: &str) -> Result<()> {
        let script_url = self.resolve(script_url)?;
        let scope = self.resolve(scope)?;

        let mut registration = self.registration.write().await;
        match registration.as_mut() {
            Some(existing) => existing.script_url = script_url,
            None => {
                info!(scope = %scope, script = %script_url, "Creating registration");
                *registration = Some(ServiceWorkerRegistration::new(scope, script_url));
            }
        }
        Ok(())
    }

    // ==================== Registration ====================

    /// Register a service worker and install its current version.
    pub async fn register(&self, script_url: &str, scope: &str) -> Result<RegistrationSnapshot> {
        let _guard = self.lifecycle.lock().await;
        self.ensure_registration(script_url, scope).await?;
        self.update_locked().await?;
        self.registration()
            .await
            .ok_or_else(|| ServiceWorkerError::StateError("registration vanished".to_string()))
    }

    /// Adopt a version whose namespace survived a restart, without reinstalling.
    ///
    /// Returns false when nothing could be restored.
    pub async fn restore(&self, script_url: &str, scope: &str) -> Result<bool> {
        let _guard = self.lifecycle.lock().await;
        self.ensure_registration(script_url, scope).await?;

        let script_url = {
            let registration = self.registration.read().await;
            match registration.as_ref() {
                Some(reg) if reg.active.is_none() => reg.script_url.clone(),
                _ => return Ok(false),
            }
        };

        let policy = self.source.load(&script_url).await?;
        if !self.caches.has(&policy.namespace()).await? {
            debug!(namespace = %policy.namespace(), "Nothing to restore");
            return Ok(false);
        }

        let worker = Arc::new(self.build_worker(policy)?);
        let mut registration = self.registration.write().await;
        if let Some(reg) = registration.as_mut() {
            reg.restore_active(worker);
            if let Some(slot) = reg.active.as_ref() {
                info!(version = slot.worker.version(), "Restored active worker");
                self.emit_state(slot);
            }
        }
        Ok(true)
    }

    /// Check for a new version and install it.
    pub async fn update(&self) -> Result<UpdateOutcome> {
        let _guard = self.lifecycle.lock().await;
        self.update_locked().await
    }

    fn build_worker(&self, policy: WorkerPolicy) -> Result<ServiceWorker> {
        ServiceWorker::new(
            self.site.clone(),
            policy,
            self.caches.clone(),
            Arc::clone(&self.fetcher),
        )
    }

    async fn update_locked(&self) -> Result<UpdateOutcome> {
        let script_url = {
            let mut registration = self.registration.write().await;
            let reg = registration
                .as_mut()
                .ok_or_else(|| ServiceWorkerError::NotFound("registration".to_string()))?;
            reg.last_update_check = Some(Instant::now());
            reg.script_url.clone()
        };

        let policy = self.source.load(&script_url).await?;

        let worker = {
            let mut registration = self.registration.write().await;
            let reg = registration
                .as_mut()
                .ok_or_else(|| ServiceWorkerError::NotFound("registration".to_string()))?;

            if reg
                .newest()
                .map(|slot| slot.worker.version() == policy.version)
                .unwrap_or(false)
            {
                debug!(version = %policy.version, "Worker up to date");
                return Ok(UpdateOutcome::UpToDate);
            }

            let worker = Arc::new(self.build_worker(policy)?);
            if let Some(superseded) = reg.begin_install(Arc::clone(&worker)) {
                self.emit_state(&superseded);
            }
            self.emit(ContainerEvent::UpdateFound {
                worker_id: worker.id(),
                version: worker.version().to_string(),
            });
            if let Some(slot) = reg.installing.as_ref() {
                self.emit_state(slot);
            }
            worker
        };

        let installed = worker.dispatch(WorkerEvent::Install).await;

        let activate_now = {
            let mut registration = self.registration.write().await;
            let reg = registration
                .as_mut()
                .ok_or_else(|| ServiceWorkerError::NotFound("registration".to_string()))?;

            if let Err(e) = installed {
                warn!(
                    version = worker.version(),
                    error = %e,
                    "Install failed, keeping previous worker"
                );
                if let Some(failed) = reg.install_failed() {
                    self.emit_state(&failed);
                }
                return Err(e);
            }

            if let Some(replaced) = reg.install_complete() {
                self.emit_state(&replaced);
            }
            let waiting = reg.waiting.as_ref();
            if let Some(slot) = waiting {
                self.emit_state(slot);
            }
            let skip = waiting.map(|slot| slot.skip_waiting).unwrap_or(false);
            let no_active = reg.active.is_none();
            skip || no_active
        };

        let activated = if activate_now || !self.has_controlled_clients().await {
            self.activate_locked().await?;
            true
        } else {
            info!(version = worker.version(), "New worker waiting for clients to close");
            false
        };

        Ok(UpdateOutcome::Installed {
            worker_id: worker.id(),
            version: worker.version().to_string(),
            activated,
        })
    }

    // ==================== Activation ====================

    /// Activate the waiting worker now, regardless of open clients.
    pub async fn skip_waiting(&self) -> Result<bool> {
        let _guard = self.lifecycle.lock().await;
        let has_waiting = self
            .registration
            .read()
            .await
            .as_ref()
            .map(|reg| reg.waiting.is_some())
            .unwrap_or(false);

        if !has_waiting {
            return Ok(false);
        }
        self.activate_locked().await?;
        Ok(true)
    }

    async fn activate_locked(&self) -> Result<()> {
        let worker = {
            let mut registration = self.registration.write().await;
            let reg = registration
                .as_mut()
                .ok_or_else(|| ServiceWorkerError::NotFound("registration".to_string()))?;
            let (worker, replaced) = reg
                .promote_waiting()
                .ok_or_else(|| ServiceWorkerError::StateError("no waiting worker".to_string()))?;
            if let Some(old) = replaced {
                self.emit_state(&old);
            }
            if let Some(slot) = reg.active.as_ref() {
                self.emit_state(slot);
            }
            worker
        };

        if let Err(e) = worker.dispatch(WorkerEvent::Activate).await {
            warn!(version = worker.version(), error = %e, "Stale cache eviction failed");
        }

        {
            let mut registration = self.registration.write().await;
            if let Some(reg) = registration.as_mut() {
                reg.activation_complete();
                if let Some(slot) = reg.active.as_ref() {
                    self.emit_state(slot);
                }
            }
        }

        info!(version = worker.version(), namespace = worker.namespace(), "Worker activated");
        self.claim(worker.id()).await;
        Ok(())
    }

    /// Make every open client controlled by the given worker.
    async fn claim(&self, worker_id: ServiceWorkerId) {
        let mut clients = self.clients.write().await;
        for client in clients.values_mut() {
            if client.controller != Some(worker_id) {
                client.controller = Some(worker_id);
                self.emit(ContainerEvent::ControllerChange {
                    client_id: client.id.clone(),
                    worker_id,
                });
            }
        }
    }

    /// Unregister: every worker becomes redundant and clients lose their controller.
    pub async fn unregister(&self) -> Result<bool> {
        let _guard = self.lifecycle.lock().await;
        let Some(mut registration) = self.registration.write().await.take() else {
            return Ok(false);
        };

        for mut slot in [
            registration.installing.take(),
            registration.waiting.take(),
            registration.active.take(),
        ]
        .into_iter()
        .flatten()
        {
            slot.set_state(ServiceWorkerState::Redundant);
            self.emit_state(&slot);
        }

        for client in self.clients.write().await.values_mut() {
            client.controller = None;
        }
        Ok(true)
    }

    // ==================== Clients ====================

    /// Open a page. It is controlled by the active worker, if any.
    pub async fn open_client(&self, url: &str) -> Result<Client> {
        let url = self.resolve(url)?;
        let controller = self.active_worker().await.map(|w| w.id());

        let client = Client {
            id: format!("client-{}", NEXT_CLIENT.fetch_add(1, Ordering::Relaxed)),
            url,
            controller,
        };
        debug!(client = %client.id, url = %client.url, "Client opened");
        self.clients
            .write()
            .await
            .insert(client.id.clone(), client.clone());
        Ok(client)
    }

    /// Close a page. Closing the last controlled page lets a waiting worker activate.
    pub async fn close_client(&self, id: &str) -> Result<bool> {
        let removed = self.clients.write().await.remove(id).is_some();
        if !removed {
            return Ok(false);
        }

        let _guard = self.lifecycle.lock().await;
        let has_waiting = self
            .registration
            .read()
            .await
            .as_ref()
            .map(|reg| reg.waiting.is_some())
            .unwrap_or(false);

        if has_waiting && !self.has_controlled_clients().await {
            info!("Last controlled client closed, activating waiting worker");
            self.activate_locked().await?;
        }
        Ok(true)
    }

    pub async fn clients(&self) -> Vec<Client> {
        self.clients.read().await.values().cloned().collect()
    }

    /// Worker controlling a client.
    pub async fn controller(&self, client_id: &str) -> Option<ServiceWorkerId> {
        self.clients
            .read()
            .await
            .get(client_id)
            .and_then(|c| c.controller)
    }

    async fn has_controlled_clients(&self) -> bool {
        self.clients
            .read()
            .await
            .values()
            .any(|c| c.controller.is_some())
    }

    // ==================== Workers ====================

    pub async fn registration(&self) -> Option<RegistrationSnapshot> {
        self.registration
            .read()
            .await
            .as_ref()
            .map(RegistrationSnapshot::from)
    }

    /// The worker in the active slot, once activation has started.
    pub async fn active_worker(&self) -> Option<Arc<ServiceWorker>> {
        self.registration
            .read()
            .await
            .as_ref()
            .and_then(|reg| reg.active.as_ref())
            .map(|slot| Arc::clone(&slot.worker))
    }

    pub async fn waiting_worker(&self) -> Option<Arc<ServiceWorker>> {
        self.registration
            .read()
            .await
            .as_ref()
            .and_then(|reg| reg.waiting.as_ref())
            .map(|slot| Arc::clone(&slot.worker))
    }

    /// Deliver an event to the active worker.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome> {
        let worker = self
            .active_worker()
            .await
            .ok_or_else(|| ServiceWorkerError::NotFound("active worker".to_string()))?;
        worker.dispatch(event).await
    }

    /// Fetch on behalf of a client. Uncontrolled clients go straight to the network.
    pub async fn fetch(&self, client_id: Option<&str>, request: Request) -> Result<Response> {
        let controlled = match client_id {
            Some(id) => self.controller(id).await.is_some(),
            None => true,
        };

        let worker = self.active_worker().await;
        if let Some(worker) = worker.as_ref().filter(|_| controlled) {
            return worker.handle_fetch(request).await;
        }

        let timeout = worker
            .as_ref()
            .map(|w| w.policy().fetch_timeout())
            .unwrap_or_else(|| WorkerPolicy::default().fetch_timeout());
        debug!(url = %request.url, "No controlling worker, fetching from network");
        match tokio::time::timeout(timeout, self.fetcher.fetch(&request)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(NetError::Timeout(timeout).into()),
        }
    }

    /// Post a message to a worker. `GET_CACHE_INFO` answers on `reply`.
    pub async fn post_message(
        &self,
        target: ServiceWorkerId,
        data: &Value,
        reply: Option<oneshot::Sender<CacheInfo>>,
    ) -> Result<()> {
        let (worker, state) = {
            let mut registration = self.registration.write().await;
            let slot = registration
                .as_mut()
                .and_then(|reg| reg.slot_mut(target))
                .ok_or_else(|| ServiceWorkerError::NotFound(target.to_string()))?;
            (Arc::clone(&slot.worker), slot.state)
        };

        match worker.handle_message(data).await {
            EventOutcome::SkipWaiting => match state {
                ServiceWorkerState::Installed => {
                    self.skip_waiting().await?;
                }
                ServiceWorkerState::Parsed | ServiceWorkerState::Installing => {
                    let mut registration = self.registration.write().await;
                    if let Some(slot) = registration.as_mut().and_then(|reg| reg.slot_mut(target)) {
                        slot.skip_waiting = true;
                    }
                }
                _ => debug!(worker = %target, "Skip waiting ignored, worker not waiting"),
            },
            EventOutcome::CacheInfo(info) => {
                if let Some(reply) = reply {
                    let _ = reply.send(info);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl std::fmt::Debug for ServiceWorkerContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorkerContainer")
            .field("origin", &self.site.origin.as_str())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pwakit_net::MockFetcher;
    use serde_json::json;

    fn site() -> SiteConfig {
        SiteConfig {
            origin: Url::parse("https://example.com/").unwrap(),
            ..SiteConfig::default()
        }
    }

    fn policy(version: &str) -> WorkerPolicy {
        let mut policy = WorkerPolicy::default();
        policy.version = version.to_string();
        policy.static_assets = Some(vec!["/".to_string(), "/style.css".to_string()]);
        policy
    }

    struct Harness {
        container: ServiceWorkerContainer,
        events: mpsc::UnboundedReceiver<ContainerEvent>,
        fetcher: Arc<MockFetcher>,
        source: Arc<RwLock<WorkerPolicy>>,
    }

    fn harness() -> Harness {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.route("https://example.com/", 200, "home");
        fetcher.route("https://example.com/style.css", 200, "body{}");
        let source = Arc::new(RwLock::new(policy("1")));
        let (container, events) = ServiceWorkerContainer::new(
            site(),
            CacheStorage::memory(),
            fetcher.clone(),
            source.clone(),
        );
        Harness {
            container,
            events,
            fetcher,
            source,
        }
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<ContainerEvent>) -> Vec<ContainerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_first_register_activates_immediately() {
        let mut h = harness();
        let snapshot = h.container.register("/service-worker.js", "/").await.unwrap();

        let active = snapshot.active.unwrap();
        assert_eq!(active.state, ServiceWorkerState::Activated);
        assert_eq!(active.namespace, "app-v1");
        assert!(snapshot.waiting.is_none());

        let states: Vec<ServiceWorkerState> = drain(&mut h.events)
            .into_iter()
            .filter_map(|e| match e {
                ContainerEvent::StateChange { state, .. } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                ServiceWorkerState::Installing,
                ServiceWorkerState::Installed,
                ServiceWorkerState::Activating,
                ServiceWorkerState::Activated,
            ]
        );
    }

    #[tokio::test]
    async fn test_update_waits_for_controlled_clients() {
        let h = harness();
        h.container.register("/service-worker.js", "/").await.unwrap();
        let page = h.container.open_client("/").await.unwrap();
        assert!(page.controller.is_some());

        *h.source.write().await = policy("2");
        let outcome = h.container.update().await.unwrap();
        assert!(matches!(outcome, UpdateOutcome::Installed { activated: false, .. }));

        let snapshot = h.container.registration().await.unwrap();
        assert_eq!(snapshot.waiting.unwrap().version, "2");
        assert_eq!(snapshot.active.unwrap().version, "1");

        // Both namespaces exist until activation.
        assert_eq!(h.container.caches().keys().await.unwrap(), vec!["app-v1", "app-v2"]);

        // Closing the last page lets it activate.
        assert!(h.container.close_client(&page.id).await.unwrap());
        let snapshot = h.container.registration().await.unwrap();
        assert_eq!(snapshot.active.unwrap().version, "2");
        assert_eq!(h.container.caches().keys().await.unwrap(), vec!["app-v2"]);
    }

    #[tokio::test]
    async fn test_same_version_is_up_to_date() {
        let h = harness();
        h.container.register("/service-worker.js", "/").await.unwrap();
        assert_eq!(h.container.update().await.unwrap(), UpdateOutcome::UpToDate);
    }

    #[tokio::test]
    async fn test_skip_waiting_message_activates_and_claims() {
        let mut h = harness();
        h.container.register("/service-worker.js", "/").await.unwrap();
        let page = h.container.open_client("/").await.unwrap();

        *h.source.write().await = policy("2");
        h.container.update().await.unwrap();
        let waiting = h.container.registration().await.unwrap().waiting.unwrap();
        drain(&mut h.events);

        h.container
            .post_message(waiting.id, &json!({"type": "SKIP_WAITING"}), None)
            .await
            .unwrap();

        let snapshot = h.container.registration().await.unwrap();
        assert_eq!(snapshot.active.unwrap().id, waiting.id);
        assert_eq!(h.container.controller(&page.id).await, Some(waiting.id));

        let events = drain(&mut h.events);
        assert!(events.contains(&ContainerEvent::ControllerChange {
            client_id: page.id.clone(),
            worker_id: waiting.id,
        }));
    }

    #[tokio::test]
    async fn test_failed_update_keeps_previous_worker() {
        let h = harness();
        h.container.register("/service-worker.js", "/").await.unwrap();
        h.container.open_client("/").await.unwrap();

        let mut broken = policy("2");
        broken.static_assets = Some(vec!["/".to_string(), "/a.css".to_string()]);
        *h.source.write().await = broken;

        let err = h.container.update().await.unwrap_err();
        assert!(matches!(err, ServiceWorkerError::InstallFailed { .. }));

        let snapshot = h.container.registration().await.unwrap();
        assert_eq!(snapshot.active.unwrap().version, "1");
        assert!(snapshot.installing.is_none());
        assert!(snapshot.waiting.is_none());
        assert!(!h.container.caches().has("app-v2").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_cache_info_reply() {
        let h = harness();
        let snapshot = h.container.register("/service-worker.js", "/").await.unwrap();
        let active = snapshot.active.unwrap();

        let (tx, rx) = oneshot::channel();
        h.container
            .post_message(active.id, &json!({"type": "GET_CACHE_INFO"}), Some(tx))
            .await
            .unwrap();

        let info = rx.await.unwrap();
        assert_eq!(info.version, "app-v1");
        assert_eq!(info.caches, vec!["app-v1".to_string()]);
    }

    #[tokio::test]
    async fn test_uncontrolled_fetch_goes_to_network() {
        let h = harness();
        let page = h.container.open_client("/").await.unwrap();
        assert!(page.controller.is_none());

        let response = h
            .container
            .fetch(
                Some(&page.id),
                Request::get(Url::parse("https://example.com/style.css").unwrap()),
            )
            .await
            .unwrap();
        assert_eq!(response.body.as_ref(), b"body{}");
        assert_eq!(h.container.caches().stats().reads, 0);
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_client_fetch_times_out() {
        let h = harness();
        h.container.register("/service-worker.js", "/").await.unwrap();
        let page = h.container.open_client("/").await.unwrap();
        assert!(h.container.close_client(&page.id).await.unwrap());
        assert!(h.container.controller(&page.id).await.is_none());

        let timeout = policy("1").fetch_timeout();
        h.fetcher.set_latency(timeout * 2);
        let err = h
            .container
            .fetch(
                Some(&page.id),
                Request::get(Url::parse("https://example.com/style.css").unwrap()),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceWorkerError::Network(NetError::Timeout(d)) if d == timeout
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_without_worker_times_out() {
        let h = harness();
        h.fetcher.set_latency(WorkerPolicy::default().fetch_timeout() * 2);

        let err = h
            .container
            .fetch(None, Request::get(Url::parse("https://example.com/").unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceWorkerError::Network(NetError::Timeout(_))));
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_restore_after_restart() {
        let caches = CacheStorage::memory();
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.route("https://example.com/", 200, "home");
        fetcher.route("https://example.com/style.css", 200, "body{}");
        let source = Arc::new(policy("1"));

        {
            let (container, _rx) = ServiceWorkerContainer::new(
                site(),
                caches.clone(),
                fetcher.clone(),
                source.clone(),
            );
            container.register("/service-worker.js", "/").await.unwrap();
        }

        let (container, _rx) = ServiceWorkerContainer::new(site(), caches, fetcher.clone(), source);
        assert!(container.restore("/service-worker.js", "/").await.unwrap());
        let calls = fetcher.calls();

        fetcher.set_offline(true);
        let response = container
            .fetch(None, Request::get(Url::parse("https://example.com/style.css").unwrap()))
            .await
            .unwrap();
        assert_eq!(response.body.as_ref(), b"body{}");
        assert_eq!(fetcher.calls(), calls);
    }

    #[tokio::test]
    async fn test_unregister() {
        let h = harness();
        h.container.register("/service-worker.js", "/").await.unwrap();
        let page = h.container.open_client("/").await.unwrap();

        assert!(h.container.unregister().await.unwrap());
        assert!(h.container.registration().await.is_none());
        assert_eq!(h.container.controller(&page.id).await, None);
        assert!(!h.container.unregister().await.unwrap());
    }
}
