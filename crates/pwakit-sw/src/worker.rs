//! Worker runtime: the event handlers of one worker version.

use std::sync::Arc;

use http::Method;
use pwakit_common::{SiteConfig, WorkerPolicy};
use pwakit_net::{Fetcher, NetError, Request, Response};
use pwakit_store::{CacheEntry, CacheKey, CacheStorage};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::intercept::{Interceptor, PassthroughReason, Route};
use crate::lifecycle::ServiceWorkerId;
use crate::message::{CacheInfo, WorkerMessage};
use crate::notification::{ClientAction, Notification};
use crate::strategy::StrategyContext;
use crate::sync::Outbox;
use crate::{Result, ServiceWorkerError};

/// Events delivered to a worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    /// Posted message data.
    Message(Value),
    Sync { tag: String },
    Push { payload: Option<String> },
    NotificationClick { action: Option<String> },
}

/// What a handled event produced.
#[derive(Debug)]
pub enum EventOutcome {
    Installed { assets: usize },
    Activated { evicted: Vec<String> },
    Response(Response),
    /// The page asked this worker to skip waiting.
    SkipWaiting,
    CacheInfo(CacheInfo),
    Synced { delivered: usize, remaining: usize },
    Notification(Notification),
    Client(ClientAction),
    Ignored,
}

/// One version of the caching worker.
pub struct ServiceWorker {
    id: ServiceWorkerId,
    site: SiteConfig,
    policy: WorkerPolicy,
    namespace: String,
    assets: Vec<Url>,
    offline_document: Option<Url>,
    fallback_image: Option<Url>,
    interceptor: Interceptor,
    caches: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    outbox: Mutex<Outbox>,
}

fn resolve(origin: &Url, path: &str) -> Result<Url> {
    origin
        .join(path)
        .map_err(|e| ServiceWorkerError::InvalidPolicy(format!("{path}: {e}")))
}

impl ServiceWorker {
    /// Create a worker for a policy. Relative paths resolve against the site origin.
    pub fn new(
        site: SiteConfig,
        policy: WorkerPolicy,
        caches: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        let assets = policy
            .effective_assets()
            .iter()
            .map(|path| resolve(&site.origin, path))
            .collect::<Result<Vec<_>>>()?;
        let offline_document = policy
            .offline_document
            .as_deref()
            .map(|path| resolve(&site.origin, path))
            .transpose()?;
        let fallback_image = policy
            .fallback_image
            .as_deref()
            .map(|path| resolve(&site.origin, path))
            .transpose()?;

        Ok(Self {
            id: ServiceWorkerId::new(),
            namespace: policy.namespace(),
            interceptor: Interceptor::from_policy(&policy),
            site,
            policy,
            assets,
            offline_document,
            fallback_image,
            caches,
            fetcher,
            outbox: Mutex::new(Outbox::new()),
        })
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn version(&self) -> &str {
        &self.policy.version
    }

    /// Name of the namespace this worker caches into.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn policy(&self) -> &WorkerPolicy {
        &self.policy
    }

    pub fn site(&self) -> &SiteConfig {
        &self.site
    }

    /// Resolved static asset manifest.
    pub fn assets(&self) -> &[Url] {
        &self.assets
    }

    pub fn caches(&self) -> &CacheStorage {
        &self.caches
    }

    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }

    /// Dispatch an event to its handler.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome> {
        match event {
            WorkerEvent::Install => {
                let assets = self.install().await?;
                Ok(EventOutcome::Installed { assets })
            }
            WorkerEvent::Activate => {
                let evicted = self.activate().await?;
                Ok(EventOutcome::Activated { evicted })
            }
            WorkerEvent::Fetch(request) => {
                self.handle_fetch(request).await.map(EventOutcome::Response)
            }
            WorkerEvent::Message(data) => Ok(self.handle_message(&data).await),
            WorkerEvent::Sync { tag } => Ok(self.sync(&tag).await),
            WorkerEvent::Push { payload } => {
                Ok(EventOutcome::Notification(self.push(payload.as_deref())))
            }
            WorkerEvent::NotificationClick { action } => Ok(EventOutcome::Client(
                ClientAction::for_click(&self.site, action.as_deref()),
            )),
        }
    }

    // ==================== Install / Activate ====================

    /// Precache the manifest into the current namespace.
    ///
    /// Every asset is fetched before anything is written, so a failed install leaves
    /// no namespace behind.
    pub async fn install(&self) -> Result<usize> {
        info!(namespace = %self.namespace, assets = self.assets.len(), "Installing worker");

        let fetches = self.assets.iter().map(|url| self.fetch_asset(url));
        let entries = futures::future::try_join_all(fetches).await?;
        let count = entries.len();

        self.caches.put_all(&self.namespace, entries).await?;
        info!(namespace = %self.namespace, count, "Precache complete");
        Ok(count)
    }

    async fn fetch_asset(&self, url: &Url) -> Result<CacheEntry> {
        let request = Request::get(url.clone());
        let failed = |reason: String| ServiceWorkerError::InstallFailed {
            url: url.to_string(),
            reason,
        };

        let response = self.fetch(&request).await.map_err(|e| failed(e.to_string()))?;
        if !response.ok() {
            return Err(failed(format!("status {}", response.status)));
        }
        Ok(CacheEntry::from_response(CacheKey::for_request(&request), &response))
    }

    /// Delete every namespace other than the current one. Returns the names removed.
    pub async fn activate(&self) -> Result<Vec<String>> {
        let mut evicted = Vec::new();
        for name in self.caches.keys().await? {
            if name == self.namespace {
                continue;
            }
            match self.caches.delete(&name).await {
                Ok(_) => {
                    info!(namespace = %name, "Evicted stale cache");
                    evicted.push(name);
                }
                Err(e) => warn!(namespace = %name, error = %e, "Failed to evict stale cache"),
            }
        }
        Ok(evicted)
    }

    // ==================== Fetch ====================

    async fn fetch(&self, request: &Request) -> std::result::Result<Response, NetError> {
        let timeout = self.policy.fetch_timeout();
        match tokio::time::timeout(timeout, self.fetcher.fetch(request)).await {
            Ok(result) => result,
            Err(_) => Err(NetError::Timeout(timeout)),
        }
    }

    /// Answer an intercepted request.
    pub async fn handle_fetch(&self, request: Request) -> Result<Response> {
        match self.interceptor.route(&request) {
            Route::Passthrough(reason) => self.passthrough(request, reason).await,
            Route::Strategy(rule) => {
                debug!(
                    url = %request.url,
                    rule = rule.name,
                    strategy = rule.strategy.as_str(),
                    "Routing request"
                );
                let handle = self.caches.handle(&self.namespace);
                let ctx = StrategyContext {
                    caches: &self.caches,
                    handle: &handle,
                    fetcher: self.fetcher.as_ref(),
                    offline_document: self.offline_document.as_ref(),
                    fallback_image: self.fallback_image.as_ref(),
                    timeout: self.policy.fetch_timeout(),
                };
                rule.strategy.execute(&ctx, &request).await
            }
        }
    }

    async fn passthrough(&self, request: Request, reason: PassthroughReason) -> Result<Response> {
        debug!(url = %request.url, reason = ?reason, "Passthrough");
        match self.fetch(&request).await {
            Ok(response) => Ok(response),
            Err(NetError::Unreachable(_) | NetError::Timeout(_))
                if defers_on_failure(&reason) =>
            {
                let url = request.url.to_string();
                self.defer(request).await;
                Err(ServiceWorkerError::Deferred {
                    url,
                    tag: self.policy.sync_tag.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Queue a request for the next background sync of the policy's tag.
    pub async fn defer(&self, request: Request) {
        info!(
            url = %request.url,
            tag = %self.policy.sync_tag,
            "Deferring request to background sync"
        );
        self.outbox.lock().await.push(&self.policy.sync_tag, request);
    }

    /// Requests waiting for background sync.
    pub async fn pending_sync(&self) -> usize {
        self.outbox.lock().await.len(&self.policy.sync_tag)
    }

    // ==================== Messages ====================

    pub async fn handle_message(&self, data: &Value) -> EventOutcome {
        match WorkerMessage::parse(data) {
            Some(WorkerMessage::SkipWaiting) => EventOutcome::SkipWaiting,
            Some(WorkerMessage::GetCacheInfo) => EventOutcome::CacheInfo(self.cache_info().await),
            None => EventOutcome::Ignored,
        }
    }

    pub async fn cache_info(&self) -> CacheInfo {
        let caches = self.caches.keys().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to list caches");
            Vec::new()
        });
        CacheInfo {
            caches,
            version: self.namespace.clone(),
        }
    }

    // ==================== Sync / Push ====================

    /// Replay queued requests for a sync tag. Failures stay queued.
    pub async fn sync(&self, tag: &str) -> EventOutcome {
        if tag != self.policy.sync_tag {
            debug!(tag, "Ignoring unknown sync tag");
            return EventOutcome::Ignored;
        }

        let queued = self.outbox.lock().await.take(tag);
        let mut delivered = 0;
        let mut failed = Vec::new();

        for request in queued {
            match self.fetch(&request).await {
                Ok(response) if response.ok() => delivered += 1,
                Ok(response) => {
                    warn!(url = %request.url, status = %response.status, "Sync delivery rejected");
                    failed.push(request);
                }
                Err(e) => {
                    warn!(url = %request.url, error = %e, "Sync delivery failed");
                    failed.push(request);
                }
            }
        }

        let mut outbox = self.outbox.lock().await;
        outbox.requeue_front(tag, failed);
        let remaining = outbox.len(tag);
        info!(tag, delivered, remaining, "Background sync finished");
        EventOutcome::Synced {
            delivered,
            remaining,
        }
    }

    pub fn push(&self, payload: Option<&str>) -> Notification {
        Notification::for_push(&self.site, payload, chrono::Utc::now().timestamp_millis())
    }
}

/// Non-GET requests are worth replaying later; everything else just fails.
fn defers_on_failure(reason: &PassthroughReason) -> bool {
    match reason {
        PassthroughReason::NonGetMethod(method) => {
            !matches!(*method, Method::HEAD | Method::OPTIONS)
        }
        PassthroughReason::Bypassed(_) => false,
    }
}

impl std::fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("namespace", &self.namespace)
            .field("assets", &self.assets.len())
            .finish()
    }
}
