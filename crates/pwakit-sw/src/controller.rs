//! Page-side registration and update controller.
//!
//! Everything the page knows about its worker lives in a `PageSession`. The host page is
//! reached through `PageHost`: update prompts, reloads, connectivity notices and errors.

use std::future::Future;
use std::sync::Arc;

use pwakit_common::{with_timeout, RegistrationSettings};
use regex::{Regex, RegexBuilder};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;

use crate::container::{
    ContainerEvent, RegistrationSnapshot, ServiceWorkerContainer, UpdateOutcome, WorkerInfo,
};
use crate::lifecycle::{ServiceWorkerId, ServiceWorkerState};
use crate::message::WorkerMessage;
use crate::{Result, ServiceWorkerError};

/// The page hosting the controller.
pub trait PageHost: Send + Sync {
    fn user_agent(&self) -> String;

    /// Offer the user to activate a new version now.
    fn show_update_prompt(&self, prompt: &UpdatePrompt);

    fn reload(&self);

    /// Informational only.
    fn connectivity_changed(&self, online: bool);

    fn show_error(&self, message: &str);
}

/// A new version waiting for the user's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePrompt {
    pub worker_id: ServiceWorkerId,
    pub version: String,
}

/// The page's handle to its registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationHandle {
    pub scope: Url,
    pub script_url: Url,
    pub waiting: Option<WorkerInfo>,
}

impl From<RegistrationSnapshot> for RegistrationHandle {
    fn from(snapshot: RegistrationSnapshot) -> Self {
        Self {
            scope: snapshot.scope,
            script_url: snapshot.script_url,
            waiting: snapshot.waiting,
        }
    }
}

/// Mutable state of one page load.
#[derive(Debug, Clone)]
pub struct PageSession {
    /// This page as a container client.
    pub client_id: String,
    pub controller: Option<ServiceWorkerId>,
    pub registration: Option<RegistrationHandle>,
    pub online: bool,
    pub visible: bool,
    pub update_available: bool,
    pub last_update_check: Option<Instant>,
    pub pending_prompt: Option<UpdatePrompt>,
    /// Registration was attempted (or skipped) for this load.
    pub registered: bool,
    /// Reload once control moves to the accepted worker.
    pub reload_pending: bool,
}

/// Result of an update check request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheck {
    NotRegistered,
    Hidden,
    Offline,
    Throttled,
    Checked(UpdateOutcome),
}

/// Registers the worker and runs the update flow for one page.
pub struct RegistrationController {
    settings: RegistrationSettings,
    container: Arc<ServiceWorkerContainer>,
    events: mpsc::UnboundedReceiver<ContainerEvent>,
    host: Arc<dyn PageHost>,
    audit_agents: Option<Regex>,
    session: PageSession,
}

fn audit_regex(patterns: &[String]) -> Result<Option<Regex>> {
    let patterns: Vec<&str> = patterns
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();
    if patterns.is_empty() {
        return Ok(None);
    }

    let joined = patterns
        .iter()
        .map(|p| format!("(?:{p})"))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&joined)
        .case_insensitive(true)
        .build()
        .map(Some)
        .map_err(|e| ServiceWorkerError::InvalidPolicy(format!("audit agent pattern: {e}")))
}

impl RegistrationController {
    /// Attach a controller to a page at `page_url`.
    pub async fn new(
        settings: RegistrationSettings,
        container: Arc<ServiceWorkerContainer>,
        events: mpsc::UnboundedReceiver<ContainerEvent>,
        host: Arc<dyn PageHost>,
        page_url: &str,
    ) -> Result<Self> {
        let audit_agents = audit_regex(&settings.audit_agent_patterns)?;
        let client = container.open_client(page_url).await?;

        Ok(Self {
            settings,
            container,
            events,
            host,
            audit_agents,
            session: PageSession {
                client_id: client.id,
                controller: client.controller,
                registration: None,
                online: true,
                visible: true,
                update_available: false,
                last_update_check: None,
                pending_prompt: None,
                registered: false,
                reload_pending: false,
            },
        })
    }

    pub fn session(&self) -> &PageSession {
        &self.session
    }

    /// Whether the page runs under an audit or automation user agent.
    pub fn is_audit_agent(&self) -> bool {
        let agent = self.host.user_agent();
        self.audit_agents
            .as_ref()
            .map(|re| re.is_match(&agent))
            .unwrap_or(false)
    }

    /// Handle the page load event: wait for the page to settle, then register once.
    pub async fn on_load(&mut self) -> Result<Option<RegistrationHandle>> {
        if self.session.registered {
            return Ok(self.session.registration.clone());
        }
        self.session.registered = true;

        if self.is_audit_agent() {
            info!("Audit user agent detected, service worker disabled");
            return Ok(None);
        }

        tokio::time::sleep(self.settings.settle_delay()).await;

        match self
            .container
            .register(&self.settings.script_url, &self.settings.scope)
            .await
        {
            Ok(snapshot) => {
                info!(scope = %snapshot.scope, "Service worker registered");
                let handle = RegistrationHandle::from(snapshot);
                self.session.registration = Some(handle.clone());
                self.session.last_update_check = Some(Instant::now());
                self.pump();
                Ok(Some(handle))
            }
            Err(e) => {
                warn!(error = %e, "Service worker registration failed");
                self.host
                    .show_error(&format!("Offline support is unavailable: {e}"));
                Err(e)
            }
        }
    }

    /// Process every container event already delivered.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    fn handle_event(&mut self, event: ContainerEvent) {
        match event {
            ContainerEvent::UpdateFound { version, .. } => {
                debug!(version = %version, "Update found");
            }
            ContainerEvent::StateChange {
                worker_id,
                version,
                state: ServiceWorkerState::Installed,
            } => {
                let controlled_by_other = self
                    .session
                    .controller
                    .map(|id| id != worker_id)
                    .unwrap_or(false);
                if !controlled_by_other {
                    return;
                }

                info!(version = %version, "New version available");
                let prompt = UpdatePrompt { worker_id, version };
                self.session.update_available = true;
                self.session.pending_prompt = Some(prompt.clone());
                self.host.show_update_prompt(&prompt);
            }
            ContainerEvent::StateChange {
                worker_id, state, ..
            } => {
                let prompted = self
                    .session
                    .pending_prompt
                    .as_ref()
                    .map(|p| p.worker_id == worker_id)
                    .unwrap_or(false);
                let leaves_waiting = matches!(
                    state,
                    ServiceWorkerState::Activating
                        | ServiceWorkerState::Activated
                        | ServiceWorkerState::Redundant
                );
                if prompted && leaves_waiting {
                    self.session.pending_prompt = None;
                }
                if leaves_waiting && state != ServiceWorkerState::Redundant {
                    self.session.update_available = false;
                }
            }
            ContainerEvent::ControllerChange {
                client_id,
                worker_id,
            } => {
                if client_id != self.session.client_id {
                    return;
                }
                self.session.controller = Some(worker_id);
                if self.session.reload_pending {
                    self.session.reload_pending = false;
                    info!(worker = %worker_id, "Controller changed, reloading");
                    self.host.reload();
                }
            }
        }
    }

    /// Activate the pending update now, then reload once control transfers.
    pub async fn accept_update(&mut self) -> Result<bool> {
        let Some(prompt) = self.session.pending_prompt.clone() else {
            return Ok(false);
        };

        self.session.reload_pending = true;
        if let Err(e) = self
            .container
            .post_message(prompt.worker_id, &WorkerMessage::SkipWaiting.to_value(), None)
            .await
        {
            self.session.reload_pending = false;
            self.host.show_error(&format!("Update failed: {e}"));
            return Err(e);
        }

        let timeout = self.settings.activation_timeout();
        match with_timeout(timeout, || self.await_controller_change()).await {
            Ok(true) => {
                self.refresh_registration().await;
                Ok(true)
            }
            Ok(false) | Err(_) => {
                self.session.reload_pending = false;
                warn!(version = %prompt.version, "Update did not take control");
                self.host.show_error("The update could not be activated");
                Err(ServiceWorkerError::Timeout(timeout))
            }
        }
    }

    async fn await_controller_change(&mut self) -> bool {
        while let Some(event) = self.events.recv().await {
            let ours = matches!(
                &event,
                ContainerEvent::ControllerChange { client_id, .. }
                    if *client_id == self.session.client_id
            );
            self.handle_event(event);
            if ours {
                return true;
            }
        }
        false
    }

    async fn refresh_registration(&mut self) {
        self.session.registration = self
            .container
            .registration()
            .await
            .map(RegistrationHandle::from);
    }

    /// Keep the update queued; the prompt goes away.
    pub fn dismiss_update(&mut self) -> bool {
        self.session.pending_prompt.take().is_some()
    }

    /// Check for a new version, at most once per interval and only while visible and online.
    pub async fn check_for_update(&mut self) -> Result<UpdateCheck> {
        if self.session.registration.is_none() {
            return Ok(UpdateCheck::NotRegistered);
        }
        if !self.session.visible {
            return Ok(UpdateCheck::Hidden);
        }
        if !self.session.online {
            return Ok(UpdateCheck::Offline);
        }
        if let Some(last) = self.session.last_update_check {
            if last.elapsed() < self.settings.update_interval() {
                return Ok(UpdateCheck::Throttled);
            }
        }

        self.session.last_update_check = Some(Instant::now());
        let outcome = self.container.update().await.map_err(|e| {
            warn!(error = %e, "Update check failed");
            e
        })?;
        self.pump();
        self.refresh_registration().await;
        Ok(UpdateCheck::Checked(outcome))
    }

    /// Run an update check every interval until `stop` resolves. Returns the number of
    /// checks that reached the container.
    pub async fn poll_updates<F>(&mut self, stop: F) -> usize
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.settings.update_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        tokio::pin!(stop);

        let mut checked = 0;
        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => match self.check_for_update().await {
                    Ok(UpdateCheck::Checked(outcome)) => {
                        debug!(?outcome, "Periodic update check");
                        checked += 1;
                    }
                    Ok(skipped) => debug!(?skipped, "Periodic update check skipped"),
                    Err(e) => warn!(error = %e, "Periodic update check failed"),
                },
            }
        }
        checked
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.session.visible = visible;
    }

    /// Record a connectivity change and tell the host.
    pub fn set_online(&mut self, online: bool) {
        if self.session.online == online {
            return;
        }
        self.session.online = online;
        info!(online, "Connectivity changed");
        self.host.connectivity_changed(online);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use pwakit_common::{SiteConfig, WorkerPolicy};
    use pwakit_net::MockFetcher;
    use pwakit_store::CacheStorage;
    use tokio::sync::RwLock;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum HostCall {
        Prompt(String),
        Reload,
        Online(bool),
        Error,
    }

    struct RecordingHost {
        agent: String,
        calls: Mutex<Vec<HostCall>>,
    }

    impl RecordingHost {
        fn new(agent: &str) -> Arc<Self> {
            Arc::new(Self {
                agent: agent.to_string(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<HostCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PageHost for RecordingHost {
        fn user_agent(&self) -> String {
            self.agent.clone()
        }
        fn show_update_prompt(&self, prompt: &UpdatePrompt) {
            self.calls.lock().unwrap().push(HostCall::Prompt(prompt.version.clone()));
        }
        fn reload(&self) {
            self.calls.lock().unwrap().push(HostCall::Reload);
        }
        fn connectivity_changed(&self, online: bool) {
            self.calls.lock().unwrap().push(HostCall::Online(online));
        }
        fn show_error(&self, _message: &str) {
            self.calls.lock().unwrap().push(HostCall::Error);
        }
    }

    const BROWSER: &str =
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 Chrome/126.0 Safari/537.36";

    fn policy(version: &str) -> WorkerPolicy {
        let mut policy = WorkerPolicy::default();
        policy.version = version.to_string();
        policy.static_assets = Some(vec!["/".to_string()]);
        policy
    }

    type Setup = (
        RegistrationController,
        Arc<RecordingHost>,
        Arc<RwLock<WorkerPolicy>>,
        Arc<MockFetcher>,
    );

    async fn setup(agent: &str) -> Setup {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.route("https://example.com/", 200, "home");
        let source = Arc::new(RwLock::new(policy("1")));
        let site = SiteConfig {
            origin: Url::parse("https://example.com/").unwrap(),
            ..SiteConfig::default()
        };
        let (container, events) = ServiceWorkerContainer::new(
            site,
            CacheStorage::memory(),
            fetcher.clone(),
            source.clone(),
        );
        let host = RecordingHost::new(agent);
        let controller = RegistrationController::new(
            RegistrationSettings::default(),
            Arc::new(container),
            events,
            host.clone(),
            "/",
        )
        .await
        .unwrap();
        (controller, host, source, fetcher)
    }

    #[tokio::test(start_paused = true)]
    async fn test_registers_once_after_settle_delay() {
        let (mut controller, _host, _source, fetcher) = setup(BROWSER).await;

        let start = Instant::now();
        let handle = controller.on_load().await.unwrap();
        assert!(handle.is_some());
        assert!(start.elapsed() >= Duration::from_millis(3000));
        assert!(controller.session().controller.is_some());

        let calls = fetcher.calls();
        let again = controller.on_load().await.unwrap();
        assert_eq!(again, handle);
        assert_eq!(fetcher.calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_audit_agents_skip_registration() {
        for agent in [
            "Mozilla/5.0 (Linux; Android 11) Chrome-Lighthouse",
            "Mozilla/5.0 HeadlessChrome/120.0",
            "Google PageSpeed Insights",
            "lighthouse/12",
        ] {
            let (mut controller, _host, _source, fetcher) = setup(agent).await;
            assert!(controller.is_audit_agent(), "{agent}");
            assert!(controller.on_load().await.unwrap().is_none());
            assert_eq!(fetcher.calls(), 0);
            assert!(controller.session().registered);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_checks_throttled_and_hidden() {
        let (mut controller, _host, source, _fetcher) = setup(BROWSER).await;
        assert_eq!(
            controller.check_for_update().await.unwrap(),
            UpdateCheck::NotRegistered
        );

        controller.on_load().await.unwrap();
        assert_eq!(
            controller.check_for_update().await.unwrap(),
            UpdateCheck::Throttled
        );

        tokio::time::advance(Duration::from_secs(3601)).await;
        controller.set_visible(false);
        assert_eq!(
            controller.check_for_update().await.unwrap(),
            UpdateCheck::Hidden
        );

        controller.set_visible(true);
        controller.set_online(false);
        assert_eq!(
            controller.check_for_update().await.unwrap(),
            UpdateCheck::Offline
        );
        controller.set_online(true);

        controller.set_visible(true);
        *source.write().await = policy("2");
        let check = controller.check_for_update().await.unwrap();
        assert!(matches!(
            check,
            UpdateCheck::Checked(UpdateOutcome::Installed { activated: false, .. })
        ));
        assert_eq!(
            controller.check_for_update().await.unwrap(),
            UpdateCheck::Throttled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_updates_once_per_interval() {
        let (mut controller, _host, _source, _fetcher) = setup(BROWSER).await;
        controller.on_load().await.unwrap();

        let stop = tokio::time::sleep(Duration::from_secs(3 * 3600 + 1));
        assert_eq!(controller.poll_updates(stop).await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_updates_skips_hidden_and_offline() {
        let (mut controller, _host, source, _fetcher) = setup(BROWSER).await;
        controller.on_load().await.unwrap();
        *source.write().await = policy("2");

        controller.set_visible(false);
        let stop = tokio::time::sleep(Duration::from_secs(3 * 3600 + 1));
        assert_eq!(controller.poll_updates(stop).await, 0);

        controller.set_visible(true);
        controller.set_online(false);
        let stop = tokio::time::sleep(Duration::from_secs(2 * 3600 + 1));
        assert_eq!(controller.poll_updates(stop).await, 0);
        assert!(!controller.session().update_available);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_updates_before_registration() {
        let (mut controller, _host, _source, fetcher) = setup(BROWSER).await;
        let stop = tokio::time::sleep(Duration::from_secs(2 * 3600 + 1));
        assert_eq!(controller.poll_updates(stop).await, 0);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_accept_reloads() {
        let (mut controller, host, source, _fetcher) = setup(BROWSER).await;
        controller.on_load().await.unwrap();
        let first = controller.session().controller;

        tokio::time::advance(Duration::from_secs(3601)).await;
        *source.write().await = policy("2");
        controller.check_for_update().await.unwrap();

        assert!(controller.session().update_available);
        assert_eq!(host.calls(), vec![HostCall::Prompt("2".to_string())]);

        assert!(controller.accept_update().await.unwrap());
        assert_eq!(host.calls().last(), Some(&HostCall::Reload));
        assert_ne!(controller.session().controller, first);
        assert!(!controller.session().update_available);
        assert!(controller.session().pending_prompt.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_dismiss_leaves_waiting() {
        let (mut controller, host, source, _fetcher) = setup(BROWSER).await;
        controller.on_load().await.unwrap();

        tokio::time::advance(Duration::from_secs(3601)).await;
        *source.write().await = policy("2");
        controller.check_for_update().await.unwrap();

        assert!(controller.dismiss_update());
        assert!(controller.session().update_available);
        assert!(!controller.accept_update().await.unwrap());
        assert!(!host.calls().contains(&HostCall::Reload));

        let handle = controller.session().registration.clone().unwrap();
        assert_eq!(handle.waiting.unwrap().version, "2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_failure_surfaces_error() {
        let (mut controller, host, _source, fetcher) = setup(BROWSER).await;
        fetcher.set_offline(true);

        assert!(controller.on_load().await.is_err());
        assert_eq!(host.calls(), vec![HostCall::Error]);
    }

    #[tokio::test]
    async fn test_connectivity_reported_on_change() {
        let (mut controller, host, _source, _fetcher) = setup(BROWSER).await;
        controller.set_online(true);
        controller.set_online(false);
        controller.set_online(false);
        controller.set_online(true);

        assert_eq!(
            host.calls(),
            vec![HostCall::Online(false), HostCall::Online(true)]
        );
    }

    #[test]
    fn test_empty_audit_list_matches_nothing() {
        assert!(audit_regex(&[]).unwrap().is_none());
        assert!(audit_regex(&["(".to_string()]).is_err());
    }
}
