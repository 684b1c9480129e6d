//! Worker host (`navigator.serviceWorker`).
//!
//! Owns registrations and clients, drives the lifecycle of each registered
//! worker and routes functional events (fetch, sync, push, notification
//! clicks) to the active worker of the matching scope.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use hashbrown::HashMap;
use swkit_net::{is_network_scheme, Request};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::dispatch::FetchOutcome;
use crate::event::{
    ActivateEvent, FetchEvent, InstallEvent, NotificationClickEvent, PendingTasks, PushEvent,
    SyncEvent,
};
use crate::lifecycle::LifecycleState;
use crate::push::Notification;
use crate::sync::SyncManager;
use crate::worker::WorkerHandlers;
use crate::ServiceWorkerError;

// ==================== Types ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Options for service worker registration.
#[derive(Debug, Clone, Default)]
pub struct RegistrationOptions {
    /// Scope, resolved against the script URL. Defaults to the script's
    /// directory.
    pub scope: Option<String>,
}

impl RegistrationOptions {
    pub fn with_scope(scope: impl Into<String>) -> Self {
        Self {
            scope: Some(scope.into()),
        }
    }
}

/// Host-side events.
#[derive(Debug, Clone)]
pub enum ServiceWorkerEvent {
    /// A new worker started installing.
    UpdateFound { registration_scope: String },
    /// A worker changed state.
    StateChange {
        registration_scope: String,
        worker_id: ServiceWorkerId,
        new_state: LifecycleState,
    },
    /// A new version installed while an older one is active.
    UpdateReady {
        registration_scope: String,
        worker_id: ServiceWorkerId,
    },
    /// A client got a new controller.
    ControllerChange {
        client_id: String,
        worker_id: ServiceWorkerId,
    },
    /// A push produced a notification.
    NotificationShown {
        registration_scope: String,
        notification: Notification,
    },
    /// A notification click opened a window.
    OpenWindow { client_id: String, url: Url },
}

// ==================== Service Worker ====================

/// A registered worker instance.
struct ServiceWorker {
    id: ServiceWorkerId,
    script_url: Url,
    state: LifecycleState,
    handlers: Arc<dyn WorkerHandlers>,
    state_changed_at: Instant,
}

impl ServiceWorker {
    fn new(script_url: Url, handlers: Arc<dyn WorkerHandlers>) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            script_url,
            state: LifecycleState::Installing,
            handlers,
            state_changed_at: Instant::now(),
        }
    }

    fn set_state(&mut self, state: LifecycleState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }
}

impl fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("script_url", &self.script_url.as_str())
            .field("state", &self.state)
            .field("since", &self.state_changed_at.elapsed())
            .finish_non_exhaustive()
    }
}

// ==================== Registration ====================

#[derive(Debug)]
struct ServiceWorkerRegistration {
    scope: Url,
    installing: Option<ServiceWorker>,
    waiting: Option<ServiceWorker>,
    active: Option<ServiceWorker>,
}

struct Installed {
    displaced: Option<ServiceWorkerId>,
    has_active: bool,
}

impl ServiceWorkerRegistration {
    fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Move the installing worker `id` to waiting.
    fn install_complete(&mut self, id: ServiceWorkerId) -> Option<Installed> {
        if self.installing.as_ref().map(|w| w.id) != Some(id) {
            return None;
        }
        let mut worker = self.installing.take()?;
        worker.set_state(LifecycleState::Installed);

        let displaced = self.waiting.replace(worker).map(|mut old| {
            old.set_state(LifecycleState::Redundant);
            old.id
        });
        Some(Installed {
            displaced,
            has_active: self.active.is_some(),
        })
    }

    /// Promote the waiting worker `id` to active. Returns the replaced
    /// worker, if any.
    fn promote(&mut self, id: ServiceWorkerId) -> Option<Option<ServiceWorkerId>> {
        if self.waiting.as_ref().map(|w| w.id) != Some(id) {
            return None;
        }
        let mut worker = self.waiting.take()?;
        worker.set_state(LifecycleState::Active);

        let replaced = self.active.replace(worker).map(|mut old| {
            old.set_state(LifecycleState::Redundant);
            old.id
        });
        Some(replaced)
    }

    fn workers_mut(&mut self) -> impl Iterator<Item = &mut ServiceWorker> {
        self.installing
            .iter_mut()
            .chain(self.waiting.iter_mut())
            .chain(self.active.iter_mut())
    }

    fn snapshot(&self) -> RegistrationSnapshot {
        RegistrationSnapshot {
            scope: self.scope.clone(),
            installing: self.installing.as_ref().map(|w| w.id),
            waiting: self.waiting.as_ref().map(|w| w.id),
            active: self.active.as_ref().map(|w| w.id),
        }
    }
}

/// Point-in-time view of a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationSnapshot {
    pub scope: Url,
    pub installing: Option<ServiceWorkerId>,
    pub waiting: Option<ServiceWorkerId>,
    pub active: Option<ServiceWorkerId>,
}

// ==================== Clients ====================

/// A window client (an open page).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub url: Url,
    pub focused: bool,
    /// Worker controlling this page.
    pub controller: Option<ServiceWorkerId>,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// All clients, optionally only the controlled ones.
    pub fn match_all(&self, include_uncontrolled: bool) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| include_uncontrolled || c.controller.is_some())
            .collect()
    }

    /// Open a focused window at `url`.
    pub fn open_window(&mut self, url: Url, controller: Option<ServiceWorkerId>) -> Client {
        let client = Client {
            id: client_id(),
            url,
            focused: true,
            controller,
        };
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// Make `worker` the controller of every client `in_scope` accepts.
    /// Returns the ids of clients whose controller changed.
    pub fn claim(
        &mut self,
        worker: ServiceWorkerId,
        in_scope: impl Fn(&Url) -> bool,
    ) -> Vec<String> {
        let mut changed = Vec::new();
        for client in self.clients.values_mut() {
            if in_scope(&client.url) && client.controller != Some(worker) {
                client.controller = Some(worker);
                changed.push(client.id.clone());
            }
        }
        changed.sort();
        changed
    }

    /// Drop the controller of every client controlled by `worker`.
    fn release(&mut self, worker: ServiceWorkerId) {
        for client in self.clients.values_mut() {
            if client.controller == Some(worker) {
                client.controller = None;
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{:08x}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

// ==================== Service Worker Container ====================

/// Service worker container (navigator.serviceWorker).
pub struct ServiceWorkerContainer {
    /// Registrations by scope.
    registrations: Arc<RwLock<HashMap<String, ServiceWorkerRegistration>>>,

    /// Open pages.
    pub clients: Arc<RwLock<Clients>>,

    /// Pending background sync tags.
    pub sync: Arc<SyncManager>,

    /// Work registered through `WaitUntil`.
    pending: Arc<PendingTasks>,

    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a new container.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                registrations: Arc::new(RwLock::new(HashMap::new())),
                clients: Arc::new(RwLock::new(Clients::new())),
                sync: Arc::new(SyncManager::new()),
                pending: Arc::new(PendingTasks::new()),
                event_tx,
            },
            event_rx,
        )
    }

    /// Register `handlers` as the worker for a scope and run its lifecycle.
    ///
    /// Install runs first. If it fails the new worker becomes redundant and
    /// whatever worker was active keeps serving. Otherwise the worker waits,
    /// unless it asked to skip waiting or nothing is active yet, in which
    /// case it is activated right away. Returns the scope.
    pub async fn register(
        &self,
        script_url: &str,
        options: RegistrationOptions,
        handlers: Arc<dyn WorkerHandlers>,
    ) -> Result<String, ServiceWorkerError> {
        let script_url = Url::parse(script_url)
            .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?;
        if !is_network_scheme(&script_url) {
            return Err(ServiceWorkerError::RegistrationFailed(format!(
                "unsupported script scheme: {}",
                script_url.scheme()
            )));
        }
        let scope = resolve_scope(&script_url, options.scope.as_deref())?;
        let scope_key = scope.to_string();

        let worker = ServiceWorker::new(script_url, Arc::clone(&handlers));
        let worker_id = worker.id;
        {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .entry(scope_key.clone())
                .or_insert_with(|| ServiceWorkerRegistration::new(scope));
            if let Some(mut stale) = registration.installing.replace(worker) {
                stale.set_state(LifecycleState::Redundant);
                debug!(worker = stale.id.raw(), "Superseded installing worker");
            }
        }

        info!(scope = %scope_key, worker = worker_id.raw(), "Service worker registered");
        self.emit(ServiceWorkerEvent::UpdateFound {
            registration_scope: scope_key.clone(),
        });
        self.emit_state(&scope_key, worker_id, LifecycleState::Installing);

        let event = InstallEvent::new(self.pending.handle());
        if let Err(e) = handlers.install(&event).await {
            warn!(scope = %scope_key, error = %e, "Install failed");
            self.discard_installing(&scope_key, worker_id).await;
            return Err(match e {
                ServiceWorkerError::InstallFailed(_) => e,
                other => ServiceWorkerError::InstallFailed(other.to_string()),
            });
        }

        let installed = {
            let mut registrations = self.registrations.write().await;
            registrations
                .get_mut(&scope_key)
                .and_then(|r| r.install_complete(worker_id))
        };
        let Some(installed) = installed else {
            return Err(ServiceWorkerError::State(
                "worker was superseded during install".to_string(),
            ));
        };

        if let Some(displaced) = installed.displaced {
            self.emit_state(&scope_key, displaced, LifecycleState::Redundant);
        }
        self.emit_state(&scope_key, worker_id, LifecycleState::Installed);
        if installed.has_active {
            self.emit(ServiceWorkerEvent::UpdateReady {
                registration_scope: scope_key.clone(),
                worker_id,
            });
        }

        if event.skip_waiting_requested() || !installed.has_active {
            self.activate(&scope_key).await?;
        } else {
            info!(scope = %scope_key, worker = worker_id.raw(), "New version waiting");
        }

        Ok(scope_key)
    }

    /// Activate the waiting worker of `scope`.
    ///
    /// A failing activate handler is logged; the worker still becomes active.
    pub async fn activate(&self, scope: &str) -> Result<(), ServiceWorkerError> {
        let (worker_id, handlers) = {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .get_mut(scope)
                .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?;
            let worker = registration
                .waiting
                .as_mut()
                .ok_or_else(|| ServiceWorkerError::State("no waiting worker".to_string()))?;
            worker.set_state(LifecycleState::Activating);
            (worker.id, Arc::clone(&worker.handlers))
        };
        self.emit_state(scope, worker_id, LifecycleState::Activating);

        let event = ActivateEvent::new(self.pending.handle());
        if let Err(e) = handlers.activate(&event).await {
            warn!(scope, error = %e, "Activate handler failed, activating anyway");
        }

        let replaced = {
            let mut registrations = self.registrations.write().await;
            registrations
                .get_mut(scope)
                .and_then(|r| r.promote(worker_id))
                .ok_or_else(|| {
                    ServiceWorkerError::State("worker was replaced during activation".to_string())
                })?
        };

        if let Some(old) = replaced {
            self.clients.write().await.release(old);
            self.emit_state(scope, old, LifecycleState::Redundant);
        }
        self.emit_state(scope, worker_id, LifecycleState::Active);
        info!(scope, worker = worker_id.raw(), "Service worker active");

        if event.claim_requested() {
            self.claim(scope, worker_id).await;
        }
        Ok(())
    }

    async fn claim(&self, scope: &str, worker_id: ServiceWorkerId) {
        let scopes: Vec<String> = self.registrations.read().await.keys().cloned().collect();
        let changed = self.clients.write().await.claim(worker_id, |url| {
            longest_match(scopes.iter().map(String::as_str), url) == Some(scope)
        });

        debug!(scope, claimed = changed.len(), "Clients claimed");
        for client_id in changed {
            self.emit(ServiceWorkerEvent::ControllerChange {
                client_id,
                worker_id,
            });
        }
    }

    async fn discard_installing(&self, scope: &str, worker_id: ServiceWorkerId) {
        let mut registrations = self.registrations.write().await;
        let Some(registration) = registrations.get_mut(scope) else {
            return;
        };
        if registration.installing.as_ref().map(|w| w.id) == Some(worker_id) {
            if let Some(mut worker) = registration.installing.take() {
                worker.set_state(LifecycleState::Redundant);
            }
        }
        let empty = registration.waiting.is_none() && registration.active.is_none();
        if empty && registration.installing.is_none() {
            registrations.remove(scope);
        }
        drop(registrations);
        self.emit_state(scope, worker_id, LifecycleState::Redundant);
    }

    /// Scope of the registration controlling `url`.
    pub async fn get_registration(&self, url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        let registrations = self.registrations.read().await;
        longest_match(registrations.keys().map(String::as_str), &url).map(str::to_string)
    }

    /// Get all registrations.
    pub async fn get_registrations(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self.registrations.read().await.keys().cloned().collect();
        scopes.sort();
        scopes
    }

    pub async fn registration(&self, scope: &str) -> Option<RegistrationSnapshot> {
        self.registrations
            .read()
            .await
            .get(scope)
            .map(ServiceWorkerRegistration::snapshot)
    }

    /// Open a page at `url`; it is controlled by the active worker of its
    /// scope, if any.
    pub async fn connect_client(&self, url: &str) -> Result<Client, ServiceWorkerError> {
        let url = Url::parse(url).map_err(|e| ServiceWorkerError::NotFound(e.to_string()))?;
        let controller = {
            let registrations = self.registrations.read().await;
            controlling(&registrations, &url).and_then(|r| r.active.as_ref().map(|w| w.id))
        };
        Ok(self.clients.write().await.open_window(url, controller))
    }

    /// Route a request to the worker controlling its URL.
    pub async fn handle_fetch(&self, request: Request) -> FetchOutcome {
        let handlers = {
            let registrations = self.registrations.read().await;
            controlling(&registrations, &request.url)
                .and_then(|r| r.active.as_ref())
                .map(|w| Arc::clone(&w.handlers))
        };

        match handlers {
            Some(handlers) => {
                let event = FetchEvent::new(request, self.pending.handle());
                handlers.fetch(event).await
            }
            None => {
                trace!(url = %request.url, "No controller, passing through");
                FetchOutcome::PassThrough(request)
            }
        }
    }

    /// Register a background sync tag.
    pub async fn register_sync(&self, tag: &str) -> bool {
        self.sync.register(tag).await
    }

    /// Fire a pending sync tag at the active worker of `scope`. The tag is
    /// dropped on success and kept for another attempt on failure.
    pub async fn dispatch_sync(&self, scope: &str, tag: &str) -> Result<(), ServiceWorkerError> {
        if !self.sync.is_pending(tag).await {
            return Err(ServiceWorkerError::NotFound(format!("sync tag {tag}")));
        }
        let handlers = self.active_handlers(scope).await?;
        let event = SyncEvent {
            tag: tag.to_string(),
            last_chance: false,
        };
        handlers.sync(&event).await?;
        self.sync.complete(tag).await;
        Ok(())
    }

    /// Deliver a push to the active worker of `scope`.
    pub async fn dispatch_push(
        &self,
        scope: &str,
        data: Option<Bytes>,
    ) -> Result<Option<Notification>, ServiceWorkerError> {
        let handlers = self.active_handlers(scope).await?;
        let notification = handlers.push(&PushEvent { data }).await?;

        if let Some(notification) = &notification {
            debug!(scope, title = %notification.title, "Showing notification");
            self.emit(ServiceWorkerEvent::NotificationShown {
                registration_scope: scope.to_string(),
                notification: notification.clone(),
            });
        }
        Ok(notification)
    }

    /// Click on a shown notification. The notification closes; if the
    /// worker asks for a window, it is opened and returned.
    pub async fn notification_click(
        &self,
        scope: &str,
        notification: Notification,
        action: Option<&str>,
    ) -> Result<Option<Client>, ServiceWorkerError> {
        let (handlers, scope_url, controller) = {
            let registrations = self.registrations.read().await;
            let registration = registrations
                .get(scope)
                .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?;
            let active = registration
                .active
                .as_ref()
                .ok_or_else(|| ServiceWorkerError::State("no active worker".to_string()))?;
            (
                Arc::clone(&active.handlers),
                registration.scope.clone(),
                active.id,
            )
        };

        let event = NotificationClickEvent {
            notification,
            action: action.map(str::to_string),
        };
        let Some(path) = handlers.notification_click(&event).await else {
            return Ok(None);
        };

        let url = scope_url
            .join(&path)
            .map_err(|e| ServiceWorkerError::NotFound(format!("{path}: {e}")))?;
        let client = self.clients.write().await.open_window(url, Some(controller));
        self.emit(ServiceWorkerEvent::OpenWindow {
            client_id: client.id.clone(),
            url: client.url.clone(),
        });
        Ok(Some(client))
    }

    /// Await all background work handed to `WaitUntil`.
    pub async fn settle(&self) -> usize {
        self.pending.settle().await
    }

    /// Background tasks still running.
    pub fn pending_tasks(&self) -> usize {
        self.pending.in_flight()
    }

    /// Unregister a service worker.
    pub async fn unregister(&self, scope: &str) -> Result<bool, ServiceWorkerError> {
        let removed = self.registrations.write().await.remove(scope);
        let Some(mut registration) = removed else {
            return Ok(false);
        };

        let mut retired = Vec::new();
        for worker in registration.workers_mut() {
            worker.set_state(LifecycleState::Redundant);
            retired.push(worker.id);
        }

        let mut clients = self.clients.write().await;
        for id in &retired {
            clients.release(*id);
        }
        drop(clients);

        for id in retired {
            self.emit_state(scope, id, LifecycleState::Redundant);
        }
        info!(scope, "Service worker unregistered");
        Ok(true)
    }

    async fn active_handlers(
        &self,
        scope: &str,
    ) -> Result<Arc<dyn WorkerHandlers>, ServiceWorkerError> {
        let registrations = self.registrations.read().await;
        let registration = registrations
            .get(scope)
            .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?;
        registration
            .active
            .as_ref()
            .map(|w| Arc::clone(&w.handlers))
            .ok_or_else(|| ServiceWorkerError::State("no active worker".to_string()))
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_state(&self, scope: &str, worker_id: ServiceWorkerId, new_state: LifecycleState) {
        self.emit(ServiceWorkerEvent::StateChange {
            registration_scope: scope.to_string(),
            worker_id,
            new_state,
        });
    }
}

impl Default for ServiceWorkerContainer {
    fn default() -> Self {
        Self::new().0
    }
}

impl fmt::Debug for ServiceWorkerContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceWorkerContainer").finish_non_exhaustive()
    }
}

// ==================== Helpers ====================

/// Explicit scope resolved against the script, or the script's directory.
fn resolve_scope(script_url: &Url, scope: Option<&str>) -> Result<Url, ServiceWorkerError> {
    let scope = match scope {
        Some(scope) => script_url
            .join(scope)
            .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?,
        None => {
            let path = script_url.path();
            let dir = match path.rfind('/') {
                Some(i) => &path[..=i],
                None => "/",
            };
            let mut scope = script_url.clone();
            scope.set_path(dir);
            scope.set_query(None);
            scope.set_fragment(None);
            scope
        }
    };

    if scope.origin() != script_url.origin() {
        return Err(ServiceWorkerError::RegistrationFailed(format!(
            "scope {scope} is not on the script's origin"
        )));
    }
    Ok(scope)
}

/// The longest scope that prefixes `url`.
fn longest_match<'a>(scopes: impl Iterator<Item = &'a str>, url: &Url) -> Option<&'a str> {
    scopes
        .filter(|scope| url.as_str().starts_with(scope))
        .max_by_key(|scope| scope.len())
}

/// Registration with an active worker whose scope best matches `url`.
fn controlling<'a>(
    registrations: &'a HashMap<String, ServiceWorkerRegistration>,
    url: &Url,
) -> Option<&'a ServiceWorkerRegistration> {
    let active = registrations
        .iter()
        .filter(|(_, r)| r.active.is_some())
        .map(|(scope, _)| scope.as_str());
    longest_match(active, url).and_then(|scope| registrations.get(scope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use http::StatusCode;
    use std::sync::atomic::AtomicBool;
    use swkit_net::Response;

    /// Answers every fetch with its own label.
    struct LabelWorker {
        label: &'static str,
        fail_install: bool,
        skip_waiting: bool,
        activated: AtomicBool,
    }

    impl LabelWorker {
        fn new(label: &'static str) -> Self {
            Self {
                label,
                fail_install: false,
                skip_waiting: true,
                activated: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl WorkerHandlers for LabelWorker {
        async fn install(&self, event: &InstallEvent) -> Result<(), ServiceWorkerError> {
            if self.fail_install {
                return Err(ServiceWorkerError::InstallFailed("/ unreachable".into()));
            }
            if self.skip_waiting {
                event.skip_waiting();
            }
            Ok(())
        }

        async fn activate(&self, event: &ActivateEvent) -> Result<(), ServiceWorkerError> {
            self.activated.store(true, Ordering::SeqCst);
            event.claim_clients();
            Ok(())
        }

        async fn fetch(&self, _event: FetchEvent) -> FetchOutcome {
            FetchOutcome::Respond(Response::new(StatusCode::OK, self.label))
        }
    }

    async fn label_of(container: &ServiceWorkerContainer, url: &str) -> Option<String> {
        container
            .handle_fetch(Request::parse(url).unwrap())
            .await
            .into_response()
            .map(|r| r.text().unwrap())
    }

    #[test]
    fn test_default_scope_is_script_directory() {
        let script = Url::parse("https://site.test/sw.js").unwrap();
        assert_eq!(resolve_scope(&script, None).unwrap().as_str(), "https://site.test/");

        let script = Url::parse("https://site.test/app/sw.js?v=2").unwrap();
        assert_eq!(
            resolve_scope(&script, None).unwrap().as_str(),
            "https://site.test/app/"
        );
    }

    #[test]
    fn test_scope_must_share_origin() {
        let script = Url::parse("https://site.test/sw.js").unwrap();
        assert!(resolve_scope(&script, Some("https://evil.test/")).is_err());
        assert_eq!(
            resolve_scope(&script, Some("/blog/")).unwrap().as_str(),
            "https://site.test/blog/"
        );
    }

    #[tokio::test]
    async fn test_register_activates_first_worker() {
        let (container, mut rx) = ServiceWorkerContainer::new();
        let worker = Arc::new(LabelWorker::new("v1"));

        let scope = container
            .register("https://site.test/sw.js", RegistrationOptions::default(), worker.clone())
            .await
            .unwrap();
        assert_eq!(scope, "https://site.test/");
        assert!(worker.activated.load(Ordering::SeqCst));

        let snapshot = container.registration(&scope).await.unwrap();
        assert!(snapshot.active.is_some());
        assert!(snapshot.waiting.is_none());

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ServiceWorkerEvent::StateChange { new_state, .. } = event {
                states.push(new_state);
            }
        }
        assert_eq!(
            states,
            vec![
                LifecycleState::Installing,
                LifecycleState::Installed,
                LifecycleState::Activating,
                LifecycleState::Active,
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_install_keeps_previous_worker() {
        let (container, _rx) = ServiceWorkerContainer::new();
        container
            .register(
                "https://site.test/sw.js",
                RegistrationOptions::default(),
                Arc::new(LabelWorker::new("v1")),
            )
            .await
            .unwrap();

        let broken = LabelWorker {
            fail_install: true,
            ..LabelWorker::new("v2")
        };
        let err = container
            .register("https://site.test/sw.js", RegistrationOptions::default(), Arc::new(broken))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceWorkerError::InstallFailed(_)));

        assert_eq!(
            label_of(&container, "https://site.test/").await.as_deref(),
            Some("v1")
        );
        let snapshot = container.registration("https://site.test/").await.unwrap();
        assert!(snapshot.installing.is_none());
    }

    #[tokio::test]
    async fn test_failed_first_install_leaves_no_registration() {
        let (container, _rx) = ServiceWorkerContainer::new();
        let broken = LabelWorker {
            fail_install: true,
            ..LabelWorker::new("v1")
        };
        assert!(container
            .register("https://site.test/sw.js", RegistrationOptions::default(), Arc::new(broken))
            .await
            .is_err());
        assert!(container.get_registrations().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_waits_without_skip_waiting() {
        let (container, mut rx) = ServiceWorkerContainer::new();
        container
            .register(
                "https://site.test/sw.js",
                RegistrationOptions::default(),
                Arc::new(LabelWorker::new("v1")),
            )
            .await
            .unwrap();
        while rx.try_recv().is_ok() {}

        let patient = LabelWorker {
            skip_waiting: false,
            ..LabelWorker::new("v2")
        };
        let scope = container
            .register("https://site.test/sw.js", RegistrationOptions::default(), Arc::new(patient))
            .await
            .unwrap();

        let mut update_ready = false;
        while let Ok(event) = rx.try_recv() {
            update_ready |= matches!(event, ServiceWorkerEvent::UpdateReady { .. });
        }
        assert!(update_ready);
        assert_eq!(
            label_of(&container, "https://site.test/").await.as_deref(),
            Some("v1")
        );

        container.activate(&scope).await.unwrap();
        assert_eq!(
            label_of(&container, "https://site.test/").await.as_deref(),
            Some("v2")
        );
    }

    #[tokio::test]
    async fn test_fetch_routes_to_longest_scope() {
        let (container, _rx) = ServiceWorkerContainer::new();
        container
            .register(
                "https://site.test/sw.js",
                RegistrationOptions::default(),
                Arc::new(LabelWorker::new("root")),
            )
            .await
            .unwrap();
        container
            .register(
                "https://site.test/sw.js",
                RegistrationOptions::with_scope("/blog/"),
                Arc::new(LabelWorker::new("blog")),
            )
            .await
            .unwrap();

        assert_eq!(
            label_of(&container, "https://site.test/about").await.as_deref(),
            Some("root")
        );
        assert_eq!(
            label_of(&container, "https://site.test/blog/post-1").await.as_deref(),
            Some("blog")
        );
        assert_eq!(label_of(&container, "https://other.test/").await, None);
    }

    #[tokio::test]
    async fn test_claim_takes_over_open_pages() {
        let (container, mut rx) = ServiceWorkerContainer::new();
        let page = container.connect_client("https://site.test/about").await.unwrap();
        assert!(page.controller.is_none());

        let scope = container
            .register(
                "https://site.test/sw.js",
                RegistrationOptions::default(),
                Arc::new(LabelWorker::new("v1")),
            )
            .await
            .unwrap();
        let active = container.registration(&scope).await.unwrap().active;

        let clients = container.clients.read().await;
        assert_eq!(clients.get(&page.id).unwrap().controller, active);
        drop(clients);

        let mut changes = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ServiceWorkerEvent::ControllerChange { .. }) {
                changes += 1;
            }
        }
        assert_eq!(changes, 1);
    }

    #[tokio::test]
    async fn test_unregister() {
        let (container, _rx) = ServiceWorkerContainer::new();
        let scope = container
            .register(
                "https://site.test/sw.js",
                RegistrationOptions::default(),
                Arc::new(LabelWorker::new("v1")),
            )
            .await
            .unwrap();
        let page = container.connect_client("https://site.test/").await.unwrap();
        assert!(page.controller.is_some());

        assert!(container.unregister(&scope).await.unwrap());
        assert!(!container.unregister(&scope).await.unwrap());
        assert!(container.get_registrations().await.is_empty());
        let outcome = container
            .handle_fetch(Request::parse("https://site.test/").unwrap())
            .await;
        assert!(outcome.is_pass_through());

        let clients = container.clients.read().await;
        assert!(clients.get(&page.id).unwrap().controller.is_none());
    }

    #[tokio::test]
    async fn test_register_rejects_bad_scripts() {
        let (container, _rx) = ServiceWorkerContainer::new();
        let worker = Arc::new(LabelWorker::new("v1"));
        assert!(matches!(
            container
                .register("not a url", RegistrationOptions::default(), worker.clone())
                .await,
            Err(ServiceWorkerError::RegistrationFailed(_))
        ));
        assert!(matches!(
            container
                .register("file:///tmp/sw.js", RegistrationOptions::default(), worker)
                .await,
            Err(ServiceWorkerError::RegistrationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_get_registration_for_url() {
        let (container, _rx) = ServiceWorkerContainer::new();
        container
            .register(
                "https://site.test/sw.js",
                RegistrationOptions::default(),
                Arc::new(LabelWorker::new("v1")),
            )
            .await
            .unwrap();

        assert_eq!(
            container.get_registration("https://site.test/contact").await.as_deref(),
            Some("https://site.test/")
        );
        assert_eq!(container.get_registration("https://elsewhere.test/").await, None);
    }

    #[test]
    fn test_clients_match_all() {
        let mut clients = Clients::new();
        let a = clients.open_window(Url::parse("https://site.test/").unwrap(), None);
        clients.open_window(Url::parse("https://site.test/blog").unwrap(), None);

        assert_eq!(clients.match_all(true).len(), 2);
        assert!(clients.match_all(false).is_empty());

        let worker = ServiceWorkerId::new();
        let changed = clients.claim(worker, |url| url.path() == "/");
        assert_eq!(changed, vec![a.id.clone()]);
        assert_eq!(clients.match_all(false).len(), 1);
        assert!(clients.remove(&a.id).is_some());
        assert_eq!(clients.len(), 1);
    }
}
