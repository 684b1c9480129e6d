//! Extendable events handed to worker handlers.
//!
//! Every event carries a [`WaitUntil`]. Work spawned through it outlives the
//! handler call and is awaited by the host on [`PendingTasks::settle`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use swkit_net::Request;
use tokio::task::JoinSet;
use tracing::{trace, warn};

use crate::push::Notification;

// ==================== WaitUntil ====================

/// Tasks still running, plus a count of finished ones not yet reported.
#[derive(Debug, Default)]
struct TaskSet {
    running: JoinSet<()>,
    finished: usize,
}

impl TaskSet {
    /// Drop the handles of tasks that already finished.
    fn reap(&mut self) {
        while let Some(result) = self.running.try_join_next() {
            if let Err(e) = result {
                warn!(error = %e, "Background task failed");
            }
            self.finished += 1;
        }
    }
}

fn lock(tasks: &Mutex<TaskSet>) -> MutexGuard<'_, TaskSet> {
    tasks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps background work alive past the end of a handler.
#[derive(Debug, Clone)]
pub struct WaitUntil {
    tasks: Option<Arc<Mutex<TaskSet>>>,
}

impl WaitUntil {
    /// A handle with no host behind it. Spawned tasks run detached.
    pub fn detached() -> Self {
        Self { tasks: None }
    }

    /// Spawn `future` on the runtime and register it with the host.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match &self.tasks {
            Some(tasks) => {
                let mut tasks = lock(tasks);
                tasks.reap();
                tasks.running.spawn(future);
            }
            None => {
                trace!("No host is tracking background work; task runs detached");
                tokio::spawn(future);
            }
        }
    }
}

/// Host side of [`WaitUntil`]: tracks spawned tasks until settled.
///
/// Finished tasks are reaped whenever new work is spawned, so only running
/// tasks hold a handle.
#[derive(Debug, Default)]
pub struct PendingTasks {
    tasks: Arc<Mutex<TaskSet>>,
}

impl PendingTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle to pass into an event.
    pub fn handle(&self) -> WaitUntil {
        WaitUntil {
            tasks: Some(Arc::clone(&self.tasks)),
        }
    }

    /// Number of tasks still running.
    pub fn in_flight(&self) -> usize {
        let mut tasks = lock(&self.tasks);
        tasks.reap();
        tasks.running.len()
    }

    /// Await every registered task, including tasks registered while
    /// settling. Returns how many finished since the last settle.
    pub async fn settle(&self) -> usize {
        let mut settled = 0;
        loop {
            let mut batch = {
                let mut tasks = lock(&self.tasks);
                settled += std::mem::take(&mut tasks.finished);
                std::mem::take(&mut tasks.running)
            };
            if batch.is_empty() {
                return settled;
            }
            while let Some(result) = batch.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Background task failed");
                }
                settled += 1;
            }
        }
    }
}

// ==================== Lifecycle Events ====================

/// Install event.
#[derive(Debug)]
pub struct InstallEvent {
    wait_until: WaitUntil,
    skip_waiting: AtomicBool,
}

impl InstallEvent {
    pub fn new(wait_until: WaitUntil) -> Self {
        Self {
            wait_until,
            skip_waiting: AtomicBool::new(false),
        }
    }

    pub fn wait_until(&self) -> &WaitUntil {
        &self.wait_until
    }

    /// Activate as soon as install completes instead of waiting for the
    /// previous version's clients to go away.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }
}

/// Activate event.
#[derive(Debug)]
pub struct ActivateEvent {
    wait_until: WaitUntil,
    claim: AtomicBool,
}

impl ActivateEvent {
    pub fn new(wait_until: WaitUntil) -> Self {
        Self {
            wait_until,
            claim: AtomicBool::new(false),
        }
    }

    pub fn wait_until(&self) -> &WaitUntil {
        &self.wait_until
    }

    /// Take control of every open client in scope once activation ends.
    pub fn claim_clients(&self) {
        self.claim.store(true, Ordering::SeqCst);
    }

    pub fn claim_requested(&self) -> bool {
        self.claim.load(Ordering::SeqCst)
    }
}

// ==================== Functional Events ====================

/// A fetch event.
#[derive(Debug)]
pub struct FetchEvent {
    /// The intercepted request.
    pub request: Request,

    /// Client that issued the request.
    pub client_id: Option<String>,

    wait_until: WaitUntil,
}

impl FetchEvent {
    pub fn new(request: Request, wait_until: WaitUntil) -> Self {
        Self {
            request,
            client_id: None,
            wait_until,
        }
    }

    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn wait_until(&self) -> &WaitUntil {
        &self.wait_until
    }
}

/// A background sync event.
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub tag: String,
    /// Set when the host will not retry this tag again.
    pub last_chance: bool,
}

/// A push event.
#[derive(Debug, Clone, Default)]
pub struct PushEvent {
    /// Raw payload; `None` for a push without data.
    pub data: Option<Bytes>,
}

impl PushEvent {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: Some(data.into()),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// A click on a shown notification.
#[derive(Debug, Clone)]
pub struct NotificationClickEvent {
    pub notification: Notification,
    /// Action button that was clicked; `None` for the notification body.
    pub action: Option<String>,
}
