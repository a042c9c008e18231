//! Per-origin host for controller versions (`navigator.serviceWorker`).

use std::sync::Arc;
use std::time::Instant;

use furqaan_net::Request;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::clients::Client;
use crate::config::CacheConfig;
use crate::controller::{ActivationReport, CacheController, FetchOutcome, WorkerGlobalScope};
use crate::error::{ServiceWorkerError, SwResult};
use crate::lifecycle::WorkerState;
use crate::notifications::{Notification, NotificationId};
use crate::router::PassthroughReason;

/// Container events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEvent {
    /// A new version started installing.
    UpdateFound { version: String },
    /// A version changed state.
    StateChange { version: String, state: WorkerState },
    /// Clients are now controlled by `version`.
    ControllerChange { version: String },
}

/// Installing, waiting and active slots of the origin's registration.
#[derive(Debug, Default)]
pub struct Registration {
    /// Installing worker.
    pub installing: Option<Arc<CacheController>>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<Arc<CacheController>>,

    /// Active worker.
    pub active: Option<Arc<CacheController>>,

    /// Last time a version was registered.
    pub last_update_check: Option<Instant>,
}

/// Service worker container for one origin.
pub struct ServiceWorkerContainer {
    scope: WorkerGlobalScope,
    registration: RwLock<Registration>,
    event_tx: mpsc::UnboundedSender<ContainerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a new container.
    pub fn new(scope: WorkerGlobalScope) -> (Self, mpsc::UnboundedReceiver<ContainerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                scope,
                registration: RwLock::new(Registration::default()),
                event_tx,
            },
            event_rx,
        )
    }

    /// Shared platform handles.
    pub fn scope(&self) -> &WorkerGlobalScope {
        &self.scope
    }

    fn emit(&self, event: ContainerEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Register a version: install it and, if it asks to skip waiting, activate it.
    ///
    /// Registering the version that is already active is a no-op. A failed
    /// install leaves the current active version serving.
    pub async fn register(&self, config: CacheConfig) -> SwResult<Arc<CacheController>> {
        {
            let registration = self.registration.read().await;
            if let Some(active) = registration.active.as_ref() {
                if active.version() == config.version {
                    return Ok(Arc::clone(active));
                }
            }
        }

        let controller = Arc::new(CacheController::new(config, self.scope.clone())?);
        let version = controller.version().to_string();
        {
            let mut registration = self.registration.write().await;
            if let Some(previous) = registration.installing.replace(Arc::clone(&controller)) {
                previous.mark_redundant().await;
            }
            registration.last_update_check = Some(Instant::now());
        }
        self.emit(ContainerEvent::UpdateFound {
            version: version.clone(),
        });

        let installed = controller.on_install().await;
        {
            let mut registration = self.registration.write().await;
            if registration
                .installing
                .as_ref()
                .is_some_and(|c| Arc::ptr_eq(c, &controller))
            {
                registration.installing = None;
            }
            if installed.is_ok() {
                if let Some(previous) = registration.waiting.replace(Arc::clone(&controller)) {
                    previous.mark_redundant().await;
                }
            }
        }
        self.emit(ContainerEvent::StateChange {
            version: version.clone(),
            state: controller.state().await,
        });

        if let Err(e) = installed {
            warn!(version = %version, error = %e, "Registration failed; keeping current worker");
            return Err(e);
        }

        if controller.skip_waiting_requested() {
            self.activate_waiting().await?;
        }
        Ok(controller)
    }

    /// Restore a version whose caches survived a restart, without reinstalling.
    pub async fn resume(&self, config: CacheConfig) -> SwResult<Arc<CacheController>> {
        let controller = Arc::new(CacheController::new(config, self.scope.clone())?);
        controller.resume().await?;

        let mut registration = self.registration.write().await;
        if let Some(old) = registration.active.replace(Arc::clone(&controller)) {
            old.mark_redundant().await;
        }
        self.emit(ContainerEvent::ControllerChange {
            version: controller.version().to_string(),
        });
        Ok(controller)
    }

    /// Activate the waiting version, retiring the current active one.
    pub async fn activate_waiting(&self) -> SwResult<ActivationReport> {
        let waiting = self
            .registration
            .write()
            .await
            .waiting
            .take()
            .ok_or_else(|| ServiceWorkerError::StateError("no waiting worker".to_string()))?;

        // The outgoing version must stop caching before its buckets are purged.
        if let Some(outgoing) = self.active().await {
            outgoing.mark_redundant().await;
        }
        let report = waiting.on_activate().await?;

        let mut registration = self.registration.write().await;
        if let Some(old) = registration.active.replace(Arc::clone(&waiting)) {
            old.mark_redundant().await;
        }
        info!(version = %waiting.version(), "Controller changed");
        self.emit(ContainerEvent::StateChange {
            version: waiting.version().to_string(),
            state: WorkerState::Activated,
        });
        self.emit(ContainerEvent::ControllerChange {
            version: waiting.version().to_string(),
        });
        Ok(report)
    }

    /// The active controller, if any.
    pub async fn active(&self) -> Option<Arc<CacheController>> {
        self.registration.read().await.active.clone()
    }

    /// Version of the active controller.
    pub async fn active_version(&self) -> Option<String> {
        self.active().await.map(|c| c.version().to_string())
    }

    /// The waiting controller, if any.
    pub async fn waiting(&self) -> Option<Arc<CacheController>> {
        self.registration.read().await.waiting.clone()
    }

    async fn require_active(&self) -> SwResult<Arc<CacheController>> {
        self.active()
            .await
            .ok_or_else(|| ServiceWorkerError::StateError("no active worker".to_string()))
    }

    /// Route a page request through the active version.
    pub async fn handle_fetch(&self, request: &Request) -> SwResult<FetchOutcome> {
        match self.active().await {
            Some(controller) => controller.on_fetch(request).await,
            None => Ok(FetchOutcome::Passthrough(PassthroughReason::NotActive)),
        }
    }

    /// Deliver a push message.
    pub async fn dispatch_push(&self, data: Option<&[u8]>) -> SwResult<Option<Notification>> {
        self.require_active().await?.on_push(data).await
    }

    /// Deliver a sync event.
    pub async fn dispatch_sync(&self, tag: &str) -> SwResult<bool> {
        self.require_active().await?.on_sync(tag).await
    }

    /// Deliver a notification click.
    pub async fn dispatch_notification_click(&self, id: NotificationId) -> SwResult<Client> {
        self.require_active().await?.on_notification_click(id).await
    }

    /// Wait for the active version's queued cache writes.
    pub async fn settle(&self) {
        if let Some(active) = self.active().await {
            active.settle().await;
        }
    }

    /// Unregister every version. The origin becomes uncontrolled.
    pub async fn unregister(&self) -> bool {
        let mut registration = self.registration.write().await;
        let mut any = false;
        for slot in [
            registration.installing.take(),
            registration.waiting.take(),
            registration.active.take(),
        ]
        .into_iter()
        .flatten()
        {
            slot.mark_redundant().await;
            any = true;
        }
        any
    }
}
