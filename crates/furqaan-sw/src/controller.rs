//! The offline cache controller.
//!
//! One controller is one worker version. The hosting runtime turns platform
//! events into calls on it: [`CacheController::on_install`],
//! [`CacheController::on_activate`], [`CacheController::on_fetch`],
//! [`CacheController::on_push`], [`CacheController::on_sync`] and
//! [`CacheController::on_notification_click`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use furqaan_net::{Fetcher, Request, Response};
use futures::future::try_join_all;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStorage, SharedCacheStorage};
use crate::clients::{Client, Clients, SharedClients};
use crate::config::{BucketNames, CacheConfig};
use crate::error::{ServiceWorkerError, SwResult};
use crate::lifecycle::WorkerState;
use crate::notifications::{
    Notification, NotificationCenter, NotificationId, NotificationOptions, PushPayload,
    SharedNotifications,
};
use crate::router::{PassthroughReason, Route, Router, Strategy};
use crate::sync::{BackgroundSyncHook, LoggingSyncHook};

// ==================== Scope ====================

/// Platform handles a worker runs against.
///
/// Everything here is shared by every version registered for the origin.
#[derive(Clone)]
pub struct WorkerGlobalScope {
    pub caches: SharedCacheStorage,
    pub clients: SharedClients,
    pub notifications: SharedNotifications,
    pub fetcher: Arc<dyn Fetcher>,
    pub sync_hook: Arc<dyn BackgroundSyncHook>,
}

impl WorkerGlobalScope {
    /// Scope with in-memory caches and the logging sync hook.
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            caches: CacheStorage::new().shared(),
            clients: Clients::new().shared(),
            notifications: NotificationCenter::new().shared(),
            fetcher,
            sync_hook: Arc::new(LoggingSyncHook),
        }
    }

    /// Use the given cache storage.
    pub fn with_caches(mut self, caches: SharedCacheStorage) -> Self {
        self.caches = caches;
        self
    }

    /// Use the given background sync hook.
    pub fn with_sync_hook(mut self, hook: Arc<dyn BackgroundSyncHook>) -> Self {
        self.sync_hook = hook;
        self
    }
}

// ==================== Outcomes ====================

/// Where a served response came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache { bucket: String },
    OfflineFallback,
}

/// A response produced by the worker.
#[derive(Debug, Clone)]
pub struct ServedResponse {
    pub response: Response,
    pub source: ResponseSource,
}

impl ServedResponse {
    fn network(response: Response) -> Self {
        Self {
            response,
            source: ResponseSource::Network,
        }
    }
}

/// Result of intercepting a fetch.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The worker declined; the browser performs the request itself.
    Passthrough(PassthroughReason),
    /// The worker answered.
    Respond(ServedResponse),
}

impl FetchOutcome {
    /// The response, if the worker answered.
    pub fn response(&self) -> Option<&ServedResponse> {
        match self {
            Self::Respond(served) => Some(served),
            Self::Passthrough(_) => None,
        }
    }
}

/// What activation cleaned up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Stale buckets removed.
    pub deleted: Vec<String>,
    /// Stale buckets that could not be removed.
    pub failed: Vec<String>,
    /// Clients newly controlled by this version.
    pub claimed: usize,
}

// ==================== Controller ====================

/// Offline cache controller for one worker version.
pub struct CacheController {
    config: CacheConfig,
    origin: Url,
    buckets: BucketNames,
    fallback_key: String,
    router: Router,
    scope: WorkerGlobalScope,
    state: Arc<RwLock<WorkerState>>,
    skip_waiting: AtomicBool,
    pending_writes: Mutex<JoinSet<()>>,
}

impl CacheController {
    /// Create a controller for `config`, validating it first.
    pub fn new(config: CacheConfig, scope: WorkerGlobalScope) -> SwResult<Self> {
        config.validate()?;
        let origin = config.origin_url()?;
        let fallback_key = Request::get(config.resolve(&config.offline_fallback)?).cache_key();
        let router = Router::new(origin.clone(), &config.static_assets);

        Ok(Self {
            buckets: config.bucket_names(),
            config,
            origin,
            fallback_key,
            router,
            scope,
            state: Arc::new(RwLock::new(WorkerState::Unregistered)),
            skip_waiting: AtomicBool::new(false),
            pending_writes: Mutex::new(JoinSet::new()),
        })
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn buckets(&self) -> &BucketNames {
        &self.buckets
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Whether a successful install asked to skip the waiting phase.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::Acquire)
    }

    async fn transition(&self, next: WorkerState) -> SwResult<()> {
        let mut state = self.state.write().await;
        state.transition(next)?;
        debug!(version = %self.config.version, state = ?next, "Worker state changed");
        Ok(())
    }

    // ---------- install ----------

    /// Install: populate the static bucket with every static asset, or nothing.
    ///
    /// On failure the worker becomes redundant and storage is untouched.
    pub async fn on_install(&self) -> SwResult<()> {
        self.transition(WorkerState::Installing).await?;
        info!(version = %self.config.version, "Installing");

        match self.populate_static_bucket().await {
            Ok(count) => {
                self.transition(WorkerState::Installed).await?;
                if self.config.skip_waiting {
                    self.skip_waiting.store(true, Ordering::Release);
                }
                info!(
                    version = %self.config.version,
                    bucket = %self.buckets.static_bucket,
                    assets = count,
                    "Static assets cached"
                );
                Ok(())
            }
            Err(e) => {
                warn!(version = %self.config.version, error = %e, "Install failed");
                self.transition(WorkerState::Redundant).await?;
                Err(e)
            }
        }
    }

    async fn populate_static_bucket(&self) -> SwResult<usize> {
        let urls = self.config.static_asset_urls()?;
        let version = &self.config.version;
        let fetcher = &self.scope.fetcher;

        let fetches = urls.into_iter().map(|url| async move {
            let request = Request::get(url);
            let response = fetcher.fetch(&request).await.map_err(|e| {
                ServiceWorkerError::InstallFailed {
                    version: version.clone(),
                    reason: format!("{}: {}", request.url, e),
                }
            })?;
            if !response.ok() {
                return Err(ServiceWorkerError::InstallFailed {
                    version: version.clone(),
                    reason: format!("{} returned {}", request.url, response.status),
                });
            }
            trace!(url = %request.url, "Static asset fetched");
            Ok::<_, ServiceWorkerError>((
                request.cache_key(),
                CacheEntry::from_response(&request, &response),
            ))
        });

        let entries = try_join_all(fetches).await?;
        let count = entries.len();
        self.scope
            .caches
            .write()
            .await
            .put_all(&self.buckets.static_bucket, entries)
            .await
            .map_err(|e| ServiceWorkerError::InstallFailed {
                version: version.clone(),
                reason: e.to_string(),
            })?;
        Ok(count)
    }

    // ---------- activate ----------

    /// Activate: purge buckets of other versions, then claim every client.
    ///
    /// Delete failures are logged and reported; they never stop activation.
    pub async fn on_activate(&self) -> SwResult<ActivationReport> {
        self.transition(WorkerState::Activating).await?;
        info!(version = %self.config.version, "Activating");

        let mut report = ActivationReport::default();
        {
            let mut caches = self.scope.caches.write().await;
            let stale: Vec<String> = caches
                .keys()
                .into_iter()
                .filter(|name| !self.buckets.contains(name))
                .collect();

            for name in stale {
                match caches.delete(&name).await {
                    Ok(_) => {
                        info!(bucket = %name, "Deleted old cache");
                        report.deleted.push(name);
                    }
                    Err(e) => {
                        warn!(bucket = %name, error = %e, "Failed to delete old cache");
                        report.failed.push(name);
                    }
                }
            }
        }

        report.claimed = self.scope.clients.write().await.claim(&self.config.version);
        self.transition(WorkerState::Activated).await?;
        info!(
            version = %self.config.version,
            deleted = report.deleted.len(),
            claimed = report.claimed,
            "Activated"
        );
        Ok(report)
    }

    /// Bring back a version that was already installed in persisted storage.
    ///
    /// Used after a host restart: the static bucket is the proof of a past
    /// install, so no assets are fetched and no buckets are purged.
    pub async fn resume(&self) -> SwResult<()> {
        if !self.scope.caches.read().await.has(&self.buckets.static_bucket) {
            return Err(ServiceWorkerError::NotFound(
                self.buckets.static_bucket.clone(),
            ));
        }
        for next in [
            WorkerState::Installing,
            WorkerState::Installed,
            WorkerState::Activating,
            WorkerState::Activated,
        ] {
            self.transition(next).await?;
        }
        info!(version = %self.config.version, "Resumed from persisted caches");
        Ok(())
    }

    /// Retire this version; it stops answering fetches.
    pub async fn mark_redundant(&self) {
        let mut state = self.state.write().await;
        if state.transition(WorkerState::Redundant).is_ok() {
            debug!(version = %self.config.version, "Worker is redundant");
        }
    }

    // ---------- fetch ----------

    /// Intercept one request.
    pub async fn on_fetch(&self, request: &Request) -> SwResult<FetchOutcome> {
        if !self.state().await.is_active() {
            return Ok(FetchOutcome::Passthrough(PassthroughReason::NotActive));
        }

        match self.router.route(request) {
            Route::Passthrough(reason) => {
                trace!(url = %request.url, ?reason, "Not intercepted");
                Ok(FetchOutcome::Passthrough(reason))
            }
            Route::Handle(Strategy::CacheFirst) => {
                self.cache_first(request).await.map(FetchOutcome::Respond)
            }
            Route::Handle(Strategy::NetworkFirst) => {
                self.network_first(request).await.map(FetchOutcome::Respond)
            }
        }
    }

    async fn cache_first(&self, request: &Request) -> SwResult<ServedResponse> {
        if let Some(hit) = self.match_cached(request).await? {
            return Ok(hit);
        }

        match self.scope.fetcher.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    self.store_dynamic(request, &response).await;
                }
                Ok(ServedResponse::network(response))
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Cache-first failed");
                if request.accepts_html() {
                    self.offline_fallback().await
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn network_first(&self, request: &Request) -> SwResult<ServedResponse> {
        match self.scope.fetcher.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    self.store_dynamic(request, &response).await;
                }
                Ok(ServedResponse::network(response))
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network-first failed, trying cache");
                if let Some(hit) = self.match_cached(request).await? {
                    return Ok(hit);
                }
                if request.accepts_html() {
                    self.offline_fallback().await
                } else {
                    Err(e.into())
                }
            }
        }
    }

    /// Look the request up in the live buckets: static, dynamic, then api.
    async fn match_cached(&self, request: &Request) -> SwResult<Option<ServedResponse>> {
        let key = request.cache_key();
        let caches = self.scope.caches.read().await;
        match caches.match_ordered(&self.buckets.search_order(), &key) {
            Some((bucket, entry)) => {
                trace!(url = %request.url, bucket, "Cache hit");
                Ok(Some(ServedResponse {
                    response: entry.to_response()?,
                    source: ResponseSource::Cache {
                        bucket: bucket.to_string(),
                    },
                }))
            }
            None => Ok(None),
        }
    }

    async fn offline_fallback(&self) -> SwResult<ServedResponse> {
        let caches = self.scope.caches.read().await;
        let entry = caches
            .match_in(&self.buckets.static_bucket, &self.fallback_key)
            .ok_or_else(|| ServiceWorkerError::FallbackMissing(self.config.offline_fallback.clone()))?;
        info!(fallback = %self.config.offline_fallback, "Serving offline fallback");
        Ok(ServedResponse {
            response: entry.to_response()?,
            source: ResponseSource::OfflineFallback,
        })
    }

    /// Queue a copy of `response` into the dynamic bucket without waiting for it.
    ///
    /// The copy is dropped if this version stopped being active before the
    /// write got the storage lock, so a purged bucket is never recreated.
    async fn store_dynamic(&self, request: &Request, response: &Response) {
        let caches = Arc::clone(&self.scope.caches);
        let state = Arc::clone(&self.state);
        let bucket = self.buckets.dynamic_bucket.clone();
        let key = request.cache_key();
        let entry = CacheEntry::from_response(request, response);

        let mut pending = self.pending_writes.lock().await;
        while let Some(done) = pending.try_join_next() {
            if let Err(e) = done {
                warn!(error = %e, "Cache write task failed");
            }
        }
        pending.spawn(async move {
            let staged = {
                let mut storage = caches.write().await;
                if !state.read().await.is_active() {
                    debug!(bucket = %bucket, key = %key, "Worker retired, cache write dropped");
                    return;
                }
                storage.stage_put(&bucket, &key, entry)
            };
            let written = match staged {
                Ok(write) => write.commit(&caches).await,
                Err(e) => Err(e),
            };
            match written {
                Ok(()) => trace!(bucket = %bucket, key = %key, "Cached response"),
                Err(e) => warn!(bucket = %bucket, key = %key, error = %e, "Cache write failed"),
            }
        });
    }

    /// Wait for every queued cache write to finish.
    pub async fn settle(&self) {
        let mut pending = std::mem::take(&mut *self.pending_writes.lock().await);
        while let Some(done) = pending.join_next().await {
            if let Err(e) = done {
                warn!(error = %e, "Cache write task failed");
            }
        }
    }

    // ---------- push / sync ----------

    /// Show a notification for a push message.
    ///
    /// Missing or malformed payloads are ignored.
    pub async fn on_push(&self, data: Option<&[u8]>) -> SwResult<Option<Notification>> {
        let Some(data) = data else {
            debug!("Push without data ignored");
            return Ok(None);
        };
        let Some(payload) = PushPayload::parse(data) else {
            warn!(len = data.len(), "Ignoring malformed push payload");
            return Ok(None);
        };

        let options = NotificationOptions::for_push(&payload, &self.config.notification);
        let notification = self
            .scope
            .notifications
            .write()
            .await
            .show(&payload.title, options);
        info!(title = %payload.title, "Push notification shown");
        Ok(Some(notification))
    }

    /// Close the clicked notification and open or focus the site root.
    pub async fn on_notification_click(&self, id: NotificationId) -> SwResult<Client> {
        if self.scope.notifications.write().await.close(id).is_none() {
            debug!(id = id.raw(), "Clicked notification was already closed");
        }
        let target = self.config.resolve(&self.config.notification.open_url)?;
        self.scope.clients.write().await.open_window(target)
    }

    /// Run the sync hook if `tag` is the configured sync tag. Returns whether it ran.
    pub async fn on_sync(&self, tag: &str) -> SwResult<bool> {
        if tag != self.config.sync_tag {
            debug!(tag, "Ignoring unknown sync tag");
            return Ok(false);
        }
        self.scope.sync_hook.run(tag).await?;
        Ok(true)
    }
}

impl std::fmt::Debug for CacheController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheController")
            .field("version", &self.config.version)
            .field("origin", &self.origin.as_str())
            .field("buckets", &self.buckets)
            .finish_non_exhaustive()
    }
}
