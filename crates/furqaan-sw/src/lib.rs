//! # Furqaan Offline Worker
//!
//! The service worker core of the Furqaan site: versioned cache buckets, the
//! install/activate lifecycle and per-request caching strategies.
//!
//! ## Features
//!
//! - **Lifecycle**: atomic static-asset install, stale bucket purge on activate
//! - **Routing**: cache-first for assets, network-first for HTML pages
//! - **Offline fallback**: a pre-cached error page for HTML requests
//! - **Cache API**: named buckets, optionally persisted to disk
//! - **Push / sync**: notification display and a background sync hook
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (per origin)
//!     │
//!     └── Registration
//!             ├── installing (CacheController)
//!             ├── waiting    (CacheController)
//!             └── active     (CacheController)
//!                     ├── Router ── Strategy::{CacheFirst, NetworkFirst}
//!                     └── WorkerGlobalScope
//!                             ├── CacheStorage ── Cache ── key → CacheEntry
//!                             ├── Clients
//!                             ├── NotificationCenter
//!                             └── Fetcher (network)
//! ```

pub mod cache;
pub mod clients;
pub mod config;
pub mod container;
pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod notifications;
pub mod router;
pub mod sync;

pub use cache::{Cache, CacheEntry, CacheStorage, CachedHeader, PendingWrite, SharedCacheStorage};
pub use clients::{Client, ClientType, Clients, SharedClients};
pub use config::{BucketKind, BucketNames, CacheConfig, NotificationConfig};
pub use container::{ContainerEvent, Registration, ServiceWorkerContainer};
pub use controller::{
    ActivationReport, CacheController, FetchOutcome, ResponseSource, ServedResponse,
    WorkerGlobalScope,
};
pub use error::{ServiceWorkerError, SwResult};
pub use lifecycle::WorkerState;
pub use notifications::{
    Notification, NotificationCenter, NotificationId, NotificationOptions, PushPayload,
};
pub use router::{PassthroughReason, Route, Router, Strategy};
pub use sync::{BackgroundSyncHook, LoggingSyncHook};
