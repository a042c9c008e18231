//! Shared fixtures for the offline worker integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use furqaan_net::{Fetcher, NetError, Request, Response};
use furqaan_sw::{
    CacheConfig, CacheController, ContainerEvent, ServiceWorkerContainer, WorkerGlobalScope,
};
use http::StatusCode;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;

pub const ORIGIN: &str = "https://furqaan.example";
pub const FALLBACK_PAGE: &str = "<h1>You are offline</h1>";

/// In-memory network with per-URL responses, an offline switch and call counting.
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    offline: AtomicBool,
    calls: AtomicUsize,
    log: Mutex<Vec<String>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve `body` with `status` for `path_or_url` (paths are resolved against [`ORIGIN`]).
    pub fn serve(&self, path_or_url: &str, status: u16, body: &[u8]) {
        self.routes
            .lock()
            .unwrap()
            .insert(absolute(path_or_url), (status, body.to_vec()));
    }

    /// Hold every fetch of `path_or_url` until the returned gate is notified.
    pub fn hold(&self, path_or_url: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(absolute(path_or_url), Arc::clone(&gate));
        gate
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Total fetch attempts, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fetch attempts for one URL.
    pub fn calls_to(&self, path_or_url: &str) -> usize {
        let url = absolute(path_or_url);
        self.log.lock().unwrap().iter().filter(|u| **u == url).count()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(request.url.to_string());

        let gate = self.gates.lock().unwrap().get(request.url.as_str()).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::Unreachable(request.url.to_string()));
        }

        let route = self.routes.lock().unwrap().get(request.url.as_str()).cloned();
        Ok(match route {
            Some((status, body)) => Response::new(
                request.url.clone(),
                StatusCode::from_u16(status).unwrap(),
                body,
            ),
            None => Response::new(request.url.clone(), StatusCode::NOT_FOUND, Vec::new()),
        })
    }
}

pub fn absolute(path_or_url: &str) -> String {
    url::Url::parse(ORIGIN)
        .unwrap()
        .join(path_or_url)
        .unwrap()
        .to_string()
}

/// Config with unprefixed bucket names (`static-<version>`).
pub fn config(version: &str, assets: &[&str]) -> CacheConfig {
    CacheConfig {
        origin: ORIGIN.to_string(),
        version: version.to_string(),
        cache_prefix: String::new(),
        static_assets: assets.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

/// Network serving a small site: home, stylesheet, fallback page and a logo.
pub fn site() -> Arc<ScriptedFetcher> {
    let fetcher = ScriptedFetcher::new();
    fetcher.serve("/", 200, b"<h1>Home</h1>");
    fetcher.serve("/style.css", 200, b"body{}");
    fetcher.serve("/404.html", 200, FALLBACK_PAGE.as_bytes());
    fetcher.serve("/logo.png", 200, b"\x89PNG-logo");
    fetcher.serve("/about", 200, b"<h1>About</h1>");
    fetcher
}

pub fn scope(fetcher: &Arc<ScriptedFetcher>) -> WorkerGlobalScope {
    WorkerGlobalScope::new(fetcher.clone())
}

pub fn container(
    fetcher: &Arc<ScriptedFetcher>,
) -> (ServiceWorkerContainer, UnboundedReceiver<ContainerEvent>) {
    ServiceWorkerContainer::new(scope(fetcher))
}

/// Install and activate `config` on a fresh container.
pub async fn active(
    fetcher: &Arc<ScriptedFetcher>,
    config: CacheConfig,
) -> (ServiceWorkerContainer, Arc<CacheController>) {
    let (container, _events) = container(fetcher);
    let controller = container.register(config).await.unwrap();
    (container, controller)
}

pub fn get(path_or_url: &str) -> Request {
    Request::get_str(&absolute(path_or_url)).unwrap()
}

pub fn page(path: &str) -> Request {
    get(path).accept("text/html,application/xhtml+xml")
}

/// Route `request` and return the answered response, panicking on passthrough.
pub async fn respond(controller: &CacheController, request: &Request) -> furqaan_sw::ServedResponse {
    controller
        .on_fetch(request)
        .await
        .unwrap()
        .response()
        .cloned()
        .expect("request should be answered by the worker")
}
