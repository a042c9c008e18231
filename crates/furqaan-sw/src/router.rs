//! Request classification: which strategy, if any, answers a fetch.

use http::Method;
use furqaan_net::Request;
use tracing::trace;
use url::Url;

/// How a handled request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Serve from cache; consult the network only on a miss.
    CacheFirst,
    /// Try the network; fall back to cache only on failure.
    NetworkFirst,
}

/// Why a request was left to the browser's default network path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughReason {
    /// Method other than GET.
    NonGet,
    /// Different scheme, host or port than the controlled origin.
    CrossOrigin,
    /// No active worker controls the origin.
    NotActive,
}

/// Routing decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Passthrough(PassthroughReason),
    Handle(Strategy),
}

/// Classifies intercepted requests.
///
/// Rules, first match wins:
/// 1. the URL contains a static asset entry: cache-first
/// 2. the `Accept` header mentions `text/html`: network-first
/// 3. anything else: cache-first
///
/// Rule 1 is plain substring containment against the entries as written, so
/// an entry of `/` matches every same-origin URL.
#[derive(Debug, Clone)]
pub struct Router {
    origin: Url,
    static_patterns: Vec<String>,
}

impl Router {
    pub fn new(origin: Url, static_assets: &[String]) -> Self {
        Self {
            origin,
            static_patterns: static_assets.to_vec(),
        }
    }

    /// Whether the URL matches an entry of the static asset list.
    pub fn is_static_asset(&self, url: &Url) -> bool {
        let url = url.as_str();
        self.static_patterns
            .iter()
            .any(|pattern| url.contains(pattern.as_str()))
    }

    /// Decide how to handle `request`.
    pub fn route(&self, request: &Request) -> Route {
        if !request.is_same_origin(&self.origin) {
            return Route::Passthrough(PassthroughReason::CrossOrigin);
        }
        if request.method != Method::GET {
            return Route::Passthrough(PassthroughReason::NonGet);
        }

        let strategy = if self.is_static_asset(&request.url) {
            Strategy::CacheFirst
        } else if request.accepts_html() {
            Strategy::NetworkFirst
        } else {
            Strategy::CacheFirst
        };

        trace!(url = %request.url, ?strategy, "Request routed");
        Route::Handle(strategy)
    }
}
