//! Worker configuration.
//!
//! Everything the worker used to keep in script-level constants: the build
//! version, bucket naming, the static asset list and the notification look.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::{ServiceWorkerError, SwResult};

/// Kind of cache bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketKind {
    /// Build-time assets, filled at install.
    Static,
    /// Runtime assets, filled on first use.
    Dynamic,
    /// Reserved for API responses.
    Api,
}

impl BucketKind {
    /// Lookup priority used by cache matching.
    pub const SEARCH_ORDER: [BucketKind; 3] = [Self::Static, Self::Dynamic, Self::Api];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
            Self::Api => "api",
        }
    }
}

/// The three live bucket names for one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketNames {
    pub static_bucket: String,
    pub dynamic_bucket: String,
    pub api_bucket: String,
}

impl BucketNames {
    fn new(prefix: &str, version: &str) -> Self {
        let name = |kind: BucketKind| {
            if prefix.is_empty() {
                format!("{}-{}", kind.as_str(), version)
            } else {
                format!("{}-{}-{}", prefix, kind.as_str(), version)
            }
        };
        Self {
            static_bucket: name(BucketKind::Static),
            dynamic_bucket: name(BucketKind::Dynamic),
            api_bucket: name(BucketKind::Api),
        }
    }

    /// Name of the bucket of the given kind.
    pub fn get(&self, kind: BucketKind) -> &str {
        match kind {
            BucketKind::Static => &self.static_bucket,
            BucketKind::Dynamic => &self.dynamic_bucket,
            BucketKind::Api => &self.api_bucket,
        }
    }

    /// Whether `name` is one of the live buckets.
    pub fn contains(&self, name: &str) -> bool {
        BucketKind::SEARCH_ORDER
            .iter()
            .any(|kind| self.get(*kind) == name)
    }

    /// Bucket names in lookup order.
    pub fn search_order(&self) -> [&str; 3] {
        BucketKind::SEARCH_ORDER.map(|kind| self.get(kind))
    }
}

/// Notification presentation for push messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Icon shown with every notification.
    pub icon: String,
    /// Badge shown on platforms that support it.
    pub badge: String,
    /// Vibration pattern in milliseconds.
    pub vibrate: Vec<u32>,
    /// Page opened or focused when a notification is clicked.
    pub open_url: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            icon: "/assets/images/logo.png".to_string(),
            badge: "/assets/images/logo.png".to_string(),
            vibrate: vec![100, 50, 100],
            open_url: "/".to_string(),
        }
    }
}

/// Offline cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Origin the worker controls (scheme, host and port).
    pub origin: String,

    /// Build version used as the bucket suffix.
    pub version: String,

    /// Prefix shared by all bucket names. May be empty.
    pub cache_prefix: String,

    /// Assets that must all be cached at install, in order.
    ///
    /// Paths are resolved against `origin`; absolute URLs are kept as-is.
    pub static_assets: Vec<String>,

    /// Page served to HTML requests when neither network nor cache can answer.
    pub offline_fallback: String,

    /// Tag that triggers the background sync hook.
    pub sync_tag: String,

    /// Activate right after a successful install.
    pub skip_waiting: bool,

    /// Push notification presentation.
    pub notification: NotificationConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:8000".to_string(),
            version: "v1.1.0".to_string(),
            cache_prefix: "furqaan".to_string(),
            static_assets: [
                "/",
                "/index.html",
                "/404.html",
                "/manifest.json",
                "/assets/css/style.css",
                "/assets/js/script.js",
                "/assets/images/logo.png",
                "https://fonts.googleapis.com/css2?family=IBM+Plex+Sans+Arabic:wght@300;400;500;600;700&display=swap",
                "https://unpkg.com/aos@2.3.1/dist/aos.css",
                "https://cdn.jsdelivr.net/gh/studio-freight/lenis@1.0.29/bundled/lenis.min.js",
                "https://cdnjs.cloudflare.com/ajax/libs/vanilla-tilt/1.8.0/vanilla-tilt.min.js",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            offline_fallback: "/404.html".to_string(),
            sync_tag: "background-sync".to_string(),
            skip_waiting: true,
            notification: NotificationConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Parse a TOML document. Missing keys take their default values.
    pub fn from_toml_str(content: &str) -> SwResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ServiceWorkerError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub async fn load(path: &Path) -> SwResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ServiceWorkerError::ConfigError(format!("reading {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loaded cache config");
        Self::from_toml_str(&content)
    }

    /// Check the config for values the worker cannot run with.
    pub fn validate(&self) -> SwResult<()> {
        let origin = self.origin_url()?;
        if origin.cannot_be_a_base() || origin.host().is_none() {
            return Err(ServiceWorkerError::ConfigError(format!(
                "origin {} has no host",
                self.origin
            )));
        }
        if self.version.trim().is_empty() {
            return Err(ServiceWorkerError::ConfigError(
                "version must not be empty".to_string(),
            ));
        }
        if self.offline_fallback.trim().is_empty() {
            return Err(ServiceWorkerError::ConfigError(
                "offline_fallback must not be empty".to_string(),
            ));
        }
        self.static_asset_urls()?;

        if !self.static_assets.contains(&self.offline_fallback) {
            warn!(
                fallback = %self.offline_fallback,
                "Offline fallback is not a static asset; HTML requests will fail offline"
            );
        }
        Ok(())
    }

    /// The controlled origin as a URL.
    pub fn origin_url(&self) -> SwResult<Url> {
        Url::parse(&self.origin)
            .map_err(|e| ServiceWorkerError::ConfigError(format!("origin {}: {}", self.origin, e)))
    }

    /// Resolve a path or absolute URL against the origin.
    pub fn resolve(&self, path_or_url: &str) -> SwResult<Url> {
        self.origin_url()?.join(path_or_url).map_err(|e| {
            ServiceWorkerError::ConfigError(format!("cannot resolve {}: {}", path_or_url, e))
        })
    }

    /// Static assets as absolute URLs, in list order.
    pub fn static_asset_urls(&self) -> SwResult<Vec<Url>> {
        self.static_assets.iter().map(|a| self.resolve(a)).collect()
    }

    /// Live bucket names for this version.
    pub fn bucket_names(&self) -> BucketNames {
        BucketNames::new(&self.cache_prefix, &self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CacheConfig::default();
        config.validate().unwrap();
        assert_eq!(config.static_assets.len(), 11);
        assert_eq!(config.sync_tag, "background-sync");
    }

    #[test]
    fn test_bucket_names() {
        let names = CacheConfig::default().bucket_names();
        assert_eq!(names.static_bucket, "furqaan-static-v1.1.0");
        assert_eq!(names.dynamic_bucket, "furqaan-dynamic-v1.1.0");
        assert_eq!(names.api_bucket, "furqaan-api-v1.1.0");
        assert!(names.contains("furqaan-api-v1.1.0"));
        assert!(!names.contains("furqaan-v1.1.0"));
        assert!(!names.contains("furqaan-static-v1.0.0"));
    }

    #[test]
    fn test_bucket_names_without_prefix() {
        let config = CacheConfig {
            cache_prefix: String::new(),
            version: "v1".into(),
            ..Default::default()
        };
        assert_eq!(
            config.bucket_names().search_order(),
            ["static-v1", "dynamic-v1", "api-v1"]
        );
    }

    #[test]
    fn test_resolve_keeps_cross_origin_urls() {
        let config = CacheConfig {
            origin: "https://furqaan.example".into(),
            ..Default::default()
        };
        let urls = config.static_asset_urls().unwrap();
        assert_eq!(urls[0].as_str(), "https://furqaan.example/");
        assert_eq!(urls[4].as_str(), "https://furqaan.example/assets/css/style.css");
        assert_eq!(urls[8].host_str(), Some("unpkg.com"));
    }

    #[test]
    fn test_from_toml_partial() {
        let config = CacheConfig::from_toml_str(
            r#"
            origin = "https://furqaan.example"
            version = "v2"
            static_assets = ["/", "/404.html"]

            [notification]
            vibrate = [200]
            "#,
        )
        .unwrap();

        assert_eq!(config.version, "v2");
        assert_eq!(config.cache_prefix, "furqaan");
        assert_eq!(config.static_assets, vec!["/", "/404.html"]);
        assert_eq!(config.notification.vibrate, vec![200]);
        assert_eq!(config.notification.open_url, "/");
    }

    #[test]
    fn test_rejects_empty_version() {
        let err = CacheConfig::from_toml_str("version = \"  \"").unwrap_err();
        assert!(matches!(err, ServiceWorkerError::ConfigError(_)));
    }

    #[test]
    fn test_rejects_bad_origin() {
        let err = CacheConfig::from_toml_str("origin = \"not a url\"").unwrap_err();
        assert!(matches!(err, ServiceWorkerError::ConfigError(_)));

        let err = CacheConfig::from_toml_str("origin = \"data:text/plain,hi\"").unwrap_err();
        assert!(matches!(err, ServiceWorkerError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline.toml");
        tokio::fs::write(&path, "version = \"v9\"\n").await.unwrap();

        let config = CacheConfig::load(&path).await.unwrap();
        assert_eq!(config.version, "v9");

        let missing = CacheConfig::load(&dir.path().join("missing.toml")).await;
        assert!(matches!(missing, Err(ServiceWorkerError::ConfigError(_))));
    }
}
