//! Push payloads and the notifications they produce.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use furqaan_common::unix_millis;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::NotificationConfig;

/// Notification registry shared between the container and its controllers.
pub type SharedNotifications = Arc<RwLock<NotificationCenter>>;

/// Body of a push message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
}

impl PushPayload {
    /// Decode a push message body. `None` for anything that is not `{title, body}` JSON.
    pub fn parse(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }
}

/// Unique identifier for a shown notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(u64);

impl NotificationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Data attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    /// When the push arrived (ms since epoch).
    pub date_of_arrival: u64,
    pub primary_key: u32,
}

/// Options passed to `showNotification`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
}

impl NotificationOptions {
    /// Options for a push payload using the configured presentation.
    pub fn for_push(payload: &PushPayload, config: &NotificationConfig) -> Self {
        Self {
            body: payload.body.clone(),
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            vibrate: config.vibrate.clone(),
            data: NotificationData {
                date_of_arrival: unix_millis(),
                primary_key: 1,
            },
        }
    }
}

/// A notification currently on screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub options: NotificationOptions,
}

/// Notifications shown by the worker and not yet closed.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    shown: HashMap<NotificationId, Notification>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap into the shared handle.
    pub fn shared(self) -> SharedNotifications {
        Arc::new(RwLock::new(self))
    }

    /// Display a notification.
    pub fn show(&mut self, title: &str, options: NotificationOptions) -> Notification {
        let notification = Notification {
            id: NotificationId::new(),
            title: title.to_string(),
            options,
        };
        debug!(id = notification.id.raw(), title, "Showing notification");
        self.shown.insert(notification.id, notification.clone());
        notification
    }

    /// Close a notification. Returns it if it was still shown.
    pub fn close(&mut self, id: NotificationId) -> Option<Notification> {
        self.shown.remove(&id)
    }

    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.shown.get(&id)
    }

    pub fn len(&self) -> usize {
        self.shown.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shown.is_empty()
    }
}
