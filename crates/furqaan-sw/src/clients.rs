//! Clients API: the pages a worker controls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::error::{ServiceWorkerError, SwResult};

/// Clients registry shared between the container and its controllers.
pub type SharedClients = Arc<RwLock<Clients>>;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
}

/// A client (controlled page).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Version of the worker controlling this client, if any.
    pub controller: Option<String>,
}

impl Client {
    /// Create an uncontrolled window client.
    pub fn window(url: Url) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self {
            id: format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed)),
            url,
            client_type: ClientType::Window,
            focused: false,
            controller: None,
        }
    }

    /// Focus the client.
    pub fn focus(&mut self) -> SwResult<()> {
        if self.client_type != ClientType::Window {
            return Err(ServiceWorkerError::StateError(
                "Can only focus window clients".to_string(),
            ));
        }
        self.focused = true;
        Ok(())
    }
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap into the shared handle.
    pub fn shared(self) -> SharedClients {
        Arc::new(RwLock::new(self))
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// All clients, ordered by ID.
    pub fn all(&self) -> Vec<&Client> {
        let mut all: Vec<&Client> = self.clients.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Make `version` the controller of every client. Returns how many changed hands.
    pub fn claim(&mut self, version: &str) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if client.controller.as_deref() != Some(version) {
                client.controller = Some(version.to_string());
                claimed += 1;
            }
        }
        debug!(version, claimed, "Clients claimed");
        claimed
    }

    /// Focus an existing window showing `url`, or open a new one.
    pub fn open_window(&mut self, url: Url) -> SwResult<Client> {
        for client in self.clients.values_mut() {
            client.focused = false;
        }

        if let Some(existing) = self
            .clients
            .values_mut()
            .find(|c| c.client_type == ClientType::Window && c.url == url)
        {
            existing.focus()?;
            return Ok(existing.clone());
        }

        let mut client = Client::window(url);
        client.focus()?;
        self.add(client.clone());
        Ok(client)
    }
}
