//! Supervisor manager - owns one connector store per kind.
//!
//! Builds the stores from a `KindTable`, loads configured connectors into
//! them, and starts or stops them as a whole.

use std::sync::Arc;
use tether::config::ConnectorEntry;
use tether::{
    AuthFunc, ConnectorConfig, ConnectorError, ConnectorKind, ConnectorStatus, ConnectorStore,
    KindTable, Message, MessageCallback, Role, SupervisorConfig,
};
use tracing::{info, warn};

/// Supervisor manager - one `ConnectorStore` per registered kind.
///
/// # Responsibilities
/// - Route create/edit/delete/invoke to the store of the right kind
/// - Hand inbound connectors their message callback and auth check
/// - Start everything at boot, stop everything at shutdown
pub struct SupervisorManager {
    /// Stores in `ConnectorKind::ALL` order
    stores: Vec<(ConnectorKind, Arc<ConnectorStore>)>,
    on_message: MessageCallback,
    auth: Option<AuthFunc>,
}

impl SupervisorManager {
    /// Creates a manager with a store for every kind registered in `table`.
    pub fn new(table: &KindTable, settings: SupervisorConfig) -> Self {
        let stores = table
            .kinds()
            .into_iter()
            .filter_map(|kind| match ConnectorStore::from_table(table, kind, settings.clone()) {
                Ok(store) => Some((kind, Arc::new(store))),
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Skipping kind");
                    None
                }
            })
            .collect();

        Self {
            stores,
            on_message: log_message_callback(),
            auth: None,
        }
    }

    /// Replaces the default (logging) callback for inbound messages.
    pub fn with_on_message(mut self, on_message: MessageCallback) -> Self {
        self.on_message = on_message;
        self
    }

    /// Sets the credential check handed to channel connectors.
    pub fn with_auth(mut self, auth: Option<AuthFunc>) -> Self {
        self.auth = auth;
        self
    }

    pub fn kinds(&self) -> Vec<ConnectorKind> {
        self.stores.iter().map(|(kind, _)| *kind).collect()
    }

    /// Returns the store for `kind`, or `UnsupportedKind` if none is registered.
    pub fn store(&self, kind: ConnectorKind) -> Result<Arc<ConnectorStore>, ConnectorError> {
        self.stores
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, store)| Arc::clone(store))
            .ok_or(ConnectorError::UnsupportedKind(kind))
    }

    /// Creates a connector under `config.name` in the store for `kind`.
    ///
    /// Channel and duplex connectors get the message callback; channels also
    /// get the auth check.
    pub async fn create(
        &self,
        kind: ConnectorKind,
        config: ConnectorConfig,
    ) -> Result<(), ConnectorError> {
        let store = self.store(kind)?;
        let on_message = match kind.role() {
            Role::Channel | Role::Duplex => Some(Arc::clone(&self.on_message)),
            Role::Outbound => None,
        };
        let auth = match kind.role() {
            Role::Channel => self.auth.clone(),
            Role::Outbound | Role::Duplex => None,
        };
        let name = config.name.clone();
        store.create(&name, config, on_message, auth).await
    }

    /// Creates every configured connector. Returns how many were created;
    /// failures are logged and skipped.
    pub async fn load(&self, entries: &[ConnectorEntry]) -> usize {
        let mut created = 0;
        for entry in entries {
            match self.create(entry.kind, entry.config.clone()).await {
                Ok(()) => created += 1,
                Err(e) => warn!(
                    connector = %entry.config.name,
                    kind = %entry.kind,
                    error = %e,
                    "Failed to create configured connector"
                ),
            }
        }
        info!(configured = entries.len(), created = created, "Loaded connectors");
        created
    }

    /// Starts every connector in every store.
    ///
    /// # Returns
    /// Number of connectors started (inactive ones included, as no-ops)
    pub async fn start(&self) -> usize {
        info!("Starting supervisor manager");
        let mut started = 0;
        for (_, store) in &self.stores {
            started += store.start(None).await;
        }
        started
    }

    /// Status of every connector, grouped by kind.
    pub async fn statuses(&self) -> Vec<ConnectorStatus> {
        let mut statuses = Vec::new();
        for (_, store) in &self.stores {
            statuses.extend(store.statuses().await);
        }
        statuses
    }

    /// Stops every connector. Connectors stay registered.
    pub async fn shutdown(&self) {
        info!("Shutting down supervisor manager");
        for (kind, store) in &self.stores {
            let count = store.len().await;
            if count > 0 {
                info!(kind = %kind, connector_count = count, "Stopping connectors");
                store.stop_all().await;
            }
        }
        info!("All connectors stopped");
    }
}

/// Default inbound handler: logs each message.
pub fn log_message_callback() -> MessageCallback {
    Arc::new(|msg: Message| {
        info!(
            message_id = %msg.id,
            service = msg.service.as_deref().unwrap_or("-"),
            payload = %msg.payload,
            "Received message"
        );
    })
}
