//! Name-addressed registry of connectors of one kind.
//!
//! The store lock guards membership only (insert, rename, remove). Each
//! connector's own lock guards its state transitions, so unrelated
//! connectors start and send concurrently. Lock order is store, then
//! connector.

use crate::config::{ConnectorConfig, DuplicatePolicy, SupervisorConfig};
use crate::connector::{Connector, ConnectorStatus};
use crate::error::{ConnectorError, Result};
use crate::kind::{ConnectorKind, KindTable, TransportFactory};
use crate::message::{AuthFunc, Message, MessageCallback};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct ConnectorStore {
    kind: ConnectorKind,
    factory: TransportFactory,
    settings: SupervisorConfig,
    connectors: Mutex<HashMap<String, Arc<Connector>>>,
}

impl ConnectorStore {
    pub fn new(kind: ConnectorKind, factory: TransportFactory, settings: SupervisorConfig) -> Self {
        Self {
            kind,
            factory,
            settings,
            connectors: Mutex::new(HashMap::new()),
        }
    }

    /// Store for `kind` using the factory registered in `table`.
    pub fn from_table(
        table: &KindTable,
        kind: ConnectorKind,
        settings: SupervisorConfig,
    ) -> Result<Self> {
        let factory = table
            .factory(kind)
            .ok_or(ConnectorError::UnsupportedKind(kind))?;
        Ok(Self::new(kind, factory, settings))
    }

    pub fn kind(&self) -> ConnectorKind {
        self.kind
    }

    /// Builds a connector and registers it under `name`.
    ///
    /// Under `DuplicatePolicy::Reject` an existing `name` fails with
    /// `Duplicate`; under `Overwrite` the existing connector is stopped and
    /// replaced.
    pub async fn create(
        &self,
        name: &str,
        config: ConnectorConfig,
        on_message: Option<MessageCallback>,
        auth: Option<AuthFunc>,
    ) -> Result<()> {
        let mut connectors = self.connectors.lock().await;
        self.make_room(&mut connectors, name).await?;

        let transport = (self.factory)(&config)?;
        let connector = Connector::new(
            name,
            self.kind,
            config,
            transport,
            self.settings.clone(),
            on_message,
            auth,
        );
        connectors.insert(name.to_string(), Arc::new(connector));

        info!(connector = %name, kind = %self.kind, "Created connector");
        Ok(())
    }

    /// Edits the connector at `old_name` and moves it to `config.name`.
    ///
    /// `config.id` must match the connector's id; a different id is
    /// `IdChanged` and leaves the connector untouched.
    ///
    /// The connector's own edit (with its restart) and the key move happen
    /// inside one store-lock critical section.
    pub async fn edit(&self, old_name: &str, config: ConnectorConfig) -> Result<()> {
        let mut connectors = self.connectors.lock().await;
        let connector = connectors
            .get(old_name)
            .cloned()
            .ok_or_else(|| ConnectorError::NotFound(old_name.to_string()))?;
        if config.id != connector.id() {
            return Err(ConnectorError::IdChanged {
                name: old_name.to_string(),
                id: connector.id(),
                new_id: config.id,
            });
        }

        let new_name = config.name.clone();
        if new_name != old_name {
            self.make_room(&mut connectors, &new_name).await?;
        }

        connector.edit(old_name, config).await;
        connectors.remove(old_name);
        connectors.insert(new_name.clone(), connector);

        info!(connector = %new_name, old_name = %old_name, kind = %self.kind, "Edited connector");
        Ok(())
    }

    /// Stops the named connector and removes it.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let mut connectors = self.connectors.lock().await;
        let connector = connectors
            .get(name)
            .cloned()
            .ok_or_else(|| ConnectorError::NotFound(name.to_string()))?;

        connector.stop().await;
        connectors.remove(name);

        info!(connector = %name, kind = %self.kind, "Deleted connector");
        Ok(())
    }

    /// Starts every connector, or only the one called `name`.
    ///
    /// An unknown `name` starts nothing. Returns how many were started.
    pub async fn start(&self, name: Option<&str>) -> usize {
        let connectors = self.connectors.lock().await;
        let mut started = 0;
        for (key, connector) in connectors.iter() {
            if name.is_some_and(|n| n != key.as_str()) {
                continue;
            }
            connector.start().await;
            started += 1;
        }
        started
    }

    /// Stops every connector, leaving them registered.
    pub async fn stop_all(&self) {
        let connectors = self.connectors.lock().await;
        for connector in connectors.values() {
            connector.stop().await;
        }
    }

    /// Forwards to the named connector's invocation entry point.
    pub async fn invoke(&self, name: &str, msg: Message) -> Result<Option<Message>> {
        let connector = self.lookup(name).await?;
        connector.invoke(msg).await
    }

    pub async fn send(&self, name: &str, msg: Message) -> Result<()> {
        let connector = self.lookup(name).await?;
        connector.send(msg).await
    }

    /// Looks up a connector by name.
    pub async fn get(&self, name: &str) -> Option<Arc<Connector>> {
        self.connectors.lock().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.connectors.lock().await.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        self.connectors.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connectors.lock().await.is_empty()
    }

    /// Registered names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connectors.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Status of every connector, sorted by name.
    ///
    /// Snapshots membership first so status reads do not hold the store lock.
    pub async fn statuses(&self) -> Vec<ConnectorStatus> {
        let snapshot: Vec<Arc<Connector>> =
            self.connectors.lock().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(snapshot.len());
        for connector in snapshot {
            statuses.push(connector.status().await);
        }
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    async fn lookup(&self, name: &str) -> Result<Arc<Connector>> {
        self.get(name)
            .await
            .ok_or_else(|| ConnectorError::NotFound(name.to_string()))
    }

    /// Applies the duplicate-name policy before `name` is (re)used.
    async fn make_room(
        &self,
        connectors: &mut HashMap<String, Arc<Connector>>,
        name: &str,
    ) -> Result<()> {
        if !connectors.contains_key(name) {
            return Ok(());
        }
        match self.settings.duplicate_names {
            DuplicatePolicy::Reject => Err(ConnectorError::Duplicate(name.to_string())),
            DuplicatePolicy::Overwrite => {
                if let Some(existing) = connectors.remove(name) {
                    warn!(connector = %name, kind = %self.kind, "Replacing existing connector");
                    existing.stop().await;
                }
                Ok(())
            }
        }
    }
}
