//! Tether - connection lifecycle supervision for external network resources.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   ConnectorStore (one per kind)          │
//! │  - create / edit / delete                │
//! │  - start one or all, invoke              │
//! └─────────────────────────────────────────┘
//!          ↓ owns, by name
//! ┌─────────────────────────────────────────┐
//! │   Connector                              │
//! │  - reconnect loop (unbounded retry)      │
//! │  - per-connector lock (edit/send)        │
//! └─────────────────────────────────────────┘
//!          ↓ delegates to
//! ┌─────────────────────────────────────────┐
//! │   Transport (TCP, in-memory, ...)        │
//! │  - connect / disconnect / send_one       │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use tether::{ConnectorConfig, ConnectorKind, ConnectorStore, KindTable, Message, SupervisorConfig};
//! use tether::transport::memory::MemoryHub;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let table = KindTable::builtin(MemoryHub::new());
//! let store = ConnectorStore::from_table(&table, ConnectorKind::TcpOutbound, SupervisorConfig::default())?;
//!
//! store.create("billing", ConnectorConfig::new(1, "billing", "127.0.0.1:7000"), None, None).await?;
//! store.start(None).await;
//! store.send("billing", Message::new(serde_json::json!({"amount": 10}))).await?;
//! # Ok(())
//! # }
//! ```

// Configuration records and file loading
pub mod config;

// Supervised connection
pub mod connector;

pub mod error;

// Role × protocol taxonomy
pub mod kind;

pub mod message;

// Registry of same-kind connectors
pub mod store;

// Capability interface and built-in transports
pub mod transport;

pub use config::{ConnectorConfig, DuplicatePolicy, SupervisorConfig, TetherConfig};
pub use connector::{Connector, ConnectorGuard, ConnectorStatus};
pub use error::ConnectorError;
pub use kind::{ConnectorKind, KindTable, Protocol, Role, TransportFactory};
pub use message::{AuthFunc, Credentials, Message, MessageCallback};
pub use store::ConnectorStore;
pub use transport::{ConnectContext, Transport};
