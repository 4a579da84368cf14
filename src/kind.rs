//! Connector taxonomy: role × protocol, and the table mapping each kind to
//! the transport that implements it.

use crate::config::ConnectorConfig;
use crate::transport::memory::{MemoryHub, MemoryTransport};
use crate::transport::tcp::TcpTransport;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Which way traffic flows through a connector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Inbound: receives messages and hands them to `on_message_callback`
    Channel,
    /// Outbound client
    Outbound,
    /// Bidirectional
    Duplex,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    ZeroMq,
    ZeroMqMdp01,
    Amqp,
    WebSocket,
    Vault,
    Tcp,
    Memory,
}

/// Every supported (role, protocol) pair.
///
/// Each kind is served by exactly one `ConnectorStore`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectorKind {
    #[serde(rename = "zmq_channel")]
    ZeroMqChannel,
    #[serde(rename = "zmq_outbound")]
    ZeroMqOutbound,
    #[serde(rename = "vault_outbound")]
    VaultOutbound,
    #[serde(rename = "amqp")]
    Amqp,
    #[serde(rename = "web_socket")]
    WebSocket,
    #[serde(rename = "zmq_mdp_v01")]
    ZeroMqMdp01,
    #[serde(rename = "tcp_channel")]
    TcpChannel,
    #[serde(rename = "tcp_outbound")]
    TcpOutbound,
    #[serde(rename = "tcp_duplex")]
    TcpDuplex,
    #[serde(rename = "memory_channel")]
    MemoryChannel,
    #[serde(rename = "memory_outbound")]
    MemoryOutbound,
    #[serde(rename = "memory_duplex")]
    MemoryDuplex,
}

impl ConnectorKind {
    pub const ALL: [ConnectorKind; 12] = [
        ConnectorKind::ZeroMqChannel,
        ConnectorKind::ZeroMqOutbound,
        ConnectorKind::VaultOutbound,
        ConnectorKind::Amqp,
        ConnectorKind::WebSocket,
        ConnectorKind::ZeroMqMdp01,
        ConnectorKind::TcpChannel,
        ConnectorKind::TcpOutbound,
        ConnectorKind::TcpDuplex,
        ConnectorKind::MemoryChannel,
        ConnectorKind::MemoryOutbound,
        ConnectorKind::MemoryDuplex,
    ];

    pub fn role(self) -> Role {
        match self {
            ConnectorKind::ZeroMqChannel
            | ConnectorKind::TcpChannel
            | ConnectorKind::MemoryChannel => Role::Channel,
            ConnectorKind::ZeroMqOutbound
            | ConnectorKind::VaultOutbound
            | ConnectorKind::TcpOutbound
            | ConnectorKind::MemoryOutbound => Role::Outbound,
            ConnectorKind::Amqp
            | ConnectorKind::WebSocket
            | ConnectorKind::ZeroMqMdp01
            | ConnectorKind::TcpDuplex
            | ConnectorKind::MemoryDuplex => Role::Duplex,
        }
    }

    pub fn protocol(self) -> Protocol {
        match self {
            ConnectorKind::ZeroMqChannel | ConnectorKind::ZeroMqOutbound => Protocol::ZeroMq,
            ConnectorKind::ZeroMqMdp01 => Protocol::ZeroMqMdp01,
            ConnectorKind::VaultOutbound => Protocol::Vault,
            ConnectorKind::Amqp => Protocol::Amqp,
            ConnectorKind::WebSocket => Protocol::WebSocket,
            ConnectorKind::TcpChannel | ConnectorKind::TcpOutbound | ConnectorKind::TcpDuplex => {
                Protocol::Tcp
            }
            ConnectorKind::MemoryChannel
            | ConnectorKind::MemoryOutbound
            | ConnectorKind::MemoryDuplex => Protocol::Memory,
        }
    }

    /// Human-readable label used in log lines.
    pub fn label(self) -> &'static str {
        match self {
            ConnectorKind::ZeroMqChannel => "ZeroMQ channel",
            ConnectorKind::ZeroMqOutbound => "ZeroMQ outgoing",
            ConnectorKind::VaultOutbound => "Vault connection",
            ConnectorKind::Amqp => "AMQP",
            ConnectorKind::WebSocket => "WebSocket",
            ConnectorKind::ZeroMqMdp01 => "ZeroMQ MDP v0.1",
            ConnectorKind::TcpChannel => "TCP channel",
            ConnectorKind::TcpOutbound => "TCP outgoing",
            ConnectorKind::TcpDuplex => "TCP duplex",
            ConnectorKind::MemoryChannel => "In-memory channel",
            ConnectorKind::MemoryOutbound => "In-memory outgoing",
            ConnectorKind::MemoryDuplex => "In-memory duplex",
        }
    }

    pub fn from_parts(role: Role, protocol: Protocol) -> Option<ConnectorKind> {
        Self::ALL
            .into_iter()
            .find(|k| k.role() == role && k.protocol() == protocol)
    }
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Builds the transport for a newly created connector.
pub type TransportFactory =
    Arc<dyn Fn(&ConnectorConfig) -> anyhow::Result<Arc<dyn Transport>> + Send + Sync>;

/// Read-only map from connector kind to transport factory.
///
/// Built once at process start and shared behind an `Arc`.
#[derive(Clone, Default)]
pub struct KindTable {
    factories: HashMap<ConnectorKind, TransportFactory>,
}

impl KindTable {
    pub fn builder() -> KindTableBuilder {
        KindTableBuilder::default()
    }

    /// Table with the TCP and in-memory transports registered.
    pub fn builtin(hub: MemoryHub) -> Self {
        let mut builder = Self::builder();
        for kind in [
            ConnectorKind::TcpChannel,
            ConnectorKind::TcpOutbound,
            ConnectorKind::TcpDuplex,
        ] {
            builder = builder.register(
                kind,
                Arc::new(move |_config: &ConnectorConfig| {
                    let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(kind.role()));
                    Ok(transport)
                }),
            );
        }
        for kind in [
            ConnectorKind::MemoryChannel,
            ConnectorKind::MemoryOutbound,
            ConnectorKind::MemoryDuplex,
        ] {
            let hub = hub.clone();
            builder = builder.register(
                kind,
                Arc::new(move |_config: &ConnectorConfig| {
                    let transport: Arc<dyn Transport> =
                        Arc::new(MemoryTransport::new(kind.role(), hub.clone()));
                    Ok(transport)
                }),
            );
        }
        builder.build()
    }

    pub fn factory(&self, kind: ConnectorKind) -> Option<TransportFactory> {
        self.factories.get(&kind).cloned()
    }

    pub fn supports(&self, kind: ConnectorKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Registered kinds in `ConnectorKind::ALL` order.
    pub fn kinds(&self) -> Vec<ConnectorKind> {
        ConnectorKind::ALL
            .into_iter()
            .filter(|k| self.factories.contains_key(k))
            .collect()
    }
}

#[derive(Default)]
pub struct KindTableBuilder {
    factories: HashMap<ConnectorKind, TransportFactory>,
}

impl KindTableBuilder {
    /// Registers `factory` for `kind`, replacing any earlier registration.
    pub fn register(mut self, kind: ConnectorKind, factory: TransportFactory) -> Self {
        self.factories.insert(kind, factory);
        self
    }

    pub fn build(self) -> KindTable {
        KindTable {
            factories: self.factories,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_round_trips_through_parts() {
        for kind in ConnectorKind::ALL {
            assert_eq!(
                ConnectorKind::from_parts(kind.role(), kind.protocol()),
                Some(kind)
            );
        }
    }

    #[test]
    fn test_unsupported_pair_has_no_kind() {
        assert_eq!(ConnectorKind::from_parts(Role::Channel, Protocol::Vault), None);
        assert_eq!(ConnectorKind::from_parts(Role::Duplex, Protocol::ZeroMq), None);
    }

    #[test]
    fn test_labels() {
        assert_eq!(ConnectorKind::ZeroMqChannel.label(), "ZeroMQ channel");
        assert_eq!(ConnectorKind::ZeroMqMdp01.to_string(), "ZeroMQ MDP v0.1");
        assert_eq!(ConnectorKind::VaultOutbound.role(), Role::Outbound);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ConnectorKind::TcpOutbound).unwrap();
        assert_eq!(json, "\"tcp_outbound\"");
        let kind: ConnectorKind = serde_json::from_str("\"zmq_mdp_v01\"").unwrap();
        assert_eq!(kind, ConnectorKind::ZeroMqMdp01);
    }

    #[test]
    fn test_builtin_table() {
        let table = KindTable::builtin(MemoryHub::new());
        assert!(table.supports(ConnectorKind::TcpChannel));
        assert!(table.supports(ConnectorKind::MemoryDuplex));
        assert!(!table.supports(ConnectorKind::Amqp));
        assert_eq!(table.kinds().len(), 6);
        assert_eq!(table.kinds()[0], ConnectorKind::TcpChannel);
    }
}
