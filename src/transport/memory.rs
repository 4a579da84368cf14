//! In-process transport: connectors in one process exchanging messages
//! through a shared hub of named endpoints.

use super::{ConnectContext, Transport};
use crate::config::ConnectorConfig;
use crate::kind::Role;
use crate::message::Message;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Registry of in-memory endpoints keyed by address.
#[derive(Clone, Default)]
pub struct MemoryHub {
    endpoints: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Message>>>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn bind(&self, address: &str) -> Result<mpsc::UnboundedReceiver<Message>> {
        let mut endpoints = self.endpoints.lock().unwrap();
        if let Some(existing) = endpoints.get(address) {
            if !existing.is_closed() {
                bail!("in-memory address `{}` is already bound", address);
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        endpoints.insert(address.to_string(), tx);
        Ok(rx)
    }

    fn unbind(&self, address: &str) {
        self.endpoints.lock().unwrap().remove(address);
    }

    fn lookup(&self, address: &str) -> Option<mpsc::UnboundedSender<Message>> {
        let endpoints = self.endpoints.lock().unwrap();
        endpoints.get(address).filter(|tx| !tx.is_closed()).cloned()
    }

    pub fn is_bound(&self, address: &str) -> bool {
        self.lookup(address).is_some()
    }
}

#[derive(Default)]
struct MemoryState {
    listener: Option<(String, JoinHandle<()>)>,
    target: Option<(String, mpsc::UnboundedSender<Message>)>,
    ctx: Option<ConnectContext>,
}

/// Channel: listens on `address`. Outbound: sends to `address`.
/// Duplex: listens on `address` and sends to `options.peer`.
pub struct MemoryTransport {
    role: Role,
    hub: MemoryHub,
    state: tokio::sync::Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new(role: Role, hub: MemoryHub) -> Self {
        Self {
            role,
            hub,
            state: tokio::sync::Mutex::new(MemoryState::default()),
        }
    }

    fn target_address(&self, config: &ConnectorConfig) -> Option<String> {
        match self.role {
            Role::Channel => None,
            Role::Outbound => Some(config.address.clone()),
            Role::Duplex => config.option_str("peer").map(str::to_string),
        }
    }

    fn release(&self, state: &mut MemoryState) {
        if let Some((address, handle)) = state.listener.take() {
            handle.abort();
            self.hub.unbind(&address);
        }
        state.target = None;
        state.ctx = None;
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    /// Outbound and duplex connectors wait for a peer that may never bind.
    fn start_in_task(&self) -> bool {
        self.role != Role::Channel
    }

    async fn connect(&self, ctx: &ConnectContext) -> Result<()> {
        let mut state = self.state.lock().await;
        self.release(&mut state);

        // Duplex peers are resolved on first send so two duplex connectors
        // naming each other can both come up.
        let target = match self.target_address(&ctx.config) {
            Some(address) => match self.hub.lookup(&address) {
                Some(tx) => Some((address, tx)),
                None if self.role == Role::Duplex => None,
                None => bail!("no in-memory endpoint at `{}`", address),
            },
            None => None,
        };

        if self.role != Role::Outbound {
            let address = ctx.config.address.clone();
            let mut rx = self.hub.bind(&address)?;
            let task_ctx = ctx.clone();
            let cancel = ctx.cancel_token();
            let handle = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        received = rx.recv() => match received {
                            Some(msg) => {
                                if !task_ctx.deliver(msg) {
                                    debug!(connector = %task_ctx.name, "Dropping message, no callback");
                                }
                            }
                            None => {
                                task_ctx.report_lost();
                                break;
                            }
                        },
                    }
                }
            });
            state.listener = Some((address, handle));
        }

        state.target = target;
        state.ctx = Some(ctx.clone());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.release(&mut state);
        Ok(())
    }

    async fn send_one(&self, msg: Message) -> Result<()> {
        if self.role == Role::Channel {
            bail!("channel connectors are inbound only");
        }
        let mut state = self.state.lock().await;
        let Some(ctx) = state.ctx.clone() else {
            bail!("not connected");
        };
        if state.target.is_none() {
            let Some(address) = self.target_address(&ctx.config) else {
                bail!("duplex connector `{}` has no `peer` option", ctx.name);
            };
            match self.hub.lookup(&address) {
                Some(tx) => state.target = Some((address, tx)),
                None => bail!("no in-memory endpoint at `{}`", address),
            }
        }
        let Some((address, tx)) = state.target.as_ref() else {
            bail!("not connected");
        };
        if tx.send(msg).is_err() {
            let address = address.clone();
            state.target = None;
            // A vanished peer only breaks the link of an outbound connector
            if self.role == Role::Outbound {
                ctx.report_lost();
            }
            bail!("in-memory endpoint `{}` closed", address);
        }
        Ok(())
    }

    fn log_details(&self, config: &ConnectorConfig) -> String {
        match self.role {
            Role::Channel => format!("listening on {}", config.address),
            Role::Outbound => format!("target {}", config.address),
            Role::Duplex => match config.option_str("peer") {
                Some(peer) => format!("listening on {}, peer {}", config.address, peer),
                None => format!("listening on {}", config.address),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::ConnectorKind;
    use crate::message::MessageCallback;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn ctx(kind: ConnectorKind, config: ConnectorConfig, callback: Option<MessageCallback>) -> ConnectContext {
        ConnectContext::new(
            config.name.clone(),
            kind,
            config,
            callback,
            None,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_outbound_fails_without_listener() {
        let hub = MemoryHub::new();
        let outbound = MemoryTransport::new(Role::Outbound, hub);
        let config = ConnectorConfig::new(1, "out", "nowhere");
        let err = outbound
            .connect(&ctx(ConnectorKind::MemoryOutbound, config, None))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no in-memory endpoint"));
    }

    #[tokio::test]
    async fn test_outbound_to_channel() {
        let hub = MemoryHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let callback: MessageCallback = Arc::new(move |msg| {
            let _ = tx.send(msg);
        });

        let channel = MemoryTransport::new(Role::Channel, hub.clone());
        let channel_config = ConnectorConfig::new(1, "inbox", "inbox");
        channel
            .connect(&ctx(ConnectorKind::MemoryChannel, channel_config, Some(callback)))
            .await
            .unwrap();
        assert!(hub.is_bound("inbox"));

        let outbound = MemoryTransport::new(Role::Outbound, hub.clone());
        let out_config = ConnectorConfig::new(2, "out", "inbox");
        outbound
            .connect(&ctx(ConnectorKind::MemoryOutbound, out_config, None))
            .await
            .unwrap();
        outbound.send_one(Message::new(json!({"n": 1}))).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.payload["n"], 1);

        channel.disconnect().await.unwrap();
        assert!(!hub.is_bound("inbox"));
    }

    #[tokio::test]
    async fn test_channel_rejects_send() {
        let channel = MemoryTransport::new(Role::Channel, MemoryHub::new());
        let err = channel.send_one(Message::new(json!(null))).await.unwrap_err();
        assert!(err.to_string().contains("inbound only"));
    }

    #[tokio::test]
    async fn test_address_in_use() {
        let hub = MemoryHub::new();
        let first = MemoryTransport::new(Role::Channel, hub.clone());
        let second = MemoryTransport::new(Role::Channel, hub.clone());
        let config = ConnectorConfig::new(1, "inbox", "inbox");
        first
            .connect(&ctx(ConnectorKind::MemoryChannel, config.clone(), None))
            .await
            .unwrap();
        assert!(second
            .connect(&ctx(ConnectorKind::MemoryChannel, config, None))
            .await
            .is_err());
    }

    #[test]
    fn test_log_details() {
        let duplex = MemoryTransport::new(Role::Duplex, MemoryHub::new());
        let mut config = ConnectorConfig::new(1, "d", "left");
        assert_eq!(duplex.log_details(&config), "listening on left");
        config
            .options
            .insert("peer".to_string(), json!("right"));
        assert_eq!(duplex.log_details(&config), "listening on left, peer right");
    }

    #[test]
    fn test_only_channels_start_inline() {
        let hub = MemoryHub::new();
        assert!(!MemoryTransport::new(Role::Channel, hub.clone()).start_in_task());
        assert!(MemoryTransport::new(Role::Outbound, hub.clone()).start_in_task());
        assert!(MemoryTransport::new(Role::Duplex, hub).start_in_task());
    }

    #[tokio::test]
    async fn test_duplex_pair_resolves_peer_on_send() {
        let hub = MemoryHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let callback: MessageCallback = Arc::new(move |msg| {
            let _ = tx.send(msg);
        });

        let mut left_config = ConnectorConfig::new(1, "left", "left");
        left_config.options.insert("peer".to_string(), json!("right"));
        let mut right_config = ConnectorConfig::new(2, "right", "right");
        right_config.options.insert("peer".to_string(), json!("left"));

        // Left comes up before its peer exists
        let left = MemoryTransport::new(Role::Duplex, hub.clone());
        left.connect(&ctx(ConnectorKind::MemoryDuplex, left_config, None))
            .await
            .unwrap();
        let err = left.send_one(Message::new(json!(0))).await.unwrap_err();
        assert!(err.to_string().contains("no in-memory endpoint"));

        let right = MemoryTransport::new(Role::Duplex, hub.clone());
        right
            .connect(&ctx(ConnectorKind::MemoryDuplex, right_config, Some(callback)))
            .await
            .unwrap();

        left.send_one(Message::new(json!({"n": 1}))).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().payload["n"], 1);
    }
}
