//! Capability interface implemented by every concrete connector type.
//!
//! The supervisor in [`crate::connector`] owns the lifecycle; a transport
//! only knows how to make one connection attempt, release its handle, and
//! move single messages.

pub mod memory;
pub mod tcp;

use crate::config::ConnectorConfig;
use crate::kind::ConnectorKind;
use crate::message::{AuthFunc, Credentials, Message, MessageCallback};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Protocol-specific half of a connector.
///
/// Methods take `&self`; implementations keep their connection handle behind
/// their own lock so the connect loop and `send` never contend on the
/// connector lock.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether `start` should return without waiting for the first connection.
    fn start_in_task(&self) -> bool {
        false
    }

    /// Makes a single connection attempt. `Ok` means connected.
    async fn connect(&self, ctx: &ConnectContext) -> Result<()>;

    /// Releases the connection handle. Called on every stop, connected or not.
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    /// Transmits one message.
    async fn send_one(&self, msg: Message) -> Result<()>;

    /// Protocol-specific invocation entry point used by request dispatch.
    async fn invoke(&self, msg: Message) -> Result<Option<Message>> {
        self.send_one(msg).await?;
        Ok(None)
    }

    /// Called under the connector lock before the connector swaps in
    /// `config`. `config.prev_address` holds the address being replaced.
    fn on_edit(&self, _old_name: &str, _config: &ConnectorConfig) {}

    /// Short diagnostic appended to start log lines (e.g. a socket address).
    fn log_details(&self, _config: &ConnectorConfig) -> String {
        String::new()
    }

    /// Diagnostic for stop log lines, read before the handle is released.
    fn prev_log_details(&self, config: &ConnectorConfig) -> String {
        self.log_details(config)
    }
}

/// Everything a transport may need while connecting and while connected.
///
/// A fresh context is handed to each connect attempt.
#[derive(Clone)]
pub struct ConnectContext {
    pub name: String,
    pub kind: ConnectorKind,
    pub config: ConnectorConfig,
    on_message: Option<MessageCallback>,
    auth: Option<AuthFunc>,
    link: Arc<Notify>,
    cancel: CancellationToken,
}

impl ConnectContext {
    pub fn new(
        name: String,
        kind: ConnectorKind,
        config: ConnectorConfig,
        on_message: Option<MessageCallback>,
        auth: Option<AuthFunc>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name,
            kind,
            config,
            on_message,
            auth,
            link: Arc::new(Notify::new()),
            cancel,
        }
    }

    /// Same context with a new link-loss signal, so a loss reported by an
    /// earlier connection cannot leak into the next one.
    pub(crate) fn for_attempt(&self) -> Self {
        Self {
            link: Arc::new(Notify::new()),
            ..self.clone()
        }
    }

    pub(crate) fn link(&self) -> Arc<Notify> {
        Arc::clone(&self.link)
    }

    /// Cancelled when the connector stops; background tasks spawned by a
    /// transport should exit on it.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Tells the supervisor an established link went away so it reconnects.
    pub fn report_lost(&self) {
        self.link.notify_one();
    }

    /// Hands an inbound message to `on_message_callback`, stamped with the
    /// connector's `service_name`. Returns false when no callback is set.
    pub fn deliver(&self, msg: Message) -> bool {
        match &self.on_message {
            Some(callback) => {
                let service = msg
                    .service
                    .clone()
                    .or_else(|| self.config.service_name.clone());
                callback(msg.with_service(service));
                true
            }
            None => false,
        }
    }

    /// Checks caller credentials with `auth_func`. Without an `auth_func`
    /// every caller is accepted; with one, missing credentials are refused.
    pub fn authenticate(&self, credentials: Option<&Credentials>) -> bool {
        match (&self.auth, credentials) {
            (None, _) => true,
            (Some(auth), Some(creds)) => auth(creds),
            (Some(_), None) => false,
        }
    }
}
