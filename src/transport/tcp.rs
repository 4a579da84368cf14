//! Newline-delimited JSON over TCP.
//!
//! Each line is one [`Envelope`]. Channels bind `address` and accept any
//! number of clients; outbound and duplex connectors dial `address`.

use super::{ConnectContext, Transport};
use crate::config::ConnectorConfig;
use crate::kind::Role;
use crate::message::{Credentials, Message};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

/// One line on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    pub message: Message,
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self).context("Failed to encode envelope")?;
        line.push(b'\n');
        Ok(line)
    }
}

#[derive(Default)]
struct TcpState {
    writer: Option<OwnedWriteHalf>,
    task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    credentials: Option<Credentials>,
    ctx: Option<ConnectContext>,
}

pub struct TcpTransport {
    role: Role,
    state: tokio::sync::Mutex<TcpState>,
}

impl TcpTransport {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: tokio::sync::Mutex::new(TcpState::default()),
        }
    }

    /// Address the channel listener is bound to, once connected.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.local_addr
    }

    fn release(state: &mut TcpState) {
        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.writer = None;
        state.local_addr = None;
        state.ctx = None;
    }
}

/// Optional credentials sent with every outbound envelope.
fn outbound_credentials(config: &ConnectorConfig) -> Option<Credentials> {
    let username = config.option_str("username")?;
    let password = config.option_str("password").unwrap_or_default();
    Some(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

#[async_trait]
impl Transport for TcpTransport {
    /// Remote ends may stay unreachable indefinitely, so a store's `start`
    /// never waits on them.
    fn start_in_task(&self) -> bool {
        true
    }

    async fn connect(&self, ctx: &ConnectContext) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::release(&mut state);

        let address = &ctx.config.address;
        match self.role {
            Role::Channel => {
                let listener = TcpListener::bind(address)
                    .await
                    .with_context(|| format!("Failed to bind {}", address))?;
                state.local_addr = Some(listener.local_addr()?);
                state.task = Some(tokio::spawn(accept_loop(listener, ctx.clone())));
            }
            Role::Outbound | Role::Duplex => {
                let stream = TcpStream::connect(address)
                    .await
                    .with_context(|| format!("Failed to connect to {}", address))?;
                state.local_addr = Some(stream.local_addr()?);
                let (reader, writer) = stream.into_split();
                state.writer = Some(writer);
                state.task = Some(tokio::spawn(read_replies(
                    reader,
                    ctx.clone(),
                    self.role == Role::Duplex,
                )));
            }
        }

        state.credentials = outbound_credentials(&ctx.config);
        state.ctx = Some(ctx.clone());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(mut writer) = state.writer.take() {
            let _ = writer.shutdown().await;
        }
        Self::release(&mut state);
        Ok(())
    }

    async fn send_one(&self, msg: Message) -> Result<()> {
        if self.role == Role::Channel {
            bail!("channel connectors are inbound only");
        }
        let mut state = self.state.lock().await;
        let line = Envelope {
            credentials: state.credentials.clone(),
            message: msg,
        }
        .encode()?;

        let Some(writer) = state.writer.as_mut() else {
            bail!("not connected");
        };
        let written = async {
            writer.write_all(&line).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            state.writer = None;
            if let Some(ctx) = &state.ctx {
                ctx.report_lost();
            }
            return Err(e).context("Failed to write to socket");
        }
        Ok(())
    }

    fn log_details(&self, config: &ConnectorConfig) -> String {
        match self.role {
            Role::Channel => format!("listening on {}", config.address),
            Role::Outbound | Role::Duplex => format!("connected to {}", config.address),
        }
    }

    fn prev_log_details(&self, config: &ConnectorConfig) -> String {
        match self.role {
            Role::Channel => format!("was listening on {}", config.address),
            Role::Outbound | Role::Duplex => format!("was connected to {}", config.address),
        }
    }
}

/// Accepts clients until cancelled. Dropping the `JoinSet` ends every
/// client reader with it.
async fn accept_loop(listener: TcpListener, ctx: ConnectContext) {
    let cancel = ctx.cancel_token();
    let mut clients = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(connector = %ctx.name, peer = %peer, "Client connected");
                    clients.spawn(read_envelopes(stream, peer, ctx.clone()));
                }
                Err(e) => {
                    warn!(connector = %ctx.name, error = %e, "Accept failed");
                }
            },
            Some(_) = clients.join_next(), if !clients.is_empty() => {}
        }
    }
}

async fn read_envelopes(stream: TcpStream, peer: SocketAddr, ctx: ConnectContext) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!(connector = %ctx.name, peer = %peer, error = %e, "Client read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let envelope: Envelope = match serde_json::from_str(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(connector = %ctx.name, peer = %peer, error = %e, "Invalid envelope");
                continue;
            }
        };
        if !ctx.authenticate(envelope.credentials.as_ref()) {
            warn!(connector = %ctx.name, peer = %peer, "Rejected unauthenticated message");
            continue;
        }
        ctx.deliver(envelope.message);
    }
    debug!(connector = %ctx.name, peer = %peer, "Client disconnected");
}

/// Reads what the remote end sends back. Duplex connectors deliver it;
/// outbound ones only watch for the link closing.
async fn read_replies(reader: OwnedReadHalf, ctx: ConnectContext, deliver: bool) {
    let cancel = ctx.cancel_token();
    let mut lines = BufReader::new(reader).lines();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = lines.next_line() => next,
        };
        match next {
            Ok(Some(line)) if deliver => match serde_json::from_str::<Envelope>(&line) {
                Ok(envelope) => {
                    ctx.deliver(envelope.message);
                }
                Err(e) => warn!(connector = %ctx.name, error = %e, "Invalid envelope"),
            },
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => {
                debug!(connector = %ctx.name, error = %e, "Socket read failed");
                break;
            }
        }
    }
    ctx.report_lost();
}
