//! Supervised connection to one external resource.
//!
//! A [`Connector`] owns the connect/reconnect/disconnect state machine and
//! delegates the protocol work to its [`Transport`].
//!
//! # Lifecycle
//! 1. Created by `ConnectorStore::create`: not running, not connected
//! 2. `start()` spawns the reconnect loop: running, attempting to connect
//! 3. The first successful `Transport::connect` marks it connected
//! 4. A link loss reported by the transport sends it back to step 2
//! 5. `stop()` cancels the loop and releases the transport handle
//!
//! # Locking
//! The connector lock serializes `edit`, `restart` and `send`. The reconnect
//! loop runs on its own task and never takes it. An inline `start` issued by
//! `restart` (and therefore by `edit`) waits for the first connection while
//! the lock is held; `SupervisorConfig::first_connect_timeout_secs` bounds
//! that wait.

use crate::config::{ConnectorConfig, SupervisorConfig};
use crate::error::{ConnectorError, Result};
use crate::kind::ConnectorKind;
use crate::message::{AuthFunc, Message, MessageCallback};
use crate::transport::{ConnectContext, Transport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Point-in-time view of a connector, for monitoring.
#[derive(Clone, Debug, Serialize)]
pub struct ConnectorStatus {
    pub id: u64,
    pub name: String,
    pub kind: ConnectorKind,
    pub is_active: bool,
    pub is_connected: bool,
    pub keep_connecting: bool,
    pub keep_running: bool,
    /// Failed attempts in the current connect loop
    pub attempts: u64,
    /// Rate-limited warnings emitted since the last start
    pub failure_warnings: u64,
    pub last_error: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub details: String,
}

#[derive(Default)]
struct LoopStats {
    attempts: u64,
    failure_warnings: u64,
    last_error: Option<String>,
    connected_at: Option<DateTime<Utc>>,
}

/// State shared between a connector and its reconnect loop.
struct Flags {
    connected: watch::Sender<bool>,
    keep_connecting: AtomicBool,
    keep_running: AtomicBool,
    stats: std::sync::Mutex<LoopStats>,
}

impl Flags {
    fn new() -> Self {
        Self {
            connected: watch::channel(false).0,
            keep_connecting: AtomicBool::new(true),
            keep_running: AtomicBool::new(false),
            stats: std::sync::Mutex::new(LoopStats::default()),
        }
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
        if connected {
            self.stats.lock().unwrap().connected_at = Some(Utc::now());
        }
    }

    fn keep_connecting(&self) -> bool {
        self.keep_connecting.load(Ordering::SeqCst)
    }

    fn set_keep_connecting(&self, value: bool) {
        self.keep_connecting.store(value, Ordering::SeqCst);
    }

    fn keep_running(&self) -> bool {
        self.keep_running.load(Ordering::SeqCst)
    }

    fn set_keep_running(&self, value: bool) {
        self.keep_running.store(value, Ordering::SeqCst);
    }
}

struct ConnectorState {
    name: String,
    config: ConnectorConfig,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Proof that the connector lock is held. Required by [`Connector::restart`].
pub struct ConnectorGuard<'a> {
    inner: MutexGuard<'a, ConnectorState>,
}

impl ConnectorGuard<'_> {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }
}

/// Returned by the first half of a start so the caller can decide whether to
/// wait for the connection with or without the lock held.
struct PendingStart {
    name: String,
    details: String,
    inline: bool,
    connected: watch::Receiver<bool>,
    exited: oneshot::Receiver<()>,
    cancel: CancellationToken,
}

pub struct Connector {
    id: u64,
    kind: ConnectorKind,
    settings: SupervisorConfig,
    transport: Arc<dyn Transport>,
    on_message: Option<MessageCallback>,
    auth: Option<AuthFunc>,
    flags: Arc<Flags>,
    state: Mutex<ConnectorState>,
}

impl Connector {
    pub fn new(
        name: impl Into<String>,
        kind: ConnectorKind,
        config: ConnectorConfig,
        transport: Arc<dyn Transport>,
        settings: SupervisorConfig,
        on_message: Option<MessageCallback>,
        auth: Option<AuthFunc>,
    ) -> Self {
        Self {
            id: config.id,
            kind,
            settings,
            transport,
            on_message,
            auth,
            flags: Arc::new(Flags::new()),
            state: Mutex::new(ConnectorState {
                name: name.into(),
                config,
                cancel: CancellationToken::new(),
                task: None,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> ConnectorKind {
        self.kind
    }

    pub fn is_connected(&self) -> bool {
        self.flags.is_connected()
    }

    pub fn keep_connecting(&self) -> bool {
        self.flags.keep_connecting()
    }

    pub fn keep_running(&self) -> bool {
        self.flags.keep_running()
    }

    pub async fn name(&self) -> String {
        self.state.lock().await.name.clone()
    }

    pub async fn config(&self) -> ConnectorConfig {
        self.state.lock().await.config.clone()
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.config.is_active
    }

    pub async fn is_inactive(&self) -> bool {
        !self.is_active().await
    }

    /// Acquires the connector lock.
    pub async fn lock(&self) -> ConnectorGuard<'_> {
        ConnectorGuard {
            inner: self.state.lock().await,
        }
    }

    pub async fn status(&self) -> ConnectorStatus {
        let state = self.state.lock().await;
        let stats = self.flags.stats.lock().unwrap();
        ConnectorStatus {
            id: self.id,
            name: state.name.clone(),
            kind: self.kind,
            is_active: state.config.is_active,
            is_connected: self.flags.is_connected(),
            keep_connecting: self.flags.keep_connecting(),
            keep_running: self.flags.keep_running(),
            attempts: stats.attempts,
            failure_warnings: stats.failure_warnings,
            last_error: stats.last_error.clone(),
            connected_at: stats.connected_at,
            details: self.transport.log_details(&state.config),
        }
    }

    /// Starts the reconnect loop.
    ///
    /// Transports that run in their own task return immediately; others wait
    /// until connected, stopped, or `first_connect_timeout` elapses. Never
    /// fails: connection problems are logged and retried in the background.
    pub async fn start(&self) {
        let pending = {
            let mut guard = self.lock().await;
            self.begin_start(&mut guard.inner)
        };
        if let Some(pending) = pending {
            self.finish_start(pending).await;
        }
    }

    /// Cancels the reconnect loop and releases the transport handle.
    ///
    /// Safe to call repeatedly and before any `start`.
    pub async fn stop(&self) {
        let mut guard = self.lock().await;
        self.stop_locked(&mut guard.inner).await;
    }

    /// Stops and starts the connector. The guard proves the caller holds
    /// the connector lock.
    pub async fn restart(&self, guard: &mut ConnectorGuard<'_>) {
        self.stop_locked(&mut guard.inner).await;
        if let Some(pending) = self.begin_start(&mut guard.inner) {
            self.finish_start(pending).await;
        }
    }

    /// Swaps in `config` (and its name) and restarts, all under the lock.
    ///
    /// `config.prev_address` is set to the address being replaced. `config.id`
    /// must equal [`Connector::id`]; `ConnectorStore::edit` enforces it.
    pub async fn edit(&self, old_name: &str, mut config: ConnectorConfig) {
        debug_assert_eq!(config.id, self.id, "edit must keep the connector id");
        let mut guard = self.lock().await;
        config.prev_address = Some(guard.inner.config.address.clone());
        self.transport.on_edit(old_name, &config);

        debug!(
            connector = %old_name,
            new_name = %config.name,
            kind = %self.kind,
            address_changed = config.address_changed(),
            "Editing connector"
        );

        guard.inner.name = config.name.clone();
        guard.inner.config = config;
        self.restart(&mut guard).await;
    }

    /// Sends one message. Fails with `Inactive` when the config is disabled.
    pub async fn send(&self, msg: Message) -> Result<()> {
        let guard = self.lock().await;
        self.ensure_active(&guard)?;
        self.transport.send_one(msg).await?;
        Ok(())
    }

    /// Protocol-specific invocation, serialized with `send` and `edit`.
    pub async fn invoke(&self, msg: Message) -> Result<Option<Message>> {
        let guard = self.lock().await;
        self.ensure_active(&guard)?;
        Ok(self.transport.invoke(msg).await?)
    }

    fn ensure_active(&self, guard: &ConnectorGuard<'_>) -> Result<()> {
        if guard.inner.config.is_active {
            Ok(())
        } else {
            Err(ConnectorError::Inactive {
                name: guard.inner.name.clone(),
                kind: self.kind,
            })
        }
    }

    fn begin_start(&self, state: &mut ConnectorState) -> Option<PendingStart> {
        debug!(connector = %state.name, kind = %self.kind, "Starting connector");

        if !state.config.is_active {
            info!(connector = %state.name, kind = %self.kind, "Not starting inactive connector");
            return None;
        }
        if state.task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!(connector = %state.name, kind = %self.kind, "Connector already running");
            return None;
        }

        self.flags.set_keep_running(true);
        self.flags.set_keep_connecting(true);
        self.flags.set_connected(false);
        *self.flags.stats.lock().unwrap() = LoopStats::default();

        let cancel = CancellationToken::new();
        state.cancel = cancel.clone();

        let ctx = ConnectContext::new(
            state.name.clone(),
            self.kind,
            state.config.clone(),
            self.on_message.clone(),
            self.auth.clone(),
            cancel.child_token(),
        );
        let connected = self.flags.connected.subscribe();
        let (exit_tx, exited) = oneshot::channel();

        state.task = Some(tokio::spawn(supervise(
            Arc::clone(&self.transport),
            ctx,
            Arc::clone(&self.flags),
            self.settings.clone(),
            cancel.clone(),
            exit_tx,
        )));

        Some(PendingStart {
            name: state.name.clone(),
            details: self.transport.log_details(&state.config),
            inline: !self.transport.start_in_task(),
            connected,
            exited,
            cancel,
        })
    }

    async fn finish_start(&self, pending: PendingStart) {
        let PendingStart {
            name,
            details,
            inline,
            mut connected,
            exited,
            cancel,
        } = pending;

        if inline {
            let wait = async {
                tokio::select! {
                    result = connected.wait_for(|c| *c) => result.is_ok(),
                    _ = exited => false,
                    _ = cancel.cancelled() => false,
                }
            };
            let outcome = match self.settings.first_connect_timeout() {
                Some(limit) => tokio::time::timeout(limit, wait).await.ok(),
                None => Some(wait.await),
            };
            match outcome {
                Some(true) => {}
                Some(false) if cancel.is_cancelled() => {
                    info!(connector = %name, kind = %self.kind, "Connector stopped before connecting");
                    return;
                }
                Some(false) => {
                    warn!(connector = %name, kind = %self.kind, "Connect loop exited before connecting");
                    return;
                }
                None => {
                    warn!(
                        connector = %name,
                        kind = %self.kind,
                        "Not connected yet, continuing to connect in the background"
                    );
                }
            }
        }

        info!(connector = %name, kind = %self.kind, details = %details, "Started connector");
    }

    async fn stop_locked(&self, state: &mut ConnectorState) {
        debug!(connector = %state.name, kind = %self.kind, "Stopping connector");
        let details = self.transport.prev_log_details(&state.config);

        // Cleared first so a loop that has not connected yet cannot win the race
        self.flags.set_keep_connecting(false);
        self.flags.set_keep_running(false);
        state.cancel.cancel();

        if let Some(task) = state.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!(connector = %state.name, kind = %self.kind, error = %e, "Connect loop panicked");
                }
            }
        }
        if let Err(e) = self.transport.disconnect().await {
            warn!(connector = %state.name, kind = %self.kind, error = %e, "Failed to release connection");
        }
        self.flags.set_connected(false);

        info!(connector = %state.name, kind = %self.kind, details = %details, "Stopped connector");
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.cancel.cancel();
        if let Some(task) = state.task.take() {
            task.abort();
        }
    }
}

/// Body of the connector task: connect, then wait for the link to drop or
/// for cancellation, and reconnect while the connector is running.
async fn supervise(
    transport: Arc<dyn Transport>,
    ctx: ConnectContext,
    flags: Arc<Flags>,
    settings: SupervisorConfig,
    cancel: CancellationToken,
    exit_tx: oneshot::Sender<()>,
) {
    let _exit = exit_tx;
    loop {
        let Some(link) = connect_loop(transport.as_ref(), &ctx, &flags, &settings, &cancel).await
        else {
            break;
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = link.notified() => {}
        }
        if !flags.keep_running() {
            break;
        }

        warn!(connector = %ctx.name, kind = %ctx.kind, "Connection lost, reconnecting");
        flags.set_connected(false);
        flags.set_keep_connecting(true);
        if let Err(e) = transport.disconnect().await {
            debug!(connector = %ctx.name, error = %e, "Failed to release lost connection");
        }
    }
}

/// Calls `Transport::connect` until it succeeds or the loop is cancelled.
///
/// There is no attempt limit. Every failure is followed by `retry_delay`;
/// every `log_every`-th consecutive failure is logged at warn.
/// Returns the link-loss signal of the successful attempt.
async fn connect_loop(
    transport: &dyn Transport,
    ctx: &ConnectContext,
    flags: &Flags,
    settings: &SupervisorConfig,
    cancel: &CancellationToken,
) -> Option<Arc<tokio::sync::Notify>> {
    let started = Instant::now();
    let mut attempts: u64 = 0;

    while flags.keep_connecting() {
        let attempt_ctx = ctx.for_attempt();
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = attempt(transport, &attempt_ctx, settings.connect_timeout()) => result,
        };

        match result {
            Ok(()) => {
                flags.set_connected(true);
                flags.set_keep_connecting(false);
                debug!(connector = %ctx.name, kind = %ctx.kind, attempts = attempts, "Connected");
                return Some(attempt_ctx.link());
            }
            Err(e) => {
                attempts += 1;
                let warn_now = attempts % settings.log_every() == 0;
                let error = format!("{:#}", e);
                debug!(connector = %ctx.name, attempt = attempts, error = %error, "Connect attempt failed");
                {
                    let mut stats = flags.stats.lock().unwrap();
                    stats.attempts = attempts;
                    stats.last_error = Some(error);
                    if warn_now {
                        stats.failure_warnings += 1;
                    }
                }
                if warn_now {
                    warn!(
                        connector = %ctx.name,
                        kind = %ctx.kind,
                        details = %transport.log_details(&ctx.config),
                        attempts = attempts,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Could not connect"
                    );
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(settings.retry_delay()) => {}
                }
            }
        }
    }

    flags.set_keep_connecting(false);
    None
}

async fn attempt(
    transport: &dyn Transport,
    ctx: &ConnectContext,
    limit: Option<Duration>,
) -> anyhow::Result<()> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, transport.connect(ctx))
            .await
            .map_err(|_| anyhow::anyhow!("connect attempt timed out after {:?}", limit))?,
        None => transport.connect(ctx).await,
    }
}
