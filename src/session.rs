//! Room session
//!
//! `Room` is the caller's handle on one room + identity pairing. It runs
//! the join handshake:
//!
//! ```text
//! Idle → Connecting → Joining → Authenticating → SyncingPresence → Ready
//!                                (skipped for anonymous identities)
//! ```
//!
//! Each step sends a request and waits for its answer with a timeout.
//! A timeout or a lost connection resets the room and, unless the caller
//! asked to disconnect or reconnects are off, tries again after a fixed
//! delay. A rejected login ends the attempt. `disconnect` cancels an
//! attempt at any step, including a pending TCP connect.
//!
//! Per connection there is one reader task (frames → handlers, see
//! `handler.rs`) and one writer task (outbound channel → socket).

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::command::{Command, Outbound};
use crate::config::RoomConfig;
use crate::error::{HandshakeError, HandshakeStep, RoomError, TransportError};
use crate::event::{Ban, EventSink, RoomEvent};
use crate::frame::{FrameReader, FrameWriter};
use crate::identity::{anon_tag_from_time, Identity, IdentityKind};
use crate::markup::{encode_markup, SenderMarkup};
use crate::message::Message;
use crate::room::{ConnectionState, Moderator, RoomSnapshot, RoomState};
use crate::shard;
use crate::signal::{Signal, Signals};
use crate::transport::{writer_loop, BoxedStream, Connection, Connector, TcpConnector};
use crate::types::{RoomName, SessionKey};

const NONCE_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Shared between the `Room` handle and its background tasks
pub(crate) struct RoomInner {
    pub(crate) key: SessionKey,
    pub(crate) config: RoomConfig,
    pub(crate) identity: Arc<Identity>,
    connector: Arc<dyn Connector>,
    pub(crate) state: Mutex<RoomState>,
    pub(crate) signals: Signals,
    pub(crate) events: EventSink,
    connection: Mutex<Option<Connection>>,
    /// Delayed reconnect scheduled after a lost connection
    pending_reconnect: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
    connecting: AtomicBool,
    disconnect_requested: AtomicBool,
    /// Wakes a connect attempt parked outside the handshake waits
    cancel: Notify,
}

/// Handle on one joined (or joining) room
///
/// # Example
/// ```ignore
/// let identity = Identity::temporary("visitor");
/// let (room, mut events) = Room::new("khouwe", identity, RoomConfig::default())?;
/// room.connect().await?;
/// while let Some(event) = events.recv().await {
///     if let RoomEvent::Message { message } = event {
///         println!("{}", message);
///     }
/// }
/// ```
pub struct Room {
    inner: Arc<RoomInner>,
}

impl Room {
    /// Create a room session over TCP
    ///
    /// Fails only if the room name hashes to no shard.
    pub fn new(
        name: &str,
        identity: Arc<Identity>,
        config: RoomConfig,
    ) -> Result<(Self, mpsc::Receiver<RoomEvent>), RoomError> {
        Self::with_connector(name, identity, config, Arc::new(TcpConnector))
    }

    /// Create a room session over a custom connector
    pub fn with_connector(
        name: &str,
        identity: Arc<Identity>,
        config: RoomConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<(Self, mpsc::Receiver<RoomEvent>), RoomError> {
        let (inner, events) = RoomInner::new(name, identity, config, connector)?;
        Ok((Self { inner }, events))
    }

    /// Run the join handshake until the room is ready
    ///
    /// Connection failures and handshake timeouts are retried after the
    /// configured delay while `auto_reconnect` is on. Returns
    /// `RoomError::Auth` on a rejected login and `RoomError::Cancelled` if
    /// `disconnect` is called meanwhile. A reconnect scheduled after a lost
    /// connection is cancelled in favour of this attempt.
    pub async fn connect(&self) -> Result<(), RoomError> {
        if self.inner.connecting.swap(true, Ordering::AcqRel) {
            return Err(RoomError::AlreadyConnecting);
        }
        self.inner.cancel_reconnect();
        self.inner.disconnect_requested.store(false, Ordering::Release);

        let _attempt = ConnectAttempt(Arc::clone(&self.inner));
        self.inner.connect_loop().await
    }

    /// Close the connection and stop reconnecting
    ///
    /// Emits `Disconnect` when a connection was open, so keep draining
    /// events while this runs.
    pub async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    // ── Outbound operations ─────────────────────────────────────────

    /// Post a message to the room
    pub fn send_message(&self, body: &str) -> Result<(), RoomError> {
        let inner = &self.inner;
        inner.require_ready()?;

        let style;
        let anon_tag;
        let sender = match inner.identity.kind() {
            IdentityKind::Registered => {
                style = inner.identity.style();
                SenderMarkup::Registered(&style)
            }
            IdentityKind::Temporary => SenderMarkup::Temporary,
            IdentityKind::Anonymous => {
                anon_tag = anon_tag_from_time(&inner.state.lock().server_time_raw);
                SenderMarkup::Anonymous(&anon_tag)
            }
        };

        inner.send(Outbound::Message {
            nonce: nonce(),
            body: encode_markup(body, sender),
        })
    }

    /// Delete one published message by its final id (moderators only)
    pub fn delete_message(&self, message_id: &str) -> Result<(), RoomError> {
        self.inner.require_ready()?;
        self.inner.send(Outbound::DeleteMessage {
            message_id: message_id.to_string(),
        })
    }

    /// Delete every message by the author of `message`
    pub fn delete_all(&self, message: &Message) -> Result<(), RoomError> {
        self.inner.require_ready()?;
        self.inner.send(Outbound::DeleteAll {
            unique_id: message.unique_id.clone(),
            ip: message.origin_ip.clone(),
            name: message.identity.name(),
        })
    }

    /// Block the author of `message`
    pub fn ban(&self, message: &Message) -> Result<(), RoomError> {
        self.inner.require_ready()?;
        self.inner.send(Outbound::Block {
            unique_id: message.unique_id.clone(),
            ip: message.origin_ip.clone(),
            name: message.identity.name(),
        })
    }

    /// Lift a block
    pub fn unban(&self, ban: &Ban) -> Result<(), RoomError> {
        self.inner.require_ready()?;
        self.inner.send(Outbound::RemoveBlock {
            unique_id: ban.unique_id.clone(),
            ip: ban.ip.clone(),
        })
    }

    // ── State accessors ─────────────────────────────────────────────

    pub fn name(&self) -> RoomName {
        self.inner.state.lock().name.clone()
    }

    pub fn hostname(&self) -> String {
        self.inner.state.lock().hostname.clone()
    }

    pub fn session_key(&self) -> SessionKey {
        self.inner.key
    }

    pub fn identity(&self) -> Arc<Identity> {
        Arc::clone(&self.inner.identity)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.lock().connection_state
    }

    pub fn is_ready(&self) -> bool {
        self.connection_state() == ConnectionState::Ready
    }

    pub fn state(&self) -> RoomSnapshot {
        self.inner.state.lock().snapshot()
    }

    pub fn members(&self) -> Vec<Arc<Identity>> {
        self.inner.state.lock().presence.members()
    }

    pub fn moderators(&self) -> Vec<Moderator> {
        self.inner.state.lock().moderators.values().cloned().collect()
    }

    /// Owner or listed moderator (case-insensitive)
    pub fn is_moderator(&self, name: &str) -> bool {
        self.inner.state.lock().is_moderator(name)
    }

    /// Cached message by final id
    pub fn message(&self, final_id: &str) -> Option<Arc<Message>> {
        self.inner.state.lock().cache.get(final_id)
    }

    pub fn last_message(&self) -> Option<Arc<Message>> {
        self.inner.state.lock().cache.most_recent()
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("key", &self.inner.key)
            .field("name", &self.name())
            .field("state", &self.connection_state())
            .finish()
    }
}

impl Drop for Room {
    fn drop(&mut self) {
        // No async here: stop reconnecting and kill the tasks.
        self.inner.request_disconnect();
        self.inner.cancel_reconnect();
        self.inner.teardown();
    }
}

/// Clears the in-flight flag, and cleans up a half-done handshake if the
/// connect future is dropped
struct ConnectAttempt(Arc<RoomInner>);

impl Drop for ConnectAttempt {
    fn drop(&mut self) {
        let state = self.0.state.lock().connection_state;
        if !matches!(state, ConnectionState::Ready | ConnectionState::Idle) {
            debug!(room = %self.0.key, "connect attempt abandoned in {:?}", state);
            self.0.teardown();
            self.0.set_state(ConnectionState::Idle);
        }
        self.0.connecting.store(false, Ordering::Release);
    }
}

impl RoomInner {
    pub(crate) fn new(
        name: &str,
        identity: Arc<Identity>,
        config: RoomConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<RoomEvent>), RoomError> {
        let name = RoomName::new(name);
        let hostname = shard::hostname_in(name.as_str(), &config.service_domain)?;
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity.max(1));

        let mut state = RoomState::new(name, hostname, config.cache_capacity);
        state.identities.insert(&identity);

        let inner = Arc::new(Self {
            key: SessionKey::new(),
            config,
            identity,
            connector,
            state: Mutex::new(state),
            signals: Signals::new(),
            events: EventSink::new(event_tx),
            connection: Mutex::new(None),
            pending_reconnect: Mutex::new(None),
            generation: AtomicU64::new(0),
            connecting: AtomicBool::new(false),
            disconnect_requested: AtomicBool::new(false),
            cancel: Notify::new(),
        });
        Ok((inner, event_rx))
    }

    pub(crate) fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if state.connection_state != next {
            debug!(
                room = %state.name,
                session = %self.key,
                "state {:?} -> {:?}",
                state.connection_state,
                next
            );
            state.connection_state = next;
        }
    }

    /// `Cancelled` once the caller asked to disconnect
    fn check_cancelled(&self) -> Result<(), RoomError> {
        if self.disconnect_requested.load(Ordering::Acquire) {
            Err(RoomError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run `fut` unless `disconnect` is called first
    async fn unless_cancelled<T>(&self, fut: impl Future<Output = T>) -> Result<T, RoomError> {
        let cancelled = self.cancel.notified();
        tokio::pin!(cancelled);
        cancelled.as_mut().enable();
        self.check_cancelled()?;
        tokio::select! {
            _ = &mut cancelled => Err(RoomError::Cancelled),
            out = fut => Ok(out),
        }
    }

    /// Set the cancel flag and wake a parked connect attempt
    fn request_disconnect(&self) {
        self.disconnect_requested.store(true, Ordering::Release);
        self.cancel.notify_waiters();
    }

    fn require_ready(&self) -> Result<(), RoomError> {
        if self.state.lock().connection_state == ConnectionState::Ready {
            Ok(())
        } else {
            Err(RoomError::NotConnected)
        }
    }

    pub(crate) fn send(&self, command: Outbound) -> Result<(), RoomError> {
        let connection = self.connection.lock();
        let connection = connection.as_ref().ok_or(TransportError::Closed)?;
        debug!(session = %self.key, command = command.name(), "send");
        connection.send(command.to_frame())?;
        Ok(())
    }

    /// Retry `establish` until ready, cancelled or fatally rejected
    async fn connect_loop(self: &Arc<Self>) -> Result<(), RoomError> {
        loop {
            if self.disconnect_requested.load(Ordering::Acquire) {
                return Err(RoomError::Cancelled);
            }

            let err = match self.establish().await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            self.teardown();
            if self.disconnect_requested.load(Ordering::Acquire) {
                self.set_state(ConnectionState::Idle);
                return Err(RoomError::Cancelled);
            }
            if !err.is_recoverable() || !self.config.auto_reconnect {
                warn!(session = %self.key, "join failed: {}", err);
                self.set_state(ConnectionState::Idle);
                return Err(err);
            }

            warn!(
                session = %self.key,
                "join failed: {}; retrying in {:?}",
                err,
                self.config.reconnect_delay
            );
            self.set_state(ConnectionState::Reconnecting);
            if self
                .unless_cancelled(tokio::time::sleep(self.config.reconnect_delay))
                .await
                .is_err()
            {
                self.set_state(ConnectionState::Idle);
                return Err(RoomError::Cancelled);
            }
        }
    }

    /// One pass through the handshake
    async fn establish(self: &Arc<Self>) -> Result<(), RoomError> {
        let timeout = self.config.handshake_timeout;
        let (room, hostname) = {
            let state = self.state.lock();
            (state.name.clone(), state.hostname.clone())
        };

        self.set_state(ConnectionState::Connecting);
        info!(room = %room, session = %self.key, "connecting to {}:{}", hostname, self.config.port);
        let connecting = tokio::time::timeout(
            self.config.connect_timeout,
            self.connector.connect(&hostname, self.config.port),
        );
        let stream = match self.unless_cancelled(connecting).await? {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(TransportError::Io(e).into()),
            Err(_) => return Err(HandshakeError::Timeout(HandshakeStep::Connect).into()),
        };
        self.check_cancelled()?;
        self.attach(stream);

        self.set_state(ConnectionState::Joining);
        let inited = self.signals.register(Signal::Inited);
        self.send(Outbound::Auth {
            room: room.to_string(),
            session_id: session_placeholder(),
        })?;
        inited.wait(timeout, HandshakeStep::Join).await?;
        self.check_cancelled()?;

        match self.identity.kind() {
            IdentityKind::Anonymous => {}
            kind => {
                self.set_state(ConnectionState::Authenticating);
                let accepted = self.signals.register(Signal::Authenticated);
                let password = match kind {
                    IdentityKind::Registered => self.identity.credential().map(str::to_string),
                    _ => None,
                };
                self.send(Outbound::Login {
                    name: self.identity.name(),
                    password,
                })?;
                accepted.wait(timeout, HandshakeStep::Authenticate).await?;
                self.check_cancelled()?;
            }
        }

        self.set_state(ConnectionState::SyncingPresence);
        let synced = self.signals.register(Signal::ParticipantsSynced);
        self.send(Outbound::GetParticipants)?;
        synced.wait(timeout, HandshakeStep::SyncPresence).await?;
        self.check_cancelled()?;

        let profile = tokio::time::timeout(timeout, self.identity.ready());
        if self.unless_cancelled(profile).await?.is_err() {
            warn!(session = %self.key, "profile not ready in time; using current style");
        }
        if self.identity.style().styles_on {
            self.send(Outbound::EnableBackground)?;
        }

        {
            // Checked under the state lock so `disconnect` either sees Ready
            // or cancels this attempt.
            let mut state = self.state.lock();
            self.check_cancelled()?;
            state.connection_state = ConnectionState::Ready;
        }
        info!(room = %room, session = %self.key, identity = %self.identity.name(), "joined");
        self.events.emit(RoomEvent::Connect).await;
        Ok(())
    }

    /// Spawn reader and writer tasks for a fresh stream
    fn attach(self: &Arc<Self>, stream: BoxedStream) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let keepalive = self.config.keepalive_interval;
        let inner = Arc::clone(self);
        let writer = tokio::spawn(async move {
            if let Err(e) = writer_loop(FrameWriter::new(write_half), outbound_rx, keepalive).await {
                warn!(session = %inner.key, "write failed: {}", e);
                inner.on_transport_closed(generation).await;
            }
        });

        let inner = Arc::clone(self);
        let reader = tokio::spawn(async move {
            let mut frames = FrameReader::new(read_half);
            loop {
                match frames.read_frame().await {
                    Ok(Some(frame)) => {
                        let events = inner.handle_frame(&frame);
                        inner.events.emit_all(events).await;
                    }
                    Ok(None) => {
                        debug!(session = %inner.key, "connection closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!(session = %inner.key, "read failed: {}", e);
                        break;
                    }
                }
            }
            inner.on_transport_closed(generation).await;
        });

        let previous = self
            .connection
            .lock()
            .replace(Connection::new(generation, outbound_tx, reader, writer));
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Parse and dispatch one inbound frame
    pub(crate) fn handle_frame(&self, frame: &str) -> Vec<RoomEvent> {
        match Command::parse(frame) {
            Ok(Some(command)) => self.dispatch(command),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(session = %self.key, "dropping frame: {}", e);
                Vec::new()
            }
        }
    }

    /// Reader or writer saw the connection end
    async fn on_transport_closed(self: &Arc<Self>, generation: u64) {
        let connection = {
            let mut guard = self.connection.lock();
            if guard.as_ref().map(|c| c.generation) == Some(generation) {
                guard.take()
            } else {
                None
            }
        };
        // Stale task or already torn down.
        let Some(connection) = connection else {
            return;
        };
        connection.abort();
        self.signals.clear();

        let reconnect =
            self.config.auto_reconnect && !self.disconnect_requested.load(Ordering::Acquire);
        let was_ready = {
            let mut state = self.state.lock();
            let was_ready = state.connection_state == ConnectionState::Ready;
            if was_ready {
                state.reset();
                state.connection_state = if reconnect {
                    ConnectionState::Reconnecting
                } else {
                    ConnectionState::Idle
                };
            }
            was_ready
        };

        // Mid-handshake closes surface through the pending wait instead.
        if !was_ready {
            return;
        }

        info!(session = %self.key, "connection lost");
        if reconnect {
            self.schedule_reconnect();
        }
        self.events.emit(RoomEvent::Disconnect).await;
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(inner.config.reconnect_delay).await;
            if inner.disconnect_requested.load(Ordering::Acquire) {
                return;
            }
            if inner.connecting.swap(true, Ordering::AcqRel) {
                debug!(session = %inner.key, "connect already in flight; skipping reconnect");
                return;
            }

            let _attempt = ConnectAttempt(Arc::clone(&inner));
            let state = inner.state.lock().connection_state;
            if state != ConnectionState::Reconnecting {
                debug!(session = %inner.key, "room is {:?}; skipping reconnect", state);
                return;
            }
            match inner.connect_loop().await {
                Ok(()) => info!(session = %inner.key, "reconnected"),
                Err(e) => error!(session = %inner.key, "reconnect failed: {}", e),
            }
        });

        if let Some(previous) = self.pending_reconnect.lock().replace(task) {
            previous.abort();
        }
    }

    /// Stop a scheduled reconnect that has not started its handshake
    fn cancel_reconnect(&self) {
        if let Some(task) = self.pending_reconnect.lock().take() {
            task.abort();
        }
    }

    async fn disconnect(&self) {
        self.request_disconnect();
        self.cancel_reconnect();
        let connection = self.connection.lock().take();
        self.signals.clear();

        let Some(connection) = connection else {
            let mut state = self.state.lock();
            state.reset();
            state.connection_state = ConnectionState::Idle;
            return;
        };

        self.set_state(ConnectionState::Disconnecting);
        connection.close(self.config.disconnect_timeout).await;
        {
            let mut state = self.state.lock();
            state.reset();
            state.connection_state = ConnectionState::Idle;
        }
        info!(session = %self.key, "disconnected");
        self.events.emit(RoomEvent::Disconnect).await;
    }

    /// Drop the connection and connection-scoped state, no events
    fn teardown(&self) {
        if let Some(connection) = self.connection.lock().take() {
            connection.abort();
        }
        self.signals.clear();
        self.state.lock().reset();
    }
}

/// 16-digit id sent in place of a real session id in `bauth`
fn session_placeholder() -> String {
    rand::thread_rng()
        .gen_range(1_000_000_000_000_000u64..10_000_000_000_000_000)
        .to_string()
}

/// 4-character base-36 message nonce
fn nonce() -> String {
    let mut rng = rand::thread_rng();
    (0..4)
        .map(|_| NONCE_ALPHABET[rng.gen_range(0..NONCE_ALPHABET.len())] as char)
        .collect()
}
