use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest,
    handshake::client::Request,
    http::HeaderValue,
    protocol::{CloseFrame, Message, frame::coding::CloseCode},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    common::{ClientError, ListenerId, Listeners, Result, UserId},
    configs::NodeOptions,
    protocol::{NodeStats, OP_STATS, OutgoingMessage, op_of},
};

pub mod backoff;
pub mod constants;
mod socket;

pub use backoff::{Bounded, ExponentialBackoff, FixedDelay, ReconnectPolicy, policy_for};

use self::constants::*;

/// Credentials presented in the WebSocket upgrade request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeIdentity {
    pub user_id: UserId,
    pub shards: u32,
}

/// Payload of the reconnecting notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconnecting {
    pub attempt: u32,
    pub delay: Duration,
}

/// Subscriber lists of one node. They survive reconnects.
#[derive(Default)]
pub struct NodeListeners {
    pub ready: Listeners<()>,
    pub error: Listeners<ClientError>,
    pub reconnecting: Listeners<Reconnecting>,
    pub disconnect: Listeners<str>,
    pub message: Listeners<Value>,
}

impl NodeListeners {
    pub fn clear(&self) {
        self.ready.clear();
        self.error.clear();
        self.reconnecting.clear();
        self.disconnect.clear();
        self.message.clear();
    }
}

/// Outbound queue of the live socket, tagged with the socket's generation.
struct SocketHandle {
    generation: u64,
    tx: flume::Sender<Message>,
}

/// One persistent connection to an audio node.
///
/// Lifecycle: connecting -> ready -> closed -> reconnecting -> connecting, or
/// destroyed once closed with `1000 "destroy"`. At most one socket is attached
/// at a time; frames and close notifications from a superseded socket are
/// discarded by generation.
pub struct Node {
    options: NodeOptions,
    identity: NodeIdentity,
    ready: AtomicBool,
    connected: AtomicBool,
    connecting: AtomicBool,
    destroy_requested: AtomicBool,
    destroyed: AtomicBool,
    socket: Mutex<Option<SocketHandle>>,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
    policy: Mutex<Box<dyn ReconnectPolicy>>,
    generations: AtomicU64,
    stats: RwLock<NodeStats>,
    shutdown: CancellationToken,
    listeners: NodeListeners,
}

impl Node {
    pub fn new(options: NodeOptions, identity: NodeIdentity) -> Arc<Self> {
        let policy = policy_for(&options);
        Self::with_policy(options, identity, policy)
    }

    pub fn with_policy(
        options: NodeOptions,
        identity: NodeIdentity,
        policy: Box<dyn ReconnectPolicy>,
    ) -> Arc<Self> {
        Arc::new(Self {
            options,
            identity,
            ready: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
            destroy_requested: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            socket: Mutex::new(None),
            reconnect_timer: Mutex::new(None),
            policy: Mutex::new(policy),
            generations: AtomicU64::new(0),
            stats: RwLock::new(NodeStats::default()),
            shutdown: CancellationToken::new(),
            listeners: NodeListeners::default(),
        })
    }

    pub fn host(&self) -> &str {
        &self.options.host
    }

    pub fn port(&self) -> u16 {
        self.options.port
    }

    pub fn region(&self) -> Option<&str> {
        self.options.region.as_deref()
    }

    pub fn address(&self) -> String {
        self.options.websocket_url()
    }

    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.reconnect_timer
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Latest statistics pushed by the node.
    pub fn stats(&self) -> NodeStats {
        self.stats.read().clone()
    }

    pub fn listeners(&self) -> &NodeListeners {
        &self.listeners
    }

    pub fn on_ready<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.listeners.ready.add(callback)
    }

    pub fn on_error<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.listeners.error.add(callback)
    }

    pub fn on_reconnecting<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Reconnecting) + Send + Sync + 'static,
    {
        self.listeners.reconnecting.add(callback)
    }

    pub fn on_disconnect<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.listeners.disconnect.add(callback)
    }

    pub fn on_message<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.listeners.message.add(callback)
    }

    pub fn remove_all_listeners(&self) {
        self.listeners.clear();
    }

    /// Opens the socket and fires the ready listeners.
    ///
    /// Handshake failures are returned, not retried; retries only follow an
    /// established socket closing.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(ClientError::Destroyed(self.options.host.clone()));
        }
        if self.socket.lock().is_some() || self.connecting.swap(true, Ordering::AcqRel) {
            return Err(ClientError::AlreadyConnected(self.options.host.clone()));
        }

        let result = self.open_socket().await;
        self.connecting.store(false, Ordering::Release);
        result
    }

    async fn open_socket(self: &Arc<Self>) -> Result<()> {
        let request = self.handshake_request()?;
        debug!(
            "[{}] Connecting to node: {}",
            self.options.host,
            self.options.websocket_url()
        );

        let (ws, response) = tokio_tungstenite::connect_async(request).await?;
        trace!(status = ?response.status(), "[{}] Handshake complete", self.options.host);

        let (tx, rx) = flume::unbounded();
        let generation = {
            let mut socket = self.socket.lock();
            // Checked under the socket lock: a concurrent destroy either finds
            // this socket attached or is observed here.
            if self.destroy_requested.load(Ordering::Acquire) {
                drop(socket);
                debug!(
                    "[{}] Node destroyed during handshake; dropping socket",
                    self.options.host
                );
                drop(ws);
                return Err(ClientError::Destroyed(self.options.host.clone()));
            }
            let generation = self.generations.fetch_add(1, Ordering::AcqRel) + 1;
            *socket = Some(SocketHandle { generation, tx });
            generation
        };
        self.connected.store(true, Ordering::Release);
        self.ready.store(true, Ordering::Release);
        self.policy.lock().reset();

        tokio::spawn(socket::run(self.clone(), generation, ws, rx));

        info!("[{}] Node connected (socket #{})", self.options.host, generation);
        self.listeners.ready.emit(&());
        Ok(())
    }

    fn handshake_request(&self) -> Result<Request> {
        let mut request = self.options.websocket_url().into_client_request()?;
        let headers = [
            (HEADER_AUTHORIZATION, self.options.password.clone()),
            (HEADER_USER_ID, self.identity.user_id.to_string()),
            (HEADER_NUM_SHARDS, self.identity.shards.to_string()),
            (HEADER_CLIENT_NAME, CLIENT_NAME.to_string()),
        ];

        for (name, value) in headers {
            let header = HeaderValue::from_str(&value)
                .map_err(|_| ClientError::InvalidHeader { name, value: value.clone() })?;
            request.headers_mut().insert(name, header);
        }
        Ok(request)
    }

    /// Serializes and queues `message` on the live socket.
    ///
    /// Returns `false` when no socket is attached or encoding failed; the
    /// latter is also reported to the error listeners.
    pub fn send(&self, message: &OutgoingMessage) -> bool {
        let Some(tx) = self.socket.lock().as_ref().map(|socket| socket.tx.clone()) else {
            debug!(
                "[{}] Dropping {} for guild {}: no socket attached",
                self.options.host,
                message.op(),
                message.guild_id()
            );
            return false;
        };

        let payload = match message.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                self.emit_error(ClientError::Serialization(e));
                return false;
            }
        };

        trace!("[{}] TX: {}", self.options.host, payload);
        tx.send(Message::Text(payload.into())).is_ok()
    }

    /// Closes the live socket.
    ///
    /// `1000 "destroy"` is terminal; any other code goes through the reconnect
    /// policy. Returns `false` if no socket was attached.
    pub fn close(self: &Arc<Self>, code: u16, reason: &str) -> bool {
        let terminal = is_destroy_close(code, reason);
        if terminal {
            self.destroy_requested.store(true, Ordering::Release);
        }

        let generation = self.socket.lock().as_ref().map(|socket| {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_owned().into(),
            };
            let _ = socket.tx.send(Message::Close(Some(frame)));
            socket.generation
        });

        match generation {
            Some(generation) => {
                self.handle_close(generation, code, reason);
                true
            }
            None => {
                if terminal {
                    self.finish_destroy(reason);
                }
                false
            }
        }
    }

    /// Terminal close; also cancels a pending reconnect.
    pub fn destroy(self: &Arc<Self>) -> bool {
        self.close(DESTROY_CLOSE_CODE, DESTROY_CLOSE_REASON)
    }

    /// Applies a socket close. Notifications for a socket that is no longer
    /// attached are ignored.
    pub(crate) fn handle_close(self: &Arc<Self>, generation: u64, code: u16, reason: &str) {
        {
            let mut socket = self.socket.lock();
            match socket.as_ref() {
                Some(current) if current.generation == generation => {
                    socket.take();
                }
                _ => {
                    trace!(
                        "[{}] Ignoring close of superseded socket #{}",
                        self.options.host, generation
                    );
                    return;
                }
            }
        }

        self.connected.store(false, Ordering::Release);
        self.ready.store(false, Ordering::Release);

        if is_destroy_close(code, reason) || self.destroy_requested.load(Ordering::Acquire) {
            info!(
                "[{}] Node connection destroyed: code={}, reason='{}'",
                self.options.host, code, reason
            );
            self.finish_destroy(reason);
            return;
        }

        warn!(
            "[{}] Node connection closed: code={}, reason='{}'",
            self.options.host, code, reason
        );
        self.schedule_reconnect();
    }

    fn finish_destroy(&self, reason: &str) {
        self.destroy_requested.store(true, Ordering::Release);
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        if let Some(timer) = self.reconnect_timer.lock().take() {
            timer.abort();
        }
        self.listeners.disconnect.emit(reason);
    }

    /// Arms the one-shot reconnect timer using the node's policy.
    ///
    /// Does nothing while a socket is attached, a timer is pending, or the node
    /// is destroyed. Returns whether a timer was armed.
    pub fn schedule_reconnect(self: &Arc<Self>) -> bool {
        if self.destroy_requested.load(Ordering::Acquire) {
            return false;
        }
        if self.socket.lock().is_some() {
            debug!(
                "[{}] Socket attached; not scheduling reconnect",
                self.options.host
            );
            return false;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(
                "[{}] Cannot schedule reconnect outside a tokio runtime",
                self.options.host
            );
            return false;
        };

        let mut timer = self.reconnect_timer.lock();
        if timer.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }

        let (delay, attempt) = {
            let mut policy = self.policy.lock();
            (policy.next_delay(), policy.attempts())
        };
        let Some(delay) = delay else {
            drop(timer);
            error!(
                "[{}] Max reconnect attempts reached ({})",
                self.options.host, attempt
            );
            self.emit_error(ClientError::ReconnectExhausted {
                host: self.options.host.clone(),
                attempts: attempt,
            });
            self.listeners.disconnect.emit("reconnect attempts exhausted");
            return false;
        };

        let node: Weak<Node> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        *timer = Some(runtime.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let Some(node) = node.upgrade() else { return };
            node.reconnect_timer.lock().take();

            match node.connect().await {
                Ok(()) => {}
                Err(e @ (ClientError::AlreadyConnected(_) | ClientError::Destroyed(_))) => {
                    debug!("[{}] Reconnect skipped: {}", node.options.host, e);
                }
                Err(e) => {
                    warn!("[{}] Reconnect attempt failed: {}", node.options.host, e);
                    node.emit_error(e);
                    node.schedule_reconnect();
                }
            }
        }));
        drop(timer);

        info!(
            "[{}] Reconnecting in {:?} (attempt {})",
            self.options.host, delay, attempt
        );
        self.listeners
            .reconnecting
            .emit(&Reconnecting { attempt, delay });
        true
    }

    /// Parses one text frame from socket `generation` and hands it to the
    /// message listeners. Malformed frames are reported and dropped.
    pub(crate) fn handle_text(&self, generation: u64, text: &str) {
        if !self.is_current(generation) {
            trace!(
                "[{}] Dropping frame from superseded socket #{}",
                self.options.host, generation
            );
            return;
        }

        let doc: Value = match serde_json::from_str(text) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("[{}] Malformed frame dropped: {}", self.options.host, e);
                self.emit_error(ClientError::Parse(e));
                return;
            }
        };
        trace!("[{}] RX: {}", self.options.host, text);

        if op_of(&doc) == Some(OP_STATS) {
            match serde_json::from_value::<NodeStats>(doc.clone()) {
                Ok(stats) => *self.stats.write() = stats,
                Err(e) => debug!("[{}] Unreadable stats frame: {}", self.options.host, e),
            }
        }

        self.listeners.message.emit(&doc);
    }

    pub(crate) fn emit_error(&self, error: ClientError) {
        if !self.listeners.error.emit(&error) {
            error!("[{}] {}", self.options.host, error);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.socket
            .lock()
            .as_ref()
            .is_some_and(|socket| socket.generation == generation)
    }

    /// Attaches an in-memory socket so tests can observe outbound frames.
    #[cfg(test)]
    pub(crate) fn attach_test_socket(&self) -> (u64, flume::Receiver<Message>) {
        let generation = self.generations.fetch_add(1, Ordering::AcqRel) + 1;
        let (tx, rx) = flume::unbounded();
        *self.socket.lock() = Some(SocketHandle { generation, tx });
        self.connected.store(true, Ordering::Release);
        self.ready.store(true, Ordering::Release);
        (generation, rx)
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub fn is_destroy_close(code: u16, reason: &str) -> bool {
    code == DESTROY_CLOSE_CODE && reason == DESTROY_CLOSE_REASON
}
