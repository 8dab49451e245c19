//! WebSocket relay: fans indicator signals out to every connected client and
//! replays the durable queue-channel state to late joiners.
//!
//! The client registry and the durable state live under one mutex, and both
//! registration+replay and update+fan-out run inside a single lock hold, so
//! a client connecting during a broadcast can neither miss nor
//! double-receive the durable token.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex, Semaphore};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use beacon_core::Signal;

/// Default maximum number of concurrent client connections.
const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// Capacity of the in-process listener channel. Slow local listeners lag
/// rather than block fan-out.
const LOCAL_CHANNEL_CAPACITY: usize = 64;

struct RelayState {
    next_client_id: u64,
    /// Registered clients, id → outbound sender. Senders are unbounded so a
    /// broadcast never blocks on a slow socket; the per-client task drains
    /// them.
    clients: HashMap<u64, mpsc::UnboundedSender<Signal>>,
    /// Last queue-channel signal, replayed to newly joined clients.
    /// Incident/alert signals are transient and never stored here.
    queue_state: Option<Signal>,
}

/// Cloneable entry point into the relay, shared by the poller, the server's
/// per-client tasks, and in-process listeners.
#[derive(Clone)]
pub struct RelayHandle {
    state: Arc<Mutex<RelayState>>,
    local_tx: broadcast::Sender<Signal>,
}

impl RelayHandle {
    fn new() -> Self {
        let (local_tx, _) = broadcast::channel(LOCAL_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(RelayState {
                next_client_id: 0,
                clients: HashMap::new(),
                queue_state: None,
            })),
            local_tx,
        }
    }

    /// Update durable state (queue signals only) and fan the signal out to
    /// every registered client, then to in-process listeners. Dead client
    /// senders are pruned on the way.
    pub async fn broadcast(&self, signal: Signal) {
        {
            let mut state = self.state.lock().await;
            if signal.is_durable() {
                state.queue_state = Some(signal);
            }
            state.clients.retain(|id, tx| {
                if tx.send(signal).is_ok() {
                    true
                } else {
                    tracing::debug!(client_id = *id, "pruning dead client sender");
                    false
                }
            });
            tracing::debug!(signal = %signal, clients = state.clients.len(), "signal fanned out");
        }
        // Local listeners get their own dispatch; no listener is fine.
        let _ = self.local_tx.send(signal);
    }

    /// Subscribe an in-process listener (e.g. a local presentation layer).
    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.local_tx.subscribe()
    }

    /// Current durable queue-channel state.
    pub async fn queue_state(&self) -> Option<Signal> {
        self.state.lock().await.queue_state
    }

    pub async fn client_count(&self) -> usize {
        self.state.lock().await.clients.len()
    }

    /// Register a client. The durable queue state, if any, is enqueued to
    /// the new client inside the same lock hold that registers it.
    async fn register(&self) -> (u64, mpsc::UnboundedReceiver<Signal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().await;
        let id = state.next_client_id;
        state.next_client_id += 1;
        if let Some(queue) = state.queue_state {
            let _ = tx.send(queue);
            tracing::debug!(client_id = id, signal = %queue, "replaying queue state to new client");
        }
        state.clients.insert(id, tx);
        (id, rx)
    }

    async fn deregister(&self, id: u64) {
        self.state.lock().await.clients.remove(&id);
    }
}

// ---------------------------------------------------------------------------
// RelayServer
// ---------------------------------------------------------------------------

/// WebSocket server around a `RelayHandle`: accepts connections and spawns a
/// per-client handler until the cancellation token fires.
pub struct RelayServer {
    addr: SocketAddr,
    handle: RelayHandle,
    cancel: CancellationToken,
    max_connections: usize,
}

impl RelayServer {
    pub fn new(addr: SocketAddr, cancel: CancellationToken) -> Self {
        Self {
            addr,
            handle: RelayHandle::new(),
            cancel,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Set the maximum number of concurrent client connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// In-process entry point for the poller and local listeners.
    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    /// Bind TCP and run the accept loop.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!(addr = %self.addr, max_connections = self.max_connections, "relay listening");
        self.serve(listener).await
    }

    /// Bind and return the actual local address. Useful when binding port 0
    /// for an OS-assigned ephemeral port.
    pub async fn bind(&self) -> std::io::Result<(TcpListener, SocketAddr)> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "relay bound");
        Ok((listener, local_addr))
    }

    /// Run the accept loop on a pre-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_connections));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let permit = match semaphore.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    tracing::warn!(
                                        peer = %peer,
                                        max = self.max_connections,
                                        "connection limit reached, rejecting"
                                    );
                                    drop(stream);
                                    continue;
                                }
                            };
                            let handle = self.handle.clone();
                            let cancel = self.cancel.clone();
                            tokio::spawn(async move {
                                let _permit = permit;
                                match tokio_tungstenite::accept_async(stream).await {
                                    Ok(ws_stream) => {
                                        handle_client(ws_stream, handle, cancel).await;
                                        tracing::debug!(peer = %peer, "client handler finished");
                                    }
                                    Err(e) => {
                                        tracing::debug!(peer = %peer, error = %e, "ws handshake failed");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "TCP accept failed");
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("relay: cancellation requested, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-client handler
// ---------------------------------------------------------------------------

async fn handle_client(
    ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    handle: RelayHandle,
    cancel: CancellationToken,
) {
    let (client_id, mut outbound) = handle.register().await;
    tracing::info!(client_id, "client connected");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    loop {
        tokio::select! {
            // --- inbound frame from this client ---
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match Signal::from_token(&text) {
                            // Client-originated signals (operator toggling the
                            // queue indicator) are relayed exactly like
                            // poller-originated ones, sender included.
                            Some(signal) => handle.broadcast(signal).await,
                            None => {
                                tracing::warn!(client_id, token = %text, "ignoring unknown token");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if ws_tx.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!(client_id, "client disconnected");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(client_id, error = %e, "read error, dropping client");
                        break;
                    }
                }
            }

            // --- outbound signal for this client ---
            signal = outbound.recv() => {
                let Some(signal) = signal else { break };
                if let Err(e) = ws_tx.send(Message::Text(signal.token().to_string())).await {
                    // Delivery failure is isolated to this client.
                    tracing::debug!(client_id, error = %e, "send failed, dropping client");
                    break;
                }
            }

            // --- shutdown ---
            _ = cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    handle.deregister(client_id).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
