//! Multiplexed RPC and push notifications over one websocket, using
//! tokio-tungstenite.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, Stream, StreamExt};
use livesync_shared::{Frame, Request, RpcErrorPayload};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::connection::{
    fire, ConnectionState, HandlerId, LifecycleEvent, LifecycleHandlers, ReconnectConfig,
    TransportEvent,
};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::router::NotificationRouter;
use crate::rpc::RpcClient;

type PendingCall = oneshot::Sender<std::result::Result<Value, RpcErrorPayload>>;

/// Per-connection bookkeeping. `pending` and `outbound` are replaced on
/// every reconnect.
#[derive(Default)]
struct Shared {
    next_request_id: u64,
    pending: HashMap<u64, PendingCall>,
    outbound: Option<UnboundedSender<Message>>,
    task: Option<JoinHandle<()>>,
    /// Bumped by every `connect` that starts a new loop.
    epoch: u64,
    closing: bool,
}

/// How the most recent connection attempt ended.
#[derive(Debug, Clone)]
enum AttemptOutcome {
    Opened,
    Failed(String),
    Closed,
}

/// Attempt outcomes, numbered so a waiter can tell a fresh outcome from
/// one that settled before it started waiting.
#[derive(Debug, Clone)]
struct Attempt {
    seq: u64,
    outcome: AttemptOutcome,
}

struct Inner {
    config: ClientConfig,
    reconnect: Mutex<ReconnectConfig>,
    router: Arc<NotificationRouter>,
    shared: Mutex<Shared>,
    handlers: Mutex<LifecycleHandlers>,
    state: watch::Sender<ConnectionState>,
    attempts: watch::Sender<Attempt>,
}

/// Handle to the websocket transport. Cloning is cheap and every clone
/// drives the same connection.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("state", &*self.inner.state.borrow())
            .field("pending", &self.inner.shared.lock().pending.len())
            .finish()
    }
}

impl Transport {
    pub fn new(config: ClientConfig, router: Arc<NotificationRouter>) -> Self {
        let reconnect = ReconnectConfig {
            enabled: true,
            retry_delay: config.retry_delay,
        };
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (attempts, _) = watch::channel(Attempt {
            seq: 0,
            outcome: AttemptOutcome::Closed,
        });
        Self {
            inner: Arc::new(Inner {
                config,
                reconnect: Mutex::new(reconnect),
                router,
                shared: Mutex::new(Shared::default()),
                handlers: Mutex::new(LifecycleHandlers::default()),
                state,
                attempts,
            }),
        }
    }

    pub fn router(&self) -> &Arc<NotificationRouter> {
        &self.inner.router
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    /// Subscribe to connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.borrow().is_connected()
    }

    pub fn pending_calls(&self) -> usize {
        self.inner.shared.lock().pending.len()
    }

    /// Turn automatic reconnection after a dropped socket on or off.
    pub fn set_reconnect(&self, enabled: bool) {
        self.inner.reconnect.lock().enabled = enabled;
    }

    pub fn register_handler(
        &self,
        event: LifecycleEvent,
        handler: impl Fn(&TransportEvent) + Send + Sync + 'static,
    ) -> HandlerId {
        self.inner.handlers.lock().register(event, Arc::new(handler))
    }

    pub fn unregister_handler(&self, event: LifecycleEvent, id: HandlerId) -> bool {
        self.inner.handlers.lock().unregister(event, id)
    }

    /// Start the connection loop for `url`. Does nothing when a loop is
    /// already running, unless that loop belongs to a closed connection.
    pub fn connect(&self, url: Url) {
        let mut shared = self.inner.shared.lock();
        if let Some(task) = shared.task.take() {
            if !task.is_finished() && !shared.closing {
                tracing::debug!("connection loop already running");
                shared.task = Some(task);
                return;
            }
            // A closed loop may still be finishing its close handshake.
            task.abort();
        }
        shared.closing = false;
        shared.epoch += 1;
        self.inner.set_state(ConnectionState::Connecting);
        let epoch = shared.epoch;
        shared.task = Some(tokio::spawn(connection_loop(self.inner.clone(), url, epoch)));
    }

    /// Connect to the configured endpoint and wait for the socket to open.
    ///
    /// Callers arriving while an attempt is in flight wait on that same
    /// attempt and see its outcome.
    pub async fn default_connect(&self) -> Result<()> {
        let url = self.inner.config.websocket_url()?;
        // Subscribe before looking at the state so an attempt that opens
        // in between is still observed.
        let mut attempts = self.inner.attempts.subscribe();
        let seen = attempts.borrow().seq;
        if self.is_connected() {
            return Ok(());
        }
        self.connect(url);

        let outcome = attempts
            .wait_for(|attempt| attempt.seq > seen)
            .await
            .map_err(|_| ClientError::Transport("transport dropped".to_string()))?
            .outcome
            .clone();

        match outcome {
            AttemptOutcome::Opened => Ok(()),
            AttemptOutcome::Failed(reason) => Err(ClientError::Transport(reason)),
            AttemptOutcome::Closed => Err(ClientError::NotConnected),
        }
    }

    /// Close the socket and stop reconnecting.
    ///
    /// The transport is disconnected when this returns: pending calls are
    /// rejected and new calls fail with `NotConnected`. A close frame is
    /// still sent to the server when the socket was open.
    pub fn close(&self) {
        let (outbound, task) = {
            let mut shared = self.inner.shared.lock();
            shared.closing = true;
            let outbound = shared.outbound.take();
            let task = if outbound.is_none() {
                shared.task.take()
            } else {
                None
            };
            (outbound, task)
        };
        match outbound {
            // The loop ends once the close handshake completes.
            Some(outbound) => drop(outbound.unbounded_send(Message::Close(None))),
            None => {
                if let Some(task) = task {
                    task.abort();
                }
            }
        }
        self.inner.on_socket_closed(None);
        self.inner.set_state(ConnectionState::Disconnected);
        self.inner.publish(AttemptOutcome::Closed);
    }

    /// Send a request and wait for its response.
    ///
    /// A call still pending when the socket closes resolves to
    /// [`ClientError::ConnectionLost`].
    pub async fn call_method(&self, method: &str, params: Value) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        let request_id = {
            let mut shared = self.inner.shared.lock();
            let Some(outbound) = shared.outbound.clone() else {
                return Err(ClientError::NotConnected);
            };
            shared.next_request_id += 1;
            let request_id = shared.next_request_id;
            let frame = Frame::Request(Request {
                request_id,
                method: method.to_string(),
                params,
            });
            let text = frame.to_json()?;
            shared.pending.insert(request_id, tx);
            if outbound.unbounded_send(Message::text(text)).is_err() {
                shared.pending.remove(&request_id);
                return Err(ClientError::Transport("socket writer closed".to_string()));
            }
            request_id
        };
        tracing::debug!("sent request {} {}", request_id, method);

        match rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(ClientError::Rpc {
                method: method.to_string(),
                error,
            }),
            Err(_) => Err(ClientError::ConnectionLost),
        }
    }
}

#[async_trait]
impl RpcClient for Transport {
    async fn call_method(&self, method: &str, params: Value) -> Result<Value> {
        Transport::call_method(self, method, params).await
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn publish(&self, outcome: AttemptOutcome) {
        self.attempts.send_modify(|attempt| {
            attempt.seq += 1;
            attempt.outcome = outcome;
        });
    }

    fn should_reconnect(&self) -> bool {
        !self.shared.lock().closing && self.reconnect.lock().enabled
    }

    /// Drop the writer and abandon every pending call. Dropping the senders
    /// wakes the waiting callers with `ConnectionLost`.
    ///
    /// With `Some(epoch)` nothing happens unless that loop is still the
    /// current one; the return value says whether it was.
    fn on_socket_closed(&self, epoch: Option<u64>) -> bool {
        let abandoned = {
            let mut shared = self.shared.lock();
            if epoch.is_some_and(|epoch| epoch != shared.epoch) {
                return false;
            }
            shared.outbound = None;
            std::mem::take(&mut shared.pending)
        };
        if !abandoned.is_empty() {
            tracing::debug!("abandoning {} pending calls", abandoned.len());
        }
        true
    }

    fn handle_text(&self, text: &str) {
        match Frame::parse(text) {
            Ok(Frame::Response(response)) => {
                let pending = self.shared.lock().pending.remove(&response.request_id);
                match pending {
                    Some(tx) => {
                        // The caller may have given up on the call.
                        drop(tx.send(response.into_result()));
                    }
                    None => tracing::debug!(
                        "dropping response for unknown request {}",
                        response.request_id
                    ),
                }
            }
            Ok(Frame::Notify(notify)) => self.router.on_notify(&notify),
            Ok(Frame::Request(request)) => {
                tracing::debug!("ignoring server request {}", request.method)
            }
            Err(e) => tracing::warn!("failed to parse frame: {}", e),
        }
    }
}

/// Connect, serve the socket until it closes, then wait the retry delay and
/// start over unless the transport was closed.
///
/// `epoch` identifies this loop. Once `connect` replaces it, the loop stops
/// touching shared state.
async fn connection_loop(inner: Arc<Inner>, url: Url, epoch: u64) {
    let mut attempt = 0u32;

    loop {
        match connect_async(url.as_str()).await {
            Ok((ws_stream, _response)) => {
                let (write, read) = ws_stream.split();
                let (sender, receiver) = unbounded();
                {
                    let mut shared = inner.shared.lock();
                    if shared.closing || shared.epoch != epoch {
                        return;
                    }
                    shared.outbound = Some(sender);
                    inner.set_state(ConnectionState::Connected);
                    inner.publish(AttemptOutcome::Opened);
                }
                attempt = 0;
                tracing::info!("websocket connected to {}", url);
                fire(&inner.handlers, TransportEvent::Open);

                tokio::select! {
                    _ = read_loop(&inner, read) => {}
                    _ = write_loop(write, receiver) => {}
                }

                if !inner.on_socket_closed(Some(epoch)) {
                    return;
                }
                tracing::info!("websocket to {} closed", url);
            }
            Err(e) => {
                if inner.shared.lock().epoch != epoch {
                    return;
                }
                // A failed attempt leaves the state alone; the close below
                // moves it on.
                let reason = e.to_string();
                tracing::error!("websocket error for {}: {}", url, reason);
                inner.publish(AttemptOutcome::Failed(reason.clone()));
                fire(&inner.handlers, TransportEvent::Error(reason));
            }
        }

        let reconnect = inner.should_reconnect();
        if reconnect {
            inner.set_state(ConnectionState::Reconnecting {
                attempt: attempt + 1,
            });
        } else {
            inner.set_state(ConnectionState::Disconnected);
        }
        fire(&inner.handlers, TransportEvent::Close);
        if !reconnect {
            break;
        }

        attempt += 1;
        let delay = inner.reconnect.lock().retry_delay;
        tracing::info!(
            "reconnecting to {} in {}ms (attempt {})",
            url,
            delay.as_millis(),
            attempt
        );
        tokio::time::sleep(delay).await;
    }
}

async fn read_loop<S>(inner: &Inner, mut read: S)
where
    S: Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(Message::Text(text)) => inner.handle_text(&text),
            Ok(Message::Close(_)) => {
                tracing::info!("websocket received close frame");
                break;
            }
            Ok(_) => {
                // Pings are answered by tungstenite; binary frames are unused.
            }
            Err(e) => {
                tracing::error!("websocket read error: {}", e);
                fire(&inner.handlers, TransportEvent::Error(e.to_string()));
                break;
            }
        }
    }
}

async fn write_loop<W>(mut write: W, mut receiver: UnboundedReceiver<Message>)
where
    W: futures_util::Sink<Message> + Unpin,
    W::Error: std::fmt::Display,
{
    while let Some(msg) = receiver.next().await {
        let is_close = matches!(msg, Message::Close(_));
        if let Err(e) = write.send(msg).await {
            tracing::error!("send failed: {}", e);
            return;
        }
        if is_close {
            break;
        }
    }
    // Writer finished; keep the select alive so the reader can finish the
    // close handshake.
    std::future::pending::<()>().await;
}
