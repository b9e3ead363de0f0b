use crate::observer::{Subscribers, Subscription};
use crate::session::SessionStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Application destination every outbound chat message is published to.
pub const SEND_DESTINATION: &str = "/app/chat.sendMessage";

/// Private queue the client subscribes to for inbound messages.
pub fn inbound_queue(user_id: &str) -> String {
    format!("/user/{user_id}/queue/messages")
}

/// Delay before reconnect attempt `attempt` (1-based): base × 2^attempt.
pub fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.pow(attempt)
}

#[derive(Debug, Clone, Error)]
pub enum ChatError {
    #[error("authentication token not available")]
    NotAuthenticated,
    #[error("chat service not connected")]
    NotConnected,
    #[error("chat connection failed: {0}")]
    Connect(String),
    #[error("chat codec error: {0}")]
    Codec(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
}

/// A chat message envelope as it travels over the broker. Immutable once
/// created; the timestamp is client-generated for sent messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: Participant,
    pub receiver: Participant,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// The conversation a message belongs to, from `me`'s point of view:
    /// whichever endpoint is not the authenticated user.
    pub fn counterpart(&self, me: &str) -> &str {
        if self.sender.id == me {
            &self.receiver.id
        } else {
            &self.sender.id
        }
    }
}

/// Conversation state mirrored to subscribers.
///
/// `messages` is always the log of the active conversation (empty when no
/// chat is selected); `conversations` keeps the full per-counterpart logs.
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    pub is_connected: bool,
    pub messages: Vec<ChatMessage>,
    pub conversations: HashMap<String, Vec<ChatMessage>>,
    pub active_chat_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Outbound publish command handed to the transport task.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub destination: String,
    pub payload: Value,
}

/// A live pub/sub session: inbound message bodies from the subscribed
/// queue, and a sender for outbound publishes. Dropping the sender closes
/// the session.
pub struct ChatLink {
    pub inbound: UnboundedReceiver<Value>,
    pub outbound: UnboundedSender<OutboundFrame>,
}

/// Seam between the store and the realtime transport, so tests can drive
/// scripted sessions.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open a session against `url`, authenticating with the bearer token
    /// and subscribing to `destination`.
    async fn connect(
        &self,
        url: &str,
        token: &str,
        destination: &str,
    ) -> Result<ChatLink, ChatError>;
}

struct ChatRuntime {
    phase: ConnectionPhase,
    attempts: u32,
    link: Option<UnboundedSender<OutboundFrame>>,
    pump: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    // Held for its Drop: detaches the logout watcher with the store.
    _session_watch: Option<Subscription>,
}

impl Default for ChatRuntime {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            attempts: 0,
            link: None,
            pump: None,
            reconnect: None,
            _session_watch: None,
        }
    }
}

/// Realtime conversation store.
///
/// Routes every inbound message into the conversation log keyed by the
/// non-self participant, applies optimistic local appends on send, and
/// retries failed connections with bounded exponential backoff. A sent
/// message and its later server echo are both retained; the display layer
/// tolerates the duplicate rather than the store guessing a correlation.
#[derive(Clone)]
pub struct ChatStore {
    inner: Arc<RwLock<ChatState>>,
    runtime: Arc<Mutex<ChatRuntime>>,
    session: SessionStore,
    transport: Arc<dyn ChatTransport>,
    ws_url: String,
    reconnect_base: Duration,
    subscribers: Subscribers<ChatState>,
}

impl ChatStore {
    pub fn new(
        session: SessionStore,
        transport: Arc<dyn ChatTransport>,
        ws_url: impl Into<String>,
    ) -> Self {
        let store = Self {
            inner: Arc::new(RwLock::new(ChatState::default())),
            runtime: Arc::new(Mutex::new(ChatRuntime::default())),
            session: session.clone(),
            transport,
            ws_url: ws_url.into(),
            reconnect_base: RECONNECT_BASE_DELAY,
            subscribers: Subscribers::new(),
        };
        // Tear the chat session down when the user signs out.
        let watcher = store.clone();
        let subscription = session.subscribe(move |session| {
            if !session.is_authenticated && watcher.inner.read().is_connected {
                watcher.disconnect();
            }
        });
        store.runtime.lock()._session_watch = Some(subscription);
        store
    }

    /// Override the reconnect backoff base (default one second).
    pub fn with_reconnect_base(mut self, base: Duration) -> Self {
        self.reconnect_base = base;
        self
    }

    pub fn state(&self) -> ChatState {
        self.inner.read().clone()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.runtime.lock().phase
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.runtime.lock().attempts
    }

    pub fn subscribe(&self, callback: impl Fn(&ChatState) + Send + Sync + 'static) -> Subscription {
        self.subscribers.subscribe(callback)
    }

    /// Explicit connect request. Resets the retry budget, then attempts the
    /// connection; failures schedule automatic retries.
    pub async fn connect(&self) -> Result<(), ChatError> {
        {
            let mut runtime = self.runtime.lock();
            runtime.attempts = 0;
            if let Some(timer) = runtime.reconnect.take() {
                timer.abort();
            }
        }
        self.try_connect().await
    }

    async fn try_connect(&self) -> Result<(), ChatError> {
        if self.inner.read().is_connected {
            debug!("chat already connected");
            return Ok(());
        }
        let Some(token) = self.session.token() else {
            self.update(|state| {
                state.error = Some(
                    "Authentication token not available. Cannot connect to chat.".to_string(),
                );
            });
            return Err(ChatError::NotAuthenticated);
        };
        let Some(user_id) = self.session.user_id() else {
            self.update(|state| {
                state.error = Some("User identity not available. Cannot connect to chat.".to_string());
            });
            return Err(ChatError::NotAuthenticated);
        };

        self.runtime.lock().phase = ConnectionPhase::Connecting;
        let destination = inbound_queue(&user_id);
        match self
            .transport
            .connect(&self.ws_url, &token, &destination)
            .await
        {
            Ok(ChatLink { inbound, outbound }) => {
                {
                    let mut runtime = self.runtime.lock();
                    runtime.link = Some(outbound);
                    runtime.attempts = 0;
                    runtime.phase = ConnectionPhase::Connected;
                }
                self.update(|state| {
                    state.is_connected = true;
                    state.error = None;
                });
                self.spawn_pump(user_id, inbound);
                Ok(())
            }
            Err(err) => {
                warn!(%err, url = %self.ws_url, "chat connection failed");
                self.update(|state| {
                    state.is_connected = false;
                    state.error = Some("Chat connection failed.".to_string());
                });
                if !self.schedule_reconnect() {
                    self.runtime.lock().phase = ConnectionPhase::Failed;
                    self.update(|state| {
                        state.error =
                            Some("Chat connection failed; reconnect attempts exhausted.".to_string());
                    });
                }
                Err(err)
            }
        }
    }

    fn spawn_pump(&self, me: String, mut inbound: UnboundedReceiver<Value>) {
        let store = self.clone();
        let pump = tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                match serde_json::from_value::<ChatMessage>(frame) {
                    Ok(message) => store.on_inbound(&me, message),
                    Err(err) => warn!(%err, "discarding malformed chat frame"),
                }
            }
            // The transport side went away without an explicit disconnect.
            store.runtime.lock().link = None;
            store.update(|state| {
                state.is_connected = false;
                state.error = Some("Chat connection lost.".to_string());
            });
            if !store.schedule_reconnect() {
                store.runtime.lock().phase = ConnectionPhase::Failed;
            }
        });
        self.runtime.lock().pump = Some(pump);
    }

    /// Schedule the next reconnect attempt, or report that the budget is
    /// spent. Delay doubles per attempt.
    fn schedule_reconnect(&self) -> bool {
        let mut runtime = self.runtime.lock();
        if runtime.attempts >= MAX_RECONNECT_ATTEMPTS {
            return false;
        }
        runtime.attempts += 1;
        runtime.phase = ConnectionPhase::Reconnecting;
        let delay = reconnect_delay(self.reconnect_base, runtime.attempts);
        debug!(attempt = runtime.attempts, ?delay, "scheduling chat reconnect");
        if let Some(previous) = runtime.reconnect.take() {
            previous.abort();
        }
        runtime.reconnect = Some(tokio::spawn(retry_after(self.clone(), delay)));
        true
    }

    /// Tear down the connection and clear all conversation state. This is
    /// destructive: messages, conversations, and the active chat are gone.
    pub fn disconnect(&self) {
        {
            let mut runtime = self.runtime.lock();
            if let Some(timer) = runtime.reconnect.take() {
                timer.abort();
            }
            if let Some(pump) = runtime.pump.take() {
                pump.abort();
            }
            runtime.link = None;
            runtime.attempts = 0;
            runtime.phase = ConnectionPhase::Disconnected;
        }
        let snapshot = {
            let mut state = self.inner.write();
            *state = ChatState::default();
            state.clone()
        };
        self.subscribers.notify(&snapshot);
    }

    /// Publish a message and optimistically append it locally. Requires a
    /// live connection and a known sender identity; otherwise nothing is
    /// mutated and nothing is sent.
    pub fn send_message(
        &self,
        receiver_id: &str,
        content: impl Into<String>,
    ) -> Result<(), ChatError> {
        let link = {
            let runtime = self.runtime.lock();
            runtime.link.clone()
        };
        let (Some(link), true) = (link, self.inner.read().is_connected) else {
            warn!("cannot send message: chat service not connected");
            return Err(ChatError::NotConnected);
        };
        let Some(sender_id) = self.session.user_id() else {
            warn!("cannot send message: sender identity unknown");
            return Err(ChatError::NotAuthenticated);
        };

        let message = ChatMessage {
            sender: Participant { id: sender_id },
            receiver: Participant {
                id: receiver_id.to_string(),
            },
            content: content.into(),
            timestamp: Utc::now(),
        };
        let payload =
            serde_json::to_value(&message).map_err(|err| ChatError::Codec(err.to_string()))?;
        link.send(OutboundFrame {
            destination: SEND_DESTINATION.to_string(),
            payload,
        })
        .map_err(|_| ChatError::NotConnected)?;

        self.append(receiver_id, message);
        Ok(())
    }

    /// Select the active conversation and load its full log into the view.
    pub fn set_active_chat(&self, counterpart_id: impl Into<String>) {
        let id = counterpart_id.into();
        let snapshot = {
            let mut state = self.inner.write();
            state.messages = state.conversations.get(&id).cloned().unwrap_or_default();
            state.active_chat_id = Some(id);
            state.clone()
        };
        self.subscribers.notify(&snapshot);
    }

    fn on_inbound(&self, me: &str, message: ChatMessage) {
        let counterpart = message.counterpart(me).to_string();
        self.append(&counterpart, message);
    }

    /// Append to a conversation log, and to the active view when that
    /// conversation is selected.
    fn append(&self, counterpart: &str, message: ChatMessage) {
        let snapshot = {
            let mut state = self.inner.write();
            state
                .conversations
                .entry(counterpart.to_string())
                .or_default()
                .push(message.clone());
            if state.active_chat_id.as_deref() == Some(counterpart) {
                state.messages.push(message);
            }
            state.clone()
        };
        self.subscribers.notify(&snapshot);
    }

    fn update(&self, mutate: impl FnOnce(&mut ChatState)) {
        let snapshot = {
            let mut state = self.inner.write();
            mutate(&mut state);
            state.clone()
        };
        self.subscribers.notify(&snapshot);
    }
}

// Boxed so the retry task can re-enter `try_connect` without an infinitely
// recursive future type.
fn retry_after(store: ChatStore, delay: Duration) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        tokio::time::sleep(delay).await;
        if let Err(err) = store.try_connect().await {
            debug!(%err, "chat reconnect attempt failed");
        }
    })
}

/// Websocket transport speaking the backend's JSON pub/sub frames: a
/// `connect` frame carrying the bearer header, a `subscribe` frame for the
/// private queue, then `send` frames out and `message` frames in.
pub struct WsTransport;

#[async_trait]
impl ChatTransport for WsTransport {
    async fn connect(
        &self,
        url: &str,
        token: &str,
        destination: &str,
    ) -> Result<ChatLink, ChatError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|err| ChatError::Connect(err.to_string()))?;
        let (mut sink, mut source) = stream.split();

        let connect_frame = json!({
            "type": "connect",
            "headers": { "Authorization": format!("Bearer {token}") }
        });
        sink.send(Message::Text(connect_frame.to_string().into()))
            .await
            .map_err(|err| ChatError::Connect(err.to_string()))?;
        let subscribe_frame = json!({ "type": "subscribe", "destination": destination });
        sink.send(Message::Text(subscribe_frame.to_string().into()))
            .await
            .map_err(|err| ChatError::Connect(err.to_string()))?;

        let (inbound_tx, inbound) = unbounded_channel();
        let (outbound, mut outbound_rx) = unbounded_channel::<OutboundFrame>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = outbound_rx.recv() => match frame {
                        Some(frame) => {
                            let text = json!({
                                "type": "send",
                                "destination": frame.destination,
                                "body": frame.payload
                            })
                            .to_string();
                            if sink.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        // Store side dropped the link: close cleanly.
                        None => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    incoming = source.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<Value>(&text) {
                                Ok(mut frame) => {
                                    let body = if let Some(body) = frame.get_mut("body") {
                                        body.take()
                                    } else {
                                        frame
                                    };
                                    if inbound_tx.send(body).is_err() {
                                        break;
                                    }
                                }
                                Err(err) => warn!(%err, "ignoring non-JSON chat frame"),
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(%err, "chat socket error");
                            break;
                        }
                        None => break,
                    }
                }
            }
        });

        Ok(ChatLink { inbound, outbound })
    }
}
