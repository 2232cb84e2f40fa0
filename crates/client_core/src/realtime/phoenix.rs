//! Minimal Phoenix channels client (JSON serializer v2) over a websocket.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
    time::{interval, timeout, MissedTickBehavior},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use super::RealtimeError;

pub const PHOENIX_VSN: &str = "2.0.0";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const PUSH_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Wire frame: `[join_ref, ref, topic, event, payload]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PhoenixFrame {
    pub join_ref: Option<String>,
    pub msg_ref: Option<String>,
    pub topic: String,
    pub event: String,
    pub payload: Value,
}

impl Serialize for PhoenixFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            &self.join_ref,
            &self.msg_ref,
            &self.topic,
            &self.event,
            &self.payload,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PhoenixFrame {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (join_ref, msg_ref, topic, event, payload) =
            <(Option<String>, Option<String>, String, String, Value)>::deserialize(deserializer)?;
        Ok(Self {
            join_ref,
            msg_ref,
            topic,
            event,
            payload,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: String,
    pub response: Value,
}

impl Reply {
    fn from_payload(payload: Value) -> Self {
        Self {
            status: payload["status"].as_str().unwrap_or_default().to_string(),
            response: payload.get("response").cloned().unwrap_or(Value::Null),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    pub event: String,
    pub payload: Value,
}

#[derive(Default)]
struct Routes {
    replies: Mutex<HashMap<String, oneshot::Sender<Reply>>>,
    topics: Mutex<HashMap<String, mpsc::UnboundedSender<ChannelMessage>>>,
}

impl Routes {
    async fn dispatch(&self, text: &str) {
        let frame = match serde_json::from_str::<PhoenixFrame>(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("realtime: dropping malformed frame: {err}");
                return;
            }
        };

        if frame.event == "phx_reply" {
            if let Some(msg_ref) = &frame.msg_ref {
                if let Some(waiter) = self.replies.lock().await.remove(msg_ref) {
                    let _ = waiter.send(Reply::from_payload(frame.payload));
                }
            }
            return;
        }

        let topics = self.topics.lock().await;
        if let Some(subscriber) = topics.get(&frame.topic) {
            let _ = subscriber.send(ChannelMessage {
                event: frame.event,
                payload: frame.payload,
            });
        } else {
            debug!(topic = %frame.topic, event = %frame.event, "realtime: no subscriber for frame");
        }
    }

    async fn close(&self) {
        self.replies.lock().await.clear();
        self.topics.lock().await.clear();
    }
}

pub struct PhoenixSocket {
    outbound: mpsc::UnboundedSender<Message>,
    routes: Arc<Routes>,
    next_ref: AtomicU64,
    writer: Mutex<Option<JoinHandle<()>>>,
    reader: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

impl PhoenixSocket {
    pub async fn connect(endpoint: &str) -> Result<Arc<Self>, RealtimeError> {
        let url = websocket_url(endpoint)?;
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| RealtimeError::Connect(format!("{url}: {err}")))?;
        let (mut sink, mut source) = stream.split();
        debug!(%url, "realtime: socket connected");

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if sink.send(message).await.is_err() || closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let routes = Arc::new(Routes::default());
        let reader_routes = Arc::clone(&routes);
        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => reader_routes.dispatch(&text).await,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!("realtime: socket read failed: {err}");
                        break;
                    }
                }
            }
            reader_routes.close().await;
        });

        let heartbeat_outbound = outbound.clone();
        let heartbeat = tokio::spawn(async move {
            let mut ticker = interval(HEARTBEAT_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            let mut beat: u64 = 0;
            loop {
                ticker.tick().await;
                beat += 1;
                let frame = PhoenixFrame {
                    join_ref: None,
                    msg_ref: Some(format!("hb-{beat}")),
                    topic: "phoenix".into(),
                    event: "heartbeat".into(),
                    payload: json!({}),
                };
                let Ok(text) = serde_json::to_string(&frame) else {
                    break;
                };
                if heartbeat_outbound.send(Message::Text(text)).is_err() {
                    break;
                }
            }
        });

        Ok(Arc::new(Self {
            outbound,
            routes,
            next_ref: AtomicU64::new(1),
            writer: Mutex::new(Some(writer)),
            reader,
            heartbeat,
        }))
    }

    fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn send_frame(&self, frame: &PhoenixFrame) -> Result<(), RealtimeError> {
        let text = serde_json::to_string(frame)
            .map_err(|err| RealtimeError::Protocol(err.to_string()))?;
        self.outbound
            .send(Message::Text(text))
            .map_err(|_| RealtimeError::Closed)
    }

    async fn request(
        &self,
        join_ref: Option<String>,
        topic: &str,
        event: &str,
        payload: Value,
    ) -> Result<Reply, RealtimeError> {
        let msg_ref = self.next_ref();
        let (tx, rx) = oneshot::channel();
        self.routes.replies.lock().await.insert(msg_ref.clone(), tx);

        let frame = PhoenixFrame {
            join_ref,
            msg_ref: Some(msg_ref.clone()),
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
        };
        if let Err(err) = self.send_frame(&frame) {
            self.routes.replies.lock().await.remove(&msg_ref);
            return Err(err);
        }

        match timeout(PUSH_TIMEOUT, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(RealtimeError::Closed),
            Err(_) => {
                self.routes.replies.lock().await.remove(&msg_ref);
                Err(RealtimeError::Timeout {
                    event: event.to_string(),
                })
            }
        }
    }

    pub async fn join(
        self: &Arc<Self>,
        topic: &str,
        params: Value,
    ) -> Result<PhoenixChannel, RealtimeError> {
        let (events_tx, events) = mpsc::unbounded_channel();
        self.routes
            .topics
            .lock()
            .await
            .insert(topic.to_string(), events_tx);

        let join_ref = self.next_ref();
        let reply = match self
            .request(Some(join_ref.clone()), topic, "phx_join", params)
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                self.routes.topics.lock().await.remove(topic);
                return Err(err);
            }
        };

        if !reply.is_ok() {
            self.routes.topics.lock().await.remove(topic);
            return Err(RealtimeError::JoinRejected {
                topic: topic.to_string(),
                reason: reply.response.to_string(),
            });
        }

        debug!(topic, "realtime: joined channel");
        Ok(PhoenixChannel {
            socket: Arc::clone(self),
            topic: topic.to_string(),
            join_ref,
            events,
        })
    }

    /// Flushes queued frames, sends a close frame and waits briefly for the
    /// writer to finish.
    pub async fn close(&self) {
        let _ = self.outbound.send(Message::Close(None));
        let writer = self.writer.lock().await.take();
        if let Some(writer) = writer {
            let _ = timeout(CLOSE_TIMEOUT, writer).await;
        }
    }
}

impl Drop for PhoenixSocket {
    fn drop(&mut self) {
        self.heartbeat.abort();
        self.reader.abort();
        if let Some(writer) = self.writer.get_mut().take() {
            writer.abort();
        }
    }
}

pub struct PhoenixChannel {
    socket: Arc<PhoenixSocket>,
    topic: String,
    join_ref: String,
    events: mpsc::UnboundedReceiver<ChannelMessage>,
}

impl PhoenixChannel {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn socket(&self) -> &Arc<PhoenixSocket> {
        &self.socket
    }

    /// Pushes an event and waits for the server's reply.
    pub async fn push(&self, event: &str, payload: Value) -> Result<Value, RealtimeError> {
        let reply = self
            .socket
            .request(Some(self.join_ref.clone()), &self.topic, event, payload)
            .await?;
        if reply.is_ok() {
            Ok(reply.response)
        } else {
            Err(RealtimeError::PushRejected {
                event: event.to_string(),
                reason: reply.response.to_string(),
            })
        }
    }

    /// Pushes an event the server does not reply to.
    pub fn cast(&self, event: &str, payload: Value) -> Result<(), RealtimeError> {
        self.socket.send_frame(&PhoenixFrame {
            join_ref: Some(self.join_ref.clone()),
            msg_ref: Some(self.socket.next_ref()),
            topic: self.topic.clone(),
            event: event.to_string(),
            payload,
        })
    }

    /// Waits for the next broadcast of `event` on this topic.
    pub async fn next_event(&mut self, event: &str) -> Result<Value, RealtimeError> {
        while let Some(message) = self.events.recv().await {
            if message.event == event {
                return Ok(message.payload);
            }
            if message.event == "phx_error" || message.event == "phx_close" {
                return Err(RealtimeError::Closed);
            }
        }
        Err(RealtimeError::Closed)
    }

    pub async fn leave(self) {
        self.socket.routes.topics.lock().await.remove(&self.topic);
        let _ = self.cast("phx_leave", json!({}));
    }
}

/// Normalizes a socket endpoint to `ws(s)://host/path/websocket?vsn=2.0.0`.
pub fn websocket_url(endpoint: &str) -> Result<Url, RealtimeError> {
    let mut url =
        Url::parse(endpoint.trim()).map_err(|err| RealtimeError::InvalidUrl(err.to_string()))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(RealtimeError::InvalidUrl(format!(
                "unsupported scheme '{other}'"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| RealtimeError::InvalidUrl(endpoint.to_string()))?;

    if !url.path().ends_with("/websocket") {
        let path = format!("{}/websocket", url.path().trim_end_matches('/'));
        url.set_path(&path);
    }
    url.query_pairs_mut().append_pair("vsn", PHOENIX_VSN);

    Ok(url)
}
