//! Discord gateway session over WebSocket.
//!
//! Connect, receive Hello, Identify, wait for READY, then heartbeat and
//! forward message events to the subscribed handlers. A dropped connection
//! is re-established with exponential backoff until the token is cancelled.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::{EventHandler, EventKind, InboundEvent, Message, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// State learned from READY.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub session_id: String,
    /// Recipient user id -> DM channel id.
    pub dm_channels: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

/// Backoff parameters for reconnecting.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Next backoff delay, clamped to `max_delay`.
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// An identified gateway connection.
pub(crate) struct GatewayConnection {
    stream: WsStream,
    heartbeat: Duration,
    seq: Option<u64>,
}

pub(crate) struct Gateway {
    url: String,
    token: String,
    user_agent: String,
    handlers: Arc<RwLock<Vec<EventHandler>>>,
    session: Arc<RwLock<SessionState>>,
    reconnect: ReconnectConfig,
}

impl Gateway {
    pub fn new(
        url: String,
        token: String,
        user_agent: String,
        handlers: Arc<RwLock<Vec<EventHandler>>>,
        session: Arc<RwLock<SessionState>>,
    ) -> Self {
        Self {
            url,
            token,
            user_agent,
            handlers,
            session,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Open a connection and identify. Returns once READY has been processed.
    pub async fn connect(&self) -> Result<GatewayConnection, TransportError> {
        let (mut stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connection(format!("gateway {}: {}", self.url, e)))?;

        let hello = next_payload(&mut stream).await?;
        if hello.op != OP_HELLO {
            return Err(TransportError::Gateway(format!(
                "expected hello, got op {}",
                hello.op
            )));
        }
        let interval = hello.d["heartbeat_interval"]
            .as_u64()
            .ok_or_else(|| TransportError::Gateway("hello without heartbeat_interval".into()))?;

        stream
            .send(WsMessage::Text(self.identify().to_string()))
            .await
            .map_err(ws_error)?;

        let mut seq = None;
        let ready = tokio::time::timeout(READY_TIMEOUT, wait_ready(&mut stream, &mut seq))
            .await
            .map_err(|_| TransportError::Timeout)??;

        self.apply_ready(&ready);
        Ok(GatewayConnection {
            stream,
            heartbeat: Duration::from_millis(interval),
            seq,
        })
    }

    /// Serve `connection`, reconnecting on loss, until cancelled.
    pub async fn run(self, mut connection: GatewayConnection, cancel: CancellationToken) {
        loop {
            match self.serve(connection, &cancel).await {
                Ok(()) => {
                    info!("Gateway stopped");
                    return;
                }
                Err(e) => warn!(error = %e, "Gateway connection lost"),
            }
            match self.reconnect_loop(&cancel).await {
                Some(next) => connection = next,
                None => return,
            }
        }
    }

    async fn serve(
        &self,
        connection: GatewayConnection,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let GatewayConnection {
            stream,
            heartbeat,
            mut seq,
        } = connection;
        let (mut sink, mut stream) = stream.split();
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return Ok(());
                }
                _ = ticker.tick() => {
                    sink.send(heartbeat_frame(seq)).await.map_err(ws_error)?;
                }
                frame = stream.next() => {
                    let payload = match frame {
                        Some(Ok(WsMessage::Text(text))) => decode(&text)?,
                        Some(Ok(WsMessage::Close(frame))) => {
                            return Err(TransportError::Gateway(format!("closed by server: {:?}", frame)));
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(ws_error(e)),
                        None => return Err(TransportError::Gateway("stream ended".into())),
                    };
                    if payload.s.is_some() {
                        seq = payload.s;
                    }
                    match payload.op {
                        OP_DISPATCH => self.dispatch(payload.t.as_deref(), payload.d),
                        OP_HEARTBEAT => sink.send(heartbeat_frame(seq)).await.map_err(ws_error)?,
                        OP_HEARTBEAT_ACK => {}
                        OP_RECONNECT => {
                            return Err(TransportError::Gateway("server requested reconnect".into()));
                        }
                        OP_INVALID_SESSION => {
                            return Err(TransportError::Gateway("invalid session".into()));
                        }
                        op => debug!(op, "Ignoring gateway opcode"),
                    }
                }
            }
        }
    }

    async fn reconnect_loop(&self, cancel: &CancellationToken) -> Option<GatewayConnection> {
        let mut delay = self.reconnect.initial_delay;
        let mut attempt = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
            info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting to gateway");
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Reconnect cancelled");
                    return None;
                }
                result = self.connect() => match result {
                    Ok(connection) => {
                        info!(attempt, "Reconnected to gateway");
                        return Some(connection);
                    }
                    Err(e) => warn!(error = %e, "Reconnect attempt {attempt} failed"),
                },
            }

            delay = next_delay(delay, &self.reconnect);
        }
    }

    fn identify(&self) -> Value {
        json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": self.token,
                "capabilities": 16381,
                "properties": {
                    "os": "Linux",
                    "browser": "Chrome",
                    "device": "",
                    "browser_user_agent": self.user_agent,
                },
                "presence": {
                    "status": "online",
                    "since": 0,
                    "activities": [],
                    "afk": false,
                },
                "compress": false,
            }
        })
    }

    fn apply_ready(&self, ready: &Value) {
        let mut session = self.session.write().unwrap_or_else(PoisonError::into_inner);
        session.session_id = ready["session_id"].as_str().unwrap_or_default().to_string();
        session.dm_channels = dm_channels(ready);
        debug!(dm_channels = session.dm_channels.len(), "Processed READY");
    }

    fn dispatch(&self, name: Option<&str>, data: Value) {
        let Some(name) = name else { return };
        if name == "READY" {
            self.apply_ready(&data);
            return;
        }
        let Some(kind) = EventKind::from_dispatch(name) else {
            return;
        };
        debug!(event = name, payload = %data, "Gateway event");
        let message: Message = match serde_json::from_value(data) {
            Ok(m) => m,
            Err(e) => {
                warn!(event = name, error = %e, "Failed to decode message event");
                return;
            }
        };

        let event = InboundEvent { kind, message };
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler(&event);
        }
    }
}

/// Map of recipient -> channel for one-to-one private channels in READY.
fn dm_channels(ready: &Value) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Some(channels) = ready["private_channels"].as_array() else {
        return map;
    };
    for channel in channels {
        let Some(id) = channel["id"].as_str() else {
            continue;
        };
        let recipients: Vec<&str> = match channel["recipient_ids"].as_array() {
            Some(ids) => ids.iter().filter_map(Value::as_str).collect(),
            None => channel["recipients"]
                .as_array()
                .map(|users| users.iter().filter_map(|u| u["id"].as_str()).collect())
                .unwrap_or_default(),
        };
        if let [recipient] = recipients.as_slice() {
            map.insert(recipient.to_string(), id.to_string());
        }
    }
    map
}

fn heartbeat_frame(seq: Option<u64>) -> WsMessage {
    WsMessage::Text(json!({ "op": OP_HEARTBEAT, "d": seq }).to_string())
}

fn decode(text: &str) -> Result<GatewayPayload, TransportError> {
    serde_json::from_str(text).map_err(|e| TransportError::Decode(format!("gateway payload: {}", e)))
}

async fn wait_ready(stream: &mut WsStream, seq: &mut Option<u64>) -> Result<Value, TransportError> {
    loop {
        let payload = next_payload(stream).await?;
        if payload.s.is_some() {
            *seq = payload.s;
        }
        match (payload.op, payload.t.as_deref()) {
            (OP_DISPATCH, Some("READY")) => return Ok(payload.d),
            (OP_INVALID_SESSION, _) => return Err(TransportError::Gateway("invalid session".into())),
            _ => {}
        }
    }
}

async fn next_payload(stream: &mut WsStream) -> Result<GatewayPayload, TransportError> {
    loop {
        match stream.next().await {
            Some(Ok(WsMessage::Text(text))) => return decode(&text),
            Some(Ok(WsMessage::Close(frame))) => {
                return Err(TransportError::Gateway(format!("closed by server: {:?}", frame)))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ws_error(e)),
            None => return Err(TransportError::Gateway("stream ended".into())),
        }
    }
}

fn ws_error(e: tokio_tungstenite::tungstenite::Error) -> TransportError {
    TransportError::Gateway(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_delay_doubles_and_clamps() {
        let config = ReconnectConfig::default();
        let mut delay = config.initial_delay;
        let expected = [1, 2, 4, 8, 16, 32, 60, 60];
        for secs in expected {
            assert_eq!(delay.as_secs(), secs);
            delay = next_delay(delay, &config);
        }
    }

    #[test]
    fn test_dm_channels_from_recipient_ids() {
        let ready = json!({
            "session_id": "abc",
            "private_channels": [
                {"id": "100", "recipient_ids": ["936929561302675456"]},
                {"id": "200", "recipient_ids": ["1", "2"]},
            ]
        });
        let map = dm_channels(&ready);
        assert_eq!(map.get("936929561302675456").map(String::as_str), Some("100"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_dm_channels_from_recipient_objects() {
        let ready = json!({
            "private_channels": [
                {"id": "300", "recipients": [{"id": "1049413890276077690"}]}
            ]
        });
        let map = dm_channels(&ready);
        assert_eq!(map.get("1049413890276077690").map(String::as_str), Some("300"));
    }

    #[test]
    fn test_dispatch_forwards_message_events() {
        let received = Arc::new(RwLock::new(Vec::new()));
        let sink = Arc::clone(&received);
        let handler: EventHandler = Arc::new(move |e: &InboundEvent| {
            sink.write().unwrap().push(e.clone());
        });
        let gateway = Gateway::new(
            "wss://example.invalid".into(),
            "token".into(),
            "agent".into(),
            Arc::new(RwLock::new(vec![handler])),
            Arc::new(RwLock::new(SessionState::default())),
        );

        gateway.dispatch(
            Some("MESSAGE_UPDATE"),
            json!({"id": "1", "channel_id": "2", "content": "**cat**"}),
        );
        gateway.dispatch(Some("TYPING_START"), json!({"channel_id": "2"}));
        gateway.dispatch(Some("READY"), json!({"session_id": "s1", "private_channels": []}));

        let received = received.read().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].kind, EventKind::MessageUpdate);
        assert_eq!(received[0].message.content, "**cat**");
        assert_eq!(gateway.session.read().unwrap().session_id, "s1");
    }

    #[test]
    fn test_heartbeat_frame_carries_sequence() {
        match heartbeat_frame(Some(42)) {
            WsMessage::Text(text) => {
                let v: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(v["op"], 1);
                assert_eq!(v["d"], 42);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
