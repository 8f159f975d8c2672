//! Live case-timeline changes over the hosted backend's realtime socket.
//!
//! The socket speaks the Phoenix channel protocol (`vsn=1.0.0`): every frame
//! is a JSON object `{topic, event, payload, ref}`. One socket is opened per
//! subscription; it joins `realtime:case_timeline:<case_id>` with a
//! `postgres_changes` filter on that case, sends a heartbeat every 25 s and
//! leaves the channel when the subscription is closed.

use std::time::Duration;

use foundation::{CaseId, EventId};
use futures_util::{SinkExt, StreamExt};
use geodata::{
    decode_value, BackendError, BoxFuture, CaseEventSource, LiveChange, Subscription,
    TimelineEvent,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const JOIN_REF: &str = "1";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl PhoenixMessage {
    fn new(topic: impl Into<String>, event: &str, payload: Value, reference: u64) -> Self {
        Self {
            topic: topic.into(),
            event: event.to_string(),
            payload,
            reference: Some(reference.to_string()),
        }
    }

    fn into_frame(self) -> Result<Message, BackendError> {
        Ok(Message::Text(serde_json::to_string(&self)?))
    }
}

pub fn topic_for(case_id: CaseId) -> String {
    format!("realtime:case_timeline:{case_id}")
}

pub fn join_message(case_id: CaseId, access_token: &str) -> PhoenixMessage {
    let mut msg = PhoenixMessage::new(
        topic_for(case_id),
        "phx_join",
        json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "*",
                    "schema": "public",
                    "table": "case_timeline",
                    "filter": format!("case_id=eq.{case_id}"),
                }],
            },
            "access_token": access_token,
        }),
        0,
    );
    msg.reference = Some(JOIN_REF.to_string());
    msg
}

/// Builds the websocket URL from the project's HTTP base URL.
pub fn socket_url(base_url: &str, anon_key: &str) -> Result<String, BackendError> {
    let uri: http::Uri = base_url.parse().map_err(BackendError::transport)?;
    let scheme = match uri.scheme_str() {
        Some("http") => "ws",
        _ => "wss",
    };
    let authority = uri
        .authority()
        .ok_or_else(|| BackendError::transport(format!("no host in {base_url}")))?;
    Ok(format!(
        "{scheme}://{authority}/realtime/v1/websocket?apikey={anon_key}&vsn=1.0.0"
    ))
}

#[derive(Deserialize)]
struct ChangePayload {
    data: ChangeData,
}

#[derive(Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    kind: ChangeType,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// Delete notifications usually carry only the primary key.
#[derive(Deserialize)]
struct DeletedRow {
    id: EventId,
    #[serde(default)]
    case_id: Option<CaseId>,
}

/// Maps a `postgres_changes` payload onto a typed change.
pub fn decode_change(payload: Value) -> Result<LiveChange, BackendError> {
    let ChangePayload { data } = decode_value(payload)?;
    let row = |value: Option<Value>, field: &str| {
        value.ok_or_else(|| BackendError::malformed(format!("change without {field}")))
    };
    Ok(match data.kind {
        ChangeType::Insert => {
            LiveChange::Insert(decode_value::<TimelineEvent>(row(data.record, "record")?)?)
        }
        ChangeType::Update => {
            LiveChange::Update(decode_value::<TimelineEvent>(row(data.record, "record")?)?)
        }
        ChangeType::Delete => {
            let DeletedRow { id, case_id } = decode_value(row(data.old_record, "old_record")?)?;
            LiveChange::Delete { id, case_id }
        }
    })
}

/// What a frame means for the subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameAction {
    Change(LiveChange),
    Ignore,
    /// The server closed or errored the channel.
    End,
}

pub fn handle_frame(text: &str, topic: &str) -> FrameAction {
    let msg: PhoenixMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(err) => {
            warn!(error = %err, "unreadable realtime frame");
            return FrameAction::Ignore;
        }
    };
    if msg.topic != topic {
        return FrameAction::Ignore;
    }
    match msg.event.as_str() {
        "postgres_changes" => match decode_change(msg.payload) {
            Ok(change) => FrameAction::Change(change),
            Err(err) => {
                warn!(topic, error = %err, "malformed live change");
                FrameAction::Ignore
            }
        },
        "phx_error" | "phx_close" => FrameAction::End,
        _ => FrameAction::Ignore,
    }
}

/// Opens one realtime socket per subscription.
pub struct RealtimeClient {
    socket_url: String,
    anon_key: String,
}

impl RealtimeClient {
    pub fn new(base_url: &str, anon_key: impl Into<String>) -> Result<Self, BackendError> {
        let anon_key = anon_key.into();
        Ok(Self {
            socket_url: socket_url(base_url, &anon_key)?,
            anon_key,
        })
    }

    async fn join(&self, case_id: CaseId) -> Result<Socket, BackendError> {
        let (mut socket, _) = connect_async(self.socket_url.as_str())
            .await
            .map_err(BackendError::transport)?;
        let topic = topic_for(case_id);
        socket
            .send(join_message(case_id, &self.anon_key).into_frame()?)
            .await
            .map_err(BackendError::transport)?;

        loop {
            let frame = match socket.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => return Err(BackendError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(BackendError::transport(err)),
            };
            let msg: PhoenixMessage = serde_json::from_str(&frame)?;
            if msg.topic != topic
                || msg.event != "phx_reply"
                || msg.reference.as_deref() != Some(JOIN_REF)
            {
                continue;
            }
            return match msg.payload.get("status").and_then(Value::as_str) {
                Some("ok") => Ok(socket),
                _ => Err(BackendError::Status {
                    status: 403,
                    message: format!("join refused: {}", msg.payload),
                }),
            };
        }
    }
}

impl CaseEventSource for RealtimeClient {
    fn subscribe_case_events(
        &self,
        case_id: CaseId,
    ) -> BoxFuture<'_, Result<Subscription, BackendError>> {
        Box::pin(async move {
            let socket = tokio::time::timeout(JOIN_TIMEOUT, self.join(case_id))
                .await
                .map_err(|_| BackendError::transport("channel join timed out"))??;
            info!(%case_id, "realtime channel joined");

            let (events_tx, events_rx) = mpsc::channel(64);
            let (close_tx, close_rx) = oneshot::channel();
            tokio::spawn(pump(socket, topic_for(case_id), events_tx, close_rx));
            Ok(Subscription::new(events_rx, close_tx))
        })
    }
}

/// Forwards changes until the socket ends or the subscriber closes.
/// Dropping `events` on exit tells the subscriber the stream is gone.
async fn pump(
    mut socket: Socket,
    topic: String,
    events: mpsc::Sender<LiveChange>,
    mut close: oneshot::Receiver<()>,
) {
    let mut next_ref: u64 = 2;
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = &mut close => {
                let leave = PhoenixMessage::new(topic.as_str(), "phx_leave", json!({}), next_ref);
                if let Ok(frame) = leave.into_frame() {
                    let _ = socket.send(frame).await;
                }
                let _ = socket.close(None).await;
                debug!(topic = %topic, "left realtime channel");
                break;
            }
            _ = heartbeat.tick() => {
                let beat = PhoenixMessage::new("phoenix", "heartbeat", json!({}), next_ref);
                next_ref += 1;
                let sent = match beat.into_frame() {
                    Ok(frame) => socket.send(frame).await.map_err(BackendError::transport),
                    Err(err) => Err(err),
                };
                if let Err(err) = sent {
                    warn!(topic = %topic, error = %err, "heartbeat failed");
                    break;
                }
            }
            frame = socket.next() => match frame {
                Some(Ok(Message::Text(text))) => match handle_frame(&text, &topic) {
                    FrameAction::Change(change) => {
                        if events.send(change).await.is_err() {
                            break;
                        }
                    }
                    FrameAction::Ignore => {}
                    FrameAction::End => {
                        warn!(topic = %topic, "realtime channel closed by server");
                        break;
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    warn!(topic = %topic, "realtime socket closed");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(topic = %topic, error = %err, "realtime socket error");
                    break;
                }
            },
        }
    }
}
