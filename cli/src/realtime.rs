//! Supabase Realtime: row changes pushed over a Phoenix channel on a websocket.
//!
//! One channel carries `postgres_changes` for the three tables, filtered to the signed-in
//! user. Each change is republished on the store's [`ChangeFeed`] as a push event. The
//! listener reconnects with backoff and rejoins when the session's token changes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use tally_core::auth::{AuthProvider, Session};
use tally_core::models::Table;
use tally_core::notify::{ChangeEvent, ChangeFeed, ChangeKind};

use crate::remote::RemoteConfig;

const CHANNEL_TOPIC: &str = "realtime:tally";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const SIGNED_OUT_POLL: Duration = Duration::from_secs(2);
const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub fn websocket_url(config: &RemoteConfig) -> String {
    let base = config.url();
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!(
        "{base}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
        config.anon_key()
    )
}

fn join_message(user_id: &str, access_token: &str, join_ref: u64) -> String {
    let changes: Vec<Value> = Table::ALL
        .iter()
        .map(|table| {
            json!({
                "event": "*",
                "schema": "public",
                "table": table.as_str(),
                "filter": format!("user_id=eq.{user_id}"),
            })
        })
        .collect();
    json!({
        "topic": CHANNEL_TOPIC,
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": changes,
                "private": false,
            },
            "access_token": access_token,
        },
        "ref": join_ref.to_string(),
        "join_ref": join_ref.to_string(),
    })
    .to_string()
}

fn heartbeat_message(msg_ref: u64) -> String {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": msg_ref.to_string(),
    })
    .to_string()
}

#[derive(Debug, PartialEq)]
enum Inbound {
    Change(ChangeEvent),
    /// The server refused or closed the channel.
    Rejected(String),
    Other,
}

fn change_event(data: &Value) -> Option<ChangeEvent> {
    let name = data.get("table")?.as_str()?;
    let table = Table::ALL.into_iter().find(|t| t.as_str() == name)?;
    let kind = match data.get("type")?.as_str()? {
        "INSERT" => ChangeKind::Insert,
        "UPDATE" => ChangeKind::Update,
        "DELETE" => ChangeKind::Delete,
        _ => return None,
    };
    let row = match kind {
        ChangeKind::Delete => data.get("old_record"),
        ChangeKind::Insert | ChangeKind::Update => data.get("record"),
    };
    let field = |column: &str| {
        row.and_then(|r| r.get(column))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    Some(ChangeEvent::push(table, kind, field("user_id"), field("id")))
}

fn parse_frame(text: &str) -> Inbound {
    let Ok(frame) = serde_json::from_str::<Value>(text) else {
        return Inbound::Other;
    };
    if frame.get("topic").and_then(Value::as_str) != Some(CHANNEL_TOPIC) {
        return Inbound::Other;
    }
    let payload = &frame["payload"];
    match frame.get("event").and_then(Value::as_str).unwrap_or_default() {
        "postgres_changes" => change_event(&payload["data"]).map_or(Inbound::Other, Inbound::Change),
        "phx_reply" | "system" if payload["status"] == "error" => {
            let reason = payload
                .pointer("/response/reason")
                .or_else(|| payload.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("error");
            Inbound::Rejected(reason.to_string())
        }
        event @ ("phx_error" | "phx_close") => Inbound::Rejected(event.to_string()),
        _ => Inbound::Other,
    }
}

/// Background task feeding hosted row changes into a [`ChangeFeed`]. Stops on drop.
pub struct RealtimeListener {
    task: JoinHandle<()>,
}

impl RealtimeListener {
    pub fn start(
        rt: &Handle,
        config: &RemoteConfig,
        auth: Arc<dyn AuthProvider>,
        feed: ChangeFeed,
    ) -> Self {
        let url = websocket_url(config);
        // wss needs a process-wide rustls crypto provider
        let _ = rustls::crypto::ring::default_provider().install_default();
        tracing::debug!("starting realtime listener");
        Self {
            task: rt.spawn(run(url, auth, feed)),
        }
    }
}

impl Drop for RealtimeListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(url: String, auth: Arc<dyn AuthProvider>, feed: ChangeFeed) {
    let mut backoff = MIN_BACKOFF;
    loop {
        let Some(session) = auth.current_session() else {
            tokio::time::sleep(SIGNED_OUT_POLL).await;
            continue;
        };
        match listen(&url, &session, auth.as_ref(), &feed).await {
            Ok(()) => backoff = MIN_BACKOFF,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), retry_in = ?backoff, "realtime connection lost");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

/// Join the channel for `session` and forward changes until the connection fails or the
/// signed-in session changes. `Ok` means "rejoin now".
async fn listen(
    url: &str,
    session: &Session,
    auth: &dyn AuthProvider,
    feed: &ChangeFeed,
) -> Result<()> {
    let (socket, _) = tokio_tungstenite::connect_async(url)
        .await
        .context("Failed to connect to realtime")?;
    let (mut sink, mut stream) = socket.split();

    let mut next_ref: u64 = 1;
    sink.send(Message::Text(
        join_message(&session.user.id, &session.access_token, next_ref).into(),
    ))
    .await
    .context("Failed to join realtime channel")?;

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let current = auth.current_session();
                if current.as_ref().map(|s| s.access_token.as_str()) != Some(session.access_token.as_str()) {
                    tracing::debug!("session changed; rejoining realtime channel");
                    return Ok(());
                }
                next_ref += 1;
                sink.send(Message::Text(heartbeat_message(next_ref).into()))
                    .await
                    .context("Failed to send heartbeat")?;
            }
            frame = stream.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => bail!("closed by server"),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e).context("realtime read failed"),
                };
                match parse_frame(&text) {
                    Inbound::Change(event) => {
                        let feed = feed.clone();
                        // Listeners read the store through blocking calls
                        tokio::task::spawn_blocking(move || feed.publish(&event));
                    }
                    Inbound::Rejected(reason) => bail!("realtime channel rejected: {reason}"),
                    Inbound::Other => {}
                }
            }
        }
    }
}
