use crate::db::Db;
use crate::error::ApiError;
use crate::hub::{Connection, Hub};
use crate::messages;
use crate::models::{Message, Notification, Tenant, TenantConfig};
use crate::rate_limit::RateLimiter;
use crate::rooms;
use rocket::futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::{Duration, interval, sleep_until};

/// Transport keepalive ping period.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Sessions idle past this (no inbound frame or pong) are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Page size the reconnect syncer reads backlog with.
const SYNC_BATCH: i64 = 100;

// --- Inbound frames ---

/// Client frames, tagged by `type`. Anything that fails to parse is logged
/// and dropped without closing the connection.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "send_message")]
    SendMessage {
        room_id: String,
        content: String,
        #[serde(default)]
        meta: Option<serde_json::Value>,
    },
    #[serde(rename = "ack")]
    Ack { room_id: String, seq: i64 },
    #[serde(rename = "typing.start")]
    TypingStart { room_id: String },
    #[serde(rename = "typing.stop")]
    TypingStop { room_id: String },
}

pub fn parse_client_frame(text: &str) -> Result<ClientFrame, serde_json::Error> {
    serde_json::from_str(text)
}

// --- Outbound frames ---

pub fn message_frame(message: &Message) -> String {
    serde_json::json!({
        "type": "message",
        "message_id": message.id,
        "room_id": message.room_id,
        "sender_id": message.sender_id,
        "seq": message.seq,
        "content": message.content,
        "meta": message.meta,
        "created_at": message.created_at,
    })
    .to_string()
}

pub fn ack_received_frame(room_id: &str, seq: i64, user_id: &str) -> String {
    serde_json::json!({
        "type": "ack.received",
        "room_id": room_id,
        "seq": seq,
        "user_id": user_id,
    })
    .to_string()
}

pub fn typing_frame(user_id: &str, room_id: &str, action: &str) -> String {
    serde_json::json!({
        "type": "typing",
        "user_id": user_id,
        "room_id": room_id,
        "action": action,
    })
    .to_string()
}

pub fn presence_frame(tenant_id: &str, user_id: &str, status: &str) -> String {
    serde_json::json!({
        "type": "presence.update",
        "tenant_id": tenant_id,
        "user_id": user_id,
        "status": status,
    })
    .to_string()
}

pub fn notification_frame(notification: &Notification) -> String {
    serde_json::json!({
        "type": "notification",
        "notification_id": notification.id,
        "topic": notification.topic,
        "payload": notification.payload,
        "created_at": notification.created_at,
    })
    .to_string()
}

pub fn error_frame(category: &str, detail: &str) -> String {
    serde_json::json!({
        "type": "error",
        "category": category,
        "error": detail,
    })
    .to_string()
}

// --- Typing dedup ---

/// Tracks the last `typing.start` per (room, user) so a chatty client cannot
/// spam the room; entries older than 30 s are pruned on access.
#[derive(Clone, Default)]
pub struct TypingTracker {
    last_typing: Arc<Mutex<HashMap<String, u64>>>,
}

impl TypingTracker {
    /// True when this notification should be broadcast (first in 2 s).
    pub fn should_broadcast(&self, room_id: &str, user_id: &str) -> bool {
        let key = format!("{room_id}:{user_id}");
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut tracker = self.last_typing.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&last) = tracker.get(&key)
            && now - last < 2
        {
            return false;
        }
        tracker.insert(key, now);
        tracker.retain(|_, &mut ts| now - ts < 30);
        true
    }
}

// --- Session ---

/// Everything a live session needs, cloned out of managed state before the
/// channel closure takes ownership.
pub struct SessionContext {
    pub db: Db,
    pub hub: Hub,
    pub limiter: RateLimiter,
    pub typing: TypingTracker,
    pub tenant: Tenant,
    pub config: TenantConfig,
    pub user_id: String,
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Run one websocket session to completion: register with the hub, announce
/// presence, kick off the backlog syncer, then route inbound frames until
/// the peer goes away, the idle timeout fires, or the process shuts down.
pub async fn run_session(
    stream: rocket_ws::stream::DuplexStream,
    ctx: SessionContext,
) -> rocket_ws::result::Result<()> {
    let SessionContext {
        db,
        hub,
        limiter,
        typing,
        tenant,
        config,
        user_id,
        mut shutdown_rx,
    } = ctx;

    let (mut sink, mut source) = stream.split();

    let (conn, mut outbound_rx, came_online) = hub.register(&tenant.id, &user_id);
    tracing::info!(tenant = %tenant.id, user = %user_id, conn = conn.id, "session opened");

    // Writer task: the only thing touching the sink. Serialises application
    // frames with keepalive pings.
    let writer = tokio::spawn(async move {
        let mut ping = interval(PING_INTERVAL);
        ping.tick().await; // immediate first tick
        loop {
            tokio::select! {
                maybe = outbound_rx.recv() => match maybe {
                    Some(frame) => {
                        if sink.send(rocket_ws::Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    if sink.send(rocket_ws::Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sink.send(rocket_ws::Message::Close(None)).await;
    });

    if came_online {
        hub.send_to_tenant(&tenant.id, &presence_frame(&tenant.id, &user_id, "online"));
    }

    // Reconnect syncer: an independent task per session, so backlog replay
    // never blocks live frame handling. Duplicates against live broadcasts
    // are the client's to drop by (room_id, seq).
    let syncer = tokio::spawn(sync_backlog(
        db.clone(),
        conn.clone(),
        tenant.id.clone(),
        user_id.clone(),
    ));

    let mut last_rx = Instant::now();
    loop {
        tokio::select! {
            incoming = source.next() => {
                match incoming {
                    Some(Ok(rocket_ws::Message::Text(text))) => {
                        last_rx = Instant::now();
                        handle_frame(&db, &hub, &limiter, &typing, &tenant, &config, &user_id, &conn, &text);
                    }
                    Some(Ok(rocket_ws::Message::Ping(_) | rocket_ws::Message::Pong(_))) => {
                        last_rx = Instant::now();
                    }
                    Some(Ok(rocket_ws::Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Binary and fragments are not part of the protocol
                        last_rx = Instant::now();
                    }
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "read error, closing session");
                        break;
                    }
                }
            }
            _ = sleep_until((last_rx + IDLE_TIMEOUT).into()) => {
                tracing::info!("idle timeout, closing session");
                break;
            }
            _ = shutdown_rx.changed() => break,
        }
    }

    syncer.abort();
    hub.unregister(&conn);
    tracing::info!(tenant = %tenant.id, user = %user_id, conn = conn.id, "session closed");
    drop(conn); // last sender gone: writer drains and closes
    let _ = writer.await;
    Ok(())
}

/// Route one inbound frame. Failures answer with an `error` frame; nothing a
/// client sends closes the connection.
#[allow(clippy::too_many_arguments)]
fn handle_frame(
    db: &Db,
    hub: &Hub,
    limiter: &RateLimiter,
    typing: &TypingTracker,
    tenant: &Tenant,
    config: &TenantConfig,
    user_id: &str,
    conn: &Connection,
    text: &str,
) {
    let frame = match parse_client_frame(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable frame dropped");
            return;
        }
    };

    match frame {
        ClientFrame::SendMessage {
            room_id,
            content,
            meta,
        } => {
            let info = limiter.allow(&tenant.id, config.rate_limit_rps);
            if !info.allowed {
                conn.try_send(&error_frame("rate_limited", "rate limited"));
                return;
            }
            let result = {
                let mut db_conn = db.conn();
                messages::send_message(
                    &mut db_conn,
                    &tenant.id,
                    config,
                    &room_id,
                    user_id,
                    &content,
                    meta,
                )
            };
            match result {
                Ok(message) => {
                    hub.broadcast_to_room(&tenant.id, &room_id, message_frame(&message));
                }
                Err(e) => {
                    conn.try_send(&error_frame(e.category(), &e.public_message()));
                }
            }
        }
        ClientFrame::Ack { room_id, seq } => {
            let result = {
                let db_conn = db.conn();
                if !rooms::is_member(&db_conn, &tenant.id, &room_id, user_id).unwrap_or(false) {
                    Err(ApiError::Forbidden)
                } else {
                    messages::update_last_ack(&db_conn, &tenant.id, user_id, &room_id, seq)
                }
            };
            match result {
                Ok(state) => {
                    hub.broadcast_to_room(
                        &tenant.id,
                        &room_id,
                        ack_received_frame(&room_id, state.last_ack, user_id),
                    );
                }
                Err(e) => {
                    conn.try_send(&error_frame(e.category(), &e.public_message()));
                }
            }
        }
        ClientFrame::TypingStart { room_id } => {
            broadcast_typing(db, hub, typing, tenant, user_id, &room_id, "start");
        }
        ClientFrame::TypingStop { room_id } => {
            broadcast_typing(db, hub, typing, tenant, user_id, &room_id, "stop");
        }
    }
}

/// Typing indicators are ephemeral: membership-checked, deduplicated, never
/// persisted.
fn broadcast_typing(
    db: &Db,
    hub: &Hub,
    typing: &TypingTracker,
    tenant: &Tenant,
    user_id: &str,
    room_id: &str,
    action: &str,
) {
    let member = {
        let db_conn = db.conn();
        rooms::is_member(&db_conn, &tenant.id, room_id, user_id).unwrap_or(false)
    };
    if !member {
        return;
    }
    if action == "start" && !typing.should_broadcast(room_id, user_id) {
        return;
    }
    hub.broadcast_to_room(&tenant.id, room_id, typing_frame(user_id, room_id, action));
}

/// Stream every message with `seq > last_ack` for each of the user's rooms,
/// in ascending seq order, to one connection. Runs concurrently with live
/// broadcasts; `send` waits for queue space so backlog is never dropped.
pub async fn sync_backlog(db: Db, conn: Arc<Connection>, tenant_id: String, user_id: String) {
    let room_ids = {
        let db_conn = db.conn();
        rooms::room_ids_for_user(&db_conn, &tenant_id, &user_id).unwrap_or_default()
    };

    for room_id in room_ids {
        let last_ack = {
            let db_conn = db.conn();
            match messages::get_last_ack(&db_conn, &tenant_id, &user_id, &room_id) {
                Ok(ack) => ack,
                Err(e) => {
                    tracing::warn!(room_id, error = %e, "resync skipped room");
                    continue;
                }
            }
        };

        let mut after_seq = last_ack;
        loop {
            let batch = {
                let db_conn = db.conn();
                match messages::get_messages(&db_conn, &tenant_id, &room_id, after_seq, Some(SYNC_BATCH)) {
                    Ok(batch) => batch,
                    Err(e) => {
                        tracing::warn!(room_id, error = %e, "resync page failed");
                        break;
                    }
                }
            };
            let Some(last) = batch.last() else { break };
            after_seq = last.seq;

            for message in &batch {
                if !conn.send(message_frame(message)).await {
                    return; // session gone
                }
            }
        }
    }
}
