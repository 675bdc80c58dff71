use crate::db;
use crate::models::PresenceEntry;
use crate::rooms;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;

/// Outbound queue size per connection. The writer task drains it; a slow
/// client fills it and subsequent frames for that connection are dropped,
/// with the undelivered queue as the recovery path.
const CONNECTION_QUEUE_SIZE: usize = 256;

/// Bounded hub-wide broadcast channel, drop-on-full.
const BROADCAST_QUEUE_SIZE: usize = 1000;

pub const OFFLINE_GRACE: Duration = Duration::from_secs(5);

/// One live websocket session. Writes are serialised by the mpsc queue: the
/// session's single writer task is the only thing touching the transport.
pub struct Connection {
    pub id: u64,
    pub tenant_id: String,
    pub user_id: String,
    tx: mpsc::Sender<String>,
}

impl Connection {
    /// Queue a frame without blocking. False means the queue is full or the
    /// session is gone.
    pub fn try_send(&self, frame: &str) -> bool {
        self.tx.try_send(frame.to_string()).is_ok()
    }

    /// Queue a frame, waiting for space. Used by the reconnect syncer, which
    /// must not drop frames mid-stream.
    pub async fn send(&self, frame: String) -> bool {
        self.tx.send(frame).await.is_ok()
    }
}

/// A room broadcast queued for the fan-out worker.
pub struct Broadcast {
    pub tenant_id: String,
    pub room_id: String,
    pub frame: String,
}

/// Connection and presence maps live under one reader-writer lock; no lock
/// is ever held across an await or any I/O.
struct HubMaps {
    connections: HashMap<String, HashMap<String, Vec<Arc<Connection>>>>,
    presence: HashMap<(String, String), String>,
}

struct HubInner {
    maps: RwLock<HubMaps>,
    broadcast_tx: mpsc::Sender<Broadcast>,
    next_conn_id: AtomicU64,
    closed: AtomicBool,
    offline_grace: Duration,
}

#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    pub fn new() -> (Self, mpsc::Receiver<Broadcast>) {
        Self::with_grace(OFFLINE_GRACE)
    }

    /// Tests shorten the offline grace period.
    pub fn with_grace(offline_grace: Duration) -> (Self, mpsc::Receiver<Broadcast>) {
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_QUEUE_SIZE);
        let hub = Hub {
            inner: Arc::new(HubInner {
                maps: RwLock::new(HubMaps {
                    connections: HashMap::new(),
                    presence: HashMap::new(),
                }),
                broadcast_tx,
                next_conn_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                offline_grace,
            }),
        };
        (hub, broadcast_rx)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Register a new session. Returns the connection handle, the receiver
    /// its writer task drains, and whether the user just came online (first
    /// live connection).
    pub fn register(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> (Arc<Connection>, mpsc::Receiver<String>, bool) {
        let (tx, rx) = mpsc::channel(CONNECTION_QUEUE_SIZE);
        let conn = Arc::new(Connection {
            id: self.inner.next_conn_id.fetch_add(1, Ordering::Relaxed),
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            tx,
        });

        let mut maps = self.inner.maps.write().unwrap_or_else(|e| e.into_inner());
        let users = maps.connections.entry(tenant_id.to_string()).or_default();
        let conns = users.entry(user_id.to_string()).or_default();
        let came_online = conns.is_empty();
        conns.push(conn.clone());
        maps.presence.insert(
            (tenant_id.to_string(), user_id.to_string()),
            chrono::Utc::now().to_rfc3339(),
        );

        (conn, rx, came_online)
    }

    /// Drop a session. When the user's connection set becomes empty, an
    /// offline check fires after the grace period; a reconnect in between
    /// suppresses the offline broadcast because the check re-reads the set.
    pub fn unregister(&self, conn: &Connection) {
        let user_emptied = {
            let mut maps = self.inner.maps.write().unwrap_or_else(|e| e.into_inner());
            let mut emptied = false;
            if let Some(users) = maps.connections.get_mut(&conn.tenant_id) {
                if let Some(conns) = users.get_mut(&conn.user_id) {
                    conns.retain(|c| c.id != conn.id);
                    if conns.is_empty() {
                        users.remove(&conn.user_id);
                        emptied = true;
                    }
                }
                if users.is_empty() {
                    maps.connections.remove(&conn.tenant_id);
                }
            }
            if emptied {
                maps.presence.insert(
                    (conn.tenant_id.clone(), conn.user_id.clone()),
                    chrono::Utc::now().to_rfc3339(),
                );
            }
            emptied
        };

        if user_emptied && !self.is_closed() {
            let hub = self.clone();
            let tenant_id = conn.tenant_id.clone();
            let user_id = conn.user_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(hub.inner.offline_grace).await;
                if hub.is_online(&tenant_id, &user_id) {
                    return;
                }
                {
                    let mut maps = hub.inner.maps.write().unwrap_or_else(|e| e.into_inner());
                    maps.presence.remove(&(tenant_id.clone(), user_id.clone()));
                }
                let frame = crate::ws::presence_frame(&tenant_id, &user_id, "offline");
                hub.send_to_tenant(&tenant_id, &frame);
            });
        }
    }

    pub fn is_online(&self, tenant_id: &str, user_id: &str) -> bool {
        let maps = self.inner.maps.read().unwrap_or_else(|e| e.into_inner());
        maps.connections
            .get(tenant_id)
            .and_then(|users| users.get(user_id))
            .is_some_and(|conns| !conns.is_empty())
    }

    pub fn online_users(&self, tenant_id: &str) -> Vec<String> {
        let maps = self.inner.maps.read().unwrap_or_else(|e| e.into_inner());
        maps.connections
            .get(tenant_id)
            .map(|users| users.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Online subset of a member list, for the room presence view.
    pub fn room_presence(&self, tenant_id: &str, members: &[String]) -> Vec<PresenceEntry> {
        let maps = self.inner.maps.read().unwrap_or_else(|e| e.into_inner());
        let users = match maps.connections.get(tenant_id) {
            Some(users) => users,
            None => return Vec::new(),
        };
        members
            .iter()
            .filter_map(|member| {
                users.get(member).map(|conns| PresenceEntry {
                    user_id: member.clone(),
                    connections: conns.len(),
                    last_seen: maps
                        .presence
                        .get(&(tenant_id.to_string(), member.clone()))
                        .cloned()
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Queue a room broadcast. Full channel drops the frame; the undelivered
    /// queue written at send time is the recovery path, so nothing is lost.
    pub fn broadcast_to_room(&self, tenant_id: &str, room_id: &str, frame: String) {
        if self.is_closed() {
            return;
        }
        let broadcast = Broadcast {
            tenant_id: tenant_id.to_string(),
            room_id: room_id.to_string(),
            frame,
        };
        if let Err(e) = self.inner.broadcast_tx.try_send(broadcast) {
            tracing::warn!(tenant_id, room_id, error = %e, "broadcast channel full, frame dropped");
        }
    }

    /// Write a frame to every connection of one user. Returns how many
    /// connections accepted it.
    pub fn send_to_user(&self, tenant_id: &str, user_id: &str, frame: &str) -> usize {
        if self.is_closed() {
            return 0;
        }
        let maps = self.inner.maps.read().unwrap_or_else(|e| e.into_inner());
        maps.connections
            .get(tenant_id)
            .and_then(|users| users.get(user_id))
            .map(|conns| conns.iter().filter(|c| c.try_send(frame)).count())
            .unwrap_or(0)
    }

    /// Write a frame to every connection of a tenant (presence updates,
    /// tenant-wide notifications).
    pub fn send_to_tenant(&self, tenant_id: &str, frame: &str) {
        if self.is_closed() {
            return;
        }
        let maps = self.inner.maps.read().unwrap_or_else(|e| e.into_inner());
        if let Some(users) = maps.connections.get(tenant_id) {
            for conns in users.values() {
                for conn in conns {
                    conn.try_send(frame);
                }
            }
        }
    }

    /// Deliver a pre-resolved room broadcast: every member's every
    /// connection. Called only by the fan-out worker, which holds no lock
    /// while resolving members.
    fn fan_out(&self, tenant_id: &str, members: &[String], frame: &str) {
        let maps = self.inner.maps.read().unwrap_or_else(|e| e.into_inner());
        let users = match maps.connections.get(tenant_id) {
            Some(users) => users,
            None => return,
        };
        let mut dropped = 0usize;
        for member in members {
            if let Some(conns) = users.get(member) {
                for conn in conns {
                    if !conn.try_send(frame) {
                        dropped += 1;
                    }
                }
            }
        }
        if dropped > 0 {
            tracing::warn!(tenant_id, dropped, "slow connections dropped a broadcast frame");
        }
    }

    /// Notify every connection and close the hub. Subsequent registers are
    /// rejected and writes become no-ops.
    pub fn shutdown(&self, reconnect_after_ms: u64) {
        let frame = serde_json::json!({
            "type": "server.shutdown",
            "reconnect_after_ms": reconnect_after_ms,
        })
        .to_string();

        let mut maps = self.inner.maps.write().unwrap_or_else(|e| e.into_inner());
        for users in maps.connections.values() {
            for conns in users.values() {
                for conn in conns {
                    conn.try_send(&frame);
                }
            }
        }
        // Dropping the senders ends each session's writer task once its
        // queue drains.
        maps.connections.clear();
        maps.presence.clear();
        self.inner.closed.store(true, Ordering::Release);
    }
}

/// Single fan-out worker: drains the broadcast channel in order, resolves
/// room members on its own connection, then writes to recipients. One worker
/// per hub keeps per-room ordering intact.
pub fn spawn_broadcast_worker(hub: Hub, db_path: String, mut rx: mpsc::Receiver<Broadcast>) {
    tokio::spawn(async move {
        let conn = match db::open_worker_connection(&db_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "broadcast worker failed to open database");
                return;
            }
        };
        while let Some(broadcast) = rx.recv().await {
            match rooms::member_ids(&conn, &broadcast.tenant_id, &broadcast.room_id) {
                Ok(members) => hub.fan_out(&broadcast.tenant_id, &members, &broadcast.frame),
                Err(e) => {
                    tracing::warn!(
                        tenant_id = %broadcast.tenant_id,
                        room_id = %broadcast.room_id,
                        error = %e,
                        "broadcast member resolution failed, frame dropped"
                    );
                }
            }
        }
    });
}
