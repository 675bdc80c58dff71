use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared database handle. A single writer connection behind a mutex; WAL
/// keeps the worker connections' reads concurrent with it.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

/// Generate an opaque tenant id: `tn_<32 hex chars>`
pub fn generate_tenant_id() -> String {
    format!("tn_{:032x}", uuid::Uuid::new_v4().as_u128())
}

/// Generate a tenant API key: `key_<64 hex chars>` (256 bits of randomness).
pub fn generate_api_key() -> String {
    format!(
        "key_{:032x}{:032x}",
        uuid::Uuid::new_v4().as_u128(),
        uuid::Uuid::new_v4().as_u128()
    )
}

impl Db {
    pub fn open(path: &str) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
        let db = Db {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn migrate(&self) -> rusqlite::Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                api_key TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                config TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rooms (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                room_type TEXT NOT NULL,
                unique_key TEXT,
                name TEXT,
                last_seq INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rooms_tenant ON rooms(tenant_id, id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_rooms_unique_key
                ON rooms(tenant_id, unique_key) WHERE unique_key IS NOT NULL;

            CREATE TABLE IF NOT EXISTS room_members (
                tenant_id TEXT NOT NULL,
                room_id TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'member',
                joined_at TEXT NOT NULL,
                PRIMARY KEY (tenant_id, room_id, user_id)
            );
            CREATE INDEX IF NOT EXISTS idx_members_user ON room_members(tenant_id, user_id);
            CREATE INDEX IF NOT EXISTS idx_members_room ON room_members(tenant_id, room_id);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                room_id TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                sender_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                content TEXT NOT NULL,
                meta TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                UNIQUE (tenant_id, room_id, seq)
            );

            CREATE TABLE IF NOT EXISTS delivery_state (
                tenant_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                room_id TEXT NOT NULL,
                last_ack INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (tenant_id, user_id, room_id)
            );

            CREATE TABLE IF NOT EXISTS undelivered_messages (
                id INTEGER PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                room_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_attempt_at TEXT,
                UNIQUE (tenant_id, user_id, message_id)
            );
            CREATE INDEX IF NOT EXISTS idx_undelivered_user
                ON undelivered_messages(tenant_id, user_id, room_id, seq);

            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                topic TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '{}',
                targets TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_attempt_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_notifications_status
                ON notifications(tenant_id, status, created_at);",
        )?;
        Ok(())
    }
}

/// Open a dedicated connection for a background worker. Workers never contend
/// on the request connection's mutex; WAL keeps their reads concurrent.
pub fn open_worker_connection(path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
    Ok(conn)
}
