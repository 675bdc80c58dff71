use crate::error::ApiError;
use crate::models::{DeliveryState, Message, TenantConfig, UndeliveredMessage};
use crate::rooms;
use rusqlite::{Connection, OptionalExtension, Row, params};

const MESSAGE_COLUMNS: &str = "id, tenant_id, room_id, sender_id, seq, content, meta, created_at";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let meta_str: String = row.get(6)?;
    Ok(Message {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        room_id: row.get(2)?,
        sender_id: row.get(3)?,
        seq: row.get(4)?,
        content: row.get(5)?,
        meta: serde_json::from_str(&meta_str).unwrap_or(serde_json::json!({})),
        created_at: row.get(7)?,
    })
}

/// Transactional send. The sequence allocation is a single
/// `UPDATE ... RETURNING` so two concurrent sends can never observe the same
/// value; the message insert and the per-recipient undelivered rows commit
/// atomically with it. A committed message therefore always has a contiguous
/// seq and its fan-out rows.
pub fn send_message(
    conn: &mut Connection,
    tenant_id: &str,
    config: &TenantConfig,
    room_id: &str,
    sender_id: &str,
    content: &str,
    meta: Option<serde_json::Value>,
) -> Result<Message, ApiError> {
    if content.is_empty() {
        return Err(ApiError::Validation("content cannot be empty".to_string()));
    }
    if content.len() > config.max_message_size {
        return Err(ApiError::Validation(format!(
            "content exceeds max_message_size ({} bytes)",
            config.max_message_size
        )));
    }

    let tx = conn.transaction()?;

    rooms::get_room(&tx, tenant_id, room_id)?;
    if !rooms::is_member(&tx, tenant_id, room_id, sender_id)? {
        return Err(ApiError::Forbidden);
    }

    let seq: i64 = tx
        .query_row(
            "UPDATE rooms SET last_seq = last_seq + 1 WHERE tenant_id = ?1 AND id = ?2
             RETURNING last_seq",
            params![tenant_id, room_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(ApiError::NotFound("room"))?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let meta = meta.unwrap_or(serde_json::json!({}));

    tx.execute(
        "INSERT INTO messages (id, tenant_id, room_id, sender_id, seq, content, meta, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            &id,
            tenant_id,
            room_id,
            sender_id,
            seq,
            content,
            meta.to_string(),
            &now
        ],
    )?;

    // At-least-once capture: a row per recipient regardless of online state.
    // ACKs and confirmed pushes drain them.
    for member in rooms::member_ids(&tx, tenant_id, room_id)? {
        if member == sender_id {
            continue;
        }
        tx.execute(
            "INSERT OR IGNORE INTO undelivered_messages
                 (tenant_id, user_id, room_id, message_id, seq, attempts, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![tenant_id, &member, room_id, &id, seq, &now],
        )?;
    }

    tx.commit()?;

    Ok(Message {
        id,
        tenant_id: tenant_id.to_string(),
        room_id: room_id.to_string(),
        sender_id: sender_id.to_string(),
        seq,
        content: content.to_string(),
        meta,
        created_at: now,
    })
}

/// Messages with `seq > after_seq`, ascending. `limit` clamps to [1, 100]
/// (default 50); negative `after_seq` reads from the start.
pub fn get_messages(
    conn: &Connection,
    tenant_id: &str,
    room_id: &str,
    after_seq: i64,
    limit: Option<i64>,
) -> Result<Vec<Message>, ApiError> {
    let after_seq = after_seq.max(0);
    let limit = limit.unwrap_or(50).clamp(1, 100);

    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE tenant_id = ?1 AND room_id = ?2 AND seq > ?3
         ORDER BY seq ASC LIMIT ?4"
    ))?;
    let messages = stmt
        .query_map(params![tenant_id, room_id, after_seq, limit], message_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(messages)
}

pub fn get_message(
    conn: &Connection,
    tenant_id: &str,
    message_id: &str,
) -> Result<Option<Message>, ApiError> {
    let message = conn
        .query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE tenant_id = ?1 AND id = ?2"),
            params![tenant_id, message_id],
            message_from_row,
        )
        .optional()?;
    Ok(message)
}

// --- ACK state ---

pub fn get_last_ack(
    conn: &Connection,
    tenant_id: &str,
    user_id: &str,
    room_id: &str,
) -> Result<i64, ApiError> {
    let last_ack: Option<i64> = conn
        .query_row(
            "SELECT last_ack FROM delivery_state
             WHERE tenant_id = ?1 AND user_id = ?2 AND room_id = ?3",
            params![tenant_id, user_id, room_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(last_ack.unwrap_or(0))
}

/// Idempotent max-upsert: the stored value only ever grows, so concurrent
/// ACKs from multiple sessions converge to the maximum. Acknowledged rows
/// leave the undelivered queue.
pub fn update_last_ack(
    conn: &Connection,
    tenant_id: &str,
    user_id: &str,
    room_id: &str,
    seq: i64,
) -> Result<DeliveryState, ApiError> {
    if seq < 0 {
        return Err(ApiError::Validation("seq must be non-negative".to_string()));
    }

    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO delivery_state (tenant_id, user_id, room_id, last_ack, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(tenant_id, user_id, room_id) DO UPDATE SET
           last_ack = MAX(delivery_state.last_ack, excluded.last_ack),
           updated_at = excluded.updated_at
         WHERE excluded.last_ack > delivery_state.last_ack",
        params![tenant_id, user_id, room_id, seq, &now],
    )?;

    let state = conn.query_row(
        "SELECT tenant_id, user_id, room_id, last_ack, updated_at FROM delivery_state
         WHERE tenant_id = ?1 AND user_id = ?2 AND room_id = ?3",
        params![tenant_id, user_id, room_id],
        |row| {
            Ok(DeliveryState {
                tenant_id: row.get(0)?,
                user_id: row.get(1)?,
                room_id: row.get(2)?,
                last_ack: row.get(3)?,
                updated_at: row.get(4)?,
            })
        },
    )?;

    conn.execute(
        "DELETE FROM undelivered_messages
         WHERE tenant_id = ?1 AND user_id = ?2 AND room_id = ?3 AND seq <= ?4",
        params![tenant_id, user_id, room_id, state.last_ack],
    )?;

    Ok(state)
}

// --- Undelivered queue ---

fn undelivered_from_row(row: &Row<'_>) -> rusqlite::Result<UndeliveredMessage> {
    Ok(UndeliveredMessage {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        user_id: row.get(2)?,
        room_id: row.get(3)?,
        message_id: row.get(4)?,
        seq: row.get(5)?,
        attempts: row.get(6)?,
        created_at: row.get(7)?,
        last_attempt_at: row.get(8)?,
    })
}

const UNDELIVERED_COLUMNS: &str =
    "id, tenant_id, user_id, room_id, message_id, seq, attempts, created_at, last_attempt_at";

pub fn queue_undelivered(
    conn: &Connection,
    tenant_id: &str,
    user_id: &str,
    room_id: &str,
    message_id: &str,
    seq: i64,
) -> Result<(), ApiError> {
    conn.execute(
        "INSERT OR IGNORE INTO undelivered_messages
             (tenant_id, user_id, room_id, message_id, seq, attempts, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        params![
            tenant_id,
            user_id,
            room_id,
            message_id,
            seq,
            chrono::Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

/// Confirmed delivery removes the row.
pub fn mark_delivered(conn: &Connection, id: i64) -> Result<(), ApiError> {
    conn.execute("DELETE FROM undelivered_messages WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn get_undelivered(
    conn: &Connection,
    tenant_id: &str,
    user_id: &str,
    limit: i64,
) -> Result<Vec<UndeliveredMessage>, ApiError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {UNDELIVERED_COLUMNS} FROM undelivered_messages
         WHERE tenant_id = ?1 AND user_id = ?2
         ORDER BY created_at ASC, seq ASC LIMIT ?3"
    ))?;
    let rows = stmt
        .query_map(params![tenant_id, user_id, limit], undelivered_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Worker fetch: retryable rows, oldest first. Rows attempted within the
/// retry interval are left for a later tick.
pub fn pending_undelivered(
    conn: &Connection,
    tenant_id: &str,
    retry_limit: i64,
    retry_cutoff: &str,
    limit: i64,
) -> Result<Vec<UndeliveredMessage>, ApiError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {UNDELIVERED_COLUMNS} FROM undelivered_messages
         WHERE tenant_id = ?1 AND attempts < ?2
           AND (last_attempt_at IS NULL OR last_attempt_at <= ?3)
         ORDER BY created_at ASC, seq ASC LIMIT ?4"
    ))?;
    let rows = stmt
        .query_map(
            params![tenant_id, retry_limit, retry_cutoff, limit],
            undelivered_from_row,
        )?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Dead-letter view: rows whose retries are exhausted, retained for admin
/// inspection until GC.
pub fn get_failed_undelivered(
    conn: &Connection,
    tenant_id: &str,
    retry_limit: i64,
    limit: i64,
) -> Result<Vec<UndeliveredMessage>, ApiError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {UNDELIVERED_COLUMNS} FROM undelivered_messages
         WHERE tenant_id = ?1 AND attempts >= ?2
         ORDER BY created_at ASC LIMIT ?3"
    ))?;
    let rows = stmt
        .query_map(params![tenant_id, retry_limit, limit], undelivered_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

pub fn bump_attempt(conn: &Connection, id: i64) -> Result<(), ApiError> {
    conn.execute(
        "UPDATE undelivered_messages SET attempts = attempts + 1, last_attempt_at = ?1
         WHERE id = ?2",
        params![chrono::Utc::now().to_rfc3339(), id],
    )?;
    Ok(())
}
