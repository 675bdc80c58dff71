use crate::error::ApiError;
use crate::models::{CreateRoom, Room, RoomMember, RoomWithStats};
use rusqlite::{Connection, OptionalExtension, Row, params};

pub const ROOM_TYPE_DM: &str = "dm";
pub const ROOM_TYPE_GROUP: &str = "group";
pub const ROOM_TYPE_CHANNEL: &str = "channel";

/// Deterministic DM key from the sorted member pair, so the same two users
/// always resolve to the same room regardless of member order.
pub fn dm_unique_key(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("dm:{}:{}", first, second)
}

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<Room> {
    Ok(Room {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        room_type: row.get(2)?,
        unique_key: row.get(3)?,
        name: row.get(4)?,
        last_seq: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const ROOM_COLUMNS: &str = "id, tenant_id, room_type, unique_key, name, last_seq, created_at";

/// Create a room and its membership rows in one transaction.
///
/// DMs are idempotent: a second create with the same member pair returns the
/// existing room and `created = false`. Any member insert failure rolls the
/// whole creation back.
pub fn create_room(
    conn: &mut Connection,
    tenant_id: &str,
    creator: &str,
    body: &CreateRoom,
) -> Result<(Room, bool), ApiError> {
    let mut members: Vec<String> = body
        .members
        .iter()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect();
    members.sort();
    members.dedup();

    match body.room_type.as_str() {
        ROOM_TYPE_DM => {
            if members.len() != 2 {
                return Err(ApiError::Validation(
                    "dm requires exactly 2 distinct members".to_string(),
                ));
            }
        }
        ROOM_TYPE_GROUP | ROOM_TYPE_CHANNEL => {
            if members.len() < 2 {
                return Err(ApiError::Validation(format!(
                    "{} requires at least 2 members",
                    body.room_type
                )));
            }
        }
        other => {
            return Err(ApiError::Validation(format!("unknown room type '{other}'")));
        }
    }

    let unique_key = if body.room_type == ROOM_TYPE_DM {
        Some(dm_unique_key(&members[0], &members[1]))
    } else {
        None
    };

    // Idempotent DM create: same pair resolves to the same room.
    if let Some(ref key) = unique_key
        && let Some(existing) = room_by_unique_key(conn, tenant_id, key)?
    {
        return Ok((existing, false));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    let tx = conn.transaction()?;
    let inserted = tx.execute(
        "INSERT INTO rooms (id, tenant_id, room_type, unique_key, name, last_seq, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
         ON CONFLICT(tenant_id, unique_key) WHERE unique_key IS NOT NULL DO NOTHING",
        params![&id, tenant_id, &body.room_type, &unique_key, &body.name, &now],
    )?;

    if inserted == 0 {
        // Lost a DM-create race; the winner's row is the canonical one.
        drop(tx);
        let key = unique_key.as_deref().unwrap_or_default();
        return match room_by_unique_key(conn, tenant_id, key)? {
            Some(existing) => Ok((existing, false)),
            None => Err(ApiError::Conflict("room already exists".to_string())),
        };
    }

    for member in &members {
        let role = if body.room_type != ROOM_TYPE_DM && member == creator {
            "admin"
        } else {
            "member"
        };
        tx.execute(
            "INSERT INTO room_members (tenant_id, room_id, user_id, role, joined_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![tenant_id, &id, member, role, &now],
        )?;
    }
    tx.commit()?;

    let room = Room {
        id,
        tenant_id: tenant_id.to_string(),
        room_type: body.room_type.clone(),
        unique_key,
        name: body.name.clone(),
        last_seq: 0,
        created_at: now,
    };
    Ok((room, true))
}

fn room_by_unique_key(
    conn: &Connection,
    tenant_id: &str,
    unique_key: &str,
) -> Result<Option<Room>, ApiError> {
    let room = conn
        .query_row(
            &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE tenant_id = ?1 AND unique_key = ?2"),
            params![tenant_id, unique_key],
            room_from_row,
        )
        .optional()?;
    Ok(room)
}

pub fn get_room(conn: &Connection, tenant_id: &str, room_id: &str) -> Result<Room, ApiError> {
    conn.query_row(
        &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE tenant_id = ?1 AND id = ?2"),
        params![tenant_id, room_id],
        room_from_row,
    )
    .optional()?
    .ok_or(ApiError::NotFound("room"))
}

pub fn get_room_members(
    conn: &Connection,
    tenant_id: &str,
    room_id: &str,
) -> Result<Vec<RoomMember>, ApiError> {
    // Distinguish an absent room from an empty member list
    get_room(conn, tenant_id, room_id)?;

    let mut stmt = conn.prepare(
        "SELECT tenant_id, room_id, user_id, role, joined_at FROM room_members
         WHERE tenant_id = ?1 AND room_id = ?2 ORDER BY joined_at, user_id",
    )?;
    let members = stmt
        .query_map(params![tenant_id, room_id], |row| {
            Ok(RoomMember {
                tenant_id: row.get(0)?,
                room_id: row.get(1)?,
                user_id: row.get(2)?,
                role: row.get(3)?,
                joined_at: row.get(4)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(members)
}

/// Member user ids only, the broadcast fan-out set.
pub fn member_ids(
    conn: &Connection,
    tenant_id: &str,
    room_id: &str,
) -> Result<Vec<String>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM room_members WHERE tenant_id = ?1 AND room_id = ?2",
    )?;
    let ids = stmt
        .query_map(params![tenant_id, room_id], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(ids)
}

/// Room ids a user belongs to, for the reconnect sweep.
pub fn room_ids_for_user(
    conn: &Connection,
    tenant_id: &str,
    user_id: &str,
) -> Result<Vec<String>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT room_id FROM room_members WHERE tenant_id = ?1 AND user_id = ?2 ORDER BY joined_at",
    )?;
    let ids = stmt
        .query_map(params![tenant_id, user_id], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(ids)
}

pub fn is_member(
    conn: &Connection,
    tenant_id: &str,
    room_id: &str,
    user_id: &str,
) -> Result<bool, ApiError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM room_members WHERE tenant_id = ?1 AND room_id = ?2 AND user_id = ?3",
        params![tenant_id, room_id, user_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Adding an already-present member is a no-op.
pub fn add_member(
    conn: &Connection,
    tenant_id: &str,
    room_id: &str,
    user_id: &str,
    role: &str,
) -> Result<(), ApiError> {
    get_room(conn, tenant_id, room_id)?;
    conn.execute(
        "INSERT OR IGNORE INTO room_members (tenant_id, room_id, user_id, role, joined_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            tenant_id,
            room_id,
            user_id,
            role,
            chrono::Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

/// Removing a non-member fails with `NotFound`.
pub fn remove_member(
    conn: &Connection,
    tenant_id: &str,
    room_id: &str,
    user_id: &str,
) -> Result<(), ApiError> {
    get_room(conn, tenant_id, room_id)?;
    let removed = conn.execute(
        "DELETE FROM room_members WHERE tenant_id = ?1 AND room_id = ?2 AND user_id = ?3",
        params![tenant_id, room_id, user_id],
    )?;
    if removed == 0 {
        return Err(ApiError::NotFound("member"));
    }
    Ok(())
}

/// Rooms the user belongs to, with message stats for the room list view.
pub fn list_rooms_for_user(
    conn: &Connection,
    tenant_id: &str,
    user_id: &str,
) -> Result<Vec<RoomWithStats>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.room_type, r.name, r.last_seq, r.created_at,
                (SELECT COUNT(*) FROM messages WHERE room_id = r.id) AS message_count,
                (SELECT MAX(created_at) FROM messages WHERE room_id = r.id) AS last_activity
         FROM rooms r
         JOIN room_members rm ON rm.tenant_id = r.tenant_id AND rm.room_id = r.id
         WHERE r.tenant_id = ?1 AND rm.user_id = ?2
         ORDER BY last_activity IS NULL, last_activity DESC, r.created_at DESC",
    )?;
    let rooms = stmt
        .query_map(params![tenant_id, user_id], |row| {
            Ok(RoomWithStats {
                id: row.get(0)?,
                room_type: row.get(1)?,
                name: row.get(2)?,
                last_seq: row.get(3)?,
                created_at: row.get(4)?,
                message_count: row.get(5)?,
                last_activity: row.get(6)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rooms)
}
