use crate::error::ApiError;
use crate::models::{CreateNotification, Notification, NotificationStatus, NotificationTargets};
use rusqlite::{Connection, Row, params};

const NOTIFICATION_COLUMNS: &str =
    "id, tenant_id, topic, payload, status, attempts, created_at, last_attempt_at";

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    let payload_str: String = row.get(3)?;
    Ok(Notification {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        topic: row.get(2)?,
        payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::json!({})),
        status: row.get(4)?,
        attempts: row.get(5)?,
        created_at: row.get(6)?,
        last_attempt_at: row.get(7)?,
    })
}

/// Insert a durable `pending` row. Acceptance, not delivery: the delivery
/// worker owns every later transition.
pub fn create_notification(
    conn: &Connection,
    tenant_id: &str,
    body: &CreateNotification,
) -> Result<Notification, ApiError> {
    let topic = body.topic.trim();
    if topic.is_empty() || topic.len() > 200 {
        return Err(ApiError::Validation(
            "topic must be 1-200 characters".to_string(),
        ));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let payload = body.payload.clone().unwrap_or(serde_json::json!({}));
    let targets = body.targets.clone().unwrap_or_default();

    conn.execute(
        "INSERT INTO notifications (id, tenant_id, topic, payload, targets, status, attempts, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
        params![
            &id,
            tenant_id,
            topic,
            payload.to_string(),
            serde_json::to_string(&targets).unwrap_or_else(|_| "{}".to_string()),
            NotificationStatus::Pending,
            &now
        ],
    )?;

    Ok(Notification {
        id,
        tenant_id: tenant_id.to_string(),
        topic: topic.to_string(),
        payload,
        status: NotificationStatus::Pending,
        attempts: 0,
        created_at: now,
        last_attempt_at: None,
    })
}

/// Worker fetch: rows the status machine still owes work to, oldest first.
/// `processing` rows are re-picked so a crashed tick cannot strand them.
pub fn pending_notifications(
    conn: &Connection,
    tenant_id: &str,
    limit: i64,
) -> Result<Vec<(Notification, NotificationTargets)>, ApiError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {NOTIFICATION_COLUMNS}, targets FROM notifications
         WHERE tenant_id = ?1 AND status IN (?2, ?3)
         ORDER BY created_at ASC LIMIT ?4"
    ))?;
    let rows = stmt
        .query_map(
            params![
                tenant_id,
                NotificationStatus::Pending,
                NotificationStatus::Processing,
                limit
            ],
            |row| {
                let notification = notification_from_row(row)?;
                let targets_str: String = row.get(8)?;
                Ok((notification, targets_str))
            },
        )?
        .filter_map(|r| r.ok())
        .map(|(notification, targets_str)| {
            let targets = serde_json::from_str(&targets_str).unwrap_or_default();
            (notification, targets)
        })
        .collect();
    Ok(rows)
}

pub fn mark_processing(conn: &Connection, id: &str) -> Result<(), ApiError> {
    conn.execute(
        "UPDATE notifications SET status = ?1, last_attempt_at = ?2 WHERE id = ?3",
        params![
            NotificationStatus::Processing,
            chrono::Utc::now().to_rfc3339(),
            id
        ],
    )?;
    Ok(())
}

pub fn mark_delivered(conn: &Connection, id: &str) -> Result<(), ApiError> {
    conn.execute(
        "UPDATE notifications SET status = ?1, last_attempt_at = ?2 WHERE id = ?3",
        params![
            NotificationStatus::Delivered,
            chrono::Utc::now().to_rfc3339(),
            id
        ],
    )?;
    Ok(())
}

/// Failure transition: `attempts++`, back to `pending` while retries remain,
/// terminal `dead` once exhausted. Returns the resulting status.
pub fn mark_failed(
    conn: &Connection,
    id: &str,
    retry_limit: i64,
) -> Result<NotificationStatus, ApiError> {
    let status: NotificationStatus = conn.query_row(
        "UPDATE notifications
         SET attempts = attempts + 1,
             last_attempt_at = ?1,
             status = CASE WHEN attempts + 1 < ?2 THEN ?3 ELSE ?4 END
         WHERE id = ?5
         RETURNING status",
        params![
            chrono::Utc::now().to_rfc3339(),
            retry_limit,
            NotificationStatus::Pending,
            NotificationStatus::Dead,
            id
        ],
        |row| row.get(0),
    )?;
    Ok(status)
}

/// Terminal failures for the dead-letter listing.
pub fn dead_notifications(
    conn: &Connection,
    tenant_id: &str,
    limit: i64,
) -> Result<Vec<Notification>, ApiError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications
         WHERE tenant_id = ?1 AND status = ?2
         ORDER BY created_at ASC LIMIT ?3"
    ))?;
    let rows = stmt
        .query_map(
            params![tenant_id, NotificationStatus::Dead, limit],
            notification_from_row,
        )?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}
