use crate::db::Db;
use crate::models::NotificationStatus;
use crate::rate_limit::RateLimiter;
use rocket::http::Status;
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::{State, get};

use super::{AuthedTenant, admit};
use crate::error::ApiError;

/// Process start marker for the health report.
pub struct StartTime(pub std::time::Instant);

/// GET /health — liveness plus a cheap read that exercises the pool. A
/// failing read degrades the whole report to 503.
#[get("/health")]
pub fn health(db: &State<Db>, start: &State<StartTime>) -> status::Custom<Json<serde_json::Value>> {
    let db_writable = {
        let conn = db.conn();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    };
    let uptime = start.0.elapsed().as_secs();

    if db_writable {
        status::Custom(
            Status::Ok,
            Json(serde_json::json!({
                "status": "ok",
                "uptime": uptime,
                "db_writable": true,
                "version": env!("CARGO_PKG_VERSION"),
            })),
        )
    } else {
        status::Custom(
            Status::ServiceUnavailable,
            Json(serde_json::json!({
                "status": "error",
                "uptime": uptime,
                "db_writable": false,
                "version": env!("CARGO_PKG_VERSION"),
            })),
        )
    }
}

/// GET /stats — tenant-scoped counters for dashboards.
#[get("/stats")]
pub fn stats(
    db: &State<Db>,
    hub: &State<crate::hub::Hub>,
    limiter: &State<RateLimiter>,
    auth: AuthedTenant,
) -> Result<Json<serde_json::Value>, ApiError> {
    admit(limiter, &auth)?;
    let conn = db.conn();

    let room_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM rooms WHERE tenant_id = ?1",
        [&auth.tenant.id],
        |r| r.get(0),
    )?;
    let message_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE tenant_id = ?1",
        [&auth.tenant.id],
        |r| r.get(0),
    )?;
    let queued: i64 = conn.query_row(
        "SELECT COUNT(*) FROM undelivered_messages WHERE tenant_id = ?1",
        [&auth.tenant.id],
        |r| r.get(0),
    )?;
    let pending_notifications: i64 = conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE tenant_id = ?1 AND status IN (?2, ?3)",
        rusqlite::params![
            &auth.tenant.id,
            NotificationStatus::Pending,
            NotificationStatus::Processing
        ],
        |r| r.get(0),
    )?;
    let dead_notifications: i64 = conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE tenant_id = ?1 AND status = ?2",
        rusqlite::params![&auth.tenant.id, NotificationStatus::Dead],
        |r| r.get(0),
    )?;

    Ok(Json(serde_json::json!({
        "rooms": room_count,
        "messages": message_count,
        "undelivered_queue": queued,
        "pending_notifications": pending_notifications,
        "dead_notifications": dead_notifications,
        "online_users": hub.online_users(&auth.tenant.id).len(),
    })))
}

// --- Catchers ---

#[rocket::catch(400)]
pub fn bad_request() -> Json<serde_json::Value> {
    Json(serde_json::json!({"error": "bad request"}))
}

#[rocket::catch(401)]
pub fn unauthorized() -> Json<serde_json::Value> {
    Json(serde_json::json!({"error": "unauthorized"}))
}

#[rocket::catch(404)]
pub fn not_found() -> Json<serde_json::Value> {
    Json(serde_json::json!({"error": "not found"}))
}

/// Body parse failures surface as 422 inside Rocket; the API contract calls
/// them validation errors.
#[rocket::catch(422)]
pub fn unprocessable() -> status::Custom<Json<serde_json::Value>> {
    status::Custom(
        Status::BadRequest,
        Json(serde_json::json!({"error": "malformed request body"})),
    )
}

#[rocket::catch(429)]
pub fn too_many_requests() -> Json<serde_json::Value> {
    Json(serde_json::json!({"error": "too many requests"}))
}

#[rocket::catch(500)]
pub fn internal_error() -> Json<serde_json::Value> {
    Json(serde_json::json!({"error": "internal error"}))
}
