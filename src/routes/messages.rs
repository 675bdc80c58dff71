use crate::db::Db;
use crate::error::ApiError;
use crate::hub::Hub;
use crate::messages;
use crate::models::{Message, SendMessageBody, SendMessageResponse};
use crate::rooms;
use crate::rate_limit::RateLimiter;
use crate::ws;
use rocket::http::Status;
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::{State, get, post};

use super::{AuthedTenant, UserId, admit};

/// POST /rooms/<room_id>/messages — transactional send, then broadcast. The
/// broadcast is queued after commit; its failure never reaches the caller
/// because the undelivered queue already holds the recovery rows.
#[post("/rooms/<room_id>/messages", format = "json", data = "<body>")]
pub fn send_message(
    db: &State<Db>,
    hub: &State<Hub>,
    limiter: &State<RateLimiter>,
    auth: AuthedTenant,
    user: UserId,
    room_id: &str,
    body: Json<SendMessageBody>,
) -> Result<status::Custom<Json<SendMessageResponse>>, ApiError> {
    admit(limiter, &auth)?;

    let message = {
        let mut conn = db.conn();
        messages::send_message(
            &mut conn,
            &auth.tenant.id,
            &auth.config,
            room_id,
            &user.0,
            &body.content,
            body.meta.clone(),
        )?
    };

    hub.broadcast_to_room(&auth.tenant.id, room_id, ws::message_frame(&message));

    Ok(status::Custom(
        Status::Created,
        Json(SendMessageResponse {
            message_id: message.id,
            seq: message.seq,
            created_at: message.created_at,
        }),
    ))
}

/// GET /rooms/<room_id>/messages?after_seq=&limit= — ascending seq order,
/// membership required.
#[get("/rooms/<room_id>/messages?<after_seq>&<limit>")]
pub fn get_messages(
    db: &State<Db>,
    limiter: &State<RateLimiter>,
    auth: AuthedTenant,
    user: UserId,
    room_id: &str,
    after_seq: Option<i64>,
    limit: Option<i64>,
) -> Result<Json<Vec<Message>>, ApiError> {
    admit(limiter, &auth)?;

    let conn = db.conn();
    rooms::get_room(&conn, &auth.tenant.id, room_id)?;
    if !rooms::is_member(&conn, &auth.tenant.id, room_id, &user.0)? {
        return Err(ApiError::Forbidden);
    }

    Ok(Json(messages::get_messages(
        &conn,
        &auth.tenant.id,
        room_id,
        after_seq.unwrap_or(0),
        limit,
    )?))
}
