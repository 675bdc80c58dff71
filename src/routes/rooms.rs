use crate::db::Db;
use crate::error::ApiError;
use crate::hub::Hub;
use crate::models::{AddMemberBody, CreateRoom, PresenceEntry, Room, RoomMember, RoomWithStats};
use crate::rate_limit::RateLimiter;
use crate::rooms;
use rocket::http::Status;
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post};

use super::{AuthedTenant, UserId, admit};

/// POST /rooms — create a dm/group/channel. A DM that already exists for the
/// member pair comes back 200 instead of 201, unchanged.
#[post("/rooms", format = "json", data = "<body>")]
pub fn create_room(
    db: &State<Db>,
    limiter: &State<RateLimiter>,
    auth: AuthedTenant,
    user: UserId,
    body: Json<CreateRoom>,
) -> Result<status::Custom<Json<Room>>, ApiError> {
    admit(limiter, &auth)?;

    let (room, created) = {
        let mut conn = db.conn();
        rooms::create_room(&mut conn, &auth.tenant.id, &user.0, &body)?
    };

    let code = if created { Status::Created } else { Status::Ok };
    Ok(status::Custom(code, Json(room)))
}

/// GET /rooms — rooms the calling user belongs to, most recently active first.
#[get("/rooms")]
pub fn list_rooms(
    db: &State<Db>,
    limiter: &State<RateLimiter>,
    auth: AuthedTenant,
    user: UserId,
) -> Result<Json<Vec<RoomWithStats>>, ApiError> {
    admit(limiter, &auth)?;
    let conn = db.conn();
    Ok(Json(rooms::list_rooms_for_user(
        &conn,
        &auth.tenant.id,
        &user.0,
    )?))
}

#[get("/rooms/<room_id>")]
pub fn get_room(
    db: &State<Db>,
    limiter: &State<RateLimiter>,
    auth: AuthedTenant,
    room_id: &str,
) -> Result<Json<Room>, ApiError> {
    admit(limiter, &auth)?;
    let conn = db.conn();
    Ok(Json(rooms::get_room(&conn, &auth.tenant.id, room_id)?))
}

#[get("/rooms/<room_id>/members")]
pub fn get_room_members(
    db: &State<Db>,
    limiter: &State<RateLimiter>,
    auth: AuthedTenant,
    room_id: &str,
) -> Result<Json<Vec<RoomMember>>, ApiError> {
    admit(limiter, &auth)?;
    let conn = db.conn();
    Ok(Json(rooms::get_room_members(
        &conn,
        &auth.tenant.id,
        room_id,
    )?))
}

/// POST /rooms/<room_id>/members — add a member; adding an existing member
/// is a no-op.
#[post("/rooms/<room_id>/members", format = "json", data = "<body>")]
pub fn add_member(
    db: &State<Db>,
    limiter: &State<RateLimiter>,
    auth: AuthedTenant,
    room_id: &str,
    body: Json<AddMemberBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    admit(limiter, &auth)?;

    let user_id = body.user_id.trim();
    if user_id.is_empty() || user_id.len() > 100 {
        return Err(ApiError::Validation(
            "user_id must be 1-100 characters".to_string(),
        ));
    }
    let role = match body.role.as_deref() {
        None | Some("member") => "member",
        Some("admin") => "admin",
        Some(other) => {
            return Err(ApiError::Validation(format!("unknown role '{other}'")));
        }
    };

    let conn = db.conn();
    rooms::add_member(&conn, &auth.tenant.id, room_id, user_id, role)?;
    Ok(Json(serde_json::json!({"ok": true})))
}

/// DELETE /rooms/<room_id>/members/<user_id> — removing a non-member is 404.
#[delete("/rooms/<room_id>/members/<user_id>")]
pub fn remove_member(
    db: &State<Db>,
    limiter: &State<RateLimiter>,
    auth: AuthedTenant,
    room_id: &str,
    user_id: &str,
) -> Result<Json<serde_json::Value>, ApiError> {
    admit(limiter, &auth)?;
    let conn = db.conn();
    rooms::remove_member(&conn, &auth.tenant.id, room_id, user_id)?;
    Ok(Json(serde_json::json!({"ok": true})))
}

/// GET /rooms/<room_id>/presence — members currently online per the hub.
#[get("/rooms/<room_id>/presence")]
pub fn room_presence(
    db: &State<Db>,
    hub: &State<Hub>,
    limiter: &State<RateLimiter>,
    auth: AuthedTenant,
    room_id: &str,
) -> Result<Json<Vec<PresenceEntry>>, ApiError> {
    admit(limiter, &auth)?;
    let members = {
        let conn = db.conn();
        rooms::get_room(&conn, &auth.tenant.id, room_id)?;
        rooms::member_ids(&conn, &auth.tenant.id, room_id)?
    };
    Ok(Json(hub.room_presence(&auth.tenant.id, &members)))
}
