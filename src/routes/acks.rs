use crate::db::Db;
use crate::error::ApiError;
use crate::hub::Hub;
use crate::messages;
use crate::models::{AckBody, DeliveryState};
use crate::rate_limit::RateLimiter;
use crate::rooms;
use crate::ws;
use rocket::serde::json::Json;
use rocket::{State, post};

use super::{AuthedTenant, UserId, admit};

/// POST /acks — idempotent max-upsert of the caller's read position. Peers
/// in the room get an `ack.received` frame so they can render receipts.
#[post("/acks", format = "json", data = "<body>")]
pub fn post_ack(
    db: &State<Db>,
    hub: &State<Hub>,
    limiter: &State<RateLimiter>,
    auth: AuthedTenant,
    user: UserId,
    body: Json<AckBody>,
) -> Result<Json<DeliveryState>, ApiError> {
    admit(limiter, &auth)?;

    let state = {
        let conn = db.conn();
        rooms::get_room(&conn, &auth.tenant.id, &body.room_id)?;
        if !rooms::is_member(&conn, &auth.tenant.id, &body.room_id, &user.0)? {
            return Err(ApiError::Forbidden);
        }
        messages::update_last_ack(&conn, &auth.tenant.id, &user.0, &body.room_id, body.seq)?
    };

    hub.broadcast_to_room(
        &auth.tenant.id,
        &body.room_id,
        ws::ack_received_frame(&body.room_id, state.last_ack, &user.0),
    );

    Ok(Json(state))
}
