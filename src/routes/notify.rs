use crate::db::Db;
use crate::error::ApiError;
use crate::models::{CreateNotification, Notification};
use crate::notifications;
use crate::rate_limit::RateLimiter;
use rocket::http::Status;
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::{State, post};

use super::{AuthedTenant, admit};

/// POST /notify — accept a durable notification. 202: accepted, not
/// delivered; the delivery worker drives it from here.
#[post("/notify", format = "json", data = "<body>")]
pub fn create_notification(
    db: &State<Db>,
    limiter: &State<RateLimiter>,
    auth: AuthedTenant,
    body: Json<CreateNotification>,
) -> Result<status::Custom<Json<Notification>>, ApiError> {
    admit(limiter, &auth)?;

    let notification = {
        let conn = db.conn();
        notifications::create_notification(&conn, &auth.tenant.id, &body)?
    };

    Ok(status::Custom(Status::Accepted, Json(notification)))
}
