// Route module decomposition — each domain area in its own file.
// Shared request guards and the admission helper live here.

mod acks;
mod admin;
mod messages;
mod notify;
mod rooms;
mod system;
mod ws;

pub use acks::post_ack;
pub use admin::{create_tenant, dead_letters};
pub use messages::{get_messages, send_message};
pub use notify::create_notification;
pub use rooms::{
    add_member, create_room, get_room, get_room_members, list_rooms, remove_member, room_presence,
};
pub use system::{
    StartTime, bad_request, health, internal_error, not_found, stats, too_many_requests,
    unauthorized, unprocessable,
};
pub use ws::websocket;

use crate::config::AppConfig;
use crate::db::Db;
use crate::error::ApiError;
use crate::models::{Tenant, TenantConfig};
use crate::rate_limit::RateLimiter;
use crate::tenants;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};

/// Authenticated tenant, resolved from `X-API-Key` by a single indexed
/// lookup. The guard never says whether the key was malformed or unknown.
pub struct AuthedTenant {
    pub tenant: Tenant,
    pub config: TenantConfig,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthedTenant {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(key) = req.headers().get_one("X-API-Key") else {
            return Outcome::Error((Status::Unauthorized, ()));
        };
        let Some(db) = req.rocket().state::<Db>() else {
            return Outcome::Error((Status::InternalServerError, ()));
        };
        let result = {
            let conn = db.conn();
            tenants::authenticate(&conn, key)
        };
        match result {
            Ok(Some((tenant, config))) => Outcome::Success(AuthedTenant { tenant, config }),
            Ok(None) => Outcome::Error((Status::Unauthorized, ())),
            Err(_) => Outcome::Error((Status::InternalServerError, ())),
        }
    }
}

/// Master-key guard for tenant administration.
pub struct MasterKey;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for MasterKey {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(config) = req.rocket().state::<AppConfig>() else {
            return Outcome::Error((Status::InternalServerError, ()));
        };
        match req.headers().get_one("X-Master-Key") {
            Some(key) if key == config.master_api_key => Outcome::Success(MasterKey),
            _ => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

/// Caller identity on chat endpoints, from `X-User-Id`.
pub struct UserId(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for UserId {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match req.headers().get_one("X-User-Id").map(str::trim) {
            Some(id) if !id.is_empty() && id.len() <= 100 => {
                Outcome::Success(UserId(id.to_string()))
            }
            _ => Outcome::Error((Status::BadRequest, ())),
        }
    }
}

/// Consume one token from the tenant's bucket or fail with `RateLimited`.
pub fn admit(limiter: &RateLimiter, auth: &AuthedTenant) -> Result<(), ApiError> {
    let info = limiter.allow(&auth.tenant.id, auth.config.rate_limit_rps);
    if info.allowed {
        Ok(())
    } else {
        Err(ApiError::RateLimited {
            retry_after_secs: info.retry_after_secs,
            limit: info.limit,
        })
    }
}
