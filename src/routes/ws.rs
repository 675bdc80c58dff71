use crate::ShutdownSignal;
use crate::db::Db;
use crate::error::ApiError;
use crate::hub::Hub;
use crate::rate_limit::RateLimiter;
use crate::tenants;
use crate::ws::{SessionContext, TypingTracker, run_session};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::{State, get};

/// Header credentials for the websocket handshake. Always succeeds; the
/// route falls back to query parameters when headers are absent.
pub struct WsHeaders {
    api_key: Option<String>,
    user_id: Option<String>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for WsHeaders {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(WsHeaders {
            api_key: req.headers().get_one("X-API-Key").map(String::from),
            user_id: req.headers().get_one("X-User-Id").map(String::from),
        })
    }
}

/// GET /ws — authenticate (headers preferred, query fallback), then hand the
/// upgraded stream to the session runner.
#[get("/ws?<api_key>&<user_id>")]
#[allow(clippy::too_many_arguments)]
pub fn websocket(
    ws: rocket_ws::WebSocket,
    headers: WsHeaders,
    api_key: Option<String>,
    user_id: Option<String>,
    db: &State<Db>,
    hub: &State<Hub>,
    limiter: &State<RateLimiter>,
    typing: &State<TypingTracker>,
    shutdown: &State<ShutdownSignal>,
) -> Result<rocket_ws::Channel<'static>, ApiError> {
    let key = headers.api_key.or(api_key).ok_or(ApiError::Unauthorized)?;
    let user_id = headers
        .user_id
        .or(user_id)
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty() && u.len() <= 100)
        .ok_or_else(|| ApiError::Validation("user id required".to_string()))?;

    if hub.is_closed() {
        return Err(ApiError::Unavailable);
    }

    let (tenant, config) = {
        let conn = db.conn();
        tenants::authenticate(&conn, &key)?
    }
    .ok_or(ApiError::Unauthorized)?;

    let ctx = SessionContext {
        db: db.inner().clone(),
        hub: hub.inner().clone(),
        limiter: limiter.inner().clone(),
        typing: typing.inner().clone(),
        tenant,
        config,
        user_id,
        shutdown_rx: shutdown.subscribe(),
    };

    Ok(ws.channel(move |stream| Box::pin(run_session(stream, ctx))))
}
