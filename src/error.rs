use rocket::Request;
use rocket::http::{Header, Status};
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;

/// Typed error categories for every service operation. The HTTP mapping
/// happens exactly once, in the `Responder` impl below; websocket sessions
/// render the same categories as `error` frames instead.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("rate limited")]
    RateLimited { retry_after_secs: u64, limit: u32 },
    #[error("storage unavailable")]
    Unavailable,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::Unauthorized => Status::Unauthorized,
            ApiError::Forbidden => Status::Forbidden,
            ApiError::NotFound(_) => Status::NotFound,
            ApiError::Validation(_) => Status::BadRequest,
            ApiError::Conflict(_) => Status::Conflict,
            ApiError::RateLimited { .. } => Status::TooManyRequests,
            ApiError::Unavailable => Status::ServiceUnavailable,
            ApiError::Internal(_) => Status::InternalServerError,
        }
    }

    /// Category tag used in websocket `error` frames and log fields.
    pub fn category(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Validation(_) => "validation",
            ApiError::Conflict(_) => "conflict",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::Unavailable => "unavailable",
            ApiError::Internal(_) => "internal",
        }
    }

    /// Client-facing message. Internal details never leave the process.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();

        let body = match &self {
            ApiError::Internal(detail) => {
                let correlation_id = uuid::Uuid::new_v4().to_string();
                tracing::error!(%correlation_id, %detail, "internal error");
                Json(serde_json::json!({
                    "error": "internal error",
                    "correlation_id": correlation_id
                }))
            }
            ApiError::RateLimited {
                retry_after_secs,
                limit,
            } => Json(serde_json::json!({
                "error": "rate limited",
                "retry_after_secs": retry_after_secs,
                "limit": limit,
            })),
            other => Json(serde_json::json!({ "error": other.public_message() })),
        };

        let mut response = Response::build_from(body.respond_to(req)?)
            .status(status)
            .finalize();

        if let ApiError::RateLimited {
            retry_after_secs,
            limit,
        } = &self
        {
            response.set_header(Header::new("Retry-After", retry_after_secs.to_string()));
            response.set_header(Header::new("X-RateLimit-Limit", limit.to_string()));
            response.set_header(Header::new("X-RateLimit-Remaining", "0"));
        }

        Ok(response)
    }
}
