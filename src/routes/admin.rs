use crate::db::Db;
use crate::error::ApiError;
use crate::messages;
use crate::models::{CreateTenant, DeadLettersResponse, Tenant};
use crate::notifications;
use crate::tenants;
use rocket::http::Status;
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::{State, get, post};

use super::MasterKey;

/// POST /admin/tenants — master-key bootstrap. The response is the only
/// place the API key ever appears in clear.
#[post("/admin/tenants", format = "json", data = "<body>")]
pub fn create_tenant(
    db: &State<Db>,
    _master: MasterKey,
    body: Json<CreateTenant>,
) -> Result<status::Custom<Json<Tenant>>, ApiError> {
    let name = body.name.trim();
    if name.is_empty() || name.len() > 200 {
        return Err(ApiError::Validation(
            "name must be 1-200 characters".to_string(),
        ));
    }

    let tenant = {
        let conn = db.conn();
        tenants::create_tenant(&conn, name)?
    };

    Ok(status::Custom(Status::Created, Json(tenant)))
}

/// GET /admin/dead-letters?tenant_id=&limit= — retry-exhausted undelivered
/// rows and dead notifications for one tenant. Master-key surface like the
/// rest of /admin; the tenant scope comes from the tenant_id parameter,
/// which must name an existing tenant.
#[get("/admin/dead-letters?<tenant_id>&<limit>")]
pub fn dead_letters(
    db: &State<Db>,
    app_config: &State<crate::config::AppConfig>,
    _master: MasterKey,
    tenant_id: Option<&str>,
    limit: Option<i64>,
) -> Result<Json<DeadLettersResponse>, ApiError> {
    let tenant_id = tenant_id
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Validation("tenant_id is required".to_string()))?;
    let limit = limit.unwrap_or(50).clamp(1, 500);

    let conn = db.conn();
    let tenant_config = tenants::tenant_config(&conn, tenant_id)?;

    let failed_messages = messages::get_failed_undelivered(
        &conn,
        tenant_id,
        crate::delivery::effective_retry_limit(&tenant_config, app_config),
        limit,
    )?;
    let failed_notifications = notifications::dead_notifications(&conn, tenant_id, limit)?;

    Ok(Json(DeadLettersResponse {
        failed_messages,
        failed_notifications,
    }))
}
