use crate::db::{generate_api_key, generate_tenant_id};
use crate::error::ApiError;
use crate::models::{Tenant, TenantConfig};
use rusqlite::{Connection, OptionalExtension, params};

/// Resolve an API key to its tenant and parsed config. A single indexed
/// lookup; the caller cannot distinguish unknown keys from malformed ones.
pub fn authenticate(
    conn: &Connection,
    api_key: &str,
) -> Result<Option<(Tenant, TenantConfig)>, ApiError> {
    let row = conn
        .query_row(
            "SELECT id, name, config, created_at FROM tenants WHERE api_key = ?1",
            params![api_key],
            |row| {
                Ok((
                    Tenant {
                        id: row.get(0)?,
                        api_key: None,
                        name: row.get(1)?,
                        created_at: row.get(3)?,
                    },
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    Ok(row.map(|(tenant, blob)| {
        let config = parse_config(&blob);
        (tenant, config)
    }))
}

/// Create a tenant with a fresh opaque id and 256-bit API key. A key
/// collision is retried once with a new key; a second collision surfaces
/// as `Conflict`.
pub fn create_tenant(conn: &Connection, name: &str) -> Result<Tenant, ApiError> {
    let now = chrono::Utc::now().to_rfc3339();

    for attempt in 0..2 {
        let id = generate_tenant_id();
        let api_key = generate_api_key();
        match conn.execute(
            "INSERT INTO tenants (id, api_key, name, config, created_at) VALUES (?1, ?2, ?3, '{}', ?4)",
            params![&id, &api_key, name, &now],
        ) {
            Ok(_) => {
                return Ok(Tenant {
                    id,
                    api_key: Some(api_key),
                    name: name.to_string(),
                    created_at: now,
                });
            }
            Err(e) if e.to_string().contains("UNIQUE") && attempt == 0 => {
                tracing::warn!(tenant = name, "api key collision, retrying");
            }
            Err(e) if e.to_string().contains("UNIQUE") => {
                return Err(ApiError::Conflict("duplicate tenant key".to_string()));
            }
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("tenant insert loop returns within two attempts")
}

/// Read a tenant's config blob, applying defaults for missing fields.
pub fn tenant_config(conn: &Connection, tenant_id: &str) -> Result<TenantConfig, ApiError> {
    let blob: Option<String> = conn
        .query_row(
            "SELECT config FROM tenants WHERE id = ?1",
            params![tenant_id],
            |row| row.get(0),
        )
        .optional()?;

    match blob {
        Some(blob) => Ok(parse_config(&blob)),
        None => Err(ApiError::NotFound("tenant")),
    }
}

/// Enumerate tenant ids with parsed configs, for the worker sweep.
pub fn list_tenants(conn: &Connection) -> Result<Vec<(String, TenantConfig)>, ApiError> {
    let mut stmt = conn.prepare("SELECT id, config FROM tenants ORDER BY created_at")?;
    let tenants = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .filter_map(|r| r.ok())
        .map(|(id, blob)| (id, parse_config(&blob)))
        .collect();
    Ok(tenants)
}

fn parse_config(blob: &str) -> TenantConfig {
    serde_json::from_str(blob).unwrap_or_default()
}
