use chatwire::config::AppConfig;
use rocket::http::{ContentType, Header, Status};
use rocket::local::blocking::Client;

pub const MASTER_KEY: &str = "test-master-key";

/// Wrapper around Client that auto-deletes the temp DB on drop. Uses
/// Option<Client> so the SQLite connection is released before the files go.
pub struct TestClient {
    client: Option<Client>,
    pub db_path: String,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        drop(self.client.take());
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

pub fn test_config(db_path: &str) -> AppConfig {
    AppConfig {
        database_dsn: db_path.to_string(),
        master_api_key: MASTER_KEY.to_string(),
        // Worker tests drive ticks by hand; no per-row backoff in tests
        retry_interval_secs: 0,
        ..AppConfig::default()
    }
}

fn temp_db_path() -> String {
    format!(
        "/tmp/chatwire_test_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    )
}

pub fn test_client() -> TestClient {
    let db_path = temp_db_path();
    let rocket = chatwire::rocket_with_config(test_config(&db_path));
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient {
        client: Some(client),
        db_path,
    }
}

/// Helper: bootstrap a tenant through the admin surface. Returns
/// (tenant_id, api_key).
pub fn create_tenant(client: &Client, name: &str) -> (String, String) {
    let res = client
        .post("/admin/tenants")
        .header(ContentType::JSON)
        .header(Header::new("X-Master-Key", MASTER_KEY))
        .body(format!(r#"{{"name": "{name}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Created);
    let body: serde_json::Value = res.into_json().unwrap();
    (
        body["id"].as_str().unwrap().to_string(),
        body["api_key"].as_str().unwrap().to_string(),
    )
}

/// Helper: create a group room and return its id.
pub fn create_group_room(client: &Client, api_key: &str, creator: &str, members: &[&str]) -> String {
    let members_json = serde_json::to_string(members).unwrap();
    let res = client
        .post("/rooms")
        .header(ContentType::JSON)
        .header(Header::new("X-API-Key", api_key.to_string()))
        .header(Header::new("X-User-Id", creator.to_string()))
        .body(format!(
            r#"{{"type": "group", "members": {members_json}, "name": "g"}}"#
        ))
        .dispatch();
    assert_eq!(res.status(), Status::Created);
    let body: serde_json::Value = res.into_json().unwrap();
    body["id"].as_str().unwrap().to_string()
}

/// Helper: send a message and return the assigned seq.
pub fn send_message(
    client: &Client,
    api_key: &str,
    user: &str,
    room_id: &str,
    content: &str,
) -> i64 {
    let res = client
        .post(format!("/rooms/{room_id}/messages"))
        .header(ContentType::JSON)
        .header(Header::new("X-API-Key", api_key.to_string()))
        .header(Header::new("X-User-Id", user.to_string()))
        .body(format!(r#"{{"content": "{content}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Created);
    let body: serde_json::Value = res.into_json().unwrap();
    body["seq"].as_i64().unwrap()
}

/// Overwrite a tenant's config blob directly in storage; the hot path
/// re-reads it on every authenticated request.
pub fn set_tenant_config(db_path: &str, tenant_id: &str, config_json: &str) {
    let conn = rusqlite::Connection::open(db_path).expect("open test db");
    conn.execute(
        "UPDATE tenants SET config = ?1 WHERE id = ?2",
        rusqlite::params![config_json, tenant_id],
    )
    .expect("update tenant config");
}
