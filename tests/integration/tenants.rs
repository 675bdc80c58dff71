use crate::common::{MASTER_KEY, create_tenant, test_client};
use rocket::http::{ContentType, Header, Status};

#[test]
fn create_tenant_returns_key_once() {
    let client = test_client();
    let (tenant_id, api_key) = create_tenant(&client, "acme");

    assert!(tenant_id.starts_with("tn_"));
    assert!(api_key.starts_with("key_"));
    assert_eq!(api_key.len(), "key_".len() + 64);
}

#[test]
fn create_tenant_requires_master_key() {
    let client = test_client();

    let res = client
        .post("/admin/tenants")
        .header(ContentType::JSON)
        .body(r#"{"name": "acme"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);

    let res = client
        .post("/admin/tenants")
        .header(ContentType::JSON)
        .header(Header::new("X-Master-Key", "wrong"))
        .body(r#"{"name": "acme"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn create_tenant_rejects_blank_name() {
    let client = test_client();
    let res = client
        .post("/admin/tenants")
        .header(ContentType::JSON)
        .header(Header::new("X-Master-Key", MASTER_KEY))
        .body(r#"{"name": "   "}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn missing_api_key_is_unauthorized() {
    let client = test_client();
    let res = client
        .get("/rooms")
        .header(Header::new("X-User-Id", "u1"))
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn bad_keys_fail_identically() {
    let client = test_client();
    create_tenant(&client, "acme");

    // A malformed key and a well-formed unknown key must be
    // indistinguishable from the outside.
    let res_malformed = client
        .get("/rooms")
        .header(Header::new("X-API-Key", "???"))
        .header(Header::new("X-User-Id", "u1"))
        .dispatch();
    let status_malformed = res_malformed.status();
    let body_malformed = res_malformed.into_string();

    let unknown = format!("key_{}", "0".repeat(64));
    let res_unknown = client
        .get("/rooms")
        .header(Header::new("X-API-Key", unknown))
        .header(Header::new("X-User-Id", "u1"))
        .dispatch();

    assert_eq!(status_malformed, Status::Unauthorized);
    assert_eq!(res_unknown.status(), Status::Unauthorized);
    assert_eq!(body_malformed, res_unknown.into_string());
}

#[test]
fn tenant_config_reads_apply_defaults() {
    let client = test_client();
    let (tenant_id, _key) = create_tenant(&client, "acme");

    let db = chatwire::db::Db::open(&client.db_path).unwrap();
    {
        let conn = db.conn();
        let config = chatwire::tenants::tenant_config(&conn, &tenant_id).unwrap();
        assert_eq!(config.max_message_size, 4096);
        assert_eq!(config.retry_limit, 5);
        assert_eq!(config.rate_limit_rps, 100);
        assert!(config.durable_notifications);
    }

    crate::common::set_tenant_config(&client.db_path, &tenant_id, r#"{"retry_limit": 3}"#);
    let conn = db.conn();
    let config = chatwire::tenants::tenant_config(&conn, &tenant_id).unwrap();
    assert_eq!(config.retry_limit, 3);
    assert_eq!(config.max_message_size, 4096, "unset fields keep defaults");

    assert!(chatwire::tenants::tenant_config(&conn, "tn_missing").is_err());
}

#[test]
fn tenants_are_isolated() {
    let client = test_client();
    let (_id_a, key_a) = create_tenant(&client, "tenant-a");
    let (_id_b, key_b) = create_tenant(&client, "tenant-b");

    let room_id = crate::common::create_group_room(&client, &key_a, "u1", &["u1", "u2"]);

    // Tenant B cannot see tenant A's room
    let res = client
        .get(format!("/rooms/{room_id}"))
        .header(Header::new("X-API-Key", key_b))
        .header(Header::new("X-User-Id", "u1"))
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);

    let res = client
        .get(format!("/rooms/{room_id}"))
        .header(Header::new("X-API-Key", key_a))
        .header(Header::new("X-User-Id", "u1"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}
