use crate::common::{create_group_room, create_tenant, send_message, test_client};
use rocket::http::{ContentType, Header, Status};

#[test]
fn health_reports_ok_with_writable_db() {
    let client = test_client();
    let res = client.get("/health").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["db_writable"], true);
    assert!(body["uptime"].is_u64());
}

#[test]
fn unknown_route_gets_json_404() {
    let client = test_client();
    let res = client.get("/no/such/path").dispatch();
    assert_eq!(res.status(), Status::NotFound);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["error"], "not found");
}

#[test]
fn malformed_body_is_a_validation_error() {
    let client = test_client();
    let (_id, key) = create_tenant(&client, "acme");

    let res = client
        .post("/rooms")
        .header(ContentType::JSON)
        .header(Header::new("X-API-Key", key))
        .header(Header::new("X-User-Id", "u1"))
        .body(r#"{"type": "group", "members": not-json"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn stats_reflect_tenant_activity() {
    let client = test_client();
    let (_id, key) = create_tenant(&client, "acme");
    let room_id = create_group_room(&client, &key, "u1", &["u1", "u2"]);
    send_message(&client, &key, "u1", &room_id, "hello");
    send_message(&client, &key, "u1", &room_id, "world");

    let res = client
        .get("/stats")
        .header(Header::new("X-API-Key", key))
        .header(Header::new("X-User-Id", "u1"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["rooms"], 1);
    assert_eq!(body["messages"], 2);
    assert_eq!(body["undelivered_queue"], 2, "u2 has not acked");
    assert_eq!(body["online_users"], 0);
}

#[test]
fn stats_are_tenant_scoped() {
    let client = test_client();
    let (_a, key_a) = create_tenant(&client, "tenant-a");
    let (_b, key_b) = create_tenant(&client, "tenant-b");
    let room_id = create_group_room(&client, &key_a, "u1", &["u1", "u2"]);
    send_message(&client, &key_a, "u1", &room_id, "hello");

    let res = client
        .get("/stats")
        .header(Header::new("X-API-Key", key_b))
        .header(Header::new("X-User-Id", "u1"))
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["rooms"], 0);
    assert_eq!(body["messages"], 0);
}
