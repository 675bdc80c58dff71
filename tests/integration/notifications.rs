use crate::common::{MASTER_KEY, create_tenant, set_tenant_config, test_client, test_config};
use chatwire::delivery::run_delivery_tick;
use chatwire::hub::Hub;
use chatwire::models::NotificationStatus;
use rocket::http::{ContentType, Header, Status};

#[test]
fn notify_accepts_and_persists_pending() {
    let client = test_client();
    let (_id, key) = create_tenant(&client, "acme");

    let res = client
        .post("/notify")
        .header(ContentType::JSON)
        .header(Header::new("X-API-Key", key))
        .body(r#"{"topic": "deploys", "payload": {"version": "1.2.3"}, "targets": {"user_ids": ["u1"]}}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Accepted);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "pending");
    assert_eq!(body["attempts"], 0);
    assert_eq!(body["topic"], "deploys");
}

#[test]
fn blank_topic_is_rejected() {
    let client = test_client();
    let (_id, key) = create_tenant(&client, "acme");

    let res = client
        .post("/notify")
        .header(ContentType::JSON)
        .header(Header::new("X-API-Key", key))
        .body(r#"{"topic": "  "}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn online_target_receives_frame_and_row_completes() {
    let client = test_client();
    let (tenant_id, key) = create_tenant(&client, "acme");

    client
        .post("/notify")
        .header(ContentType::JSON)
        .header(Header::new("X-API-Key", key))
        .body(r#"{"topic": "alerts", "payload": {"sev": 1}, "targets": {"user_ids": ["u1", "offline-user"]}}"#)
        .dispatch();

    let conn = chatwire::db::open_worker_connection(&client.db_path).unwrap();
    let (hub, _rx) = Hub::new();
    let (_u1_conn, mut u1_rx, _) = hub.register(&tenant_id, "u1");
    let config = test_config(&client.db_path);

    let result = run_delivery_tick(&conn, &hub, &config);
    assert_eq!(result.notifications_delivered, 1);

    let frame = u1_rx.try_recv().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(parsed["type"], "notification");
    assert_eq!(parsed["topic"], "alerts");
    assert_eq!(parsed["payload"]["sev"], 1);

    let status: String = conn
        .query_row(
            "SELECT status FROM notifications WHERE tenant_id = ?1",
            rusqlite::params![tenant_id],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(status, "delivered", "offline recipients do not block");
}

#[test]
fn failure_path_retries_then_dies() {
    let client = test_client();
    let (tenant_id, key) = create_tenant(&client, "acme");
    set_tenant_config(&client.db_path, &tenant_id, r#"{"retry_limit": 2}"#);

    let res = client
        .post("/notify")
        .header(ContentType::JSON)
        .header(Header::new("X-API-Key", key))
        .body(r#"{"topic": "flaky", "targets": {"user_ids": ["u1"]}}"#)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let notification_id = body["id"].as_str().unwrap().to_string();

    let conn = chatwire::db::open_worker_connection(&client.db_path).unwrap();

    // Drive the status machine directly: two failures with retry_limit=2
    let status = chatwire::notifications::mark_failed(&conn, &notification_id, 2).unwrap();
    assert_eq!(
        status,
        NotificationStatus::Pending,
        "first failure goes back to pending"
    );
    let status = chatwire::notifications::mark_failed(&conn, &notification_id, 2).unwrap();
    assert_eq!(
        status,
        NotificationStatus::Dead,
        "retry exhaustion is terminal"
    );

    // Dead notifications appear in the dead-letter listing
    let res = client
        .get(format!("/admin/dead-letters?tenant_id={tenant_id}"))
        .header(Header::new("X-Master-Key", MASTER_KEY))
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let dead = body["failed_notifications"].as_array().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0]["id"], notification_id.as_str());
    assert_eq!(dead[0]["status"], "dead");

    // A dead row is never re-picked
    let (hub, _rx) = Hub::new();
    let config = test_config(&client.db_path);
    let result = run_delivery_tick(&conn, &hub, &config);
    assert_eq!(result.notifications_delivered + result.notifications_retried, 0);
}

#[test]
fn room_targets_resolve_to_current_members() {
    let client = test_client();
    let (tenant_id, key) = create_tenant(&client, "acme");
    let room_id = crate::common::create_group_room(&client, &key, "u1", &["u1", "u2"]);

    client
        .post("/notify")
        .header(ContentType::JSON)
        .header(Header::new("X-API-Key", key))
        .body(format!(
            r#"{{"topic": "room-news", "targets": {{"room_id": "{room_id}"}}}}"#
        ))
        .dispatch();

    let conn = chatwire::db::open_worker_connection(&client.db_path).unwrap();
    let (hub, _rx) = Hub::new();
    let (_u2_conn, mut u2_rx, _) = hub.register(&tenant_id, "u2");
    let (_outsider_conn, mut outsider_rx, _) = hub.register(&tenant_id, "outsider");
    let config = test_config(&client.db_path);

    run_delivery_tick(&conn, &hub, &config);

    let frame = u2_rx.try_recv().expect("member receives the frame");
    let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(parsed["type"], "notification");
    assert!(outsider_rx.try_recv().is_err(), "non-members get nothing");
}

#[test]
fn aged_dead_notifications_are_garbage_collected() {
    let client = test_client();
    let (tenant_id, key) = create_tenant(&client, "acme");

    let res = client
        .post("/notify")
        .header(ContentType::JSON)
        .header(Header::new("X-API-Key", key))
        .body(r#"{"topic": "old-news", "targets": {"user_ids": ["u1"]}}"#)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let notification_id = body["id"].as_str().unwrap().to_string();

    let conn = chatwire::db::open_worker_connection(&client.db_path).unwrap();
    chatwire::notifications::mark_failed(&conn, &notification_id, 1).unwrap();

    let old = (chrono::Utc::now() - chrono::Duration::days(31)).to_rfc3339();
    conn.execute(
        "UPDATE notifications SET created_at = ?1",
        rusqlite::params![old],
    )
    .unwrap();

    let (hub, _rx) = Hub::new();
    let config = test_config(&client.db_path);
    let result = run_delivery_tick(&conn, &hub, &config);
    assert_eq!(result.gc_notifications, 1);

    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM notifications WHERE tenant_id = ?1",
            rusqlite::params![tenant_id],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(count, 0);
}
