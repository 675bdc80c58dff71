use crate::common::{create_group_room, create_tenant, test_client};
use chatwire::hub::Hub;
use rocket::http::{Header, Status};
use std::time::Duration;

#[test]
fn presence_endpoint_is_empty_without_sessions() {
    let client = test_client();
    let (_id, key) = create_tenant(&client, "acme");
    let room_id = create_group_room(&client, &key, "u1", &["u1", "u2"]);

    let res = client
        .get(format!("/rooms/{room_id}/presence"))
        .header(Header::new("X-API-Key", key))
        .header(Header::new("X-User-Id", "u1"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let online: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(online.is_empty());
}

#[test]
fn presence_endpoint_404s_on_unknown_room() {
    let client = test_client();
    let (_id, key) = create_tenant(&client, "acme");

    let res = client
        .get("/rooms/ghost/presence")
        .header(Header::new("X-API-Key", key))
        .header(Header::new("X-User-Id", "u1"))
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[rocket::async_test]
async fn room_presence_reflects_member_connections_only() {
    let (hub, _rx) = Hub::new();
    let (_a1, _rx1, _) = hub.register("t1", "alice");
    let (_a2, _rx2, _) = hub.register("t1", "alice");
    let (_b, _rx3, _) = hub.register("t1", "bob");
    let (_other_tenant, _rx4, _) = hub.register("t2", "alice");

    let members = vec!["alice".to_string(), "carol".to_string()];
    let online = hub.room_presence("t1", &members);

    assert_eq!(online.len(), 1, "bob is not a member, carol is offline");
    assert_eq!(online[0].user_id, "alice");
    assert_eq!(online[0].connections, 2);
    assert!(!online[0].last_seen.is_empty());
}

#[rocket::async_test]
async fn offline_users_drop_out_after_grace() {
    let (hub, _rx) = Hub::with_grace(Duration::from_millis(30));
    let (conn, _conn_rx, _) = hub.register("t1", "alice");

    let members = vec!["alice".to_string()];
    assert_eq!(hub.room_presence("t1", &members).len(), 1);

    hub.unregister(&conn);
    assert!(hub.room_presence("t1", &members).is_empty(), "no live connections");

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(hub.online_users("t1").is_empty());
}
