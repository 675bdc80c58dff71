use chatwire::db::Db;
use chatwire::hub::Hub;
use chatwire::models::{CreateRoom, TenantConfig};
use chatwire::ws::sync_backlog;
use chatwire::{messages, rooms, tenants};

/// Seed a tenant, a two-member room, and `count` messages from u1, without
/// going through HTTP (these tests run inside a runtime, where the blocking
/// client is off limits).
fn seed(db_path: &str, count: i64) -> (Db, String, String) {
    let db = Db::open(db_path).unwrap();
    let (tenant_id, room_id) = {
        let mut conn = db.conn();
        let tenant = tenants::create_tenant(&conn, "acme").unwrap();
        let (room, _) = rooms::create_room(
            &mut conn,
            &tenant.id,
            "u1",
            &CreateRoom {
                room_type: "group".to_string(),
                members: vec!["u1".to_string(), "u2".to_string()],
                name: None,
            },
        )
        .unwrap();
        for i in 1..=count {
            messages::send_message(
                &mut conn,
                &tenant.id,
                &TenantConfig::default(),
                &room.id,
                "u1",
                &format!("m{i}"),
                None,
            )
            .unwrap();
        }
        (tenant.id, room.id)
    };
    (db, tenant_id, room_id)
}

fn temp_path() -> String {
    format!(
        "/tmp/chatwire_sync_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    )
}

fn cleanup(path: &str) {
    let _ = std::fs::remove_file(path);
    let _ = std::fs::remove_file(format!("{path}-wal"));
    let _ = std::fs::remove_file(format!("{path}-shm"));
}

async fn collect_seqs(rx: &mut tokio::sync::mpsc::Receiver<String>) -> Vec<i64> {
    let mut seqs = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["type"], "message");
        seqs.push(parsed["seq"].as_i64().unwrap());
    }
    seqs
}

#[rocket::async_test]
async fn resync_streams_everything_after_last_ack() {
    let path = temp_path();
    let (db, tenant_id, room_id) = seed(&path, 3);
    {
        let conn = db.conn();
        messages::update_last_ack(&conn, &tenant_id, "u2", &room_id, 1).unwrap();
    }

    let (hub, _rx) = Hub::new();
    let (conn, mut conn_rx, _) = hub.register(&tenant_id, "u2");
    sync_backlog(db.clone(), conn, tenant_id, "u2".to_string()).await;

    assert_eq!(collect_seqs(&mut conn_rx).await, vec![2, 3]);
    cleanup(&path);
}

#[rocket::async_test]
async fn fresh_session_replays_full_history_in_order() {
    let path = temp_path();
    let (db, tenant_id, _room_id) = seed(&path, 3);

    let (hub, _rx) = Hub::new();
    let (conn, mut conn_rx, _) = hub.register(&tenant_id, "u2");
    sync_backlog(db.clone(), conn, tenant_id, "u2".to_string()).await;

    assert_eq!(collect_seqs(&mut conn_rx).await, vec![1, 2, 3]);
    cleanup(&path);
}

#[rocket::async_test]
async fn resync_pages_through_large_backlogs() {
    let path = temp_path();
    let (db, tenant_id, _room_id) = seed(&path, 120);

    let (hub, _rx) = Hub::new();
    let (conn, mut conn_rx, _) = hub.register(&tenant_id, "u2");
    sync_backlog(db.clone(), conn, tenant_id, "u2".to_string()).await;

    let seqs = collect_seqs(&mut conn_rx).await;
    assert_eq!(seqs.len(), 120);
    let expected: Vec<i64> = (1..=120).collect();
    assert_eq!(seqs, expected, "ascending across page boundaries");
    cleanup(&path);
}

#[rocket::async_test]
async fn fully_acked_room_syncs_nothing() {
    let path = temp_path();
    let (db, tenant_id, room_id) = seed(&path, 3);
    {
        let conn = db.conn();
        messages::update_last_ack(&conn, &tenant_id, "u2", &room_id, 3).unwrap();
    }

    let (hub, _rx) = Hub::new();
    let (conn, mut conn_rx, _) = hub.register(&tenant_id, "u2");
    sync_backlog(db.clone(), conn, tenant_id, "u2".to_string()).await;

    assert!(collect_seqs(&mut conn_rx).await.is_empty());
    cleanup(&path);
}

#[rocket::async_test]
async fn sync_only_covers_rooms_the_user_is_in() {
    let path = temp_path();
    let (db, tenant_id, _room_id) = seed(&path, 2);
    {
        // A second room u2 is not a member of
        let mut conn = db.conn();
        let (other, _) = rooms::create_room(
            &mut conn,
            &tenant_id,
            "u1",
            &CreateRoom {
                room_type: "group".to_string(),
                members: vec!["u1".to_string(), "u9".to_string()],
                name: None,
            },
        )
        .unwrap();
        messages::send_message(
            &mut conn,
            &tenant_id,
            &TenantConfig::default(),
            &other.id,
            "u1",
            "private",
            None,
        )
        .unwrap();
    }

    let (hub, _rx) = Hub::new();
    let (conn, mut conn_rx, _) = hub.register(&tenant_id, "u2");
    sync_backlog(db.clone(), conn, tenant_id, "u2".to_string()).await;

    let seqs = collect_seqs(&mut conn_rx).await;
    assert_eq!(seqs, vec![1, 2], "only the shared room is replayed");
    cleanup(&path);
}
