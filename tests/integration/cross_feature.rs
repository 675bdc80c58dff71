//! The offline-queue / worker / resync / ack storyline end to end.

use crate::common::{create_group_room, create_tenant, send_message, test_client, test_config};
use chatwire::delivery::run_delivery_tick;
use chatwire::hub::Hub;
use chatwire::ws::sync_backlog;
use rocket::http::{ContentType, Header, Status};

#[test]
fn outage_recovery_round_trip() {
    let client = test_client();
    let (tenant_id, key) = create_tenant(&client, "acme");
    let room_id = create_group_room(&client, &key, "u1", &["u1", "u2"]);

    // u2 is offline while u1 sends three messages
    for i in 1..=3 {
        assert_eq!(
            send_message(&client, &key, "u1", &room_id, &format!("m{i}")),
            i
        );
    }

    let conn = chatwire::db::open_worker_connection(&client.db_path).unwrap();
    let rows = chatwire::messages::get_undelivered(&conn, &tenant_id, "u2", 10).unwrap();
    assert_eq!(rows.len(), 3, "outage captured durably");

    // One offline tick accrues an attempt but loses nothing
    let (hub, _hub_rx) = Hub::new();
    let config = test_config(&client.db_path);
    run_delivery_tick(&conn, &hub, &config);
    let rows = chatwire::messages::get_undelivered(&conn, &tenant_id, "u2", 10).unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.attempts == 1));

    // u2 comes back; the worker pushes the backlog in order and clears it
    let (_u2_conn, mut u2_rx, _) = hub.register(&tenant_id, "u2");
    run_delivery_tick(&conn, &hub, &config);

    let mut seqs = Vec::new();
    while let Ok(frame) = u2_rx.try_recv() {
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        seqs.push(parsed["seq"].as_i64().unwrap());
    }
    assert_eq!(seqs, vec![1, 2, 3]);
    assert!(
        chatwire::messages::get_undelivered(&conn, &tenant_id, "u2", 10)
            .unwrap()
            .is_empty()
    );

    // u2 acks the tail; the delivery state converges and later messages
    // start from there
    let res = client
        .post("/acks")
        .header(ContentType::JSON)
        .header(Header::new("X-API-Key", key.clone()))
        .header(Header::new("X-User-Id", "u2"))
        .body(format!(r#"{{"room_id": "{room_id}", "seq": 3}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    // Everything delivered is also readable by seq over HTTP
    let res = client
        .get(format!("/rooms/{room_id}/messages?after_seq=0"))
        .header(Header::new("X-API-Key", key))
        .header(Header::new("X-User-Id", "u2"))
        .dispatch();
    let messages: Vec<serde_json::Value> = res.into_json().unwrap();
    let fetched: Vec<i64> = messages.iter().map(|m| m["seq"].as_i64().unwrap()).collect();
    assert_eq!(fetched, vec![1, 2, 3]);
}

#[rocket::async_test]
async fn resync_and_live_delivery_overlap_is_dedupable_by_seq() {
    use chatwire::models::{CreateRoom, TenantConfig};

    let path = format!(
        "/tmp/chatwire_cross_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    );
    let db = chatwire::db::Db::open(&path).unwrap();

    let (tenant_id, room_id) = {
        let mut conn = db.conn();
        let tenant = chatwire::tenants::create_tenant(&conn, "acme").unwrap();
        let (room, _) = chatwire::rooms::create_room(
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
        for i in 1..=2 {
            chatwire::messages::send_message(
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

    let (hub, _hub_rx) = Hub::new();
    let (conn, mut conn_rx, _) = hub.register(&tenant_id, "u2");

    // A live frame lands while the syncer replays the backlog. The session
    // may see seq 2 twice, in any interleaving, but each stream is ascending
    // and nothing is missing.
    let live = {
        let db_conn = db.conn();
        chatwire::messages::get_message(
            &db_conn,
            &tenant_id,
            &chatwire::messages::get_messages(&db_conn, &tenant_id, &room_id, 1, None).unwrap()[0].id,
        )
        .unwrap()
        .unwrap()
    };
    hub.send_to_user(&tenant_id, "u2", &chatwire::ws::message_frame(&live));

    sync_backlog(db.clone(), conn, tenant_id, "u2".to_string()).await;

    let mut seen = std::collections::BTreeSet::new();
    while let Ok(frame) = conn_rx.try_recv() {
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        seen.insert(parsed["seq"].as_i64().unwrap());
    }
    assert_eq!(
        seen.into_iter().collect::<Vec<_>>(),
        vec![1, 2],
        "after seq-dedup the client holds the full contiguous history"
    );

    let _ = std::fs::remove_file(&path);
    let _ = std::fs::remove_file(format!("{path}-wal"));
    let _ = std::fs::remove_file(format!("{path}-shm"));
}
