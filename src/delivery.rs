use crate::config::AppConfig;
use crate::db;
use crate::hub::Hub;
use crate::messages;
use crate::models::{NotificationStatus, NotificationTargets, TenantConfig, UndeliveredMessage};
use crate::notifications;
use crate::rooms;
use crate::tenants;
use crate::ws;
use rusqlite::{Connection, params};
use tokio::sync::watch;
use tokio::time::Duration;

/// Dead-lettered rows and dead notifications are kept visible this long
/// before garbage collection.
const GC_RETENTION_DAYS: i64 = 30;

/// Per-tenant retry limit, capped by the process-wide `RETRY_MAX_ATTEMPTS`
/// ceiling. Used by the worker and by the dead-letter listing so both agree
/// on when a row counts as exhausted.
pub fn effective_retry_limit(tenant_config: &TenantConfig, config: &AppConfig) -> i64 {
    tenant_config.retry_limit.min(config.retry_max_attempts)
}

/// Outcome of one worker tick, for logs and tests.
#[derive(Debug, Clone, Default)]
pub struct DeliveryTickResult {
    pub tenants_checked: usize,
    pub messages_delivered: i64,
    pub messages_retried: i64,
    pub notifications_delivered: i64,
    pub notifications_retried: i64,
    pub notifications_dead: i64,
    pub gc_messages: i64,
    pub gc_notifications: i64,
}

/// Spawns the periodic delivery worker on its own database connection.
/// A tick failure is logged and the next tick runs anyway; the worker only
/// exits on shutdown.
pub fn spawn_delivery_worker(
    hub: Hub,
    db_path: String,
    config: AppConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let conn = match db::open_worker_connection(&db_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "delivery worker failed to open database");
                return;
            }
        };

        let mut ticker =
            tokio::time::interval(Duration::from_secs(config.worker_interval_secs.max(1)));
        ticker.tick().await; // consume the immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let result = run_delivery_tick(&conn, &hub, &config);
                    if result.messages_delivered + result.messages_retried
                        + result.notifications_delivered + result.notifications_dead > 0
                    {
                        tracing::info!(
                            delivered = result.messages_delivered,
                            retried = result.messages_retried,
                            notifications = result.notifications_delivered,
                            dead = result.notifications_dead,
                            "delivery tick"
                        );
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        tracing::info!("delivery worker stopped");
    });
}

/// One full sweep: for every tenant, drain the undelivered queue against the
/// hub's online state, drive pending notifications through their status
/// machine, then garbage-collect aged dead letters. Row-level failures are
/// logged and skipped; the tick itself never fails.
pub fn run_delivery_tick(conn: &Connection, hub: &Hub, config: &AppConfig) -> DeliveryTickResult {
    let mut result = DeliveryTickResult::default();

    let tenant_list = match tenants::list_tenants(conn) {
        Ok(list) => list,
        Err(e) => {
            tracing::warn!(error = %e, "tenant enumeration failed, skipping tick");
            return result;
        }
    };
    result.tenants_checked = tenant_list.len();

    let retry_cutoff = (chrono::Utc::now()
        - chrono::Duration::seconds(config.retry_interval_secs as i64))
    .to_rfc3339();

    for (tenant_id, tenant_config) in &tenant_list {
        drain_undelivered(conn, hub, tenant_id, tenant_config, &retry_cutoff, config, &mut result);
        dispatch_notifications(conn, hub, tenant_id, tenant_config, config, &mut result);
        collect_garbage(
            conn,
            tenant_id,
            effective_retry_limit(tenant_config, config),
            &mut result,
        );
    }

    result
}

fn drain_undelivered(
    conn: &Connection,
    hub: &Hub,
    tenant_id: &str,
    tenant_config: &TenantConfig,
    retry_cutoff: &str,
    config: &AppConfig,
    result: &mut DeliveryTickResult,
) {
    let rows = match messages::pending_undelivered(
        conn,
        tenant_id,
        effective_retry_limit(tenant_config, config),
        retry_cutoff,
        config.worker_batch,
    ) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(tenant_id, error = %e, "undelivered fetch failed");
            return;
        }
    };

    for row in rows {
        match attempt_delivery(conn, hub, &row) {
            Ok(true) => result.messages_delivered += 1,
            Ok(false) => {
                result.messages_retried += 1;
                if let Err(e) = messages::bump_attempt(conn, row.id) {
                    tracing::warn!(tenant_id, row = row.id, error = %e, "attempt bump failed");
                }
            }
            Err(e) => {
                tracing::warn!(tenant_id, row = row.id, error = %e, "delivery attempt failed");
            }
        }
    }
}

/// True when the row was delivered (or is obsolete) and has been removed.
fn attempt_delivery(
    conn: &Connection,
    hub: &Hub,
    row: &UndeliveredMessage,
) -> Result<bool, crate::error::ApiError> {
    if !hub.is_online(&row.tenant_id, &row.user_id) {
        return Ok(false);
    }

    let message = match messages::get_message(conn, &row.tenant_id, &row.message_id)? {
        Some(message) => message,
        None => {
            // Message row gone (room deleted); nothing left to deliver.
            messages::mark_delivered(conn, row.id)?;
            return Ok(true);
        }
    };

    let accepted = hub.send_to_user(&row.tenant_id, &row.user_id, &ws::message_frame(&message));
    if accepted > 0 {
        messages::mark_delivered(conn, row.id)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

fn dispatch_notifications(
    conn: &Connection,
    hub: &Hub,
    tenant_id: &str,
    tenant_config: &TenantConfig,
    config: &AppConfig,
    result: &mut DeliveryTickResult,
) {
    let rows = match notifications::pending_notifications(conn, tenant_id, config.worker_batch) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(tenant_id, error = %e, "notification fetch failed");
            return;
        }
    };

    // Non-durable tenants get a single attempt before the terminal state.
    let retry_limit = if tenant_config.durable_notifications {
        effective_retry_limit(tenant_config, config)
    } else {
        1
    };

    for (notification, targets) in rows {
        if let Err(e) = notifications::mark_processing(conn, &notification.id) {
            tracing::warn!(tenant_id, notification = %notification.id, error = %e, "mark processing failed");
            continue;
        }

        let recipients = resolve_targets(conn, hub, tenant_id, &targets);
        let frame = ws::notification_frame(&notification);

        // Delivered means every currently-online recipient took one
        // successful write; offline recipients do not block completion.
        let mut all_online_received = true;
        for user_id in &recipients {
            if !hub.is_online(tenant_id, user_id) {
                continue;
            }
            if hub.send_to_user(tenant_id, user_id, &frame) == 0 {
                all_online_received = false;
            }
        }

        if all_online_received {
            if let Err(e) = notifications::mark_delivered(conn, &notification.id) {
                tracing::warn!(tenant_id, notification = %notification.id, error = %e, "mark delivered failed");
            } else {
                result.notifications_delivered += 1;
            }
        } else {
            match notifications::mark_failed(conn, &notification.id, retry_limit) {
                Ok(NotificationStatus::Dead) => result.notifications_dead += 1,
                Ok(_) => result.notifications_retried += 1,
                Err(e) => {
                    tracing::warn!(tenant_id, notification = %notification.id, error = %e, "mark failed failed");
                }
            }
        }
    }
}

fn resolve_targets(
    conn: &Connection,
    hub: &Hub,
    tenant_id: &str,
    targets: &NotificationTargets,
) -> Vec<String> {
    if let Some(user_ids) = &targets.user_ids {
        return user_ids.clone();
    }
    if let Some(room_id) = &targets.room_id {
        return rooms::member_ids(conn, tenant_id, room_id).unwrap_or_default();
    }
    // Topic broadcast: every currently-online user of the tenant
    hub.online_users(tenant_id)
}

fn collect_garbage(
    conn: &Connection,
    tenant_id: &str,
    retry_limit: i64,
    result: &mut DeliveryTickResult,
) {
    let cutoff = (chrono::Utc::now() - chrono::Duration::days(GC_RETENTION_DAYS)).to_rfc3339();

    match conn.execute(
        "DELETE FROM undelivered_messages
         WHERE tenant_id = ?1 AND attempts >= ?2 AND created_at < ?3",
        params![tenant_id, retry_limit, &cutoff],
    ) {
        Ok(n) => result.gc_messages += n as i64,
        Err(e) => tracing::warn!(tenant_id, error = %e, "undelivered gc failed"),
    }

    match conn.execute(
        "DELETE FROM notifications
         WHERE tenant_id = ?1 AND status = ?2 AND created_at < ?3",
        params![tenant_id, NotificationStatus::Dead, &cutoff],
    ) {
        Ok(n) => result.gc_notifications += n as i64,
        Err(e) => tracing::warn!(tenant_id, error = %e, "notification gc failed"),
    }
}
