pub mod checkpoint;
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod hub;
pub mod messages;
pub mod models;
pub mod notifications;
pub mod rate_limit;
pub mod rooms;
pub mod routes;
pub mod tenants;
pub mod ws;

use config::AppConfig;
use db::Db;
use hub::Hub;
use rate_limit::RateLimiter;
use rocket::fairing::AdHoc;
use rocket_cors::CorsOptions;
use routes::StartTime;
use tokio::sync::watch;
use ws::TypingTracker;

/// Process-wide cancellation. Workers and websocket sessions subscribe; the
/// shutdown fairing triggers it once Rocket stops accepting connections.
pub struct ShutdownSignal(watch::Sender<bool>);

impl ShutdownSignal {
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.0.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.0.send(true);
    }
}

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    rocket_with_config(AppConfig::from_env())
}

/// Builder for tests and embedding: panics on init failure. The binary goes
/// through [`try_rocket_with_config`] to turn that into exit code 1.
pub fn rocket_with_config(config: AppConfig) -> rocket::Rocket<rocket::Build> {
    try_rocket_with_config(config).expect("failed to initialise storage")
}

pub fn try_rocket_with_config(
    config: AppConfig,
) -> Result<rocket::Rocket<rocket::Build>, rusqlite::Error> {
    // Ensure the data directory exists
    if let Some(parent) = std::path::Path::new(&config.database_dsn).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).ok();
    }

    let db = Db::open(&config.database_dsn)?;
    let (hub, broadcast_rx) = Hub::new();
    let limiter = RateLimiter::new();
    let typing = TypingTracker::default();
    let (shutdown_tx, _) = watch::channel(false);
    let shutdown = ShutdownSignal(shutdown_tx);

    let cors = CorsOptions::default()
        .to_cors()
        .expect("Failed to create CORS");

    let (address, port) = config.bind_parts();
    let figment = rocket::Config::figment()
        .merge(("address", address))
        .merge(("port", port))
        .merge(("shutdown.grace", config.shutdown_drain_timeout_secs))
        .merge(("limits.json", 1024 * 1024));

    // Clones moved into the worker fairings below
    let broadcast_hub = hub.clone();
    let broadcast_db_path = config.database_dsn.clone();
    let delivery_hub = hub.clone();
    let delivery_db_path = config.database_dsn.clone();
    let delivery_config = config.clone();
    let delivery_shutdown = shutdown.subscribe();
    let checkpoint_db_path = config.database_dsn.clone();
    let checkpoint_interval = config.checkpoint_interval_secs;
    let checkpoint_shutdown = shutdown.subscribe();
    let reconnect_after_ms = config.shutdown_drain_timeout_secs * 1000;

    let build = rocket::custom(figment)
        .manage(db)
        .manage(hub)
        .manage(limiter)
        .manage(typing)
        .manage(config)
        .manage(shutdown)
        .manage(StartTime(std::time::Instant::now()))
        .attach(cors)
        .register(
            "/",
            rocket::catchers![
                routes::bad_request,
                routes::unauthorized,
                routes::not_found,
                routes::unprocessable,
                routes::too_many_requests,
                routes::internal_error,
            ],
        )
        .mount(
            "/",
            rocket::routes![
                routes::health,
                routes::stats,
                routes::create_room,
                routes::list_rooms,
                routes::get_room,
                routes::get_room_members,
                routes::add_member,
                routes::remove_member,
                routes::room_presence,
                routes::send_message,
                routes::get_messages,
                routes::post_ack,
                routes::create_notification,
                routes::create_tenant,
                routes::dead_letters,
                routes::websocket,
            ],
        )
        .attach(AdHoc::on_liftoff("Broadcast Worker", move |_rocket| {
            Box::pin(async move {
                hub::spawn_broadcast_worker(broadcast_hub, broadcast_db_path, broadcast_rx);
                tracing::info!("broadcast worker started");
            })
        }))
        .attach(AdHoc::on_liftoff("Delivery Worker", move |_rocket| {
            Box::pin(async move {
                delivery::spawn_delivery_worker(
                    delivery_hub,
                    delivery_db_path,
                    delivery_config,
                    delivery_shutdown,
                );
                tracing::info!("delivery worker started");
            })
        }))
        .attach(AdHoc::on_liftoff("Checkpoint Worker", move |_rocket| {
            Box::pin(async move {
                checkpoint::spawn_checkpoint_worker(
                    checkpoint_db_path,
                    checkpoint_interval,
                    checkpoint_shutdown,
                );
                tracing::info!("checkpoint worker started");
            })
        }))
        .attach(AdHoc::on_shutdown("Drain Connections", move |rocket| {
            Box::pin(async move {
                if let Some(hub) = rocket.state::<Hub>() {
                    hub.shutdown(reconnect_after_ms);
                }
                if let Some(signal) = rocket.state::<ShutdownSignal>() {
                    signal.trigger();
                }
                tracing::info!("shutdown signalled");
            })
        }));

    Ok(build)
}
