use chatwire::config::AppConfig;
use tracing_subscriber::EnvFilter;

#[rocket::main]
async fn main() {
    let config = AppConfig::from_env();

    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let rocket = match chatwire::try_rocket_with_config(config) {
        Ok(rocket) => rocket,
        Err(e) => {
            tracing::error!(error = %e, "storage initialisation failed");
            std::process::exit(1);
        }
    };

    if let Err(e) = rocket.launch().await {
        tracing::error!(error = %e, "server failed to launch");
        std::process::exit(1);
    }
}
