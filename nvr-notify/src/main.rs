use nvr_notify::app::App;
use nvr_notify::config::AppConfig;
use nvr_notify::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let path = AppConfig::resolve_path(std::env::args().nth(1));
    let config = AppConfig::read(&path)?;

    let _guard = logging::init_logging(&config.logging)?;
    config.validate()?;

    let app = App::new(config.clone());
    logging::start_retention_cleanup(&config.logging, app.cancellation_token());

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %path.display(),
        "nvr-notify starting"
    );

    app.run().await?;

    tracing::info!("nvr-notify stopped");
    Ok(())
}
