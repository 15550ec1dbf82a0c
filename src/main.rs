use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use translation_sync::config::Config;
use translation_sync::pipeline::Pipeline;
use translation_sync::scheduler;
use translation_sync::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("translation_sync=info".parse()?),
        )
        .init();

    info!("Starting translation sync service");

    let config = Config::from_env()?;
    let pipeline = Arc::new(Pipeline::from_config(&config).await?);

    info!(
        source = %pipeline.source_language(),
        languages = config.languages.len(),
        "Pipeline ready"
    );

    let _scheduler = scheduler::start_scheduler(Arc::clone(&pipeline), &config.sync_schedule).await?;

    if config.api_key.is_none() {
        warn!("API_KEY not set, admin routes are unauthenticated");
    }

    let shutdown = pipeline.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, cancelling running jobs");
            shutdown.cancel();
        }
    });

    let state = AppState::new(pipeline, config.api_key.as_deref(), config.progress_poll_secs);
    server::serve(state, config.port).await?;

    info!("Server stopped");
    Ok(())
}
