use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use kobo_pipeline::{AppState, Settings, SurveyPipeline, routes};
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file first. Ignore errors (e.g., file not found)
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kobo_pipeline=info,tower_http=info".into()),
        )
        .with(fmt::layer())
        .init();

    tracing::info!("Initializing survey pipeline server...");

    let settings = match Settings::new() {
        Ok(s) => {
            tracing::info!(?s, "Configuration loaded successfully.");
            s
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    // A missing token is a configuration error, reported before any fetch
    settings
        .validate()
        .context("Invalid survey API configuration")?;
    let settings = Arc::new(settings);

    let pipeline = Arc::new(
        SurveyPipeline::new(Arc::clone(&settings)).context("Failed to build survey pipeline")?,
    );

    // Warm the table; a failure here is not fatal, requests retry the load
    match pipeline.load(false).await {
        Ok(loaded) => tracing::info!(rows = loaded.table.len(), "Initial survey load complete."),
        Err(e) => tracing::warn!("Initial survey load failed: {}", e),
    }

    let app_state = AppState {
        settings: Arc::clone(&settings),
        pipeline,
    };
    let app = routes::create_router(app_state);

    let addr: SocketAddr = settings.server_address.parse().with_context(|| {
        format!("Invalid server address format: {}", settings.server_address)
    })?;

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to address {}", addr))?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
