//! Rally Portal API Backend

use anyhow::Context;
use clap::Parser;
use rally_portal::config::PortalConfig;
use rally_portal::{router, AppState};
use rally_tenant::InMemoryTenantStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rally-portal")]
#[command(about = "Rally embedded-app API server", version)]
struct Cli {
    /// Config file
    #[arg(short, long, env = "RALLY_CONFIG", default_value = "rally.toml")]
    config: PathBuf,

    /// Override the listen address
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = PortalConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }

    let state = AppState::new(Arc::new(InMemoryTenantStore::new()), &config)?;
    tracing::info!(
        sources = ?state.extractor.source_names(),
        "identity sources configured"
    );
    if config.identity.dev_override_enabled {
        tracing::warn!("development identity override is enabled");
    }

    let _sweep = state
        .directory
        .clone()
        .spawn_expiry_sweep(Duration::from_secs(config.expiry_sweep_secs));

    let app = router(state);

    tracing::info!("Portal API listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}
