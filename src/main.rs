//src/main.rs

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use stock_transfers::config::{AppConfig, AppState};
use stock_transfers::router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let config = AppConfig::from_env()?;
    let app_state = AppState::new(&config).await?;

    let app = router::app(app_state);

    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!("🚀 Servidor escutando em {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
