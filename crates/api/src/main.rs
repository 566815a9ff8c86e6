use std::sync::Arc;

use anyhow::Context;

use jobrelay_api::app::{build_app, AppServices};
use jobrelay_infra::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    jobrelay_observability::init();

    let config = ServerConfig::from_env().context("loading server configuration")?;
    let services = Arc::new(
        AppServices::from_config(&config)
            .await
            .context("connecting to the database")?,
    );
    let workers = services.spawn_workers(&config);
    let app = build_app(services, &config.api_keys);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, keys = config.api_keys.len(), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .context("server error")?;

    for worker in workers {
        let name = worker.name();
        worker.shutdown().await;
        tracing::debug!(worker = name, "worker stopped");
    }
    Ok(())
}
