use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use tokio::sync::watch;

use jobrelay_agents::AgentStatus;
use jobrelay_browser::portals::PortalRegistry;
use jobrelay_browser::{BrowserDriver, CdpEngine, FieldMapper, HeuristicFieldMapper, JobScraper, LaunchOptions};
use jobrelay_retry::RetryEngine;
use jobrelay_worker::{
    AgentApi, HttpFieldMapper, Limits, LocalResumeStore, Runner, ServerClient, ServerCodeSource,
    WorkerConfig, load_profile, spawn_heartbeat,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    jobrelay_observability::init();

    let config = WorkerConfig::from_env().context("loading agent configuration")?;
    let profile = load_profile(&config.profile_path).await?;

    let driver = Arc::new(BrowserDriver::new(
        Arc::new(CdpEngine::new()),
        Arc::new(RetryEngine::new()),
        LaunchOptions {
            headless: config.headless,
            executable: config.chrome_path.clone(),
            extra_args: Vec::new(),
        },
    ));
    driver.start().await.context("launching browser")?;

    let api: Arc<dyn AgentApi> = Arc::new(ServerClient::new(
        config.server_url.clone(),
        config.api_key.clone(),
        config.agent_id.clone(),
    ));
    api.register(
        config.agent_name.as_deref(),
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "os": std::env::consts::OS,
            "headless": config.headless,
        }),
    )
    .await
    .context("registering with the relay server")?;
    tracing::info!(agent_id = %config.agent_id, server = %config.server_url, "agent registered");

    let mapper: Arc<dyn FieldMapper> = match &config.field_mapper_url {
        Some(url) => Arc::new(HttpFieldMapper::new(url.clone())),
        None => Arc::new(HeuristicFieldMapper),
    };
    let portals = Arc::new(PortalRegistry::standard(
        driver.clone(),
        mapper,
        Arc::new(ServerCodeSource(api.clone())),
    ));
    let runner = Runner::new(
        api.clone(),
        driver.clone(),
        JobScraper::new(driver.clone(), portals),
        profile,
        LocalResumeStore::new(&config.resume_dir),
        Limits {
            auto_apply: config.auto_apply_limit,
            deep_scrape: config.deep_scrape_limit,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let heartbeat = spawn_heartbeat(
        api.clone(),
        runner.active_tasks(),
        config.heartbeat_interval,
        shutdown_rx.clone(),
    );
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested, finishing the task in hand");
            let _ = shutdown_tx.send(true);
        }
    });

    runner.run(config.poll_interval, shutdown_rx).await;

    let _ = heartbeat.await;
    if let Err(e) = api.heartbeat(AgentStatus::Offline, 0).await {
        tracing::warn!(error = %e, "could not announce shutdown");
    }
    driver.stop().await.context("closing browser")?;
    Ok(())
}
