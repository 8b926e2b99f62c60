use std::sync::Arc;

use flocker_agent::{AgentConfig, Deployer};
use flocker_providers::loopback::LoopbackBlockDeviceApi;
use flocker_providers::BlockDeviceApi;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = AgentConfig::from_env()?;
    tracing::info!(
        hostname = %config.hostname,
        mountroot = %config.mountroot.display(),
        loopback_root = %config.loopback_root.display(),
        tick_interval_secs = config.tick_interval.as_secs(),
        "flocker-agent starting"
    );

    let provider = LoopbackBlockDeviceApi::from_path(&config.loopback_root).await?;
    let provider: Arc<dyn BlockDeviceApi> = Arc::new(provider);
    let deployer = Deployer::new(config.hostname.clone(), provider, config.mountroot.clone());

    let mut interval = tokio::time::interval(config.tick_interval);
    loop {
        interval.tick().await;
        if let Err(err) = flocker_agent::tick(&config.config_path, &deployer).await {
            // A tick's failure is logged and swallowed: the next tick
            // re-plans from freshly discovered state.
            tracing::error!(error = %err, "convergence tick failed");
        }
    }
}
