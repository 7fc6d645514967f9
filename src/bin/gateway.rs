use anyhow::Result;
use clap::Parser;
use gateway_identity::config::GatewayConfig;
use gateway_identity::mode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Publishes simulated humidity readings for one provisioned gateway.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Gateway config file
    #[arg(long, value_name = "path", default_value = "config/gateway.toml")]
    config: String,

    /// Bundle to run as, overrides `thing_name` from the config
    #[arg(long, env = "GATEWAY_THING_NAME", value_name = "name")]
    thing_name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut cfg = GatewayConfig::load(&cli.config)?;
    if let Some(name) = cli.thing_name {
        cfg.thing_name = name;
        cfg.validate()?;
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, disconnecting");
        }
        on_signal.cancel();
    });

    mode::gateway::run(cfg, cancel).await
}
