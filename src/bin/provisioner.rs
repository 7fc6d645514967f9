use anyhow::{Context, Result};
use clap::Parser;
use gateway_identity::config::ProvisionerConfig;
use gateway_identity::mode::provisioner::{self, RangeRequest};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Creates `{prefix}-{start}` .. `{prefix}-{start+count-1}` through the
/// provisioning function and stores one bundle directory per device.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Provisioner config file
    #[arg(long, value_name = "path", default_value = "config/provisioner.toml")]
    config: String,

    /// Device name prefix, eg. "sensor", "device", "node"
    #[arg(long, value_name = "str")]
    prefix: String,

    /// First number of the range
    #[arg(long, value_name = "n", default_value_t = 1)]
    start: u32,

    /// How many devices to create
    #[arg(long, value_name = "n", default_value_t = 1)]
    count: u32,

    /// Owner the devices are provisioned for
    #[arg(long = "user", env = "PROVISIONER_USER_ID", value_name = "id", default_value = "juan")]
    owner_id: String,

    /// Output directory, overrides `output_dir` from the config
    #[arg(long, value_name = "dir")]
    output_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = ProvisionerConfig::load(&cli.config)?;

    let prefix = cli.prefix.trim().to_string();
    if prefix.is_empty() {
        anyhow::bail!("a device prefix is required");
    }

    let req = RangeRequest {
        prefix,
        start:              cli.start,
        count:              cli.count,
        owner_id:           cli.owner_id,
        output_dir:         cli.output_dir.unwrap_or_else(|| PathBuf::from(&cfg.output_dir)),
        overwrite_existing: cfg.overwrite_existing,
    };

    provisioner::run(cfg, req).await.context("provisioning run failed")
}
