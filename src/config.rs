use crate::telemetry::{HumidityRange, InvalidRange};

use serde::Deserialize;
use std::{fs, time::Duration};
use anyhow::{bail, Context, Result};

fn default_function_filter() -> String { "DeviceFactory".into() }
fn default_invoke_timeout_ms() -> u64 { 30_000 }
fn default_output_dir() -> String { "gateways".into() }

#[derive(Clone, Debug, Deserialize)]
pub struct ProvisionerConfig {
    pub function_gateway_url: String,       // ex https://functions.example.com/2015-03-31
    #[serde(default = "default_function_filter")]
    pub function_name_filter: String,       // first deployed function containing this wins
    #[serde(default = "default_invoke_timeout_ms")]
    pub invoke_timeout_ms:    u64,
    #[serde(default)]
    pub auth_token:           Option<String>,
    #[serde(default = "default_output_dir")]
    pub output_dir:           String,
    #[serde(default)]
    pub overwrite_existing:   bool,         // re-provision devices that already have a bundle
}

impl ProvisionerConfig {
    pub fn load(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)
            .with_context(|| format!("reading config file `{}`", path))?;
        let cfg: ProvisionerConfig = toml::from_str(&s)
            .with_context(|| format!("parsing `{}` as TOML", path))?;
        cfg.validate()
            .with_context(|| format!("validating `{}`", path))?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.function_gateway_url.trim().is_empty() {
            bail!("function_gateway_url must be set");
        }
        if self.function_name_filter.trim().is_empty() {
            bail!("function_name_filter must not be empty");
        }
        if self.invoke_timeout_ms == 0 {
            bail!("invoke_timeout_ms must be positive");
        }
        Ok(())
    }

    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.invoke_timeout_ms)
    }
}

fn default_broker_port() -> u16 { 8883 }
fn default_keep_alive_secs() -> u64 { 60 }
fn default_ca_root() -> String { "AmazonRootCA1.pem".into() }
fn default_gateways_dir() -> String { "gateways".into() }
fn default_publish_interval_ms() -> u64 { 3_000 }
fn default_humidity_min() -> f64 { 40.0 }
fn default_humidity_max() -> f64 { 80.0 }
fn default_connect_timeout_ms() -> u64 { 10_000 }
fn default_publish_timeout_ms() -> u64 { 2_000 }
fn default_drain_timeout_ms() -> u64 { 5_000 }

#[derive(Clone, Debug, Deserialize)]
pub struct BackoffConfig {
    pub initial_ms:   u64,
    pub max_ms:       u64,
    pub max_attempts: u32,                  // 0 = keep trying until stopped
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { initial_ms: 500, max_ms: 30_000, max_attempts: 10 }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub broker_host:         Option<String>, // falls back to the bundle's awsIotEndpoint
    #[serde(default = "default_broker_port")]
    pub broker_port:         u16,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs:     u64,
    #[serde(default = "default_ca_root")]
    pub ca_root:             String,         // "AmazonRootCA1.pem"
    #[serde(default = "default_gateways_dir")]
    pub gateways_dir:        String,
    pub thing_name:          String,
    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,
    #[serde(default)]
    pub sensor_ids:          Vec<String>,    // empty = sensor-10..sensor-13
    #[serde(default = "default_humidity_min")]
    pub humidity_min:        f64,
    #[serde(default = "default_humidity_max")]
    pub humidity_max:        f64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms:  u64,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms:  u64,
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms:    u64,
    #[serde(default)]
    pub backoff:             BackoffConfig,
}

impl GatewayConfig {
    pub fn load(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)
            .with_context(|| format!("reading config file `{}`", path))?;
        let cfg: GatewayConfig = toml::from_str(&s)
            .with_context(|| format!("parsing `{}` as TOML", path))?;
        cfg.validate()
            .with_context(|| format!("validating `{}`", path))?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.thing_name.trim().is_empty() {
            bail!("thing_name must be set");
        }
        if self.publish_interval_ms == 0 {
            bail!("publish_interval_ms must be positive");
        }
        if self.keep_alive_secs == 0 {
            bail!("keep_alive_secs must be positive");
        }
        if self.backoff.initial_ms == 0 || self.backoff.max_ms < self.backoff.initial_ms {
            bail!("backoff needs 0 < initial_ms <= max_ms");
        }
        self.humidity_range()?;
        Ok(())
    }

    pub fn humidity_range(&self) -> Result<HumidityRange, InvalidRange> {
        HumidityRange::new(self.humidity_min, self.humidity_max)
    }

    pub fn publish_interval(&self) -> Duration { Duration::from_millis(self.publish_interval_ms) }
    pub fn keep_alive(&self) -> Duration { Duration::from_secs(self.keep_alive_secs) }
    pub fn connect_timeout(&self) -> Duration { Duration::from_millis(self.connect_timeout_ms) }
    pub fn publish_timeout(&self) -> Duration { Duration::from_millis(self.publish_timeout_ms) }
    pub fn drain_timeout(&self) -> Duration { Duration::from_millis(self.drain_timeout_ms) }
}
