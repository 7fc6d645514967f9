use crate::{
    bundle::CredentialBundle,
    config::GatewayConfig,
    error::{GatewayError, StoreError},
    gateway::{Backoff, GatewayPublisher, MqttConnector, PublisherSettings, TlsMaterial},
    storage,
    telemetry::HumiditySimulator,
    utils::{load_ca, load_certs, load_key},
};
use anyhow::{bail, Context, Result};
use std::{fs, path::Path, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::info;

const ROOT_CA_HINT: &str = "https://www.amazontrust.com/repository/AmazonRootCA1.pem";

/// Parses the PEM material once; anything unreadable means the bundle is
/// not trusted at all.
pub fn tls_material(bundle: &CredentialBundle, ca_pem: Vec<u8>) -> Result<TlsMaterial, GatewayError> {
    let corrupt = |reason: String| GatewayError::Bundle(StoreError::BundleCorrupt {
        device: bundle.device_name.clone(),
        reason,
    });

    load_certs(bundle.certificate_pem.as_bytes())
        .map_err(|e| corrupt(format!("certificate: {e:#}")))?;
    // error text from the parser never includes key bytes
    load_key(bundle.private_key.expose().as_bytes())
        .map_err(|e| corrupt(format!("private key: {e:#}")))?;

    Ok(TlsMaterial {
        ca_pem,
        certificate_pem: bundle.certificate_pem.as_bytes().to_vec(),
        private_key: bundle.private_key.clone(),
    })
}

pub fn publisher_settings(cfg: &GatewayConfig) -> PublisherSettings {
    PublisherSettings {
        publish_interval: cfg.publish_interval(),
        connect_timeout:  cfg.connect_timeout(),
        drain_timeout:    cfg.drain_timeout(),
        backoff:          Backoff::from(&cfg.backoff),
    }
}

pub async fn run(cfg: GatewayConfig, cancel: CancellationToken) -> Result<()> {
    let ca_path = Path::new(&cfg.ca_root);
    if !ca_path.is_file() {
        bail!(
            "root CA not found at `{}`; download it from {} and place it there",
            ca_path.display(),
            ROOT_CA_HINT
        );
    }
    let ca_pem = fs::read(ca_path)
        .with_context(|| format!("reading root CA `{}`", ca_path.display()))?;
    load_ca(&ca_pem)
        .with_context(|| format!("parsing root CA `{}`", ca_path.display()))?;

    // no identity, nothing to retry
    let bundle = storage::load(Path::new(&cfg.gateways_dir), &cfg.thing_name)
        .with_context(|| format!("loading bundle for `{}`", cfg.thing_name))?;
    info!(device = %bundle.device_name, topic = %bundle.telemetry_topic, "configuration loaded");

    let host = match cfg.broker_host.clone().or_else(|| bundle.broker_endpoint.clone()) {
        Some(host) => host,
        None => bail!("no broker_host configured and bundle carries no awsIotEndpoint"),
    };

    let tls = tls_material(&bundle, ca_pem)?;
    let connector = MqttConnector {
        host,
        port:            cfg.broker_port,
        client_id:       bundle.device_name.clone(),
        keep_alive:      cfg.keep_alive(),
        publish_timeout: cfg.publish_timeout(),
        tls,
    };

    let source = HumiditySimulator::new(
        bundle.device_name.clone(),
        bundle.owner_id.clone(),
        cfg.sensor_ids.clone(),
        cfg.humidity_range()?,
    );

    let publisher = GatewayPublisher::new(
        bundle.device_name.clone(),
        bundle.telemetry_topic.clone(),
        publisher_settings(&cfg),
        Arc::new(connector),
        source,
    );

    let stats = publisher.run(cancel).await?;
    info!(published = stats.published, "gateway stopped cleanly");
    Ok(())
}
