pub mod bundle;         // credential bundle document, typed bundle, redacted key
pub mod config;         // loads provisioner.toml or gateway.toml
pub mod error;          // ProvisionError, StoreError, GatewayError
pub mod storage;        // one directory per device, staged writes, verified loads
pub mod telemetry;      // humidity batches and the TelemetrySource seam
pub mod utils;          // PEM parsing (rustls-pemfile), monotonic timestamps
#[cfg(feature = "provisioner")]
pub mod provision;      // function resolution + provisioning client
#[cfg(feature = "gateway")]
pub mod gateway;        // MQTT/TLS publisher with reconnect backoff
pub mod mode;           // per-binary orchestration
