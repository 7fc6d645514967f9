use thiserror::Error;

/// Failures of a single provisioning attempt. None of these abort a batch.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid provisioning request: {0}")]
    InvalidRequest(String),

    #[error("no deployed function name contains `{0}`")]
    FunctionNotFound(String),

    #[error("remote invocation of `{function}` failed: {reason}")]
    RemoteInvocation { function: String, reason: String },

    #[error("malformed provisioning response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid device name `{0}`")]
    InvalidDeviceName(String),

    #[error("bundle for `{device}` not found: {reason}")]
    BundleNotFound { device: String, reason: String },

    #[error("bundle for `{device}` is corrupt: {reason}")]
    BundleCorrupt { device: String, reason: String },

    #[error("filesystem error on bundle `{device}`: {source}")]
    Io {
        device: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Bundle(#[from] StoreError),

    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("gave up connecting after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("serialising telemetry batch: {0}")]
    Serialize(#[from] serde_json::Error),
}
