use crate::error::GatewayError;

use async_trait::async_trait;
use std::time::Duration;

/// Opens one broker connection. Resolves once the broker accepted us.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BrokerSession>, GatewayError>;
}

/// A live connection. The network I/O runs elsewhere; these calls only hand
/// work to it or watch it.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Queues `payload` for `topic` at at-least-once delivery.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), GatewayError>;

    /// Resolves with a reason once the link is gone.
    async fn closed(&self) -> String;

    /// Waits up to `drain` for outstanding acknowledgements, then closes.
    async fn disconnect(&self, drain: Duration);
}
