pub mod backoff;        // reconnect delays
pub mod session;        // broker seams the publisher talks to
pub mod mqtt;           // MQTT-over-TLS implementation (rumqttc)
pub mod publisher;      // connect / publish / reconnect state machine

pub use backoff::Backoff;
pub use mqtt::{MqttConnector, TlsMaterial};
pub use publisher::{GatewayPublisher, PublishStats, PublisherSettings, PublisherState};
pub use session::{BrokerConnector, BrokerSession};
