use super::{
    backoff::Backoff,
    session::{BrokerConnector, BrokerSession},
};
use crate::{error::GatewayError, telemetry::TelemetrySource};

use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    time::{Instant, Interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublisherState {
    Idle,
    Connecting,
    Connected,
    Publishing,
    Disconnected,
    Stopped,
}

#[derive(Clone, Copy, Debug)]
pub struct PublisherSettings {
    pub publish_interval: Duration,
    pub connect_timeout:  Duration,
    pub drain_timeout:    Duration,
    pub backoff:          Backoff,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub connect_attempts: u32,
    pub connections:      u32,
    pub disconnects:      u32,
    pub published:        u64,     // handed to the transport, not necessarily acked
}

enum SessionEnd {
    Stopped,
    Lost(String),
}

/// Streams batches from `source` to `topic` until cancelled or until the
/// reconnect budget runs out. Readings produced while disconnected are
/// dropped, never queued.
pub struct GatewayPublisher<S: TelemetrySource> {
    device:    String,
    topic:     String,
    settings:  PublisherSettings,
    connector: Arc<dyn BrokerConnector>,
    source:    S,
    state:     watch::Sender<PublisherState>,
}

impl<S: TelemetrySource> GatewayPublisher<S> {
    pub fn new(
        device: impl Into<String>,
        topic: impl Into<String>,
        settings: PublisherSettings,
        connector: Arc<dyn BrokerConnector>,
        source: S,
    ) -> Self {
        let (state, _) = watch::channel(PublisherState::Idle);
        Self {
            device: device.into(),
            topic: topic.into(),
            settings,
            connector,
            source,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PublisherState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: PublisherState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = ?prev, to = ?next, "publisher state");
        }
    }

    #[instrument(name = "gateway_publisher", skip_all, fields(device = %self.device, topic = %self.topic))]
    pub async fn run(mut self, cancel: CancellationToken) -> Result<PublishStats, GatewayError> {
        info!(interval_ms = self.settings.publish_interval.as_millis() as u64, "publisher starting");
        let mut stats = PublishStats::default();
        // consecutive attempts that did not end in a stable session
        let mut failures = 0u32;

        // one schedule for the whole run; reconnects resume on it
        let mut ticker = tokio::time::interval(self.settings.publish_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            self.set_state(PublisherState::Connecting);
            let session = match self.connect_with_backoff(&cancel, &mut stats, &mut failures).await {
                Ok(Some(session)) => session,
                Ok(None)          => break Ok(()),
                Err(e)            => break Err(e),
            };
            stats.connections += 1;
            let connected_at = Instant::now();
            self.set_state(PublisherState::Connected);

            let reason = match self.publish_until_lost(session.as_ref(), &mut ticker, &cancel, &mut stats).await {
                Ok(SessionEnd::Stopped) => {
                    session.disconnect(self.settings.drain_timeout).await;
                    break Ok(());
                }
                Ok(SessionEnd::Lost(reason)) => reason,
                Err(e) => {
                    session.disconnect(self.settings.drain_timeout).await;
                    break Err(e);
                }
            };

            stats.disconnects += 1;
            self.set_state(PublisherState::Disconnected);
            session.disconnect(Duration::ZERO).await;

            // a session that dies before one full interval counts as a failed attempt
            if connected_at.elapsed() >= self.settings.publish_interval {
                failures = 0;
                warn!(reason = %reason, "broker connection lost");
            } else {
                failures += 1;
                warn!(reason = %reason, failures, "broker connection lost right after connecting");
                if self.settings.backoff.exhausted(failures) {
                    error!(attempt = failures, "giving up on broker connection");
                    break Err(GatewayError::RetriesExhausted { attempts: failures, last: reason });
                }
            }

            if !self.pause(failures.max(1), &cancel).await {
                break Ok(());
            }
        };

        self.set_state(PublisherState::Stopped);
        info!(
            published = stats.published,
            connections = stats.connections,
            disconnects = stats.disconnects,
            "publisher stopped"
        );
        result.map(|()| stats)
    }

    // false = cancelled while waiting
    async fn pause(&self, failures: u32, cancel: &CancellationToken) -> bool {
        let delay = self.settings.backoff.delay(failures);
        debug!(delay_ms = delay.as_millis() as u64, "waiting before reconnect");
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    // None = cancelled while trying
    async fn connect_with_backoff(
        &self,
        cancel: &CancellationToken,
        stats: &mut PublishStats,
        failures: &mut u32,
    ) -> Result<Option<Box<dyn BrokerSession>>, GatewayError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            stats.connect_attempts += 1;

            let connecting = tokio::time::timeout(self.settings.connect_timeout, self.connector.connect());
            let result = tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                r = connecting => r,
            };
            let err = match result {
                Ok(Ok(session)) => {
                    info!(attempt = stats.connect_attempts, "connected to broker");
                    return Ok(Some(session));
                }
                Ok(Err(e @ GatewayError::Connection(_))) => e,
                Ok(Err(e)) => return Err(e),
                Err(_) => GatewayError::Connection(format!(
                    "no CONNACK within {:?}",
                    self.settings.connect_timeout
                )),
            };

            *failures += 1;
            if self.settings.backoff.exhausted(*failures) {
                error!(attempt = *failures, error = %err, "giving up on broker connection");
                return Err(GatewayError::RetriesExhausted {
                    attempts: *failures,
                    last: err.to_string(),
                });
            }

            warn!(
                attempt = *failures,
                delay_ms = self.settings.backoff.delay(*failures).as_millis() as u64,
                error = %err,
                "broker connection failed, retrying"
            );
            if !self.pause(*failures, cancel).await {
                return Ok(None);
            }
        }
    }

    async fn publish_until_lost(
        &mut self,
        session: &dyn BrokerSession,
        ticker: &mut Interval,
        cancel: &CancellationToken,
        stats: &mut PublishStats,
    ) -> Result<SessionEnd, GatewayError> {
        self.set_state(PublisherState::Publishing);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(SessionEnd::Stopped),
                reason = session.closed() => return Ok(SessionEnd::Lost(reason)),
                _ = ticker.tick() => {}
            }

            let batch = self.source.next_batch();
            let payload = serde_json::to_vec(&batch)?;
            let size = payload.len();

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(SessionEnd::Stopped),
                r = session.publish(&self.topic, payload) => r,
            };
            match sent {
                Ok(()) => {
                    stats.published += 1;
                    debug!(timestamp = batch.timestamp, readings = batch.readings.len(), bytes = size, "batch published");
                }
                Err(e) => return Ok(SessionEnd::Lost(e.to_string())),
            }
        }
    }
}
