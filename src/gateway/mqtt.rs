use super::session::{BrokerConnector, BrokerSession};
use crate::{bundle::PrivateKeyPem, error::GatewayError};

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    TlsConfiguration, Transport,
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{sync::watch, task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};

const REQUEST_CAPACITY: usize = 64;
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// PEM material for mutual TLS. Loaded once at startup.
#[derive(Clone, Debug)]
pub struct TlsMaterial {
    pub ca_pem:          Vec<u8>,
    pub certificate_pem: Vec<u8>,
    pub private_key:     PrivateKeyPem,
}

pub struct MqttConnector {
    pub host:            String,
    pub port:            u16,
    pub client_id:       String,
    pub keep_alive:      Duration,
    pub publish_timeout: Duration,
    pub tls:             TlsMaterial,
}

impl MqttConnector {
    fn options(&self) -> MqttOptions {
        let mut opts = MqttOptions::new(&self.client_id, &self.host, self.port);
        opts.set_keep_alive(self.keep_alive);
        opts.set_clean_session(true);
        opts.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
            ca: self.tls.ca_pem.clone(),
            alpn: None,
            client_auth: Some((
                self.tls.certificate_pem.clone(),
                self.tls.private_key.expose().as_bytes().to_vec(),
            )),
        }));
        opts
    }
}

#[async_trait]
impl BrokerConnector for MqttConnector {
    async fn connect(&self) -> Result<Box<dyn BrokerSession>, GatewayError> {
        debug!(host = %self.host, port = self.port, client_id = %self.client_id, "opening MQTT connection");
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);

        // first polls do TCP + TLS + CONNECT; wait for the CONNACK
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(GatewayError::Connection(format!(
                            "broker refused connection: {:?}",
                            ack.code
                        )));
                    }
                    break;
                }
                Ok(_)  => continue,
                Err(e) => return Err(GatewayError::Connection(e.to_string())),
            }
        }
        info!(host = %self.host, port = self.port, "MQTT connection accepted");

        let inflight = Arc::new(AtomicUsize::new(0));
        let (lost_tx, lost_rx) = watch::channel(None);
        let io = tokio::spawn(drive_event_loop(eventloop, Arc::clone(&inflight), lost_tx));

        Ok(Box::new(MqttSession {
            client,
            inflight,
            lost: lost_rx,
            io: Mutex::new(Some(io)),
            publish_timeout: self.publish_timeout,
        }))
    }
}

// Owns the connection from CONNACK on: keep-alives, acks, failures.
async fn drive_event_loop(
    mut eventloop: EventLoop,
    inflight: Arc<AtomicUsize>,
    lost: watch::Sender<Option<String>>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                debug!(pkid, "publish sent");
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                let _ = inflight.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
                info!(pkid = ack.pkid, "publish acknowledged");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                let _ = lost.send(Some(e.to_string()));
                break;
            }
        }
    }
}

pub struct MqttSession {
    client:          AsyncClient,
    inflight:        Arc<AtomicUsize>,
    lost:            watch::Receiver<Option<String>>,
    io:              Mutex<Option<JoinHandle<()>>>,
    publish_timeout: Duration,
}

impl MqttSession {
    fn is_lost(&self) -> bool {
        self.lost.borrow().is_some()
    }

    fn take_io(&self) -> Option<JoinHandle<()>> {
        self.io.lock().ok().and_then(|mut guard| guard.take())
    }
}

#[async_trait]
impl BrokerSession for MqttSession {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), GatewayError> {
        // counted before it reaches the event loop so a stop right after
        // enqueueing still waits for its PUBACK
        self.inflight.fetch_add(1, Ordering::SeqCst);
        let queued = self.client.publish(topic, QoS::AtLeastOnce, false, payload);
        let err = match tokio::time::timeout(self.publish_timeout, queued).await {
            Ok(Ok(()))  => return Ok(()),
            Ok(Err(e))  => GatewayError::Publish(e.to_string()),
            Err(_)      => GatewayError::Publish(format!(
                "request queue still full after {:?}",
                self.publish_timeout
            )),
        };
        self.inflight.fetch_sub(1, Ordering::SeqCst);
        Err(err)
    }

    async fn closed(&self) -> String {
        let mut lost = self.lost.clone();
        let reason = lost
            .wait_for(Option::is_some)
            .await
            .map(|r| (*r).clone().unwrap_or_default());
        reason.unwrap_or_else(|_| "event loop stopped".into())
    }

    async fn disconnect(&self, drain: Duration) {
        let deadline = Instant::now() + drain;
        while self.inflight.load(Ordering::SeqCst) > 0 && !self.is_lost() && Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL).await;
        }
        let pending = self.inflight.load(Ordering::SeqCst);
        if pending > 0 {
            warn!(pending, "closing with unacknowledged publishes");
        }

        if !self.is_lost() {
            let _ = tokio::time::timeout(drain, self.client.disconnect()).await;
        }

        if let Some(mut io) = self.take_io() {
            if tokio::time::timeout(drain, &mut io).await.is_err() {
                io.abort();
            }
        }
        debug!("MQTT session closed");
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        if let Some(io) = self.take_io() {
            io.abort();
        }
    }
}
