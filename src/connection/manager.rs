//! Connection manager with persistent broker session and automatic reconnection

use crate::transport::{AckTracker, InboundMessage, MqttTransport};
use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, TlsConfiguration};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Default port for MQTT over mutual TLS
pub const MQTT_TLS_PORT: u16 = 8883;

/// Events emitted by the connection manager
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Broker accepted the session and subscriptions were requested
    Connected { endpoint: String },
    /// Connection dropped; the manager will retry
    Disconnected { reason: String },
    /// Received a message on a subscribed topic
    Received(InboundMessage),
}

/// Certificate materiel for mutual TLS
#[derive(Debug, Clone, PartialEq)]
pub struct TlsPaths {
    pub root_ca: PathBuf,
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// MQTT client id, the device's thing name
    pub client_id: String,
    /// Broker host name
    pub endpoint: String,
    pub port: u16,
    pub tls: TlsPaths,
    pub keep_alive: Duration,
    /// Topic filters subscribed at QoS 1 on every connect
    pub subscriptions: Vec<String>,
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
}

impl ConnectionConfig {
    pub fn new(client_id: impl Into<String>, endpoint: impl Into<String>, tls: TlsPaths) -> Self {
        Self {
            client_id: client_id.into(),
            endpoint: endpoint.into(),
            port: MQTT_TLS_PORT,
            tls,
            keep_alive: Duration::from_secs(30),
            subscriptions: Vec::new(),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }

    /// Broker address as `host:port`, for logging
    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.endpoint, self.port)
    }
}

/// Build client options, reading the TLS materiel from disk
pub fn mqtt_options(config: &ConnectionConfig) -> Result<MqttOptions> {
    let ca = std::fs::read(&config.tls.root_ca)
        .with_context(|| format!("failed to read root CA {}", config.tls.root_ca.display()))?;
    let certificate = std::fs::read(&config.tls.certificate).with_context(|| {
        format!(
            "failed to read device certificate {}",
            config.tls.certificate.display()
        )
    })?;
    let private_key = std::fs::read(&config.tls.private_key).with_context(|| {
        format!(
            "failed to read private key {}",
            config.tls.private_key.display()
        )
    })?;

    let mut options = MqttOptions::new(&config.client_id, &config.endpoint, config.port);
    options.set_keep_alive(config.keep_alive);
    options.set_manual_acks(true);
    options.set_transport(rumqttc::Transport::Tls(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth: Some((certificate, private_key)),
    }));

    Ok(options)
}

/// Manages the broker session: owns the event loop task and hands out the
/// outbound [`MqttTransport`]
pub struct ConnectionManager {
    config: ConnectionConfig,
    transport: Arc<MqttTransport>,
    /// Channel to receive connection events
    event_rx: mpsc::Receiver<ConnectionEvent>,
}

impl ConnectionManager {
    /// Create a new connection manager and start the connection loop
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        let options = mqtt_options(&config)?;
        let (client, eventloop) = AsyncClient::new(options, 100);
        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(100);

        let tracker = Arc::new(AckTracker::new());
        let transport = Arc::new(MqttTransport::new(client.clone(), tracker.clone()));

        let config_clone = config.clone();
        tokio::spawn(async move {
            connection_loop(config_clone, client, eventloop, tracker, event_tx).await;
        });

        Ok(Self {
            config,
            transport,
            event_rx,
        })
    }

    /// Receive the next connection event
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    /// Get the client id this session was opened with
    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    /// Get a handle for outbound traffic
    pub fn transport(&self) -> Arc<MqttTransport> {
        self.transport.clone()
    }

    /// Disconnect from the broker; the connection loop exits afterwards
    pub async fn close(&self) {
        match self.transport.disconnect().await {
            Ok(()) => info!("Disconnected from MQTT broker"),
            Err(e) => warn!("Failed to disconnect cleanly: {}", e),
        }
    }
}

/// Main connection loop with reconnection logic
async fn connection_loop(
    config: ConnectionConfig,
    client: AsyncClient,
    mut eventloop: EventLoop,
    tracker: Arc<AckTracker>,
    event_tx: mpsc::Sender<ConnectionEvent>,
) {
    let mut reconnect_delay = config.reconnect_delay;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                reconnect_delay = config.reconnect_delay; // Reset delay
                info!("Connected to {}", config.broker_address());

                // try_subscribe: this task drains the request queue, so it must not wait on it
                for filter in &config.subscriptions {
                    info!("Subscribing to {}", filter);
                    if let Err(e) = client.try_subscribe(filter, rumqttc::QoS::AtLeastOnce) {
                        error!("Error subscribing to {}: {}", filter, e);
                    }
                }

                let _ = event_tx
                    .send(ConnectionEvent::Connected {
                        endpoint: config.broker_address(),
                    })
                    .await;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if event_tx
                    .send(ConnectionEvent::Received(publish.into()))
                    .await
                    .is_err()
                {
                    debug!("Event receiver dropped, stopping connection loop");
                    break;
                }
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                tracker.acknowledged(ack.pkid);
                debug!(
                    "Publish acknowledged: pkid={} outstanding={}",
                    ack.pkid,
                    tracker.outstanding()
                );
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                debug!("Subscription acknowledged: pkid={}", ack.pkid);
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                tracker.sent(pkid);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("Disconnect sent, stopping connection loop");
                break;
            }
            Ok(_) => {
                // Pings and other protocol traffic
            }
            Err(e) => {
                warn!("Connection lost: {}", e);
                let _ = event_tx
                    .send(ConnectionEvent::Disconnected {
                        reason: e.to_string(),
                    })
                    .await;

                // Wait before the next poll reconnects
                tokio::time::sleep(reconnect_delay).await;

                // Exponential backoff
                reconnect_delay = std::cmp::min(reconnect_delay * 2, config.max_reconnect_delay);
            }
        }
    }
}
