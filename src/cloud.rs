use crate::bridge::Message;
use crate::config::CloudConfig;
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, MqttOptions, Packet, QoS, TlsConfiguration, Transport,
};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

pub const KEEP_ALIVE_SECS: u64 = 30;
pub const DEFAULT_MQTT_PORT: u16 = 8883;
const OUTGOING_QUEUE_CAPACITY: usize = 16;

/// Lifecycle of the outbound link. `Faulted` is a transient state observed
/// after the connection drops; the next operation folds it back to
/// `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Faulted,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("failed to load credential material: {0}")]
    Credentials(std::io::Error),
    #[error("broker rejected the session: {0}")]
    Rejected(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("timed out connecting to {0}")]
    Timeout(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("link is not connected; message not sent")]
    NotConnected,
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timed out publishing to `{0}`")]
    Timeout(String),
}

/// Write-side seam of the bridge: a connection-oriented sink for telemetry
/// messages.
#[async_trait]
pub trait TelemetrySink: Send {
    fn state(&self) -> ConnectionState;
    async fn connect(&mut self) -> Result<(), ConnectError>;
    async fn publish(&mut self, message: &Message) -> Result<(), PublishError>;
    async fn disconnect(&mut self);
}

struct MqttSession {
    client: AsyncClient,
    driver: JoinHandle<()>,
    alive: watch::Receiver<bool>,
}

/// Persistent, mutually authenticated MQTT connection to the telemetry
/// ingestion endpoint. One instance owns the connection for the process
/// lifetime; it never schedules its own retries.
pub struct CloudLink {
    config: CloudConfig,
    connect_timeout: Duration,
    operation_timeout: Duration,
    state: ConnectionState,
    session: Option<MqttSession>,
}

impl CloudLink {
    pub fn new(config: CloudConfig, connect_timeout: Duration, operation_timeout: Duration) -> Self {
        Self {
            config,
            connect_timeout,
            operation_timeout,
            state: ConnectionState::Disconnected,
            session: None,
        }
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    /// Fold a dead session into `Disconnected` so the caller sees a clean
    /// slate before the next operation.
    fn reap(&mut self) {
        let dead = self
            .session
            .as_ref()
            .map(|s| !*s.alive.borrow())
            .unwrap_or(false);
        if dead {
            warn!("cloud link lost; marking disconnected");
            if let Some(session) = self.session.take() {
                session.driver.abort();
            }
            self.state = ConnectionState::Disconnected;
        }
    }

    fn mqtt_options(&self) -> Result<MqttOptions, ConnectError> {
        let (host, port) = match self.config.endpoint.rsplit_once(':') {
            Some((host, port)) => (
                host.to_string(),
                port.parse::<u16>().unwrap_or(DEFAULT_MQTT_PORT),
            ),
            None => (self.config.endpoint.clone(), DEFAULT_MQTT_PORT),
        };

        let ca = std::fs::read(&self.config.root_ca_path).map_err(ConnectError::Credentials)?;
        let client_cert = std::fs::read(&self.config.cert_path).map_err(ConnectError::Credentials)?;
        let client_key = std::fs::read(&self.config.key_path).map_err(ConnectError::Credentials)?;

        let mut options = MqttOptions::new(&self.config.client_id, host, port);
        options.set_keep_alive(Duration::from_secs(KEEP_ALIVE_SECS));
        // The broker resumes the session on reconnect; a clean session would
        // discard in-flight at-least-once deliveries.
        options.set_clean_session(false);
        options.set_transport(Transport::Tls(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: Some((client_cert, client_key)),
        }));
        Ok(options)
    }
}

#[async_trait]
impl TelemetrySink for CloudLink {
    fn state(&self) -> ConnectionState {
        if let Some(session) = &self.session {
            if !*session.alive.borrow() {
                return ConnectionState::Faulted;
            }
        }
        self.state
    }

    /// Perform the mutually authenticated handshake. Idempotent while
    /// `Connected`: the broker evicts sessions on duplicate client ids, so a
    /// repeat handshake must never be issued.
    async fn connect(&mut self) -> Result<(), ConnectError> {
        self.reap();
        if self.state == ConnectionState::Connected {
            return Ok(());
        }

        let options = self.mqtt_options()?;
        self.state = ConnectionState::Connecting;

        let (client, mut eventloop) = AsyncClient::new(options, OUTGOING_QUEUE_CAPACITY);

        // Drive the event loop inline until the broker acknowledges the
        // session, bounded by the connect timeout.
        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            return Ok(());
                        }
                        return Err(ConnectError::Rejected(format!("{:?}", ack.code)));
                    }
                    Ok(_) => {}
                    Err(e) => return Err(ConnectError::Connection(e.to_string())),
                }
            }
        };
        match time::timeout(self.connect_timeout, handshake).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
            Err(_) => {
                self.state = ConnectionState::Disconnected;
                return Err(ConnectError::Timeout(self.config.endpoint.clone()));
            }
        }

        // Hand the event loop to a background driver; it keeps the session
        // alive and flags the link dead on the first transport error.
        let (alive_tx, alive_rx) = watch::channel(true);
        let driver = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(event) => debug!("cloud event: {:?}", event),
                    Err(e) => {
                        warn!("cloud link error: {}", e);
                        let _ = alive_tx.send(false);
                        break;
                    }
                }
            }
        });

        self.session = Some(MqttSession {
            client,
            driver,
            alive: alive_rx,
        });
        self.state = ConnectionState::Connected;
        info!("connected to cloud endpoint {}", self.config.endpoint);
        Ok(())
    }

    /// Send one message with at-least-once intent. Reports an explicit error
    /// when the link is down instead of silently dropping.
    async fn publish(&mut self, message: &Message) -> Result<(), PublishError> {
        self.reap();
        let session = match &self.session {
            Some(session) => session,
            None => return Err(PublishError::NotConnected),
        };

        let payload = serde_json::to_vec(message)?;
        time::timeout(
            self.operation_timeout,
            session
                .client
                .publish(&self.config.topic, QoS::AtLeastOnce, false, payload),
        )
        .await
        .map_err(|_| PublishError::Timeout(self.config.topic.clone()))?
        .map_err(|e| PublishError::Transport(e.to_string()))?;
        Ok(())
    }

    /// Graceful close; a no-op when there is no live session.
    async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.client.disconnect().await {
                debug!("disconnect while link already down: {}", e);
            }
            session.driver.abort();
            info!("disconnected from cloud endpoint");
        }
        self.state = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CloudConfig {
        CloudConfig {
            endpoint: "no-such-host.invalid:8883".to_string(),
            client_id: "bench-device".to_string(),
            topic: "sensors/bench".to_string(),
            cert_path: "/nonexistent/cert.pem".to_string(),
            key_path: "/nonexistent/key.pem".to_string(),
            root_ca_path: "/nonexistent/root-ca.pem".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_while_disconnected_is_an_error() {
        let mut link = CloudLink::new(
            test_config(),
            Duration::from_millis(100),
            Duration::from_millis(100),
        );
        assert_eq!(link.state(), ConnectionState::Disconnected);

        let message = Message {
            timestamp: 0.0,
            temperature: 20.0,
            pressure: 1.0,
        };
        let result = link.publish(&message).await;
        assert!(matches!(result, Err(PublishError::NotConnected)));
        // The failed publish must not disturb the state machine
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_with_missing_credentials_fails_cleanly() {
        let mut link = CloudLink::new(
            test_config(),
            Duration::from_millis(100),
            Duration::from_millis(100),
        );
        let result = link.connect().await;
        assert!(matches!(result, Err(ConnectError::Credentials(_))));
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_when_already_disconnected_is_a_noop() {
        let mut link = CloudLink::new(
            test_config(),
            Duration::from_millis(100),
            Duration::from_millis(100),
        );
        link.disconnect().await;
        link.disconnect().await;
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }
}
