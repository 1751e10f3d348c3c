//! Transport connector: the connect-subscribe-serve loop
//!
//! Owns the broker session for the process lifetime. Every (re)connect
//! re-subscribes the full topic set and re-publishes a state query to each
//! device, since rumqttc uses `clean_start = true` and the broker discards
//! session state (including subscriptions) when the client reconnects.
//! The loop never exits on its own; only shutdown cancellation stops it.

use std::time::Duration;

use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop, Incoming};
use rumqttc::Outgoing;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::device::DeviceRegistry;

/// Wait between reconnection attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// How long to keep polling after shutdown so a queued DISCONNECT
/// actually reaches the wire
const DISCONNECT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection lifecycle and inbound traffic, in delivery order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorEvent {
    /// Session established, subscriptions and state queries issued
    Connected,
    /// Session lost (peer- or self-initiated)
    Disconnected,
    /// Waiting out the backoff before the next attempt
    Reconnecting(String),
    /// An outbound publish was dropped (reported by the publisher task)
    PublishFailed(String),
    /// One inbound publish
    Message { topic: String, payload: Vec<u8> },
}

/// Topics to (re-)establish on every connect
#[derive(Debug, Clone)]
pub struct SessionSetup {
    /// Subscription filters
    pub subscriptions: Vec<String>,
    /// Topics that receive an empty state-query publish
    pub state_queries: Vec<String>,
}

impl SessionSetup {
    /// Full topic set for a device registry: the temperature feed plus
    /// stat/tele filters and a state-query topic per device
    pub fn for_devices(temperature_topic: &str, registry: &DeviceRegistry) -> Self {
        Self {
            subscriptions: std::iter::once(temperature_topic.to_string())
                .chain(
                    registry
                        .iter()
                        .flat_map(|d| [d.stat_filter(), d.tele_filter()]),
                )
                .collect(),
            state_queries: registry.iter().map(|d| d.state_query_topic()).collect(),
        }
    }
}

/// Run the connector loop until shutdown
///
/// Every event worth acting on is forwarded through `event_tx`; the engine
/// task is the only consumer, so message processing stays strictly ordered.
///
/// On shutdown the loop does not exit immediately: `AsyncClient::disconnect`
/// only queues a request, and the DISCONNECT packet is serialized to the
/// socket by `EventLoop::poll`. The connector keeps polling briefly after
/// cancellation so the broker sees a clean session close.
pub async fn run_connector(
    mut eventloop: EventLoop,
    client: AsyncClient,
    session: SessionSetup,
    event_tx: mpsc::Sender<ConnectorEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let polled = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Connector shutting down");
                drain_disconnect(&mut eventloop).await;
                return;
            }
            polled = eventloop.poll() => polled,
        };

        match polled {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                info!("Connected to MQTT broker");
                forward(&event_tx, ConnectorEvent::Connected).await;
                establish_session(&client, &session).await;
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                let topic = String::from_utf8_lossy(&publish.topic).to_string();
                debug!("Received message on {} ({} bytes)", topic, publish.payload.len());
                forward(
                    &event_tx,
                    ConnectorEvent::Message {
                        topic,
                        payload: publish.payload.to_vec(),
                    },
                )
                .await;
            }
            Ok(Event::Incoming(Incoming::Disconnect(_))) => {
                warn!("Disconnected by MQTT broker");
                forward(&event_tx, ConnectorEvent::Disconnected).await;
            }
            Ok(Event::Incoming(Incoming::SubAck(_))) => {
                debug!("Subscription acknowledged");
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT connection error: {}", e);
                forward(&event_tx, ConnectorEvent::Disconnected).await;
                forward(
                    &event_tx,
                    ConnectorEvent::Reconnecting(format!(
                        "{} - retrying in {}s",
                        e,
                        RECONNECT_DELAY.as_secs()
                    )),
                )
                .await;

                // Backoff must not outlive a shutdown request
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Connector shutting down during backoff");
                        return;
                    }
                    _ = sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
}

/// Keep polling until the queued DISCONNECT hits the wire
///
/// Bounded by `DISCONNECT_DRAIN_TIMEOUT`; a poll error means the
/// connection is already gone and there is nothing left to flush.
async fn drain_disconnect(eventloop: &mut EventLoop) {
    let deadline = sleep(DISCONNECT_DRAIN_TIMEOUT);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => {
                warn!("Timed out flushing disconnect");
                return;
            }
            polled = eventloop.poll() => match polled {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("Disconnect flushed to broker");
                    return;
                }
                Ok(_) => {}
                Err(_) => return,
            },
        }
    }
}

/// Re-subscribe everything and ask every device for its current state
async fn establish_session(client: &AsyncClient, session: &SessionSetup) {
    for filter in &session.subscriptions {
        info!("Subscribing to {}", filter);
        if let Err(e) = client.subscribe(filter, QoS::AtLeastOnce).await {
            error!("Failed to subscribe to {}: {}", filter, e);
        }
    }
    for topic in &session.state_queries {
        debug!("Requesting state via {}", topic);
        if let Err(e) = client.publish(topic, QoS::AtLeastOnce, false, Vec::new()).await {
            error!("Failed to publish state query to {}: {}", topic, e);
        }
    }
}

async fn forward(event_tx: &mpsc::Sender<ConnectorEvent>, event: ConnectorEvent) {
    if event_tx.send(event).await.is_err() {
        warn!("Engine dropped its event receiver");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use rumqttc::v5::MqttOptions;

    #[test]
    fn test_reconnect_delay_is_5_seconds() {
        assert_eq!(RECONNECT_DELAY, Duration::from_secs(5));
    }

    #[test]
    fn test_session_setup_covers_every_device() {
        let registry = DeviceRegistry::new(&[
            DeviceConfig {
                id: "esp32".into(),
                topic_base: "esp32".into(),
            },
            DeviceConfig {
                id: "sonoff1".into(),
                topic_base: "sonoff1".into(),
            },
        ]);
        let session = SessionSetup::for_devices("esp32/temperatura", &registry);

        assert_eq!(
            session.subscriptions,
            vec![
                "esp32/temperatura",
                "stat/esp32/#",
                "tele/esp32/#",
                "stat/sonoff1/#",
                "tele/sonoff1/#",
            ]
        );
        assert_eq!(
            session.state_queries,
            vec!["cmnd/esp32/state", "cmnd/sonoff1/state"]
        );
    }

    /// The backoff wait must be interruptible by shutdown: cancelling the
    /// token resolves the same select the connector uses, well before the
    /// full delay elapses.
    #[tokio::test]
    async fn test_backoff_is_cancellable() {
        tokio::time::pause();

        let shutdown = CancellationToken::new();
        let waiter = shutdown.clone();

        let wait = tokio::spawn(async move {
            tokio::select! {
                _ = waiter.cancelled() => true,
                _ = sleep(RECONNECT_DELAY) => false,
            }
        });

        shutdown.cancel();
        assert!(wait.await.unwrap(), "shutdown should interrupt the backoff");
    }

    /// The shutdown drain must terminate even when the broker is
    /// unreachable: polling fails and there is nothing to flush.
    #[tokio::test]
    async fn test_disconnect_drain_terminates_without_broker() {
        // Port 1 refuses connections immediately
        let options = MqttOptions::new("drain-test", "127.0.0.1", 1);
        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let _ = client.disconnect().await;

        let done = tokio::time::timeout(
            Duration::from_secs(10),
            drain_disconnect(&mut eventloop),
        )
        .await;
        assert!(done.is_ok(), "drain must give up once polling fails");
    }
}
