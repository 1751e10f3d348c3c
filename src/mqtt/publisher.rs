//! Outbound command publisher
//!
//! Drains wire commands from the engine and fires them at the broker.
//! Publishes are fire-and-forget: a failure is reported on the status
//! line and the command dropped, never retried.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::dispatch::WireCommand;

use super::client::MqttClient;
use super::connector::ConnectorEvent;

/// Timeout for individual MQTT publish operations.
///
/// Prevents the pipeline from blocking indefinitely when the MQTT
/// client's internal channel is full (e.g. during a broker outage).
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the publisher task until shutdown or channel close
///
/// Failures are fed back through `event_tx` so the engine can surface
/// them to the operator, alongside the log entry.
pub async fn run_publisher(
    client: Arc<MqttClient>,
    mut command_rx: mpsc::Receiver<WireCommand>,
    event_tx: mpsc::Sender<ConnectorEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Publisher shutting down");
                return;
            }
            command = command_rx.recv() => match command {
                Some(command) => command,
                None => {
                    warn!("Command channel closed");
                    return;
                }
            },
        };

        let detail = match timeout(
            PUBLISH_TIMEOUT,
            client.publish(&command.topic, &command.payload),
        )
        .await
        {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => {
                error!("Failed to publish {} to {}: {}", command.payload, command.topic, e);
                format!("{} to {}: {}", command.payload, command.topic, e)
            }
            Err(_) => {
                warn!(
                    "Publish to {} timed out after {}s - MQTT client may be stalled",
                    command.topic,
                    PUBLISH_TIMEOUT.as_secs()
                );
                format!(
                    "{} to {}: timed out after {}s",
                    command.payload,
                    command.topic,
                    PUBLISH_TIMEOUT.as_secs()
                )
            }
        };

        if event_tx
            .send(ConnectorEvent::PublishFailed(detail))
            .await
            .is_err()
        {
            warn!("Engine dropped its event receiver");
        }
    }
}
