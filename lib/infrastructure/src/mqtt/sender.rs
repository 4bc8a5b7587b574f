use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use rumqttc::v5::{mqttbytes::QoS, AsyncClient};

/// Publishes below a base topic. A publish succeeds once the message is queued for a
/// connected broker; the QoS 1 acknowledgement is not awaited.
#[derive(Clone)]
pub struct MqttSender {
    client: Arc<AsyncClient>,
    base_topic: String,
    connected: Arc<AtomicBool>,
    publish_timeout: Duration,
}

impl MqttSender {
    pub(super) fn new(
        client: Arc<AsyncClient>,
        base_topic: String,
        connected: Arc<AtomicBool>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_topic,
            connected,
            publish_timeout,
        }
    }

    pub fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.base_topic, suffix.trim_start_matches('/'))
    }

    #[tracing::instrument(skip_all, fields(topic = %topic, otel.name = format!("MQTT publish {}", topic)))]
    pub async fn send_transient(&self, topic: String, payload: String) -> anyhow::Result<()> {
        if !self.connected.load(Ordering::Acquire) {
            tracing::warn!("MQTT broker not connected, not publishing to {}", topic);
            anyhow::bail!("MQTT broker not connected, not publishing to {}", topic);
        }

        tracing::debug!("Publishing MQTT message to {topic}: {:?}", payload);

        let publish = self.client.publish(topic.clone(), QoS::AtLeastOnce, false, payload);

        match tokio::time::timeout(self.publish_timeout, publish).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!("Error publishing MQTT message to {}: {}", topic, e);
                Err(e.into())
            }
            Err(_) => {
                tracing::error!("Publishing MQTT message to {} timed out, outgoing queue is full", topic);
                anyhow::bail!("Timeout publishing MQTT message to {}", topic)
            }
        }
    }
}
