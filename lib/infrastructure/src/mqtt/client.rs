use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use rumqttc::v5::{
    mqttbytes::v5::{ConnectProperties, Packet},
    AsyncClient, Event, EventLoop, MqttOptions,
};
use tokio_util::sync::CancellationToken;

use super::MqttSender;

pub struct Mqtt {
    client: Arc<AsyncClient>,
    event_loop: EventLoop,
    base_topic: String,
    connected: Arc<AtomicBool>,
    publish_timeout: Duration,
}

impl Mqtt {
    pub fn connect(host: &str, port: u16, client_id: &str, base_topic: &str, publish_timeout: Duration) -> Self {
        let mut mqttoptions = MqttOptions::new(client_id, host, port);
        mqttoptions.set_keep_alive(Duration::from_secs(5));
        mqttoptions.set_clean_start(true);

        let mut connect_props = ConnectProperties::new();
        connect_props.max_packet_size = Some(64 * 1024);
        mqttoptions.set_connect_properties(connect_props);

        let (client, event_loop) = AsyncClient::new(mqttoptions, 10);

        Mqtt {
            client: Arc::new(client),
            event_loop,
            base_topic: base_topic.trim_end_matches('/').to_string(),
            connected: Arc::new(AtomicBool::new(false)),
            publish_timeout,
        }
    }

    pub fn sender(&self) -> MqttSender {
        MqttSender::new(
            self.client.clone(),
            self.base_topic.clone(),
            self.connected.clone(),
            self.publish_timeout,
        )
    }

    //Only outgoing traffic is used, but the event loop must be polled for publishes to leave the client
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.connected.store(false, Ordering::Release);
                    if let Err(e) = self.client.disconnect().await {
                        tracing::warn!("Error disconnecting MQTT client: {}", e);
                    }
                    return;
                }
                event = self.event_loop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            tracing::info!("Connected to MQTT broker");
                            self.connected.store(true, Ordering::Release);
                        }
                        Ok(Event::Incoming(Packet::Disconnect(_))) => {
                            tracing::warn!("Disconnected by MQTT broker");
                            self.connected.store(false, Ordering::Release);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!("MQTT error: {}", e);
                            self.connected.store(false, Ordering::Release);
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    }
}
