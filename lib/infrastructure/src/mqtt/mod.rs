mod client;
mod sender;

pub use client::Mqtt;
pub use sender::MqttSender;

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    host: String,
    port: u16,
    client_id: String,
    base_topic: String,
    #[serde(default = "default_publish_timeout_secs")]
    publish_timeout_secs: u64,
}

fn default_publish_timeout_secs() -> u64 {
    5
}

impl MqttConfig {
    pub fn new_client(&self) -> Mqtt {
        Mqtt::connect(
            &self.host,
            self.port,
            &self.client_id,
            &self.base_topic,
            std::time::Duration::from_secs(self.publish_timeout_secs),
        )
    }
}
