use infrastructure::MqttSender;

use crate::core::{ActuatorSender, unit::OnOff};

/// Switches a Tasmota smart plug through its MQTT command topic.
pub struct TasmotaPowerSender {
    mqtt: MqttSender,
    device_id: String,
}

impl TasmotaPowerSender {
    pub fn new(mqtt: MqttSender, device_id: &str) -> Self {
        Self {
            mqtt,
            device_id: device_id.to_string(),
        }
    }
}

fn power_command(device_id: &str, power: OnOff) -> (String, String) {
    let payload = match power {
        OnOff::On => "ON",
        OnOff::Off => "OFF",
    };

    (format!("cmnd/{}/Power1", device_id), payload.to_string())
}

impl ActuatorSender<OnOff> for TasmotaPowerSender {
    #[tracing::instrument(name = "send TASMOTA", skip(self), fields(device = %self.device_id))]
    async fn send(&self, value: &OnOff) -> anyhow::Result<()> {
        let (suffix, payload) = power_command(&self.device_id, *value);
        self.mqtt.send_transient(self.mqtt.topic(&suffix), payload).await
    }
}
