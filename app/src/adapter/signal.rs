use anyhow::Context as _;
use reqwest::Url;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};

use crate::core::{
    ActuatorSender,
    time::DateTime,
    unit::{DegreeCelsius, OnOff},
};

pub const SIGNAL_VERSION: &str = "SignalA_v1.0";

/// Value envelope exchanged with consumed services and state-access clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime,
    pub version: String,
}

impl Signal {
    pub fn new(value: f64, unit: &str) -> Self {
        Self {
            value,
            unit: unit.to_string(),
            timestamp: DateTime::now(),
            version: SIGNAL_VERSION.to_string(),
        }
    }
}

/// Incoming signal of a write. Only the value is used.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalInput {
    pub value: f64,
}

pub trait SignalValue {
    fn to_signal(&self) -> Signal;
}

impl SignalValue for DegreeCelsius {
    fn to_signal(&self) -> Signal {
        Signal::new(self.0, "Celsius")
    }
}

impl SignalValue for OnOff {
    fn to_signal(&self) -> Signal {
        Signal::new((*self).into(), "binary")
    }
}

/// Sends the desired value as signal to a consumed service with `PUT`.
#[derive(Debug, Clone)]
pub struct HttpSignalSender {
    client: ClientWithMiddleware,
    url: Url,
}

impl HttpSignalSender {
    pub fn new(client: ClientWithMiddleware, url: &str) -> anyhow::Result<Self> {
        let url = Url::parse(url).with_context(|| format!("Invalid actuator URL {}", url))?;
        Ok(Self { client, url })
    }
}

impl<V: SignalValue + Send + Sync + 'static> ActuatorSender<V> for HttpSignalSender {
    #[tracing::instrument(skip_all, fields(url = %self.url))]
    async fn send(&self, value: &V) -> anyhow::Result<()> {
        let signal = value.to_signal();

        let response = self
            .client
            .put(self.url.clone())
            .json(&signal)
            .send()
            .await
            .with_context(|| format!("Error sending signal to {}", self.url))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            anyhow::bail!("Signal rejected by {} with status {}: {}", self.url, status, body);
        }

        tracing::debug!("Signal {} {} accepted by {}", signal.value, signal.unit, self.url);
        Ok(())
    }
}
