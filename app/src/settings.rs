use config::{Config, ConfigError, Environment, File};
use infrastructure::{HttpClientConfig, HttpServerConfig, MonitoringConfig, MqttConfig};
use serde::Deserialize;

use crate::{comfortstat::ComfortstatSettings, sunbutton::SunbuttonSettings};

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub http_server: HttpServerConfig,
    #[serde(default)]
    pub http_client: HttpClientConfig,
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
    pub comfortstat: ComfortstatSettings,
    pub sunbutton: SunbuttonSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::build(File::with_name("config.toml"))
    }

    #[cfg(test)]
    fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        Self::build(File::from_str(toml, config::FileFormat::Toml))
    }

    fn build<S>(file: S) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let builder = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("UNIT_ASSETS").separator("__"));

        builder.build()?.try_deserialize()
    }
}
