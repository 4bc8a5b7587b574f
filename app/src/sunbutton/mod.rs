mod decision;

use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Context as _;
use infrastructure::MqttSender;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub use decision::desired_button_state;

use crate::{
    adapter::{
        signal::{HttpSignalSender, Signal, SignalValue as _},
        state_api::{StateAccess, StateAccessError},
        sunrise_sunset::{Coordinates, Daylight, SunKey, SunTimes, SunriseSunsetSource},
        tasmota::TasmotaPowerSender,
    },
    core::{
        ActuatorSender, ControlledAsset, ExternalDataCache, ExternalHttpClient, FeedbackLoop,
        time::{DateTime, Duration},
        unit::OnOff,
    },
};

#[derive(Debug, Clone, Deserialize)]
pub struct SunbuttonSettings {
    pub sun_api_url: String,
    #[serde(default)]
    pub assets: Vec<SunbuttonConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SunbuttonConfig {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub refresh_period: Duration,
    pub plug: PlugConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlugConfig {
    Http { url: String },
    Tasmota { device_id: String },
}

impl SunbuttonSettings {
    /// Spawns one feedback loop per configured asset, all sharing one sun-times cache.
    pub fn start(
        &self,
        client: &ClientWithMiddleware,
        mqtt: Option<&MqttSender>,
        tasks: &mut JoinSet<()>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<Arc<dyn StateAccess>>> {
        let source = SunriseSunsetSource::new(ExternalHttpClient::new(client.clone()), &self.sun_api_url);
        let cache = ExternalDataCache::new(source);
        let mut assets: Vec<Arc<dyn StateAccess>> = Vec::with_capacity(self.assets.len());

        for config in &self.assets {
            let asset = Arc::new(Sunbutton::new(config)?);
            let sender = config.plug.new_sender(client, mqtt)?;
            let feedback = FeedbackLoop::new(asset.clone(), cache.clone(), sender, config.refresh_period)?;

            tasks.spawn(feedback.run(cancel.clone()));
            assets.push(asset);
        }

        Ok(assets)
    }
}

impl PlugConfig {
    fn new_sender(&self, client: &ClientWithMiddleware, mqtt: Option<&MqttSender>) -> anyhow::Result<PlugSender> {
        Ok(match self {
            PlugConfig::Http { url } => PlugSender::Http(HttpSignalSender::new(client.clone(), url)?),
            PlugConfig::Tasmota { device_id } => {
                let mqtt = mqtt.with_context(|| format!("Tasmota plug {} needs an mqtt section", device_id))?;
                PlugSender::Tasmota(TasmotaPowerSender::new(mqtt.clone(), device_id))
            }
        })
    }
}

pub enum PlugSender {
    Http(HttpSignalSender),
    Tasmota(TasmotaPowerSender),
}

impl ActuatorSender<OnOff> for PlugSender {
    async fn send(&self, value: &OnOff) -> anyhow::Result<()> {
        match self {
            PlugSender::Http(sender) => sender.send(value).await,
            PlugSender::Tasmota(sender) => sender.send(value).await,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    daylight: Daylight,
    state: OnOff,
}

/// Smart plug that is switched on between sunset and sunrise at its location.
pub struct Sunbutton {
    name: String,
    coordinates: RwLock<Coordinates>,
    observed: RwLock<Option<Observation>>,
}

impl Sunbutton {
    pub fn new(config: &SunbuttonConfig) -> anyhow::Result<Self> {
        Ok(Self {
            name: config.name.clone(),
            coordinates: RwLock::new(Coordinates::new(config.latitude, config.longitude)?),
            observed: RwLock::new(None),
        })
    }

    fn coordinates(&self) -> Coordinates {
        *self.coordinates.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn observed(&self, property: &str) -> Result<Observation, StateAccessError> {
        let observed = *self.observed.read().unwrap_or_else(PoisonError::into_inner);
        observed.ok_or_else(|| StateAccessError::not_available(property))
    }

    fn move_to(
        &self,
        property: &str,
        f: impl FnOnce(&Coordinates) -> anyhow::Result<Coordinates>,
    ) -> Result<(), StateAccessError> {
        let mut coordinates = self.coordinates.write().unwrap_or_else(PoisonError::into_inner);
        *coordinates = f(&coordinates).map_err(|e| StateAccessError::invalid(property, e))?;
        Ok(())
    }
}

impl ControlledAsset for Sunbutton {
    type Key = SunKey;
    type Record = SunTimes;
    type Value = OnOff;

    fn name(&self) -> &str {
        &self.name
    }

    fn refresh_key(&self, now: &DateTime) -> SunKey {
        let coordinates = self.coordinates();

        SunKey {
            date: coordinates.solar_date(now),
            coordinates,
        }
    }

    fn decide(&self, record: &SunTimes, now: &DateTime) -> anyhow::Result<OnOff> {
        Ok(match &record.daylight {
            Daylight::Between { sunrise, sunset } => desired_button_state(sunrise, sunset, now),
            Daylight::PolarDay => OnOff::Off,
            Daylight::PolarNight => OnOff::On,
        })
    }

    fn observe(&self, record: &SunTimes, desired: &OnOff, _now: &DateTime) {
        *self.observed.write().unwrap_or_else(PoisonError::into_inner) = Some(Observation {
            daylight: record.daylight,
            state: *desired,
        });
    }
}

impl StateAccess for Sunbutton {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_state(&self, property: &str) -> Result<Signal, StateAccessError> {
        //local time of day, none on days the sun does not cross the horizon
        let hours = |pick: fn(&DateTime, &DateTime) -> DateTime| -> Result<Signal, StateAccessError> {
            match self.observed(property)?.daylight {
                Daylight::Between { sunrise, sunset } => {
                    Ok(Signal::new(pick(&sunrise, &sunset).time().as_hours_f64(), "hours"))
                }
                Daylight::PolarDay | Daylight::PolarNight => Err(StateAccessError::not_available(property)),
            }
        };

        let signal = match property {
            "latitude" => Signal::new(self.coordinates().latitude(), "degree"),
            "longitude" => Signal::new(self.coordinates().longitude(), "degree"),
            "sunrise" => hours(|sunrise, _| *sunrise)?,
            "sunset" => hours(|_, sunset| *sunset)?,
            "button_state" => self.observed(property)?.state.to_signal(),
            _ => return Err(StateAccessError::unknown(property)),
        };

        Ok(signal)
    }

    fn set_state(&self, property: &str, value: f64) -> Result<(), StateAccessError> {
        match property {
            "latitude" => self.move_to(property, |c| c.with_latitude(value)),
            "longitude" => self.move_to(property, |c| c.with_longitude(value)),
            "sunrise" | "sunset" | "button_state" => Err(StateAccessError::read_only(property)),
            _ => Err(StateAccessError::unknown(property)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapter::sunrise_sunset::tests::response,
        core::{TickOutcome, feedback::tests::RecordingSender, source::tests::FakeHttp, time::FIXED_NOW},
    };

    fn config() -> SunbuttonConfig {
        SunbuttonConfig {
            name: "porch".to_string(),
            latitude: 56.05,
            longitude: 12.69,
            refresh_period: Duration::seconds(60),
            plug: PlugConfig::Tasmota {
                device_id: "plug_porch".to_string(),
            },
        }
    }

    fn sun_times(daylight: Daylight) -> SunTimes {
        SunTimes {
            key: SunKey {
                date: chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                coordinates: Coordinates::new(56.05, 12.69).unwrap(),
            },
            daylight,
            day_length_secs: 0,
        }
    }

    fn between(sunrise: &str, sunset: &str) -> Daylight {
        Daylight::Between {
            sunrise: DateTime::from_iso(sunrise).unwrap(),
            sunset: DateTime::from_iso(sunset).unwrap(),
        }
    }

    #[test]
    fn invalid_coordinates_are_rejected() {
        let config = SunbuttonConfig {
            latitude: 91.0,
            ..config()
        };

        assert!(Sunbutton::new(&config).is_err());
    }

    #[test]
    fn decides_between_sunrise_and_sunset() {
        let asset = Sunbutton::new(&config()).unwrap();
        let record = sun_times(between("2024-06-01T08:00:00+02:00", "2024-06-01T20:00:00+02:00"));

        let noon = DateTime::from_iso("2024-06-01T12:00:00+02:00").unwrap();
        let night = DateTime::from_iso("2024-06-01T22:00:00+02:00").unwrap();

        assert_eq!(asset.decide(&record, &noon).unwrap(), OnOff::Off);
        assert_eq!(asset.decide(&record, &night).unwrap(), OnOff::On);
    }

    #[test]
    fn polar_days_keep_the_plug_in_one_state() {
        let asset = Sunbutton::new(&config()).unwrap();
        let now = DateTime::from_iso("2024-06-01T12:00:00+02:00").unwrap();

        assert_eq!(asset.decide(&sun_times(Daylight::PolarDay), &now).unwrap(), OnOff::Off);
        assert_eq!(asset.decide(&sun_times(Daylight::PolarNight), &now).unwrap(), OnOff::On);

        asset.observe(&sun_times(Daylight::PolarNight), &OnOff::On, &now);
        assert_eq!(asset.get_state("button_state").unwrap().value, 1.0);
        assert!(matches!(
            asset.get_state("sunrise"),
            Err(StateAccessError::NotAvailable { .. })
        ));
    }

    #[test]
    fn moving_changes_the_refresh_key() {
        let asset = Sunbutton::new(&config()).unwrap();
        let now = DateTime::from_iso("2024-06-01T12:00:00+02:00").unwrap();
        let before = asset.refresh_key(&now);

        asset.set_state("latitude", 59.33).unwrap();

        assert_ne!(asset.refresh_key(&now), before);
        assert_eq!(asset.get_state("latitude").unwrap().value, 59.33);
        assert!(matches!(
            asset.set_state("longitude", 200.0),
            Err(StateAccessError::InvalidValue { .. })
        ));
        assert_eq!(asset.get_state("longitude").unwrap().value, 12.69);
    }

    #[test]
    fn observed_values_are_read_only() {
        let asset = Sunbutton::new(&config()).unwrap();

        assert!(matches!(
            asset.set_state("sunset", 18.0),
            Err(StateAccessError::ReadOnly { .. })
        ));
        assert!(matches!(
            asset.get_state("button_state"),
            Err(StateAccessError::NotAvailable { .. })
        ));
    }

    #[test]
    fn plug_config_by_type() {
        let http: PlugConfig =
            serde_json::from_str(r#"{"type": "http", "url": "http://localhost:8670/plug/porch/state"}"#).unwrap();
        let tasmota: PlugConfig = serde_json::from_str(r#"{"type": "tasmota", "device_id": "plug_porch"}"#).unwrap();

        assert!(matches!(http, PlugConfig::Http { .. }));
        assert!(matches!(tasmota, PlugConfig::Tasmota { device_id } if device_id == "plug_porch"));
    }

    #[tokio::test]
    async fn feedback_loop_switches_plug_at_night() {
        let sunrise = "2024-01-15T07:27:00+01:00";
        let sunset = "2024-01-15T15:32:00+01:00";
        let now = DateTime::from_iso("2024-01-15T21:00:00+01:00").unwrap();

        let asset = Arc::new(Sunbutton::new(&config()).unwrap());
        let http = FakeHttp::with_body(200, &response(sunrise, sunset));
        let cache = ExternalDataCache::new(SunriseSunsetSource::new(http, "https://api.sunrise-sunset.org/json"));
        let sender = RecordingSender::default();
        let mut feedback = FeedbackLoop::new(asset.clone(), cache, sender.clone(), Duration::seconds(60)).unwrap();

        let outcome = FIXED_NOW.scope(now, feedback.tick(&CancellationToken::new())).await;

        assert_eq!(outcome, TickOutcome::Sent);
        assert_eq!(sender.sent(), vec![1.0]);
        assert_eq!(asset.get_state("button_state").unwrap().value, 1.0);
        assert_eq!(
            asset.get_state("sunrise").unwrap().value,
            DateTime::from_iso(sunrise).unwrap().time().as_hours_f64()
        );
    }

    #[tokio::test]
    async fn daylight_spanning_utc_midnight_keeps_plug_off() {
        let config = SunbuttonConfig {
            name: "sf".to_string(),
            latitude: 37.7749,
            longitude: -122.4194,
            plug: PlugConfig::Http {
                url: "http://localhost:8671/plug/sf/state".to_string(),
            },
            ..config()
        };
        let asset = Arc::new(Sunbutton::new(&config).unwrap());
        let http = FakeHttp::with_body(200, &response("2024-06-01T12:48:00+00:00", "2024-06-02T03:27:00+00:00"));
        let cache = ExternalDataCache::new(SunriseSunsetSource::new(http, "https://api.sunrise-sunset.org/json"));
        let sender = RecordingSender::default();
        let mut feedback = FeedbackLoop::new(asset, cache.clone(), sender.clone(), Duration::seconds(60)).unwrap();

        let outcome = FIXED_NOW
            .scope(
                DateTime::from_iso("2024-06-01T20:00:00Z").unwrap(),
                feedback.tick(&CancellationToken::new()),
            )
            .await;

        assert_eq!(outcome, TickOutcome::Sent);
        assert_eq!(sender.sent(), vec![0.0]);
        assert_eq!(
            cache.source().http().requested(),
            vec![
                "https://api.sunrise-sunset.org/json?lat=37.774900&lng=-122.419400&date=2024-06-01&formatted=0"
                    .to_string()
            ]
        );
    }
}
