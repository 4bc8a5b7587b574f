mod decision;

use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Context as _;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub use decision::{ComfortRange, desired_temperature};

use crate::{
    adapter::{
        signal::{HttpSignalSender, Signal, SignalValue as _},
        spot_price::{DailySpotPrices, PriceArea, PriceKey, SpotPriceSource},
        state_api::{StateAccess, StateAccessError},
    },
    core::{
        ControlledAsset, ExternalDataCache, ExternalHttpClient, FeedbackLoop,
        time::{DateTime, Duration},
        unit::{DegreeCelsius, PricePerKwh},
    },
};

#[derive(Debug, Clone, Deserialize)]
pub struct ComfortstatSettings {
    pub price_api_url: String,
    #[serde(default)]
    pub assets: Vec<ComfortstatConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComfortstatConfig {
    pub name: String,
    pub price_area: PriceArea,
    pub refresh_period: Duration,
    pub min_price: f64,
    pub max_price: f64,
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub thermostat_url: String,
}

impl ComfortstatSettings {
    /// Spawns one feedback loop per configured asset, all sharing one price cache.
    pub fn start(
        &self,
        client: &ClientWithMiddleware,
        tasks: &mut JoinSet<()>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<Arc<dyn StateAccess>>> {
        let source = SpotPriceSource::new(ExternalHttpClient::new(client.clone()), &self.price_api_url);
        let cache = ExternalDataCache::new(source);
        let mut assets: Vec<Arc<dyn StateAccess>> = Vec::with_capacity(self.assets.len());

        for config in &self.assets {
            let asset = Arc::new(Comfortstat::new(config)?);
            let sender = HttpSignalSender::new(client.clone(), &config.thermostat_url)?;
            let feedback = FeedbackLoop::new(asset.clone(), cache.clone(), sender, config.refresh_period)?;

            tasks.spawn(feedback.run(cancel.clone()));
            assets.push(asset);
        }

        Ok(assets)
    }
}

#[derive(Debug, Clone, Copy)]
struct ComfortSettings {
    range: ComfortRange,
    user_temperature: Option<DegreeCelsius>,
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    price: PricePerKwh,
    desired: DegreeCelsius,
}

/// Thermostat setpoint driven by the spot price of its price area.
pub struct Comfortstat {
    name: String,
    area: PriceArea,
    settings: RwLock<ComfortSettings>,
    observed: RwLock<Option<Observation>>,
}

impl Comfortstat {
    pub fn new(config: &ComfortstatConfig) -> anyhow::Result<Self> {
        let range = ComfortRange {
            min_price: PricePerKwh(config.min_price),
            max_price: PricePerKwh(config.max_price),
            min_temperature: DegreeCelsius(config.min_temperature),
            max_temperature: DegreeCelsius(config.max_temperature),
        };

        check_range(&range).with_context(|| format!("Invalid thresholds of comfortstat {}", config.name))?;

        Ok(Self {
            name: config.name.clone(),
            area: config.price_area,
            settings: RwLock::new(ComfortSettings {
                range,
                user_temperature: None,
            }),
            observed: RwLock::new(None),
        })
    }

    fn settings(&self) -> ComfortSettings {
        *self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn observed(&self) -> Option<Observation> {
        *self.observed.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_range(&self, property: &str, f: impl FnOnce(&mut ComfortRange)) -> Result<(), StateAccessError> {
        let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);

        let mut range = settings.range;
        f(&mut range);
        check_range(&range).map_err(|e| StateAccessError::invalid(property, e))?;

        settings.range = range;
        Ok(())
    }
}

fn check_range(range: &ComfortRange) -> anyhow::Result<()> {
    let values = [
        range.min_price.0,
        range.max_price.0,
        range.min_temperature.0,
        range.max_temperature.0,
    ];
    if values.iter().any(|v| !v.is_finite()) {
        anyhow::bail!("thresholds must be finite numbers");
    }

    if range.min_temperature > range.max_temperature {
        anyhow::bail!(
            "min temperature {} above max temperature {}",
            range.min_temperature,
            range.max_temperature
        );
    }

    if range.min_price > range.max_price {
        anyhow::bail!("min price {} above max price {}", range.min_price, range.max_price);
    }

    Ok(())
}

impl ControlledAsset for Comfortstat {
    type Key = PriceKey;
    type Record = DailySpotPrices;
    type Value = DegreeCelsius;

    fn name(&self) -> &str {
        &self.name
    }

    fn refresh_key(&self, now: &DateTime) -> PriceKey {
        PriceKey::covering(now, self.area)
    }

    fn decide(&self, record: &DailySpotPrices, now: &DateTime) -> anyhow::Result<DegreeCelsius> {
        let price = record
            .price_at(now)
            .with_context(|| format!("No spot price of {} covers {}", self.area, now))?
            .price();

        let settings = self.settings();

        Ok(match settings.user_temperature {
            Some(user) => user,
            None => desired_temperature(price, &settings.range),
        })
    }

    fn observe(&self, record: &DailySpotPrices, desired: &DegreeCelsius, now: &DateTime) {
        if let Some(spot) = record.price_at(now) {
            *self.observed.write().unwrap_or_else(PoisonError::into_inner) = Some(Observation {
                price: spot.price(),
                desired: *desired,
            });
        }
    }
}

impl StateAccess for Comfortstat {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_state(&self, property: &str) -> Result<Signal, StateAccessError> {
        let settings = self.settings();
        let price = |p: PricePerKwh| Signal::new(p.0, "SEK/kWh");

        let signal = match property {
            "min_price" => price(settings.range.min_price),
            "max_price" => price(settings.range.max_price),
            "min_temperature" => settings.range.min_temperature.to_signal(),
            "max_temperature" => settings.range.max_temperature.to_signal(),
            "user_temperature" => settings.user_temperature.unwrap_or_default().to_signal(),
            "current_price" => price(
                self.observed()
                    .ok_or_else(|| StateAccessError::not_available(property))?
                    .price,
            ),
            "desired_temperature" => self
                .observed()
                .ok_or_else(|| StateAccessError::not_available(property))?
                .desired
                .to_signal(),
            _ => return Err(StateAccessError::unknown(property)),
        };

        Ok(signal)
    }

    fn set_state(&self, property: &str, value: f64) -> Result<(), StateAccessError> {
        match property {
            "min_price" => self.update_range(property, |r| r.min_price = PricePerKwh(value)),
            "max_price" => self.update_range(property, |r| r.max_price = PricePerKwh(value)),
            "min_temperature" => self.update_range(property, |r| r.min_temperature = DegreeCelsius(value)),
            "max_temperature" => self.update_range(property, |r| r.max_temperature = DegreeCelsius(value)),
            "user_temperature" => {
                let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);

                //zero hands control back to the price
                if value == 0.0 {
                    settings.user_temperature = None;
                    return Ok(());
                }

                let range = settings.range;
                if !(range.min_temperature.0..=range.max_temperature.0).contains(&value) {
                    return Err(StateAccessError::invalid(
                        property,
                        format!(
                            "{} outside of {} to {}",
                            value, range.min_temperature, range.max_temperature
                        ),
                    ));
                }

                settings.user_temperature = Some(DegreeCelsius(value));
                Ok(())
            }
            "current_price" | "desired_temperature" => Err(StateAccessError::read_only(property)),
            _ => Err(StateAccessError::unknown(property)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapter::spot_price::tests::{PRICES_2024_01_15, key},
        core::{
            ExternalSource as _, TickOutcome, feedback::tests::RecordingSender,
            source::tests::FakeHttp,
            time::FIXED_NOW,
        },
    };

    fn config() -> ComfortstatConfig {
        ComfortstatConfig {
            name: "livingroom".to_string(),
            price_area: PriceArea::SE3,
            refresh_period: Duration::seconds(30),
            min_price: 1.0,
            max_price: 3.0,
            min_temperature: 17.0,
            max_temperature: 28.0,
            thermostat_url: "http://localhost:8670/thermostat/livingroom/setpoint".to_string(),
        }
    }

    async fn prices() -> DailySpotPrices {
        SpotPriceSource::new(FakeHttp::with_body(200, PRICES_2024_01_15), "https://prices.test")
            .fetch(&key())
            .await
            .unwrap()
    }

    fn at(iso: &str) -> DateTime {
        DateTime::from_iso(iso).unwrap()
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let config = ComfortstatConfig {
            min_temperature: 30.0,
            ..config()
        };

        assert!(Comfortstat::new(&config).is_err());
    }

    #[tokio::test]
    async fn decides_on_price_covering_now() {
        let asset = Comfortstat::new(&config()).unwrap();
        let prices = prices().await;

        assert_eq!(asset.decide(&prices, &at("2024-01-15T00:30:00+01:00")).unwrap(), DegreeCelsius(28.0));
        assert_eq!(asset.decide(&prices, &at("2024-01-15T01:30:00+01:00")).unwrap(), DegreeCelsius(28.0 - 11.0 * 0.125));
        assert!(asset.decide(&prices, &at("2024-01-15T05:00:00+01:00")).is_err());
    }

    #[tokio::test]
    async fn user_temperature_overrides_price_until_cleared() {
        let asset = Comfortstat::new(&config()).unwrap();
        let prices = prices().await;
        let now = at("2024-01-15T00:30:00+01:00");

        asset.set_state("user_temperature", 19.5).unwrap();
        assert_eq!(asset.decide(&prices, &now).unwrap(), DegreeCelsius(19.5));
        assert_eq!(asset.get_state("user_temperature").unwrap().value, 19.5);

        asset.set_state("user_temperature", 0.0).unwrap();
        assert_eq!(asset.decide(&prices, &now).unwrap(), DegreeCelsius(28.0));
    }

    #[test]
    fn user_temperature_must_be_within_temperature_band() {
        let asset = Comfortstat::new(&config()).unwrap();
        asset.set_state("user_temperature", 21.0).unwrap();

        for value in [35.0, -5.0, 16.9, f64::NAN] {
            assert!(matches!(
                asset.set_state("user_temperature", value),
                Err(StateAccessError::InvalidValue { .. })
            ));
        }
        assert_eq!(asset.get_state("user_temperature").unwrap().value, 21.0);

        asset.set_state("user_temperature", 28.0).unwrap();
        assert_eq!(asset.get_state("user_temperature").unwrap().value, 28.0);
    }

    #[test]
    fn threshold_setters_are_validated() {
        let asset = Comfortstat::new(&config()).unwrap();

        asset.set_state("max_price", 4.0).unwrap();
        assert_eq!(asset.get_state("max_price").unwrap().value, 4.0);
        assert_eq!(asset.get_state("max_price").unwrap().unit, "SEK/kWh");

        assert!(matches!(
            asset.set_state("min_temperature", 29.0),
            Err(StateAccessError::InvalidValue { .. })
        ));
        assert_eq!(asset.get_state("min_temperature").unwrap().value, 17.0);

        assert!(matches!(
            asset.set_state("current_price", 1.0),
            Err(StateAccessError::ReadOnly { .. })
        ));
        assert!(matches!(
            asset.get_state("humidity"),
            Err(StateAccessError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn observed_values_unavailable_before_first_decision() {
        let asset = Comfortstat::new(&config()).unwrap();

        assert!(matches!(
            asset.get_state("current_price"),
            Err(StateAccessError::NotAvailable { .. })
        ));
    }

    #[tokio::test]
    async fn feedback_loop_sets_thermostat_from_price() {
        let asset = Arc::new(Comfortstat::new(&config()).unwrap());
        let http = FakeHttp::with_body(200, PRICES_2024_01_15);
        let cache = ExternalDataCache::new(SpotPriceSource::new(http, "https://prices.test"));
        let sender = RecordingSender::default();
        let mut feedback = FeedbackLoop::new(asset.clone(), cache.clone(), sender.clone(), Duration::seconds(30)).unwrap();
        let cancel = CancellationToken::new();

        let outcomes = FIXED_NOW
            .scope(at("2024-01-15T02:05:00+01:00"), async {
                vec![feedback.tick(&cancel).await, feedback.tick(&cancel).await]
            })
            .await;

        assert_eq!(outcomes, vec![TickOutcome::Sent, TickOutcome::Skipped]);
        assert_eq!(sender.sent(), vec![22.5]);
        assert_eq!(cache.source().http().calls(), 1);
        assert_eq!(asset.get_state("current_price").unwrap().value, 2.0);
        assert_eq!(asset.get_state("desired_temperature").unwrap().value, 22.5);
    }

    #[tokio::test]
    async fn feedback_loop_uses_swedish_day_after_midnight() {
        let prices_2024_01_16 = r#"[
            {"SEK_per_kWh":0.5,"EUR_per_kWh":0.0438,"EXR":11.41,"time_start":"2024-01-16T00:00:00+01:00","time_end":"2024-01-16T01:00:00+01:00"}
        ]"#;
        let asset = Arc::new(Comfortstat::new(&config()).unwrap());
        let cache = ExternalDataCache::new(SpotPriceSource::new(
            FakeHttp::with_body(200, prices_2024_01_16),
            "https://prices.test",
        ));
        let sender = RecordingSender::default();
        let mut feedback = FeedbackLoop::new(asset, cache.clone(), sender.clone(), Duration::seconds(30)).unwrap();

        let outcome = FIXED_NOW
            .scope(at("2024-01-15T23:30:00Z"), feedback.tick(&CancellationToken::new()))
            .await;

        assert_eq!(outcome, TickOutcome::Sent);
        assert_eq!(
            cache.source().http().requested(),
            vec!["https://prices.test/2024/01-16_SE3.json".to_string()]
        );
        assert_eq!(sender.sent(), vec![28.0]);
    }
}
