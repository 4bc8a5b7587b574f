use std::{fmt::Display, sync::Arc};

use chrono::{Datelike, NaiveDate};
use serde::Deserialize;

use crate::core::{
    ExternalSource, FetchError, HttpGet, RefreshKey,
    source::fetch_json,
    time::DateTime,
    unit::PricePerKwh,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum PriceArea {
    SE1,
    SE2,
    SE3,
    SE4,
}

impl Display for PriceArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let area = match self {
            PriceArea::SE1 => "SE1",
            PriceArea::SE2 => "SE2",
            PriceArea::SE3 => "SE3",
            PriceArea::SE4 => "SE4",
        };
        write!(f, "{}", area)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PriceKey {
    pub date: NaiveDate,
    pub area: PriceArea,
}

/// Price lists are published per Swedish calendar day, whatever zone the service runs in.
pub const PRICE_ZONE: chrono_tz::Tz = chrono_tz::Europe::Stockholm;

impl PriceKey {
    pub fn new(date: NaiveDate, area: PriceArea) -> Self {
        Self { date, area }
    }

    /// Key of the price list that covers `now`.
    pub fn covering(now: &DateTime, area: PriceArea) -> Self {
        Self::new(now.date_in(&PRICE_ZONE), area)
    }
}

impl RefreshKey for PriceKey {
    fn valid_on(&self) -> NaiveDate {
        self.date
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpotPrice {
    #[serde(rename = "SEK_per_kWh")]
    pub sek_per_kwh: f64,
    #[serde(rename = "EUR_per_kWh")]
    pub eur_per_kwh: f64,
    #[serde(rename = "EXR")]
    pub exchange_rate: f64,
    pub time_start: DateTime,
    pub time_end: DateTime,
}

impl SpotPrice {
    pub fn covers(&self, at: &DateTime) -> bool {
        self.time_start <= *at && *at < self.time_end
    }

    pub fn price(&self) -> PricePerKwh {
        PricePerKwh(self.sek_per_kwh)
    }
}

/// All published prices of one area and day, hourly or quarter-hourly.
#[derive(Debug, Clone)]
pub struct DailySpotPrices {
    pub key: PriceKey,
    pub prices: Arc<[SpotPrice]>,
}

impl DailySpotPrices {
    pub fn price_at(&self, at: &DateTime) -> Option<&SpotPrice> {
        self.prices.iter().find(|p| p.covers(at))
    }
}

pub struct SpotPriceSource<H: HttpGet> {
    http: H,
    base_url: String,
}

impl<H: HttpGet> SpotPriceSource<H> {
    pub fn new(http: H, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn http(&self) -> &H {
        &self.http
    }

    fn url(&self, key: &PriceKey) -> String {
        format!(
            "{}/{}/{:02}-{:02}_{}.json",
            self.base_url,
            key.date.year(),
            key.date.month(),
            key.date.day(),
            key.area
        )
    }
}

impl<H: HttpGet> ExternalSource for SpotPriceSource<H> {
    type Key = PriceKey;
    type Record = DailySpotPrices;

    fn name(&self) -> &'static str {
        "spot_price"
    }

    async fn fetch(&self, key: &PriceKey) -> Result<DailySpotPrices, FetchError> {
        let url = self.url(key);
        let prices: Vec<SpotPrice> = fetch_json(&self.http, &url).await?;

        if prices.is_empty() {
            return Err(FetchError::parse(url, "empty price list"));
        }

        tracing::info!("Fetched {} spot prices for {} on {}", prices.len(), key.area, key.date);

        Ok(DailySpotPrices {
            key: key.clone(),
            prices: prices.into(),
        })
    }
}
