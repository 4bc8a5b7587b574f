use chrono::{Datelike as _, FixedOffset, NaiveDate};
use serde::Deserialize;

use crate::core::{
    ExternalSource, FetchError, HttpGet, RefreshKey,
    source::fetch_json,
    time::DateTime,
};

const MICROS: f64 = 1_000_000.0;
const SECONDS_PER_DEGREE: f64 = 240.0;

/// Position with micro-degree resolution, so it can be part of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Coordinates {
    lat_micros: i64,
    lng_micros: i64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> anyhow::Result<Self> {
        if !(-90.0..=90.0).contains(&latitude) {
            anyhow::bail!("Latitude {} out of range", latitude);
        }
        if !(-180.0..=180.0).contains(&longitude) {
            anyhow::bail!("Longitude {} out of range", longitude);
        }

        Ok(Self {
            lat_micros: (latitude * MICROS).round() as i64,
            lng_micros: (longitude * MICROS).round() as i64,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.lat_micros as f64 / MICROS
    }

    pub fn longitude(&self) -> f64 {
        self.lng_micros as f64 / MICROS
    }

    pub fn with_latitude(&self, latitude: f64) -> anyhow::Result<Self> {
        Self::new(latitude, self.longitude())
    }

    pub fn with_longitude(&self, longitude: f64) -> anyhow::Result<Self> {
        Self::new(self.latitude(), longitude)
    }

    /// Calendar day at this position by mean solar time, independent of the zone the
    /// service runs in.
    pub fn solar_date(&self, now: &DateTime) -> NaiveDate {
        let offset_secs = (self.longitude() * SECONDS_PER_DEGREE).round() as i32;

        match FixedOffset::east_opt(offset_secs) {
            Some(offset) => now.date_in(&offset),
            None => now.date_in(&chrono::Utc),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SunKey {
    pub date: NaiveDate,
    pub coordinates: Coordinates,
}

impl RefreshKey for SunKey {
    fn valid_on(&self) -> NaiveDate {
        self.date
    }

    //positions far apart are on different days for hours, they must not evict each other
    fn supersedes(&self, other: &Self) -> bool {
        self.coordinates == other.coordinates && other.date < self.date
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Daylight {
    Between { sunrise: DateTime, sunset: DateTime },
    PolarDay,
    PolarNight,
}

/// Sun times of one solar day at one position.
#[derive(Debug, Clone, PartialEq)]
pub struct SunTimes {
    pub key: SunKey,
    pub daylight: Daylight,
    pub day_length_secs: u64,
}

impl SunTimes {
    fn new(key: SunKey, sunrise: DateTime, sunset: DateTime, day_length_secs: u64) -> Self {
        //the service reports days without sunrise or sunset as the unix epoch
        let requested = key.date;
        let on_requested_day = |dt: &DateTime| (dt.date_in(&chrono::Utc) - requested).num_days().abs() <= 1;

        let daylight = if on_requested_day(&sunrise) && on_requested_day(&sunset) && sunrise < sunset {
            Daylight::Between { sunrise, sunset }
        } else if day_length_secs >= 86_400 || is_polar_summer(&key) {
            Daylight::PolarDay
        } else {
            Daylight::PolarNight
        };

        Self {
            key,
            daylight,
            day_length_secs,
        }
    }
}

fn is_polar_summer(key: &SunKey) -> bool {
    let northern_summer = (4..=9).contains(&key.date.month());
    let northern = key.coordinates.latitude() >= 0.0;
    northern == northern_summer
}

#[derive(Debug, Deserialize)]
struct SunResponse {
    status: String,
    #[serde(default)]
    results: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SunResults {
    sunrise: String,
    sunset: String,
    #[serde(default)]
    day_length: u64,
}

pub struct SunriseSunsetSource<H: HttpGet> {
    http: H,
    base_url: String,
}

impl<H: HttpGet> SunriseSunsetSource<H> {
    pub fn new(http: H, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.to_string(),
        }
    }

    pub fn http(&self) -> &H {
        &self.http
    }

    fn url(&self, key: &SunKey) -> String {
        format!(
            "{}?lat={:.6}&lng={:.6}&date={}&formatted=0",
            self.base_url,
            key.coordinates.latitude(),
            key.coordinates.longitude(),
            key.date.format("%Y-%m-%d")
        )
    }
}

impl<H: HttpGet> ExternalSource for SunriseSunsetSource<H> {
    type Key = SunKey;
    type Record = SunTimes;

    fn name(&self) -> &'static str {
        "sunrise_sunset"
    }

    async fn fetch(&self, key: &SunKey) -> Result<SunTimes, FetchError> {
        let url = self.url(key);
        let response: SunResponse = fetch_json(&self.http, &url).await?;

        if response.status != "OK" {
            return Err(FetchError::parse(url, format!("status {}", response.status)));
        }

        let results: SunResults = serde_json::from_value(response.results).map_err(|e| FetchError::parse(&url, e))?;
        let instant = |iso: &str| DateTime::from_iso(iso).map_err(|e| FetchError::parse(&url, e));

        let times = SunTimes::new(
            key.clone(),
            instant(&results.sunrise)?,
            instant(&results.sunset)?,
            results.day_length,
        );

        tracing::info!(
            "Fetched sun times for {:?} on {}: {:?}",
            key.coordinates,
            key.date,
            times.daylight
        );

        Ok(times)
    }
}
