use std::fmt::Display;

use derive_more::derive::AsRef;
use serde::{Deserialize, Serialize};

/// Spot price in SEK per kWh.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, AsRef, Serialize, Deserialize)]
pub struct PricePerKwh(pub f64);

impl From<f64> for PricePerKwh {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl From<PricePerKwh> for f64 {
    fn from(value: PricePerKwh) -> Self {
        value.0
    }
}

impl Display for PricePerKwh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4} SEK/kWh", self.0)
    }
}

impl std::ops::Sub for PricePerKwh {
    type Output = PricePerKwh;

    fn sub(self, rhs: Self) -> Self::Output {
        PricePerKwh(self.0 - rhs.0)
    }
}
