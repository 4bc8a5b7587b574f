use crate::core::unit::{DegreeCelsius, PricePerKwh};

/// Price band mapped linearly onto the comfort temperature band, cheap means warm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComfortRange {
    pub min_price: PricePerKwh,
    pub max_price: PricePerKwh,
    pub min_temperature: DegreeCelsius,
    pub max_temperature: DegreeCelsius,
}

pub fn desired_temperature(price: PricePerKwh, range: &ComfortRange) -> DegreeCelsius {
    //degenerate or inverted band has no interpolation range
    if range.max_price <= range.min_price || !price.0.is_finite() || price >= range.max_price {
        return range.min_temperature;
    }

    if price <= range.min_price {
        return range.max_temperature;
    }

    let share = (price - range.min_price).0 / (range.max_price - range.min_price).0;
    range.max_temperature - (range.max_temperature - range.min_temperature) * share
}
