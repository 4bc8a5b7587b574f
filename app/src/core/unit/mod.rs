mod degree_celsius;
mod on_off;
mod price;

pub use degree_celsius::DegreeCelsius;
pub use on_off::OnOff;
pub use price::PricePerKwh;

#[cfg(test)]
macro_rules! v {
    ($x:literal C) => {
        $crate::core::unit::DegreeCelsius($x as f64)
    };
    ($x:literal SEK) => {
        $crate::core::unit::PricePerKwh($x as f64)
    };
}

#[cfg(test)]
pub(crate) use v;
