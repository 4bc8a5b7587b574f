pub mod signal;
pub mod spot_price;
pub mod state_api;
pub mod sunrise_sunset;
pub mod tasmota;
