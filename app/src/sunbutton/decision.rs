use crate::core::unit::OnOff;

/// The plug is off while the sun is up.
pub fn desired_button_state<T: PartialOrd>(sunrise: &T, sunset: &T, now: &T) -> OnOff {
    OnOff::from(!(sunrise <= now && now < sunset))
}
