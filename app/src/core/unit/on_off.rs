use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OnOff {
    Off,
    On,
}

impl From<bool> for OnOff {
    fn from(on: bool) -> Self {
        if on { OnOff::On } else { OnOff::Off }
    }
}

impl From<OnOff> for f64 {
    fn from(value: OnOff) -> Self {
        match value {
            OnOff::Off => 0.0,
            OnOff::On => 1.0,
        }
    }
}

impl Display for OnOff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OnOff::Off => write!(f, "off"),
            OnOff::On => write!(f, "on"),
        }
    }
}
