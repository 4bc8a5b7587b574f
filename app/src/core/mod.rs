pub mod cache;
pub mod feedback;
pub mod source;
pub mod time;
pub mod tracker;
pub mod unit;

pub use cache::{ExternalDataCache, ExternalSource, RefreshKey};
pub use feedback::{ActuatorSender, ControlledAsset, FeedbackLoop, TickOutcome};
pub use source::{ExternalHttpClient, FetchError, HttpGet};
