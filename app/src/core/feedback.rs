use std::{fmt::Debug, sync::Arc};

use anyhow::Context as _;
use infrastructure::meter;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{
    cache::{ExternalDataCache, ExternalSource, RefreshKey},
    time::{DateTime, Duration},
    tracker::ChangeTracker,
};

/// An asset whose actuator value is derived from external data.
pub trait ControlledAsset: Send + Sync + 'static {
    type Key: RefreshKey;
    type Record;
    type Value: Debug + Clone + PartialEq + Into<f64> + Send + Sync + 'static;

    fn name(&self) -> &str;

    /// Key of the record the decision at `now` depends on.
    fn refresh_key(&self, now: &DateTime) -> Self::Key;

    /// Must not perform I/O. Errors mean the record cannot answer for `now`.
    fn decide(&self, record: &Self::Record, now: &DateTime) -> anyhow::Result<Self::Value>;

    /// Hook to expose what the last decision was based on.
    fn observe(&self, _record: &Self::Record, _desired: &Self::Value, _now: &DateTime) {}
}

pub trait ActuatorSender<V>: Send + Sync + 'static {
    fn send(&self, value: &V) -> impl Future<Output = anyhow::Result<()>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Skipped,
    Sent,
    SendFailed,
    FetchFailed,
    DecisionFailed,
    Cancelled,
}

pub struct FeedbackLoop<A, S, T>
where
    A: ControlledAsset,
    S: ExternalSource<Key = A::Key, Record = A::Record>,
    T: ActuatorSender<A::Value>,
{
    asset: Arc<A>,
    cache: ExternalDataCache<S>,
    sender: T,
    period: std::time::Duration,
    tracker: ChangeTracker<A::Value>,
}

impl<A, S, T> FeedbackLoop<A, S, T>
where
    A: ControlledAsset,
    S: ExternalSource<Key = A::Key, Record = A::Record>,
    T: ActuatorSender<A::Value>,
{
    pub fn new(asset: Arc<A>, cache: ExternalDataCache<S>, sender: T, period: Duration) -> anyhow::Result<Self> {
        let period = period
            .to_std()
            .with_context(|| format!("Refresh period of {} must be positive, got {}", asset.name(), period))?;

        Ok(Self {
            asset,
            cache,
            sender,
            period,
            tracker: ChangeTracker::new(),
        })
    }

    pub fn tracker(&self) -> &ChangeTracker<A::Value> {
        &self.tracker
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut timer = tokio::time::interval(self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("Starting feedback loop of {} every {:?}", self.asset.name(), self.period);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = timer.tick() => {},
            }

            let outcome = self.tick(&cancel).await;
            tracing::trace!("Tick of {} finished: {:?}", self.asset.name(), outcome);
        }

        tracing::info!("Feedback loop of {} stopped", self.asset.name());
    }

    #[tracing::instrument(skip_all, fields(asset = %self.asset.name()))]
    pub async fn tick(&mut self, cancel: &CancellationToken) -> TickOutcome {
        let now = DateTime::now();
        let key = self.asset.refresh_key(&now);

        let record = match self.cache.fetch(key).await {
            Ok(record) => record,
            Err(e) if e.is_transient() => {
                tracing::warn!("No external data for {}, retrying next tick: {}", self.asset.name(), e);
                return TickOutcome::FetchFailed;
            }
            Err(e) => {
                tracing::error!("External data of {} unreachable until reconfigured: {}", self.asset.name(), e);
                return TickOutcome::FetchFailed;
            }
        };

        let desired = match self.asset.decide(&record, &now) {
            Ok(desired) => desired,
            Err(e) => {
                tracing::warn!("No decision possible for {}: {:?}", self.asset.name(), e);
                return TickOutcome::DecisionFailed;
            }
        };

        self.asset.observe(&record, &desired, &now);
        meter::set("asset_desired_value", desired.clone().into(), &[("asset", self.asset.name())]);

        if !self.tracker.needs_send(&desired) {
            return TickOutcome::Skipped;
        }

        if cancel.is_cancelled() {
            return TickOutcome::Cancelled;
        }

        tracing::info!("Sending {:?} for {}", desired, self.asset.name());

        match self.sender.send(&desired).await {
            Ok(()) => {
                meter::increment("actuator_send", &[("asset", self.asset.name()), ("result", "ok")]);
                self.tracker.sent(desired);
                TickOutcome::Sent
            }
            Err(e) => {
                tracing::error!("Sending {:?} for {} failed: {:?}", desired, self.asset.name(), e);
                meter::increment("actuator_send", &[("asset", self.asset.name()), ("result", "error")]);
                self.tracker.failed();
                TickOutcome::SendFailed
            }
        }
    }
}
