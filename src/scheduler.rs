//! Periodic attribute refresh.
//!
//! One tokio task per scheduled attribute. Each task owns a
//! [`tokio::time::Interval`] with [`MissedTickBehavior::Delay`], so a slow fetch
//! pushes that attribute's next tick back instead of queuing a burst, and a
//! task never has two fetches of its attribute in flight.
//!
//! Background failures never stop a task. They are logged at `warn`, mark the
//! attribute stale (value untouched) and are published as [`FetchFailure`]
//! events for anyone subscribed.
//!
//! Shutdown goes through a shared `watch` channel; every task selects on it
//! both while waiting for a tick and while a fetch is in flight.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::attribute::Attribute;
use crate::error::{AppResult, DaqError};
use crate::registry::AttributeRegistry;

const FAILURE_CHANNEL_CAPACITY: usize = 256;

/// Background fetch failure event.
#[derive(Clone, Debug)]
pub struct FetchFailure {
    /// Attribute whose refresh failed
    pub attribute: String,
    /// Rendered error
    pub error: String,
    /// When the failure was observed
    pub at: DateTime<Utc>,
}

/// Owner of the polling tasks.
pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    failures: broadcast::Sender<FetchFailure>,
}

impl Scheduler {
    /// Spawn one task per scheduled attribute of a sealed registry.
    pub fn start(registry: Arc<AttributeRegistry>) -> AppResult<Self> {
        if !registry.is_sealed() {
            return Err(DaqError::Configuration(
                "registry must be sealed before polling starts".into(),
            ));
        }

        let (shutdown, _) = watch::channel(false);
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);

        let mut handles = Vec::new();
        for attribute in registry.scheduled() {
            let Some(period) = attribute.update_period() else {
                continue;
            };
            let span = info_span!("poll", attribute = %attribute.name());
            let task = poll_attribute(
                registry.clone(),
                attribute,
                period,
                shutdown.subscribe(),
                failures.clone(),
            );
            handles.push(tokio::spawn(task.instrument(span)));
        }

        info!(tasks = handles.len(), "scheduler started");
        Ok(Self {
            shutdown,
            handles,
            failures,
        })
    }

    /// Receive future background failures.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<FetchFailure> {
        self.failures.subscribe()
    }

    /// Number of running polling tasks.
    pub fn task_count(&self) -> usize {
        self.handles.len()
    }

    /// Stop every task and wait for it to finish. Calling it again is a no-op.
    pub async fn shutdown(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        let _ = self.shutdown.send(true);
        let stopped = self.handles.len();
        for result in join_all(self.handles.drain(..)).await {
            if let Err(e) = result {
                warn!(error = %e, "polling task ended abnormally");
            }
        }
        info!(tasks = stopped, "scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn poll_attribute(
    registry: Arc<AttributeRegistry>,
    attribute: Arc<Attribute>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    failures: broadcast::Sender<FetchFailure>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(period = ?period, "polling");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        tokio::select! {
            result = registry.poll_attribute(&attribute) => {
                if let Err(e) = result {
                    warn!(error = %e, "background fetch failed");
                    let _ = failures.send(FetchFailure {
                        attribute: attribute.name().to_string(),
                        error: e.to_string(),
                        at: Utc::now(),
                    });
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    debug!("polling stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeDescriptor, Freshness};
    use crate::binding::Binding;
    use crate::simulated::{AccessorCall, SimulatedDetector};
    use crate::value::{AttributeValue, RawValue, ValueType};
    use tokio::time::sleep;
    use tracing_test::traced_test;

    fn sealed(hw: Arc<SimulatedDetector>, period: Duration) -> Arc<AttributeRegistry> {
        let mut reg = AttributeRegistry::new(hw);
        reg.register(
            AttributeDescriptor::read_write("exposure_time", ValueType::Float)
                .with_update_period(period),
            Binding::simple("exptime"),
        )
        .unwrap();
        reg.register(
            AttributeDescriptor::read_only("dynamic_range", ValueType::Int),
            Binding::simple("dr"),
        )
        .unwrap();
        reg.seal().unwrap();
        Arc::new(reg)
    }

    fn gets(hw: &SimulatedDetector, command: &str) -> usize {
        hw.count_calls(|c| matches!(c, AccessorCall::Get(cmd) if cmd == command))
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_scheduled_attributes_get_tasks() {
        let hw = Arc::new(SimulatedDetector::jungfrau(1, 1));
        let mut scheduler = Scheduler::start(sealed(hw.clone(), Duration::from_millis(200))).unwrap();
        assert_eq!(scheduler.task_count(), 1);

        sleep(Duration::from_millis(1000)).await;
        assert_eq!(gets(&hw, "dr"), 0);
        assert!(gets(&hw, "exptime") >= 5);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_never_overlaps() {
        let hw = Arc::new(
            SimulatedDetector::jungfrau(1, 1).with_latency(Duration::from_millis(500)),
        );
        let mut scheduler = Scheduler::start(sealed(hw.clone(), Duration::from_millis(200))).unwrap();

        sleep(Duration::from_millis(3100)).await;
        scheduler.shutdown().await;

        assert_eq!(hw.peak_concurrency("exptime"), 1);
        let fetches = gets(&hw, "exptime");
        assert!((6..=7).contains(&fetches), "{fetches} fetches");
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_failure_keeps_value_and_task() {
        let hw = Arc::new(SimulatedDetector::jungfrau(1, 1));
        hw.set_property("exptime", 0.5_f64);
        let registry = sealed(hw.clone(), Duration::from_millis(200));
        let mut scheduler = Scheduler::start(registry.clone()).unwrap();
        let mut failures = scheduler.subscribe_failures();

        sleep(Duration::from_millis(50)).await;
        let attr = registry.get("exposure_time").unwrap().clone();
        assert_eq!(attr.value(), AttributeValue::Float(0.5));

        hw.fail("exptime");
        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.attribute, "exposure_time");
        assert_eq!(attr.value(), AttributeValue::Float(0.5));
        assert_eq!(attr.reading().freshness, Freshness::Stale);
        assert!(logs_contain("background fetch failed"));

        hw.restore("exptime");
        hw.set_property("exptime", RawValue::Float(0.75));
        sleep(Duration::from_millis(400)).await;
        assert_eq!(attr.value(), AttributeValue::Float(0.75));
        assert_eq!(attr.reading().freshness, Freshness::Fresh);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_write_waits_for_scheduled_fetch() {
        let hw = Arc::new(
            SimulatedDetector::jungfrau(1, 1).with_latency(Duration::from_millis(500)),
        );
        let registry = sealed(hw.clone(), Duration::from_millis(200));
        let mut scheduler = Scheduler::start(registry.clone()).unwrap();

        // first fetch is in flight until t=500ms
        sleep(Duration::from_millis(100)).await;
        assert_eq!(gets(&hw, "exptime"), 1);
        let writer = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .write("exposure_time", AttributeValue::Float(0.25))
                    .await
            })
        };
        writer.await.unwrap().unwrap();

        let attr = registry.get("exposure_time").unwrap().clone();
        assert_eq!(attr.value(), AttributeValue::Float(0.25));
        let calls: Vec<_> = hw
            .calls()
            .into_iter()
            .filter(|c| matches!(c, AccessorCall::Get(_) | AccessorCall::Set(..)))
            .collect();
        assert_eq!(calls[0], AccessorCall::Get("exptime".into()));
        assert_eq!(calls[1], AccessorCall::Set("exptime".into(), RawValue::Float(0.25)));

        sleep(Duration::from_secs(2)).await;
        assert_eq!(attr.value(), AttributeValue::Float(0.25));
        assert_eq!(hw.peak_concurrency("exptime"), 1);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_after_failed_fetch_stays_fresh() {
        let hw = Arc::new(
            SimulatedDetector::jungfrau(1, 1).with_latency(Duration::from_millis(500)),
        );
        hw.fail("exptime");
        let registry = sealed(hw.clone(), Duration::from_millis(200));
        let mut scheduler = Scheduler::start(registry.clone()).unwrap();
        let mut failures = scheduler.subscribe_failures();

        // the failing fetch is in flight; the write queues behind it
        sleep(Duration::from_millis(100)).await;
        hw.restore("exptime");
        let writer = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .write("exposure_time", AttributeValue::Float(0.25))
                    .await
            })
        };
        writer.await.unwrap().unwrap();

        assert_eq!(failures.recv().await.unwrap().attribute, "exposure_time");
        let reading = registry.get("exposure_time").unwrap().reading();
        assert_eq!(reading.value, AttributeValue::Float(0.25));
        assert_eq!(reading.freshness, Freshness::Fresh);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_polling() {
        let hw = Arc::new(SimulatedDetector::jungfrau(1, 1));
        let mut scheduler = Scheduler::start(sealed(hw.clone(), Duration::from_millis(200))).unwrap();
        sleep(Duration::from_millis(500)).await;

        scheduler.shutdown().await;
        assert_eq!(scheduler.task_count(), 0);
        let after = gets(&hw, "exptime");

        sleep(Duration::from_secs(2)).await;
        assert_eq!(gets(&hw, "exptime"), after);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsealed_registry_rejected() {
        let hw = Arc::new(SimulatedDetector::jungfrau(1, 1));
        let registry = Arc::new(AttributeRegistry::new(hw));
        assert!(Scheduler::start(registry).is_err());
    }
}
