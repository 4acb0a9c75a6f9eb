//! Simulated Jungfrau detector
//!
//! Provides a [`HardwareAccessor`] that keeps detector state in memory, for
//! testing and development without a detector or receiver attached. Every call
//! is recorded so tests can assert exactly which hardware operations happened.
//!
//! # Behaviour
//!
//! - Properties must exist before they can be read or written (unknown names
//!   fail with [`AccessorError::UnknownCommand`]).
//! - Writes that change a property's kind (e.g. string into an int) fail with
//!   [`AccessorError::InvalidArgument`]; ints and floats are interchangeable.
//! - Any command can be made to fail with a communication error via
//!   [`SimulatedDetector::fail`].
//! - An optional latency is applied to every call with `tokio::time::sleep`, so
//!   paused-clock tests stay deterministic.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::sleep;

use crate::accessor::{
    AccessorError, AccessorResult, CompositePayload, HardwareAccessor, ModuleGeometry, SensorKind,
    Topology,
};
use crate::value::RawValue;

/// Command used for per-module temperature arrays.
pub const TEMPERATURE_COMMAND: &str = "temperature";
/// Sensor selector for the ADC temperature.
pub const TEMPERATURE_ADC: i64 = 100;
/// Sensor selector for the FPGA temperature.
pub const TEMPERATURE_FPGA: i64 = 101;

const PEDESTAL_COMMAND: &str = "pedestalmode";
const COMMANDS: &[&str] = &["start", "stop", "clearbusy", "rx_start", "rx_stop", "temp_event_clear"];

/// One recorded accessor call.
#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs)]
pub enum AccessorCall {
    Get(String),
    Set(String, RawValue),
    Invoke(String),
    GetComposite(String),
    SetComposite(String, CompositePayload),
    GetIndexed(String, i64),
    Topology,
}

impl AccessorCall {
    /// True for calls that change hardware state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            AccessorCall::Set(..) | AccessorCall::Invoke(_) | AccessorCall::SetComposite(..)
        )
    }

    fn command(&self) -> &str {
        match self {
            AccessorCall::Get(c)
            | AccessorCall::Set(c, _)
            | AccessorCall::Invoke(c)
            | AccessorCall::GetComposite(c)
            | AccessorCall::SetComposite(c, _)
            | AccessorCall::GetIndexed(c, _) => c,
            AccessorCall::Topology => "topology",
        }
    }
}

#[derive(Default)]
struct SimState {
    properties: HashMap<String, RawValue>,
    composites: HashMap<String, CompositePayload>,
    indexed: HashMap<(String, i64), Vec<RawValue>>,
    topology: Option<Topology>,
    receiver_metadata: HashMap<String, String>,
    failing: HashSet<String>,
    calls: Vec<AccessorCall>,
    in_flight: HashMap<String, usize>,
    peak_in_flight: HashMap<String, usize>,
}

/// In-memory detector implementing [`HardwareAccessor`].
#[derive(Default)]
pub struct SimulatedDetector {
    state: Mutex<SimState>,
    latency: Duration,
}

/// Decrements the in-flight counter for a command when the call finishes.
struct InFlight<'a> {
    detector: &'a SimulatedDetector,
    command: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.detector.state();
        if let Some(count) = state.in_flight.get_mut(&self.command) {
            *count = count.saturating_sub(1);
        }
    }
}

impl SimulatedDetector {
    /// Empty detector: no properties, no topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Detector preloaded with the Jungfrau property set and `columns x rows` modules.
    pub fn jungfrau(columns: u32, rows: u32) -> Self {
        let modules = columns as usize * rows as usize;
        let adc: Vec<f64> = (0..modules).map(|m| 38.0 + m as f64).collect();
        let fpga: Vec<f64> = (0..modules).map(|m| 45.0 + m as f64).collect();

        Self::new()
            .with_property("firmwareversion", "0x230524")
            .with_property("detectorserverversion", "8.0.1")
            .with_property("hardwareversion", "2.0")
            .with_property("kernelversion", "#37 Mon Sep 2 2024")
            .with_property("clientversion", "8.0.1")
            .with_property("rx_version", "8.0.1")
            .with_property("dr", 16_i64)
            .with_property("framesl", 0_i64)
            .with_property("module_geometry", format!("[{}, {}]", columns, rows))
            .with_property("module_size", "[1024, 512]")
            .with_property("detsize", detector_size(columns, rows))
            .with_property("tempvalues", "adc: 38, fpga: 45")
            .with_property("status", 0_i64)
            .with_property("exptime", 0.00001_f64)
            .with_property("period", 0.001_f64)
            .with_property("delay", 0.0_f64)
            .with_property("frames", 1_i64)
            .with_property("temp_threshold", 65.0_f64)
            .with_property("temp_event", 0_i64)
            .with_property("highvoltage", 0_i64)
            .with_property("powerchip", 0_i64)
            .with_property("timing", 0_i64)
            .with_property("gainmode", 0_i64)
            .with_composite(
                PEDESTAL_COMMAND,
                CompositePayload::new()
                    .with("frames", 0_i64)
                    .with("loops", 0_i64)
                    .with("enable", false),
            )
            .with_indexed(TEMPERATURE_COMMAND, TEMPERATURE_ADC, adc.into_iter().map(RawValue::Float).collect())
            .with_indexed(TEMPERATURE_COMMAND, TEMPERATURE_FPGA, fpga.into_iter().map(RawValue::Float).collect())
            .with_topology(Topology {
                geometry: ModuleGeometry { columns, rows },
                sensors: vec![
                    SensorKind::new(TEMPERATURE_ADC, "Adc"),
                    SensorKind::new(TEMPERATURE_FPGA, "Fpga"),
                ],
            })
    }

    /// Define a property.
    pub fn with_property(self, command: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.state().properties.insert(command.into(), value.into());
        self
    }

    /// Define a composite property.
    pub fn with_composite(self, command: impl Into<String>, payload: CompositePayload) -> Self {
        self.state().composites.insert(command.into(), payload);
        self
    }

    /// Define an indexed array property.
    pub fn with_indexed(self, command: impl Into<String>, selector: i64, values: Vec<RawValue>) -> Self {
        self.state().indexed.insert((command.into(), selector), values);
        self
    }

    /// Define per-module temperatures for one sensor selector.
    pub fn with_temperatures(self, selector: i64, celsius: Vec<f64>) -> Self {
        self.with_indexed(
            TEMPERATURE_COMMAND,
            selector,
            celsius.into_iter().map(RawValue::Float).collect(),
        )
    }

    /// Define the reported topology.
    pub fn with_topology(self, topology: Topology) -> Self {
        self.state().topology = Some(topology);
        self
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every call touching `command` fail with a communication error.
    pub fn fail(&self, command: &str) {
        self.state().failing.insert(command.to_string());
    }

    /// Undo [`fail`](Self::fail).
    pub fn restore(&self, command: &str) {
        self.state().failing.remove(command);
    }

    /// Change a property from the hardware side, without recording a call.
    pub fn set_property(&self, command: &str, value: impl Into<RawValue>) {
        self.state().properties.insert(command.to_string(), value.into());
    }

    /// Current value of a property.
    pub fn property(&self, command: &str) -> Option<RawValue> {
        self.state().properties.get(command).cloned()
    }

    /// Current value of a composite property.
    pub fn composite(&self, command: &str) -> Option<CompositePayload> {
        self.state().composites.get(command).cloned()
    }

    /// Receiver-side metadata mirrored from pedestal pushes.
    pub fn receiver_metadata(&self, key: &str) -> Option<String> {
        self.state().receiver_metadata.get(key).cloned()
    }

    /// All recorded calls, oldest first.
    pub fn calls(&self) -> Vec<AccessorCall> {
        self.state().calls.clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count_calls(&self, predicate: impl Fn(&AccessorCall) -> bool) -> usize {
        self.state().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Highest number of simultaneous in-flight calls seen for `command`.
    pub fn peak_concurrency(&self, command: &str) -> usize {
        self.state().peak_in_flight.get(command).copied().unwrap_or(0)
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call, apply latency, and check failure injection.
    async fn begin(&self, call: AccessorCall) -> AccessorResult<InFlight<'_>> {
        let command = call.command().to_string();
        let failing = {
            let mut state = self.state();
            state.calls.push(call);
            let count = state.in_flight.entry(command.clone()).or_insert(0);
            *count += 1;
            let now = *count;
            let peak = state.peak_in_flight.entry(command.clone()).or_insert(0);
            *peak = (*peak).max(now);
            state.failing.contains(&command)
        };
        let guard = InFlight {
            detector: self,
            command: command.clone(),
        };

        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        if failing {
            return Err(AccessorError::Communication(format!(
                "simulated link failure on '{}'",
                command
            )));
        }
        Ok(guard)
    }
}

/// Full detector size in pixels for `columns x rows` 1024x512 modules.
fn detector_size(columns: u32, rows: u32) -> String {
    format!("[{}, {}]", 1024 * u64::from(columns), 512 * u64::from(rows))
}

fn same_kind(current: &RawValue, new: &RawValue) -> bool {
    matches!(
        (current, new),
        (RawValue::Int(_) | RawValue::Float(_), RawValue::Int(_) | RawValue::Float(_))
    ) || std::mem::discriminant(current) == std::mem::discriminant(new)
}

#[async_trait]
impl HardwareAccessor for SimulatedDetector {
    async fn get(&self, command: &str) -> AccessorResult<RawValue> {
        let _call = self.begin(AccessorCall::Get(command.to_string())).await?;
        self.property(command)
            .ok_or_else(|| AccessorError::UnknownCommand(command.to_string()))
    }

    async fn set(&self, command: &str, value: RawValue) -> AccessorResult<()> {
        let _call = self
            .begin(AccessorCall::Set(command.to_string(), value.clone()))
            .await?;
        let mut state = self.state();
        let current = state
            .properties
            .get(command)
            .ok_or_else(|| AccessorError::UnknownCommand(command.to_string()))?;
        if !same_kind(current, &value) {
            return Err(AccessorError::InvalidArgument {
                command: command.to_string(),
                reason: format!("expected {}, got {}", current.kind(), value.kind()),
            });
        }
        state.properties.insert(command.to_string(), value);
        Ok(())
    }

    async fn invoke(&self, command: &str) -> AccessorResult<()> {
        let _call = self.begin(AccessorCall::Invoke(command.to_string())).await?;
        if !COMMANDS.contains(&command) {
            return Err(AccessorError::UnknownCommand(command.to_string()));
        }
        let mut state = self.state();
        match command {
            "start" => {
                state.properties.insert("status".into(), RawValue::Int(5));
            }
            "stop" => {
                state.properties.insert("status".into(), RawValue::Int(6));
            }
            "clearbusy" => {
                state.properties.insert("status".into(), RawValue::Int(0));
            }
            "temp_event_clear" => {
                state.properties.insert("temp_event".into(), RawValue::Int(0));
            }
            _ => {}
        }
        Ok(())
    }

    async fn get_composite(&self, command: &str) -> AccessorResult<CompositePayload> {
        let _call = self
            .begin(AccessorCall::GetComposite(command.to_string()))
            .await?;
        self.composite(command)
            .ok_or_else(|| AccessorError::UnknownCommand(command.to_string()))
    }

    async fn set_composite(&self, command: &str, payload: CompositePayload) -> AccessorResult<()> {
        let _call = self
            .begin(AccessorCall::SetComposite(command.to_string(), payload.clone()))
            .await?;
        let mut state = self.state();
        if !state.composites.contains_key(command) {
            return Err(AccessorError::UnknownCommand(command.to_string()));
        }

        if command == PEDESTAL_COMMAND {
            let enabled = payload.get("enable").and_then(RawValue::as_bool).unwrap_or(false);
            let field = |name: &str| {
                if enabled {
                    payload.get(name).map(|v| v.to_string()).unwrap_or_default()
                } else {
                    String::new()
                }
            };
            let pedestal = if enabled { "true".to_string() } else { String::new() };
            let frames = field("frames");
            let loops = field("loops");
            state.receiver_metadata.insert("pedestal".into(), pedestal);
            state.receiver_metadata.insert("pedestal_frames".into(), frames);
            state.receiver_metadata.insert("pedestal_loops".into(), loops);
        }

        state.composites.insert(command.to_string(), payload);
        Ok(())
    }

    async fn get_indexed(&self, command: &str, selector: i64) -> AccessorResult<Vec<RawValue>> {
        let _call = self
            .begin(AccessorCall::GetIndexed(command.to_string(), selector))
            .await?;
        let values = self
            .state()
            .indexed
            .get(&(command.to_string(), selector))
            .cloned();
        values.ok_or_else(|| AccessorError::InvalidArgument {
            command: command.to_string(),
            reason: format!("no array for selector {}", selector),
        })
    }

    async fn topology(&self) -> AccessorResult<Topology> {
        let _call = self.begin(AccessorCall::Topology).await?;
        let topology = self.state().topology.clone();
        topology.ok_or_else(|| AccessorError::Communication("topology not reported".into()))
    }
}
