//! Hardware accessor seam.
//!
//! The engine talks to the detector only through [`HardwareAccessor`]. The trait
//! is deliberately small: named property get/set, named zero-argument commands,
//! one composite get/set pair and one indexed array read. Anything the detector
//! SDK does beyond that lives behind the implementation.
//!
//! # Thread Safety
//!
//! Implementations must be `Send + Sync`. The engine serializes its own calls
//! per attribute (or per composite group) but may call the accessor
//! concurrently for unrelated attributes. If the device needs global ordering,
//! the implementation has to provide it.

use async_trait::async_trait;
use thiserror::Error;

use crate::value::RawValue;

/// Failure reported by a hardware accessor.
///
/// Communication failures are kept distinct from argument errors so callers
/// can tell a dead link from a rejected value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccessorError {
    /// Link to the detector or receiver failed.
    #[error("communication failure: {0}")]
    Communication(String),

    /// The device rejected the value.
    #[error("invalid argument for '{command}': {reason}")]
    InvalidArgument {
        /// Command that rejected the value
        command: String,
        /// Device-provided reason
        reason: String,
    },

    /// The device has no such property or command.
    #[error("unknown hardware command '{0}'")]
    UnknownCommand(String),
}

/// Result alias for accessor calls.
pub type AccessorResult<T> = std::result::Result<T, AccessorError>;

/// Field list pushed to (or read from) the hardware in one composite call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompositePayload {
    fields: Vec<(String, RawValue)>,
}

impl CompositePayload {
    /// Empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field, builder style.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.push(field, value);
        self
    }

    /// Append a field.
    pub fn push(&mut self, field: impl Into<String>, value: impl Into<RawValue>) {
        self.fields.push((field.into(), value.into()));
    }

    /// Look up a field by name.
    pub fn get(&self, field: &str) -> Option<&RawValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Iterate fields in push order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when no field has been pushed.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// One kind of on-module sensor (e.g. ADC or FPGA temperature).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SensorKind {
    /// Hardware selector passed to [`HardwareAccessor::get_indexed`].
    pub code: i64,
    /// Name used for grouping and attribute naming, e.g. `"Adc"`.
    pub group: String,
}

impl SensorKind {
    /// Create a sensor kind.
    pub fn new(code: i64, group: impl Into<String>) -> Self {
        Self {
            code,
            group: group.into(),
        }
    }
}

/// Module layout reported by the detector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModuleGeometry {
    /// Modules along x
    pub columns: u32,
    /// Modules along y
    pub rows: u32,
}

impl ModuleGeometry {
    /// Total module count.
    pub fn module_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }
}

/// Hardware topology read once during initialisation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    /// Module layout
    pub geometry: ModuleGeometry,
    /// Sensor kinds present on every module
    pub sensors: Vec<SensorKind>,
}

/// Access to the detector's properties and commands.
#[async_trait]
pub trait HardwareAccessor: Send + Sync {
    /// Read a named property.
    async fn get(&self, command: &str) -> AccessorResult<RawValue>;

    /// Write a named property.
    async fn set(&self, command: &str, value: RawValue) -> AccessorResult<()>;

    /// Run a zero-argument command.
    async fn invoke(&self, command: &str) -> AccessorResult<()>;

    /// Read a structured property as a field list.
    async fn get_composite(&self, command: &str) -> AccessorResult<CompositePayload>;

    /// Write a structured property in a single call.
    async fn set_composite(&self, command: &str, payload: CompositePayload) -> AccessorResult<()>;

    /// Read an array property selected by `selector`, indexed by module position.
    async fn get_indexed(&self, command: &str, selector: i64) -> AccessorResult<Vec<RawValue>>;

    /// Report module geometry and sensor kinds.
    async fn topology(&self) -> AccessorResult<Topology>;
}
