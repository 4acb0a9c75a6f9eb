//! Binding strategies connecting attributes to hardware accessor calls.
//!
//! Each attribute owns exactly one [`Binding`]:
//!
//! - [`SimpleBinding`]: one property get/set pair plus a pure type coercion.
//! - [`EnumBinding`]: like simple, but codes go through an [`EnumTranslator`].
//! - [`CompositeMemberBinding`]: writes are intercepted by the
//!   [`CompositeWriteCoordinator`](crate::coordinator::CompositeWriteCoordinator).
//! - [`ComputedBinding`]: read-only value derived from a non-property call
//!   (an array indexed by module, an event code turned into a flag, ...).
//!
//! Bindings are immutable once created.

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::trace;

use crate::accessor::{AccessorError, AccessorResult, HardwareAccessor, SensorKind};
use crate::attribute::{AttributeDescriptor, Direction};
use crate::error::{AppResult, DaqError};
use crate::translator::EnumTranslator;
use crate::value::{AttributeValue, RawValue, ValueType};

/// Strategy binding an attribute to the hardware.
#[derive(Clone, Debug)]
#[allow(missing_docs)]
pub enum Binding {
    Simple(SimpleBinding),
    EnumTranslated(EnumBinding),
    CompositeMember(CompositeMemberBinding),
    Computed(ComputedBinding),
}

impl Binding {
    /// Passthrough binding to a named property.
    pub fn simple(command: impl Into<String>) -> Self {
        Binding::Simple(SimpleBinding {
            command: command.into(),
        })
    }

    /// Enum property translated through `translator`.
    pub fn enumerated(command: impl Into<String>, translator: Arc<EnumTranslator>) -> Self {
        Binding::EnumTranslated(EnumBinding {
            command: command.into(),
            translator,
        })
    }

    /// Member of the composite group `group`.
    pub fn composite(group: impl Into<String>) -> Self {
        Binding::CompositeMember(CompositeMemberBinding {
            group: group.into(),
        })
    }

    /// Read-only value computed by `source`.
    pub fn computed(source: impl ComputedSource + 'static) -> Self {
        Binding::Computed(ComputedBinding {
            source: Arc::new(source),
        })
    }

    /// Computed bindings never accept a push.
    pub fn accepts_push(&self) -> bool {
        !matches!(self, Binding::Computed(_))
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Binding::Simple(_) => "simple",
            Binding::EnumTranslated(_) => "enum",
            Binding::CompositeMember(_) => "composite",
            Binding::Computed(_) => "computed",
        }
    }

    /// Reject bindings that cannot serve the described attribute.
    pub(crate) fn check_compatible(&self, descriptor: &AttributeDescriptor) -> AppResult<()> {
        let invalid = |reason: &str| DaqError::InvalidBinding {
            attribute: descriptor.name().to_string(),
            reason: reason.to_string(),
        };

        match self {
            Binding::Simple(_) => {
                if matches!(descriptor.value_type(), ValueType::Enum(_)) {
                    return Err(invalid("enum attributes need a translator"));
                }
            }
            Binding::EnumTranslated(b) => {
                if descriptor.value_type() != &b.translator.value_type() {
                    return Err(invalid("declared symbols differ from the translator's"));
                }
            }
            Binding::Computed(_) => {
                if descriptor.direction() != Direction::ReadOnly {
                    return Err(invalid("computed attributes must be read-only"));
                }
                if matches!(descriptor.value_type(), ValueType::Enum(_)) {
                    return Err(invalid("computed attributes cannot be enums"));
                }
            }
            Binding::CompositeMember(_) => {}
        }
        Ok(())
    }
}

// =============================================================================
// Simple
// =============================================================================

/// Single property get/set with pure type coercion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimpleBinding {
    command: String,
}

impl SimpleBinding {
    /// Hardware property name
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Read the property and coerce it to `value_type`.
    pub async fn fetch(
        &self,
        attribute: &str,
        value_type: &ValueType,
        accessor: &dyn HardwareAccessor,
    ) -> AppResult<AttributeValue> {
        let raw = accessor
            .get(&self.command)
            .await
            .map_err(|e| DaqError::hardware(&self.command, e))?;
        trace!(attribute, command = %self.command, raw = %raw, "fetched");
        value_type.coerce_raw(attribute, raw)
    }

    /// Write an already validated value.
    pub async fn push(&self, value: &AttributeValue, accessor: &dyn HardwareAccessor) -> AppResult<()> {
        accessor
            .set(&self.command, value.to_raw())
            .await
            .map_err(|e| DaqError::hardware(&self.command, e))
    }
}

// =============================================================================
// Enum translated
// =============================================================================

/// Property holding a vendor enum code.
#[derive(Clone, Debug)]
pub struct EnumBinding {
    command: String,
    translator: Arc<EnumTranslator>,
}

impl EnumBinding {
    /// Hardware property name
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The code/symbol table
    pub fn translator(&self) -> &EnumTranslator {
        &self.translator
    }

    /// Read the code and map it to a symbol.
    ///
    /// A code without a symbol is an error, never a default.
    pub async fn fetch(&self, attribute: &str, accessor: &dyn HardwareAccessor) -> AppResult<AttributeValue> {
        let raw = accessor
            .get(&self.command)
            .await
            .map_err(|e| DaqError::hardware(&self.command, e))?;
        let code = raw.as_i64().ok_or_else(|| DaqError::TypeMismatch {
            attribute: attribute.to_string(),
            expected: "enum code".to_string(),
            actual: raw.kind().to_string(),
        })?;
        symbol_for(&self.translator, attribute, code)
    }

    /// Map the symbol to its code and write it.
    pub async fn push(
        &self,
        attribute: &str,
        value: &AttributeValue,
        accessor: &dyn HardwareAccessor,
    ) -> AppResult<()> {
        let code = code_for(&self.translator, attribute, value)?;
        accessor
            .set(&self.command, RawValue::Int(code))
            .await
            .map_err(|e| DaqError::hardware(&self.command, e))
    }
}

pub(crate) fn symbol_for(translator: &EnumTranslator, attribute: &str, code: i64) -> AppResult<AttributeValue> {
    translator
        .translate(code)
        .map(|symbol| AttributeValue::Enum(symbol.to_string()))
        .ok_or_else(|| DaqError::UnmappedCode {
            attribute: attribute.to_string(),
            code,
        })
}

pub(crate) fn code_for(translator: &EnumTranslator, attribute: &str, value: &AttributeValue) -> AppResult<i64> {
    let symbol = match value {
        AttributeValue::Enum(s) | AttributeValue::String(s) => s.as_str(),
        other => {
            return Err(DaqError::TypeMismatch {
                attribute: attribute.to_string(),
                expected: "enum".to_string(),
                actual: other.kind().to_string(),
            })
        }
    };
    translator
        .translate_inverse(symbol)
        .ok_or_else(|| DaqError::UnknownSymbol {
            attribute: attribute.to_string(),
            symbol: symbol.to_string(),
        })
}

// =============================================================================
// Composite member
// =============================================================================

/// Membership in a composite group; pushes are routed to the coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompositeMemberBinding {
    group: String,
}

impl CompositeMemberBinding {
    /// Group id
    pub fn group(&self) -> &str {
        &self.group
    }
}

// =============================================================================
// Computed
// =============================================================================

/// Pure function of the accessor's structured state.
#[async_trait]
pub trait ComputedSource: Send + Sync + Debug {
    /// Hardware command this source reads, used for error context.
    fn command(&self) -> &str;

    /// Derive the raw value.
    async fn compute(&self, accessor: &dyn HardwareAccessor) -> AccessorResult<RawValue>;
}

/// Read-only binding backed by a [`ComputedSource`].
#[derive(Clone, Debug)]
pub struct ComputedBinding {
    source: Arc<dyn ComputedSource>,
}

impl ComputedBinding {
    /// The underlying source
    pub fn source(&self) -> &dyn ComputedSource {
        self.source.as_ref()
    }

    /// Compute and coerce to `value_type`.
    pub async fn fetch(
        &self,
        attribute: &str,
        value_type: &ValueType,
        accessor: &dyn HardwareAccessor,
    ) -> AppResult<AttributeValue> {
        let raw = self
            .source
            .compute(accessor)
            .await
            .map_err(|e| DaqError::hardware(self.source.command(), e))?;
        value_type.coerce_raw(attribute, raw)
    }
}

/// One module's reading out of a per-module sensor array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleSensorSource {
    command: String,
    sensor: SensorKind,
    module_index: usize,
}

impl ModuleSensorSource {
    /// Read `command` for `sensor` and pick the entry at `module_index` (0-based).
    pub fn new(command: impl Into<String>, sensor: SensorKind, module_index: usize) -> Self {
        Self {
            command: command.into(),
            sensor,
            module_index,
        }
    }

    /// 0-based module position
    pub fn module_index(&self) -> usize {
        self.module_index
    }

    /// Sensor kind
    pub fn sensor(&self) -> &SensorKind {
        &self.sensor
    }
}

#[async_trait]
impl ComputedSource for ModuleSensorSource {
    fn command(&self) -> &str {
        &self.command
    }

    async fn compute(&self, accessor: &dyn HardwareAccessor) -> AccessorResult<RawValue> {
        let values = accessor.get_indexed(&self.command, self.sensor.code).await?;
        values
            .get(self.module_index)
            .cloned()
            .ok_or_else(|| AccessorError::InvalidArgument {
                command: self.command.clone(),
                reason: format!(
                    "module index {} out of range ({} modules reported)",
                    self.module_index,
                    values.len()
                ),
            })
    }
}

/// Boolean flag derived from an event code: any non-zero code is "raised".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventFlagSource {
    command: String,
}

impl EventFlagSource {
    /// Watch the event code at `command`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl ComputedSource for EventFlagSource {
    fn command(&self) -> &str {
        &self.command
    }

    async fn compute(&self, accessor: &dyn HardwareAccessor) -> AccessorResult<RawValue> {
        let raw = accessor.get(&self.command).await?;
        match raw.as_i64() {
            Some(code) => Ok(RawValue::Bool(code != 0)),
            None => Err(AccessorError::InvalidArgument {
                command: self.command.clone(),
                reason: format!("expected an integer event code, got {}", raw.kind()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedDetector;

    fn trigger_translator() -> Arc<EnumTranslator> {
        Arc::new(EnumTranslator::new([("Internal", 0), ("External", 1)]).unwrap())
    }

    #[tokio::test]
    async fn test_simple_fetch_coerces() {
        let hw = SimulatedDetector::new().with_property("dr", 16_i64);
        let Binding::Simple(b) = Binding::simple("dr") else { unreachable!() };

        let value = b.fetch("dynamic_range", &ValueType::String, &hw).await.unwrap();
        assert_eq!(value, AttributeValue::String("16".into()));
    }

    #[tokio::test]
    async fn test_simple_fetch_wraps_accessor_error() {
        let hw = SimulatedDetector::new();
        let Binding::Simple(b) = Binding::simple("exptime") else { unreachable!() };

        let err = b.fetch("exposure_time", &ValueType::Float, &hw).await.unwrap_err();
        assert!(matches!(
            err,
            DaqError::HardwareAccess { source: AccessorError::UnknownCommand(_), .. }
        ));
    }

    #[tokio::test]
    async fn test_enum_fetch_and_push() {
        let hw = SimulatedDetector::new().with_property("timing", 0_i64);
        let Binding::EnumTranslated(b) = Binding::enumerated("timing", trigger_translator()) else {
            unreachable!()
        };

        b.push("trigger_mode", &AttributeValue::Enum("External".into()), &hw)
            .await
            .unwrap();
        assert_eq!(hw.property("timing"), Some(RawValue::Int(1)));
        assert_eq!(
            b.fetch("trigger_mode", &hw).await.unwrap(),
            AttributeValue::Enum("External".into())
        );
    }

    #[tokio::test]
    async fn test_enum_fetch_unmapped_code() {
        let hw = SimulatedDetector::new().with_property("timing", 9_i64);
        let Binding::EnumTranslated(b) = Binding::enumerated("timing", trigger_translator()) else {
            unreachable!()
        };

        let err = b.fetch("trigger_mode", &hw).await.unwrap_err();
        assert!(matches!(err, DaqError::UnmappedCode { code: 9, .. }));
    }

    #[tokio::test]
    async fn test_module_sensor_source() {
        let hw = SimulatedDetector::new().with_temperatures(3, vec![41.5, 43.0]);
        let source = ModuleSensorSource::new("temperature", SensorKind::new(3, "Fpga"), 1);

        assert_eq!(source.compute(&hw).await.unwrap(), RawValue::Float(43.0));

        let out_of_range = ModuleSensorSource::new("temperature", SensorKind::new(3, "Fpga"), 2);
        assert!(matches!(
            out_of_range.compute(&hw).await,
            Err(AccessorError::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn test_event_flag_source() {
        let hw = SimulatedDetector::new().with_property("temp_event", 1_i64);
        let flag = EventFlagSource::new("temp_event");
        assert_eq!(flag.compute(&hw).await.unwrap(), RawValue::Bool(true));

        hw.set("temp_event", RawValue::Int(0)).await.unwrap();
        assert_eq!(flag.compute(&hw).await.unwrap(), RawValue::Bool(false));
    }

    #[test]
    fn test_compatibility_checks() {
        let translator = trigger_translator();
        let enum_desc = AttributeDescriptor::read_write("trigger_mode", translator.value_type());

        assert!(Binding::simple("timing").check_compatible(&enum_desc).is_err());
        assert!(Binding::enumerated("timing", translator)
            .check_compatible(&enum_desc)
            .is_ok());

        let rw_flag = AttributeDescriptor::read_write("temperature_event", ValueType::Bool);
        assert!(Binding::computed(EventFlagSource::new("temp_event"))
            .check_compatible(&rw_flag)
            .is_err());
    }
}
