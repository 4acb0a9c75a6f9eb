//! Dynamic attribute discovery from the detector topology.
//!
//! Run once during initialise: the factory reads module geometry and sensor
//! kinds, then produces one computed read-only attribute per (sensor, module)
//! pair, named `{prefix}{sensor group}Module{index + 1}`.

use std::collections::HashSet;
use std::time::Duration;
use tracing::info;

use crate::accessor::{HardwareAccessor, Topology};
use crate::attribute::AttributeDescriptor;
use crate::binding::{Binding, ModuleSensorSource};
use crate::error::{AppResult, DaqError};
use crate::registry::AttributeRegistry;
use crate::value::ValueType;

/// An attribute produced by discovery, ready for registration.
#[derive(Clone, Debug)]
pub struct DiscoveredAttribute {
    /// Generated name
    pub name: String,
    /// Read-only float descriptor
    pub descriptor: AttributeDescriptor,
    /// Computed binding for the (sensor, module) pair
    pub binding: Binding,
}

/// Builds per-module sensor attributes.
#[derive(Clone, Debug)]
pub struct DynamicAttributeFactory {
    prefix: String,
    command: String,
    update_period: Duration,
}

impl DynamicAttributeFactory {
    /// Factory reading per-module arrays from `command`.
    pub fn new(prefix: impl Into<String>, command: impl Into<String>, update_period: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            command: command.into(),
            update_period,
        }
    }

    /// Name of the attribute for `group` on the 0-based module `index`.
    pub fn attribute_name(&self, group: &str, index: usize) -> String {
        format!("{}{}Module{}", self.prefix, group, index + 1)
    }

    /// Read the topology and build the attribute list.
    pub async fn discover(&self, accessor: &dyn HardwareAccessor) -> AppResult<Vec<DiscoveredAttribute>> {
        let topology = accessor
            .topology()
            .await
            .map_err(|e| DaqError::hardware("topology", e))?;
        self.build(&topology)
    }

    /// Build the attribute list for a known topology.
    pub fn build(&self, topology: &Topology) -> AppResult<Vec<DiscoveredAttribute>> {
        let modules = topology.geometry.module_count();
        if modules == 0 {
            return Err(DaqError::Topology("detector reports zero modules".into()));
        }
        if topology.sensors.is_empty() {
            return Err(DaqError::Topology("detector reports no sensor kinds".into()));
        }

        let mut seen = HashSet::new();
        let mut discovered = Vec::with_capacity(modules * topology.sensors.len());
        for sensor in &topology.sensors {
            if !seen.insert(sensor.group.as_str()) {
                return Err(DaqError::Topology(format!(
                    "sensor group '{}' reported twice",
                    sensor.group
                )));
            }
            for index in 0..modules {
                let name = self.attribute_name(&sensor.group, index);
                let descriptor = AttributeDescriptor::read_only(name.clone(), ValueType::Float)
                    .with_group(sensor.group.clone())
                    .with_update_period(self.update_period);
                let binding = Binding::computed(ModuleSensorSource::new(
                    self.command.clone(),
                    sensor.clone(),
                    index,
                ));
                discovered.push(DiscoveredAttribute {
                    name,
                    descriptor,
                    binding,
                });
            }
        }
        Ok(discovered)
    }

    /// Discover and register everything in one step.
    pub async fn register_all(&self, registry: &mut AttributeRegistry) -> AppResult<usize> {
        let discovered = self.discover(registry.accessor().as_ref()).await?;
        let count = discovered.len();
        for attribute in discovered {
            registry.register(attribute.descriptor, attribute.binding)?;
        }
        info!(count, "registered discovered attributes");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::{ModuleGeometry, SensorKind};
    use crate::simulated::{SimulatedDetector, TEMPERATURE_COMMAND};
    use crate::value::AttributeValue;
    use std::sync::Arc;

    fn factory() -> DynamicAttributeFactory {
        DynamicAttributeFactory::new("Temperature", TEMPERATURE_COMMAND, Duration::from_secs(1))
    }

    fn topology(columns: u32, rows: u32, groups: &[&str]) -> Topology {
        Topology {
            geometry: ModuleGeometry { columns, rows },
            sensors: groups
                .iter()
                .enumerate()
                .map(|(i, g)| SensorKind::new(100 + i as i64, *g))
                .collect(),
        }
    }

    #[test]
    fn test_two_modules_three_sensors() {
        let attrs = factory().build(&topology(1, 2, &["Adc", "Fpga", "Board"])).unwrap();
        assert_eq!(attrs.len(), 6);

        let names: HashSet<_> = attrs.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names.len(), 6);
        assert!(names.contains("TemperatureAdcModule1"));
        assert!(names.contains("TemperatureBoardModule2"));
        assert_eq!(attrs[0].descriptor.group(), Some("Adc"));
    }

    #[test]
    fn test_empty_topology_is_an_error() {
        assert!(matches!(
            factory().build(&topology(0, 2, &["Adc"])),
            Err(DaqError::Topology(_))
        ));
        assert!(matches!(
            factory().build(&topology(1, 1, &[])),
            Err(DaqError::Topology(_))
        ));
        assert!(factory().build(&topology(1, 1, &["Adc", "Adc"])).is_err());
    }

    #[tokio::test]
    async fn test_register_and_read() {
        let hw = Arc::new(SimulatedDetector::jungfrau(1, 2));
        let mut registry = AttributeRegistry::new(hw.clone());

        let count = factory().register_all(&mut registry).await.unwrap();
        assert_eq!(count, 4);
        registry.seal().unwrap();

        assert_eq!(
            registry.refresh("TemperatureFpgaModule2").await.unwrap(),
            AttributeValue::Float(46.0)
        );
    }
}
