//! Static Jungfrau attribute and command catalog.

use std::sync::Arc;
use std::time::Duration;

use crate::attribute::AttributeDescriptor;
use crate::binding::{Binding, EventFlagSource};
use crate::command::CommandBinding;
use crate::config::EngineConfig;
use crate::coordinator::{CompositeGroup, CompositeTrigger};
use crate::error::AppResult;
use crate::registry::AttributeRegistry;
use crate::translator::EnumTranslator;
use crate::value::ValueType;

/// Composite group id of the pedestal settings.
pub const PEDESTAL_GROUP: &str = "pedestal";

// (attribute, command, group)
const VERSION_STRINGS: &[(&str, &str, &str)] = &[
    ("firmware_version", "firmwareversion", "Versions"),
    ("detector_server_version", "detectorserverversion", "Versions"),
    ("hardware_version", "hardwareversion", "Versions"),
    ("kernel_version", "kernelversion", "Versions"),
    ("client_version", "clientversion", "Versions"),
    ("receiver_version", "rx_version", "Versions"),
    ("module_geometry", "module_geometry", "Geometry"),
    ("module_size", "module_size", "Geometry"),
    ("detector_size", "detsize", "Geometry"),
    ("temperatures", "tempvalues", "Temperature"),
];

// (attribute, command, type, group)
const SETTINGS: &[(&str, &str, ValueType, &str)] = &[
    ("exposure_time", "exptime", ValueType::Float, "Acquisition"),
    ("period_between_frames", "period", ValueType::Float, "Acquisition"),
    ("delay_after_trigger", "delay", ValueType::Float, "Acquisition"),
    ("frames_per_acq", "frames", ValueType::Int, "Acquisition"),
    ("temperature_threshold", "temp_threshold", ValueType::Float, "Temperature"),
    ("high_voltage", "highvoltage", ValueType::Int, "Power"),
    ("power_chip", "powerchip", ValueType::Int, "Power"),
];

/// `Internal`/`External` trigger source.
pub fn trigger_modes() -> AppResult<Arc<EnumTranslator>> {
    Ok(Arc::new(EnumTranslator::new([("Internal", 0), ("External", 1)])?))
}

/// Gain switching modes.
pub fn gain_modes() -> AppResult<Arc<EnumTranslator>> {
    Ok(Arc::new(EnumTranslator::new([
        ("Dynamic", 0),
        ("ForceSwitchG1", 1),
        ("ForceSwitchG2", 2),
        ("FixG1", 3),
        ("FixG2", 4),
        ("FixG0", 5),
    ])?))
}

/// Detector run status.
pub fn run_status() -> AppResult<Arc<EnumTranslator>> {
    Ok(Arc::new(EnumTranslator::new([
        ("Idle", 0),
        ("Error", 1),
        ("Waiting", 2),
        ("RunFinished", 3),
        ("Transmitting", 4),
        ("Running", 5),
        ("Stopped", 6),
    ])?))
}

/// `Off`/`On` switch.
pub fn on_off() -> AppResult<Arc<EnumTranslator>> {
    Ok(Arc::new(EnumTranslator::new([("Off", 0), ("On", 1)])?))
}

/// Register the static attributes, the pedestal group and the commands.
pub fn register_detector_attributes(
    registry: &mut AttributeRegistry,
    config: &EngineConfig,
) -> AppResult<()> {
    let polling = &config.polling;
    let period = polling.default_period;

    for (name, command, group) in VERSION_STRINGS {
        registry.register(
            AttributeDescriptor::read_only(*name, ValueType::String)
                .with_group(*group)
                .with_update_period(period),
            Binding::simple(*command),
        )?;
    }

    registry.register(
        AttributeDescriptor::read_only("dynamic_range", ValueType::Int)
            .with_group("Acquisition")
            .with_update_period(period),
        Binding::simple("dr"),
    )?;
    registry.register(
        AttributeDescriptor::read_only("frames_left", ValueType::Int)
            .with_group("Status")
            .with_update_period(polling.state_period),
        Binding::simple("framesl"),
    )?;
    let status = run_status()?;
    registry.register(
        AttributeDescriptor::read_only("status", status.value_type())
            .with_group("Status")
            .with_update_period(polling.state_period),
        Binding::enumerated("status", status),
    )?;

    for (name, command, value_type, group) in SETTINGS {
        registry.register(
            AttributeDescriptor::read_write(*name, value_type.clone())
                .with_group(*group)
                .with_update_period(period),
            Binding::simple(*command),
        )?;
    }

    for (name, command, translator) in [
        ("trigger_mode", "timing", trigger_modes()?),
        ("gain_mode", "gainmode", gain_modes()?),
    ] {
        registry.register(
            AttributeDescriptor::read_write(name, translator.value_type())
                .with_group("Acquisition")
                .with_update_period(period),
            Binding::enumerated(command, translator),
        )?;
    }

    registry.register(
        AttributeDescriptor::read_only("temperature_event", ValueType::Bool)
            .with_group("Temperature")
            .with_update_period(period),
        Binding::computed(EventFlagSource::new(config.events.event_command.clone())),
    )?;

    register_pedestal(registry, period)?;

    let commands = [
        CommandBinding::new("start_acquisition", ["start"]),
        CommandBinding::new("stop_acquisition", ["stop", "clearbusy"]),
        CommandBinding::new("start_receiver", ["rx_start"]),
        CommandBinding::new("stop_receiver", ["rx_stop"]),
        CommandBinding::new("reset_overheat_event", [config.events.reset_command.clone()]),
    ];
    for command in commands {
        registry.register_command(command)?;
    }

    Ok(())
}

/// Frames and loops are staged; flipping the state pushes all three.
fn register_pedestal(registry: &mut AttributeRegistry, period: Duration) -> AppResult<()> {
    let state = on_off()?;
    registry.register_group(
        CompositeGroup::new(
            PEDESTAL_GROUP,
            "pedestalmode",
            CompositeTrigger::new("pedestal_mode_state", "enable", state.clone()),
        )
        .with_member("pedestal_mode_frames", "frames")
        .with_member("pedestal_mode_loops", "loops"),
    )?;

    for name in ["pedestal_mode_frames", "pedestal_mode_loops"] {
        registry.register(
            AttributeDescriptor::read_write(name, ValueType::Int).with_group("Pedestal"),
            Binding::composite(PEDESTAL_GROUP),
        )?;
    }
    registry.register(
        AttributeDescriptor::read_write("pedestal_mode_state", state.value_type())
            .with_group("Pedestal")
            .with_update_period(period),
        Binding::composite(PEDESTAL_GROUP),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Direction;
    use crate::simulated::SimulatedDetector;

    fn catalog() -> AttributeRegistry {
        let mut registry = AttributeRegistry::new(Arc::new(SimulatedDetector::jungfrau(1, 2)));
        register_detector_attributes(&mut registry, &EngineConfig::default()).unwrap();
        registry.seal().unwrap();
        registry
    }

    #[test]
    fn test_catalog_registers_everything() {
        let registry = catalog();
        assert_eq!(registry.len(), 26);
        assert_eq!(
            registry.list_commands(),
            vec![
                "reset_overheat_event",
                "start_acquisition",
                "start_receiver",
                "stop_acquisition",
                "stop_receiver"
            ]
        );
    }

    #[test]
    fn test_directions_and_periods() {
        let registry = catalog();
        let status = registry.get("status").unwrap();
        assert_eq!(status.direction(), Direction::ReadOnly);
        assert!(!registry.get("temperature_event").unwrap().is_writable());
        assert!(registry.get("exposure_time").unwrap().is_writable());

        assert_eq!(registry.get("pedestal_mode_frames").unwrap().update_period(), None);
        assert_eq!(
            registry.get("pedestal_mode_state").unwrap().update_period(),
            Some(Duration::from_millis(200))
        );
    }

    #[test]
    fn test_every_translator_round_trips() {
        for translator in [trigger_modes(), gain_modes(), run_status(), on_off()] {
            let translator = translator.unwrap();
            for (symbol, code) in translator.entries() {
                assert_eq!(translator.translate(code), Some(symbol));
                assert_eq!(translator.translate_inverse(symbol), Some(code));
            }
        }
    }

    #[tokio::test]
    async fn test_catalog_reads_against_simulator() {
        let registry = catalog();
        for info in registry.list_attributes() {
            registry.refresh(&info.name).await.unwrap();
        }
        assert_eq!(
            registry.read("status").await.unwrap(),
            crate::value::AttributeValue::Enum("Idle".into())
        );
    }
}
