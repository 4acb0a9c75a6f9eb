//! End-to-end scenarios against the simulated detector.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use jungfrau_daq::simulated::AccessorCall;
use jungfrau_daq::{
    AttributeValue, CompositePayload, DaqError, Engine, EngineConfig, Freshness, RawValue,
    SimulatedDetector,
};
use tokio::time::sleep;

async fn engine(columns: u32, rows: u32) -> (Arc<SimulatedDetector>, Engine) {
    let hw = Arc::new(SimulatedDetector::jungfrau(columns, rows));
    let engine = Engine::initialise(hw.clone(), EngineConfig::default())
        .await
        .unwrap();
    (hw, engine)
}

#[tokio::test(start_paused = true)]
async fn trigger_mode_round_trip() {
    let (hw, mut engine) = engine(1, 2).await;
    let registry = engine.registry();

    registry
        .write("trigger_mode", AttributeValue::Enum("External".into()))
        .await
        .unwrap();
    assert_eq!(hw.property("timing"), Some(RawValue::Int(1)));
    assert_eq!(
        registry.read("trigger_mode").await.unwrap(),
        AttributeValue::Enum("External".into())
    );

    let err = registry
        .write("trigger_mode", AttributeValue::Enum("Unknown".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, DaqError::UnknownSymbol { .. }));
    assert_eq!(hw.property("timing"), Some(RawValue::Int(1)));

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pedestal_writes_push_once_on_trigger() {
    let (hw, mut engine) = engine(1, 2).await;
    let registry = engine.registry().clone();
    let composite_calls = || hw.count_calls(|c| matches!(c, AccessorCall::SetComposite(..)));

    registry
        .write("pedestal_mode_frames", AttributeValue::Int(10))
        .await
        .unwrap();
    registry
        .write("pedestal_mode_loops", AttributeValue::Int(2))
        .await
        .unwrap();
    assert_eq!(composite_calls(), 0);
    assert_eq!(
        registry.read("pedestal_mode_loops").await.unwrap(),
        AttributeValue::Int(2)
    );

    registry
        .write("pedestal_mode_state", AttributeValue::Enum("On".into()))
        .await
        .unwrap();
    assert_eq!(composite_calls(), 1);
    assert_eq!(
        hw.composite("pedestalmode"),
        Some(
            CompositePayload::new()
                .with("frames", 10_i64)
                .with("loops", 2_i64)
                .with("enable", true)
        )
    );
    assert_eq!(hw.receiver_metadata("pedestal").as_deref(), Some("true"));
    assert_eq!(hw.receiver_metadata("pedestal_loops").as_deref(), Some("2"));

    // the scheduled trigger refresh keeps reporting the pushed state
    sleep(Duration::from_millis(500)).await;
    assert_eq!(
        registry.get("pedestal_mode_state").unwrap().value(),
        AttributeValue::Enum("On".into())
    );
    assert_eq!(composite_calls(), 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn polling_read_only_attributes_never_mutates_hardware() {
    let (hw, mut engine) = engine(2, 2).await;
    let registry = engine.registry().clone();

    sleep(Duration::from_secs(3)).await;
    for info in registry.list_attributes() {
        if info.direction == jungfrau_daq::Direction::ReadOnly {
            registry.read(&info.name).await.unwrap();
        }
    }

    assert_eq!(hw.count_calls(AccessorCall::is_mutation), 0);
    assert_eq!(
        registry.read("firmware_version").await.unwrap(),
        AttributeValue::String("0x230524".into())
    );
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn discovery_generates_one_attribute_per_module_and_sensor() {
    let (_hw, mut engine) = engine(1, 2).await;
    let registry = engine.registry();

    let temperatures: Vec<_> = registry
        .list_attributes()
        .into_iter()
        .filter(|info| info.name.contains("Module"))
        .collect();
    assert_eq!(temperatures.len(), 4);
    let names: HashSet<_> = temperatures.iter().map(|i| i.name.clone()).collect();
    assert_eq!(names.len(), 4);
    assert!(names.contains("TemperatureAdcModule2"));
    assert!(temperatures
        .iter()
        .all(|i| i.update_period == Some(Duration::from_secs(1))));

    sleep(Duration::from_millis(1100)).await;
    assert_eq!(
        registry.get("TemperatureAdcModule2").unwrap().value(),
        AttributeValue::Float(39.0)
    );
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn zero_module_topology_aborts_initialise() {
    let hw = Arc::new(SimulatedDetector::jungfrau(0, 1));
    let result = Engine::initialise(hw, EngineConfig::default()).await;
    match result {
        Err(err) => {
            assert!(matches!(err, DaqError::Topology(_)));
            assert!(err.is_fatal_at_init());
        }
        Ok(_) => panic!("initialise accepted an empty detector"),
    }
}

#[tokio::test(start_paused = true)]
async fn background_failure_is_reported_and_recovers() {
    let (hw, mut engine) = engine(1, 1).await;
    let registry = engine.registry().clone();
    let mut failures = engine.subscribe_failures();

    sleep(Duration::from_millis(300)).await;
    hw.fail("exptime");
    let failure = loop {
        let event = failures.recv().await.unwrap();
        if event.attribute == "exposure_time" {
            break event;
        }
    };
    assert!(failure.error.contains("exptime"));

    let attr = registry.get("exposure_time").unwrap();
    assert_eq!(attr.value(), AttributeValue::Float(0.00001));
    assert_eq!(attr.reading().freshness, Freshness::Stale);

    hw.restore("exptime");
    sleep(Duration::from_millis(400)).await;
    assert_eq!(attr.reading().freshness, Freshness::Fresh);
    assert!(engine.polling_tasks() > 0);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn overheat_event_is_reset_through_hardware() {
    let (hw, mut engine) = engine(1, 1).await;
    let registry = engine.registry().clone();

    hw.set_property("temp_event", 1_i64);
    sleep(Duration::from_millis(300)).await;
    assert_eq!(
        registry.get("temperature_event").unwrap().value(),
        AttributeValue::Bool(true)
    );
    assert!(matches!(
        registry
            .write("temperature_event", AttributeValue::Bool(false))
            .await,
        Err(DaqError::ReadOnlyViolation(_))
    ));

    registry.invoke_command("reset_overheat_event").await.unwrap();
    assert!(hw
        .calls()
        .contains(&AccessorCall::Invoke("temp_event_clear".into())));
    sleep(Duration::from_millis(300)).await;
    assert_eq!(
        registry.get("temperature_event").unwrap().value(),
        AttributeValue::Bool(false)
    );

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn acquisition_commands_drive_status() {
    let (hw, mut engine) = engine(1, 1).await;
    let registry = engine.registry().clone();

    registry.invoke_command("start_acquisition").await.unwrap();
    sleep(Duration::from_millis(300)).await;
    assert_eq!(
        registry.get("status").unwrap().value(),
        AttributeValue::Enum("Running".into())
    );

    registry.invoke_command("stop_acquisition").await.unwrap();
    assert_eq!(hw.property("status"), Some(RawValue::Int(0)));
    assert!(matches!(
        registry.invoke_command("self_destruct").await,
        Err(DaqError::NotFound(_))
    ));

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_all_polling() {
    let (hw, mut engine) = engine(1, 1).await;
    sleep(Duration::from_millis(500)).await;

    engine.shutdown().await;
    assert_eq!(engine.polling_tasks(), 0);
    let calls = hw.calls().len();

    sleep(Duration::from_secs(5)).await;
    assert_eq!(hw.calls().len(), calls);
    engine.shutdown().await;
}
