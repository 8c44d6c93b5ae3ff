//! Integration tests for device failures during a scan
//!
//! Mock elements script the exact sequence of device calls, so these tests
//! also check that the engine makes no call after a failure.

mod common;

use common::builders::{config_with, element, RecipeBuilder};
use common::mock_helpers::{mock_element, stub_device};
use common::TestBench;
use mockall::predicate::eq;
use mockall::Sequence;
use scanlab::device::ElementKind;
use scanlab::error::ScanError;
use scanlab::scan::{ScanEvent, ScanState};
use scanlab::types::{Value, ValueType};
use std::sync::Arc;

const READ_ONLY: ElementKind = ElementKind::Variable {
    readable: true,
    writable: false,
};

const READ_WRITE: ElementKind = ElementKind::Variable {
    readable: true,
    writable: true,
};

#[test]
fn test_read_failure_stops_the_sweep() {
    let stub = stub_device();
    let mut sensor = mock_element("mock.sensor", ValueType::Float, READ_ONLY);
    let mut seq = Sequence::new();
    sensor
        .expect_read()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Ok(Value::Float(1.5)));
    sensor
        .expect_read()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Err(ScanError::device("mock.sensor", "timeout")));
    stub.registry.write().unwrap().insert(Arc::new(sensor)).unwrap();

    let mut bench = TestBench::new(stub.registry.clone());
    bench.load(config_with(vec![RecipeBuilder::new("R")
        .parameter(element(&stub.registry, "stub.p"), "p")
        .range(0.0, 4.0)
        .points(5)
        .measure(element(&stub.registry, "mock.sensor"), "sensor")
        .measure(element(&stub.registry, "stub.m"), "m")]));

    let (collector, events) = bench.run_to_end();

    assert_eq!(bench.engine.state(), ScanState::Errored);
    let error = bench.engine.error().unwrap();
    assert!(matches!(
        error.root(),
        ScanError::Device { address, message } if address == "mock.sensor" && message == "timeout"
    ));
    assert!(matches!(events.last(), Some(ScanEvent::Errored { .. })));
    assert!(!events.iter().any(|e| matches!(e, ScanEvent::SweepCompleted { .. })));

    let dataset = collector.last_run().unwrap().dataset("R").unwrap();
    assert_eq!(
        dataset.rows(),
        [vec![Value::Int(1), Value::Float(0.0), Value::Float(1.5), Value::Float(0.0)]]
    );
}

#[test]
fn test_parameter_write_failure() {
    let stub = stub_device();
    let mut stage = mock_element("mock.stage", ValueType::Float, READ_WRITE);
    stage
        .expect_write()
        .with(eq(Value::Float(0.0)))
        .times(1)
        .returning(|_| Ok(()));
    stage
        .expect_write()
        .with(eq(Value::Float(1.0)))
        .times(1)
        .returning(|_| Err(ScanError::device("mock.stage", "limit switch")));
    stage.expect_read().never();
    stub.registry.write().unwrap().insert(Arc::new(stage)).unwrap();

    let mut bench = TestBench::new(stub.registry.clone());
    bench.load(config_with(vec![RecipeBuilder::new("R")
        .parameter(element(&stub.registry, "mock.stage"), "x")
        .range(0.0, 2.0)
        .points(3)
        .measure(element(&stub.registry, "stub.m"), "m")]));

    let (collector, events) = bench.run_to_end();

    assert_eq!(bench.engine.state(), ScanState::Errored);
    assert!(matches!(
        bench.engine.error().unwrap().root(),
        ScanError::Device { address, .. } if address == "mock.stage"
    ));
    assert!(events.contains(&ScanEvent::ParameterStarted {
        recipe: "R".to_string(),
        index: 1,
        value: 1.0
    }));
    assert!(!events.contains(&ScanEvent::ParameterFinished {
        recipe: "R".to_string(),
        index: 1,
        value: 1.0
    }));
    assert_eq!(collector.last_run().unwrap().dataset("R").unwrap().len(), 1);
}

#[test]
fn test_integer_parameter_receives_rounded_values() {
    let stub = stub_device();
    let mut counter = mock_element("mock.count", ValueType::Int, READ_WRITE);
    let mut seq = Sequence::new();
    for expected in [0, 2, 3] {
        counter
            .expect_write()
            .with(eq(Value::Int(expected)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
    }
    stub.registry.write().unwrap().insert(Arc::new(counter)).unwrap();

    let mut bench = TestBench::new(stub.registry.clone());
    bench.load(config_with(vec![RecipeBuilder::new("R")
        .parameter(element(&stub.registry, "mock.count"), "n")
        .range(0.0, 3.0)
        .points(3)
        .measure(element(&stub.registry, "stub.m"), "m")]));

    bench.run_to_end();
    assert_eq!(bench.engine.state(), ScanState::Finished);
}

#[test]
fn test_failing_action_reports_step() {
    let stub = stub_device();
    let mut trigger = mock_element(
        "mock.trigger",
        ValueType::None,
        ElementKind::Action { parameter: None },
    );
    trigger
        .expect_invoke()
        .with(eq(None::<Value>))
        .times(1)
        .returning(|_| Err(ScanError::device("mock.trigger", "not armed")));
    stub.registry.write().unwrap().insert(Arc::new(trigger)).unwrap();

    let mut bench = TestBench::new(stub.registry.clone());
    bench.load(config_with(vec![RecipeBuilder::new("R")
        .points(4)
        .action(element(&stub.registry, "mock.trigger"), "fire", None)]));

    let (_, events) = bench.run_to_end();

    assert_eq!(bench.engine.state(), ScanState::Errored);
    let error = bench.engine.error().unwrap();
    assert!(error.to_string().contains("fire"));
    assert!(events.contains(&ScanEvent::StepStarted {
        recipe: "R".to_string(),
        step: "fire".to_string()
    }));
    assert!(!events.contains(&ScanEvent::StepFinished {
        recipe: "R".to_string(),
        step: "fire".to_string()
    }));
}
