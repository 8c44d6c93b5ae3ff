//! Mock construction helpers

use crossbeam_channel::{unbounded, Sender};
use scanlab::device::{
    create_shared_registry, dummy_device, DeviceRegistry, Element, ElementKind, SharedDeviceRegistry,
    SimulatedElement,
};
use scanlab::error::{Result, ScanError};
use scanlab::types::{Value, ValueType};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

mockall::mock! {
    pub Element {}

    impl Element for Element {
        fn address(&self) -> String;
        fn value_type(&self) -> ValueType;
        fn kind(&self) -> ElementKind;
        fn read(&self) -> Result<Value>;
        fn write(&self, value: Value) -> Result<()>;
        fn invoke(&self, argument: Option<Value>) -> Result<Value>;
    }
}

/// Mock with address, type and kind expectations already set
pub fn mock_element(address: &str, value_type: ValueType, kind: ElementKind) -> MockElement {
    let mut mock = MockElement::new();
    let address = address.to_string();
    mock.expect_address().returning(move || address.clone());
    mock.expect_value_type().return_const(value_type);
    mock.expect_kind().return_const(kind);
    mock
}

/// Registry with the stub device:
///
/// - `stub.p`: float cell used as the swept parameter
/// - `stub.m`: reads `2 * p`
/// - `stub.out`: records every written value
pub struct StubDevice {
    pub registry: SharedDeviceRegistry,
    pub written: Arc<Mutex<Vec<Value>>>,
}

pub fn stub_device() -> StubDevice {
    let p = Arc::new(Mutex::new(0.0_f64));
    let written = Arc::new(Mutex::new(Vec::new()));

    let write_cell = p.clone();
    let read_cell = p.clone();
    let parameter = SimulatedElement::variable("stub.p", ValueType::Float)
        .with_reader(move || Ok(Value::Float(*read_cell.lock().unwrap())))
        .with_writer(move |value| {
            *write_cell.lock().unwrap() = value.as_f64().unwrap_or(f64::NAN);
            Ok(())
        });

    let measured = SimulatedElement::variable("stub.m", ValueType::Float)
        .with_reader(move || Ok(Value::Float(*p.lock().unwrap() * 2.0)));

    let record = written.clone();
    let out = SimulatedElement::variable("stub.out", ValueType::Float).with_writer(move |value| {
        record.lock().unwrap().push(value);
        Ok(())
    });

    let mut registry = DeviceRegistry::new();
    registry.insert(Arc::new(parameter)).unwrap();
    registry.insert(Arc::new(measured)).unwrap();
    registry.insert(Arc::new(out)).unwrap();
    registry.insert_device(dummy_device()).unwrap();

    StubDevice {
        registry: create_shared_registry(registry),
        written,
    }
}

/// Writable float element failing on the `fail_on`-th write (1-based)
pub fn failing_writer(address: &str, fail_on: usize) -> SimulatedElement {
    let calls = AtomicUsize::new(0);
    let addr = address.to_string();
    SimulatedElement::variable(address, ValueType::Float)
        .with_reader(|| Ok(Value::Float(0.0)))
        .with_writer(move |_| {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == fail_on {
                Err(ScanError::device(&addr, "simulated write failure"))
            } else {
                Ok(())
            }
        })
}

/// Readable element whose reads wait for a token
///
/// Each read consumes one token sent on the returned sender. Dropping the
/// sender releases every pending and future read.
pub fn gated_reader(address: &str) -> (SimulatedElement, Sender<()>) {
    let (tx, rx) = unbounded::<()>();
    let element = SimulatedElement::variable(address, ValueType::Float).with_reader(move || {
        let _ = rx.recv();
        Ok(Value::Float(1.0))
    });
    (element, tx)
}
