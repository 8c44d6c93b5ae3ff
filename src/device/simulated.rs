//! Simulated elements for testing and demos without hardware
//!
//! [`SimulatedElement`] is backed by closures, so tests can script any
//! behaviour (including failures on the n-th call). [`dummy_device`]
//! builds a small self-consistent instrument used by the CLI.

use crate::device::{Element, ElementKind};
use crate::error::{Result, ScanError};
use crate::types::{Value, ValueType};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Reader = Box<dyn Fn() -> Result<Value> + Send + Sync>;
type Writer = Box<dyn Fn(Value) -> Result<()> + Send + Sync>;
type Invoker = Box<dyn Fn(Option<Value>) -> Result<Value> + Send + Sync>;

/// A closure-backed device element
pub struct SimulatedElement {
    address: String,
    value_type: ValueType,
    kind: ElementKind,
    reader: Option<Reader>,
    writer: Option<Writer>,
    invoker: Option<Invoker>,
}

impl SimulatedElement {
    /// Create a variable element with no behaviour attached yet
    pub fn variable(address: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            address: address.into(),
            value_type,
            kind: ElementKind::Variable {
                readable: false,
                writable: false,
            },
            reader: None,
            writer: None,
            invoker: None,
        }
    }

    /// Create an action element; `parameter` is the argument type if any
    pub fn action(address: impl Into<String>, parameter: Option<ValueType>) -> Self {
        Self {
            address: address.into(),
            value_type: parameter.unwrap_or(ValueType::None),
            kind: ElementKind::Action { parameter },
            reader: None,
            writer: None,
            invoker: None,
        }
    }

    /// Create a read/write element that stores the last written value
    pub fn memory(address: impl Into<String>, initial: Value) -> Self {
        let value_type = initial.value_type();
        let cell = Arc::new(Mutex::new(initial));
        let read_cell = cell.clone();
        Self::variable(address, value_type)
            .with_reader(move || {
                read_cell
                    .lock()
                    .map(|v| v.clone())
                    .map_err(|e| ScanError::Channel(e.to_string()))
            })
            .with_writer(move |value| {
                let mut guard = cell
                    .lock()
                    .map_err(|e| ScanError::Channel(e.to_string()))?;
                *guard = value;
                Ok(())
            })
    }

    /// Attach a read behaviour
    pub fn with_reader<F>(mut self, reader: F) -> Self
    where
        F: Fn() -> Result<Value> + Send + Sync + 'static,
    {
        self.reader = Some(Box::new(reader));
        self.update_variable_kind();
        self
    }

    /// Attach a write behaviour
    pub fn with_writer<F>(mut self, writer: F) -> Self
    where
        F: Fn(Value) -> Result<()> + Send + Sync + 'static,
    {
        self.writer = Some(Box::new(writer));
        self.update_variable_kind();
        self
    }

    /// Attach an invoke behaviour (actions only)
    pub fn with_invoker<F>(mut self, invoker: F) -> Self
    where
        F: Fn(Option<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.invoker = Some(Box::new(invoker));
        self
    }

    fn update_variable_kind(&mut self) {
        if let ElementKind::Variable { .. } = self.kind {
            self.kind = ElementKind::Variable {
                readable: self.reader.is_some(),
                writable: self.writer.is_some(),
            };
        }
    }
}

impl std::fmt::Debug for SimulatedElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedElement")
            .field("address", &self.address)
            .field("value_type", &self.value_type)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Element for SimulatedElement {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn value_type(&self) -> ValueType {
        self.value_type
    }

    fn kind(&self) -> ElementKind {
        self.kind
    }

    fn read(&self) -> Result<Value> {
        match &self.reader {
            Some(reader) => reader(),
            None => Err(ScanError::device(&self.address, "element is not readable")),
        }
    }

    fn write(&self, value: Value) -> Result<()> {
        match &self.writer {
            Some(writer) => writer(value),
            None => Err(ScanError::device(&self.address, "element is not writable")),
        }
    }

    fn invoke(&self, argument: Option<Value>) -> Result<Value> {
        match &self.invoker {
            Some(invoker) => invoker(argument),
            None => Err(ScanError::device(&self.address, "element is not invocable")),
        }
    }
}

/// Number of points in the simulated spectrum
const SPECTRUM_POINTS: usize = 16;

/// Longest sleep the simulated `dummy.sleep` action honours
const MAX_SIMULATED_SLEEP: Duration = Duration::from_secs(5);

/// Build the elements of the simulated `dummy` instrument
///
/// - `dummy.amplitude` (float, read/write)
/// - `dummy.phase` (float, read/write)
/// - `dummy.spectrum` (array, read-only, scaled by amplitude and phase)
/// - `dummy.label` (string, read/write)
/// - `dummy.reset` (action, resets amplitude and phase to zero)
/// - `dummy.sleep` (action, sleeps for the given number of seconds)
pub fn dummy_device() -> Vec<Arc<dyn Element>> {
    let amplitude = Arc::new(Mutex::new(1.0_f64));
    let phase = Arc::new(Mutex::new(0.0_f64));

    let float_cell = |address: &str, cell: Arc<Mutex<f64>>| {
        let read_cell = cell.clone();
        let addr = address.to_string();
        let write_addr = address.to_string();
        SimulatedElement::variable(address, ValueType::Float)
            .with_reader(move || {
                read_cell
                    .lock()
                    .map(|v| Value::Float(*v))
                    .map_err(|e| ScanError::device(&addr, e))
            })
            .with_writer(move |value| {
                let v = value
                    .as_f64()
                    .ok_or_else(|| ScanError::device(&write_addr, "expected a number"))?;
                let mut guard = cell.lock().map_err(|e| ScanError::device(&write_addr, e))?;
                *guard = v;
                Ok(())
            })
    };

    let spectrum = {
        let amplitude = amplitude.clone();
        let phase = phase.clone();
        SimulatedElement::variable("dummy.spectrum", ValueType::Array).with_reader(move || {
            let a = amplitude
                .lock()
                .map(|v| *v)
                .map_err(|e| ScanError::device("dummy.spectrum", e))?;
            let p = phase
                .lock()
                .map(|v| *v)
                .map_err(|e| ScanError::device("dummy.spectrum", e))?;
            Ok(Value::Array(
                (0..SPECTRUM_POINTS)
                    .map(|i| a * (i as f64 * 0.4 + p).sin())
                    .collect(),
            ))
        })
    };

    let reset = {
        let amplitude = amplitude.clone();
        let phase = phase.clone();
        SimulatedElement::action("dummy.reset", None).with_invoker(move |_| {
            if let Ok(mut a) = amplitude.lock() {
                *a = 0.0;
            }
            if let Ok(mut p) = phase.lock() {
                *p = 0.0;
            }
            Ok(Value::None)
        })
    };

    let sleep = SimulatedElement::action("dummy.sleep", Some(ValueType::Float)).with_invoker(
        |argument| {
            let secs = argument
                .as_ref()
                .and_then(Value::as_f64)
                .ok_or_else(|| ScanError::device("dummy.sleep", "expected a duration in seconds"))?;
            let duration = Duration::from_secs_f64(secs.max(0.0)).min(MAX_SIMULATED_SLEEP);
            std::thread::sleep(duration);
            Ok(Value::None)
        },
    );

    vec![
        Arc::new(float_cell("dummy.amplitude", amplitude)),
        Arc::new(float_cell("dummy.phase", phase)),
        Arc::new(spectrum),
        Arc::new(SimulatedElement::memory("dummy.label", Value::Str("dummy".into()))),
        Arc::new(reset),
        Arc::new(sleep),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_element_roundtrip() {
        let element = SimulatedElement::memory("m.x", Value::Int(1));
        assert_eq!(element.kind(), ElementKind::read_write());
        element.write(Value::Int(7)).unwrap();
        assert_eq!(element.read().unwrap(), Value::Int(7));
    }

    #[test]
    fn test_variable_kind_tracks_behaviour() {
        let element =
            SimulatedElement::variable("m.y", ValueType::Float).with_reader(|| Ok(Value::Float(2.0)));
        assert_eq!(element.kind(), ElementKind::read_only());
        assert!(element.write(Value::Float(1.0)).is_err());
    }

    #[test]
    fn test_dummy_spectrum_follows_amplitude() {
        let elements = dummy_device();
        let find = |address: &str| {
            elements
                .iter()
                .find(|e| e.address() == address)
                .cloned()
                .unwrap()
        };

        find("dummy.amplitude").write(Value::Float(0.0)).unwrap();
        let Value::Array(spectrum) = find("dummy.spectrum").read().unwrap() else {
            panic!("expected an array");
        };
        assert_eq!(spectrum.len(), SPECTRUM_POINTS);
        assert!(spectrum.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_dummy_reset_action() {
        let elements = dummy_device();
        let amplitude = elements.iter().find(|e| e.address() == "dummy.amplitude").unwrap();
        let reset = elements.iter().find(|e| e.address() == "dummy.reset").unwrap();

        amplitude.write(Value::Float(3.0)).unwrap();
        reset.invoke(None).unwrap();
        assert_eq!(amplitude.read().unwrap(), Value::Float(0.0));
    }
}
