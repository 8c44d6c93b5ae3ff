//! Device element interface and registry
//!
//! Instruments are exposed to the scan engine as a flat set of addressable
//! *elements*. An element is either a variable (readable and/or writable)
//! or an action (invocable, optionally with one argument). The wire
//! protocol behind an element is not this crate's concern: drivers
//! implement [`Element`] and register the result in a [`DeviceRegistry`].
//!
//! # Addresses
//!
//! Element addresses are dotted paths. The first segment is the device
//! name (`dummy.amplitude` belongs to device `dummy`). Device names take
//! part in `$eval:` expressions, where `dummy.amplitude` reads the element.
//!
//! # Components
//!
//! - [`Element`] - Capability trait implemented by drivers
//! - [`ElementRef`] - Cheap cloneable handle stored in recipes
//! - [`DeviceRegistry`] - Address-keyed lookup of elements
//! - [`ElementResolver`] - Address lookup used when importing configurations
//! - [`ElementSaver`] - Persistence capability for non-scalar payloads
//! - [`SimulatedElement`] - Closure-backed element for tests and demos

pub mod saver;
pub mod simulated;

pub use saver::{ElementSaver, TextFileSaver};
pub use simulated::{dummy_device, SimulatedElement};

use crate::error::{Result, ScanError};
use crate::types::{Value, ValueType};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

/// What an element can do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// A value that can be read and/or written
    Variable {
        /// Element supports `read`
        readable: bool,
        /// Element supports `write`
        writable: bool,
    },
    /// An invocable function
    Action {
        /// Type of the optional argument
        parameter: Option<ValueType>,
    },
}

impl ElementKind {
    /// Readable and writable variable
    pub fn read_write() -> Self {
        ElementKind::Variable {
            readable: true,
            writable: true,
        }
    }

    /// Read-only variable
    pub fn read_only() -> Self {
        ElementKind::Variable {
            readable: true,
            writable: false,
        }
    }

    /// Returns true if an action of this kind takes an argument
    pub fn takes_argument(&self) -> bool {
        matches!(self, ElementKind::Action { parameter: Some(_) })
    }

    /// Returns true if the element can be read
    pub fn is_readable(&self) -> bool {
        matches!(self, ElementKind::Variable { readable: true, .. })
    }

    /// Returns true if the element can be written
    pub fn is_writable(&self) -> bool {
        matches!(self, ElementKind::Variable { writable: true, .. })
    }
}

/// Capability interface of one device element
///
/// Implementations must be thread safe: the scan worker calls them from
/// its own thread while the caller may still hold handles.
#[cfg_attr(test, mockall::automock)]
pub trait Element: Send + Sync {
    /// Full dotted address of this element
    fn address(&self) -> String;

    /// Declared type of the values this element reads, writes or accepts
    fn value_type(&self) -> ValueType;

    /// What this element can do
    fn kind(&self) -> ElementKind;

    /// Read the current value
    fn read(&self) -> Result<Value> {
        Err(ScanError::device(self.address(), "element is not readable"))
    }

    /// Write a new value
    fn write(&self, _value: Value) -> Result<()> {
        Err(ScanError::device(self.address(), "element is not writable"))
    }

    /// Invoke the element, with an argument if the action takes one
    fn invoke(&self, _argument: Option<Value>) -> Result<Value> {
        Err(ScanError::device(self.address(), "element is not invocable"))
    }
}

/// Cloneable handle to a registered element
///
/// Caches the address, type and kind so recipes can be inspected without
/// calling into the driver.
#[derive(Clone)]
pub struct ElementRef {
    address: String,
    value_type: ValueType,
    kind: ElementKind,
    inner: Arc<dyn Element>,
}

impl ElementRef {
    /// Wrap an element
    pub fn new(inner: Arc<dyn Element>) -> Self {
        Self {
            address: inner.address(),
            value_type: inner.value_type(),
            kind: inner.kind(),
            inner,
        }
    }

    /// Full dotted address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Last address segment, used as the default step name
    pub fn name(&self) -> &str {
        self.address.rsplit('.').next().unwrap_or(&self.address)
    }

    /// Device name (first address segment)
    pub fn device(&self) -> &str {
        self.address.split('.').next().unwrap_or(&self.address)
    }

    /// Declared value type
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Element kind
    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Read the element
    pub fn read(&self) -> Result<Value> {
        self.inner.read()
    }

    /// Write to the element
    pub fn write(&self, value: Value) -> Result<()> {
        self.inner.write(value)
    }

    /// Invoke the element
    pub fn invoke(&self, argument: Option<Value>) -> Result<Value> {
        self.inner.invoke(argument)
    }
}

impl std::fmt::Debug for ElementRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementRef")
            .field("address", &self.address)
            .field("value_type", &self.value_type)
            .field("kind", &self.kind)
            .finish()
    }
}

impl PartialEq for ElementRef {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Looks up elements by address
pub trait ElementResolver {
    /// Resolve an address to an element handle
    fn resolve(&self, address: &str) -> Option<ElementRef>;
}

/// Registry of all elements of the currently opened devices
#[derive(Default, Debug)]
pub struct DeviceRegistry {
    elements: BTreeMap<String, ElementRef>,
}

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one element; fails if the address is already taken
    pub fn insert(&mut self, element: Arc<dyn Element>) -> Result<ElementRef> {
        let handle = ElementRef::new(element);
        if self.elements.contains_key(handle.address()) {
            return Err(ScanError::NameConflict(handle.address().to_string()));
        }
        self.elements
            .insert(handle.address().to_string(), handle.clone());
        Ok(handle)
    }

    /// Register all elements of a device
    pub fn insert_device(&mut self, elements: Vec<Arc<dyn Element>>) -> Result<()> {
        for element in elements {
            self.insert(element)?;
        }
        Ok(())
    }

    /// Remove every element of a device, returning how many were removed
    pub fn remove_device(&mut self, device: &str) -> usize {
        let before = self.elements.len();
        self.elements
            .retain(|_, element| element.device() != device);
        before - self.elements.len()
    }

    /// Get an element by address
    pub fn get(&self, address: &str) -> Option<&ElementRef> {
        self.elements.get(address)
    }

    /// Get an element by address, failing with `NotFound`
    pub fn element(&self, address: &str) -> Result<ElementRef> {
        self.get(address)
            .cloned()
            .ok_or_else(|| ScanError::NotFound(format!("element '{}'", address)))
    }

    /// Names of all registered devices, sorted
    pub fn device_names(&self) -> Vec<String> {
        self.elements
            .values()
            .map(|e| e.device().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Check if a device with this name is registered
    pub fn contains_device(&self, name: &str) -> bool {
        self.elements.values().any(|e| e.device() == name)
    }

    /// All registered addresses, sorted
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.elements.keys().map(|k| k.as_str())
    }

    /// Number of registered elements
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl ElementResolver for DeviceRegistry {
    fn resolve(&self, address: &str) -> Option<ElementRef> {
        self.get(address).cloned()
    }
}

/// Thread-safe registry wrapper shared by the variable store and the engine
pub type SharedDeviceRegistry = Arc<RwLock<DeviceRegistry>>;

/// Create a new shared registry
pub fn create_shared_registry(registry: DeviceRegistry) -> SharedDeviceRegistry {
    Arc::new(RwLock::new(registry))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_dummy() -> DeviceRegistry {
        let mut registry = DeviceRegistry::new();
        registry.insert_device(dummy_device()).unwrap();
        registry
    }

    #[test]
    fn test_registry_lookup() {
        let registry = registry_with_dummy();
        let element = registry.element("dummy.amplitude").unwrap();
        assert_eq!(element.name(), "amplitude");
        assert_eq!(element.device(), "dummy");
        assert_eq!(element.value_type(), ValueType::Float);
        assert!(registry.element("dummy.missing").is_err());
    }

    #[test]
    fn test_device_names_are_unique() {
        let mut registry = registry_with_dummy();
        registry
            .insert(Arc::new(SimulatedElement::memory("other.x", Value::Int(1))))
            .unwrap();
        assert_eq!(registry.device_names(), vec!["dummy", "other"]);
        assert!(registry.contains_device("other"));
        assert!(!registry.contains_device("amplitude"));
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let mut registry = registry_with_dummy();
        let dup = Arc::new(SimulatedElement::memory("dummy.amplitude", Value::Float(0.0)));
        assert!(matches!(
            registry.insert(dup),
            Err(ScanError::NameConflict(_))
        ));
    }

    #[test]
    fn test_remove_device() {
        let mut registry = registry_with_dummy();
        let count = registry.len();
        assert_eq!(registry.remove_device("dummy"), count);
        assert!(registry.is_empty());
    }

    struct ReadOnlySensor;

    impl Element for ReadOnlySensor {
        fn address(&self) -> String {
            "sensor.level".to_string()
        }

        fn value_type(&self) -> ValueType {
            ValueType::Float
        }

        fn kind(&self) -> ElementKind {
            ElementKind::read_only()
        }

        fn read(&self) -> Result<Value> {
            Ok(Value::Float(0.5))
        }
    }

    #[test]
    fn test_default_capabilities_fail() {
        let handle = ElementRef::new(Arc::new(ReadOnlySensor));
        assert_eq!(handle.read().unwrap(), Value::Float(0.5));

        let err = handle.write(Value::Float(1.0)).unwrap_err();
        assert!(err.to_string().contains("sensor.level"));
        assert!(err.to_string().contains("not writable"));
        assert!(handle.invoke(None).is_err());
    }

    #[test]
    fn test_mock_element_handle_caches_metadata() {
        let mut mock = MockElement::new();
        mock.expect_address().times(1).return_const("mock.x".to_string());
        mock.expect_value_type().times(1).return_const(ValueType::Int);
        mock.expect_kind()
            .times(1)
            .return_const(ElementKind::Action { parameter: None });

        let handle = ElementRef::new(Arc::new(mock));
        assert_eq!(handle.address(), "mock.x");
        assert_eq!(handle.address(), "mock.x");
        assert!(!handle.kind().takes_argument());
    }
}
