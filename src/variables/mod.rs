//! Named variables and `$eval:` evaluation
//!
//! A [`VariableStore`] holds user variables and evaluates expressions
//! against them and the device registry.
//!
//! ## Eager and deferred variables
//!
//! A variable whose raw value refers to no known device or variable is
//! evaluated when it is set, and the result is cached for display. A
//! variable that does refer to one is *deferred*: its value depends on live
//! state and is computed each time it is used.
//!
//! ## Snapshots
//!
//! Evaluation runs against an immutable snapshot of the variables. Each
//! mutation publishes a new snapshot, so an evaluation in progress never
//! observes a half-applied change.

use crate::device::{DeviceRegistry, SharedDeviceRegistry};
use crate::error::{Result, ResultExt, ScanError};
use crate::recipe::RunActivity;
use crate::scripting::{
    has_eval, identifier_paths, insert_path, references_name, root_names, root_segment,
    strip_eval, to_dynamic, ExpressionEngine,
};
use crate::types::{clean_name, Value, ValueType};
use rhai::{Dynamic, Map, Scope};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use tracing::{debug, warn};

/// Maximum nesting of variables referring to other deferred variables
pub const MAX_EVAL_DEPTH: usize = 16;

/// Cached evaluation state of a variable
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Last successfully evaluated value
    Ready(Value),
    /// Depends on live devices or variables; evaluated on use
    Deferred,
    /// The last evaluation failed with this message
    Failed(String),
}

/// A named value, possibly defined by an expression
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    name: String,
    raw: Value,
    resolution: Resolution,
}

impl Variable {
    /// Variable name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value as entered (literal or `$eval:` expression)
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Cached evaluation state
    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    /// The cached value, if the last evaluation succeeded
    pub fn value(&self) -> Option<&Value> {
        match &self.resolution {
            Resolution::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// Returns true if the variable is evaluated on use
    pub fn is_deferred(&self) -> bool {
        self.resolution == Resolution::Deferred
    }

    /// Type of the cached value, or of the raw value when unresolved
    pub fn value_type(&self) -> ValueType {
        self.value().unwrap_or(&self.raw).value_type()
    }
}

type Namespace = BTreeMap<String, Variable>;

/// Registry of named variables
pub struct VariableStore {
    namespace: Arc<Namespace>,
    devices: SharedDeviceRegistry,
    engine: ExpressionEngine,
    activity: Option<RunActivity>,
}

impl std::fmt::Debug for VariableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableStore")
            .field("variables", &self.namespace.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl VariableStore {
    /// Create an empty store evaluating against `devices`
    pub fn new(devices: SharedDeviceRegistry) -> Self {
        Self {
            namespace: Arc::new(Namespace::new()),
            devices,
            engine: ExpressionEngine::new(),
            activity: None,
        }
    }

    /// Reject mutations while `activity` is set
    pub fn attach_activity(&mut self, activity: RunActivity) {
        self.activity = Some(activity);
    }

    /// Returns true if a scan is running
    pub fn is_busy(&self) -> bool {
        self.activity.as_ref().is_some_and(RunActivity::is_active)
    }

    fn ensure_idle(&self, operation: &str) -> Result<()> {
        if self.is_busy() {
            warn!("Rejected '{}' while a scan is running", operation);
            return Err(ScanError::Busy(format!(
                "cannot {} while a scan is running",
                operation
            )));
        }
        Ok(())
    }

    fn registry(&self) -> Result<RwLockReadGuard<'_, DeviceRegistry>> {
        self.devices
            .read()
            .map_err(|e| ScanError::Channel(format!("Failed to acquire device registry lock: {}", e)))
    }

    fn validated_name(name: &str) -> Result<String> {
        let cleaned = clean_name(name);
        let mut chars = cleaned.chars();
        let valid = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(ScanError::InvalidConfiguration(format!(
                "'{}' is not a valid variable name",
                name
            )));
        }
        Ok(cleaned)
    }

    // ===== Lookup =====

    /// Get a variable by name
    pub fn get(&self, name: &str) -> Result<&Variable> {
        self.namespace
            .get(name)
            .ok_or_else(|| ScanError::NotFound(format!("variable '{}'", name)))
    }

    /// Check if a variable exists
    pub fn contains(&self, name: &str) -> bool {
        self.namespace.contains_key(name)
    }

    /// Variable names, sorted
    pub fn list(&self) -> Vec<&str> {
        self.namespace.keys().map(String::as_str).collect()
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.namespace.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.namespace.is_empty()
    }

    /// Variable names and device addresses starting with `prefix`, sorted
    pub fn complete(&self, prefix: &str) -> Result<Vec<String>> {
        let registry = self.registry()?;
        let mut matches: BTreeSet<String> = self
            .namespace
            .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .map(|(name, _)| name)
            .take_while(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        matches.extend(
            registry
                .addresses()
                .filter(|address| address.starts_with(prefix))
                .map(str::to_string),
        );
        Ok(matches.into_iter().collect())
    }

    /// Returns true if `text` refers to a known device or variable
    pub fn references_known(&self, text: &str) -> Result<bool> {
        let registry = self.registry()?;
        Ok(self.references_known_in(&registry, text))
    }

    fn references_known_in(&self, registry: &DeviceRegistry, text: &str) -> bool {
        root_names(text)
            .into_iter()
            .any(|root| self.namespace.contains_key(root) || registry.contains_device(root))
    }

    /// Returns true if `expression` uses `name` outside of quotes
    pub fn has_circular_reference(name: &str, expression: &str) -> bool {
        has_eval(expression) && references_name(expression, name)
    }

    // ===== Mutation =====

    /// Create or overwrite a variable
    ///
    /// Literal values and expressions that refer to nothing live are
    /// evaluated now; an evaluation error is cached, not returned.
    /// Expressions that refer to the variable itself are rejected.
    pub fn set(&mut self, name: &str, value: Value) -> Result<Variable> {
        self.ensure_idle("set a variable")?;
        let name = Self::validated_name(name)?;
        if let Value::Str(text) = &value {
            if Self::has_circular_reference(&name, text) {
                return Err(ScanError::CircularReference(name));
            }
        }

        let resolution = {
            let registry = self.registry()?;
            match value.as_str().filter(|text| has_eval(text)) {
                Some(text) if self.references_known_in(&registry, text) => Resolution::Deferred,
                Some(text) => match self.eval_expression(&registry, &self.namespace, text, 0) {
                    Ok(v) => Resolution::Ready(v),
                    Err(e) => Resolution::Failed(e.to_string()),
                },
                None => Resolution::Ready(value.clone()),
            }
        };

        let variable = Variable {
            name: name.clone(),
            raw: value,
            resolution,
        };
        debug!("Set variable '{}' = {} ({:?})", name, variable.raw, variable.resolution);
        Arc::make_mut(&mut self.namespace).insert(name, variable.clone());
        Ok(variable)
    }

    /// Create or overwrite a variable by copying another one
    pub fn set_from(&mut self, name: &str, source: &Variable) -> Result<Variable> {
        self.ensure_idle("set a variable")?;
        let name = Self::validated_name(name)?;
        if let Value::Str(text) = &source.raw {
            if Self::has_circular_reference(&name, text) {
                return Err(ScanError::CircularReference(name));
            }
        }
        let variable = Variable {
            name: name.clone(),
            raw: source.raw.clone(),
            resolution: source.resolution.clone(),
        };
        Arc::make_mut(&mut self.namespace).insert(name, variable.clone());
        Ok(variable)
    }

    /// Set several variables, e.g. from a saved configuration
    pub fn load_pairs<I, S>(&mut self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        for (name, value) in pairs {
            let name = name.as_ref();
            self.set(name, value)
                .with_context(|| format!("Failed to set variable '{}'", name))?;
        }
        Ok(())
    }

    /// Remove a variable
    pub fn remove(&mut self, name: &str) -> Result<Variable> {
        self.ensure_idle("remove a variable")?;
        if !self.contains(name) {
            return Err(ScanError::NotFound(format!("variable '{}'", name)));
        }
        let removed = Arc::make_mut(&mut self.namespace)
            .remove(name)
            .ok_or_else(|| ScanError::NotFound(format!("variable '{}'", name)))?;
        debug!("Removed variable '{}'", name);
        Ok(removed)
    }

    /// Remove every listed variable that exists; returns how many were removed
    pub fn remove_many<'a, I>(&mut self, names: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .filter(|name| self.remove(name).is_ok())
            .count()
    }

    /// Rename a variable
    ///
    /// Fails with `NameConflict` if `new_name` is taken, leaving both
    /// variables unchanged.
    pub fn rename(&mut self, name: &str, new_name: &str) -> Result<()> {
        self.ensure_idle("rename a variable")?;
        let new_name = Self::validated_name(new_name)?;
        let variable = self.get(name)?;
        if new_name == name {
            return Ok(());
        }
        if self.contains(&new_name) {
            return Err(ScanError::NameConflict(new_name));
        }
        if let Value::Str(text) = &variable.raw {
            if Self::has_circular_reference(&new_name, text) {
                return Err(ScanError::CircularReference(new_name));
            }
        }

        let namespace = Arc::make_mut(&mut self.namespace);
        if let Some(mut variable) = namespace.remove(name) {
            variable.name = new_name.clone();
            namespace.insert(new_name.clone(), variable);
        }
        debug!("Renamed variable '{}' to '{}'", name, new_name);
        Ok(())
    }

    /// Re-evaluate a variable and cache the result
    pub fn refresh(&mut self, name: &str) -> Result<Value> {
        let result = {
            let variable = self.get(name)?;
            let registry = self.registry()?;
            self.resolve_variable(&registry, &self.namespace, variable, 0)
        };

        let resolution = match &result {
            Ok(value) => Resolution::Ready(value.clone()),
            Err(e) => Resolution::Failed(e.to_string()),
        };
        if let Some(variable) = Arc::make_mut(&mut self.namespace).get_mut(name) {
            variable.resolution = resolution;
        }
        result
    }

    // ===== Evaluation =====

    /// Evaluate a value
    ///
    /// `$eval:` strings are evaluated; every other value is returned as is.
    pub fn evaluate(&self, value: &Value) -> Result<Value> {
        match value.as_str() {
            Some(text) if has_eval(text) => self.evaluate_expression(text),
            _ => Ok(value.clone()),
        }
    }

    /// Evaluate text, coercing plain literals with [`Value::parse_literal`]
    pub fn evaluate_str(&self, text: &str) -> Result<Value> {
        if has_eval(text) {
            self.evaluate_expression(text)
        } else {
            Ok(Value::parse_literal(text))
        }
    }

    /// Evaluate a value without touching devices or deferred variables
    ///
    /// Expressions that refer to live state, or that fail, come back as
    /// their raw text.
    pub fn evaluate_safely(&self, value: &Value) -> Value {
        let Some(text) = value.as_str().filter(|text| has_eval(text)) else {
            return value.clone();
        };
        let Ok(registry) = self.registry() else {
            return value.clone();
        };
        if self.references_known_in(&registry, text) {
            return value.clone();
        }
        self.eval_expression(&registry, &self.namespace, text, 0)
            .unwrap_or_else(|_| value.clone())
    }

    fn evaluate_expression(&self, text: &str) -> Result<Value> {
        let namespace = self.namespace.clone();
        let registry = self.registry()?;
        self.eval_expression(&registry, &namespace, text, 0)
    }

    fn resolve_variable(
        &self,
        registry: &DeviceRegistry,
        namespace: &Namespace,
        variable: &Variable,
        depth: usize,
    ) -> Result<Value> {
        if depth > MAX_EVAL_DEPTH {
            return Err(ScanError::CircularReference(variable.name.clone()));
        }
        match variable.raw.as_str() {
            Some(text) if has_eval(text) => self.eval_expression(registry, namespace, text, depth),
            _ => Ok(variable.raw.clone()),
        }
    }

    fn eval_expression(
        &self,
        registry: &DeviceRegistry,
        namespace: &Namespace,
        text: &str,
        depth: usize,
    ) -> Result<Value> {
        let body = strip_eval(text);
        let mut scope = Scope::new();

        for root in root_names(body) {
            if let Some(variable) = namespace.get(root) {
                let value = self.resolve_variable(registry, namespace, variable, depth + 1)?;
                scope.push_constant_dynamic(root.to_string(), to_dynamic(&value));
            } else if registry.contains_device(root) {
                let device = read_device_paths(registry, body, root)?;
                scope.push_constant_dynamic(root.to_string(), Dynamic::from_map(device));
            }
        }

        self.engine.eval(body, &mut scope)
    }
}

/// Read every element of `device` that `body` refers to
///
/// Each dotted path is matched against its longest prefix that is a
/// readable element address; the value is exposed under that path.
fn read_device_paths(registry: &DeviceRegistry, body: &str, device: &str) -> Result<Map> {
    let mut map = Map::new();
    let mut read = BTreeSet::new();

    for path in identifier_paths(body) {
        if root_segment(path) != device {
            continue;
        }
        let segments: Vec<&str> = path.split('.').collect();
        for n in (2..=segments.len()).rev() {
            let address = segments[..n].join(".");
            let Some(element) = registry.get(&address) else {
                continue;
            };
            if element.kind().is_readable() && read.insert(address.clone()) {
                let value = element
                    .read()
                    .with_context(|| format!("Failed to read '{}'", address))?;
                insert_path(&mut map, &segments[1..n], to_dynamic(&value));
            }
            break;
        }
    }
    Ok(map)
}

/// Thread-safe store shared between the caller and the scan worker
pub type SharedVariableStore = Arc<RwLock<VariableStore>>;

/// Create a new shared store
pub fn create_shared_store(store: VariableStore) -> SharedVariableStore {
    Arc::new(RwLock::new(store))
}
