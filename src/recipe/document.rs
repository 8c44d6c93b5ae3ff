//! Export/import of recipe configurations
//!
//! A [`ConfigDocument`] is the flat, serializable form of a
//! [`RecipeConfig`]: elements are stored by address and step values as
//! text. Documents are written as TOML (`.scanconf` files).
//!
//! ```toml
//! [scanlab]
//! version = "0.1.0"
//! timestamp = "2024-05-01T10:00:00+02:00"
//!
//! [[recipes]]
//! name = "recipe"
//! active = true
//!
//! [recipes.parameter]
//! name = "amplitude"
//! address = "dummy.amplitude"
//! nb_points = 11
//! start_value = 0.0
//! end_value = 10.0
//! log = false
//!
//! [[recipes.steps]]
//! name = "spectrum"
//! step_type = "measure"
//! address = "dummy.spectrum"
//! ```

use super::{
    check_step_element, step_takes_value, Parameter, RangeControl, Recipe, RecipeConfig, RecipeStep,
};
use crate::device::ElementResolver;
use crate::error::{Result, ResultExt, ScanError};
use crate::scripting::has_eval;
use crate::types::{StepKind, Value, ValueType};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Document metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentHeader {
    /// Version of scanlab that wrote the document
    pub version: String,
    /// Time of export
    pub timestamp: String,
}

impl Default for DocumentHeader {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Local::now().to_rfc3339(),
        }
    }
}

/// Serialized parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDocument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub nb_points: usize,
    pub start_value: f64,
    pub end_value: f64,
    #[serde(default)]
    pub log: bool,
    /// Fixed step, present when the step was the control edited last
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
}

/// Serialized step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDocument {
    pub name: String,
    pub step_type: StepKind,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Serialized recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeDocument {
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    pub parameter: ParameterDocument,
    #[serde(default)]
    pub steps: Vec<StepDocument>,
}

fn default_active() -> bool {
    true
}

/// A complete exported configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub scanlab: DocumentHeader,
    #[serde(default)]
    pub recipes: Vec<RecipeDocument>,
}

impl ConfigDocument {
    /// Export a configuration
    ///
    /// Float step values are written with `precision` significant digits.
    pub fn from_config(config: &RecipeConfig, precision: usize) -> Self {
        let recipes = config
            .recipes()
            .iter()
            .map(|recipe| RecipeDocument {
                name: recipe.name.clone(),
                active: recipe.active,
                parameter: ParameterDocument {
                    name: recipe.parameter.name.clone(),
                    address: recipe
                        .parameter
                        .element
                        .as_ref()
                        .map(|e| e.address().to_string()),
                    nb_points: recipe.parameter.nb_points(),
                    start_value: recipe.parameter.start(),
                    end_value: recipe.parameter.end(),
                    log: recipe.parameter.log(),
                    step: (recipe.parameter.control() == RangeControl::Step)
                        .then_some(recipe.parameter.step()),
                },
                steps: recipe
                    .steps
                    .iter()
                    .map(|step| StepDocument {
                        name: step.name.clone(),
                        step_type: step.kind,
                        address: step.element.address().to_string(),
                        value: step
                            .value
                            .as_ref()
                            .filter(|_| step.takes_value())
                            .map(|v| format_value(v, precision)),
                    })
                    .collect(),
            })
            .collect();

        Self {
            scanlab: DocumentHeader::default(),
            recipes,
        }
    }

    /// Build a configuration, resolving every address through `resolver`
    ///
    /// Fails with `Import` on the first problem; nothing is partially
    /// applied since the result is a fresh configuration.
    pub fn to_config(&self, resolver: &dyn ElementResolver) -> Result<RecipeConfig> {
        self.build(resolver)
            .map_err(|e| ScanError::Import(e.to_string()))
    }

    fn build(&self, resolver: &dyn ElementResolver) -> Result<RecipeConfig> {
        let mut recipes = Vec::with_capacity(self.recipes.len());
        for doc in &self.recipes {
            let recipe = build_recipe(doc, resolver)
                .with_context(|| format!("recipe '{}'", doc.name))?;
            recipes.push(recipe);
        }
        RecipeConfig::from_recipes(recipes)
    }

    /// Serialize as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ScanError::Import(e.to_string()))
    }

    /// Write the document to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let text = self.to_toml()?;
        std::fs::write(path, text)
            .map_err(ScanError::from)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Read a document from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(ScanError::from)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml(&text)
    }
}

fn build_recipe(doc: &RecipeDocument, resolver: &dyn ElementResolver) -> Result<Recipe> {
    let mut parameter = Parameter::default().with_range(
        doc.parameter.start_value,
        doc.parameter.end_value,
        doc.parameter.nb_points,
        doc.parameter.log,
        doc.parameter.step,
    )?;
    parameter.name = doc.parameter.name.clone();
    if let Some(address) = &doc.parameter.address {
        let element = resolver
            .resolve(address)
            .ok_or_else(|| ScanError::NotFound(format!("parameter element '{}'", address)))?;
        if !element.kind().is_writable() {
            return Err(ScanError::InvalidConfiguration(format!(
                "parameter element '{}' is not writable",
                address
            )));
        }
        parameter.element = Some(element);
    }

    let mut steps = Vec::with_capacity(doc.steps.len());
    for (i, step) in doc.steps.iter().enumerate() {
        let element = resolver.resolve(&step.address).ok_or_else(|| {
            ScanError::NotFound(format!(
                "address '{}' for step {} ({})",
                step.address,
                i + 1,
                step.name
            ))
        })?;
        check_step_element(step.step_type, &element)?;

        let value = if step_takes_value(step.step_type, &element) {
            let text = step.value.as_deref().ok_or_else(|| {
                ScanError::InvalidConfiguration(format!(
                    "missing value in step {} ({})",
                    i + 1,
                    step.name
                ))
            })?;
            Some(parse_step_value(text, element.value_type()).with_context(|| {
                format!("value of step {} ({})", i + 1, step.name)
            })?)
        } else {
            None
        };

        steps.push(RecipeStep {
            name: step.name.clone(),
            kind: step.step_type,
            element,
            value,
        });
    }

    Ok(Recipe {
        name: doc.name.clone(),
        parameter,
        steps,
        active: doc.active,
    })
}

/// Convert stored text to a step value for an element of type `target`
///
/// Expressions are kept as is. Numbers, strings and booleans are converted;
/// any other element type needs an `$eval:` expression.
fn parse_step_value(text: &str, target: ValueType) -> Result<Value> {
    if has_eval(text) {
        return Ok(Value::Str(text.to_string()));
    }
    match target {
        ValueType::Int | ValueType::Float | ValueType::Bool => {
            Value::Str(text.to_string()).convert_to(target)
        }
        ValueType::Str => Ok(Value::Str(text.to_string())),
        other => Err(ScanError::InvalidConfiguration(format!(
            "expected an $eval: expression for a {} element, got '{}'",
            other, text
        ))),
    }
}

/// Render a step value as document text
pub fn format_value(value: &Value, precision: usize) -> String {
    match value {
        Value::Float(f) => format_significant(*f, precision),
        other => other.to_string(),
    }
}

/// Round to `precision` significant digits and print the shortest form
pub fn format_significant(value: f64, precision: usize) -> String {
    if !value.is_finite() || precision == 0 {
        return value.to_string();
    }
    let rounded = format!("{:.*e}", precision - 1, value);
    rounded
        .parse::<f64>()
        .map(|v| v.to_string())
        .unwrap_or(rounded)
}
