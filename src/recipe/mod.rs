//! Recipe configuration model
//!
//! A [`RecipeConfig`] is an ordered list of named [`Recipe`]s. Each recipe
//! sweeps one [`Parameter`] and runs its ordered [`RecipeStep`]s at every
//! sweep point.
//!
//! The mutating methods on [`RecipeConfig`] only validate and apply the
//! change. History, run gating and snapshots are handled by
//! [`ConfigManager`].
//!
//! ## Naming
//!
//! Names are made unique by appending `_1`, `_2`, ... (see [`unique_name`]).
//! Recipe names are unique across the configuration; step names and the
//! parameter name are unique within their recipe.

pub mod document;
pub mod history;
pub mod manager;
pub mod sweep;

pub use document::{ConfigDocument, DocumentHeader, ParameterDocument, RecipeDocument, StepDocument};
pub use history::ConfigHistory;
pub use manager::{ConfigManager, RunActivity, DEFAULT_PRECISION};

use crate::device::{ElementKind, ElementRef};
use crate::error::{Result, ScanError};
use crate::types::{clean_name, StepKind, Value};

/// Names that cannot be used for recipes
pub const RESERVED_RECIPE_NAMES: &[&str] = &["id", "parameter", "variables", "devices"];

/// Dataset column holding the point index, unavailable to steps and parameters
pub const ID_COLUMN: &str = "id";

/// Default name of the first recipe of a new configuration
pub const DEFAULT_RECIPE_NAME: &str = "recipe";

/// Default parameter name when no element is bound
pub const DEFAULT_PARAMETER_NAME: &str = "parameter";

/// Append `_1`, `_2`, ... to `base` until it collides with no existing name
pub fn unique_name<'a, I>(base: &str, existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let taken: Vec<&str> = existing.into_iter().collect();
    let mut name = base.to_string();
    let mut counter = 0;
    while taken.contains(&name.as_str()) {
        counter += 1;
        name = format!("{}_{}", base, counter);
    }
    name
}

/// Which range control the user edited last
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RangeControl {
    /// The point count is fixed; the step is derived
    #[default]
    Points,
    /// The step is fixed; the point count is derived
    Step,
}

/// The swept parameter of a recipe
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Column name of the parameter in datasets
    pub name: String,
    /// Element written at each sweep point, if any
    pub element: Option<ElementRef>,
    start: f64,
    end: f64,
    nb_points: usize,
    step: f64,
    log: bool,
    control: RangeControl,
}

impl Default for Parameter {
    fn default() -> Self {
        Self {
            name: DEFAULT_PARAMETER_NAME.to_string(),
            element: None,
            start: 0.0,
            end: 10.0,
            nb_points: 11,
            step: 1.0,
            log: false,
            control: RangeControl::Points,
        }
    }
}

impl Parameter {
    /// Sweep start value
    pub fn start(&self) -> f64 {
        self.start
    }

    /// Sweep end value
    pub fn end(&self) -> f64 {
        self.end
    }

    /// Number of sweep points
    pub fn nb_points(&self) -> usize {
        self.nb_points
    }

    /// Distance between consecutive points (linear scale)
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Log spacing enabled
    pub fn log(&self) -> bool {
        self.log
    }

    /// The control that was edited last
    pub fn control(&self) -> RangeControl {
        self.control
    }

    /// Midpoint of the range
    pub fn center(&self) -> f64 {
        (self.start + self.end) / 2.0
    }

    /// Width of the range
    pub fn width(&self) -> f64 {
        (self.end - self.start).abs()
    }

    /// The sweep values
    pub fn values(&self) -> Result<Vec<f64>> {
        sweep::generate_values(self.start, self.end, self.nb_points, self.log)
    }

    /// Fix the point count and derive the step
    pub fn set_nb_points(&mut self, count: usize) -> Result<()> {
        self.step = sweep::step_from_count(self.start, self.end, count)?;
        self.nb_points = count;
        self.control = RangeControl::Points;
        Ok(())
    }

    /// Fix the step and derive the point count
    ///
    /// A zero step collapses the sweep to one point.
    pub fn set_step(&mut self, step: f64) -> Result<()> {
        if step == 0.0 {
            self.nb_points = 1;
            self.step = 0.0;
        } else {
            let (count, adjusted) = sweep::reconcile_from_step(self.start, self.end, step)?;
            self.nb_points = count;
            self.step = if count > 1 { adjusted } else { step };
        }
        self.control = RangeControl::Step;
        Ok(())
    }

    /// Set both range bounds; the derived control is recomputed
    pub fn set_range(&mut self, start: f64, end: f64) -> Result<()> {
        check_range(start, end, self.log)?;

        let (nb_points, step) = match self.control {
            RangeControl::Points => (
                self.nb_points,
                sweep::step_from_count(start, end, self.nb_points)?,
            ),
            RangeControl::Step if self.step == 0.0 => (1, 0.0),
            RangeControl::Step => {
                let (count, adjusted) = sweep::reconcile_from_step(start, end, self.step)?;
                (count, if count > 1 { adjusted } else { self.step })
            }
        };

        self.start = start;
        self.end = end;
        self.nb_points = nb_points;
        self.step = step;
        Ok(())
    }

    /// Move the range so that its midpoint is `center`, keeping its width
    pub fn set_center(&mut self, center: f64) -> Result<()> {
        let half = (self.end - self.start) / 2.0;
        self.set_range(center - half, center + half)
    }

    /// Resize the range around its midpoint, keeping its direction
    pub fn set_width(&mut self, width: f64) -> Result<()> {
        if !width.is_finite() || width < 0.0 {
            return Err(ScanError::InvalidRange(format!(
                "width must be a non-negative number, got {}",
                width
            )));
        }
        let center = self.center();
        let direction = if self.end < self.start { -1.0 } else { 1.0 };
        let half = direction * width / 2.0;
        self.set_range(center - half, center + half)
    }

    /// Enable or disable log spacing
    ///
    /// Enabling log mode repairs a non-positive range: a non-positive end
    /// becomes 1 and a non-positive start becomes one decade below the end.
    pub fn set_log(&mut self, log: bool) -> Result<()> {
        if log == self.log {
            return Ok(());
        }

        let (mut start, mut end) = (self.start, self.end);
        if log {
            if end <= 0.0 {
                end = 1.0;
            }
            if start <= 0.0 {
                start = 10f64.powf(end.log10() - 1.0);
            }
        }

        self.log = log;
        if let Err(e) = self.set_range(start, end) {
            self.log = !log;
            return Err(e);
        }
        Ok(())
    }

    /// Restore range fields from a document
    ///
    /// With a fixed `step` the step control is restored as edited last;
    /// otherwise the step is derived from the point count.
    pub(crate) fn with_range(
        mut self,
        start: f64,
        end: f64,
        nb_points: usize,
        log: bool,
        step: Option<f64>,
    ) -> Result<Self> {
        check_range(start, end, log)?;
        let derived = sweep::step_from_count(start, end, nb_points)?;
        match step {
            Some(step) if !step.is_finite() || step < 0.0 => {
                return Err(ScanError::InvalidStep(format!(
                    "step must be a non-negative number, got {}",
                    step
                )));
            }
            Some(step) => {
                self.step = step;
                self.control = RangeControl::Step;
            }
            None => {
                self.step = derived;
                self.control = RangeControl::Points;
            }
        }
        self.start = start;
        self.end = end;
        self.nb_points = nb_points;
        self.log = log;
        Ok(self)
    }
}

fn check_range(start: f64, end: f64, log: bool) -> Result<()> {
    if !start.is_finite() || !end.is_finite() {
        return Err(ScanError::InvalidRange(format!(
            "bounds must be finite, got ({}, {})",
            start, end
        )));
    }
    if log && (start <= 0.0 || end <= 0.0) {
        return Err(ScanError::InvalidRange(format!(
            "log sweep needs positive bounds, got ({}, {})",
            start, end
        )));
    }
    Ok(())
}

/// One operation of a recipe
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeStep {
    /// Column name, unique within the recipe
    pub name: String,
    /// What the step does
    pub kind: StepKind,
    /// Target element
    pub element: ElementRef,
    /// Value written or passed to the action (may be an `$eval:` string)
    pub value: Option<Value>,
}

impl RecipeStep {
    /// Returns true if this step carries a value
    pub fn takes_value(&self) -> bool {
        step_takes_value(self.kind, &self.element)
    }

    /// Returns true if this step produces a scalar dataset column
    pub fn is_scalar_measure(&self) -> bool {
        self.kind == StepKind::Measure && self.element.value_type().is_scalar()
    }
}

/// Check that `element` supports what a step of `kind` does with it
pub(crate) fn check_step_element(kind: StepKind, element: &ElementRef) -> Result<()> {
    let capable = match kind {
        StepKind::Measure => element.kind().is_readable(),
        StepKind::Set => element.kind().is_writable(),
        StepKind::Action => matches!(element.kind(), ElementKind::Action { .. }),
    };
    if !capable {
        return Err(ScanError::InvalidConfiguration(format!(
            "element '{}' cannot be used in a {} step",
            element.address(),
            kind
        )));
    }
    Ok(())
}

pub(crate) fn step_takes_value(kind: StepKind, element: &ElementRef) -> bool {
    match kind {
        StepKind::Set => true,
        StepKind::Action => element.kind().takes_argument(),
        StepKind::Measure => false,
    }
}

/// A parameter sweep with its step list
#[derive(Debug, Clone, PartialEq)]
pub struct Recipe {
    /// Unique recipe name
    pub name: String,
    /// Swept parameter
    pub parameter: Parameter,
    /// Ordered steps run at each sweep point
    pub steps: Vec<RecipeStep>,
    /// Whether the recipe takes part in a run
    pub active: bool,
}

impl Recipe {
    /// Create an empty, active recipe
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameter: Parameter::default(),
            steps: Vec::new(),
            active: true,
        }
    }

    /// Step and parameter names, used for uniqueness checks
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .map(|s| s.name.as_str())
            .chain(std::iter::once(self.parameter.name.as_str()))
    }

    /// Get a step by name
    pub fn step(&self, name: &str) -> Result<&RecipeStep> {
        self.steps
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ScanError::NotFound(format!("step '{}' in recipe '{}'", name, self.name)))
    }

    fn step_position(&self, name: &str) -> Result<usize> {
        self.steps
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| ScanError::NotFound(format!("step '{}' in recipe '{}'", name, self.name)))
    }

    /// Dataset header: `id`, the parameter, then scalar measure steps
    pub fn header(&self) -> Vec<String> {
        let mut header = vec![ID_COLUMN.to_string(), self.parameter.name.clone()];
        header.extend(
            self.steps
                .iter()
                .filter(|s| s.is_scalar_measure())
                .map(|s| s.name.clone()),
        );
        header
    }
}

/// The full scan configuration: an ordered list of recipes
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeConfig {
    recipes: Vec<Recipe>,
}

impl Default for RecipeConfig {
    fn default() -> Self {
        Self {
            recipes: vec![Recipe::new(DEFAULT_RECIPE_NAME)],
        }
    }
}

impl RecipeConfig {
    /// Create a configuration with one empty recipe
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration with no recipes
    pub fn empty() -> Self {
        Self {
            recipes: Vec::new(),
        }
    }

    /// Build a configuration from recipes, checking name rules
    pub fn from_recipes(recipes: Vec<Recipe>) -> Result<Self> {
        let mut config = Self::empty();
        for recipe in recipes {
            if RESERVED_RECIPE_NAMES.contains(&recipe.name.as_str()) || recipe.name.is_empty() {
                return Err(ScanError::InvalidConfiguration(format!(
                    "'{}' is not a valid recipe name",
                    recipe.name
                )));
            }
            if config.recipes.iter().any(|r| r.name == recipe.name) {
                return Err(ScanError::NameConflict(recipe.name));
            }
            let mut names: Vec<&str> = recipe.steps.iter().map(|s| s.name.as_str()).collect();
            names.push(&recipe.parameter.name);
            if names.contains(&ID_COLUMN) {
                return Err(ScanError::InvalidConfiguration(format!(
                    "'{}' is reserved in recipe '{}'",
                    ID_COLUMN, recipe.name
                )));
            }
            names.sort_unstable();
            if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
                return Err(ScanError::NameConflict(format!(
                    "{} in recipe '{}'",
                    pair[0], recipe.name
                )));
            }
            config.recipes.push(recipe);
        }
        Ok(config)
    }

    /// All recipes in declaration order
    pub fn recipes(&self) -> &[Recipe] {
        &self.recipes
    }

    /// Active recipes in declaration order
    pub fn active_recipes(&self) -> impl Iterator<Item = &Recipe> {
        self.recipes.iter().filter(|r| r.active)
    }

    /// Recipe names in declaration order
    pub fn recipe_names(&self) -> Vec<&str> {
        self.recipes.iter().map(|r| r.name.as_str()).collect()
    }

    /// Number of recipes
    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    /// Check if there are no recipes
    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    /// Get a recipe by name
    pub fn recipe(&self, name: &str) -> Result<&Recipe> {
        self.recipes
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| ScanError::NotFound(format!("recipe '{}'", name)))
    }

    fn recipe_mut(&mut self, name: &str) -> Result<&mut Recipe> {
        self.recipes
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| ScanError::NotFound(format!("recipe '{}'", name)))
    }

    fn unique_recipe_name(&self, base: &str, exclude: Option<&str>) -> Result<String> {
        let base = clean_name(base);
        if base.is_empty() {
            return Err(ScanError::InvalidConfiguration(
                "recipe name is empty".to_string(),
            ));
        }
        let existing = self
            .recipes
            .iter()
            .map(|r| r.name.as_str())
            .filter(|name| Some(*name) != exclude)
            .chain(RESERVED_RECIPE_NAMES.iter().copied());
        Ok(unique_name(&base, existing))
    }

    /// Check the configuration can be run
    ///
    /// Requires at least one active recipe, no active recipe without steps
    /// and a valid sweep for every active recipe.
    pub fn validate(&self) -> Result<()> {
        if self.active_recipes().next().is_none() {
            return Err(ScanError::InvalidConfiguration(
                "no active recipe".to_string(),
            ));
        }
        for recipe in self.active_recipes() {
            if recipe.steps.is_empty() {
                return Err(ScanError::InvalidConfiguration(format!(
                    "recipe '{}' has no steps",
                    recipe.name
                )));
            }
            recipe.parameter.values().map_err(|e| {
                ScanError::InvalidConfiguration(format!("recipe '{}': {}", recipe.name, e))
            })?;
        }
        Ok(())
    }

    /// Total number of points of a run over the active recipes
    pub fn total_points(&self) -> usize {
        self.active_recipes()
            .map(|r| r.parameter.nb_points())
            .sum()
    }

    // ===== Recipes =====

    /// Add an empty recipe, returning its unique name
    pub fn add_recipe(&mut self, name: &str) -> Result<String> {
        let name = self.unique_recipe_name(name, None)?;
        self.recipes.push(Recipe::new(name.clone()));
        Ok(name)
    }

    /// Remove a recipe
    pub fn remove_recipe(&mut self, name: &str) -> Result<Recipe> {
        let position = self
            .recipes
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| ScanError::NotFound(format!("recipe '{}'", name)))?;
        Ok(self.recipes.remove(position))
    }

    /// Rename a recipe, returning the unique name actually used
    pub fn rename_recipe(&mut self, name: &str, new_name: &str) -> Result<String> {
        self.recipe(name)?;
        if name == new_name {
            return Ok(name.to_string());
        }
        let new_name = self.unique_recipe_name(new_name, Some(name))?;
        self.recipe_mut(name)?.name = new_name.clone();
        Ok(new_name)
    }

    /// Include or exclude a recipe from runs
    pub fn set_recipe_active(&mut self, name: &str, active: bool) -> Result<()> {
        self.recipe_mut(name)?.active = active;
        Ok(())
    }

    // ===== Parameter =====

    /// Bind the parameter to an element (or unbind it)
    ///
    /// Without an explicit name the element's name is used. Returns the
    /// unique parameter name.
    pub fn set_parameter(
        &mut self,
        recipe: &str,
        element: Option<ElementRef>,
        name: Option<&str>,
    ) -> Result<String> {
        let recipe = self.recipe_mut(recipe)?;
        if let Some(element) = &element {
            if !element.kind().is_writable() {
                return Err(ScanError::InvalidConfiguration(format!(
                    "element '{}' is not writable",
                    element.address()
                )));
            }
        }

        let base = match (name, &element) {
            (Some(name), _) => name.to_string(),
            (None, Some(element)) => element.name().to_string(),
            (None, None) => recipe.parameter.name.clone(),
        };
        let taken = recipe.steps.iter().map(|s| s.name.as_str()).chain([ID_COLUMN]);
        let name = unique_name(&base, taken);
        recipe.parameter.element = element;
        recipe.parameter.name = name.clone();
        Ok(name)
    }

    /// Rename the parameter, returning the unique name actually used
    pub fn set_parameter_name(&mut self, recipe: &str, name: &str) -> Result<String> {
        let recipe = self.recipe_mut(recipe)?;
        if name == recipe.parameter.name {
            return Ok(name.to_string());
        }
        if name.is_empty() {
            return Err(ScanError::InvalidConfiguration(
                "parameter name is empty".to_string(),
            ));
        }
        let taken = recipe.steps.iter().map(|s| s.name.as_str()).chain([ID_COLUMN]);
        let name = unique_name(name, taken);
        recipe.parameter.name = name.clone();
        Ok(name)
    }

    /// Change only the parameter element, keeping its name
    pub fn set_parameter_element(&mut self, recipe: &str, element: Option<ElementRef>) -> Result<()> {
        let name = self.recipe(recipe)?.parameter.name.clone();
        self.set_parameter(recipe, element, Some(&name))?;
        Ok(())
    }

    /// Fix the point count of a recipe's sweep
    pub fn set_nb_points(&mut self, recipe: &str, count: usize) -> Result<()> {
        self.recipe_mut(recipe)?.parameter.set_nb_points(count)
    }

    /// Fix the step of a recipe's sweep
    pub fn set_step(&mut self, recipe: &str, step: f64) -> Result<()> {
        self.recipe_mut(recipe)?.parameter.set_step(step)
    }

    /// Set the range of a recipe's sweep
    pub fn set_range(&mut self, recipe: &str, start: f64, end: f64) -> Result<()> {
        self.recipe_mut(recipe)?.parameter.set_range(start, end)
    }

    /// Move the range of a recipe's sweep around a new midpoint
    pub fn set_center(&mut self, recipe: &str, center: f64) -> Result<()> {
        self.recipe_mut(recipe)?.parameter.set_center(center)
    }

    /// Resize the range of a recipe's sweep around its midpoint
    pub fn set_width(&mut self, recipe: &str, width: f64) -> Result<()> {
        self.recipe_mut(recipe)?.parameter.set_width(width)
    }

    /// Toggle log spacing of a recipe's sweep
    pub fn set_log(&mut self, recipe: &str, log: bool) -> Result<()> {
        self.recipe_mut(recipe)?.parameter.set_log(log)
    }

    // ===== Steps =====

    /// Append a step, returning its unique name
    ///
    /// Steps that carry a value get a type default when none is given.
    /// Measure steps never carry a value.
    pub fn add_step(
        &mut self,
        recipe: &str,
        kind: StepKind,
        element: ElementRef,
        name: Option<&str>,
        value: Option<Value>,
    ) -> Result<String> {
        let recipe = self.recipe_mut(recipe)?;

        check_step_element(kind, &element)?;

        let value = if step_takes_value(kind, &element) {
            Some(value.unwrap_or_else(|| element.value_type().default_value()))
        } else {
            None
        };

        let base = name.unwrap_or_else(|| element.name());
        if base.is_empty() {
            return Err(ScanError::InvalidConfiguration(
                "step name is empty".to_string(),
            ));
        }
        let name = unique_name(base, recipe.names().chain([ID_COLUMN]));
        recipe.steps.push(RecipeStep {
            name: name.clone(),
            kind,
            element,
            value,
        });
        Ok(name)
    }

    /// Remove a step
    pub fn remove_step(&mut self, recipe: &str, name: &str) -> Result<RecipeStep> {
        let recipe = self.recipe_mut(recipe)?;
        let position = recipe.step_position(name)?;
        Ok(recipe.steps.remove(position))
    }

    /// Rename a step, returning the unique name actually used
    pub fn rename_step(&mut self, recipe: &str, name: &str, new_name: &str) -> Result<String> {
        let recipe = self.recipe_mut(recipe)?;
        let position = recipe.step_position(name)?;
        if name == new_name {
            return Ok(name.to_string());
        }
        if new_name.is_empty() {
            return Err(ScanError::InvalidConfiguration(
                "step name is empty".to_string(),
            ));
        }
        let taken = recipe.names().filter(|n| *n != name).chain([ID_COLUMN]);
        let new_name = unique_name(new_name, taken);
        recipe.steps[position].name = new_name.clone();
        Ok(new_name)
    }

    /// Reorder steps to follow `order`, which must name every step once
    pub fn reorder_steps(&mut self, recipe: &str, order: &[&str]) -> Result<()> {
        let recipe = self.recipe_mut(recipe)?;
        if order.len() != recipe.steps.len() {
            return Err(ScanError::InvalidConfiguration(format!(
                "expected {} step names, got {}",
                recipe.steps.len(),
                order.len()
            )));
        }

        let mut positions = Vec::with_capacity(order.len());
        for name in order {
            let position = recipe.step_position(name)?;
            if positions.contains(&position) {
                return Err(ScanError::InvalidConfiguration(format!(
                    "step '{}' is listed twice",
                    name
                )));
            }
            positions.push(position);
        }

        let steps = std::mem::take(&mut recipe.steps);
        let mut slots: Vec<Option<RecipeStep>> = steps.into_iter().map(Some).collect();
        recipe.steps = positions
            .into_iter()
            .filter_map(|position| slots[position].take())
            .collect();
        Ok(())
    }

    /// Change the value carried by a step
    pub fn set_step_value(&mut self, recipe: &str, name: &str, value: Value) -> Result<()> {
        let recipe = self.recipe_mut(recipe)?;
        let position = recipe.step_position(name)?;
        let step = &mut recipe.steps[position];
        if !step.takes_value() {
            return Err(ScanError::InvalidConfiguration(format!(
                "step '{}' does not take a value",
                name
            )));
        }
        step.value = Some(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{dummy_device, DeviceRegistry};

    fn registry() -> DeviceRegistry {
        let mut registry = DeviceRegistry::new();
        registry.insert_device(dummy_device()).unwrap();
        registry
    }

    #[test]
    fn test_unique_name() {
        assert_eq!(unique_name("a", ["b", "c"]), "a");
        assert_eq!(unique_name("a", ["a", "a_1"]), "a_2");
    }

    #[test]
    fn test_nb_points_and_step() {
        let mut p = Parameter::default();
        p.set_nb_points(5).unwrap();
        assert_eq!(p.step(), 2.5);
        p.set_nb_points(1).unwrap();
        assert_eq!(p.step(), 0.0);
        assert!(p.set_nb_points(0).is_err());

        p.set_step(3.0).unwrap();
        assert_eq!(p.nb_points(), 4);
        assert_eq!(p.control(), RangeControl::Step);
        p.set_step(0.0).unwrap();
        assert_eq!(p.nb_points(), 1);
    }

    #[test]
    fn test_range_follows_last_control() {
        let mut p = Parameter::default();
        p.set_nb_points(3).unwrap();
        p.set_range(0.0, 20.0).unwrap();
        assert_eq!(p.nb_points(), 3);
        assert_eq!(p.step(), 10.0);

        p.set_step(5.0).unwrap();
        p.set_range(0.0, 10.0).unwrap();
        assert_eq!(p.nb_points(), 3);
        assert_eq!(p.step(), 5.0);
    }

    #[test]
    fn test_center_and_width() {
        let mut p = Parameter::default();
        p.set_center(20.0).unwrap();
        assert_eq!((p.start(), p.end()), (15.0, 25.0));
        p.set_width(4.0).unwrap();
        assert_eq!((p.start(), p.end()), (18.0, 22.0));
        assert!(p.set_width(-1.0).is_err());
    }

    #[test]
    fn test_log_repairs_range() {
        let mut p = Parameter::default();
        p.set_range(-5.0, 0.0).unwrap();
        p.set_log(true).unwrap();
        assert_eq!(p.end(), 1.0);
        assert!((p.start() - 0.1).abs() < 1e-12);

        let mut p = Parameter::default();
        p.set_log(true).unwrap();
        assert_eq!(p.end(), 10.0);
        assert!((p.start() - 1.0).abs() < 1e-12);
        assert!(matches!(
            p.set_range(-1.0, 10.0),
            Err(ScanError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_add_step_defaults_and_names() {
        let registry = registry();
        let mut config = RecipeConfig::new();
        let amplitude = registry.element("dummy.amplitude").unwrap();

        let name = config
            .add_step("recipe", StepKind::Set, amplitude.clone(), None, None)
            .unwrap();
        assert_eq!(name, "amplitude");
        let name = config
            .add_step("recipe", StepKind::Measure, amplitude, None, Some(Value::Int(3)))
            .unwrap();
        assert_eq!(name, "amplitude_1");

        let recipe = config.recipe("recipe").unwrap();
        assert_eq!(recipe.steps[0].value, Some(Value::Float(0.0)));
        assert_eq!(recipe.steps[1].value, None);

        let label = registry.element("dummy.label").unwrap();
        config
            .add_step("recipe", StepKind::Set, label, None, None)
            .unwrap();
        assert_eq!(
            config.recipe("recipe").unwrap().steps[2].value,
            Some(Value::Str(String::new()))
        );
    }

    #[test]
    fn test_add_step_checks_capability() {
        let registry = registry();
        let mut config = RecipeConfig::new();
        let spectrum = registry.element("dummy.spectrum").unwrap();
        assert!(config
            .add_step("recipe", StepKind::Set, spectrum.clone(), None, None)
            .is_err());
        assert!(config
            .add_step("recipe", StepKind::Action, spectrum, None, None)
            .is_err());

        let reset = registry.element("dummy.reset").unwrap();
        config
            .add_step("recipe", StepKind::Action, reset, None, Some(Value::Int(1)))
            .unwrap();
        assert_eq!(config.recipe("recipe").unwrap().steps[0].value, None);
    }

    #[test]
    fn test_parameter_name_avoids_steps() {
        let registry = registry();
        let mut config = RecipeConfig::new();
        let amplitude = registry.element("dummy.amplitude").unwrap();
        config
            .add_step("recipe", StepKind::Measure, amplitude.clone(), None, None)
            .unwrap();
        let name = config.set_parameter("recipe", Some(amplitude), None).unwrap();
        assert_eq!(name, "amplitude_1");

        let spectrum = registry.element("dummy.spectrum").unwrap();
        assert!(config.set_parameter("recipe", Some(spectrum), None).is_err());
    }

    #[test]
    fn test_id_column_name_is_taken() {
        let registry = registry();
        let mut config = RecipeConfig::new();
        let amplitude = registry.element("dummy.amplitude").unwrap();
        let phase = registry.element("dummy.phase").unwrap();

        assert_eq!(
            config
                .add_step("recipe", StepKind::Measure, amplitude, Some("id"), None)
                .unwrap(),
            "id_1"
        );
        assert_eq!(config.rename_step("recipe", "id_1", "id").unwrap(), "id_1");
        assert_eq!(
            config.set_parameter("recipe", Some(phase), Some("id")).unwrap(),
            "id_2"
        );
        assert_eq!(config.set_parameter_name("recipe", "id").unwrap(), "id_2");

        let header = config.recipe("recipe").unwrap().header();
        assert_eq!(header.iter().filter(|c| *c == "id").count(), 1);

        let mut recipe = config.recipe("recipe").unwrap().clone();
        recipe.parameter.name = "id".to_string();
        assert!(matches!(
            RecipeConfig::from_recipes(vec![recipe]),
            Err(ScanError::InvalidConfiguration(_))
        ));
        let mut recipe = config.recipe("recipe").unwrap().clone();
        recipe.steps[0].name = "id".to_string();
        assert!(RecipeConfig::from_recipes(vec![recipe]).is_err());
    }

    #[test]
    fn test_recipe_names() {
        let mut config = RecipeConfig::new();
        assert_eq!(config.add_recipe("recipe").unwrap(), "recipe_1");
        assert_eq!(config.add_recipe("id").unwrap(), "id_1");
        assert_eq!(config.rename_recipe("recipe_1", "recipe").unwrap(), "recipe_2");
        assert!(config.remove_recipe("missing").is_err());
        assert_eq!(config.recipe_names(), vec!["recipe", "recipe_2", "id_1"]);
    }

    #[test]
    fn test_reorder_and_rename_steps() {
        let registry = registry();
        let mut config = RecipeConfig::new();
        for address in ["dummy.amplitude", "dummy.phase", "dummy.label"] {
            let element = registry.element(address).unwrap();
            config
                .add_step("recipe", StepKind::Measure, element, None, None)
                .unwrap();
        }

        config
            .reorder_steps("recipe", &["label", "amplitude", "phase"])
            .unwrap();
        let names: Vec<_> = config.recipe("recipe").unwrap().names().collect();
        assert_eq!(names, vec!["label", "amplitude", "phase", "parameter"]);

        let before = config.clone();
        assert!(config.reorder_steps("recipe", &["label", "missing", "phase"]).is_err());
        assert!(config.reorder_steps("recipe", &["label", "label", "phase"]).is_err());
        assert_eq!(config, before);

        assert_eq!(
            config.rename_step("recipe", "label", "phase").unwrap(),
            "phase_1"
        );
        assert_eq!(
            config.rename_step("recipe", "phase_1", "parameter").unwrap(),
            "parameter_1"
        );
    }

    #[test]
    fn test_set_step_value_requires_value_step() {
        let registry = registry();
        let mut config = RecipeConfig::new();
        let phase = registry.element("dummy.phase").unwrap();
        config
            .add_step("recipe", StepKind::Measure, phase.clone(), Some("m"), None)
            .unwrap();
        config
            .add_step("recipe", StepKind::Set, phase, Some("s"), None)
            .unwrap();

        assert!(config
            .set_step_value("recipe", "m", Value::Float(1.0))
            .is_err());
        config
            .set_step_value("recipe", "s", Value::Str("$eval:1+1".into()))
            .unwrap();
    }

    #[test]
    fn test_validate() {
        let registry = registry();
        let mut config = RecipeConfig::new();
        assert!(matches!(
            config.validate(),
            Err(ScanError::InvalidConfiguration(_))
        ));

        let amplitude = registry.element("dummy.amplitude").unwrap();
        config
            .add_step("recipe", StepKind::Measure, amplitude, None, None)
            .unwrap();
        config.validate().unwrap();

        config.set_recipe_active("recipe", false).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_header() {
        let registry = registry();
        let mut config = RecipeConfig::new();
        for address in ["dummy.amplitude", "dummy.spectrum"] {
            let element = registry.element(address).unwrap();
            config
                .add_step("recipe", StepKind::Measure, element, None, None)
                .unwrap();
        }
        assert_eq!(
            config.recipe("recipe").unwrap().header(),
            vec!["id", "parameter", "amplitude"]
        );
    }
}
