//! Configuration owner with undo/redo and run gating

use super::{ConfigDocument, ConfigHistory, RecipeConfig, RecipeStep, Recipe};
use crate::device::{ElementRef, ElementResolver};
use crate::error::{Result, ScanError};
use crate::types::{StepKind, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default significant digits for exported float values
pub const DEFAULT_PRECISION: usize = 15;

/// Shared flag telling whether a scan is in progress
///
/// The engine sets it while its worker runs. Holders use it to refuse
/// configuration changes during a run.
#[derive(Debug, Clone, Default)]
pub struct RunActivity(Arc<AtomicBool>);

impl RunActivity {
    /// Create an inactive flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while a scan is running or paused
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn set(&self, active: bool) {
        self.0.store(active, Ordering::SeqCst);
    }
}

/// Owns the live configuration and its history
///
/// Every successful mutation that changes the configuration pushes a full
/// snapshot onto the history. Mutations fail with `Busy` while the attached
/// [`RunActivity`] is set.
#[derive(Debug)]
pub struct ConfigManager {
    config: Arc<RecipeConfig>,
    history: ConfigHistory,
    activity: Option<RunActivity>,
    precision: usize,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigManager {
    /// Create a manager holding a configuration with one empty recipe
    pub fn new() -> Self {
        Self::with_config(RecipeConfig::new())
    }

    /// Create a manager starting from `config`
    pub fn with_config(config: RecipeConfig) -> Self {
        let history = ConfigHistory::new(config);
        Self {
            config: history.current(),
            history,
            activity: None,
            precision: DEFAULT_PRECISION,
        }
    }

    /// Gate mutations on a run activity flag
    pub fn attach_activity(&mut self, activity: RunActivity) {
        self.activity = Some(activity);
    }

    /// Set the significant digits used when exporting float values
    pub fn set_precision(&mut self, precision: usize) {
        self.precision = precision.max(1);
    }

    /// The live configuration
    pub fn config(&self) -> Arc<RecipeConfig> {
        self.config.clone()
    }

    /// The snapshot history
    pub fn history(&self) -> &ConfigHistory {
        &self.history
    }

    /// Returns true while a run forbids mutation
    pub fn is_busy(&self) -> bool {
        self.activity.as_ref().is_some_and(RunActivity::is_active)
    }

    /// Returns true if an undo step is available
    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    /// Returns true if a redo step is available
    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
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

    /// Apply `change` to a copy of the live configuration
    ///
    /// The copy replaces the live configuration only if `change` succeeds,
    /// and a snapshot is recorded only if something actually changed.
    fn mutate<R>(
        &mut self,
        operation: &str,
        change: impl FnOnce(&mut RecipeConfig) -> Result<R>,
    ) -> Result<R> {
        self.ensure_idle(operation)?;
        let mut next = (*self.config).clone();
        let output = change(&mut next)?;
        if next != *self.config {
            self.config = self.history.append(next);
            debug!(
                "Config changed by '{}' (history {}/{})",
                operation,
                self.history.cursor() + 1,
                self.history.len()
            );
        }
        Ok(output)
    }

    /// Step back in the history; returns false if already at the start
    pub fn undo(&mut self) -> Result<bool> {
        self.ensure_idle("undo")?;
        match self.history.undo() {
            Some(snapshot) => {
                self.config = snapshot;
                debug!("Undo to snapshot {}", self.history.cursor());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Step forward in the history; returns false if already at the end
    pub fn redo(&mut self) -> Result<bool> {
        self.ensure_idle("redo")?;
        match self.history.redo() {
            Some(snapshot) => {
                self.config = snapshot;
                debug!("Redo to snapshot {}", self.history.cursor());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ===== Recipes =====

    pub fn add_recipe(&mut self, name: &str) -> Result<String> {
        self.mutate("add a recipe", |c| c.add_recipe(name))
    }

    pub fn remove_recipe(&mut self, name: &str) -> Result<Recipe> {
        self.mutate("remove a recipe", |c| c.remove_recipe(name))
    }

    pub fn rename_recipe(&mut self, name: &str, new_name: &str) -> Result<String> {
        self.mutate("rename a recipe", |c| c.rename_recipe(name, new_name))
    }

    pub fn set_recipe_active(&mut self, name: &str, active: bool) -> Result<()> {
        self.mutate("change recipe activity", |c| c.set_recipe_active(name, active))
    }

    // ===== Parameter =====

    pub fn set_parameter(
        &mut self,
        recipe: &str,
        element: Option<ElementRef>,
        name: Option<&str>,
    ) -> Result<String> {
        self.mutate("set the parameter", |c| c.set_parameter(recipe, element, name))
    }

    pub fn set_parameter_name(&mut self, recipe: &str, name: &str) -> Result<String> {
        self.mutate("rename the parameter", |c| c.set_parameter_name(recipe, name))
    }

    pub fn set_parameter_element(&mut self, recipe: &str, element: Option<ElementRef>) -> Result<()> {
        self.mutate("set the parameter element", |c| {
            c.set_parameter_element(recipe, element)
        })
    }

    pub fn set_nb_points(&mut self, recipe: &str, count: usize) -> Result<()> {
        self.mutate("set the point count", |c| c.set_nb_points(recipe, count))
    }

    pub fn set_step(&mut self, recipe: &str, step: f64) -> Result<()> {
        self.mutate("set the step", |c| c.set_step(recipe, step))
    }

    pub fn set_range(&mut self, recipe: &str, start: f64, end: f64) -> Result<()> {
        self.mutate("set the range", |c| c.set_range(recipe, start, end))
    }

    pub fn set_center(&mut self, recipe: &str, center: f64) -> Result<()> {
        self.mutate("set the range center", |c| c.set_center(recipe, center))
    }

    pub fn set_width(&mut self, recipe: &str, width: f64) -> Result<()> {
        self.mutate("set the range width", |c| c.set_width(recipe, width))
    }

    pub fn set_log(&mut self, recipe: &str, log: bool) -> Result<()> {
        self.mutate("toggle log spacing", |c| c.set_log(recipe, log))
    }

    // ===== Steps =====

    pub fn add_step(
        &mut self,
        recipe: &str,
        kind: StepKind,
        element: ElementRef,
        name: Option<&str>,
        value: Option<Value>,
    ) -> Result<String> {
        self.mutate("add a step", |c| c.add_step(recipe, kind, element, name, value))
    }

    pub fn remove_step(&mut self, recipe: &str, name: &str) -> Result<RecipeStep> {
        self.mutate("remove a step", |c| c.remove_step(recipe, name))
    }

    pub fn rename_step(&mut self, recipe: &str, name: &str, new_name: &str) -> Result<String> {
        self.mutate("rename a step", |c| c.rename_step(recipe, name, new_name))
    }

    pub fn reorder_steps(&mut self, recipe: &str, order: &[&str]) -> Result<()> {
        self.mutate("reorder steps", |c| c.reorder_steps(recipe, order))
    }

    pub fn set_step_value(&mut self, recipe: &str, name: &str, value: Value) -> Result<()> {
        self.mutate("set a step value", |c| c.set_step_value(recipe, name, value))
    }

    // ===== Export / Import =====

    /// Export the live configuration
    pub fn export(&self) -> ConfigDocument {
        ConfigDocument::from_config(&self.config, self.precision)
    }

    /// Replace the live configuration with an imported one
    ///
    /// On failure the live configuration and history are untouched.
    pub fn import(&mut self, document: &ConfigDocument, resolver: &dyn ElementResolver) -> Result<()> {
        self.ensure_idle("import a configuration")?;
        match document.to_config(resolver) {
            Ok(config) => {
                info!("Imported configuration with {} recipe(s)", config.len());
                self.mutate("import a configuration", |c| {
                    *c = config;
                    Ok(())
                })
            }
            Err(e) => {
                warn!("Configuration import failed: {}", e);
                Err(e)
            }
        }
    }

    /// Export the live configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        self.export().save_to_file(path)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Import a configuration file
    pub fn load_from_file(&mut self, path: &Path, resolver: &dyn ElementResolver) -> Result<()> {
        let document = ConfigDocument::load_from_file(path)?;
        self.import(&document, resolver)
    }
}
