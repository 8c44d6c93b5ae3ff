//! Scan worker thread
//!
//! The worker runs every active recipe over its sweep and pushes one
//! [`ScanPoint`] per sweep value onto the bounded result queue. It talks to
//! the controller only through atomic flags and channels.
//!
//! # Cancellation
//!
//! The stop flag is checked before every sweep value and before every step,
//! so stopping takes at most one device call. A point interrupted by a stop
//! is dropped, never half-recorded. While paused, the worker sleeps for the
//! poll interval between checks and keeps its position.
//!
//! # Continuous mode
//!
//! While the continuous flag is set, a pass that finishes normally is
//! followed by another pass over the active recipes. Clearing the flag lets
//! the current pass run to the end.

use super::ScanEvent;
use crate::data::ScanPoint;
use crate::device::ElementKind;
use crate::error::{Result, ResultExt, ScanError};
use crate::recipe::{Recipe, RecipeConfig, RecipeStep, RunActivity};
use crate::types::{StepKind, Value, ValueType};
use crate::variables::SharedVariableStore;
use crossbeam_channel::{SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// How a run ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Finished,
    Stopped,
}

/// Pause, stop and continuous flags shared with the controller
#[derive(Debug, Clone, Default)]
pub(crate) struct RunFlags {
    pub pause: Arc<AtomicBool>,
    pub stop: Arc<AtomicBool>,
    pub continuous: Arc<AtomicBool>,
}

impl RunFlags {
    /// Clear pause and stop; the continuous setting is kept
    pub fn reset(&self) {
        self.pause.store(false, Ordering::SeqCst);
        self.stop.store(false, Ordering::SeqCst);
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn paused(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    pub fn continuous(&self) -> bool {
        self.continuous.load(Ordering::SeqCst)
    }
}

pub(crate) struct ScanWorker {
    pub config: Arc<RecipeConfig>,
    pub variables: SharedVariableStore,
    pub flags: RunFlags,
    pub activity: RunActivity,
    pub points: Sender<ScanPoint>,
    pub events: Sender<ScanEvent>,
    pub total_points: usize,
    pub pause_poll: Duration,
    pub send_timeout: Duration,
}

impl ScanWorker {
    /// Worker entry point
    ///
    /// Emits `Started` first, then clears the run activity and emits the
    /// terminal event before returning. The point sender is dropped on
    /// return, which closes the queue for the consumer.
    pub fn run(self) -> Result<Outcome> {
        self.emit(ScanEvent::Started {
            total_points: self.total_points,
        });
        let result = self.run_passes();
        self.activity.set(false);

        let event = match &result {
            Ok(Outcome::Finished) => {
                info!("Scan finished");
                ScanEvent::Finished
            }
            Ok(Outcome::Stopped) => {
                info!("Scan stopped");
                ScanEvent::Stopped
            }
            Err(e) => {
                error!("Scan aborted: {}", e);
                ScanEvent::Errored {
                    error: e.to_string(),
                }
            }
        };
        self.emit(event);
        result
    }

    fn emit(&self, event: ScanEvent) {
        // Nobody listening is not an error for the run
        let _ = self.events.send(event);
    }

    fn run_passes(&self) -> Result<Outcome> {
        let mut pass = 1;
        loop {
            if self.run_recipes()? == Outcome::Stopped {
                return Ok(Outcome::Stopped);
            }
            if !self.flags.continuous() {
                return Ok(Outcome::Finished);
            }
            if self.flags.stop_requested() {
                return Ok(Outcome::Stopped);
            }
            pass += 1;
            info!("Continuous mode: starting pass {}", pass);
        }
    }

    fn run_recipes(&self) -> Result<Outcome> {
        for recipe in self.config.active_recipes() {
            let values = recipe.parameter.values()?;
            info!(
                "Starting recipe '{}' over {} points",
                recipe.name,
                values.len()
            );

            for (index, value) in values.into_iter().enumerate() {
                if !self.checkpoint() {
                    return Ok(Outcome::Stopped);
                }
                let Some(point) = self.run_point(recipe, index, value)? else {
                    return Ok(Outcome::Stopped);
                };
                if !self.push(point)? {
                    return Ok(Outcome::Stopped);
                }
                self.emit(ScanEvent::PointAvailable {
                    recipe: recipe.name.clone(),
                    index,
                });
                self.emit(ScanEvent::RecipeCompleted {
                    recipe: recipe.name.clone(),
                    index,
                });
            }

            self.emit(ScanEvent::SweepCompleted {
                recipe: recipe.name.clone(),
            });
        }
        Ok(Outcome::Finished)
    }

    /// Block while paused; returns false once a stop is requested
    fn checkpoint(&self) -> bool {
        loop {
            if self.flags.stop_requested() {
                return false;
            }
            if !self.flags.paused() {
                return true;
            }
            std::thread::sleep(self.pause_poll);
        }
    }

    /// Run one sweep point; `None` if a stop interrupted it
    fn run_point(&self, recipe: &Recipe, index: usize, value: f64) -> Result<Option<ScanPoint>> {
        self.emit(ScanEvent::ParameterStarted {
            recipe: recipe.name.clone(),
            index,
            value,
        });
        if let Some(element) = &recipe.parameter.element {
            element
                .write(parameter_value(value, element.value_type()))
                .with_context(|| {
                    format!("Failed to set parameter '{}' of recipe '{}'", recipe.parameter.name, recipe.name)
                })?;
        }
        self.emit(ScanEvent::ParameterFinished {
            recipe: recipe.name.clone(),
            index,
            value,
        });

        let mut results = Vec::new();
        for step in &recipe.steps {
            if !self.checkpoint() {
                debug!("Dropping point {} of recipe '{}' after stop", index, recipe.name);
                return Ok(None);
            }
            self.emit(ScanEvent::StepStarted {
                recipe: recipe.name.clone(),
                step: step.name.clone(),
            });
            let result = self
                .run_step(step)
                .with_context(|| format!("Step '{}' of recipe '{}' failed", step.name, recipe.name))?;
            self.emit(ScanEvent::StepFinished {
                recipe: recipe.name.clone(),
                step: step.name.clone(),
            });
            if step.kind == StepKind::Measure {
                results.push((step.name.clone(), result));
            }
        }

        Ok(Some(ScanPoint {
            recipe: recipe.name.clone(),
            index,
            parameter: value,
            results,
        }))
    }

    fn run_step(&self, step: &RecipeStep) -> Result<Value> {
        match step.kind {
            StepKind::Measure => step.element.read(),
            StepKind::Set => {
                let value = self.resolve(step, step.element.value_type())?;
                step.element.write(value)?;
                Ok(Value::None)
            }
            StepKind::Action => {
                let argument = match step.element.kind() {
                    ElementKind::Action {
                        parameter: Some(value_type),
                    } => Some(self.resolve(step, value_type)?),
                    _ => None,
                };
                step.element.invoke(argument)
            }
        }
    }

    /// Evaluate a step value against the live variables and devices
    fn resolve(&self, step: &RecipeStep, target: ValueType) -> Result<Value> {
        let raw = step.value.clone().unwrap_or_else(|| target.default_value());
        let value = {
            let store = self
                .variables
                .read()
                .map_err(|e| ScanError::Channel(format!("Failed to acquire variable store lock: {}", e)))?;
            store.evaluate(&raw)?
        };
        value.convert_to(target)
    }

    /// Push a point, retrying until it fits or a stop is requested
    fn push(&self, mut point: ScanPoint) -> Result<bool> {
        loop {
            match self.points.send_timeout(point, self.send_timeout) {
                Ok(()) => return Ok(true),
                Err(SendTimeoutError::Timeout(returned)) => {
                    if self.flags.stop_requested() {
                        return Ok(false);
                    }
                    point = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(ScanError::Channel("result queue closed".to_string()));
                }
            }
        }
    }
}

/// Sweep values are floats; integer elements get the nearest integer
fn parameter_value(value: f64, target: ValueType) -> Value {
    match target {
        ValueType::Int => Value::Int(value.round() as i64),
        _ => Value::Float(value),
    }
}
