//! Test data builders for creating recipe configurations

use scanlab::device::{ElementRef, SharedDeviceRegistry};
use scanlab::recipe::RecipeConfig;
use scanlab::types::{StepKind, Value};

/// Look up an element of a shared registry
pub fn element(registry: &SharedDeviceRegistry, address: &str) -> ElementRef {
    registry.read().unwrap().element(address).unwrap()
}

/// Builder for one recipe
pub struct RecipeBuilder {
    name: String,
    parameter: Option<(ElementRef, String)>,
    range: (f64, f64),
    points: usize,
    log: bool,
    active: bool,
    steps: Vec<(StepKind, ElementRef, String, Option<Value>)>,
}

impl RecipeBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parameter: None,
            range: (0.0, 10.0),
            points: 11,
            log: false,
            active: true,
            steps: Vec::new(),
        }
    }

    pub fn parameter(mut self, element: ElementRef, name: &str) -> Self {
        self.parameter = Some((element, name.to_string()));
        self
    }

    pub fn range(mut self, start: f64, end: f64) -> Self {
        self.range = (start, end);
        self
    }

    pub fn points(mut self, points: usize) -> Self {
        self.points = points;
        self
    }

    pub fn log(mut self) -> Self {
        self.log = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn measure(mut self, element: ElementRef, name: &str) -> Self {
        self.steps
            .push((StepKind::Measure, element, name.to_string(), None));
        self
    }

    pub fn set(mut self, element: ElementRef, name: &str, value: Value) -> Self {
        self.steps
            .push((StepKind::Set, element, name.to_string(), Some(value)));
        self
    }

    pub fn action(mut self, element: ElementRef, name: &str, argument: Option<Value>) -> Self {
        self.steps
            .push((StepKind::Action, element, name.to_string(), argument));
        self
    }

    /// Add the recipe to `config`, returning its final name
    pub fn add_to(self, config: &mut RecipeConfig) -> String {
        let name = config.add_recipe(&self.name).unwrap();
        if let Some((element, parameter)) = self.parameter {
            config
                .set_parameter(&name, Some(element), Some(&parameter))
                .unwrap();
        }
        config.set_range(&name, self.range.0, self.range.1).unwrap();
        config.set_nb_points(&name, self.points).unwrap();
        if self.log {
            config.set_log(&name, true).unwrap();
        }
        for (kind, element, step, value) in self.steps {
            config
                .add_step(&name, kind, element, Some(&step), value)
                .unwrap();
        }
        if !self.active {
            config.set_recipe_active(&name, false).unwrap();
        }
        name
    }
}

/// Build a configuration from recipe builders, in order
pub fn config_with(recipes: Vec<RecipeBuilder>) -> RecipeConfig {
    let mut config = RecipeConfig::empty();
    for recipe in recipes {
        recipe.add_to(&mut config);
    }
    config
}
