//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use scanlab::data::{DataCollector, ScanPoint};
use scanlab::device::SharedDeviceRegistry;
use scanlab::recipe::{ConfigManager, RecipeConfig};
use scanlab::scan::{ScanEngine, ScanEvent, ScanOptions};
use scanlab::variables::{create_shared_store, SharedVariableStore, VariableStore};
use std::time::Duration;

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// Fast engine options for tests
pub fn test_options() -> ScanOptions {
    ScanOptions {
        queue_capacity: 64,
        pause_poll: Duration::from_millis(2),
        send_timeout: Duration::from_millis(5),
    }
}

/// Engine, config manager and variable store wired to one registry
pub struct TestBench {
    pub registry: SharedDeviceRegistry,
    pub store: SharedVariableStore,
    pub engine: ScanEngine,
    pub manager: ConfigManager,
}

impl TestBench {
    pub fn new(registry: SharedDeviceRegistry) -> Self {
        Self::with_options(registry, test_options())
    }

    pub fn with_options(registry: SharedDeviceRegistry, options: ScanOptions) -> Self {
        let store = create_shared_store(VariableStore::new(registry.clone()));
        let engine = ScanEngine::new(store.clone(), options);
        store.write().unwrap().attach_activity(engine.activity());
        let mut manager = ConfigManager::new();
        manager.attach_activity(engine.activity());
        Self {
            registry,
            store,
            engine,
            manager,
        }
    }

    /// Replace the managed configuration, starting a fresh history
    pub fn load(&mut self, config: RecipeConfig) {
        self.manager = ConfigManager::with_config(config);
        self.manager.attach_activity(self.engine.activity());
    }

    /// Run the current configuration to completion and collect its points
    pub fn run_to_end(&mut self) -> (DataCollector, Vec<ScanEvent>) {
        let config = self.manager.config();
        let mut collector = DataCollector::new();
        collector.begin_run(&config).unwrap();
        let points = self.engine.start(config).unwrap();
        self.engine.wait();
        collector.drain(&points).unwrap();
        let events = self.engine.events().try_iter().collect();
        (collector, events)
    }
}

/// Parameter values and results of collected points, for comparisons
pub fn point_summary(points: &[ScanPoint]) -> Vec<(String, f64, Vec<String>)> {
    points
        .iter()
        .map(|p| {
            (
                p.recipe.clone(),
                p.parameter,
                p.results.iter().map(|(_, v)| v.to_string()).collect(),
            )
        })
        .collect()
}
