//! # scanlab: recipe-based parameter scans
//!
//! A scan engine for laboratory instrument automation. Devices expose
//! typed elements (readable/writable variables and invocable actions). A
//! *recipe* sweeps one parameter element over a range and runs an ordered
//! list of measure, set and action steps at every sweep point.
//!
//! ## Architecture
//!
//! - **Devices**: [`device::Element`] capability trait and an
//!   address-keyed [`device::DeviceRegistry`]
//! - **Variables**: [`variables::VariableStore`] with `$eval:` expressions
//!   evaluated by a sandboxed Rhai engine
//! - **Recipes**: [`recipe::RecipeConfig`] with undo/redo history managed by
//!   [`recipe::ConfigManager`], exported as TOML documents
//! - **Scanning**: [`scan::ScanEngine`] runs the configuration on a worker
//!   thread with pause, resume and stop
//! - **Data**: [`data::DataCollector`] drains the bounded result queue into
//!   per-recipe [`data::Dataset`]s
//! - **Communication**: Crossbeam channels between worker and consumer
//!
//! ## Configuration
//!
//! Settings and application state are stored in the platform data
//! directory under `scanlab`:
//!
//! - **Linux**: `~/.local/share/scanlab/`
//! - **macOS**: `~/Library/Application Support/scanlab/`
//! - **Windows**: `%APPDATA%\scanlab\`
//!
//! ## Example
//!
//! ```ignore
//! use scanlab::{
//!     data::DataCollector,
//!     device::{create_shared_registry, dummy_device, DeviceRegistry},
//!     recipe::ConfigManager,
//!     scan::{ScanEngine, ScanOptions},
//!     types::StepKind,
//!     variables::{create_shared_store, VariableStore},
//! };
//!
//! let mut registry = DeviceRegistry::new();
//! registry.insert_device(dummy_device())?;
//! let registry = create_shared_registry(registry);
//!
//! let store = create_shared_store(VariableStore::new(registry.clone()));
//! let mut engine = ScanEngine::new(store, ScanOptions::default());
//!
//! let mut manager = ConfigManager::new();
//! manager.attach_activity(engine.activity());
//! let phase = registry.read().unwrap().element("dummy.phase")?;
//! let amplitude = registry.read().unwrap().element("dummy.amplitude")?;
//! manager.set_parameter("recipe", Some(phase), None)?;
//! manager.add_step("recipe", StepKind::Measure, amplitude, None, None)?;
//!
//! let mut collector = DataCollector::new();
//! collector.begin_run(&manager.config())?;
//! let points = engine.start(manager.config())?;
//! engine.wait();
//! collector.drain(&points)?;
//! ```

pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod recipe;
pub mod scan;
pub mod scripting;
pub mod types;
pub mod variables;

// Re-export commonly used types
pub use config::{AppState, ScannerSettings};
pub use data::{DataCollector, Dataset, ScanPoint};
pub use device::{DeviceRegistry, Element, ElementRef};
pub use error::{Result, ScanError};
pub use recipe::{ConfigHistory, ConfigManager, Recipe, RecipeConfig};
pub use scan::{ScanEngine, ScanEvent, ScanState};
pub use types::{StepKind, Value, ValueType};
pub use variables::VariableStore;
