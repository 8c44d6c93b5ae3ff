//! Result collection
//!
//! The scan worker produces [`ScanPoint`]s; the consumer drains them into a
//! [`DataCollector`], which keeps one [`Dataset`] per active recipe for each
//! run. Only the consumer mutates datasets, so they need no locking.

mod dataset;

pub use dataset::{Dataset, Overflow, DATA_FILE_NAME};

use crate::device::{ElementSaver, TextFileSaver};
use crate::error::{Result, ResultExt, ScanError};
use crate::recipe::{ConfigDocument, RecipeConfig, DEFAULT_PRECISION};
use crate::types::Value;
use chrono::{DateTime, Local};
use crossbeam_channel::Receiver;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// File name of the configuration saved in a run folder
pub const RUN_CONFIG_FILE_NAME: &str = "config.scanconf";

/// One completed sweep point of one recipe
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPoint {
    /// Recipe that produced the point
    pub recipe: String,
    /// Position in the sweep, from 0
    pub index: usize,
    /// Parameter value at this point
    pub parameter: f64,
    /// Measurement results keyed by step name, in step order
    pub results: Vec<(String, Value)>,
}

impl ScanPoint {
    /// Result of the step named `name`
    pub fn result(&self, name: &str) -> Option<&Value> {
        self.results
            .iter()
            .find(|(step, _)| step == name)
            .map(|(_, value)| value)
    }
}

/// Datasets of one run
#[derive(Debug)]
pub struct RunData {
    started: DateTime<Local>,
    folder: Option<PathBuf>,
    datasets: Vec<Dataset>,
    total_points: usize,
}

impl RunData {
    /// Start time of the run
    pub fn started(&self) -> DateTime<Local> {
        self.started
    }

    /// Run folder, if datasets are persisted while scanning
    pub fn folder(&self) -> Option<&Path> {
        self.folder.as_deref()
    }

    /// Datasets in recipe order
    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    /// Dataset of a recipe
    pub fn dataset(&self, recipe: &str) -> Option<&Dataset> {
        self.datasets.iter().find(|d| d.recipe() == recipe)
    }

    fn dataset_mut(&mut self, recipe: &str) -> Result<&mut Dataset> {
        self.datasets
            .iter_mut()
            .find(|d| d.recipe() == recipe)
            .ok_or_else(|| ScanError::NotFound(format!("dataset for recipe '{}'", recipe)))
    }

    /// Points collected so far
    pub fn collected(&self) -> usize {
        self.datasets.iter().map(Dataset::len).sum()
    }

    /// Points expected for a complete run
    pub fn total_points(&self) -> usize {
        self.total_points
    }
}

/// Keeps the datasets of every run of a session
pub struct DataCollector {
    runs: Vec<RunData>,
    saver: Arc<dyn ElementSaver>,
    data_root: Option<PathBuf>,
    precision: usize,
}

impl Default for DataCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl DataCollector {
    /// Collector keeping datasets in memory
    pub fn new() -> Self {
        Self {
            runs: Vec::new(),
            saver: Arc::new(TextFileSaver),
            data_root: None,
            precision: DEFAULT_PRECISION,
        }
    }

    /// Persist each run under `root` while scanning
    pub fn with_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.data_root = Some(root.into());
        self
    }

    /// Use a custom saver for non-scalar payloads
    pub fn with_saver(mut self, saver: Arc<dyn ElementSaver>) -> Self {
        self.saver = saver;
        self
    }

    /// Significant digits of float values in the saved run configuration
    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }

    /// Open a new run with one dataset per active recipe
    ///
    /// With a data root, the run folder receives the configuration and one
    /// sub folder per recipe.
    pub fn begin_run(&mut self, config: &RecipeConfig) -> Result<&RunData> {
        let started = Local::now();
        let folder = match &self.data_root {
            Some(root) => {
                let name = format!("{}_{}", started.format("%Y-%m-%d_%H-%M-%S"), self.runs.len() + 1);
                let folder = root.join(name);
                fs::create_dir_all(&folder)
                    .with_context(|| format!("Failed to create run folder {:?}", folder))?;
                ConfigDocument::from_config(config, self.precision)
                    .save_to_file(&folder.join(RUN_CONFIG_FILE_NAME))?;
                Some(folder)
            }
            None => None,
        };

        let datasets = config
            .active_recipes()
            .map(|recipe| {
                let recipe_folder = folder.as_ref().map(|f| f.join(&recipe.name));
                Dataset::new(recipe, recipe_folder, self.saver.clone())
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Collecting run {} ({} datasets, {} points)",
            self.runs.len() + 1,
            datasets.len(),
            config.total_points()
        );
        self.runs.push(RunData {
            started,
            folder,
            datasets,
            total_points: config.total_points(),
        });
        self.last_run().ok_or_else(|| ScanError::NotFound("run".to_string()))
    }

    /// Add a point to the current run; returns its row id
    pub fn add_point(&mut self, point: &ScanPoint) -> Result<usize> {
        let run = self
            .runs
            .last_mut()
            .ok_or_else(|| ScanError::NotFound("no run in progress".to_string()))?;
        run.dataset_mut(&point.recipe)?.add_point(point)
    }

    /// Move every queued point into the current run; returns how many
    pub fn drain(&mut self, queue: &Receiver<ScanPoint>) -> Result<usize> {
        let mut count = 0;
        for point in queue.try_iter() {
            self.add_point(&point)?;
            count += 1;
        }
        Ok(count)
    }

    /// All runs, oldest first
    pub fn runs(&self) -> &[RunData] {
        &self.runs
    }

    /// Most recent run
    pub fn last_run(&self) -> Option<&RunData> {
        self.runs.last()
    }

    /// Forget every run (files on disk are kept)
    pub fn clear(&mut self) {
        self.runs.clear();
    }

    /// `(collected, total)` points of the current run
    pub fn progress(&self) -> (usize, usize) {
        self.last_run()
            .map(|run| (run.collected(), run.total_points()))
            .unwrap_or((0, 0))
    }
}
