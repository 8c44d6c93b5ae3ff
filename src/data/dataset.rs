//! Per-recipe result table with out-of-line payload storage

use super::ScanPoint;
use crate::device::ElementSaver;
use crate::error::{Result, ResultExt, ScanError};
use crate::recipe::Recipe;
use crate::types::{Table, Value};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Name of the append-only CSV log inside a recipe folder
pub const DATA_FILE_NAME: &str = "data.txt";

/// Where a non-scalar payload lives
#[derive(Debug, Clone, PartialEq)]
pub enum Overflow {
    /// Kept in memory (no dataset folder)
    InMemory(Value),
    /// Written to this file by the element saver
    Stored(PathBuf),
}

/// Results of one recipe during one run
///
/// Scalar measurements go into the row table. Every other measurement is
/// handed to the [`ElementSaver`] under `<folder>/<column>/<row id>.txt`,
/// and only a reference is kept. Row ids start at 1 and increase by one
/// per point.
pub struct Dataset {
    recipe: String,
    header: Vec<String>,
    overflow_columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    overflow: BTreeMap<String, BTreeMap<usize, Overflow>>,
    folder: Option<PathBuf>,
    saver: Arc<dyn ElementSaver>,
    log: Option<BufWriter<File>>,
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("recipe", &self.recipe)
            .field("header", &self.header)
            .field("rows", &self.rows.len())
            .field("folder", &self.folder)
            .finish()
    }
}

impl Dataset {
    /// Create an empty dataset for `recipe`
    ///
    /// With a `folder`, the header line of `data.txt` is written at once.
    pub fn new(recipe: &Recipe, folder: Option<PathBuf>, saver: Arc<dyn ElementSaver>) -> Result<Self> {
        let header = recipe.header();
        let overflow_columns: Vec<String> = recipe
            .steps
            .iter()
            .filter(|s| s.kind == crate::types::StepKind::Measure && !s.is_scalar_measure())
            .map(|s| s.name.clone())
            .collect();

        let log = match &folder {
            Some(folder) => {
                fs::create_dir_all(folder)
                    .with_context(|| format!("Failed to create dataset folder {:?}", folder))?;
                let file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(folder.join(DATA_FILE_NAME))?;
                let mut writer = BufWriter::new(file);
                writeln!(writer, "{}", header.join(","))?;
                writer.flush()?;
                Some(writer)
            }
            None => None,
        };

        debug!("Created dataset for recipe '{}' with header {:?}", recipe.name, header);
        Ok(Self {
            recipe: recipe.name.clone(),
            header,
            overflow_columns,
            rows: Vec::new(),
            overflow: BTreeMap::new(),
            folder,
            saver,
            log,
        })
    }

    /// Recipe this dataset belongs to
    pub fn recipe(&self) -> &str {
        &self.recipe
    }

    /// Scalar column names: `id`, the parameter, then scalar measurements
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Columns stored out of line
    pub fn overflow_columns(&self) -> &[String] {
        &self.overflow_columns
    }

    /// Folder holding `data.txt` and payload files, if persisted
    pub fn folder(&self) -> Option<&Path> {
        self.folder.as_deref()
    }

    /// Number of recorded points
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if no point was recorded
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All rows, in header order
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Rows recorded after the first `count`
    pub fn rows_since(&self, count: usize) -> &[Vec<Value>] {
        &self.rows[count.min(self.rows.len())..]
    }

    /// Payload of an overflow column for a row id
    pub fn overflow_value(&self, column: &str, row_id: usize) -> Option<&Overflow> {
        self.overflow.get(column)?.get(&row_id)
    }

    /// Record one point; returns its row id
    pub fn add_point(&mut self, point: &ScanPoint) -> Result<usize> {
        let id = self.rows.len() + 1;

        let mut row = Vec::with_capacity(self.header.len());
        row.push(Value::Int(id as i64));
        row.push(Value::Float(point.parameter));
        for column in &self.header[2..] {
            row.push(point.result(column).cloned().unwrap_or(Value::None));
        }

        for column in &self.overflow_columns {
            let Some(value) = point.result(column) else {
                continue;
            };
            let entry = match &self.folder {
                Some(folder) => {
                    let dir = folder.join(column);
                    fs::create_dir_all(&dir)?;
                    let path = dir.join(format!("{}.txt", id));
                    self.saver
                        .save(&path, value)
                        .with_context(|| format!("Failed to save '{}' for row {}", column, id))?;
                    Overflow::Stored(path)
                }
                None => Overflow::InMemory(value.clone()),
            };
            self.overflow.entry(column.clone()).or_default().insert(id, entry);
        }

        if let Some(log) = &mut self.log {
            let cells: Vec<String> = row.iter().map(Value::to_string).collect();
            writeln!(log, "{}", cells.join(","))?;
            log.flush()?;
        }

        self.rows.push(row);
        Ok(id)
    }

    /// Numeric view of the selected scalar columns
    ///
    /// An empty selection returns every column.
    pub fn get_data(&self, columns: &[&str]) -> Result<Table> {
        let selected: Vec<&str> = if columns.is_empty() {
            self.header.iter().map(String::as_str).collect()
        } else {
            columns.to_vec()
        };
        let indices = selected
            .iter()
            .map(|name| {
                self.header
                    .iter()
                    .position(|c| c == name)
                    .ok_or_else(|| ScanError::NotFound(format!("column '{}' in dataset '{}'", name, self.recipe)))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut table = Table::new(selected.iter().map(|s| s.to_string()).collect());
        for row in &self.rows {
            table.push_row(
                indices
                    .iter()
                    .map(|&i| row[i].as_f64().unwrap_or(f64::NAN))
                    .collect(),
            );
        }
        Ok(table)
    }

    /// Write the scalar table as CSV to `path`
    ///
    /// Overflow payloads are written next to it, one folder per column
    /// named `<file stem>_<column>`.
    pub fn save(&self, path: &Path) -> Result<()> {
        match &self.folder {
            Some(folder) => {
                fs::copy(folder.join(DATA_FILE_NAME), path)
                    .with_context(|| format!("Failed to copy dataset to {:?}", path))?;
            }
            None => self.write_csv(path)?,
        }

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.recipe.clone());

        for (column, payloads) in &self.overflow {
            let dir = parent.join(format!("{}_{}", stem, column));
            fs::create_dir_all(&dir)?;
            for (id, payload) in payloads {
                let target = dir.join(format!("{}.txt", id));
                match payload {
                    Overflow::Stored(source) => {
                        fs::copy(source, &target)?;
                    }
                    Overflow::InMemory(value) => self.saver.save(&target, value)?,
                }
            }
        }
        debug!("Saved dataset '{}' to {:?}", self.recipe, path);
        Ok(())
    }

    fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "{}", self.header.join(","))?;
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(Value::to_string).collect();
            writeln!(writer, "{}", cells.join(","))?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{dummy_device, DeviceRegistry, TextFileSaver};
    use crate::recipe::RecipeConfig;
    use crate::types::StepKind;

    fn recipe() -> Recipe {
        let mut registry = DeviceRegistry::new();
        registry.insert_device(dummy_device()).unwrap();
        let mut config = RecipeConfig::new();
        config
            .set_parameter("recipe", Some(registry.element("dummy.phase").unwrap()), Some("phase"))
            .unwrap();
        config
            .add_step("recipe", StepKind::Measure, registry.element("dummy.amplitude").unwrap(), Some("amp"), None)
            .unwrap();
        config
            .add_step("recipe", StepKind::Measure, registry.element("dummy.spectrum").unwrap(), Some("spectrum"), None)
            .unwrap();
        config.recipe("recipe").unwrap().clone()
    }

    fn point(parameter: f64, amp: f64) -> ScanPoint {
        ScanPoint {
            recipe: "recipe".to_string(),
            index: 0,
            parameter,
            results: vec![
                ("amp".to_string(), Value::Float(amp)),
                ("spectrum".to_string(), Value::Array(vec![amp, amp * 2.0])),
            ],
        }
    }

    #[test]
    fn test_rows_and_overflow_in_memory() {
        let mut dataset = Dataset::new(&recipe(), None, Arc::new(TextFileSaver)).unwrap();
        assert_eq!(dataset.header(), ["id", "phase", "amp"]);
        assert_eq!(dataset.overflow_columns(), ["spectrum"]);

        assert_eq!(dataset.add_point(&point(0.0, 1.0)).unwrap(), 1);
        assert_eq!(dataset.add_point(&point(0.5, 2.0)).unwrap(), 2);

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.rows_since(1), [vec![Value::Int(2), Value::Float(0.5), Value::Float(2.0)]]);
        assert!(dataset.rows_since(5).is_empty());
        assert_eq!(
            dataset.overflow_value("spectrum", 2),
            Some(&Overflow::InMemory(Value::Array(vec![2.0, 4.0])))
        );
    }

    #[test]
    fn test_get_data_selects_columns() {
        let mut dataset = Dataset::new(&recipe(), None, Arc::new(TextFileSaver)).unwrap();
        dataset.add_point(&point(0.0, 1.0)).unwrap();
        dataset.add_point(&point(1.0, 3.0)).unwrap();

        let table = dataset.get_data(&["amp"]).unwrap();
        assert_eq!(table.column("amp"), Some(vec![1.0, 3.0]));
        assert_eq!(dataset.get_data(&[]).unwrap().columns.len(), 3);
        assert!(matches!(dataset.get_data(&["nope"]), Err(ScanError::NotFound(_))));
    }

    #[test]
    fn test_persisted_folder_layout() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("recipe");
        let mut dataset = Dataset::new(&recipe(), Some(folder.clone()), Arc::new(TextFileSaver)).unwrap();
        dataset.add_point(&point(0.0, 1.0)).unwrap();

        let log = fs::read_to_string(folder.join(DATA_FILE_NAME)).unwrap();
        assert_eq!(log.lines().collect::<Vec<_>>(), ["id,phase,amp", "1,0,1"]);

        let payload = folder.join("spectrum").join("1.txt");
        assert_eq!(dataset.overflow_value("spectrum", 1), Some(&Overflow::Stored(payload.clone())));
        assert_eq!(fs::read_to_string(payload).unwrap(), "1\n2\n");

        let export = dir.path().join("out.csv");
        dataset.save(&export).unwrap();
        assert_eq!(fs::read_to_string(&export).unwrap(), log);
        assert!(dir.path().join("out_spectrum").join("1.txt").exists());
    }
}
