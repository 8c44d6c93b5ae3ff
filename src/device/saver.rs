//! Persistence of non-scalar payloads
//!
//! Datasets hand arrays, tables, strings and blobs to an [`ElementSaver`]
//! instead of keeping them in the in-memory table. [`TextFileSaver`] is the
//! default implementation and writes human-readable text files.

use crate::error::Result;
use crate::types::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writes one payload value to a file
pub trait ElementSaver: Send + Sync {
    /// Save `value` at `path`, creating or truncating the file
    fn save(&self, path: &Path, value: &Value) -> Result<()>;
}

/// Saves values as plain text
///
/// - scalars and strings: their display form
/// - arrays: one value per line
/// - tables: CSV with a header line
/// - bytes: written raw
#[derive(Debug, Default, Clone, Copy)]
pub struct TextFileSaver;

impl ElementSaver for TextFileSaver {
    fn save(&self, path: &Path, value: &Value) -> Result<()> {
        if let Value::Bytes(bytes) = value {
            std::fs::write(path, bytes)?;
            return Ok(());
        }

        let mut writer = BufWriter::new(File::create(path)?);
        match value {
            Value::Array(values) => {
                for v in values {
                    writeln!(writer, "{}", v)?;
                }
            }
            Value::Table(table) => {
                writeln!(writer, "{}", table.columns.join(","))?;
                for row in &table.rows {
                    let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                    writeln!(writer, "{}", cells.join(","))?;
                }
            }
            other => write!(writer, "{}", other)?,
        }
        writer.flush()?;
        Ok(())
    }
}
