//! Core data types for scanlab
//!
//! This module contains the value model shared by devices, variables,
//! recipes and datasets.
//!
//! # Main Types
//!
//! - [`Value`] - A dynamically typed value read from or written to a device
//! - [`ValueType`] - The declared type of a device element or variable
//! - [`Table`] - A small numeric table (named columns of `f64`)
//! - [`StepKind`] - The closed set of recipe step kinds
//!
//! # Scalars and payloads
//!
//! Integers, floats and booleans are *scalars*: they live in the in-memory
//! dataset table. Everything else (arrays, tables, strings, raw bytes) is a
//! payload that datasets store out of line.

use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};

/// Characters removed from user-supplied names
const NAME_FORBIDDEN_CHARS: &[char] = &[
    '*', '.', '"', '/', '\\', '[', ']', ':', ';', '|', ',', ' ', '$',
];

/// Remove characters that are not allowed in variable, recipe or column names
pub fn clean_name(name: &str) -> String {
    name.chars()
        .filter(|c| !NAME_FORBIDDEN_CHARS.contains(c))
        .collect()
}

/// Declared type of a device element or a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ValueType {
    /// 64-bit signed integer
    Int,
    /// 64-bit floating point
    #[default]
    Float,
    /// Boolean value
    Bool,
    /// UTF-8 string
    Str,
    /// One-dimensional numeric array
    Array,
    /// Numeric table with named columns
    Table,
    /// Opaque binary blob
    Bytes,
    /// No value (argument-less actions)
    None,
}

impl ValueType {
    /// Returns true if values of this type belong in the in-memory table
    pub fn is_scalar(&self) -> bool {
        matches!(self, ValueType::Int | ValueType::Float | ValueType::Bool)
    }

    /// Default value seeded into new `Set` steps of this type
    pub fn default_value(&self) -> Value {
        match self {
            ValueType::Int => Value::Int(0),
            ValueType::Float => Value::Float(0.0),
            ValueType::Bool => Value::Bool(false),
            ValueType::Str | ValueType::Array | ValueType::Table | ValueType::Bytes => {
                Value::Str(String::new())
            }
            ValueType::None => Value::None,
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueType::Int => write!(f, "int"),
            ValueType::Float => write!(f, "float"),
            ValueType::Bool => write!(f, "bool"),
            ValueType::Str => write!(f, "str"),
            ValueType::Array => write!(f, "array"),
            ValueType::Table => write!(f, "table"),
            ValueType::Bytes => write!(f, "bytes"),
            ValueType::None => write!(f, "none"),
        }
    }
}

/// A numeric table with named columns, stored row-major
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    /// Column names
    pub columns: Vec<String>,
    /// Rows, each with one value per column
    pub rows: Vec<Vec<f64>>,
}

impl Table {
    /// Create an empty table with the given columns
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row; returns false if its width does not match the header
    pub fn push_row(&mut self, row: Vec<f64>) -> bool {
        if row.len() != self.columns.len() {
            return false;
        }
        self.rows.push(row);
        true
    }

    /// Extract one column by name
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let index = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| row[index]).collect())
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Parse tab-separated text with a header line
    fn parse_tsv(text: &str) -> Option<Self> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header = lines.next()?;
        let columns: Vec<String> = header.split('\t').map(|c| c.trim().to_string()).collect();
        let mut table = Table::new(columns);
        for line in lines {
            let row = line
                .split('\t')
                .map(|cell| cell.trim().parse::<f64>().ok())
                .collect::<Option<Vec<f64>>>()?;
            if !table.push_row(row) {
                return None;
            }
        }
        Some(table)
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.columns.join("\t"))?;
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            writeln!(f, "{}", cells.join("\t"))?;
        }
        Ok(())
    }
}

/// A dynamically typed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Boolean value
    Bool(bool),
    /// String value (may hold an `$eval:` expression)
    Str(String),
    /// Numeric array
    Array(Vec<f64>),
    /// Numeric table
    Table(Table),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// No value
    #[default]
    None,
}

impl Value {
    /// The type tag of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Bool(_) => ValueType::Bool,
            Value::Str(_) => ValueType::Str,
            Value::Array(_) => ValueType::Array,
            Value::Table(_) => ValueType::Table,
            Value::Bytes(_) => ValueType::Bytes,
            Value::None => ValueType::None,
        }
    }

    /// Returns true for integers, floats and booleans
    pub fn is_scalar(&self) -> bool {
        self.value_type().is_scalar()
    }

    /// Numeric view of a scalar value
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// String view of a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true if this is a string carrying an `$eval:` expression
    pub fn is_eval(&self) -> bool {
        self.as_str().is_some_and(crate::scripting::has_eval)
    }

    /// Parse user-entered text into the most specific value
    ///
    /// Tab/newline separated text becomes a table, bracketed text an array,
    /// then integer, float and boolean literals are tried before falling
    /// back to a plain string. `$eval:` expressions are kept verbatim.
    pub fn parse_literal(text: &str) -> Value {
        if crate::scripting::has_eval(text) {
            return Value::Str(text.to_string());
        }

        if text.contains('\t') && text.contains('\n') {
            if let Some(table) = Table::parse_tsv(text) {
                return Value::Table(table);
            }
        } else if text.contains('[') {
            if let Some(array) = parse_array(text) {
                return Value::Array(array);
            }
        } else {
            let trimmed = text.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Value::Int(i);
            }
            if let Ok(f) = trimmed.parse::<f64>() {
                return Value::Float(f);
            }
            match trimmed {
                "True" | "true" => return Value::Bool(true),
                "False" | "false" => return Value::Bool(false),
                _ => {}
            }
        }

        Value::Str(text.to_string())
    }

    /// Convert to the declared type of an element
    ///
    /// Numbers widen and narrow losslessly, scalars render into strings and
    /// plain text is parsed according to `target`. Expressions are not
    /// evaluated here and fail to convert to non-string types.
    pub fn convert_to(&self, target: ValueType) -> Result<Value> {
        if self.value_type() == target {
            return Ok(self.clone());
        }

        let converted = match (target, self) {
            (ValueType::None, _) => Some(Value::None),
            (ValueType::Int, Value::Float(f)) if f.fract() == 0.0 && f.is_finite() => {
                Some(Value::Int(*f as i64))
            }
            (ValueType::Int, Value::Bool(b)) => Some(Value::Int(i64::from(*b))),
            (ValueType::Float, Value::Int(i)) => Some(Value::Float(*i as f64)),
            (ValueType::Float, Value::Bool(b)) => Some(Value::Float(f64::from(u8::from(*b)))),
            (ValueType::Bool, Value::Int(0)) => Some(Value::Bool(false)),
            (ValueType::Bool, Value::Int(1)) => Some(Value::Bool(true)),
            (ValueType::Str, v) if v.is_scalar() => Some(Value::Str(v.to_string())),
            (_, Value::Str(text)) if !self.is_eval() => parse_as(text, target),
            _ => None,
        };

        converted.ok_or_else(|| {
            ScanError::InvalidConfiguration(format!(
                "cannot convert {} value '{}' to {}",
                self.value_type(),
                self,
                target
            ))
        })
    }
}

fn parse_as(text: &str, target: ValueType) -> Option<Value> {
    let trimmed = text.trim();
    match target {
        ValueType::Int => trimmed.parse::<i64>().ok().map(Value::Int),
        ValueType::Float => trimmed.parse::<f64>().ok().map(Value::Float),
        ValueType::Bool => match trimmed {
            "True" | "true" | "1" => Some(Value::Bool(true)),
            "False" | "false" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        ValueType::Array => parse_array(trimmed).map(Value::Array),
        ValueType::Table => Table::parse_tsv(text).map(Value::Table),
        ValueType::Bytes => Some(Value::Bytes(text.as_bytes().to_vec())),
        ValueType::Str | ValueType::None => None,
    }
}

fn parse_array(text: &str) -> Option<Vec<f64>> {
    let inner: String = text
        .chars()
        .filter(|c| *c != '[' && *c != ']')
        .collect();
    inner
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>().ok())
        .collect()
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Str(s) => write!(f, "{}", s),
            Value::Array(values) => {
                let items: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Table(table) => write!(f, "{}", table),
            Value::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::None => Ok(()),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Array(v)
    }
}

/// The kind of operation a recipe step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// Read the element and record the result
    Measure,
    /// Evaluate the step value and write it to the element
    Set,
    /// Invoke the element, with the evaluated value if one is configured
    Action,
}

impl StepKind {
    /// Name used in configuration documents
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Measure => "measure",
            StepKind::Set => "set",
            StepKind::Action => "action",
        }
    }

    /// Parse a configuration document name
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "measure" => Some(StepKind::Measure),
            "set" => Some(StepKind::Set),
            "action" => Some(StepKind::Action),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_classification() {
        assert!(Value::Int(3).is_scalar());
        assert!(Value::Float(1.5).is_scalar());
        assert!(Value::Bool(true).is_scalar());
        assert!(!Value::Str("a".into()).is_scalar());
        assert!(!Value::Array(vec![1.0]).is_scalar());
        assert!(!ValueType::Bytes.is_scalar());
    }

    #[test]
    fn test_parse_literal_scalars() {
        assert_eq!(Value::parse_literal("42"), Value::Int(42));
        assert_eq!(Value::parse_literal("2.5"), Value::Float(2.5));
        assert_eq!(Value::parse_literal("1e3"), Value::Float(1000.0));
        assert_eq!(Value::parse_literal("True"), Value::Bool(true));
        assert_eq!(Value::parse_literal("false"), Value::Bool(false));
        assert_eq!(Value::parse_literal("hello"), Value::Str("hello".into()));
    }

    #[test]
    fn test_parse_literal_array_and_table() {
        assert_eq!(
            Value::parse_literal("[1, 2, 3.5]"),
            Value::Array(vec![1.0, 2.0, 3.5])
        );

        let table = Value::parse_literal("x\ty\n1\t2\n3\t4\n");
        let Value::Table(table) = table else {
            panic!("expected a table");
        };
        assert_eq!(table.columns, vec!["x", "y"]);
        assert_eq!(table.column("y"), Some(vec![2.0, 4.0]));
    }

    #[test]
    fn test_parse_literal_keeps_eval() {
        let parsed = Value::parse_literal("$eval:1+1");
        assert!(parsed.is_eval());
    }

    #[test]
    fn test_malformed_array_falls_back_to_string() {
        assert_eq!(
            Value::parse_literal("[1, a]"),
            Value::Str("[1, a]".into())
        );
    }

    #[test]
    fn test_convert_to_element_type() {
        assert_eq!(
            Value::Int(2).convert_to(ValueType::Float).unwrap(),
            Value::Float(2.0)
        );
        assert_eq!(
            Value::Float(3.0).convert_to(ValueType::Int).unwrap(),
            Value::Int(3)
        );
        assert!(Value::Float(3.5).convert_to(ValueType::Int).is_err());
        assert_eq!(
            Value::Str("True".into()).convert_to(ValueType::Bool).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            Value::Str("0".into()).convert_to(ValueType::Bool).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            Value::Float(1.5).convert_to(ValueType::Str).unwrap(),
            Value::Str("1.5".into())
        );
        assert!(Value::Str("$eval:1".into())
            .convert_to(ValueType::Float)
            .is_err());
    }

    #[test]
    fn test_clean_name() {
        assert_eq!(clean_name("my var.1"), "myvar1");
        assert_eq!(clean_name("$a[b]:c"), "abc");
    }

    #[test]
    fn test_step_kind_names() {
        for kind in [StepKind::Measure, StepKind::Set, StepKind::Action] {
            assert_eq!(StepKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(StepKind::parse("recipe"), None);
    }
}
