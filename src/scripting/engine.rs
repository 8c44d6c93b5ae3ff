//! Sandboxed Rhai engine for `$eval:` expressions
//!
//! The engine only evaluates single expressions against a caller-built
//! [`Scope`]. Bindings are converted from [`Value`] with [`to_dynamic`] and
//! results come back through [`from_dynamic`].

use crate::error::{Result, ResultExt, ScanError};
use crate::recipe::sweep;
use crate::types::{Table, Value};
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map, Scope};

/// Expression evaluator with math and array helpers
pub struct ExpressionEngine {
    engine: Engine,
}

impl ExpressionEngine {
    /// Create a new engine with the default helpers and safety limits
    pub fn new() -> Self {
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine);
        Self { engine }
    }

    fn configure_engine(engine: &mut Engine) {
        // Set safety limits
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(32);
        engine.set_max_operations(100_000);
        engine.set_max_string_size(10_000);
        engine.set_max_array_size(100_000);
        engine.set_max_map_size(1_000);

        // Nested `eval` would accept statements
        engine.disable_symbol("eval");

        // Expressions must not write to the host's stdout
        engine.on_print(|_| {});
        engine.on_debug(|_, _, _| {});

        // ===== Mathematical Functions =====

        // Each function accepts both floats and integers
        macro_rules! register_unary {
            ($($name:literal => $method:ident),* $(,)?) => {
                $(
                    engine.register_fn($name, |x: f64| x.$method());
                    engine.register_fn($name, |x: i64| (x as f64).$method());
                )*
            };
        }

        register_unary! {
            "sqrt" => sqrt,
            "exp" => exp,
            "ln" => ln,
            "log" => ln,
            "log10" => log10,
            "log2" => log2,
            "sin" => sin,
            "cos" => cos,
            "tan" => tan,
            "asin" => asin,
            "acos" => acos,
            "atan" => atan,
            "sinh" => sinh,
            "cosh" => cosh,
            "tanh" => tanh,
        }

        engine.register_fn("abs", |x: f64| x.abs());
        engine.register_fn("pow", |x: f64, y: f64| x.powf(y));
        engine.register_fn("pow", |x: i64, y: f64| (x as f64).powf(y));
        engine.register_fn("pow", |x: f64, y: i64| x.powi(y as i32));
        engine.register_fn("atan2", |y: f64, x: f64| y.atan2(x));

        // Rounding
        engine.register_fn("floor", |x: f64| x.floor());
        engine.register_fn("ceil", |x: f64| x.ceil());
        engine.register_fn("round", |x: f64| x.round());
        engine.register_fn("trunc", |x: f64| x.trunc());

        engine.register_fn("clamp", |x: f64, min: f64, max: f64| x.clamp(min, max));
        engine.register_fn("min", |a: f64, b: f64| a.min(b));
        engine.register_fn("max", |a: f64, b: f64| a.max(b));

        engine.register_fn("to_int", |x: f64| x as i64);
        engine.register_fn("to_float", |x: i64| x as f64);

        // Constants
        engine.register_fn("pi", || std::f64::consts::PI);
        engine.register_fn("e", || std::f64::consts::E);

        engine.register_fn("is_nan", |x: f64| x.is_nan());
        engine.register_fn("is_finite", |x: f64| x.is_finite());

        // ===== Array Functions =====

        engine.register_fn(
            "linspace",
            |start: Dynamic, end: Dynamic, count: i64| -> std::result::Result<Array, Box<EvalAltResult>> {
                sweep_array(start, end, count, false)
            },
        );
        engine.register_fn(
            "logspace",
            |start: Dynamic, end: Dynamic, count: i64| -> std::result::Result<Array, Box<EvalAltResult>> {
                sweep_array(start, end, count, true)
            },
        );
        engine.register_fn("sum", |values: Array| -> f64 {
            numbers(&values).sum()
        });
        engine.register_fn("mean", |values: Array| -> f64 {
            let (sum, count) = numbers(&values).fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            if count == 0 {
                f64::NAN
            } else {
                sum / count as f64
            }
        });
        engine.register_fn("amin", |values: Array| -> f64 {
            numbers(&values).fold(f64::NAN, f64::min)
        });
        engine.register_fn("amax", |values: Array| -> f64 {
            numbers(&values).fold(f64::NAN, f64::max)
        });
    }

    /// Check that `expression` parses as a single expression
    pub fn compile(&self, expression: &str) -> Result<()> {
        self.engine
            .compile_expression(expression)
            .map(|_| ())
            .map_err(|e| ScanError::Script(e.to_string()))
    }

    /// Evaluate `expression` with the given bindings
    pub fn eval(&self, expression: &str, scope: &mut Scope) -> Result<Value> {
        let result = self
            .engine
            .eval_expression_with_scope::<Dynamic>(scope, expression)
            .with_context(|| format!("Failed to evaluate '{}'", expression))?;
        from_dynamic(result)
    }
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn numbers(values: &Array) -> impl Iterator<Item = f64> + '_ {
    values.iter().filter_map(dynamic_to_f64)
}

fn dynamic_to_f64(value: &Dynamic) -> Option<f64> {
    value
        .as_float()
        .ok()
        .or_else(|| value.as_int().ok().map(|i| i as f64))
}

fn sweep_array(
    start: Dynamic,
    end: Dynamic,
    count: i64,
    log: bool,
) -> std::result::Result<Array, Box<EvalAltResult>> {
    let (Some(start), Some(end)) = (dynamic_to_f64(&start), dynamic_to_f64(&end)) else {
        return Err("linspace/logspace bounds must be numbers".into());
    };
    let count = usize::try_from(count).map_err(|_| "point count must not be negative")?;
    sweep::generate_values(start, end, count, log)
        .map(|values| values.into_iter().map(Dynamic::from).collect())
        .map_err(|e| e.to_string().into())
}

/// Convert a value into a Rhai binding
///
/// Tables become maps of column name to array.
pub fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Int(i) => Dynamic::from(*i),
        Value::Float(f) => Dynamic::from(*f),
        Value::Bool(b) => Dynamic::from(*b),
        Value::Str(s) => Dynamic::from(s.clone()),
        Value::Array(values) => {
            Dynamic::from_array(values.iter().copied().map(Dynamic::from).collect())
        }
        Value::Table(table) => {
            let mut map = Map::new();
            for name in &table.columns {
                let column = table.column(name).unwrap_or_default();
                map.insert(
                    name.as_str().into(),
                    Dynamic::from_array(column.into_iter().map(Dynamic::from).collect()),
                );
            }
            Dynamic::from_map(map)
        }
        Value::Bytes(bytes) => Dynamic::from_blob(bytes.clone()),
        Value::None => Dynamic::UNIT,
    }
}

/// Convert an evaluation result back into a value
pub fn from_dynamic(value: Dynamic) -> Result<Value> {
    if value.is_unit() {
        return Ok(Value::None);
    }
    if let Ok(i) = value.as_int() {
        return Ok(Value::Int(i));
    }
    if let Ok(f) = value.as_float() {
        return Ok(Value::Float(f));
    }
    if let Ok(b) = value.as_bool() {
        return Ok(Value::Bool(b));
    }

    let type_name = value.type_name();
    if value.is_string() {
        return value
            .into_string()
            .map(Value::Str)
            .map_err(|e| ScanError::Script(e.to_string()));
    }
    if value.is_blob() {
        return value
            .into_blob()
            .map(Value::Bytes)
            .map_err(|e| ScanError::Script(e.to_string()));
    }
    if value.is_array() {
        let array = value
            .into_array()
            .map_err(|e| ScanError::Script(e.to_string()))?;
        return array_to_f64(&array).map(Value::Array);
    }
    if let Some(map) = value.try_cast::<Map>() {
        return map_to_table(map).map(Value::Table);
    }

    Err(ScanError::Script(format!(
        "unsupported expression result of type '{}'",
        type_name
    )))
}

fn array_to_f64(array: &Array) -> Result<Vec<f64>> {
    array
        .iter()
        .map(|v| {
            dynamic_to_f64(v).ok_or_else(|| {
                ScanError::Script(format!("array element of type '{}' is not numeric", v.type_name()))
            })
        })
        .collect()
}

fn map_to_table(map: Map) -> Result<Table> {
    let mut columns = Vec::with_capacity(map.len());
    let mut data = Vec::with_capacity(map.len());
    for (name, column) in map {
        let values = column
            .into_array()
            .map_err(|_| ScanError::Script(format!("table column '{}' is not an array", name)))?;
        columns.push(name.to_string());
        data.push(array_to_f64(&values)?);
    }

    let rows = data.first().map_or(0, Vec::len);
    if data.iter().any(|column| column.len() != rows) {
        return Err(ScanError::Script(
            "table columns have different lengths".to_string(),
        ));
    }

    let mut table = Table::new(columns);
    for i in 0..rows {
        table.push_row(data.iter().map(|column| column[i]).collect());
    }
    Ok(table)
}

/// Insert `value` into nested maps following `segments`
///
/// Used to expose `device.element` paths as Rhai property access.
pub fn insert_path(root: &mut Map, segments: &[&str], value: Dynamic) {
    match segments {
        [] => {}
        [last] => {
            root.insert((*last).into(), value);
        }
        [first, rest @ ..] => {
            let entry = root
                .entry((*first).into())
                .or_insert_with(|| Dynamic::from_map(Map::new()));
            let mut child = std::mem::take(entry).try_cast::<Map>().unwrap_or_default();
            insert_path(&mut child, rest, value);
            *entry = Dynamic::from_map(child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expression: &str) -> Result<Value> {
        ExpressionEngine::new().eval(expression, &mut Scope::new())
    }

    #[test]
    fn test_arithmetic_and_math() {
        assert_eq!(eval("1 + 2").unwrap(), Value::Int(3));
        assert_eq!(eval("2.0 * 3.5").unwrap(), Value::Float(7.0));
        assert_eq!(eval("sqrt(16)").unwrap(), Value::Float(4.0));
        assert_eq!(eval("1 < 2").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_array_helpers() {
        assert_eq!(
            eval("linspace(0, 10, 3)").unwrap(),
            Value::Array(vec![0.0, 5.0, 10.0])
        );
        assert_eq!(eval("sum([1, 2.5, 3])").unwrap(), Value::Float(6.5));
        assert_eq!(eval("mean([2.0, 4.0])").unwrap(), Value::Float(3.0));
        assert!(eval("logspace(0, 10, 3)").is_err());
    }

    #[test]
    fn test_statements_are_rejected() {
        assert!(eval("let x = 1; x").is_err());
        assert!(eval("fn f() { 1 }").is_err());
        assert!(eval("while true {}").is_err());
        assert!(eval("eval(\"let x = 2; x * 3\")").is_err());
    }

    #[test]
    fn test_scope_bindings_and_paths() {
        let engine = ExpressionEngine::new();
        let mut device = Map::new();
        insert_path(&mut device, &["amplitude"], Dynamic::from(2.0_f64));
        insert_path(&mut device, &["sub", "gain"], Dynamic::from(3_i64));

        let mut scope = Scope::new();
        scope.push_constant_dynamic("dummy", Dynamic::from_map(device));
        scope.push_constant_dynamic("offset", to_dynamic(&Value::Float(0.5)));

        let result = engine
            .eval("dummy.amplitude * dummy.sub.gain + offset", &mut scope)
            .unwrap();
        assert_eq!(result, Value::Float(6.5));
    }

    #[test]
    fn test_table_roundtrip_through_map() {
        let mut table = Table::new(vec!["x".into(), "y".into()]);
        table.push_row(vec![1.0, 2.0]);
        table.push_row(vec![3.0, 4.0]);

        let converted = from_dynamic(to_dynamic(&Value::Table(table.clone()))).unwrap();
        assert_eq!(converted, Value::Table(table));
    }

    #[test]
    fn test_unknown_identifier_is_script_error() {
        let err = eval("missing + 1").unwrap_err();
        assert!(matches!(err.root(), ScanError::Script(_)));
    }
}
