//! `$eval:` expression support
//!
//! Step values and variables may hold expressions instead of literals. An
//! expression is a string starting with [`EVAL_PREFIX`]; the remainder is
//! evaluated by a sandboxed Rhai engine (see [`ExpressionEngine`]).
//!
//! ## Namespace
//!
//! An expression sees:
//!
//! - every variable of the store, by name
//! - every registered device, by name, with elements reachable through
//!   dotted access (`dummy.amplitude`)
//! - math helpers: `sqrt`, `exp`, `ln`, `log10`, `sin`, `cos`, `pi()`, ...
//! - array helpers: `linspace`, `logspace`, `sum`, `mean`, `amin`, `amax`
//!
//! Only expressions are accepted. Statements, loops and function
//! definitions are rejected at parse time.
//!
//! ## Examples
//!
//! ```rhai
//! $eval:2 * gain + 1.5
//! $eval:dummy.amplitude * cos(dummy.phase)
//! $eval:mean(dummy.spectrum)
//! ```
//!
//! ## Reference scanning
//!
//! Whether an expression refers to a device or variable is decided by an
//! identifier scan, not a parse. The scan also sees identifiers inside
//! string literals and exponents of numbers (`1e3` yields `e3`), so it may
//! over-report references.

mod engine;

pub use engine::{from_dynamic, insert_path, to_dynamic, ExpressionEngine};

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Prefix marking a string as an expression
pub const EVAL_PREFIX: &str = "$eval:";

static IDENTIFIER_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*")
        .expect("identifier pattern compiles")
});

/// Returns true if `text` is an `$eval:` expression
pub fn has_eval(text: &str) -> bool {
    text.starts_with(EVAL_PREFIX)
}

/// Strip the `$eval:` prefix, or return the text unchanged
pub fn strip_eval(text: &str) -> &str {
    text.strip_prefix(EVAL_PREFIX).unwrap_or(text)
}

/// All dotted identifier paths in an expression, in order of appearance
pub fn identifier_paths(expression: &str) -> Vec<&str> {
    IDENTIFIER_PATH
        .find_iter(strip_eval(expression))
        .map(|m| m.as_str())
        .collect()
}

/// Distinct first segments of the identifier paths in an expression
pub fn root_names(expression: &str) -> BTreeSet<&str> {
    identifier_paths(expression)
        .into_iter()
        .map(root_segment)
        .collect()
}

/// First segment of a dotted path
pub fn root_segment(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

/// Returns true if `name` appears as an identifier (or the root of a dotted
/// path) outside of quotes
///
/// Tokens directly preceded or followed by a quote character are treated as
/// string content and ignored. This is the check used to reject a variable
/// defined in terms of itself.
pub fn references_name(expression: &str, name: &str) -> bool {
    let body = strip_eval(expression);
    IDENTIFIER_PATH.find_iter(body).any(|m| {
        let before = body[..m.start()].chars().next_back();
        let after = body[m.end()..].chars().next();
        let quoted = [before, after]
            .iter()
            .any(|c| matches!(c, Some('"') | Some('\'')));
        !quoted && (m.as_str() == name || root_segment(m.as_str()) == name)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_eval() {
        assert!(has_eval("$eval:1+1"));
        assert!(!has_eval(" $eval:1+1"));
        assert!(!has_eval("1+1"));
        assert_eq!(strip_eval("$eval:x*2"), "x*2");
        assert_eq!(strip_eval("x*2"), "x*2");
    }

    #[test]
    fn test_identifier_paths() {
        let paths = identifier_paths("$eval:dummy.amplitude * gain + sqrt(2)");
        assert_eq!(paths, vec!["dummy.amplitude", "gain", "sqrt"]);

        let roots = root_names("$eval:dummy.amplitude + dummy.phase");
        assert_eq!(roots.into_iter().collect::<Vec<_>>(), vec!["dummy"]);
    }

    #[test]
    fn test_references_name_ignores_quoted() {
        assert!(references_name("$eval:x+1", "x"));
        assert!(references_name("$eval:x.real", "x"));
        assert!(!references_name("$eval:'x'", "x"));
        assert!(!references_name("$eval:\"x\" + y", "x"));
        assert!(!references_name("$eval:xy + 1", "x"));
    }

    #[test]
    fn test_eval_named_variable_is_allowed() {
        // The prefix itself must not count as a reference to `eval`
        assert!(!references_name("$eval:1+1", "eval"));
    }
}
