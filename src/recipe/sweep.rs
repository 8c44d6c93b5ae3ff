//! Parameter sweep generation
//!
//! Pure functions computing the ordered values a parameter takes during a
//! scan, and the reconciliation between point count and step size.

use crate::error::{Result, ScanError};

/// Generate `count` values from `start` to `end`, both included
///
/// Linear sweeps are evenly spaced. Log sweeps are geometrically spaced and
/// require both bounds to be strictly positive. The first and last values
/// are exactly `start` and `end`.
pub fn generate_values(start: f64, end: f64, count: usize, log: bool) -> Result<Vec<f64>> {
    if count == 0 {
        return Err(ScanError::InvalidStep(
            "a sweep needs at least one point".to_string(),
        ));
    }
    if !start.is_finite() || !end.is_finite() {
        return Err(ScanError::InvalidRange(format!(
            "bounds must be finite, got ({}, {})",
            start, end
        )));
    }
    if log && (start <= 0.0 || end <= 0.0) {
        return Err(ScanError::InvalidRange(format!(
            "log sweep needs positive bounds, got ({}, {})",
            start, end
        )));
    }

    if count == 1 {
        return Ok(vec![start]);
    }

    let (from, to) = if log {
        (start.ln(), end.ln())
    } else {
        (start, end)
    };
    let last = count - 1;
    let delta = (to - from) / last as f64;

    let values = (0..count)
        .map(|i| {
            if i == 0 {
                start
            } else if i == last {
                end
            } else {
                let x = from + delta * i as f64;
                if log {
                    x.exp()
                } else {
                    x
                }
            }
        })
        .collect();
    Ok(values)
}

/// Step size between consecutive points for a given point count
///
/// A single point sweep has a step of zero.
pub fn step_from_count(start: f64, end: f64, count: usize) -> Result<f64> {
    match count {
        0 => Err(ScanError::InvalidStep(
            "a sweep needs at least one point".to_string(),
        )),
        1 => Ok(0.0),
        n => Ok((end - start).abs() / (n - 1) as f64),
    }
}

/// Derive the point count from a step size
///
/// Returns `(count, adjusted_step)`: the count is rounded so that the sweep
/// lands exactly on `end`, and the step is recomputed from that count. An
/// empty range yields a single point.
pub fn reconcile_from_step(start: f64, end: f64, step: f64) -> Result<(usize, f64)> {
    if !step.is_finite() || step <= 0.0 {
        return Err(ScanError::InvalidStep(format!(
            "step must be positive, got {}",
            step
        )));
    }

    let width = (end - start).abs();
    if !width.is_finite() {
        return Err(ScanError::InvalidRange(format!(
            "bounds must be finite, got ({}, {})",
            start, end
        )));
    }
    if width == 0.0 {
        return Ok((1, 0.0));
    }

    let intervals = (width / step).round();
    if intervals >= usize::MAX as f64 {
        return Err(ScanError::InvalidStep(format!(
            "step {} is too small for a range of {}",
            step, width
        )));
    }
    let count = intervals as usize + 1;
    let adjusted = if count > 1 {
        width / (count - 1) as f64
    } else {
        0.0
    };
    Ok((count, adjusted))
}
